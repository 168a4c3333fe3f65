//! crates/tuvi_core/src/prompts.rs
//!
//! The prompt-version registry. Versions are created inactive; activating one
//! deactivates all others in the same unit of work, so at most one version is
//! ever active.

use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::domain::{NewPromptVersion, PromptVersion};
use crate::ports::{DatabaseService, PortError, PortResult};

#[derive(Clone)]
pub struct PromptRegistry {
    db: Arc<dyn DatabaseService>,
}

impl PromptRegistry {
    pub fn new(db: Arc<dyn DatabaseService>) -> Self {
        Self { db }
    }

    /// Registers a new, inactive version. Fails with `Conflict` when the name is taken.
    pub async fn create(&self, new_version: NewPromptVersion) -> PortResult<PromptVersion> {
        validate(&new_version)?;
        let version = self.db.create_prompt_version(new_version).await?;
        info!(prompt_version_id = %version.id, name = %version.name, "Prompt version created");
        Ok(version)
    }

    /// Makes `prompt_version_id` the only active version.
    pub async fn activate(&self, prompt_version_id: Uuid) -> PortResult<PromptVersion> {
        let version = self.db.activate_prompt_version(prompt_version_id).await?;
        info!(prompt_version_id = %version.id, name = %version.name, "Prompt version activated");
        Ok(version)
    }

    pub async fn active_version(&self) -> PortResult<Option<PromptVersion>> {
        self.db.get_active_prompt_version().await
    }

    pub async fn list(&self) -> PortResult<Vec<PromptVersion>> {
        self.db.list_prompt_versions().await
    }

    /// Creates the named version, or overwrites its instructions when it
    /// already exists, then activates it.
    pub async fn ensure_active(&self, new_version: NewPromptVersion) -> PortResult<PromptVersion> {
        validate(&new_version)?;
        let existing = self.db.get_prompt_version_by_name(&new_version.name).await?;
        let version = match existing {
            Some(version) => {
                let refreshed = self.db.refresh_prompt_version(version.id, new_version).await?;
                info!(prompt_version_id = %refreshed.id, name = %refreshed.name, "Prompt version refreshed");
                refreshed
            }
            None => self.create(new_version).await?,
        };
        self.activate(version.id).await
    }
}

fn validate(new_version: &NewPromptVersion) -> PortResult<()> {
    if new_version.name.trim().is_empty() {
        return Err(PortError::validation("name", "must not be empty"));
    }
    if new_version.system_prompt.trim().is_empty() {
        return Err(PortError::validation("systemPrompt", "must not be empty"));
    }
    if let Some(temperature) = new_version.temperature {
        if !temperature.is_finite() || temperature < 0.0 {
            return Err(PortError::validation("temperature", "must be a non-negative number"));
        }
    }
    if new_version.max_output_tokens == Some(0) {
        return Err(PortError::validation("maxOutputTokens", "must be positive"));
    }
    Ok(())
}
