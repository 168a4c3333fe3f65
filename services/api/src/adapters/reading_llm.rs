//! services/api/src/adapters/reading_llm.rs
//!
//! This module contains the adapter for the reading-generation LLM.
//! It implements the `ReadingGenerationService` port from the `core` crate
//! using the OpenAI Responses API.

use async_openai::{config::OpenAIConfig, error::OpenAIError, types::responses::CreateResponseArgs, Client};
use async_trait::async_trait;
use std::time::Instant;
use tuvi_core::{
    domain::{GenerationOutput, GenerationRequest},
    ports::{PortError, PortResult, ReadingGenerationService},
};

/// Recorded on a reading when the worker runs without a credential.
pub const MISSING_API_KEY_MESSAGE: &str = "OPENAI_API_KEY is not configured. Please set it in .env.";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `ReadingGenerationService` using an OpenAI-compatible LLM.
///
/// The client is optional: a worker without a key still starts, and every job
/// it picks up is failed as a configuration error instead of being retried.
#[derive(Clone)]
pub struct OpenAiReadingAdapter {
    client: Option<Client<OpenAIConfig>>,
}

impl OpenAiReadingAdapter {
    /// Creates a new `OpenAiReadingAdapter`.
    pub fn new(client: Option<Client<OpenAIConfig>>) -> Self {
        Self { client }
    }

    /// Builds the client from an optional API key.
    pub fn from_api_key(api_key: Option<&str>) -> Self {
        let client = api_key.map(|key| Client::with_config(OpenAIConfig::new().with_api_key(key)));
        Self::new(client)
    }
}

//=========================================================================================
// `ReadingGenerationService` Trait Implementation
//=========================================================================================

#[async_trait]
impl ReadingGenerationService for OpenAiReadingAdapter {
    fn ensure_configured(&self) -> PortResult<()> {
        match self.client {
            Some(_) => Ok(()),
            None => Err(PortError::Configuration(MISSING_API_KEY_MESSAGE.to_string())),
        }
    }

    /// Sends the system prompt as instructions and the structured payload as
    /// JSON input; returns the text with usage and wall-clock latency.
    async fn generate_reading(&self, request: &GenerationRequest) -> PortResult<GenerationOutput> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| PortError::Configuration(MISSING_API_KEY_MESSAGE.to_string()))?;

        let input = serde_json::to_string(&request.user_payload)
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let mut args = CreateResponseArgs::default();
        args.model(&request.model)
            .instructions(&request.system_prompt)
            .input(input);
        if let Some(temperature) = request.temperature {
            args.temperature(temperature);
        }
        if let Some(max_output_tokens) = request.max_output_tokens {
            args.max_output_tokens(max_output_tokens);
        }
        let api_request = args.build().map_err(|e| PortError::Unexpected(e.to_string()))?;

        let started = Instant::now();
        let response = client
            .responses()
            .create(api_request)
            .await
            .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let text = response.output_text().unwrap_or_default();
        let (input_tokens, output_tokens) = match &response.usage {
            Some(usage) => (Some(usage.input_tokens), Some(usage.output_tokens)),
            None => (None, None),
        };

        Ok(GenerationOutput {
            text,
            model: response.model.clone(),
            input_tokens,
            output_tokens,
            latency_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_missing_key_is_a_configuration_error() {
        let adapter = OpenAiReadingAdapter::from_api_key(None);
        assert_eq!(
            adapter.ensure_configured(),
            Err(PortError::Configuration(MISSING_API_KEY_MESSAGE.to_string()))
        );

        let request = GenerationRequest {
            system_prompt: "system".to_string(),
            user_payload: json!({}),
            model: "gpt-5-mini".to_string(),
            temperature: None,
            max_output_tokens: None,
        };
        let err = adapter.generate_reading(&request).await.unwrap_err();
        assert!(matches!(err, PortError::Configuration(_)));
    }

    #[test]
    fn test_key_present_is_configured() {
        let adapter = OpenAiReadingAdapter::from_api_key(Some("sk-test"));
        assert!(adapter.ensure_configured().is_ok());
    }
}
