//! crates/tuvi_core/src/chart.rs
//!
//! Deterministic chart derivation. The same birth input always yields the same
//! chart: the input is hashed into a seed and the seed drives a fixed PRNG.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};

use crate::domain::{BirthInput, Chart, ChartPalace};
use crate::ports::{PortError, PortResult};

/// Tag stored with every chart so readings can be traced to the engine build.
pub const ENGINE_VERSION: &str = "seeded-1";

const STAR_POOL: [&str; 14] = [
    "Tử Vi",
    "Thiên Cơ",
    "Thái Dương",
    "Vũ Khúc",
    "Thiên Đồng",
    "Liêm Trinh",
    "Thiên Phủ",
    "Thái Âm",
    "Tham Lang",
    "Cự Môn",
    "Thiên Tướng",
    "Thiên Lương",
    "Thất Sát",
    "Phá Quân",
];

const PALACE_NAMES: [&str; 12] = [
    "Mệnh",
    "Phụ Mẫu",
    "Phúc Đức",
    "Điền Trạch",
    "Quan Lộc",
    "Nô Bộc",
    "Thiên Di",
    "Tật Ách",
    "Tài Bạch",
    "Tử Tức",
    "Phu Thê",
    "Huynh Đệ",
];

/// First 32 bits of the SHA-256 of the input's canonical JSON.
fn seed_for(birth_input: &BirthInput) -> PortResult<u32> {
    let canonical = serde_json::to_vec(birth_input)
        .map_err(|e| PortError::Unexpected(format!("Failed to encode birth input: {}", e)))?;
    let digest = hex::encode(Sha256::digest(&canonical));
    u32::from_str_radix(&digest[..8], 16)
        .map_err(|e| PortError::Unexpected(format!("Failed to derive chart seed: {}", e)))
}

/// Derives the chart for a birth input.
pub fn derive_chart(birth_input: &BirthInput) -> PortResult<Chart> {
    let seed = seed_for(birth_input)?;
    let mut rng = StdRng::seed_from_u64(u64::from(seed));

    let palaces = PALACE_NAMES
        .iter()
        .map(|name| {
            let star_count = rng.gen_range(2..=5);
            let stars = (0..star_count)
                .map(|_| STAR_POOL[rng.gen_range(0..STAR_POOL.len())].to_string())
                .collect();
            ChartPalace {
                name: name.to_string(),
                stars,
            }
        })
        .collect();

    Ok(Chart {
        engine_version: ENGINE_VERSION.to_string(),
        seed: seed.to_string(),
        palaces,
    })
}
