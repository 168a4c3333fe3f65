//! services/api/src/lib.rs
//!
//! The `api` service: PostgreSQL and OpenAI adapters for the reading
//! pipeline, plus the HTTP surface shared by the binaries.

pub mod adapters;
pub mod config;
pub mod error;
pub mod web;
