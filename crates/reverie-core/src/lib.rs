//! # reverie-core
//!
//! Core types, errors, and configuration for the reverie batch dispatcher.
//!
//! This crate provides the foundational data structures that the client and
//! dispatch crates depend on: job descriptors, fingerprints, completion
//! payloads, and process/batch configuration.

pub mod config;
pub mod defaults;
pub mod error;
pub mod fingerprint;
pub mod job;
pub mod payload;

// Re-export commonly used types at crate root
pub use config::{scan_assets, BatchConfig, PlaylistSpec, Settings};
pub use error::{Error, Result};
pub use fingerprint::Fingerprint;
pub use job::{build_descriptor, compose_prompt, Algorithm, JobDescriptor};
pub use payload::CompletionPayload;
