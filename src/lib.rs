//! VRoid Hub preview model deobfuscator
//!
//! Decrypts a downloaded preview, reverses the per-vertex displacement,
//! normalizes embedded textures and writes back a VRM that keeps its
//! vendor extensions.

pub mod config;
pub mod debug;
pub mod deobfuscate;
pub mod document;
pub mod envelope;
mod error;
pub mod extensions;
pub mod fetch;
pub mod logging;
pub mod pipeline;
pub mod prng;
pub mod seed;
pub mod texture;

pub use error::{Error, Result};
pub use logging::{LogLevel, init_logging};
pub use pipeline::{DeobfuscationReport, PipelineHooks, deobfuscate_model, run_pipeline_on_bytes};
