//! Core engine for edgescope
//!
//! Configuration model, error types, logging setup and the small runtime
//! primitives (rate meters, shared per-camera scalars, frame keys) that
//! every pipeline stage depends on.

pub mod config;
pub mod error;
pub mod fps;
pub mod logger;
pub mod metrics;
pub mod types;

pub use config::AppConfig;
pub use error::{EdgeError, Result};
