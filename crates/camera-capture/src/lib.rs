//! Decoder supervision and frame capture
//!
//! One [`CaptureSupervisor`] per camera owns the decoder subprocess and the
//! frame collector thread, and restarts both on stall, runaway rate or
//! decoder exit.

mod capture;
mod collector;
mod decoder;
mod error;
pub mod ffmpeg;
mod log_ring;

pub use capture::{CaptureSupervisor, STALL_SECS};
pub use collector::{CollectorExit, FrameCollector};
pub use decoder::{DecoderProcess, DecoderSupervisor, STOP_GRACE};
pub use error::{CaptureError, Result};
pub use ffmpeg::{build_decoder_command, DecoderCommand, LibvaGpuSelector};
pub use log_ring::LogRing;
