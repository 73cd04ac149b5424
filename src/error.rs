//! Error types shared by the extraction and playback paths.

use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Errors produced by sources, devices, the waveform extractor and the player.
///
/// `Clone` so the player can keep the last fault around and hand copies to observers.
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Failed to open source {uri}: {reason}")]
    SourceOpen { uri: String, reason: String },

    #[error("Output device failure: {0}")]
    Device(String),

    #[error("Read failed: {0}")]
    Read(Arc<io::Error>),

    #[error("Extraction cancelled")]
    Cancelled,

    #[error("Output device does not support balance")]
    BalanceUnsupported,
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Read(Arc::new(err))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
