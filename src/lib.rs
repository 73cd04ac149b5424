//! Waveform peak extraction and a transport state machine over an audio output device.
//!
//! - [`waveform`] turns a PCM source into a [`audio::types::WaveformData`]
//! - [`player`] drives playback and works around late or missing device stop notifications

pub mod audio;
pub mod config;
pub mod error;
pub mod player;
pub mod waveform;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};
