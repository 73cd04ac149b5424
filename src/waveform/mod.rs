//! Streaming peak extraction.

pub mod extractor;
pub mod sampler;

pub use extractor::{spawn_extraction, CancelFlag, ExtractionTask, WaveformExtractor};
pub use sampler::{MinMaxSampler, PeakSampler};
