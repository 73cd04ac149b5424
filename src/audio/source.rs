//! Seekable PCM sources and the factory that opens them.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::types::PcmFormat;
use crate::error::Result;

/// A seekable stream of interleaved PCM bytes.
///
/// Positions and lengths are in bytes. Dropping a source releases it.
pub trait PcmSource: Send {
    fn format(&self) -> PcmFormat;

    /// Total length in bytes.
    fn length(&self) -> u64;

    /// Current read offset in bytes.
    fn position(&self) -> u64;

    fn set_position(&mut self, position: u64) -> Result<()>;

    /// Read up to `buf.len()` bytes, returning how many were written. `0` means end of stream.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    fn current_time(&self) -> Duration {
        self.format().bytes_to_duration(self.position())
    }

    fn total_time(&self) -> Duration {
        self.format().bytes_to_duration(self.length())
    }
}

/// A source shared between the player and the device rendering it.
pub type SharedSource = Arc<Mutex<Box<dyn PcmSource>>>;

/// Resolves a URI into a decoded PCM source.
pub trait SourceOpener: Send {
    fn open(&self, uri: &str) -> Result<Box<dyn PcmSource>>;
}

/// PCM held entirely in memory.
#[derive(Debug, Clone)]
pub struct MemorySource {
    format: PcmFormat,
    data: Arc<[u8]>,
    position: u64,
}

impl MemorySource {
    pub fn new(format: PcmFormat, data: Vec<u8>) -> Self {
        Self {
            format,
            data: data.into(),
            position: 0,
        }
    }

    /// Build a source from normalized interleaved samples, encoded in `format`.
    pub fn from_samples(format: PcmFormat, samples: &[f32]) -> Self {
        Self::new(format, format.encode_samples(samples))
    }
}

impl PcmSource for MemorySource {
    fn format(&self) -> PcmFormat {
        self.format
    }

    fn length(&self) -> u64 {
        self.data.len() as u64
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn set_position(&mut self, position: u64) -> Result<()> {
        let align = self.format.block_align().max(1) as u64;
        let clamped = position.min(self.length());
        self.position = clamped - clamped % align;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let start = self.position as usize;
        let remaining = self.data.len().saturating_sub(start);
        let n = remaining.min(buf.len());
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        self.position += n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::types::SampleFormat;

    fn mono_f32(frames: usize) -> MemorySource {
        let fmt = PcmFormat::new(4, 1, SampleFormat::F32);
        MemorySource::from_samples(fmt, &vec![0.5; frames])
    }

    #[test]
    fn reads_until_exhausted() {
        let mut src = mono_f32(3);
        let mut buf = [0u8; 8];
        assert_eq!(src.read(&mut buf).unwrap(), 8);
        assert_eq!(src.read(&mut buf).unwrap(), 4);
        assert_eq!(src.read(&mut buf).unwrap(), 0);
        assert_eq!(src.position(), src.length());
    }

    #[test]
    fn seek_is_clamped_and_frame_aligned() {
        let mut src = mono_f32(8);
        src.set_position(7).unwrap();
        assert_eq!(src.position(), 4);
        src.set_position(1_000).unwrap();
        assert_eq!(src.position(), 32);
    }

    #[test]
    fn times_derive_from_format() {
        let mut src = mono_f32(8);
        assert_eq!(src.total_time(), Duration::from_secs(2));
        src.set_position(16).unwrap();
        assert_eq!(src.current_time(), Duration::from_secs(1));
    }
}
