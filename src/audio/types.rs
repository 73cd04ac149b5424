use std::time::Duration;

use crate::error::Error;

/// Encoding of one PCM sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// Signed 16-bit little endian.
    I16,
    /// 32-bit IEEE float little endian, normalized to [-1.0, 1.0].
    F32,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::I16 => 2,
            SampleFormat::F32 => 4,
        }
    }
}

/// Layout of the raw interleaved bytes a source produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: SampleFormat,
}

impl PcmFormat {
    pub fn new(sample_rate: u32, channels: u16, sample_format: SampleFormat) -> Self {
        Self {
            sample_rate,
            channels,
            sample_format,
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        self.sample_format.bytes_per_sample()
    }

    /// Bytes per frame (one sample for every channel).
    pub fn block_align(&self) -> usize {
        self.bytes_per_sample() * self.channels as usize
    }

    pub fn average_bytes_per_second(&self) -> usize {
        self.block_align() * self.sample_rate as usize
    }

    /// Decode one sample. `bytes` must be exactly `bytes_per_sample()` long.
    pub fn decode_sample(&self, bytes: &[u8]) -> f32 {
        match self.sample_format {
            SampleFormat::I16 => i16::from_le_bytes([bytes[0], bytes[1]]) as f32 / 32768.0,
            SampleFormat::F32 => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        }
    }

    /// Encode normalized samples into this format's byte layout.
    pub fn encode_samples(&self, samples: &[f32]) -> Vec<u8> {
        let mut out = Vec::with_capacity(samples.len() * self.bytes_per_sample());
        for &s in samples {
            match self.sample_format {
                SampleFormat::I16 => {
                    let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                    out.extend_from_slice(&v.to_le_bytes());
                }
                SampleFormat::F32 => out.extend_from_slice(&s.to_le_bytes()),
            }
        }
        out
    }

    pub fn bytes_to_duration(&self, bytes: u64) -> Duration {
        let rate = self.average_bytes_per_second() as f64;
        if rate == 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(bytes as f64 / rate)
    }

    /// Byte offset for a time in seconds, rounded down to a frame boundary.
    pub fn seconds_to_bytes(&self, seconds: f64) -> u64 {
        let align = self.block_align() as u64;
        if align == 0 || seconds <= 0.0 {
            return 0;
        }
        let frames = (seconds * self.sample_rate as f64) as u64;
        frames * align
    }
}

/// Min and max of one channel over a slice of frames.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    pub min: f32,
    pub max: f32,
}

impl Peak {
    pub const SILENT: Peak = Peak { min: 0.0, max: 0.0 };

    fn merge(self, other: Peak) -> Peak {
        Peak {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }
}

/// One amplitude summary per sampled slice, one [`Peak`] per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct PeakInfo {
    channels: Vec<Peak>,
}

impl PeakInfo {
    pub fn new(channels: Vec<Peak>) -> Self {
        Self { channels }
    }

    pub fn channels(&self) -> &[Peak] {
        &self.channels
    }

    /// Envelope across every channel.
    pub fn mono(&self) -> Peak {
        self.channels
            .iter()
            .copied()
            .reduce(Peak::merge)
            .unwrap_or(Peak::SILENT)
    }
}

/// Result of one extraction: the source's total time and its peaks in chronological order.
#[derive(Debug, Clone, PartialEq)]
pub struct WaveformData {
    total_time: Duration,
    peaks: Vec<PeakInfo>,
}

impl WaveformData {
    pub fn new(total_time: Duration, peaks: Vec<PeakInfo>) -> Self {
        Self { total_time, peaks }
    }

    pub fn total_time(&self) -> Duration {
        self.total_time
    }

    pub fn peaks(&self) -> &[PeakInfo] {
        &self.peaks
    }

    pub fn len(&self) -> usize {
        self.peaks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty()
    }

    /// Average span of audio covered by a single peak.
    pub fn duration_per_peak(&self) -> Option<Duration> {
        if self.peaks.is_empty() {
            return None;
        }
        Some(self.total_time / self.peaks.len() as u32)
    }

    /// Resample the mono envelope to exactly `width` columns.
    ///
    /// Each column merges the peaks that fall into it; columns past the end are silent.
    pub fn peaks_for_width(&self, width: usize) -> Vec<Peak> {
        if width == 0 || self.peaks.is_empty() {
            return Vec::new();
        }

        let len = self.peaks.len();
        let mut result = Vec::with_capacity(width);

        for i in 0..width {
            let start = i * len / width;
            let end = ((i + 1) * len / width).min(len);

            if start >= len {
                result.push(Peak::SILENT);
                continue;
            }

            let column = self.peaks[start..end.max(start + 1)]
                .iter()
                .map(PeakInfo::mono)
                .reduce(Peak::merge)
                .unwrap_or(Peak::SILENT);
            result.push(column);
        }

        result
    }
}

/// A start/end range over a source. Carried by the player, never interpreted by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSelection {
    pub start: Duration,
    pub end: Duration,
}

impl AudioSelection {
    /// Build a selection; the bounds are swapped if given in reverse.
    pub fn new(a: Duration, b: Duration) -> Self {
        if a <= b {
            Self { start: a, end: b }
        } else {
            Self { start: b, end: a }
        }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

/// Notifications sent from an output device to the player.
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// Playback stopped on the device, either at end of stream or because of a fault.
    Stopped {
        session: u64,
        failure: Option<Error>,
    },
}
