use crate::audio::types::{Peak, PcmFormat, PeakInfo};

/// Reduces raw PCM buffers to peak summaries.
///
/// Implementations may carry partial slices between calls, but peaks must come out in
/// chronological order across successive calls.
pub trait PeakSampler: Send {
    /// Forget any partially accumulated slice. Called before each extraction.
    fn reset(&mut self);

    fn sample(&mut self, format: &PcmFormat, buffer: &[u8]) -> Vec<PeakInfo>;
}

/// Emits a fixed number of per-channel min/max peaks per second of audio,
/// regardless of how the input is chunked.
///
/// A trailing slice that never fills up is not emitted. Rates above the sample rate
/// are capped at one peak per frame.
pub struct MinMaxSampler {
    peaks_per_second: u32,
    format: Option<PcmFormat>,
    /// Bytes of an incomplete frame left over from the previous call.
    pending: Vec<u8>,
    current: Vec<Peak>,
    frames_seen: u64,
    slices_emitted: u64,
}

pub const DEFAULT_PEAKS_PER_SECOND: u32 = 10;

impl MinMaxSampler {
    pub fn new(peaks_per_second: u32) -> Self {
        Self {
            peaks_per_second: peaks_per_second.max(1),
            format: None,
            pending: Vec::new(),
            current: Vec::new(),
            frames_seen: 0,
            slices_emitted: 0,
        }
    }

    fn start_slice(&mut self, channels: usize) {
        self.current.clear();
        self.current.resize(
            channels,
            Peak {
                min: f32::MAX,
                max: f32::MIN,
            },
        );
    }

    /// Frame index (exclusive) at which the current slice ends.
    fn slice_end(&self, sample_rate: u32) -> u64 {
        let per_second = self.peaks_per_second.min(sample_rate) as u64;
        (self.slices_emitted + 1) * sample_rate as u64 / per_second
    }

    fn push_frame(&mut self, format: &PcmFormat, frame: &[u8], out: &mut Vec<PeakInfo>) {
        let bps = format.bytes_per_sample();
        for (peak, bytes) in self.current.iter_mut().zip(frame.chunks_exact(bps)) {
            let s = format.decode_sample(bytes);
            if s < peak.min {
                peak.min = s;
            }
            if s > peak.max {
                peak.max = s;
            }
        }
        self.frames_seen += 1;

        if self.frames_seen >= self.slice_end(format.sample_rate) {
            out.push(PeakInfo::new(self.current.clone()));
            self.slices_emitted += 1;
            self.start_slice(format.channels as usize);
        }
    }
}

impl Default for MinMaxSampler {
    fn default() -> Self {
        Self::new(DEFAULT_PEAKS_PER_SECOND)
    }
}

impl PeakSampler for MinMaxSampler {
    fn reset(&mut self) {
        self.format = None;
        self.pending.clear();
        self.current.clear();
        self.frames_seen = 0;
        self.slices_emitted = 0;
    }

    fn sample(&mut self, format: &PcmFormat, buffer: &[u8]) -> Vec<PeakInfo> {
        let align = format.block_align();
        if align == 0 || format.sample_rate == 0 {
            return Vec::new();
        }
        if self.format.as_ref() != Some(format) {
            self.reset();
            self.format = Some(*format);
            self.start_slice(format.channels as usize);
        }

        let mut out = Vec::new();
        let mut input = buffer;

        if !self.pending.is_empty() {
            let need = align - self.pending.len();
            if input.len() < need {
                self.pending.extend_from_slice(input);
                return out;
            }
            let mut frame = std::mem::take(&mut self.pending);
            frame.extend_from_slice(&input[..need]);
            self.push_frame(format, &frame, &mut out);
            input = &input[need..];
        }

        let mut frames = input.chunks_exact(align);
        for frame in frames.by_ref() {
            self.push_frame(format, frame, &mut out);
        }
        self.pending.extend_from_slice(frames.remainder());

        out
    }
}
