use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;

use super::sampler::PeakSampler;
use crate::audio::source::PcmSource;
use crate::audio::types::{PcmFormat, WaveformData};
use crate::config::ExtractorConfig;
use crate::error::{Error, Result};

/// Cooperative cancellation checked between chunk reads.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Streams a PCM source through a [`PeakSampler`] in bounded chunks.
pub struct WaveformExtractor {
    sampler: Box<dyn PeakSampler>,
    config: ExtractorConfig,
}

impl WaveformExtractor {
    pub fn new(sampler: Box<dyn PeakSampler>, config: ExtractorConfig) -> Self {
        Self { sampler, config }
    }

    /// Bytes per read for `format`: whole frames, at least one.
    pub fn chunk_size(&self, format: &PcmFormat) -> usize {
        let align = format.block_align().max(1);
        let wanted = self
            .config
            .chunk_bytes
            .unwrap_or_else(|| format.average_bytes_per_second());
        (wanted / align).max(1) * align
    }

    pub fn extract(&mut self, source: &mut dyn PcmSource) -> Result<WaveformData> {
        self.extract_with_cancel(source, &CancelFlag::new())
    }

    /// Read `source` from the start and collect every peak the sampler emits.
    ///
    /// The read that reaches the end of the source is only sampled when
    /// `include_final_buffer` is set. Any source error or a cancellation aborts the
    /// whole call and discards the peaks gathered so far.
    pub fn extract_with_cancel(
        &mut self,
        source: &mut dyn PcmSource,
        cancel: &CancelFlag,
    ) -> Result<WaveformData> {
        let started = Instant::now();
        let format = source.format();
        let chunk = self.chunk_size(&format);

        self.sampler.reset();
        source.set_position(0)?;
        let length = source.length();

        let mut buffer = vec![0u8; chunk];
        let mut peaks = Vec::new();
        let mut reads = 0usize;

        loop {
            if cancel.is_cancelled() {
                tracing::debug!(reads, "extraction cancelled");
                return Err(Error::Cancelled);
            }

            let read = source.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            reads += 1;

            let at_end = source.position() >= length;
            if at_end && !self.config.include_final_buffer {
                break;
            }
            peaks.extend(self.sampler.sample(&format, &buffer[..read]));
            if at_end {
                break;
            }
        }

        let elapsed = started.elapsed();
        let secs = elapsed.as_secs_f64();
        let throughput = if secs > 0.0 {
            length as f64 / secs / 1024.0
        } else {
            f64::INFINITY
        };
        tracing::debug!(
            bytes = length,
            chunk,
            reads,
            peaks = peaks.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            throughput_kib_s = throughput,
            "waveform extracted"
        );

        Ok(WaveformData::new(source.total_time(), peaks))
    }
}

/// An extraction running on the blocking pool.
pub struct ExtractionTask {
    cancel: CancelFlag,
    handle: JoinHandle<Result<WaveformData>>,
}

impl ExtractionTask {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn join(self) -> Result<WaveformData> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(Error::Cancelled),
            Err(e) => std::panic::resume_unwind(e.into_panic()),
        }
    }
}

/// Run an extraction off the calling task so it cannot stall timers or event loops.
///
/// Must be called from within a tokio runtime.
pub fn spawn_extraction(
    mut extractor: WaveformExtractor,
    mut source: Box<dyn PcmSource>,
) -> ExtractionTask {
    let cancel = CancelFlag::new();
    let flag = cancel.clone();
    let handle = tokio::task::spawn_blocking(move || {
        extractor.extract_with_cancel(source.as_mut(), &flag)
    });
    ExtractionTask { cancel, handle }
}
