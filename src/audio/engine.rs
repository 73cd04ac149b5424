//! Output device abstraction and the CPAL-backed default.
//!
//! The device renders a [`SharedSource`] and reports when playback stops on its own,
//! either because the source ran dry or because the stream faulted. Those reports
//! travel over a crossbeam channel tagged with the session id most recently handed to
//! `init` or `play`.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::Sender;

use super::source::SharedSource;
use super::types::{DeviceEvent, PcmFormat};
use crate::error::{Error, Result};

pub const VOLUME_RANGE: (f32, f32) = (0.0, 1.0);
pub const PAN_RANGE: (f32, f32) = (-1.0, 1.0);

/// Renders PCM to a physical (or fake) output.
pub trait OutputDevice: Send {
    /// Bind `source` for a new session. Stop notifications for it are sent on `events`.
    fn init(&mut self, source: SharedSource, session: u64, events: Sender<DeviceEvent>)
        -> Result<()>;
    /// Start or resume rendering. Later stop notifications carry `session`.
    fn play(&mut self, session: u64) -> Result<()>;
    fn pause(&mut self);
    fn stop(&mut self);
    fn volume(&self) -> f32;
    fn set_volume(&mut self, volume: f32);
    fn supports_balance(&self) -> bool;
    fn pan(&self) -> f32;
    fn set_pan(&mut self, pan: f32) -> Result<()>;
    /// Drop the bound source and any OS resources. Safe to call when nothing is bound.
    fn release(&mut self);
}

/// State shared between the device handle and the realtime callback.
struct StreamShared {
    playing: AtomicBool,
    session: AtomicU64,
    volume: AtomicU32,
    pan: AtomicU32,
}

impl StreamShared {
    fn new() -> Self {
        Self {
            playing: AtomicBool::new(false),
            session: AtomicU64::new(0),
            volume: AtomicU32::new(1.0f32.to_bits()),
            pan: AtomicU32::new(0.0f32.to_bits()),
        }
    }

    fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    fn pan(&self) -> f32 {
        f32::from_bits(self.pan.load(Ordering::Relaxed))
    }

    /// Stop rendering and tell the player, tagged with the current session.
    fn halt(&self, events: &Sender<DeviceEvent>, failure: Option<Error>) {
        self.playing.store(false, Ordering::Relaxed);
        let _ = events.try_send(DeviceEvent::Stopped {
            session: self.session.load(Ordering::Relaxed),
            failure,
        });
    }
}

/// Output through the host's default CPAL device.
///
/// The stream is built and kept alive on a dedicated thread, so this handle stays `Send`.
pub struct CpalDevice {
    shared: Arc<StreamShared>,
    shutdown_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
    output_channels: u16,
}

impl CpalDevice {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(StreamShared::new()),
            shutdown_tx: None,
            thread: None,
            output_channels: 0,
        }
    }
}

impl Default for CpalDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputDevice for CpalDevice {
    fn init(
        &mut self,
        source: SharedSource,
        session: u64,
        events: Sender<DeviceEvent>,
    ) -> Result<()> {
        self.release();

        let format = source
            .lock()
            .map_err(|_| Error::Device("source lock poisoned".into()))?
            .format();

        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<u16>>(1);
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
        self.shared.session.store(session, Ordering::Relaxed);
        let shared = self.shared.clone();

        let thread = std::thread::Builder::new()
            .name("audio-output".into())
            .spawn(move || {
                let (stream, channels) = match build_stream(source, format, shared, events) {
                    Ok(built) => built,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(Error::Device(format!("Failed to start stream: {e}"))));
                    return;
                }
                let _ = ready_tx.send(Ok(channels));
                // Returns on shutdown or when the handle is dropped.
                let _ = shutdown_rx.recv();
                drop(stream);
            })
            .map_err(|e| Error::Device(format!("Failed to spawn output thread: {e}")))?;

        let channels = ready_rx
            .recv()
            .map_err(|_| Error::Device("output thread exited during init".into()))??;

        tracing::info!(
            session,
            sample_rate = format.sample_rate,
            channels,
            "output device initialized"
        );

        self.output_channels = channels;
        self.shutdown_tx = Some(shutdown_tx);
        self.thread = Some(thread);
        Ok(())
    }

    fn play(&mut self, session: u64) -> Result<()> {
        if self.thread.is_none() {
            return Err(Error::Device("device not initialized".into()));
        }
        self.shared.session.store(session, Ordering::Relaxed);
        self.shared.playing.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn pause(&mut self) {
        self.shared.playing.store(false, Ordering::Relaxed);
    }

    fn stop(&mut self) {
        self.shared.playing.store(false, Ordering::Relaxed);
    }

    fn volume(&self) -> f32 {
        self.shared.volume()
    }

    fn set_volume(&mut self, volume: f32) {
        let v = volume.clamp(VOLUME_RANGE.0, VOLUME_RANGE.1);
        self.shared.volume.store(v.to_bits(), Ordering::Relaxed);
    }

    fn supports_balance(&self) -> bool {
        self.output_channels == 2
    }

    fn pan(&self) -> f32 {
        self.shared.pan()
    }

    fn set_pan(&mut self, pan: f32) -> Result<()> {
        if !self.supports_balance() {
            return Err(Error::BalanceUnsupported);
        }
        let p = pan.clamp(PAN_RANGE.0, PAN_RANGE.1);
        self.shared.pan.store(p.to_bits(), Ordering::Relaxed);
        Ok(())
    }

    fn release(&mut self) {
        self.shared.playing.store(false, Ordering::Relaxed);
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        self.output_channels = 0;
    }
}

impl Drop for CpalDevice {
    fn drop(&mut self) {
        self.release();
    }
}

/// Pick an `f32` output config, preferring one at the source's sample rate.
fn pick_output_config(
    device: &cpal::Device,
    sample_rate: u32,
) -> Result<cpal::SupportedStreamConfig> {
    if let Ok(ranges) = device.supported_output_configs() {
        for range in ranges {
            if range.sample_format() == cpal::SampleFormat::F32
                && range.min_sample_rate() <= sample_rate
                && sample_rate <= range.max_sample_rate()
            {
                return Ok(range.with_sample_rate(sample_rate));
            }
        }
    }

    let config = device
        .default_output_config()
        .map_err(|e| Error::Device(format!("Failed to get output config: {e}")))?;
    tracing::warn!(
        source_rate = sample_rate,
        device_rate = ?config.sample_rate(),
        "no output config at source rate, playback speed will differ"
    );
    Ok(config)
}

fn build_stream(
    source: SharedSource,
    format: PcmFormat,
    shared: Arc<StreamShared>,
    events: Sender<DeviceEvent>,
) -> Result<(cpal::Stream, u16)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Device("No audio output device found".into()))?;

    let config = pick_output_config(&device, format.sample_rate)?;
    let sample_format = config.sample_format();
    if sample_format != cpal::SampleFormat::F32 {
        return Err(Error::Device(format!(
            "Unsupported sample format: {sample_format:?}"
        )));
    }
    let channels = config.channels();

    let mut scratch: Vec<u8> = Vec::new();
    let cb_shared = shared.clone();
    let cb_events = events.clone();
    let err_shared = shared;
    let err_events = events;

    let stream = device
        .build_output_stream(
            &config.into(),
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                if !cb_shared.playing.load(Ordering::Relaxed) {
                    data.fill(0.0);
                    return;
                }
                // Never block the realtime thread on the player's lock.
                let Ok(mut src) = source.try_lock() else {
                    data.fill(0.0);
                    return;
                };

                let frames = data.len() / channels as usize;
                scratch.resize(frames * format.block_align(), 0);
                let read = match src.read(&mut scratch) {
                    Ok(n) => n,
                    Err(e) => {
                        data.fill(0.0);
                        cb_shared.halt(&cb_events, Some(e));
                        return;
                    }
                };

                render_block(
                    data,
                    channels,
                    &format,
                    &scratch[..read],
                    cb_shared.volume(),
                    cb_shared.pan(),
                );

                if read < scratch.len() {
                    cb_shared.halt(&cb_events, None);
                }
            },
            move |err| {
                let session = err_shared.session.load(Ordering::Relaxed);
                tracing::warn!(session, "stream error: {err}");
                err_shared.halt(&err_events, Some(Error::Device(err.to_string())));
            },
            None,
        )
        .map_err(|e| Error::Device(format!("Failed to build output stream: {e}")))?;

    Ok((stream, channels))
}

/// Convert source bytes into interleaved output frames.
///
/// Channels are mapped by wrapping (`out % src`), volume scales every sample and a
/// stereo output is balanced by attenuating the opposite side. Frames past the end of
/// `bytes` are silent.
fn render_block(
    out: &mut [f32],
    out_channels: u16,
    format: &PcmFormat,
    bytes: &[u8],
    volume: f32,
    pan: f32,
) {
    let out_ch = out_channels as usize;
    let src_ch = format.channels as usize;
    let bps = format.bytes_per_sample();
    let align = format.block_align();
    if out_ch == 0 || src_ch == 0 || align == 0 {
        out.fill(0.0);
        return;
    }

    let gains = if out_ch == 2 {
        [(1.0 - pan).min(1.0), (1.0 + pan).min(1.0)]
    } else {
        [1.0, 1.0]
    };

    let available = bytes.len() / align;
    for (f, frame) in out.chunks_mut(out_ch).enumerate() {
        if f >= available {
            frame.fill(0.0);
            continue;
        }
        let base = f * align;
        for (c, sample) in frame.iter_mut().enumerate() {
            let offset = base + (c % src_ch) * bps;
            let value = format.decode_sample(&bytes[offset..offset + bps]);
            let balance = if c < 2 { gains[c] } else { 1.0 };
            *sample = value * volume * balance;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::types::SampleFormat;

    #[test]
    fn mono_source_is_duplicated_to_stereo() {
        let fmt = PcmFormat::new(8, 1, SampleFormat::F32);
        let bytes = fmt.encode_samples(&[0.5, -0.25]);
        let mut out = [9.0f32; 4];
        render_block(&mut out, 2, &fmt, &bytes, 1.0, 0.0);
        assert_eq!(out, [0.5, 0.5, -0.25, -0.25]);
    }

    #[test]
    fn volume_and_pan_scale_output() {
        let fmt = PcmFormat::new(8, 2, SampleFormat::F32);
        let bytes = fmt.encode_samples(&[1.0, 1.0]);
        let mut out = [0.0f32; 2];
        render_block(&mut out, 2, &fmt, &bytes, 0.5, 0.5);
        // pan right: left attenuated by half, right untouched
        assert_eq!(out, [0.25, 0.5]);
    }

    #[test]
    fn short_reads_pad_with_silence() {
        let fmt = PcmFormat::new(8, 1, SampleFormat::F32);
        let bytes = fmt.encode_samples(&[0.75]);
        let mut out = [1.0f32; 3];
        render_block(&mut out, 1, &fmt, &bytes, 1.0, 0.0);
        assert_eq!(out, [0.75, 0.0, 0.0]);
    }

    #[test]
    fn uninitialized_device_rejects_play_and_balance() {
        let mut device = CpalDevice::new();
        assert!(matches!(device.play(1), Err(Error::Device(_))));
        assert!(!device.supports_balance());
        assert!(matches!(device.set_pan(0.3), Err(Error::BalanceUnsupported)));
        device.release();
        device.release();
    }

    #[test]
    fn halt_tags_the_latest_session() {
        let shared = StreamShared::new();
        let (tx, rx) = crossbeam_channel::unbounded();
        shared.playing.store(true, Ordering::Relaxed);
        shared.session.store(3, Ordering::Relaxed);
        shared.session.store(4, Ordering::Relaxed);

        shared.halt(&tx, None);
        assert!(!shared.playing.load(Ordering::Relaxed));
        match rx.try_recv().unwrap() {
            DeviceEvent::Stopped { session, failure } => {
                assert_eq!(session, 4);
                assert!(failure.is_none());
            }
        }
    }

    #[test]
    fn volume_is_clamped() {
        let mut device = CpalDevice::new();
        device.set_volume(3.0);
        assert_eq!(device.volume(), 1.0);
        device.set_volume(-1.0);
        assert_eq!(device.volume(), 0.0);
    }
}
