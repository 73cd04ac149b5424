//! Fake collaborators for player tests.

use std::sync::{Arc, Mutex};

use crossbeam_channel::Sender;

use crate::audio::engine::OutputDevice;
use crate::audio::source::{MemorySource, PcmSource, SharedSource, SourceOpener};
use crate::audio::types::{DeviceEvent, PcmFormat, SampleFormat};
use crate::error::{Error, Result};

/// 100 Hz mono f32: 400 bytes per second.
pub(crate) const TEST_FORMAT: PcmFormat = PcmFormat {
    sample_rate: 100,
    channels: 1,
    sample_format: SampleFormat::F32,
};

#[derive(Default)]
pub(crate) struct FakeDeviceState {
    pub calls: Vec<&'static str>,
    pub events: Option<Sender<DeviceEvent>>,
    pub session: u64,
    pub source: Option<SharedSource>,
    pub volume: f32,
    pub pan: f32,
    pub balance: bool,
    pub fail_init: bool,
    pub fail_play: bool,
}

/// An output device that records calls and lets tests drive playback by hand.
#[derive(Clone)]
pub(crate) struct FakeDevice {
    pub state: Arc<Mutex<FakeDeviceState>>,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeDeviceState {
                volume: 1.0,
                balance: true,
                ..Default::default()
            })),
        }
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| **c == call).count()
    }

    /// Consume `seconds` of the bound source, as rendering would.
    pub fn advance(&self, seconds: f64) {
        let state = self.state.lock().unwrap();
        let source = state.source.as_ref().expect("no source bound");
        let mut src = source.lock().unwrap();
        let mut buf = vec![0u8; src.format().seconds_to_bytes(seconds) as usize];
        src.read(&mut buf).unwrap();
    }

    /// A stop notification for the current session, to deliver later with [`Self::send`].
    pub fn stop_event(&self, failure: Option<Error>) -> DeviceEvent {
        DeviceEvent::Stopped {
            session: self.state.lock().unwrap().session,
            failure,
        }
    }

    pub fn send(&self, event: DeviceEvent) {
        let state = self.state.lock().unwrap();
        let events = state.events.as_ref().expect("device not initialized");
        events.send(event).unwrap();
    }

    /// Emit a stop notification for the current session.
    pub fn finish(&self, failure: Option<Error>) {
        let event = self.stop_event(failure);
        self.send(event);
    }
}

impl OutputDevice for FakeDevice {
    fn init(
        &mut self,
        source: SharedSource,
        session: u64,
        events: Sender<DeviceEvent>,
    ) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        st.calls.push("init");
        if st.fail_init {
            return Err(Error::Device("init refused".into()));
        }
        st.source = Some(source);
        st.session = session;
        st.events = Some(events);
        Ok(())
    }

    fn play(&mut self, session: u64) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        st.calls.push("play");
        if st.fail_play {
            return Err(Error::Device("play refused".into()));
        }
        st.session = session;
        Ok(())
    }

    fn pause(&mut self) {
        self.state.lock().unwrap().calls.push("pause");
    }

    fn stop(&mut self) {
        self.state.lock().unwrap().calls.push("stop");
    }

    fn volume(&self) -> f32 {
        self.state.lock().unwrap().volume
    }

    fn set_volume(&mut self, volume: f32) {
        self.state.lock().unwrap().volume = volume.clamp(0.0, 1.0);
    }

    fn supports_balance(&self) -> bool {
        self.state.lock().unwrap().balance
    }

    fn pan(&self) -> f32 {
        self.state.lock().unwrap().pan
    }

    fn set_pan(&mut self, pan: f32) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        if !st.balance {
            return Err(Error::BalanceUnsupported);
        }
        st.pan = pan.clamp(-1.0, 1.0);
        Ok(())
    }

    fn release(&mut self) {
        let mut st = self.state.lock().unwrap();
        st.calls.push("release");
        st.source = None;
    }
}

/// Wraps a [`MemorySource`] and records every seek.
pub(crate) struct RecordingSource {
    inner: MemorySource,
    seeks: Arc<Mutex<Vec<u64>>>,
}

impl PcmSource for RecordingSource {
    fn format(&self) -> PcmFormat {
        self.inner.format()
    }

    fn length(&self) -> u64 {
        self.inner.length()
    }

    fn position(&self) -> u64 {
        self.inner.position()
    }

    fn set_position(&mut self, position: u64) -> Result<()> {
        self.seeks.lock().unwrap().push(position);
        self.inner.set_position(position)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.inner.read(buf)
    }
}

/// Opens any URI as a silent clip of `seconds`, except URIs starting with `missing`.
#[derive(Clone)]
pub(crate) struct FakeOpener {
    pub seconds: f64,
    pub seeks: Arc<Mutex<Vec<u64>>>,
}

impl FakeOpener {
    pub fn new(seconds: f64) -> Self {
        Self {
            seconds,
            seeks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn seeks(&self) -> Vec<u64> {
        self.seeks.lock().unwrap().clone()
    }
}

impl SourceOpener for FakeOpener {
    fn open(&self, uri: &str) -> Result<Box<dyn PcmSource>> {
        if uri.starts_with("missing") {
            return Err(Error::SourceOpen {
                uri: uri.to_string(),
                reason: "not found".into(),
            });
        }
        let frames = (self.seconds * TEST_FORMAT.sample_rate as f64) as usize;
        Ok(Box::new(RecordingSource {
            inner: MemorySource::from_samples(TEST_FORMAT, &vec![0.0; frames]),
            seeks: self.seeks.clone(),
        }))
    }
}
