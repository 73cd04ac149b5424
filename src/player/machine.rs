use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam_channel::{Receiver, Sender};
use tokio::sync::watch;

use super::transport::{transition, Capabilities, PlaybackStatus, TransportCommand};
use crate::audio::engine::{OutputDevice, PAN_RANGE, VOLUME_RANGE};
use crate::audio::source::{PcmSource, SharedSource, SourceOpener};
use crate::audio::types::{AudioSelection, DeviceEvent};
use crate::config::PlayerConfig;
use crate::error::{Error, Result};

/// Everything an observer can see about the player after a change.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerSnapshot {
    pub status: PlaybackStatus,
    pub capabilities: Capabilities,
    pub uri: Option<String>,
    /// Seconds.
    pub position: f64,
    /// Seconds.
    pub duration: f64,
    pub volume: f32,
    pub pan: f32,
    pub supports_balance: bool,
    pub rate: f64,
    pub selection: Option<AudioSelection>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub type Observer = Box<dyn Fn(&PlayerSnapshot) + Send>;

fn lock_source(source: &SharedSource) -> MutexGuard<'_, Box<dyn PcmSource>> {
    source.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The playback state machine.
///
/// Owns the source handle and the output device exclusively. Every mutation goes
/// through `&mut self`, so transitions are totally ordered. Position polling is driven
/// from outside by calling [`PlayerCore::tick`] while [`PlayerCore::poll_schedule`]
/// reports `true`.
pub struct PlayerCore {
    config: PlayerConfig,
    opener: Box<dyn SourceOpener>,
    device: Box<dyn OutputDevice>,

    source: Option<SharedSource>,
    uri: Option<String>,
    status: PlaybackStatus,
    rate: f64,
    volume_before_mute: Option<f32>,
    selection: Option<AudioSelection>,
    last_error: Option<Error>,

    /// Incremented on every device init and every play. Notifications tagged with an
    /// older value belong to a finished run and are dropped.
    session: u64,
    events_tx: Sender<DeviceEvent>,
    events_rx: Receiver<DeviceEvent>,
    schedule: watch::Sender<bool>,

    observers: Vec<(SubscriptionId, Observer)>,
    next_subscription: u64,
    disposed: bool,
}

impl PlayerCore {
    pub fn new(
        opener: Box<dyn SourceOpener>,
        mut device: Box<dyn OutputDevice>,
        config: PlayerConfig,
    ) -> Self {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let (schedule, _) = watch::channel(false);
        device.set_volume(config.initial_volume.clamp(VOLUME_RANGE.0, VOLUME_RANGE.1));
        Self {
            config,
            opener,
            device,
            source: None,
            uri: None,
            status: PlaybackStatus::Stopped,
            rate: 1.0,
            volume_before_mute: None,
            selection: None,
            last_error: None,
            session: 0,
            events_tx,
            events_rx,
            schedule,
            observers: Vec::new(),
            next_subscription: 0,
            disposed: false,
        }
    }

    /// Replace the current source with `uri`.
    ///
    /// The previous source and device session are released first. On failure the
    /// error is recorded as the last error and the player is left stopped with no source.
    pub fn open(&mut self, uri: &str) -> Result<()> {
        self.release_source();
        self.last_error = None;
        self.selection = None;

        let result = self.open_inner(uri);
        if let Err(e) = &result {
            tracing::warn!(uri, "open failed: {e}");
            self.last_error = Some(e.clone());
        }
        self.notify();
        result
    }

    fn open_inner(&mut self, uri: &str) -> Result<()> {
        if self.disposed {
            return Err(Error::Device("player disposed".into()));
        }
        let source: SharedSource = Arc::new(Mutex::new(self.opener.open(uri)?));

        self.session += 1;
        if let Err(e) = self
            .device
            .init(source.clone(), self.session, self.events_tx.clone())
        {
            self.device.release();
            return Err(e);
        }

        self.source = Some(source);
        self.uri = Some(uri.to_string());
        Ok(())
    }

    /// Release the current source, if any.
    pub fn close(&mut self) {
        self.release_source();
        self.notify();
    }

    fn release_source(&mut self) {
        if self.status != PlaybackStatus::Stopped {
            self.device.stop();
            self.status = PlaybackStatus::Stopped;
            self.schedule.send_replace(false);
        }
        if self.source.take().is_some() {
            self.device.release();
        }
        self.uri = None;
    }

    pub fn play(&mut self) -> bool {
        let Some(next) = transition(self.status, TransportCommand::Play, self.source.is_some())
        else {
            tracing::debug!(status = ?self.status, "play ignored");
            return false;
        };
        self.session += 1;
        if let Err(e) = self.device.play(self.session) {
            tracing::warn!("device refused to play: {e}");
            self.last_error = Some(e);
            self.notify();
            return false;
        }
        self.set_status(next);
        true
    }

    pub fn pause(&mut self) -> bool {
        let Some(next) = transition(self.status, TransportCommand::Pause, self.source.is_some())
        else {
            return false;
        };
        self.device.pause();
        self.set_status(next);
        true
    }

    /// Stop and rewind. A no-op, leaving the last error untouched, when already stopped.
    pub fn stop(&mut self) -> bool {
        let Some(next) = transition(self.status, TransportCommand::Stop, self.source.is_some())
        else {
            return false;
        };
        self.device.stop();
        if let Some(source) = &self.source {
            if let Err(e) = lock_source(source).set_position(0) {
                self.last_error = Some(e);
            }
        }
        self.set_status(next);
        true
    }

    fn set_status(&mut self, next: PlaybackStatus) {
        tracing::debug!(from = ?self.status, to = ?next, "transport transition");
        self.status = next;
        self.schedule.send_replace(next == PlaybackStatus::Playing);
        self.notify();
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities::compute(self.status, self.source.is_some(), self.volume())
    }

    /// Receiver for the device's stop notifications, for pumping them from another thread.
    pub fn device_events(&self) -> Receiver<DeviceEvent> {
        self.events_rx.clone()
    }

    /// `true` while the position poll should be running.
    pub fn poll_schedule(&self) -> watch::Receiver<bool> {
        self.schedule.subscribe()
    }

    pub fn handle_device_event(&mut self, event: DeviceEvent) {
        match event {
            DeviceEvent::Stopped { session, failure } => {
                if session != self.session || self.source.is_none() {
                    tracing::debug!(session, current = self.session, "stale stop notification");
                    return;
                }
                if self.status == PlaybackStatus::Stopped && failure.is_none() {
                    return;
                }
                if let Some(e) = &failure {
                    tracing::warn!(session, "device stopped with failure: {e}");
                }
                self.last_error = failure;
                if !self.stop() {
                    self.notify();
                }
            }
        }
    }

    /// Handle every notification queued so far.
    pub fn pump_device_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_device_event(event);
        }
    }

    /// One poll step. Stops playback once the position is within epsilon of the end,
    /// without waiting for the device to report it. Returns `true` if it stopped.
    pub fn tick(&mut self) -> bool {
        self.pump_device_events();
        if self.status != PlaybackStatus::Playing {
            return false;
        }

        let remaining = self.duration() - self.position();
        if remaining <= self.epsilon() {
            tracing::debug!(remaining, "near end of stream, forcing stop");
            return self.stop();
        }
        false
    }

    fn epsilon(&self) -> f64 {
        self.config.position_epsilon * self.rate
    }

    /// Current playback position in seconds, or 0 without a source.
    pub fn position(&self) -> f64 {
        self.source
            .as_ref()
            .map(|s| lock_source(s).current_time().as_secs_f64())
            .unwrap_or(0.0)
    }

    /// Total length in seconds, or 0 without a source.
    pub fn duration(&self) -> f64 {
        self.source
            .as_ref()
            .map(|s| lock_source(s).total_time().as_secs_f64())
            .unwrap_or(0.0)
    }

    /// Seek to `seconds`, clamped to the source. Requests within epsilon of the current
    /// position are ignored. Returns `true` if a seek was issued.
    pub fn set_position(&mut self, seconds: f64) -> bool {
        let Some(source) = self.source.clone() else {
            return false;
        };
        let target = seconds.clamp(0.0, self.duration());
        if (target - self.position()).abs() <= self.epsilon() {
            return false;
        }

        let result = {
            let mut src = lock_source(&source);
            let bytes = src.format().seconds_to_bytes(target);
            src.set_position(bytes)
        };
        if let Err(e) = result {
            tracing::warn!(seconds = target, "seek failed: {e}");
            self.last_error = Some(e);
        }
        self.notify();
        true
    }

    pub fn volume(&self) -> f32 {
        self.device.volume()
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.device
            .set_volume(volume.clamp(VOLUME_RANGE.0, VOLUME_RANGE.1));
        self.notify();
    }

    /// Silence output, remembering the volume for [`PlayerCore::unmute`].
    pub fn mute(&mut self) -> bool {
        if !self.capabilities().can_mute {
            return false;
        }
        self.volume_before_mute = Some(self.volume());
        self.set_volume(0.0);
        true
    }

    /// Restore the volume from before [`PlayerCore::mute`], or full volume if unknown.
    pub fn unmute(&mut self) -> bool {
        if !self.capabilities().can_unmute {
            return false;
        }
        let restored = self
            .volume_before_mute
            .take()
            .filter(|v| *v > 0.0)
            .unwrap_or(VOLUME_RANGE.1);
        self.set_volume(restored);
        true
    }

    pub fn supports_balance(&self) -> bool {
        self.device.supports_balance()
    }

    pub fn pan(&self) -> f32 {
        self.device.pan()
    }

    pub fn set_pan(&mut self, pan: f32) -> Result<()> {
        if !self.device.supports_balance() {
            tracing::warn!("balance requested but not supported by the output");
            return Err(Error::BalanceUnsupported);
        }
        self.device.set_pan(pan.clamp(PAN_RANGE.0, PAN_RANGE.1))?;
        self.notify();
        Ok(())
    }

    /// Modeled playback rate. Not applied to the device; playback always runs at 1.0.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn faster(&mut self) -> f64 {
        self.set_rate(self.rate + self.config.rate_step)
    }

    pub fn slower(&mut self) -> f64 {
        self.set_rate(self.rate - self.config.rate_step)
    }

    fn set_rate(&mut self, rate: f64) -> f64 {
        self.rate = rate.clamp(self.config.min_rate, self.config.max_rate);
        self.notify();
        self.rate
    }

    pub fn selection(&self) -> Option<AudioSelection> {
        self.selection
    }

    pub fn set_selection(&mut self, selection: Option<AudioSelection>) {
        self.selection = selection;
        self.notify();
    }

    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    pub fn last_error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }

    pub fn subscribe(&mut self, observer: Observer) -> SubscriptionId {
        self.next_subscription += 1;
        let id = SubscriptionId(self.next_subscription);
        self.observers.push((id, observer));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(sid, _)| *sid != id);
        self.observers.len() != before
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            status: self.status,
            capabilities: self.capabilities(),
            uri: self.uri.clone(),
            position: self.position(),
            duration: self.duration(),
            volume: self.volume(),
            pan: self.pan(),
            supports_balance: self.supports_balance(),
            rate: self.rate,
            selection: self.selection,
            last_error: self.last_error.as_ref().map(ToString::to_string),
        }
    }

    fn notify(&self) {
        if self.observers.is_empty() {
            return;
        }
        let snapshot = self.snapshot();
        for (_, observer) in &self.observers {
            observer(&snapshot);
        }
    }

    /// Stop if needed, then release source and device. Safe to call more than once.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.stop();
        self.source = None;
        self.uri = None;
        self.device.release();
        self.schedule.send_replace(false);
        self.disposed = true;
    }
}

impl Drop for PlayerCore {
    fn drop(&mut self) {
        self.dispose();
    }
}
