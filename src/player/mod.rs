//! Playback state machine and the runtime that drives it.
//!
//! [`PlayerCore`] holds all state and is fully synchronous. [`Player`] wraps it for use
//! inside a tokio runtime:
//! - a poll task ticks the core every `poll_interval` while it is playing
//! - a pump thread forwards device stop notifications as they arrive and runs observers
//!
//! Both take the same lock, so ticks, notifications and caller commands never interleave.
//! Observers run on the pump thread after the lock is released, so they may call back
//! into the [`Player`].

pub mod machine;
pub mod transport;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::JoinHandle as ThreadHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::audio::types::DeviceEvent;
use crate::error::Result;

pub use self::machine::{Observer, PlayerCore, PlayerSnapshot, SubscriptionId};
pub use self::transport::{Capabilities, PlaybackStatus};

type SharedCore = Arc<Mutex<PlayerCore>>;

/// An observer and the snapshot it should see, queued for the pump thread.
type Delivery = (Arc<Mutex<Observer>>, PlayerSnapshot);

fn lock(core: &Mutex<PlayerCore>) -> MutexGuard<'_, PlayerCore> {
    core.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Player {
    core: SharedCore,
    deliveries: Sender<Delivery>,
    poll_task: Option<JoinHandle<()>>,
    pump_shutdown: Option<Sender<()>>,
    pump_thread: Option<ThreadHandle<()>>,
}

impl Player {
    /// Start driving `core`. Must be called from within a tokio runtime.
    pub fn new(core: PlayerCore, poll_interval: Duration) -> Self {
        let schedule = core.poll_schedule();
        let events = core.device_events();
        let core = Arc::new(Mutex::new(core));

        let poll_task = tokio::spawn(poll_loop(
            Arc::downgrade(&core),
            schedule,
            poll_interval,
        ));

        let (deliveries, deliveries_rx) = crossbeam_channel::unbounded::<Delivery>();
        let (pump_shutdown, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
        let weak = Arc::downgrade(&core);
        let pump_thread = std::thread::Builder::new()
            .name("player-events".into())
            .spawn(move || pump_events(weak, events, deliveries_rx, shutdown_rx))
            .map_err(|e| tracing::warn!("failed to spawn event pump, relying on polling: {e}"))
            .ok();

        Self {
            core,
            deliveries,
            poll_task: Some(poll_task),
            pump_shutdown: Some(pump_shutdown),
            pump_thread,
        }
    }

    /// Run `f` with exclusive access to the state machine.
    pub fn with_core<R>(&self, f: impl FnOnce(&mut PlayerCore) -> R) -> R {
        f(&mut lock(&self.core))
    }

    pub fn open(&self, uri: &str) -> Result<()> {
        self.with_core(|c| c.open(uri))
    }

    pub fn play(&self) -> bool {
        self.with_core(PlayerCore::play)
    }

    pub fn pause(&self) -> bool {
        self.with_core(PlayerCore::pause)
    }

    pub fn stop(&self) -> bool {
        self.with_core(PlayerCore::stop)
    }

    pub fn status(&self) -> PlaybackStatus {
        self.with_core(|c| c.status())
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        self.with_core(|c| c.snapshot())
    }

    /// Register `observer` for every state change.
    ///
    /// Snapshots are delivered in order on the event pump thread, never while the
    /// player is locked.
    pub fn subscribe(&self, observer: Observer) -> SubscriptionId {
        let observer = Arc::new(Mutex::new(observer));
        let deliveries = self.deliveries.clone();
        self.with_core(|c| {
            c.subscribe(Box::new(move |snapshot: &PlayerSnapshot| {
                let _ = deliveries.send((observer.clone(), snapshot.clone()));
            }))
        })
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.with_core(|c| c.unsubscribe(id))
    }

    /// Stop background work, then dispose the core. Idempotent.
    pub fn dispose(&mut self) {
        if let Some(task) = self.poll_task.take() {
            task.abort();
        }
        self.pump_shutdown.take();
        if let Some(thread) = self.pump_thread.take() {
            let _ = thread.join();
        }
        lock(&self.core).dispose();
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Tick the core on a fixed schedule while its poll schedule is on.
///
/// Ticks run one at a time on this task; a tick that overruns its slot makes the
/// next one skip rather than burst.
async fn poll_loop(
    core: Weak<Mutex<PlayerCore>>,
    mut schedule: watch::Receiver<bool>,
    period: Duration,
) {
    loop {
        while !*schedule.borrow_and_update() {
            if schedule.changed().await.is_err() {
                return;
            }
        }

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let Some(shared) = core.upgrade() else {
                        return;
                    };
                    lock(&shared).tick();
                }
                changed = schedule.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    if !*schedule.borrow_and_update() {
                        break;
                    }
                }
            }
        }
    }
}

enum Pumped {
    Device(DeviceEvent),
    Deliver(Delivery),
}

fn pump_events(
    core: Weak<Mutex<PlayerCore>>,
    events: Receiver<DeviceEvent>,
    deliveries: Receiver<Delivery>,
    shutdown: Receiver<()>,
) {
    loop {
        let next = crossbeam_channel::select! {
            recv(events) -> event => event.ok().map(Pumped::Device),
            recv(deliveries) -> delivery => delivery.ok().map(Pumped::Deliver),
            recv(shutdown) -> _ => None,
        };
        match next {
            Some(Pumped::Device(event)) => {
                let Some(shared) = core.upgrade() else { break };
                lock(&shared).handle_device_event(event);
            }
            Some(Pumped::Deliver((observer, snapshot))) => {
                let observer = observer.lock().unwrap_or_else(PoisonError::into_inner);
                (*observer)(&snapshot);
            }
            None => break,
        }
    }
    tracing::debug!("device event pump exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlayerConfig;
    use crate::error::Error;
    use crate::testing::{FakeDevice, FakeOpener};

    fn player(seconds: f64) -> (Player, FakeDevice) {
        let device = FakeDevice::new();
        let config = PlayerConfig::default();
        let interval = config.poll_interval;
        let core = PlayerCore::new(
            Box::new(FakeOpener::new(seconds)),
            Box::new(device.clone()),
            config,
        );
        (Player::new(core, interval), device)
    }

    fn wait_for(player: &Player, status: PlaybackStatus) -> bool {
        for _ in 0..400 {
            if player.status() == status {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[tokio::test(start_paused = true)]
    async fn poll_task_stops_near_end() {
        let (player, device) = player(10.0);
        player.open("song.wav").unwrap();
        assert!(player.play());

        device.advance(9.9);
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(player.status(), PlaybackStatus::Stopped);
        assert_eq!(player.snapshot().position, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn paused_player_is_not_polled() {
        let (player, device) = player(10.0);
        player.open("song.wav").unwrap();
        player.play();
        player.pause();

        device.advance(10.0);
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(player.status(), PlaybackStatus::Paused);
    }

    #[tokio::test(start_paused = true)]
    async fn polling_resumes_after_pause() {
        let (player, device) = player(10.0);
        player.open("song.wav").unwrap();
        player.play();
        player.pause();
        device.advance(10.0);
        tokio::time::sleep(Duration::from_secs(1)).await;

        player.play();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(player.status(), PlaybackStatus::Stopped);
    }

    #[tokio::test]
    async fn device_notification_is_pumped() {
        let (player, device) = player(10.0);
        player.open("song.wav").unwrap();
        player.play();

        device.finish(Some(Error::Device("stream lost".into())));

        assert!(wait_for(&player, PlaybackStatus::Stopped));
        assert!(player.snapshot().last_error.is_some());
    }

    #[tokio::test]
    async fn observers_can_query_the_player() {
        let (player, _device) = player(10.0);
        let core = Arc::downgrade(&player.core);
        let (tx, rx) = crossbeam_channel::unbounded();
        player.subscribe(Box::new(move |snap: &PlayerSnapshot| {
            let live = core.upgrade().map(|c| lock(&c).status());
            let _ = tx.send((snap.status, live));
        }));

        player.open("song.wav").unwrap();
        assert!(player.play());

        let mut seen = Vec::new();
        while let Ok(entry) = rx.recv_timeout(Duration::from_secs(2)) {
            seen.push(entry);
            if entry.0 == PlaybackStatus::Playing {
                break;
            }
        }
        assert_eq!(seen.first().map(|e| e.0), Some(PlaybackStatus::Stopped));
        assert_eq!(
            seen.last(),
            Some(&(PlaybackStatus::Playing, Some(PlaybackStatus::Playing)))
        );
    }

    #[tokio::test]
    async fn unsubscribed_observer_is_not_called() {
        let (player, _device) = player(10.0);
        let (tx, rx) = crossbeam_channel::unbounded();
        let id = player.subscribe(Box::new(move |snap: &PlayerSnapshot| {
            let _ = tx.send(snap.status);
        }));
        player.open("song.wav").unwrap();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(2)),
            Ok(PlaybackStatus::Stopped)
        );

        assert!(player.unsubscribe(id));
        player.play();
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[tokio::test]
    async fn dispose_releases_device_once() {
        let (mut player, device) = player(10.0);
        player.open("song.wav").unwrap();
        player.play();

        player.dispose();
        player.dispose();
        drop(player);

        assert_eq!(device.count("release"), 1);
        assert_eq!(device.count("stop"), 1);
    }
}
