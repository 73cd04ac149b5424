//! Transport state and the rules for moving between states.

/// Current playback status. Exactly one holds at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackStatus {
    #[default]
    Stopped,
    Playing,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportCommand {
    Play,
    Pause,
    Stop,
}

/// Volumes at or below this count as muted.
pub const SILENT_VOLUME: f32 = 1e-4;

/// Next status for `command`, or `None` when it is not valid from `status`.
pub fn transition(
    status: PlaybackStatus,
    command: TransportCommand,
    has_source: bool,
) -> Option<PlaybackStatus> {
    use PlaybackStatus::*;
    use TransportCommand::*;

    match (command, status) {
        (Play, Playing) => None,
        (Play, _) if has_source => Some(Playing),
        (Play, _) => None,
        (Pause, Playing) => Some(Paused),
        (Pause, _) => None,
        (Stop, Playing | Paused) => Some(Stopped),
        (Stop, Stopped) => None,
    }
}

/// Which transport controls are currently usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub can_play: bool,
    pub can_pause: bool,
    pub can_stop: bool,
    pub can_mute: bool,
    pub can_unmute: bool,
}

impl Capabilities {
    pub fn compute(status: PlaybackStatus, has_source: bool, volume: f32) -> Self {
        let muted = volume <= SILENT_VOLUME;
        Self {
            can_play: has_source && status != PlaybackStatus::Playing,
            can_pause: status == PlaybackStatus::Playing,
            can_stop: matches!(status, PlaybackStatus::Playing | PlaybackStatus::Paused),
            can_mute: !muted,
            can_unmute: muted,
        }
    }
}
