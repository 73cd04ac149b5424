use std::time::Duration;

/// Transport tuning for [`crate::player::PlayerCore`].
#[derive(Clone, Debug)]
pub struct PlayerConfig {
    /// How often the position poll runs while playing.
    pub poll_interval: Duration,
    /// Tolerance in seconds for seek debouncing and near-end detection. Scaled by rate.
    pub position_epsilon: f64,
    /// Increment used by `faster()` / `slower()`.
    pub rate_step: f64,
    pub min_rate: f64,
    pub max_rate: f64,
    /// Volume applied when a device is first initialized, in `[0.0, 1.0]`.
    pub initial_volume: f32,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            position_epsilon: 0.25,
            rate_step: 0.25,
            min_rate: 0.25,
            max_rate: 4.0,
            initial_volume: 1.0,
        }
    }
}

/// Chunking behavior for [`crate::waveform::WaveformExtractor`].
#[derive(Clone, Debug, Default)]
pub struct ExtractorConfig {
    /// Bytes per read. `None` reads one second of audio at a time.
    ///
    /// Rounded down to whole frames, never below one frame. Only the number of
    /// sampler calls depends on this, not the resulting peaks.
    pub chunk_bytes: Option<usize>,

    /// When `false` (the default) the read that reaches the end of the source is
    /// not sampled, matching the historical extraction loop. Set to `true` to
    /// sample every byte of the source.
    pub include_final_buffer: bool,
}
