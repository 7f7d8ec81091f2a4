use std::time::Duration;

use crate::texture::TextureParams;

/// Where the decode step of a presentation cycle runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodeMode {
    /// Decode on a worker thread when more than two textures are configured.
    ///
    /// Two textures, the minimum, keep decoding on the render thread, the same
    /// threshold the validated texture count jumps at (`n > 2` becomes at least 4).
    #[default]
    Auto,
    /// Decode inside `get_next_frame` on the calling (render) thread.
    OnThread,
    /// Decode ahead on a dedicated worker thread. Needs at least two textures.
    OffThread,
}

/// Player tuning parameters.
#[derive(Clone, Debug)]
pub struct PlayerConfig {
    /// Decode attempts per presentation cycle before the previous frame is reused.
    pub retry_budget: u32,
    /// Smallest texture ring the player allocates.
    pub min_texture_count: usize,
    /// Texture count used once more than `min_texture_count` textures are requested.
    pub multi_texture_min: usize,
    /// Audio pool entries reserved per texture.
    pub audio_frames_per_video_frame: usize,
    pub decode_mode: DecodeMode,
    pub texture: TextureParams,
    /// Upper bound of frames the sync policy may discard in one cycle.
    pub max_consecutive_drops: u32,
    /// How long a blocking `get_next_frame` waits for the decode worker.
    pub frame_wait: Duration,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            retry_budget: 10,
            min_texture_count: 2,
            multi_texture_min: 4,
            audio_frames_per_video_frame: 8,
            decode_mode: DecodeMode::Auto,
            texture: TextureParams::default(),
            max_consecutive_drops: 2,
            frame_wait: Duration::from_millis(50),
        }
    }
}

impl PlayerConfig {
    pub fn with_retry_budget(mut self, retry_budget: u32) -> Self {
        self.retry_budget = retry_budget.max(1);
        self
    }

    pub fn with_decode_mode(mut self, decode_mode: DecodeMode) -> Self {
        self.decode_mode = decode_mode;
        self
    }

    pub fn with_texture_params(mut self, texture: TextureParams) -> Self {
        self.texture = texture;
        self
    }

    pub fn with_max_consecutive_drops(mut self, drops: u32) -> Self {
        self.max_consecutive_drops = drops;
        self
    }

    pub fn with_frame_wait(mut self, frame_wait: Duration) -> Self {
        self.frame_wait = frame_wait;
        self
    }

    /// Clamps a requested texture count: anything above the minimum is raised to
    /// `multi_texture_min`, everything else becomes `min_texture_count`.
    pub fn texture_count(&self, requested: usize) -> usize {
        if requested > self.min_texture_count {
            requested.max(self.multi_texture_min)
        } else {
            self.min_texture_count
        }
    }

    /// Audio pool size for a given texture count.
    pub fn audio_frame_count(&self, texture_count: usize) -> usize {
        let per_frame = self.audio_frames_per_video_frame;
        (per_frame * texture_count + per_frame / 2).max(2)
    }

    /// Whether decoding runs on a worker thread for `texture_count` textures.
    pub fn decodes_off_thread(&self, texture_count: usize) -> bool {
        match self.decode_mode {
            DecodeMode::OnThread => false,
            DecodeMode::OffThread => texture_count > 1,
            DecodeMode::Auto => texture_count > self.min_texture_count,
        }
    }
}

/// Audio device tuning parameters.
#[derive(Clone, Debug)]
pub struct AudioDeviceConfig {
    /// Shortest sleep while waiting for the device to finish a buffer.
    pub wait_min: Duration,
    /// Longest sleep while waiting for the device to finish a buffer.
    pub wait_max: Duration,
    /// Total time one enqueue may spend waiting before it gives up.
    pub max_reclaim_wait: Duration,
    /// Accepted play speed range, inclusive.
    pub speed_range: (f32, f32),
    /// Rates this close to 1.0 are treated as exactly 1.0.
    pub speed_snap: f32,
}

impl Default for AudioDeviceConfig {
    fn default() -> Self {
        Self {
            wait_min: Duration::from_millis(1),
            wait_max: Duration::from_millis(15),
            max_reclaim_wait: Duration::from_secs(2),
            speed_range: (0.5, 2.0),
            speed_snap: 0.01,
        }
    }
}

impl AudioDeviceConfig {
    /// Snaps `rate` to 1.0 when close enough, then checks it against the accepted range.
    pub fn normalize_speed(&self, rate: f32) -> Option<f32> {
        let rate = if (1.0 - rate).abs() < self.speed_snap {
            1.0
        } else {
            rate
        };
        let (min, max) = self.speed_range;
        (min..=max).contains(&rate).then_some(rate)
    }

    /// Sleep interval for one wait round, derived from the playback time of one buffer.
    pub fn wait_interval(&self, buffer_ms: u32) -> Duration {
        Duration::from_millis(u64::from(buffer_ms)).clamp(self.wait_min, self.wait_max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn texture_count_is_clamped() {
        let config = PlayerConfig::default();
        assert_eq!(config.texture_count(0), 2);
        assert_eq!(config.texture_count(1), 2);
        assert_eq!(config.texture_count(2), 2);
        assert_eq!(config.texture_count(3), 4);
        assert_eq!(config.texture_count(6), 6);
    }

    #[test]
    fn audio_pool_follows_texture_count() {
        let config = PlayerConfig::default();
        assert_eq!(config.audio_frame_count(2), 20);
        assert_eq!(config.audio_frame_count(4), 36);
    }

    #[test]
    fn decode_mode_selection() {
        let auto = PlayerConfig::default();
        assert!(!auto.decodes_off_thread(2));
        assert!(auto.decodes_off_thread(4));

        let forced = PlayerConfig::default().with_decode_mode(DecodeMode::OffThread);
        assert!(forced.decodes_off_thread(2));
        assert!(!forced.decodes_off_thread(1));

        let on = PlayerConfig::default().with_decode_mode(DecodeMode::OnThread);
        assert!(!on.decodes_off_thread(8));
    }

    #[test]
    fn speed_snaps_to_normal() {
        let config = AudioDeviceConfig::default();
        assert_eq!(config.normalize_speed(1.0049), Some(1.0));
        assert_eq!(config.normalize_speed(0.995), Some(1.0));
        assert_eq!(config.normalize_speed(1.5), Some(1.5));
        assert_eq!(config.normalize_speed(3.0), None);
        assert_eq!(config.normalize_speed(0.25), None);
    }

    #[test]
    fn wait_interval_is_bounded() {
        let config = AudioDeviceConfig::default();
        assert_eq!(config.wait_interval(0), Duration::from_millis(1));
        assert_eq!(config.wait_interval(7), Duration::from_millis(7));
        assert_eq!(config.wait_interval(90), Duration::from_millis(15));
    }
}
