//! Audio/video clock tracking.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::format::AudioFormat;

/// Latest audio and video presentation timestamps, in milliseconds.
///
/// Both only move forward until [`Synchronizer::reset`], which is the one
/// sanctioned discontinuity (seek and flush).
#[derive(Debug, Default)]
pub struct Synchronizer {
    audio_pts: AtomicI64,
    video_pts: AtomicI64,
}

impl Synchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn audio_pts(&self) -> i64 {
        self.audio_pts.load(Ordering::Acquire)
    }

    pub fn video_pts(&self) -> i64 {
        self.video_pts.load(Ordering::Acquire)
    }

    /// Records an audio PTS; older values are ignored.
    pub fn update_audio(&self, pts: i64) {
        self.audio_pts.fetch_max(pts, Ordering::AcqRel);
    }

    /// Records a video PTS; older values are ignored.
    pub fn update_video(&self, pts: i64) {
        self.video_pts.fetch_max(pts, Ordering::AcqRel);
    }

    /// Sets both clocks to `position`.
    pub fn reset(&self, position: i64) {
        self.audio_pts.store(position, Ordering::Release);
        self.video_pts.store(position, Ordering::Release);
    }

    /// How far video runs ahead of audio. Negative when video lags.
    pub fn av_delta(&self) -> i64 {
        self.video_pts() - self.audio_pts()
    }

    /// Playback time of `queued_bytes` in `format`.
    pub fn queued_duration_ms(format: &AudioFormat, queued_bytes: usize) -> u32 {
        format.duration_ms(queued_bytes)
    }
}

/// What to do with a freshly decoded video frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDecision {
    Present,
    Drop,
}

/// Decides whether a decoded frame is shown or skipped to catch up with audio.
pub trait SyncPolicy: Send + Sync + fmt::Debug {
    fn decide(&self, video_pts: i64, audio_pts: i64) -> SyncDecision;
}

/// Shows every frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct PresentAll;

impl SyncPolicy for PresentAll {
    fn decide(&self, _video_pts: i64, _audio_pts: i64) -> SyncDecision {
        SyncDecision::Present
    }
}

/// Drops frames that trail the audio clock by more than `threshold_ms`.
///
/// Without an audio clock (PTS not yet positive) every frame is shown.
#[derive(Debug, Clone, Copy)]
pub struct DropLate {
    pub threshold_ms: i64,
}

impl SyncPolicy for DropLate {
    fn decide(&self, video_pts: i64, audio_pts: i64) -> SyncDecision {
        if audio_pts > 0 && audio_pts - video_pts > self.threshold_ms {
            SyncDecision::Drop
        } else {
            SyncDecision::Present
        }
    }
}
