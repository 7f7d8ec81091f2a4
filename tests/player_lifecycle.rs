//! End-to-end behaviour of `MediaPlayer` over the test pattern decoder.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use common::{Drain, LimitedTextures, RecordingListener, UnopenableDecoder};
use media_texture_player::audio::NullAudioDevice;
use media_texture_player::{
    AudioFormat, AudioSink, AudioSinkFactory, CpuTextureBackend, DecodeMode, Error, EventMask,
    MediaEventListener, MediaPlayer, PlaybackState, PlayerConfig, StreamSelector,
    TestPatternDecoder, VideoFrame,
};

fn null_factory() -> Arc<dyn AudioSinkFactory> {
    Arc::new(|| -> Arc<dyn AudioSink> { Arc::new(NullAudioDevice::new()) })
}

fn on_thread() -> PlayerConfig {
    PlayerConfig::default().with_decode_mode(DecodeMode::OnThread)
}

fn player_with(decoder: TestPatternDecoder, audio: Arc<dyn AudioSinkFactory>) -> MediaPlayer {
    MediaPlayer::new(Box::new(decoder), audio, on_thread())
}

fn init(player: &MediaPlayer) -> media_texture_player::Result<()> {
    init_with(player, StreamSelector::AUTO, StreamSelector::AUTO)
}

fn init_with(
    player: &MediaPlayer,
    vid: StreamSelector,
    aid: StreamSelector,
) -> media_texture_player::Result<()> {
    player.init_stream(
        Box::new(CpuTextureBackend::new()),
        2,
        &common::pattern_url(),
        vid,
        aid,
    )
}

/// A player decoding ahead on its worker thread (the default for four textures).
fn threaded_player(decoder: TestPatternDecoder) -> MediaPlayer {
    let player = MediaPlayer::new(Box::new(decoder), null_factory(), PlayerConfig::default());
    player
        .init_stream(
            Box::new(CpuTextureBackend::new()),
            4,
            &common::pattern_url(),
            StreamSelector::AUTO,
            StreamSelector::AUTO,
        )
        .unwrap();
    player
}

/// Polls until a frame newer than `after` is shown.
fn next_frame_after(player: &MediaPlayer, after: i64) -> VideoFrame {
    for _ in 0..200 {
        if let Some(frame) = player.get_next_frame(true) {
            if frame.pts != after {
                return frame;
            }
        }
    }
    panic!("no frame after {after} ms");
}

#[test]
fn lifecycle_follows_the_state_machine() {
    common::init_logging();
    let player = player_with(TestPatternDecoder::new(64, 36), null_factory());
    assert_eq!(player.state(), PlaybackState::Uninitialized);
    assert!(matches!(
        player.play(),
        Err(Error::InvalidState { operation: "play", .. })
    ));
    assert!(player.pause().is_err());
    assert_eq!(player.seek(1_000).unwrap(), 0);
    assert!(!player.set_play_speed(2.0));
    assert!(player.get_next_frame(false).is_none());

    init(&player).unwrap();
    assert_eq!(player.state(), PlaybackState::Paused);
    assert!(matches!(
        init(&player),
        Err(Error::InvalidState {
            operation: "init_stream",
            state: PlaybackState::Paused
        })
    ));

    assert_eq!(player.play().unwrap(), PlaybackState::Playing);
    assert_eq!(player.play().unwrap(), PlaybackState::Playing);
    assert_eq!(player.pause().unwrap(), PlaybackState::Paused);
    assert_eq!(player.pause().unwrap(), PlaybackState::Paused);

    assert_eq!(player.destroy(), PlaybackState::Uninitialized);
    assert_eq!(player.destroy(), PlaybackState::Uninitialized);
    assert!(player.play().is_err());
    assert_eq!(player.texture_count(), 0);

    // a destroyed player can open a stream again
    init(&player).unwrap();
    assert_eq!(player.state(), PlaybackState::Paused);
    player.destroy();
}

#[test]
fn stream_attributes_are_reported() {
    let player = player_with(TestPatternDecoder::new(64, 36), null_factory());
    init(&player).unwrap();
    assert_eq!((player.width(), player.height()), (64, 36));
    assert_eq!(player.framerate(), 25.0);
    assert_eq!(player.duration(), 10_000);
    assert_eq!(player.video_codec().as_deref(), Some("rawvideo"));
    assert_eq!(player.audio_codec().as_deref(), Some("pcm_s16le"));
    assert_eq!(player.vid(), StreamSelector::index(0));
    assert_eq!(player.aid(), StreamSelector::index(1));
    assert_eq!(player.texture_count(), 2);
    assert_eq!(player.audio_format(), Some(AudioFormat::DEFAULT));
    assert!(player.to_string().contains("Paused"));
    assert!(player.to_string().contains("64x36"));
    assert!(player.perf_string().contains("null"));
    player.destroy();
}

#[test]
fn paused_player_keeps_showing_the_last_frame() {
    let player = player_with(TestPatternDecoder::new(16, 16), null_factory());
    init(&player).unwrap();
    player.play().unwrap();

    let first = player.get_next_frame(true).unwrap();
    assert_eq!(first.pts, 40);
    assert_eq!(first.slot, 0);

    player.pause().unwrap();
    assert_eq!(player.get_next_frame(true), Some(first));
    assert_eq!(player.get_next_frame(false), Some(first));
    assert_eq!(player.presented_frame_count(), 1);

    player.play().unwrap();
    let second = player.get_next_frame(true).unwrap();
    assert_eq!(second.pts, 80);
    assert_eq!(second.slot, 1);
    assert_eq!(player.video_pts(), 80);
    player.destroy();
}

#[test]
fn seek_is_clamped_and_resets_both_clocks() {
    let player = player_with(
        TestPatternDecoder::new(16, 16).with_keyframe_interval(1_000),
        null_factory(),
    );
    init(&player).unwrap();
    player.play().unwrap();
    player.get_next_frame(true).unwrap();

    assert_eq!(player.seek(-500).unwrap(), 0);
    assert_eq!(player.video_pts(), 0);
    assert_eq!(player.audio_pts(), 0);

    assert_eq!(player.seek(60_000).unwrap(), 10_000);
    assert_eq!(player.video_pts(), player.audio_pts());

    assert_eq!(player.seek(2_500).unwrap(), 2_000);
    let frame = player.get_next_frame(true).unwrap();
    assert_eq!(frame.pts, 2_000);

    player.pause().unwrap();
    assert_eq!(player.seek(4_200).unwrap(), 4_000);
    player.destroy();
}

#[test]
fn rejected_speed_holds_back_audio_only() {
    let player = player_with(TestPatternDecoder::new(16, 16), null_factory());
    init(&player).unwrap();
    player.play().unwrap();

    assert!(!player.set_play_speed(0.0));
    assert!(!player.set_play_speed(-1.0));
    assert!(!player.set_play_speed(f32::NAN));

    // the null sink only follows rates between 0.5 and 2.0
    assert!(player.set_play_speed(3.0));
    assert_eq!(player.play_speed(), 3.0);
    assert_eq!(player.get_next_frame(true).unwrap().pts, 40);
    assert_eq!(player.audio_pts(), 0);

    assert!(player.set_play_speed(1.004));
    assert_eq!(player.play_speed(), 1.0);
    assert_eq!(player.get_next_frame(true).unwrap().pts, 80);
    assert_eq!(player.audio_pts(), 80);
    player.destroy();
}

#[test]
fn unsupported_audio_format_falls_back_to_null_sink() {
    let (sink, voice) = common::software_sink("speakers");
    let float = AudioFormat {
        sample_size: 32,
        fixed_point: false,
        ..AudioFormat::DEFAULT
    };
    let player = player_with(
        TestPatternDecoder::new(16, 16).with_audio(Some(float)),
        common::factory_of(sink.clone()),
    );
    init(&player).unwrap();

    assert!(player.audio_sink().unwrap().is_null());
    assert_eq!(sink.queued_byte_count(), 0);
    assert!(voice.is_closed());
    assert_eq!(voice.allocated_buffers(), 0);

    player.play().unwrap();
    let pts: Vec<i64> = (0..3)
        .map(|_| player.get_next_frame(true).unwrap().pts)
        .collect();
    assert_eq!(pts, vec![40, 80, 120]);
    player.destroy();
}

#[test]
fn audio_plays_through_a_pooled_device() {
    common::init_logging();
    let (sink, voice) = common::software_sink("speakers");
    let _drain = Drain::spawn(voice.clone());
    let player = player_with(
        TestPatternDecoder::new(16, 16),
        common::factory_of(sink.clone()),
    );
    init(&player).unwrap();
    assert_eq!(sink.frame_count(), PlayerConfig::default().audio_frame_count(2));

    player.play().unwrap();
    for expected in [40, 80, 120, 160, 200] {
        assert_eq!(player.get_next_frame(true).unwrap().pts, expected);
    }
    assert_eq!(sink.enqueued_frame_count(), 10);
    assert!(player.audio_pts() > 0);
    sink.check_invariants().unwrap();

    player.destroy();
    assert!(voice.is_closed());
    assert_eq!(voice.allocated_buffers(), 0);
}

#[test]
fn muted_stream_uses_a_null_sink() {
    let (sink, voice) = common::software_sink("speakers");
    let player = player_with(
        TestPatternDecoder::new(16, 16),
        common::factory_of(sink.clone()),
    );
    init_with(&player, StreamSelector::AUTO, StreamSelector::NONE).unwrap();
    assert!(player.audio_sink().unwrap().is_null());
    assert_eq!(player.aid(), StreamSelector::NONE);
    assert!(player.audio_format().is_none());
    assert!(!voice.is_closed());
    player.destroy();
}

#[test]
fn audio_only_stream_advances_the_audio_clock() {
    let player = player_with(TestPatternDecoder::new(16, 16), null_factory());
    init_with(&player, StreamSelector::NONE, StreamSelector::AUTO).unwrap();
    assert_eq!(player.width(), 0);
    player.play().unwrap();

    assert!(player.get_next_frame(false).is_none());
    // ten reads, one audio packet each
    assert_eq!(player.audio_pts(), 360);
    player.destroy();
}

#[test]
fn texture_failure_releases_partial_allocations() {
    let player = player_with(TestPatternDecoder::new(16, 16), null_factory());
    let textures = LimitedTextures::new(1);
    let live = Arc::clone(&textures.live);

    let err = player
        .init_stream(
            Box::new(textures),
            2,
            &common::pattern_url(),
            StreamSelector::AUTO,
            StreamSelector::AUTO,
        )
        .unwrap_err();
    assert!(matches!(err, Error::DeviceInit(_)), "{err}");
    assert_eq!(live.load(Ordering::SeqCst), 0);
    assert_eq!(player.state(), PlaybackState::Uninitialized);

    init(&player).unwrap();
    player.destroy();
}

#[test]
fn open_failure_is_reported_as_stream_open() {
    let decoder = UnopenableDecoder::default();
    let closed = Arc::clone(&decoder.closed);
    let player = MediaPlayer::new(Box::new(decoder), null_factory(), on_thread());

    let err = init(&player).unwrap_err();
    assert!(matches!(err, Error::StreamOpen(_)), "{err}");
    assert_eq!(player.state(), PlaybackState::Uninitialized);
    assert!(closed.load(Ordering::SeqCst) >= 1);
}

#[test]
fn listeners_receive_attribute_and_frame_events() {
    let player = player_with(
        TestPatternDecoder::new(16, 16).with_size_change(3, 32, 8),
        null_factory(),
    );
    let recorder = Arc::new(RecordingListener::default());
    let listener: Arc<dyn MediaEventListener> = recorder.clone();
    player.add_listener(Arc::clone(&listener));

    init(&player).unwrap();
    {
        let masks = recorder.masks.lock();
        assert_eq!(masks.len(), 1);
        assert!(masks[0].contains(EventMask::SIZE | EventMask::LENGTH | EventMask::CODEC));
    }

    player.play().unwrap();
    for _ in 0..3 {
        player.get_next_frame(true).unwrap();
    }
    assert_eq!(*recorder.frames.lock(), vec![40, 80, 120]);
    assert_eq!(recorder.masks.lock().last(), Some(&EventMask::SIZE));
    assert_eq!((player.width(), player.height()), (32, 8));

    assert!(player.remove_listener(&listener));
    assert!(!player.remove_listener(&listener));
    player.destroy();
}

#[test]
fn worker_thread_delivers_frames_in_order() {
    common::init_logging();
    let player = MediaPlayer::new(
        Box::new(TestPatternDecoder::new(16, 16).with_audio(None)),
        null_factory(),
        PlayerConfig::default().with_decode_mode(DecodeMode::OffThread),
    );
    player
        .init_stream(
            Box::new(CpuTextureBackend::new()),
            3,
            &common::pattern_url(),
            StreamSelector::AUTO,
            StreamSelector::AUTO,
        )
        .unwrap();
    assert_eq!(player.texture_count(), 4);
    player.play().unwrap();

    let mut seen = Vec::new();
    for _ in 0..500 {
        if seen.len() == 6 {
            break;
        }
        if let Some(frame) = player.get_next_frame(true) {
            if seen.last() != Some(&frame.pts) {
                seen.push(frame.pts);
            }
        }
    }
    assert_eq!(seen, vec![40, 80, 120, 160, 200, 240]);
    player.pause().unwrap();
    player.destroy();
}

#[test]
fn dropping_the_last_clone_releases_the_stream() {
    let (sink, voice) = common::software_sink("speakers");
    let player = player_with(
        TestPatternDecoder::new(16, 16),
        common::factory_of(sink.clone()),
    );
    init(&player).unwrap();

    let other = player.clone();
    drop(other);
    assert!(!voice.is_closed());
    assert_eq!(player.state(), PlaybackState::Paused);

    drop(player);
    assert!(voice.is_closed());
}

#[test]
fn worker_thread_reports_the_shown_frame_position() {
    let player = threaded_player(TestPatternDecoder::new(16, 16));
    player.play().unwrap();

    let first = next_frame_after(&player, -1);
    assert_eq!(first.pts, 40);
    // give the worker time to fill every free slot
    thread::sleep(Duration::from_millis(100));
    assert_eq!(player.video_pts(), 40);
    assert_eq!(player.last_frame(), Some(first));

    let second = next_frame_after(&player, first.pts);
    assert_eq!(second.pts, 80);
    assert_eq!(player.video_pts(), 80);
    player.destroy();
}

#[test]
fn worker_thread_seek_resets_both_clocks() {
    let player = threaded_player(TestPatternDecoder::new(16, 16).with_keyframe_interval(1_000));
    player.play().unwrap();
    let shown = next_frame_after(&player, -1);

    player.pause().unwrap();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(player.seek(2_500).unwrap(), 2_000);
    assert_eq!(player.video_pts(), 2_000);
    assert_eq!(player.audio_pts(), 2_000);

    player.play().unwrap();
    let frame = next_frame_after(&player, shown.pts);
    assert_eq!(frame.pts, 2_000);
    assert_eq!(player.video_pts(), 2_000);
    player.destroy();
}

#[test]
fn broken_audio_output_is_replaced_while_video_continues() {
    common::init_logging();
    let (sink, voice) = common::misreporting_sink("broken");
    let player = player_with(
        TestPatternDecoder::new(16, 16),
        common::factory_of(sink.clone()),
    );
    init(&player).unwrap();
    player.play().unwrap();

    let mut pts = vec![player.get_next_frame(true).unwrap().pts];
    assert_eq!(sink.enqueued_frame_count(), 2);
    assert!(!player.audio_fell_back());

    // the next reclaim gets handles the pool never handed out
    assert_eq!(voice.consume_buffers(2), 2);
    for _ in 0..4 {
        pts.push(player.get_next_frame(true).unwrap().pts);
    }
    assert_eq!(pts, vec![40, 80, 120, 160, 200]);
    assert!(player.audio_fell_back());
    assert!(player.audio_sink().unwrap().is_null());
    assert!(voice.is_closed());
    assert_eq!(sink.enqueued_frame_count(), 2);
    player.destroy();
}
