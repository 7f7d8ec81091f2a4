use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use media_texture_player::audio::{PooledAudioDevice, SoftwareBackend};
use media_texture_player::{
    AudioFormat, AudioSink, CpuTextureBackend, Decoder, MediaPlayer, PlayerConfig,
    StreamSelector, TestPatternDecoder,
};
use url::Url;

/// Plays a pattern (or, with the `gstreamer` feature, the URI given as the
/// first argument) for a few seconds without a window, logging the clocks.
fn main() {
    env_logger::init();

    let (decoder, uri): (Box<dyn Decoder>, Url) = match std::env::args().nth(1) {
        #[cfg(feature = "gstreamer")]
        Some(arg) => (
            Box::new(media_texture_player::GstDecoder::new()),
            Url::parse(&arg).expect("invalid uri"),
        ),
        #[cfg(not(feature = "gstreamer"))]
        Some(arg) => {
            log::warn!("built without gstreamer, ignoring {arg}");
            pattern()
        }
        None => pattern(),
    };

    let (backend, voice) = SoftwareBackend::new("software-out");
    let sink: Arc<dyn AudioSink> = Arc::new(PooledAudioDevice::new(backend));
    let sink_ref = Arc::clone(&sink);
    let player = MediaPlayer::new(
        decoder,
        Arc::new(move || Arc::clone(&sink_ref)),
        PlayerConfig::default(),
    );

    // stand-in for a sound card: consume in real time
    let running = Arc::new(AtomicBool::new(true));
    let running_ref = Arc::clone(&running);
    let output = thread::spawn(move || {
        let chunk_ms = 10;
        let mut chunk = vec![0u8; AudioFormat::DEFAULT.bytes_for_ms(chunk_ms)];
        while running_ref.load(Ordering::Acquire) {
            voice.drain_bytes(&mut chunk);
            thread::sleep(Duration::from_millis(u64::from(chunk_ms)));
        }
    });

    player
        .init_stream(
            Box::new(CpuTextureBackend::new()),
            4,
            &uri,
            StreamSelector::AUTO,
            StreamSelector::AUTO,
        )
        .expect("failed to open stream");
    log::info!("{player}");
    player.play().expect("failed to start playback");

    let frame_interval = Duration::from_secs_f32(1.0 / player.framerate().max(1.0));
    let started = Instant::now();
    let mut last_pts = -1;
    while started.elapsed() < Duration::from_secs(3) {
        if let Some(frame) = player.get_next_frame(false) {
            if frame.pts != last_pts {
                last_pts = frame.pts;
                log::info!(
                    "slot {} pts {} ms, audio {} ms, queued {} ms",
                    frame.slot,
                    frame.pts,
                    player.audio_pts(),
                    sink.queued_time_ms()
                );
            }
        }
        thread::sleep(frame_interval);
    }

    let position = player.seek(1_000).expect("seek failed");
    log::info!("seeked to {position} ms");
    log::info!("{}", player.perf_string());

    player.destroy();
    running.store(false, Ordering::Release);
    let _ = output.join();
}

fn pattern() -> (Box<dyn Decoder>, Url) {
    (
        Box::new(TestPatternDecoder::new(320, 180)),
        Url::parse("pattern://bars").expect("invalid uri"),
    )
}
