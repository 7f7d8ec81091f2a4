//! Buffer pool behaviour of `PooledAudioDevice` driven through a software voice.

mod common;

use std::time::Duration;

use media_texture_player::audio::{PooledAudioDevice, SoftwareBackend, SourceState};
use media_texture_player::{AudioDeviceConfig, AudioFormat, AudioFrame, AudioSink, Error};

fn no_wait() -> AudioDeviceConfig {
    AudioDeviceConfig {
        max_reclaim_wait: Duration::ZERO,
        ..AudioDeviceConfig::default()
    }
}

/// Minimal linear congruential generator so the walk is reproducible.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self, bound: u64) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (self.0 >> 33) % bound
    }
}

#[test]
fn random_walk_keeps_the_pool_partitioned() {
    common::init_logging();
    let (backend, voice) = SoftwareBackend::new("walk");
    let sink = PooledAudioDevice::with_config(backend, no_wait());
    sink.init_sink(&AudioFormat::DEFAULT, 6).unwrap();

    let mut rng = Lcg(7);
    let mut pts = 0;
    for step in 0..2_000 {
        match rng.next(7) {
            0 | 1 | 2 => {
                pts += 10;
                let size = 1 + rng.next(512) as usize;
                match sink.enqueue(AudioFrame::new(vec![0; size], pts)) {
                    Ok(()) => {}
                    Err(Error::Timeout(_)) | Err(Error::DeviceRuntime(_)) => {}
                    Err(err) => panic!("step {step}: unexpected {err}"),
                }
            }
            3 => {
                voice.consume_buffers(1 + rng.next(3) as usize);
            }
            4 => {
                sink.reclaim().unwrap();
            }
            5 => sink.play().unwrap(),
            _ => {
                if rng.next(4) == 0 {
                    sink.flush().unwrap();
                } else {
                    sink.pause().unwrap();
                }
            }
        }

        sink.check_invariants()
            .unwrap_or_else(|err| panic!("step {step}: {err}"));
        let playing = sink.playing_buffers();
        assert_eq!(sink.available_handles().len() + playing.len(), 6);
        assert_eq!(
            sink.queued_byte_count(),
            playing.iter().map(|b| b.size).sum::<usize>()
        );
        assert!(playing.windows(2).all(|w| w[0].pts <= w[1].pts));
    }
    sink.destroy();
    assert_eq!(voice.allocated_buffers(), 0);
}

#[test]
fn reclaim_on_enqueue_returns_played_buffers() {
    let (backend, voice) = SoftwareBackend::new("scenario");
    let sink = PooledAudioDevice::with_config(backend, no_wait());
    sink.init_sink(&AudioFormat::DEFAULT, 4).unwrap();

    for i in 0..4 {
        sink.enqueue(AudioFrame::new(vec![1; 100], (i + 1) * 10)).unwrap();
    }
    assert_eq!(sink.queued_byte_count(), 400);
    assert_eq!(sink.free_frame_count(), 0);

    let queued: Vec<_> = sink.playing_buffers().iter().map(|b| b.handle).collect();

    sink.play().unwrap();
    assert_eq!(voice.state(), SourceState::Playing);
    assert_eq!(voice.consume_buffers(2), 2);
    assert_eq!(sink.reclaim().unwrap(), 2);
    assert_eq!(sink.available_handles(), queued[..2].to_vec());
    assert_eq!(sink.queued_byte_count(), 200);
    assert_eq!(sink.pts(), 30);

    sink.enqueue(AudioFrame::new(vec![1; 100], 50)).unwrap();
    assert_eq!(sink.queued_frame_count(), 3);
    assert_eq!(sink.free_frame_count(), 1);
    assert_eq!(sink.queued_byte_count(), 300);
    assert_eq!(sink.available_handles(), vec![queued[1]]);
    sink.destroy();
}

#[test]
fn full_pool_without_playback_is_a_runtime_error() {
    let (backend, _voice) = SoftwareBackend::new("stalled");
    let sink = PooledAudioDevice::with_config(backend, no_wait());
    sink.init_sink(&AudioFormat::DEFAULT, 2).unwrap();
    sink.enqueue(AudioFrame::new(vec![0; 8], 1)).unwrap();
    sink.enqueue(AudioFrame::new(vec![0; 8], 2)).unwrap();

    let err = sink.enqueue(AudioFrame::new(vec![0; 8], 3)).unwrap_err();
    assert!(matches!(err, Error::DeviceRuntime(_)), "{err}");
    assert!(!err.is_fatal());
    sink.check_invariants().unwrap();
    sink.destroy();
}

#[test]
fn failing_queries_do_not_corrupt_the_pool() {
    let (backend, voice) = SoftwareBackend::new("flaky");
    let sink = PooledAudioDevice::with_config(backend, no_wait());
    sink.init_sink(&AudioFormat::DEFAULT, 3).unwrap();
    sink.enqueue(AudioFrame::new(vec![0; 16], 1)).unwrap();
    sink.play().unwrap();
    voice.consume_buffers(1);

    voice.set_fail_queries(true);
    let err = sink.enqueue(AudioFrame::new(vec![0; 16], 2)).unwrap_err();
    assert!(!err.is_fatal());
    sink.check_invariants().unwrap();

    voice.set_fail_queries(false);
    sink.enqueue(AudioFrame::new(vec![0; 16], 2)).unwrap();
    assert_eq!(sink.queued_frame_count(), 1);
    sink.check_invariants().unwrap();
    sink.destroy();
}

#[test]
fn unsupported_formats_are_refused() {
    let (backend, voice) = SoftwareBackend::new("picky");
    let sink = PooledAudioDevice::with_config(backend, no_wait());
    let float = AudioFormat {
        sample_size: 32,
        fixed_point: false,
        ..AudioFormat::DEFAULT
    };
    let err = sink.init_sink(&float, 8).unwrap_err();
    assert!(matches!(err, Error::FormatUnsupported(f) if f == float));
    assert!(!sink.is_initialized());
    assert_eq!(voice.allocated_buffers(), 0);
    sink.destroy();
}
