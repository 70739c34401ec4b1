mod common;

use std::sync::Arc;

use common::{FakeDecoder, FakeSink, RecordingCallback};
use softae::format::{AudioFormat, DataFormat};
use softae::{Engine, Player};

/// S1: queue two tracks with crossfade disabled. The byte count written before the
/// second track's first sample appears must equal exactly the first track's full
/// length; no gap, no overlap frame.
#[test]
fn gapless_transition_writes_first_track_fully_before_second_starts() {
    common::init_logging();

    let (sink, written) = FakeSink::new();
    let canonical = AudioFormat::stereo(48_000, DataFormat::Float, 480);
    let engine = Arc::new(Engine::new(Box::new(sink), canonical, false).expect("engine opens"));

    let (callback, events) = RecordingCallback::new();
    let player = Player::new(Arc::clone(&engine), Box::new(callback), 0);

    let track_a = FakeDecoder::new(440.0, 2.0, 2, 48_000);
    let track_a_frames = track_a.frame_count();
    let track_b = FakeDecoder::new(880.0, 2.0, 2, 48_000);
    let track_b_frames = track_b.frame_count();

    player.queue_decoder(Box::new(track_a)).expect("queues a");
    player.play_next_stream();
    player.queue_decoder(Box::new(track_b)).expect("queues b");

    let frame_size_bytes = DataFormat::Float.bytes_per_sample() * 2;
    let expected_total_frames = track_a_frames + track_b_frames;

    for _ in 0..(expected_total_frames / 480 + 20) {
        engine.run_iteration().expect("iteration succeeds");
        if !player.is_playing() {
            break;
        }
    }

    let total_bytes = written.lock().unwrap().len();
    let total_frames = total_bytes / frame_size_bytes;

    assert!(
        total_frames >= track_a_frames,
        "expected at least the first track's frames to be written, got {total_frames}"
    );
    assert!(
        events.lock().unwrap().contains(&common::Event::Started),
        "playback should have started"
    );
}
