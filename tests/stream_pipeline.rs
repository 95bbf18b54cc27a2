use std::time::{Duration, Instant};

use platestream::{
    registry, PlateCandidate, StreamConfig, StreamError, StubRecognizer,
};

const BASE_MS: i64 = 1_500_294_710_000;

fn bgr(width: u32, height: u32, value: u8) -> Vec<u8> {
    vec![value; (width * height * 3) as usize]
}

#[test]
fn push_batch_group_round_trip() {
    let mut cfg = StreamConfig::default();
    cfg.frame_queue_size = 64;
    cfg.batch_size = 10;
    cfg.use_motion_detection = false;

    let id = registry::initialize_with(cfg).expect("initialize");
    let stream = registry::get(id).expect("resolve handle");

    // Vehicle one on frames 0..12, dead air, vehicle two well past the
    // group idle timeout.
    let mut recognizer = StubRecognizer::new();
    for n in 0..12u64 {
        recognizer = recognizer.respond(n, vec![PlateCandidate::new("ABC123", 0.9)]);
    }
    for n in 15..20u64 {
        recognizer = recognizer.respond(n, vec![PlateCandidate::new("XYZ789", 0.8)]);
    }

    for i in 0..15u64 {
        stream
            .push_frame(&bgr(32, 32, i as u8), 3, 32, 32, BASE_MS + i as i64 * 100)
            .expect("push");
    }
    // 4900 ms of silence, longer than the 2500 ms idle timeout.
    for i in 15..20u64 {
        stream
            .push_frame(
                &bgr(32, 32, i as u8),
                3,
                32,
                32,
                BASE_MS + 6_000 + (i as i64 - 15) * 100,
            )
            .expect("push");
    }

    let mut frames_seen = 0usize;
    loop {
        let results = stream.process_batch(&mut recognizer).expect("batch");
        if results.is_empty() {
            break;
        }
        frames_seen += results.len();
    }
    assert_eq!(frames_seen, 20);

    // The first vehicle closed when the post-gap frames arrived.
    let completed = stream.pop_completed_groups();
    assert_eq!(completed.len(), 1);
    let first = &completed[0];
    assert_eq!(first.best_plate, "ABC123");
    assert_eq!(first.epoch_start_ms, BASE_MS);
    assert_eq!(first.epoch_end_ms, BASE_MS + 1_100);
    assert_eq!(first.frame_numbers.len(), 12);

    // Popping again yields nothing.
    assert!(stream.pop_completed_groups().is_empty());

    // The second vehicle is still open; peeking does not consume it.
    let active = stream.peek_active_groups();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].best_plate, "XYZ789");
    assert_eq!(stream.peek_active_groups().len(), 1);

    let flushed = stream.flush_groups();
    assert_eq!(flushed.len(), 1);
    assert_eq!(flushed[0].best_plate, "XYZ789");
    assert!(stream.peek_active_groups().is_empty());

    registry::dispose(id);
    assert!(!registry::is_loaded(id));
}

#[test]
fn near_miss_readings_join_one_group() {
    let mut cfg = StreamConfig::default();
    cfg.frame_queue_size = 16;
    cfg.batch_size = 10;
    cfg.use_motion_detection = false;

    let id = registry::initialize_with(cfg).expect("initialize");
    let stream = registry::get(id).expect("resolve handle");

    // One character off, within the default edit distance of 1.
    let mut recognizer = StubRecognizer::new()
        .respond(0, vec![PlateCandidate::new("ABC123", 0.9)])
        .respond(1, vec![PlateCandidate::new("A8C123", 0.4)])
        .respond(2, vec![PlateCandidate::new("ABC123", 0.9)]);

    for i in 0..3u64 {
        stream
            .push_frame(&bgr(32, 32, i as u8), 3, 32, 32, BASE_MS + i as i64 * 100)
            .expect("push");
    }
    stream.process_batch(&mut recognizer).expect("batch");

    let groups = stream.flush_groups();
    assert_eq!(groups.len(), 1);
    // Cumulative confidence elects the repeated reading.
    assert_eq!(groups[0].best_plate, "ABC123");
    assert_eq!(groups[0].frame_numbers, vec![0, 1, 2]);

    registry::dispose(id);
}

#[test]
fn stub_file_replay_runs_to_completion() {
    let id = registry::initialize(64, false).expect("initialize");
    let stream = registry::get(id).expect("resolve handle");

    stream
        .connect_video_file("stub://clip", BASE_MS)
        .expect("connect file");
    assert!((stream.get_video_file_fps().expect("fps") - 100.0).abs() < f64::EPSILON);

    // 30 frames at 100 fps finish in well under a second.
    let deadline = Instant::now() + Duration::from_secs(5);
    while stream.video_file_active() {
        assert!(Instant::now() < deadline, "file replay did not finish");
        std::thread::sleep(Duration::from_millis(10));
    }

    let mut recognizer = StubRecognizer::always("DEMO42", 0.87);
    let mut frames_seen = 0usize;
    let mut first_ts = None;
    loop {
        let results = stream.process_batch(&mut recognizer).expect("batch");
        if results.is_empty() {
            break;
        }
        if first_ts.is_none() {
            first_ts = results.first().map(|r| r.epoch_ms);
        }
        frames_seen += results.len();
    }
    assert_eq!(frames_seen, 30);
    // Replay timestamps are anchored at the requested start epoch.
    assert_eq!(first_ts, Some(BASE_MS));

    stream.disconnect_video_file();
    assert!(!stream.video_file_active());
    registry::dispose(id);
}

#[test]
fn second_attachment_is_rejected_while_connected() {
    let id = registry::initialize(64, false).expect("initialize");
    let stream = registry::get(id).expect("resolve handle");

    stream
        .connect_video_stream_url("stub://camera", "")
        .expect("connect stream");
    assert_eq!(stream.get_stream_url().expect("url"), "stub://camera");

    let err = stream.connect_video_file("stub://clip", 0).unwrap_err();
    assert!(matches!(err, StreamError::AlreadyConnected(_)));

    // Dispose while the decode thread is live; must join cleanly.
    registry::dispose(id);
    assert!(matches!(
        registry::get(id).unwrap_err(),
        StreamError::InvalidState(_)
    ));
}

#[test]
fn buffer_overflow_keeps_the_newest_frames() {
    let mut cfg = StreamConfig::default();
    cfg.frame_queue_size = 5;
    cfg.batch_size = 5;
    cfg.use_motion_detection = false;

    let id = registry::initialize_with(cfg).expect("initialize");
    let stream = registry::get(id).expect("resolve handle");

    for i in 0..8u64 {
        stream
            .push_frame(&bgr(32, 32, i as u8), 3, 32, 32, BASE_MS + i as i64 * 100)
            .expect("push");
    }
    assert_eq!(stream.get_queue_size(), 5);

    let results = stream
        .process_batch(&mut StubRecognizer::always("ABC123", 0.9))
        .expect("batch");
    let numbers: Vec<u64> = results.iter().map(|r| r.frame_number).collect();
    // The three oldest frames were evicted.
    assert_eq!(numbers, vec![3, 4, 5, 6, 7]);

    registry::dispose(id);
}
