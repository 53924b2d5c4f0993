use std::thread;
use std::time::Duration;

use funnycam::capture::synthetic::read_stamp;
use funnycam::capture::{CameraSource, FramePoll, Pacing, PixelFormat, SyntheticCamera};
use funnycam::error::CaptureError;

mod common;

#[test]
fn stream_delivers_negotiated_rgba_frames() {
    let config = common::config(320, 240, 60).capture;
    let source = CameraSource::new(SyntheticCamera::new());
    let stream = source.open(&config).unwrap();

    let frame = stream.next_frame().unwrap().unwrap();
    assert_eq!((frame.width(), frame.height()), (320, 240));
    assert_eq!(frame.format(), PixelFormat::Rgba8);
    assert_eq!(frame.stride(), 320 * 4);
    assert_eq!(frame.data().len(), 320 * 240 * 4);
    assert_eq!(read_stamp(frame.data()), Some(frame.sequence()));

    let next = stream.next_frame().unwrap().unwrap();
    assert!(next.sequence() > frame.sequence());
    assert!(next.meta().timestamp >= frame.meta().timestamp);
}

#[test]
fn every_offered_mode_and_format_yields_matching_frames() {
    let modes = SyntheticCamera::new().modes().to_vec();
    assert!(!modes.is_empty());

    for (width, height) in modes {
        for format in [PixelFormat::Rgb24, PixelFormat::Yuyv4, PixelFormat::Rgba8] {
            let mut config = common::config(width, height, 30).capture;
            config.format = format;
            let source = CameraSource::new(
                SyntheticCamera::new().with_pacing(Pacing::Interval(Duration::from_millis(1))),
            );
            let stream = source.open(&config).unwrap();

            for _ in 0..3 {
                let frame = stream.next_frame().unwrap().unwrap();
                let label = format!("{width}x{height} from {format:?}");
                assert_eq!((frame.width(), frame.height()), (width, height), "{label}");
                assert_eq!(frame.format(), PixelFormat::Rgba8, "{label}");
                assert_eq!(frame.stride(), width * 4, "{label}");
                assert_eq!(frame.data().len(), (width * height * 4) as usize, "{label}");
                stream.release(frame).unwrap();
            }
            stream.close();
        }
    }
}

#[test]
fn yuyv_source_is_decoded() {
    let mut config = common::config(320, 240, 30).capture;
    config.format = PixelFormat::Yuyv4;
    let source = CameraSource::new(SyntheticCamera::new());
    let stream = source.open(&config).unwrap();

    let frame = stream.next_frame().unwrap().unwrap();
    assert_eq!(frame.format(), PixelFormat::Rgba8);
    assert_eq!((frame.width(), frame.height(), frame.stride()), (320, 240, 320 * 4));
    // First two pixels carry the sequence stamp
    assert!(frame.data()[8..].chunks_exact(4).all(|px| px[3] == 255));
}

#[test]
fn second_open_is_refused_until_close() {
    let config = common::config(320, 240, 30).capture;
    let source = CameraSource::new(SyntheticCamera::new());

    let stream = source.open(&config).unwrap();
    assert!(source.in_use());
    assert!(matches!(
        source.open(&config),
        Err(CaptureError::DeviceUnavailable(_))
    ));

    stream.close();
    assert!(!source.in_use());
    let reopened = source.open(&config).unwrap();
    assert!(reopened.next_frame().unwrap().is_some());
}

#[test]
fn dropping_the_stream_returns_the_device() {
    let config = common::config(320, 240, 30).capture;
    let source = CameraSource::new(SyntheticCamera::new());
    drop(source.open(&config).unwrap());
    assert!(source.open(&config).is_ok());
}

#[test]
fn unsupported_mode_is_rejected_without_holding_the_device() {
    let mut config = common::config(321, 240, 30).capture;
    let source = CameraSource::new(SyntheticCamera::new());
    assert!(matches!(
        source.open(&config),
        Err(CaptureError::ConfigUnsupported(_))
    ));

    config.width = 320;
    config.buffer_count = 1;
    assert!(matches!(
        source.open(&config),
        Err(CaptureError::ConfigUnsupported(_))
    ));
    assert!(!source.in_use());
}

#[test]
fn unavailable_device_is_reported() {
    let config = common::config(320, 240, 30).capture;
    let source = CameraSource::new(SyntheticCamera::new().unavailable("permission denied"));
    assert!(matches!(
        source.open(&config),
        Err(CaptureError::DeviceUnavailable(_))
    ));
}

#[test]
fn release_to_the_wrong_stream_is_buffer_misuse() {
    let config = common::config(320, 240, 30).capture;
    let a = CameraSource::new(SyntheticCamera::new());
    let b = CameraSource::new(SyntheticCamera::new());
    let stream_a = a.open(&config).unwrap();
    let stream_b = b.open(&config).unwrap();

    let frame = stream_a.next_frame().unwrap().unwrap();
    assert!(matches!(
        stream_b.release(frame),
        Err(CaptureError::BufferMisuse(_))
    ));

    let frame = stream_a.next_frame().unwrap().unwrap();
    assert!(stream_a.release(frame).is_ok());
}

#[test]
fn release_after_close_is_buffer_misuse() {
    let config = common::config(320, 240, 30).capture;
    let source = CameraSource::new(SyntheticCamera::new());
    let stream = source.open(&config).unwrap();

    let frame = stream.next_frame().unwrap().unwrap();
    stream.close();
    assert!(matches!(
        stream.release(frame),
        Err(CaptureError::BufferMisuse(_))
    ));
    assert!(stream.next_frame().unwrap().is_none());
}

#[test]
fn slow_consumer_sees_newest_frames_and_bounded_buffers() {
    let mut config = common::config(320, 240, 60).capture;
    config.buffer_count = 3;
    let source = CameraSource::new(SyntheticCamera::new().with_pacing(Pacing::Unpaced));
    let stream = source.open(&config).unwrap();

    thread::sleep(Duration::from_millis(100));
    let frame = stream.next_frame().unwrap().unwrap();
    let stats = stream.stats();

    assert!(frame.sequence() > 3, "oldest frames were not recycled");
    assert!(stats.dropped > 0);
    assert!(stats.pool.high_water <= 3);
    assert!(stats.pool.in_use <= 3);
}

#[test]
fn finite_stream_ends_after_queued_frames() {
    let config = common::config(320, 240, 60).capture;
    let source = CameraSource::new(
        SyntheticCamera::new()
            .with_pacing(Pacing::Interval(Duration::from_millis(1)))
            .with_frame_limit(3),
    );
    let stream = source.open(&config).unwrap();

    let mut sequences = Vec::new();
    while let Some(frame) = stream.next_frame().unwrap() {
        sequences.push(frame.sequence());
    }
    assert!(!sequences.is_empty());
    assert!(sequences.len() <= 3);
    assert!(sequences.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn device_fault_surfaces_as_device_lost() {
    let config = common::config(320, 240, 60).capture;
    let source = CameraSource::new(
        SyntheticCamera::new()
            .with_pacing(Pacing::Interval(Duration::from_millis(1)))
            .with_fault_after(2),
    );
    let stream = source.open(&config).unwrap();

    let outcome = loop {
        match stream.next_frame_timeout(Duration::from_secs(2)) {
            Ok(FramePoll::Frame(_)) => continue,
            other => break other,
        }
    };
    assert!(matches!(outcome, Err(CaptureError::DeviceLost(_))));
}
