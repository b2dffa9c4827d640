use std::{path::PathBuf, sync::Arc, thread};

use super::FfmpegBackend;
use crate::{
    config::SessionConfig,
    format::{PixelFormat, Rational, SampleFormat, rescale},
    session::EncodingSession,
};

fn output_path(name: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("capture-session-{}-{}", std::process::id(), name));
    let _ = std::fs::remove_file(&path);
    path
}

struct Probe {
    streams: usize,
    video: usize,
    audio: usize,
    audio_bytes: usize,
    /// End of the last audio packet in seconds.
    audio_end: f64,
}

/// Reopens `path` and walks its packets. Audio packet ends are computed from
/// the muxed pts and the samples the packet carries, `group` bytes each.
fn probe_file(path: &PathBuf, sample_rate: u32, group: usize) -> Probe {
    let mut input = ffmpeg_next::format::input(path).unwrap();
    let mut probe = Probe {
        streams: input.streams().count(),
        video: 0,
        audio: 0,
        audio_bytes: 0,
        audio_end: 0.0,
    };
    for (stream, packet) in input.packets() {
        match stream.index() {
            0 => probe.video += 1,
            1 => {
                probe.audio += 1;
                probe.audio_bytes += packet.size();
                let tb = stream.time_base();
                let start = packet.pts().unwrap() as f64 * f64::from(tb);
                let samples = (packet.size() / group) as f64;
                probe.audio_end = probe.audio_end.max(start + samples / sample_rate as f64);
            }
            _ => {}
        }
    }
    probe
}

#[test]
fn writes_playable_matroska() {
    let path = output_path("out.mkv");
    let session = Arc::new(EncodingSession::new(
        "ffmpeg",
        FfmpegBackend::new().unwrap(),
        SessionConfig {
            poll_interval_ms: 5,
            ..Default::default()
        },
    ));

    let container = {
        let session = session.clone();
        let path = path.clone();
        thread::spawn(move || session.setup_container(&path))
    };
    session
        .setup_audio(2, 48000, 16, SampleFormat::S16, 4)
        .unwrap();
    session
        .setup_video(320, 240, PixelFormat::Nv12, 30000, 1001, PixelFormat::Yuv420p)
        .unwrap();
    container.join().unwrap().unwrap();

    let frame_tb = Rational::new(1001, 30000);
    let capture_tb = Rational::new(1, 10_000_000);
    let mut frame = vec![0u8; PixelFormat::Nv12.buffer_size(320, 240)];
    let mut sent = 0i64;
    for i in 0..90i64 {
        frame.fill((i % 255) as u8);
        session
            .submit_video_frame(&frame, rescale(i, frame_tb, capture_tb))
            .unwrap();
        let target = (i + 1) * 48000 * 1001 / 30000;
        let chunk = vec![0u8; (target - sent) as usize * 4];
        session.submit_audio_frame(&chunk, 0).unwrap();
        sent = target;
    }
    session.mark_video_done().unwrap();
    session.mark_audio_done().unwrap();
    assert!(session.is_finished());
    assert_eq!(sent, 144144);

    let probe = probe_file(&path, 48000, 4);
    assert_eq!(probe.streams, 2);
    assert_eq!(probe.video, 90);
    assert!(probe.audio > 0);
    assert_eq!(probe.audio_bytes, 144144 * 4);
    let expected = 90.0 * 1001.0 / 30000.0;
    let frame = 1001.0 / 30000.0;
    assert!(
        (probe.audio_end - expected).abs() < frame,
        "audio ends at {}s, expected {}s",
        probe.audio_end,
        expected
    );
    let _ = std::fs::remove_file(&path);
}

#[test]
fn missing_directory_fails_container_setup() {
    let session = EncodingSession::new(
        "ffmpeg-missing",
        FfmpegBackend::new().unwrap(),
        SessionConfig::default(),
    );
    session
        .setup_video(64, 48, PixelFormat::Yuv420p, 30, 1, PixelFormat::Yuv420p)
        .unwrap();
    session
        .setup_audio(1, 44100, 16, SampleFormat::S16, 2)
        .unwrap();
    let err = session
        .setup_container("/nonexistent-dir/capture/out.mkv")
        .unwrap_err();
    assert!(err.is_fatal());
}
