//! Integration tests: producer and consumer talking over real TCP
//! connections on localhost.

use std::sync::Arc;
use std::time::{Duration, Instant};

use camlink_core::capture::read_sequence_stamp;
use camlink_core::protocol::PackageHandler;
use camlink_core::session::CONFIGURED;
use camlink_core::{
    CaptureDevice, DeviceFactory, FrameSource, LinkError, Package, PackageStream, PackageType,
    PixelFormat, ReadMode, Renderer, SessionSettings, StreamConfig, StreamServer,
    SyntheticDevice, connect, present_frames,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

// ── Helpers ──────────────────────────────────────────────────────

const TIMEOUT: Duration = Duration::from_secs(10);

fn synthetic() -> DeviceFactory {
    Arc::new(|| Ok(Box::new(SyntheticDevice::new()) as Box<dyn CaptureDevice>))
}

async fn server(frames: Option<u64>, sessions: u64) -> StreamServer {
    let settings = SessionSettings {
        frame_limit: frames,
        ..SessionSettings::default()
    };
    StreamServer::bind("127.0.0.1:0", synthetic(), settings)
        .await
        .unwrap()
        .with_session_limit(sessions)
}

#[derive(Default)]
struct Collect {
    lengths: Vec<usize>,
    sequences: Vec<u64>,
}

impl Renderer for Collect {
    fn present(&mut self, frame: &[u8], _: &StreamConfig) -> Result<(), LinkError> {
        self.lengths.push(frame.len());
        self.sequences.extend(read_sequence_stamp(frame));
        Ok(())
    }
}

// ── Producer + consumer ──────────────────────────────────────────

#[tokio::test]
async fn default_config_streams_five_frames_in_order() {
    let server = server(Some(5), 1).await;
    let addr = server.local_addr().unwrap();
    let server_task = tokio::spawn(async move { server.run().await });

    let mut source = connect(addr, StreamConfig::default()).await.unwrap();
    let mut frames = Vec::new();
    for _ in 0..5 {
        let len = tokio::time::timeout(TIMEOUT, source.next_frame())
            .await
            .expect("timeout")
            .unwrap();
        assert_eq!(len, 320 * 180 * 2);
        assert_eq!(len, 115_200);
        frames.push(read_sequence_stamp(source.current_frame()).unwrap());
    }
    assert_eq!(frames, vec![0, 1, 2, 3, 4]);

    // The producer hit its frame limit and hung up.
    let err = source.next_frame().await.unwrap_err();
    assert!(err.is_peer_closed());

    let served = tokio::time::timeout(TIMEOUT, server_task)
        .await
        .expect("timeout")
        .unwrap()
        .unwrap();
    assert_eq!(served, 1);
}

#[tokio::test]
async fn remote_playback_presents_every_frame() {
    let server = server(Some(8), 1).await;
    let addr = server.local_addr().unwrap();
    let server_task = tokio::spawn(async move { server.run().await });

    let cfg = StreamConfig::new(64, 48, PixelFormat::Rgb24);
    let mut source = connect(addr, cfg).await.unwrap();
    let mut renderer = Collect::default();
    let stats = tokio::time::timeout(
        TIMEOUT,
        present_frames(&mut source, &mut renderer, None, &CancellationToken::new()),
    )
    .await
    .expect("timeout")
    .unwrap();

    assert_eq!(stats.frames, 8);
    assert_eq!(stats.bytes, 8 * cfg.frame_len() as u64);
    assert!(renderer.lengths.iter().all(|&l| l == cfg.frame_len()));
    assert_eq!(renderer.sequences, (0..8u64).collect::<Vec<_>>());

    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn server_keeps_accepting_after_failed_session() {
    let server = server(Some(2), 2).await;
    let addr = server.local_addr().unwrap();
    let server_task = tokio::spawn(async move { server.run().await });

    // A peer that sends a truncated configuration is dropped.
    {
        let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let mut bad = PackageStream::new(stream);
        bad.write_package(&Package::new(PackageType::StreamConfig, vec![0u8; 4]))
            .await
            .unwrap();
        loop {
            let pkg = tokio::time::timeout(TIMEOUT, bad.read_package(ReadMode::Blocking))
                .await
                .expect("timeout")
                .unwrap()
                .unwrap();
            if pkg.kind == PackageType::Closed {
                break;
            }
        }
    }

    // The next consumer is served normally.
    let mut source = connect(addr, StreamConfig::new(32, 8, PixelFormat::Grey))
        .await
        .unwrap();
    for _ in 0..2 {
        let len = tokio::time::timeout(TIMEOUT, source.next_frame())
            .await
            .expect("timeout")
            .unwrap();
        assert_eq!(len, 32 * 8);
    }

    let served = tokio::time::timeout(TIMEOUT, server_task)
        .await
        .expect("timeout")
        .unwrap()
        .unwrap();
    assert_eq!(served, 2);
}

#[tokio::test]
async fn consumer_farewell_ends_session_cleanly() {
    let server = server(None, 1).await;
    let addr = server.local_addr().unwrap();
    let server_task = tokio::spawn(async move { server.run().await });

    let mut source = connect(addr, StreamConfig::new(16, 4, PixelFormat::Yuyv))
        .await
        .unwrap();
    tokio::time::timeout(TIMEOUT, source.next_frame())
        .await
        .expect("timeout")
        .unwrap();
    source.close().await.unwrap();
    drop(source);

    let served = tokio::time::timeout(TIMEOUT, server_task)
        .await
        .expect("timeout")
        .unwrap()
        .unwrap();
    assert_eq!(served, 1);
}

#[tokio::test]
async fn slow_consumer_over_tcp_sees_recent_frames() {
    const INTERVAL: Duration = Duration::from_millis(5);
    let paced: DeviceFactory = Arc::new(|| {
        let device = SyntheticDevice::new().with_frame_interval(INTERVAL);
        Ok(Box::new(device) as Box<dyn CaptureDevice>)
    });
    let server = StreamServer::bind("127.0.0.1:0", paced, SessionSettings::default())
        .await
        .unwrap()
        .with_session_limit(1);
    let addr = server.local_addr().unwrap();
    let server_task = tokio::spawn(async move { server.run().await });

    let mut source = connect(addr, StreamConfig::default()).await.unwrap();
    tokio::time::timeout(TIMEOUT, source.next_frame())
        .await
        .expect("timeout")
        .unwrap();
    let first = read_sequence_stamp(source.current_frame()).unwrap();
    let started = Instant::now();

    // Read at half the capture rate for 1.5 s.
    let mut worst_lag = 0i64;
    for _ in 0..150 {
        tokio::time::sleep(2 * INTERVAL).await;
        tokio::time::timeout(TIMEOUT, source.next_frame())
            .await
            .expect("timeout")
            .unwrap();
        let seq = read_sequence_stamp(source.current_frame()).unwrap();
        let due = (started.elapsed().as_nanos() / INTERVAL.as_nanos()) as i64;
        worst_lag = worst_lag.max(due - (seq - first) as i64);
    }
    assert!(worst_lag <= 20, "consumer fell {worst_lag} frames behind the device");

    // Dropping the consumer breaks the producer's pending write.
    drop(source);
    let served = tokio::time::timeout(TIMEOUT, server_task)
        .await
        .expect("timeout")
        .unwrap()
        .unwrap();
    assert_eq!(served, 1);
}

#[tokio::test]
async fn cancelling_the_server_stops_accepting() {
    let server = StreamServer::bind("127.0.0.1:0", synthetic(), SessionSettings::default())
        .await
        .unwrap();
    let cancel = server.cancel_token();
    let server_task = tokio::spawn(async move { server.run().await });

    cancel.cancel();
    let served = tokio::time::timeout(TIMEOUT, server_task)
        .await
        .expect("timeout")
        .unwrap()
        .unwrap();
    assert_eq!(served, 0);
}

// ── Scripted producer ────────────────────────────────────────────

/// Counts the configuration requests a scripted producer receives.
#[derive(Default)]
struct ConfigProbe(Vec<StreamConfig>);

impl PackageHandler for ConfigProbe {
    fn on_config(&mut self, config: StreamConfig) -> Result<(), LinkError> {
        self.0.push(config);
        Ok(())
    }

    fn on_frame(&mut self, _: bytes::Bytes) -> Result<(), LinkError> {
        Ok(())
    }
}

#[tokio::test]
async fn consumer_tolerates_resize_and_noise_from_producer() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let producer = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut peer = PackageStream::new(stream);
        peer.send_text("Connection established").await.unwrap();

        let mut probe = ConfigProbe::default();
        let pkg = peer.read_package(ReadMode::Blocking).await.unwrap().unwrap();
        camlink_core::protocol::dispatch(&mut probe, pkg).unwrap();

        peer.send_text(CONFIGURED).await.unwrap();
        peer.send_frame(&[1u8; 115_200]).await.unwrap();
        peer.send_config(&StreamConfig::new(1, 1, PixelFormat::Grey)).await.unwrap();
        peer.send_frame(&[2u8; 76_800]).await.unwrap();
        peer.send_frame(&[3u8; 76_800]).await.unwrap();
        peer.shutdown().await.unwrap();

        // Wait for the consumer's farewell before dropping the socket.
        let farewell = peer.read_package(ReadMode::Blocking).await.unwrap().unwrap();
        (probe.0, farewell)
    });

    let mut source = connect(addr, StreamConfig::default()).await.unwrap();
    let mut renderer = Collect::default();
    let stats = tokio::time::timeout(
        TIMEOUT,
        present_frames(&mut source, &mut renderer, None, &CancellationToken::new()),
    )
    .await
    .expect("timeout")
    .unwrap();

    assert_eq!(stats.frames, 3);
    assert_eq!(renderer.lengths, vec![115_200, 76_800, 76_800]);
    assert_eq!(source.expected_frame_len(), 76_800);
    assert_eq!(source.config(), &StreamConfig::default());

    source.close().await.ok();
    let (configs, farewell) = tokio::time::timeout(TIMEOUT, producer)
        .await
        .expect("timeout")
        .unwrap();
    assert_eq!(configs, vec![StreamConfig::default()]);
    assert_eq!(farewell.kind, PackageType::Text);
}
