//! The three ways camlink runs.
//!
//! - **serve**: own the camera and stream it to whoever connects
//! - **connect**: ask a producer for a stream and render it
//! - **local**: capture and render in one process, no network

use std::sync::Arc;
use std::time::Duration;

use camlink_core::{
    CaptureDevice, CaptureError, DeviceFactory, DeviceSource, LinkError, PlaybackStats,
    StreamServer, SyntheticDevice, connect, open_v4l2, present_frames,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::CamlinkConfig;
use crate::display::build_renderer;

// ── Devices ──────────────────────────────────────────────────────

/// Open the capture device named in the configuration.
pub fn open_device(config: &CamlinkConfig) -> Result<Box<dyn CaptureDevice>, CaptureError> {
    if config.is_synthetic() {
        let mut device = SyntheticDevice::new();
        if config.capture.synthetic_fps > 0 {
            let interval = Duration::from_secs(1) / config.capture.synthetic_fps;
            device = device.with_frame_interval(interval);
        }
        Ok(Box::new(device))
    } else {
        open_v4l2(&config.capture.device)
    }
}

/// A factory that opens a fresh device for every session.
pub fn device_factory(config: &CamlinkConfig) -> DeviceFactory {
    let config = config.clone();
    Arc::new(move || open_device(&config))
}

// ── Roles ────────────────────────────────────────────────────────

/// Bind the producer's listener without serving yet.
pub async fn bind_server(
    config: &CamlinkConfig,
    cancel: CancellationToken,
) -> Result<StreamServer, LinkError> {
    let addr = (config.network.listen.as_str(), config.network.port);
    let server = StreamServer::bind(addr, device_factory(config), config.session_settings())
        .await?
        .with_cancel(cancel);
    Ok(server)
}

/// Serve consumers until `cancel` fires. Returns the sessions served.
pub async fn serve(config: &CamlinkConfig, cancel: CancellationToken) -> Result<u64, LinkError> {
    info!("capture device: {}", config.capture.device);
    bind_server(config, cancel).await?.run().await
}

/// Connect to the configured producer and render what it sends.
pub async fn watch(
    config: &CamlinkConfig,
    cancel: &CancellationToken,
) -> Result<PlaybackStats, LinkError> {
    let mut renderer = build_renderer(&config.output)?;
    let addr = (config.network.address.as_str(), config.network.port);
    let mut source = connect(addr, config.stream_config()).await?;
    info!("requested {}", config.stream_config());

    let outcome = present_frames(
        &mut source,
        renderer.as_mut(),
        config.frame_limit(),
        cancel,
    )
    .await;

    if let Err(e) = source.close().await {
        warn!("closing connection: {e}");
    }
    outcome
}

/// Capture from the configured device and render in-process.
pub async fn local(
    config: &CamlinkConfig,
    cancel: &CancellationToken,
) -> Result<PlaybackStats, LinkError> {
    let mut renderer = build_renderer(&config.output)?;
    let device = open_device(config)?;
    let mut source = DeviceSource::open(
        device,
        config.stream_config(),
        config.capture.slots,
        config.backoff(),
    )?;
    info!("capturing {} from {}", config.stream_config(), config.capture.device);

    let outcome = present_frames(
        &mut source,
        renderer.as_mut(),
        config.frame_limit(),
        cancel,
    )
    .await;

    if let Err(e) = source.close() {
        warn!("{e}");
    }
    outcome
}
