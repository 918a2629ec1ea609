//! Producer role: configure a capture device on request and stream its
//! frames to one consumer at a time.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::capture::{CaptureDevice, DEFAULT_BACKOFF, DEFAULT_SLOTS, StreamConfig};
use crate::error::{CaptureError, LinkError};
use crate::protocol::{PackageHandler, PackageStream, ReadMode, dispatch};
use crate::session::{SessionPhase, socket};
use crate::source::{DeviceSource, FrameSource};

// ── Constants ────────────────────────────────────────────────────

/// Port the producer listens on by default.
pub const DEFAULT_PORT: u16 = 4097;

pub const GREETING: &str = "Connection established";
pub const CONFIG_REQUEST: &str = "Please send stream configuration";
pub const CONFIGURED: &str = "Server configured the video stream successfully";

/// Opens a fresh capture device for each session.
pub type DeviceFactory =
    Arc<dyn Fn() -> Result<Box<dyn CaptureDevice>, CaptureError> + Send + Sync>;

// ── SessionSettings ──────────────────────────────────────────────

/// Knobs for a producer session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Buffers in the capture ring.
    pub slots: usize,
    /// Sleep between polls of a busy device.
    pub backoff: Duration,
    /// Stop after this many frames. `None` streams until the peer leaves.
    pub frame_limit: Option<u64>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            slots: DEFAULT_SLOTS,
            backoff: DEFAULT_BACKOFF,
            frame_limit: None,
        }
    }
}

/// What a finished session did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionReport {
    /// Configuration the session streamed with, if it got that far.
    pub config: Option<StreamConfig>,
    pub frames_sent: u64,
    pub bytes_sent: u64,
}

// ── Handlers ─────────────────────────────────────────────────────

/// Collects the consumer's configuration request.
#[derive(Default)]
struct AwaitConfig {
    requested: Option<StreamConfig>,
}

impl PackageHandler for AwaitConfig {
    fn on_config(&mut self, config: StreamConfig) -> Result<(), LinkError> {
        self.requested = Some(config);
        Ok(())
    }

    fn on_frame(&mut self, pixels: Bytes) -> Result<(), LinkError> {
        warn!("dropping {}-byte frame received before configuration", pixels.len());
        Ok(())
    }
}

/// Handles consumer traffic between frames.
struct WhileStreaming;

impl PackageHandler for WhileStreaming {
    fn on_config(&mut self, config: StreamConfig) -> Result<(), LinkError> {
        Err(LinkError::ProtocolViolation(format!(
            "consumer asked for {config} while streaming; configuration is fixed per session"
        )))
    }

    fn on_frame(&mut self, pixels: Bytes) -> Result<(), LinkError> {
        warn!("the producer does not accept frames, dropping {} bytes", pixels.len());
        Ok(())
    }
}

// ── ServerSession ────────────────────────────────────────────────

/// One producer session over an established connection.
pub struct ServerSession<S> {
    stream: PackageStream<S>,
    phase: SessionPhase,
    settings: SessionSettings,
    peer: String,
}

impl<S: AsyncRead + AsyncWrite + Send> ServerSession<S> {
    pub fn new(stream: S, settings: SessionSettings, peer: impl Into<String>) -> Self {
        Self {
            stream: PackageStream::new(stream),
            phase: SessionPhase::default(),
            settings,
            peer: peer.into(),
        }
    }

    pub fn phase(&self) -> &SessionPhase {
        &self.phase
    }

    /// Run the session to completion.
    ///
    /// The consumer leaving is a normal end and yields `Ok`. The device is
    /// released and the connection shut down on every path.
    pub async fn run(
        mut self,
        factory: &DeviceFactory,
        cancel: &CancellationToken,
    ) -> Result<SessionReport, LinkError> {
        let mut report = SessionReport::default();
        let outcome = self.drive(factory, cancel, &mut report).await;

        self.phase.close();
        if let Err(e) = self.stream.shutdown().await {
            debug!("{}: shutdown: {e}", self.peer);
        }

        match outcome {
            Ok(()) => Ok(report),
            Err(e) if e.is_peer_closed() => {
                info!("{}: consumer disconnected", self.peer);
                Ok(report)
            }
            Err(e) => Err(e),
        }
    }

    async fn drive(
        &mut self,
        factory: &DeviceFactory,
        cancel: &CancellationToken,
        report: &mut SessionReport,
    ) -> Result<(), LinkError> {
        self.stream.send_text(GREETING).await?;
        self.stream.send_text(CONFIG_REQUEST).await?;

        let requested = tokio::select! {
            requested = self.await_config() => requested?,
            _ = cancel.cancelled() => return Ok(()),
        };
        info!("{}: consumer requested {requested}", self.peer);

        let mut source = match self.open_source(factory, requested) {
            Ok(source) => source,
            Err(e) => {
                let notice = format!("Server could not configure the video stream: {e}");
                if let Err(send) = self.stream.send_text(&notice).await {
                    debug!("{}: could not report device failure: {send}", self.peer);
                }
                return Err(e.into());
            }
        };

        let outcome = self.stream_frames(&mut source, cancel, report).await;

        if let Err(e) = source.close() {
            warn!("{}: {e}", self.peer);
        }
        outcome
    }

    async fn await_config(&mut self) -> Result<StreamConfig, LinkError> {
        let mut handler = AwaitConfig::default();
        loop {
            let Some(package) = self.stream.read_package(ReadMode::Blocking).await? else {
                continue;
            };
            dispatch(&mut handler, package)?;
            if let Some(config) = handler.requested {
                return Ok(config);
            }
        }
    }

    fn open_source(
        &self,
        factory: &DeviceFactory,
        requested: StreamConfig,
    ) -> Result<DeviceSource<Box<dyn CaptureDevice>>, CaptureError> {
        let device = factory()?;
        DeviceSource::open(device, requested, self.settings.slots, self.settings.backoff)
    }

    async fn stream_frames(
        &mut self,
        source: &mut DeviceSource<Box<dyn CaptureDevice>>,
        cancel: &CancellationToken,
        report: &mut SessionReport,
    ) -> Result<(), LinkError> {
        let config = *source.config();
        self.phase.begin_streaming(config)?;
        report.config = Some(config);
        self.stream.send_text(CONFIGURED).await?;
        info!("{}: streaming {config}", self.peer);

        let mut handler = WhileStreaming;
        loop {
            if let Some(limit) = self.settings.frame_limit {
                if report.frames_sent >= limit {
                    info!("{}: frame limit of {limit} reached", self.peer);
                    return Ok(());
                }
            }

            let len = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("{}: cancelled", self.peer);
                    return Ok(());
                }
                len = source.next_frame() => len?,
            };

            self.stream.send_frame(source.current_frame()).await?;
            report.frames_sent += 1;
            report.bytes_sent += len as u64;

            while let Some(package) = self.stream.read_package(ReadMode::NonBlocking).await? {
                dispatch(&mut handler, package)?;
            }
        }
    }
}

// ── StreamServer ─────────────────────────────────────────────────

/// TCP front end that serves consumers one after another.
///
/// There is a single capture device, so connections are accepted
/// sequentially; a failed session is logged and the next one accepted.
/// Accepted connections get a small send buffer (see [`socket`]) so a
/// slow consumer receives recent frames rather than a backlog.
pub struct StreamServer {
    listener: TcpListener,
    factory: DeviceFactory,
    settings: SessionSettings,
    cancel: CancellationToken,
    session_limit: Option<u64>,
}

impl StreamServer {
    pub async fn bind(
        addr: impl ToSocketAddrs,
        factory: DeviceFactory,
        settings: SessionSettings,
    ) -> Result<Self, LinkError> {
        let listener = socket::listen(addr)
            .await
            .map_err(|source| LinkError::Transport { op: "bind", source })?;
        Ok(Self {
            listener,
            factory,
            settings,
            cancel: CancellationToken::new(),
            session_limit: None,
        })
    }

    /// Stop when `cancel` fires instead of the server's own token.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Return after serving `limit` sessions.
    pub fn with_session_limit(mut self, limit: u64) -> Self {
        self.session_limit = Some(limit);
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, LinkError> {
        self.listener
            .local_addr()
            .map_err(|source| LinkError::Transport {
                op: "local address",
                source,
            })
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Accept and serve consumers until cancelled. Returns the number of
    /// sessions served.
    pub async fn run(&self) -> Result<u64, LinkError> {
        info!("listening on {}", self.local_addr()?);
        let mut served = 0u64;

        while self.session_limit.is_none_or(|limit| served < limit) {
            let accepted = tokio::select! {
                accepted = self.listener.accept() => accepted,
                _ = self.cancel.cancelled() => break,
            };

            let (stream, peer) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("accept error: {e}");
                    continue;
                }
            };
            if let Err(e) = stream.set_nodelay(true) {
                debug!("{peer}: TCP_NODELAY: {e}");
            }
            info!("consumer connected from {peer}");

            let session = ServerSession::new(stream, self.settings.clone(), peer.to_string());
            match session.run(&self.factory, &self.cancel).await {
                Ok(report) => info!(
                    "session with {peer} ended: {} frames, {} bytes",
                    report.frames_sent, report.bytes_sent
                ),
                Err(e) => error!("session with {peer} failed: {e}"),
            }
            served += 1;
        }

        info!("server stopped after {served} sessions");
        Ok(served)
    }
}
