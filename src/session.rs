//! Session lifecycle
//!
//! A session owns one jitter buffer (with its drift estimator), the receive
//! task and the playback loop. Starting allocates everything and spawns both
//! execution contexts; stopping cancels them and joins both before anything
//! is dropped.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::audio::codec::{FrameDecoder, PacketCipher};
use crate::audio::pacer::{PlaybackPacer, DEFAULT_MAX_RATE_DEVIATION};
use crate::audio::rate::{build_adapter, RateAdapterKind};
use crate::audio::sink::AudioSink;
use crate::audio::volume::VolumeControl;
use crate::error::{PlayerError, PlayerResult};
use crate::rtp::jitter::{BufferStats, JitterBuffer, JitterBufferConfig};
use crate::rtp::receiver::{AudioReceiver, ReceiverStats};
use crate::rtp::resend::UdpResendRequester;

/// Externally visible session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    Starting,
    Buffering,
    Playing,
    Stopping,
}

/// Things that move a session between states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionEvent {
    Start,
    /// Resources allocated and both contexts running
    Started,
    StartFailed,
    FillReached,
    Underrun,
    Flush,
    Stop,
    /// Both contexts have exited
    Joined,
}

impl SessionState {
    /// Next state, or `None` if `event` is not valid here
    pub fn on(self, event: SessionEvent) -> Option<SessionState> {
        use SessionEvent::*;
        use SessionState::*;

        match (self, event) {
            (Idle, Start) => Some(Starting),
            (Starting, Started) => Some(Buffering),
            (Starting, StartFailed) => Some(Idle),
            (Buffering, FillReached) => Some(Playing),
            (Playing, Underrun) => Some(Buffering),
            (Buffering | Playing, Flush) => Some(Buffering),
            (Buffering | Playing, Stop) => Some(Stopping),
            (Stopping, Joined) => Some(Idle),
            _ => None,
        }
    }

    /// Receive and playback contexts may be running
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SessionState::Buffering | SessionState::Playing | SessionState::Stopping
        )
    }
}

/// Parameters fixed at session start
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub buffer: JitterBufferConfig,
    pub rate_adapter: RateAdapterKind,
    pub max_rate_deviation: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            buffer: JitterBufferConfig::default(),
            rate_adapter: RateAdapterKind::default(),
            max_rate_deviation: DEFAULT_MAX_RATE_DEVIATION,
        }
    }
}

/// Collaborators established by session setup
pub struct StreamSetup {
    /// Bound data socket; resend requests leave from it too
    pub socket: std::net::UdpSocket,
    /// Sender's control channel
    pub control_addr: SocketAddr,
    pub cipher: Box<dyn PacketCipher>,
    pub decoder: Box<dyn FrameDecoder>,
    pub sink: Box<dyn AudioSink>,
}

/// What a stopped session left behind
#[derive(Debug, Clone, Default)]
pub struct SessionSummary {
    pub buffer: BufferStats,
    pub receiver: ReceiverStats,
    pub resends_sent: u64,
}

struct Running {
    buffer: Arc<JitterBuffer>,
    resend: Arc<UdpResendRequester>,
    cancel: CancellationToken,
    receiver: JoinHandle<ReceiverStats>,
    playback: JoinHandle<PlayerResult<()>>,
}

pub struct Session {
    config: SessionConfig,
    volume: Arc<VolumeControl>,
    phase: SessionState,
    running: Option<Running>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            volume: Arc::new(VolumeControl::new()),
            phase: SessionState::Idle,
            running: None,
        }
    }

    fn transition(&mut self, event: SessionEvent) {
        match self.phase.on(event) {
            Some(next) => {
                debug!("Session {:?} --{:?}--> {:?}", self.phase, event, next);
                self.phase = next;
            }
            None => warn!("Ignoring {:?} in state {:?}", event, self.phase),
        }
    }

    /// Start streaming; a running session is stopped first
    pub async fn start(&mut self, setup: StreamSetup) -> PlayerResult<()> {
        if self.running.is_some() {
            info!("Restarting session");
            self.stop().await;
        }

        self.transition(SessionEvent::Start);
        match self.spawn(setup) {
            Ok(running) => {
                self.running = Some(running);
                self.transition(SessionEvent::Started);
                info!("Session started, buffering");
                Ok(())
            }
            Err(e) => {
                error!("Session failed to start: {}", e);
                self.transition(SessionEvent::StartFailed);
                Err(e)
            }
        }
    }

    fn spawn(&self, setup: StreamSetup) -> PlayerResult<Running> {
        let StreamSetup {
            socket,
            control_addr,
            cipher,
            decoder,
            mut sink,
        } = setup;

        let resend = Arc::new(UdpResendRequester::new(socket.try_clone()?, control_addr));
        let buffer = Arc::new(JitterBuffer::new(self.config.buffer.clone(), resend.clone())?);
        let adapter = build_adapter(self.config.rate_adapter, &self.config.buffer.params)?;
        sink.start(self.config.buffer.params.sample_rate)?;

        socket.set_nonblocking(true)?;
        let socket = tokio::net::UdpSocket::from_std(socket)?;

        let cancel = CancellationToken::new();
        let receiver = AudioReceiver::new(socket, Arc::clone(&buffer), cipher, decoder);
        let receiver = tokio::spawn(receiver.run(cancel.clone()));

        let pacer = PlaybackPacer::new(
            Arc::clone(&buffer),
            Arc::clone(&self.volume),
            adapter,
            sink,
            self.config.max_rate_deviation,
        );
        let playback_cancel = cancel.clone();
        let playback = tokio::task::spawn_blocking(move || pacer.run(playback_cancel));

        Ok(Running {
            buffer,
            resend,
            cancel,
            receiver,
            playback,
        })
    }

    /// Stop both contexts and release the buffer; `None` if nothing ran
    pub async fn stop(&mut self) -> Option<SessionSummary> {
        let running = self.running.take()?;
        self.transition(SessionEvent::Stop);
        running.cancel.cancel();

        let receiver = match running.receiver.await {
            Ok(stats) => stats,
            Err(e) => {
                error!("Receive task failed: {}", e);
                ReceiverStats::default()
            }
        };
        match running.playback.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Playback ended with error: {}", e),
            Err(e) => error!("Playback task failed: {}", e),
        }

        let summary = SessionSummary {
            buffer: running.buffer.stats(),
            receiver,
            resends_sent: running.resend.sent(),
        };
        self.transition(SessionEvent::Joined);
        info!(
            "Session stopped: {} frames played ({} missing), {} underruns, {} overruns",
            summary.buffer.frames_played,
            summary.buffer.frames_missing,
            summary.buffer.underruns,
            summary.buffer.overruns
        );
        Some(summary)
    }

    /// Drop everything buffered and re-sync on the next packet
    pub fn flush(&mut self) -> PlayerResult<()> {
        let running = self.running.as_ref().ok_or(PlayerError::NotRunning)?;
        running.buffer.flush();
        self.transition(SessionEvent::Flush);
        Ok(())
    }

    /// Volume in AirPlay dB; callable at any time, from any context
    pub fn set_volume(&self, db: f64) {
        self.volume.set_db(db);
    }

    /// Current state; buffering and playing follow the jitter buffer
    pub fn state(&mut self) -> SessionState {
        if let Some(running) = &self.running {
            let buffering = running.buffer.is_buffering();
            match self.phase {
                SessionState::Buffering if !buffering => self.transition(SessionEvent::FillReached),
                SessionState::Playing if buffering => self.transition(SessionEvent::Underrun),
                _ => {}
            }
        }
        self.phase
    }

    /// Live buffer counters of the running session
    pub fn stats(&self) -> Option<BufferStats> {
        self.running.as_ref().map(|r| r.buffer.stats())
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Cannot join here; at least make both contexts exit
        if let Some(running) = &self.running {
            running.cancel.cancel();
        }
    }
}
