//! Per-connection session: owns turn-taking, frame dispatch and teardown
//!
//! Each session is a small task tree. The loop in [`Session::run`] is the
//! single event path: it classifies inbound frames, starts and interrupts
//! turns, answers keepalives and watches for inactivity. An active turn runs
//! as one spawned task (see [`crate::turn`]) that talks back through the
//! shared state and the outbound sink; it never holds the socket itself.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::audio::frame_rms;
use crate::clients::ExternalClients;
use crate::memory::{ChatMessage, ConversationMemory};
use crate::silence::{SilenceConfig, SilenceDetector};
use crate::state::{SessionState, StateMachine};
use crate::turn::{self, TurnContext};
use crate::wire::{ClientEvent, ServerEvent};
use crate::{Error, Result};

/// Keepalive cadence; defeats intermediary idle-timeout proxies
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(25);

/// How often the inactivity watchdog looks at the clock
const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Inactivity allowed before the session is torn down
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Grace given to turn tasks to observe cancellation
const CANCEL_GRACE: Duration = Duration::from_millis(200);

/// A message from the client connection
#[derive(Debug)]
pub enum Inbound {
    /// Binary frame: 20 ms of PCM audio
    Audio(Bytes),
    /// Text frame: JSON control message
    Text(String),
    /// The connection ended or errored
    Closed,
}

/// Outbound wire frame, serialized by the single writer task
#[derive(Debug)]
pub enum OutboundFrame {
    /// JSON control message, already encoded
    Control(String),
    /// Opaque audio chunk
    Audio(Bytes),
}

/// Send-only handle to the connection writer
///
/// Turn tasks get this instead of the socket, so control JSON and audio
/// chunks cannot interleave mid-message.
#[derive(Clone)]
pub struct OutboundSink {
    tx: mpsc::Sender<OutboundFrame>,
}

impl OutboundSink {
    #[must_use]
    pub fn new(tx: mpsc::Sender<OutboundFrame>) -> Self {
        Self { tx }
    }

    /// Send a JSON control message
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] once the client connection is gone
    pub async fn event(&self, event: &ServerEvent) -> Result<()> {
        let text = serde_json::to_string(event)?;
        self.tx
            .send(OutboundFrame::Control(text))
            .await
            .map_err(|_| Error::Transport("client connection closed".to_string()))
    }

    /// Send a binary audio chunk
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] once the client connection is gone
    pub async fn audio(&self, chunk: Bytes) -> Result<()> {
        self.tx
            .send(OutboundFrame::Audio(chunk))
            .await
            .map_err(|_| Error::Transport("client connection closed".to_string()))
    }
}

fn relock<T>(guard: std::result::Result<T, PoisonError<T>>) -> T {
    guard.unwrap_or_else(PoisonError::into_inner)
}

/// State shared between the session loop and its turn task
///
/// All critical sections are short and never held across an await.
pub struct SessionShared {
    id: String,
    state: Mutex<StateMachine>,
    memory: Mutex<ConversationMemory>,
    last_activity: Mutex<Instant>,
}

impl SessionShared {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            state: Mutex::new(StateMachine::new(id.as_str())),
            memory: Mutex::new(ConversationMemory::new()),
            last_activity: Mutex::new(Instant::now()),
            id,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current turn-taking state
    #[must_use]
    pub fn state(&self) -> SessionState {
        relock(self.state.lock()).state()
    }

    /// Attempt a guarded transition; true if it was applied
    pub fn transition(&self, to: SessionState) -> bool {
        relock(self.state.lock()).transition(to)
    }

    /// Record activity (voiced frame or emitted assistant audio)
    pub fn touch(&self) {
        *relock(self.last_activity.lock()) = Instant::now();
    }

    /// Time since the last voiced frame or assistant chunk
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        Instant::now().duration_since(*relock(self.last_activity.lock()))
    }

    /// Snapshot memory into an LLM request including the pending transcript
    #[must_use]
    pub fn build_llm_request(&self, pending_user: &str) -> Vec<ChatMessage> {
        relock(self.memory.lock()).build_request(pending_user)
    }

    /// Commit a completed turn to memory, both entries or neither
    pub fn commit_turn(&self, user: &str, assistant: &str) {
        let mut memory = relock(self.memory.lock());
        memory.commit_turn(user, assistant);
        tracing::info!(
            session_id = %self.id,
            entries = memory.len(),
            "turn committed to memory"
        );
    }

    /// Copy of the committed conversation history
    #[must_use]
    pub fn memory_snapshot(&self) -> Vec<ChatMessage> {
        relock(self.memory.lock()).entries().to_vec()
    }
}

/// Handle to the currently-running turn task
struct TurnHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl TurnHandle {
    /// Await task exit within the grace window; aborts on overrun
    async fn join_within_grace(mut self) -> bool {
        match tokio::time::timeout(CANCEL_GRACE, &mut self.task).await {
            Ok(_) => true,
            Err(_) => {
                self.task.abort();
                false
            }
        }
    }
}

/// One client connection's session
pub struct Session {
    shared: Arc<SessionShared>,
    detector: SilenceDetector,
    turn: Option<TurnHandle>,
    sink: OutboundSink,
    clients: ExternalClients,
}

impl Session {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        sink: OutboundSink,
        clients: ExternalClients,
        silence: SilenceConfig,
    ) -> Self {
        Self {
            shared: Arc::new(SessionShared::new(id)),
            detector: SilenceDetector::new(silence),
            turn: None,
            sink,
            clients,
        }
    }

    /// Shared state handle, for inspection
    #[must_use]
    pub fn shared(&self) -> Arc<SessionShared> {
        Arc::clone(&self.shared)
    }

    /// Drive the session until the connection closes, a fatal error occurs
    /// or the inactivity watchdog fires
    pub async fn run<S>(mut self, mut inbound: S)
    where
        S: Stream<Item = Inbound> + Unpin,
    {
        if self.shared.transition(SessionState::UserSpeaking) {
            let status = ServerEvent::status(SessionState::UserSpeaking);
            if self.sink.event(&status).await.is_err() {
                return;
            }
        }

        let mut keepalive =
            tokio::time::interval_at(Instant::now() + KEEPALIVE_INTERVAL, KEEPALIVE_INTERVAL);
        let mut idle_poll =
            tokio::time::interval_at(Instant::now() + IDLE_POLL_INTERVAL, IDLE_POLL_INTERVAL);

        loop {
            tokio::select! {
                message = inbound.next() => match message {
                    Some(Inbound::Audio(frame)) => {
                        if let Err(e) = self.on_frame(&frame).await {
                            self.log_session_end(&e);
                            break;
                        }
                    }
                    Some(Inbound::Text(text)) => self.on_text(&text).await,
                    Some(Inbound::Closed) | None => {
                        tracing::info!(session_id = %self.shared.id(), "client disconnected");
                        break;
                    }
                },
                _ = keepalive.tick() => {
                    if self.sink.event(&ServerEvent::Ping).await.is_err() {
                        break;
                    }
                }
                _ = idle_poll.tick() => {
                    if self.shared.idle_for() >= IDLE_TIMEOUT {
                        tracing::info!(
                            session_id = %self.shared.id(),
                            idle_secs = self.shared.idle_for().as_secs(),
                            "inactivity timeout"
                        );
                        self.stop_turn().await;
                        let _ = self.sink.event(&ServerEvent::timeout()).await;
                        break;
                    }
                }
            }
        }

        self.stop_turn().await;
    }

    fn log_session_end(&self, error: &Error) {
        match error {
            Error::Transport(_) => {
                tracing::info!(session_id = %self.shared.id(), error = %error, "session ended");
            }
            other => {
                tracing::error!(session_id = %self.shared.id(), error = %other, "closing session");
            }
        }
    }

    /// Dispatch one inbound audio frame according to the current state
    async fn on_frame(&mut self, frame: &[u8]) -> Result<()> {
        // Reap a turn that finished on its own so the handle cannot go stale
        if self.turn.as_ref().is_some_and(|t| t.task.is_finished()) {
            self.turn = None;
        }

        match self.shared.state() {
            SessionState::AiProcessing | SessionState::AiSpeaking => {
                let rms = frame_rms(frame);
                if self.detector.is_barge_in(rms) {
                    tracing::info!(
                        session_id = %self.shared.id(),
                        rms = format!("{rms:.0}"),
                        "barge-in detected"
                    );
                    self.interrupt_turn().await?;
                    // The interrupting frame opens the next utterance
                    self.user_frame(frame).await?;
                }
            }
            SessionState::UserSpeaking => self.user_frame(frame).await?,
            SessionState::Idle => {}
        }

        Ok(())
    }

    /// Feed a frame into the detector while the user holds the floor
    async fn user_frame(&mut self, frame: &[u8]) -> Result<()> {
        let outcome = self.detector.ingest(frame);
        if outcome.voiced {
            self.shared.touch();
        }
        if outcome.turn_end {
            tracing::info!(
                session_id = %self.shared.id(),
                voiced_frames = self.detector.voiced_frames(),
                buffered_bytes = self.detector.buffered_bytes(),
                "turn ended"
            );
            self.begin_turn().await?;
        }
        Ok(())
    }

    /// Snapshot the turn audio and launch the pipeline task
    async fn begin_turn(&mut self) -> Result<()> {
        let audio = self.detector.take_turn();

        if self.shared.transition(SessionState::AiProcessing) {
            let status = ServerEvent::status(SessionState::AiProcessing);
            self.sink.event(&status).await?;
        }

        let cancel = CancellationToken::new();
        let context = TurnContext {
            shared: Arc::clone(&self.shared),
            sink: self.sink.clone(),
            clients: self.clients.clone(),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(turn::run_turn(context, audio));
        self.turn = Some(TurnHandle { cancel, task });

        Ok(())
    }

    /// Cancel the active turn after a barge-in
    ///
    /// Raising the cancel signal is idempotent; a second barge-in frame finds
    /// the session already listening and takes the normal path.
    async fn interrupt_turn(&mut self) -> Result<()> {
        if let Some(handle) = self.turn.take() {
            handle.cancel.cancel();
            self.sink.event(&ServerEvent::Interrupt).await?;

            if !handle.join_within_grace().await {
                return Err(Error::Invariant(
                    "turn task did not stop within the cancellation grace".to_string(),
                ));
            }
        }

        if self.shared.transition(SessionState::UserSpeaking) {
            let status = ServerEvent::status(SessionState::UserSpeaking);
            self.sink.event(&status).await?;
        }
        self.detector.reset();
        Ok(())
    }

    /// Handle a text control message from the client
    async fn on_text(&self, text: &str) {
        match serde_json::from_str::<ClientEvent>(text) {
            Ok(ClientEvent::Ping) => {
                let _ = self.sink.event(&ServerEvent::Ping).await;
            }
            Err(e) => {
                tracing::debug!(
                    session_id = %self.shared.id(),
                    error = %e,
                    "ignoring unrecognized control message"
                );
            }
        }
    }

    /// Cancel any running turn during teardown; aborts on grace overrun
    async fn stop_turn(&mut self) {
        if let Some(handle) = self.turn.take() {
            handle.cancel.cancel();
            if !handle.join_within_grace().await {
                tracing::warn!(session_id = %self.shared.id(), "aborted unresponsive turn task");
            }
        }
    }
}
