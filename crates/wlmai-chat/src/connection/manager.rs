//! Session-scoped connection lifecycle.
//!
//! One [`ConnectionManager`] owns at most one live transport, bound to a
//! single (knowledge base, chat, token) target:
//!
//! - [`ensure_connection`](ConnectionManager::ensure_connection) is
//!   single-flight: overlapping callers queue on the same attempt and
//!   observe its outcome instead of starting their own.
//! - Handshakes are retried on the configured backoff. Each attempt must
//!   become ready within the readiness budget or it counts as failed.
//! - Exhausting the retry budget moves to `FAILED` and appends exactly one
//!   ERROR turn to the active chat's log.
//! - [`close`](ConnectionManager::close) cancels any in-flight attempt or
//!   backoff sleep and bumps the connection generation, so a reader that is
//!   still draining a dead transport can no longer write into the log.
//! - Asking for a different target cancels whatever round is still working
//!   for the old one before queueing; callers queued behind a cancelled
//!   round give up instead of reconnecting.
//!
//! Transport failures after `OPEN` are not retried; the next ensure call
//! reconnects. Handshake rejections that are not retryable (such as an
//! HTTP 401) fail the round immediately.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use wlmai_core::{ChatError, ChatId, ChatMessage, ConnectionState, KnowledgeBaseId, Result};
use wlmai_settings::{ApiSettings, ChatSettings, ConnectionSettings};

use super::transport::{Connector, Link, TransportEvent, WsConnector};
use crate::dispatcher::MessageDispatcher;
use crate::endpoint;

// ─────────────────────────────────────────────────────────────────────────────
// Target & readiness
// ─────────────────────────────────────────────────────────────────────────────

/// What a connection is bound to.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    /// Chat the stream belongs to.
    pub chat_id: ChatId,
    /// Knowledge base the chat lives in.
    pub knowledge_base_id: KnowledgeBaseId,
    /// Access token (bearer prefix optional).
    pub token: String,
}

impl ConnectionTarget {
    /// Create a target.
    pub fn new(
        chat_id: impl Into<ChatId>,
        knowledge_base_id: impl Into<KnowledgeBaseId>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            chat_id: chat_id.into(),
            knowledge_base_id: knowledge_base_id.into(),
            token: token.into(),
        }
    }

    /// Reject targets with an empty field.
    pub fn validate(&self) -> Result<()> {
        if self.chat_id.is_empty() {
            return Err(ChatError::InvalidTarget { field: "chat_id" });
        }
        if self.knowledge_base_id.is_empty() {
            return Err(ChatError::InvalidTarget {
                field: "knowledge_base_id",
            });
        }
        if self.token.trim().is_empty() {
            return Err(ChatError::InvalidTarget { field: "token" });
        }
        Ok(())
    }
}

impl fmt::Debug for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionTarget")
            .field("chat_id", &self.chat_id)
            .field("knowledge_base_id", &self.knowledge_base_id)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Outcome of an ensure call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Readiness {
    /// The connection is open; frames may be sent.
    Ready,
    /// No usable connection (budget exhausted, cancelled or invalid target).
    NotReady,
}

impl Readiness {
    /// Whether the connection is usable.
    pub fn is_ready(self) -> bool {
        self == Self::Ready
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared state
// ─────────────────────────────────────────────────────────────────────────────

struct Outbound {
    generation: u64,
    tx: mpsc::Sender<String>,
    reader: CancellationToken,
}

/// State shared with reader tasks.
struct Shared {
    state: watch::Sender<ConnectionState>,
    generation: AtomicU64,
    outbound: Mutex<Option<Outbound>>,
    dispatcher: Arc<MessageDispatcher>,
}

impl Shared {
    /// Move to `next` unless `token` is already cancelled.
    ///
    /// Returns whether the state changed. Illegal transitions are logged
    /// and refused.
    fn transition(&self, token: Option<&CancellationToken>, next: ConnectionState) -> bool {
        self.state.send_if_modified(|current| {
            if token.is_some_and(CancellationToken::is_cancelled) || *current == next {
                return false;
            }
            if !current.can_transition_to(next) {
                warn!(from = %current, to = %next, "refusing connection state transition");
                return false;
            }
            debug!(from = %current, to = %next, "connection state");
            *current = next;
            true
        })
    }

    fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Start a new generation; frames from older ones are dropped.
    fn bump_generation(&self) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.dispatcher.set_generation(generation);
        generation
    }
}

struct Inner {
    target: Option<ConnectionTarget>,
    last_outcome: Readiness,
}

/// Most recently requested target and the token rounds for it run under.
struct Binding {
    target: Option<ConnectionTarget>,
    token: CancellationToken,
}

// ─────────────────────────────────────────────────────────────────────────────
// Manager
// ─────────────────────────────────────────────────────────────────────────────

/// Owns the single live connection of a chat session.
pub struct ConnectionManager {
    api: ApiSettings,
    settings: ConnectionSettings,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    inner: tokio::sync::Mutex<Inner>,
    /// Completed ensure rounds; lets queued callers detect that the round
    /// they waited on already settled.
    rounds: AtomicU64,
    binding: Mutex<Binding>,
}

impl ConnectionManager {
    /// Create a manager using `connector` for handshakes.
    pub fn new(
        settings: &ChatSettings,
        dispatcher: Arc<MessageDispatcher>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Closed);
        Self {
            api: settings.api.clone(),
            settings: settings.connection.clone(),
            connector,
            shared: Arc::new(Shared {
                state,
                generation: AtomicU64::new(0),
                outbound: Mutex::new(None),
                dispatcher,
            }),
            inner: tokio::sync::Mutex::new(Inner {
                target: None,
                last_outcome: Readiness::NotReady,
            }),
            rounds: AtomicU64::new(0),
            binding: Mutex::new(Binding {
                target: None,
                token: CancellationToken::new(),
            }),
        }
    }

    /// Create a manager that connects over real WebSockets.
    pub fn with_websocket(settings: &ChatSettings, dispatcher: Arc<MessageDispatcher>) -> Self {
        Self::new(settings, dispatcher, Arc::new(WsConnector))
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Watch state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Current connection generation.
    pub fn generation(&self) -> u64 {
        self.shared.current_generation()
    }

    /// Make sure an open connection for `target` exists.
    pub async fn ensure_connection(&self, target: &ConnectionTarget) -> Readiness {
        self.ensure_connection_for(target, "").await
    }

    /// Like [`ensure_connection`](Self::ensure_connection), naming the
    /// question that triggered it so an exhausted budget can attach it to
    /// the ERROR turn.
    #[instrument(skip_all, fields(chat_id = %target.chat_id, kb = %target.knowledge_base_id))]
    pub async fn ensure_connection_for(
        &self,
        target: &ConnectionTarget,
        question: &str,
    ) -> Readiness {
        if let Err(e) = target.validate() {
            error!(error = %e, "not connecting");
            return Readiness::NotReady;
        }

        let token = self.claim(target);
        let observed_round = self.rounds.load(Ordering::Acquire);
        let mut inner = self.inner.lock().await;
        if token.is_cancelled() {
            debug!("superseded while queued, not connecting");
            return Readiness::NotReady;
        }

        let same_target = inner.target.as_ref() == Some(target);
        if same_target && self.state() == ConnectionState::Open {
            return Readiness::Ready;
        }
        if same_target && self.rounds.load(Ordering::Acquire) != observed_round {
            debug!(outcome = ?inner.last_outcome, "joined in-flight connection attempt");
            return inner.last_outcome;
        }

        if !same_target && inner.target.is_some() {
            info!("connection target changed, dropping previous connection");
            self.drop_transport();
            let _ = self.shared.transition(None, ConnectionState::Closed);
        }
        inner.target = Some(target.clone());

        let generation = self.shared.bump_generation();
        let outcome = match self.connect_with_retry(target, &token).await {
            Ok(link) => self.install(target, generation, link, &token),
            Err(ChatError::Cancelled) => {
                info!(generation, "connection attempt cancelled");
                Readiness::NotReady
            }
            Err(e) => {
                error!(generation, error = %e, "connection failed");
                if self.shared.transition(Some(&token), ConnectionState::Failed) {
                    let _ = self
                        .shared
                        .dispatcher
                        .append(ChatMessage::connection_error(target.chat_id.clone(), question));
                }
                Readiness::NotReady
            }
        };

        inner.last_outcome = outcome;
        let _ = self.rounds.fetch_add(1, Ordering::AcqRel);
        outcome
    }

    /// Send one frame over the open connection.
    pub async fn send(&self, payload: &str) -> Result<()> {
        let state = self.state();
        if state != ConnectionState::Open {
            return Err(ChatError::NotReady { state });
        }
        let tx = self
            .shared
            .outbound
            .lock()
            .as_ref()
            .map(|o| o.tx.clone())
            .ok_or(ChatError::NotReady { state: ConnectionState::Closed })?;
        tx.send(payload.to_owned())
            .await
            .map_err(|_| ChatError::Transport("connection closed while sending".into()))
    }

    /// Tear down the connection and cancel any in-flight attempt.
    ///
    /// Idempotent; safe to call from any state.
    pub fn close(&self) {
        let previous = std::mem::replace(&mut self.binding.lock().token, CancellationToken::new());
        previous.cancel();
        let generation = self.shared.bump_generation();
        self.drop_transport();
        if self.shared.transition(None, ConnectionState::Closed) {
            info!(generation, "connection closed");
        }
    }

    /// Bind to `target` and return the token its round runs under.
    ///
    /// A round still working for another target is cancelled first.
    fn claim(&self, target: &ConnectionTarget) -> CancellationToken {
        let mut binding = self.binding.lock();
        if binding.target.as_ref().is_some_and(|current| current != target) {
            info!("connection target changed, cancelling previous round");
            let stale = std::mem::replace(&mut binding.token, CancellationToken::new());
            stale.cancel();
        }
        binding.target = Some(target.clone());
        binding.token.clone()
    }

    fn drop_transport(&self) {
        if let Some(outbound) = self.shared.outbound.lock().take() {
            debug!(generation = outbound.generation, "dropping transport");
            outbound.reader.cancel();
        }
    }

    async fn connect_with_retry(
        &self,
        target: &ConnectionTarget,
        token: &CancellationToken,
    ) -> Result<Link> {
        let _ = self.shared.transition(Some(token), ConnectionState::Connecting);
        let url = endpoint::chat_socket_url(
            &self.api,
            &target.knowledge_base_id,
            &target.chat_id,
            &target.token,
        )?;
        let retry = &self.settings.retry;
        let ready_timeout = self.settings.ready_timeout();
        let timeout_ms = u64::try_from(ready_timeout.as_millis()).unwrap_or(u64::MAX);

        let mut attempt = 0;
        loop {
            attempt += 1;
            if token.is_cancelled() {
                return Err(ChatError::Cancelled);
            }
            let _ = self.shared.transition(Some(token), ConnectionState::Connecting);

            let result = tokio::select! {
                () = token.cancelled() => return Err(ChatError::Cancelled),
                r = tokio::time::timeout(
                    ready_timeout,
                    self.connector.connect(url.as_str(), self.settings.outbound_buffer),
                ) => r,
            };
            let err = match result {
                Ok(Ok(link)) => {
                    info!(attempt, "connected");
                    return Ok(link);
                }
                Ok(Err(e)) if !e.is_retryable() => {
                    warn!(attempt, error = %e, "handshake rejected, not retrying");
                    return Err(e);
                }
                Ok(Err(e)) => ChatError::Handshake {
                    attempt,
                    message: e.to_string(),
                },
                Err(_) => ChatError::ReadyTimeout { timeout_ms },
            };

            let _ = self.shared.transition(Some(token), ConnectionState::Retrying);
            if attempt >= retry.max_attempts {
                return Err(err);
            }

            let delay_ms = retry.delay_ms(attempt - 1, rand::random::<f64>());
            warn!(
                attempt,
                max_attempts = retry.max_attempts,
                delay_ms,
                error = %err,
                "connection attempt failed, retrying"
            );
            tokio::select! {
                () = token.cancelled() => return Err(ChatError::Cancelled),
                () = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
            }
        }
    }

    /// Publish an established link, unless a close raced the handshake.
    fn install(
        &self,
        target: &ConnectionTarget,
        generation: u64,
        link: Link,
        token: &CancellationToken,
    ) -> Readiness {
        let Link { outbound, inbound } = link;
        let reader = token.child_token();
        {
            let mut slot = self.shared.outbound.lock();
            if token.is_cancelled() || self.shared.current_generation() != generation {
                debug!(generation, "discarding link established after close");
                return Readiness::NotReady;
            }
            *slot = Some(Outbound {
                generation,
                tx: outbound,
                reader: reader.clone(),
            });
            let _ = self.shared.transition(Some(token), ConnectionState::Open);
        }

        drop(tokio::spawn(read_loop(
            self.shared.clone(),
            target.chat_id.clone(),
            generation,
            inbound,
            reader,
        )));
        Readiness::Ready
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.binding.lock().token.cancel();
    }
}

/// Forward inbound frames into the log until the transport ends or the
/// connection is cancelled.
async fn read_loop(
    shared: Arc<Shared>,
    chat_id: ChatId,
    generation: u64,
    mut inbound: mpsc::Receiver<TransportEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => break,
            event = inbound.recv() => event,
        };
        match event {
            Some(TransportEvent::Frame(raw)) => {
                let _ = shared.dispatcher.dispatch_frame(&chat_id, generation, &raw);
            }
            Some(TransportEvent::Closed(reason)) => {
                remote_closed(&shared, &chat_id, generation, &cancel, reason.as_deref());
                break;
            }
            None => {
                remote_closed(&shared, &chat_id, generation, &cancel, None);
                break;
            }
        }
    }
    debug!(%chat_id, generation, "reader stopped");
}

/// Retire connection `generation` after the remote end went away and close
/// the turn it left open, unless a newer connection already replaced it.
fn remote_closed(
    shared: &Shared,
    chat_id: &ChatId,
    generation: u64,
    cancel: &CancellationToken,
    reason: Option<&str>,
) {
    let mut slot = shared.outbound.lock();
    if shared.current_generation() != generation {
        return;
    }
    info!(%chat_id, generation, reason = reason.unwrap_or(""), "transport closed by remote");
    *slot = None;
    let _ = shared.transition(Some(cancel), ConnectionState::Closed);
    drop(slot);
    let _ = shared.dispatcher.finalize_open_turn(chat_id);
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
