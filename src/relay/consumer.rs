//! Consumer runtime
//!
//! One runtime drives one (topic, group) subscription:
//!
//! ```text
//! Starting -> Running -> Stopped   (shutdown signal)
//!                     -> Crashed   (halt policy, dead-letter failure,
//!                                   or too many consecutive stream errors)
//! ```
//!
//! Each message is decoded, applied through the bound handler, and only then
//! committed. A crash between receive and commit therefore redelivers the
//! message (at-least-once). A bad message never takes the process down: decode
//! failures and exhausted handler retries go through the configured
//! `FailurePolicy`.

use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::codec;
use super::command::{MutationCommand, Route};
use super::constants::{
    DEFAULT_HANDLER_MAX_RETRIES, DEFAULT_RETRY_BACKOFF_MS, DEFAULT_STREAM_ERROR_LIMIT,
    HEADER_ERROR, HEADER_SOURCE_OFFSET, HEADER_SOURCE_PARTITION, HEADER_SOURCE_TOPIC,
    RETRY_BACKOFF_CEILING_MS,
};
use super::error::{RelayError, Result};
use super::handlers::{ApplyOutcome, MutationHandler};
use super::publisher::{OutboundRecord, Publisher};
use super::source::{InboundMessage, MessageStream};
use super::topic::dead_letter_topic;

// ===== State =====

/// Lifecycle of one receive loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Starting,
    Running,
    Stopped,
    Crashed,
}

impl RuntimeState {
    /// Whether the loop has ended (either way)
    pub fn is_finished(self) -> bool {
        matches!(self, RuntimeState::Stopped | RuntimeState::Crashed)
    }
}

/// What to do with a message that cannot be applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Publish the original payload to `{topic}.dlq`, commit, continue
    DeadLetter,
    /// Log, commit, continue
    Skip,
    /// Stop the loop without committing; the message is redelivered on restart
    Halt,
}

impl FailurePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            FailurePolicy::DeadLetter => "dead_letter",
            FailurePolicy::Skip => "skip",
            FailurePolicy::Halt => "halt",
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailurePolicy {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "dead_letter" | "dlq" => Ok(FailurePolicy::DeadLetter),
            "skip" => Ok(FailurePolicy::Skip),
            "halt" => Ok(FailurePolicy::Halt),
            other => Err(RelayError::InvalidConfig(format!(
                "unknown failure policy '{}' (expected dead_letter, skip or halt)",
                other
            ))),
        }
    }
}

/// Tunables for one receive loop
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub handler_max_retries: u32,
    pub retry_backoff_ms: u64,
    pub failure_policy: FailurePolicy,
    pub stream_error_limit: u32,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            handler_max_retries: DEFAULT_HANDLER_MAX_RETRIES,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            failure_policy: FailurePolicy::DeadLetter,
            stream_error_limit: DEFAULT_STREAM_ERROR_LIMIT,
        }
    }
}

/// Per-subscription counters
#[derive(Debug, Default)]
pub struct ConsumerStats {
    received: AtomicU64,
    applied: AtomicU64,
    not_found: AtomicU64,
    failed: AtomicU64,
    dead_lettered: AtomicU64,
    commit_failures: AtomicU64,
}

/// Point-in-time copy of [`ConsumerStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub received: u64,
    pub applied: u64,
    pub not_found: u64,
    pub failed: u64,
    pub dead_lettered: u64,
    pub commit_failures: u64,
}

impl ConsumerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            commit_failures: self.commit_failures.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Shared view of a runtime, held by the registry
#[derive(Debug, Clone)]
pub struct RuntimeHandle {
    state: Arc<Mutex<RuntimeState>>,
    stats: Arc<ConsumerStats>,
}

impl RuntimeHandle {
    fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(RuntimeState::Starting)),
            stats: Arc::new(ConsumerStats::default()),
        }
    }

    pub fn state(&self) -> RuntimeState {
        *self.state.lock()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    fn set_state(&self, state: RuntimeState) {
        *self.state.lock() = state;
    }
}

// ===== Runtime =====

enum Disposition {
    Commit,
    Halt,
}

enum Event {
    Shutdown,
    Idle,
    Received(Result<InboundMessage>),
}

/// Receive loop for one subscription
pub struct ConsumerRuntime {
    route: Route,
    group: String,
    stream: Box<dyn MessageStream>,
    handler: Arc<dyn MutationHandler>,
    dead_letters: Option<Arc<dyn Publisher>>,
    settings: RuntimeSettings,
    handle: RuntimeHandle,
}

impl ConsumerRuntime {
    pub fn new(
        route: Route,
        group: &str,
        stream: Box<dyn MessageStream>,
        handler: Arc<dyn MutationHandler>,
        dead_letters: Option<Arc<dyn Publisher>>,
        settings: RuntimeSettings,
    ) -> Self {
        Self {
            route,
            group: group.to_string(),
            stream,
            handler,
            dead_letters,
            settings,
            handle: RuntimeHandle::new(),
        }
    }

    pub fn handle(&self) -> RuntimeHandle {
        self.handle.clone()
    }

    /// Run until shutdown or a fatal condition; returns the final state
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> RuntimeState {
        let topic = self.route.topic();
        self.handle.set_state(RuntimeState::Running);
        info!(topic, group = %self.group, policy = %self.settings.failure_policy, "Consumer loop started");

        let mut stream_errors: u32 = 0;
        let final_state = loop {
            if *shutdown.borrow() {
                break RuntimeState::Stopped;
            }

            let event = tokio::select! {
                changed = shutdown.changed() => match changed {
                    Ok(()) if *shutdown.borrow() => Event::Shutdown,
                    Ok(()) => Event::Idle,
                    // Sender gone: nobody can stop us cleanly any more
                    Err(_) => Event::Shutdown,
                },
                next = self.stream.next() => Event::Received(next),
            };

            match event {
                Event::Shutdown => break RuntimeState::Stopped,
                Event::Idle => continue,
                Event::Received(Ok(message)) => {
                    stream_errors = 0;
                    ConsumerStats::bump(&self.handle.stats.received);
                    match self.process(&message).await {
                        Disposition::Commit => self.commit(&message).await,
                        Disposition::Halt => break RuntimeState::Crashed,
                    }
                }
                Event::Received(Err(e)) => {
                    stream_errors += 1;
                    if stream_errors >= self.settings.stream_error_limit {
                        error!(topic, group = %self.group, errors = stream_errors, "Receive failing repeatedly, stopping consumer: {}", e);
                        break RuntimeState::Crashed;
                    }
                    warn!(topic, group = %self.group, attempt = stream_errors, "Receive error: {}", e);
                    tokio::time::sleep(backoff(self.settings.retry_backoff_ms, stream_errors - 1)).await;
                }
            }
        };

        self.handle.set_state(final_state);
        match final_state {
            RuntimeState::Crashed => error!(topic, group = %self.group, "Consumer loop crashed"),
            _ => info!(topic, group = %self.group, "Consumer loop stopped"),
        }
        final_state
    }

    async fn process(&self, message: &InboundMessage) -> Disposition {
        let command = match codec::decode(self.route, &message.payload) {
            Ok(command) => command,
            Err(e) => return self.fail(message, e).await,
        };

        match self.apply_with_retries(&command).await {
            Ok(ApplyOutcome::Applied) => {
                ConsumerStats::bump(&self.handle.stats.applied);
                Disposition::Commit
            }
            Ok(ApplyOutcome::NotFound) => {
                ConsumerStats::bump(&self.handle.stats.not_found);
                warn!(
                    topic = %message.topic,
                    offset = message.offset,
                    id = command.target_id,
                    "{} target not found, committing", self.route
                );
                Disposition::Commit
            }
            Err(e) => self.fail(message, e).await,
        }
    }

    async fn apply_with_retries(&self, command: &MutationCommand) -> Result<ApplyOutcome> {
        let mut attempt: u32 = 0;
        loop {
            let result = AssertUnwindSafe(self.handler.apply(command))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    Err(RelayError::Handler(format!(
                        "handler panicked: {}",
                        panic_message(panic.as_ref())
                    )))
                });

            match result {
                Err(e) if e.is_retriable() && attempt < self.settings.handler_max_retries => {
                    let delay = backoff(self.settings.retry_backoff_ms, attempt);
                    attempt += 1;
                    warn!(
                        route = %self.route,
                        id = command.target_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Handler failed, retrying: {}", e
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    async fn fail(&self, message: &InboundMessage, reason: RelayError) -> Disposition {
        ConsumerStats::bump(&self.handle.stats.failed);

        match self.settings.failure_policy {
            FailurePolicy::Skip => {
                warn!(topic = %message.topic, offset = message.offset, "Skipping message: {}", reason);
                Disposition::Commit
            }
            FailurePolicy::Halt => {
                error!(topic = %message.topic, offset = message.offset, "Halting consumer: {}", reason);
                Disposition::Halt
            }
            FailurePolicy::DeadLetter => self.dead_letter(message, &reason).await,
        }
    }

    async fn dead_letter(&self, message: &InboundMessage, reason: &RelayError) -> Disposition {
        let Some(publisher) = &self.dead_letters else {
            warn!(topic = %message.topic, offset = message.offset, "No dead-letter publisher, skipping message: {}", reason);
            return Disposition::Commit;
        };

        let mut record = OutboundRecord::new(dead_letter_topic(&message.topic), message.payload.clone())
            .with_header(HEADER_ERROR, reason.to_string())
            .with_header(HEADER_SOURCE_TOPIC, message.topic.clone())
            .with_header(HEADER_SOURCE_PARTITION, message.partition.to_string())
            .with_header(HEADER_SOURCE_OFFSET, message.offset.to_string());
        record.key = message.key.clone();

        match publisher.publish(record).await {
            Ok(receipt) => {
                ConsumerStats::bump(&self.handle.stats.dead_lettered);
                warn!(
                    topic = %message.topic,
                    offset = message.offset,
                    dlq = %receipt.topic,
                    dlq_offset = receipt.offset,
                    "Message dead-lettered: {}", reason
                );
                Disposition::Commit
            }
            Err(e) => {
                // Committing now would lose the message
                error!(topic = %message.topic, offset = message.offset, "Dead-letter publish failed: {}", e);
                Disposition::Halt
            }
        }
    }

    async fn commit(&mut self, message: &InboundMessage) {
        match self.stream.commit(message).await {
            Ok(()) => debug!(topic = %message.topic, offset = message.offset, "Committed"),
            Err(e) => {
                ConsumerStats::bump(&self.handle.stats.commit_failures);
                warn!(topic = %message.topic, offset = message.offset, "Commit failed, message may be redelivered: {}", e);
            }
        }
    }
}

impl fmt::Debug for ConsumerRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerRuntime")
            .field("route", &self.route)
            .field("group", &self.group)
            .field("state", &self.handle.state())
            .finish()
    }
}

/// Exponential backoff: `base * 2^attempt`, capped
pub fn backoff(base_ms: u64, attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(factor).min(RETRY_BACKOFF_CEILING_MS))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
