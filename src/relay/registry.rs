//! Subscription registry
//!
//! Tracks which (topic, group) pairs have a receive loop in this process and
//! refuses to start a second one for the same pair. The check, the broker
//! subscription, the spawn and the insert all happen under one lock, so two
//! concurrent registrations of the same pair cannot both succeed.
//!
//! This guards against double registration at startup only. The broker
//! itself allows any number of groups on a topic, across processes.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::command::Route;
use super::consumer::{ConsumerRuntime, RuntimeHandle, RuntimeSettings, RuntimeState, StatsSnapshot};
use super::error::{RelayError, Result};
use super::handlers::MutationHandler;
use super::publisher::Publisher;
use super::source::MessageSource;

type SubscriptionKey = (String, String);

struct Entry {
    handle: RuntimeHandle,
    task: Option<JoinHandle<RuntimeState>>,
}

impl Entry {
    fn is_live(&self) -> bool {
        let task_running = self.task.as_ref().is_some_and(|task| !task.is_finished());
        task_running && !self.handle.state().is_finished()
    }
}

#[derive(Default)]
struct Entries {
    by_key: HashMap<SubscriptionKey, Entry>,
    closed: bool,
}

/// Outcome of [`SubscriptionRegistry::shutdown`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub stopped: usize,
    pub crashed: usize,
    pub timed_out: usize,
}

/// Process-wide table of live subscriptions
pub struct SubscriptionRegistry {
    source: Arc<dyn MessageSource>,
    dead_letters: Option<Arc<dyn Publisher>>,
    settings: RuntimeSettings,
    entries: Mutex<Entries>,
    shutdown_tx: watch::Sender<bool>,
}

impl SubscriptionRegistry {
    pub fn new(
        source: Arc<dyn MessageSource>,
        dead_letters: Option<Arc<dyn Publisher>>,
        settings: RuntimeSettings,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            source,
            dead_letters,
            settings,
            entries: Mutex::new(Entries::default()),
            shutdown_tx,
        }
    }

    /// Subscribe `group` to `topic` and start a receive loop bound to `handler`
    ///
    /// Must be called from within a tokio runtime. Returns `AlreadyRegistered`
    /// without touching the live loop if the pair is already running. A pair
    /// whose loop has ended may be registered again; the new loop resumes
    /// from the group's last committed offset.
    pub fn register(
        &self,
        topic: &str,
        group: &str,
        handler: Arc<dyn MutationHandler>,
    ) -> Result<()> {
        let route =
            Route::from_topic(topic).ok_or_else(|| RelayError::UnknownTopic(topic.to_string()))?;
        let key = (topic.to_string(), group.to_string());

        let mut entries = self.entries.lock();
        if entries.closed {
            return Err(RelayError::RegistryClosed);
        }

        if let Some(existing) = entries.by_key.get(&key) {
            if existing.is_live() {
                return Err(RelayError::AlreadyRegistered {
                    topic: key.0,
                    group: key.1,
                });
            }
            info!(
                topic,
                group,
                previous = ?existing.handle.state(),
                "Restarting consumer"
            );
        }

        let stream = self.source.subscribe(topic, group)?;
        let runtime = ConsumerRuntime::new(
            route,
            group,
            stream,
            handler,
            self.dead_letters.clone(),
            self.settings.clone(),
        );
        let handle = runtime.handle();
        let task = tokio::spawn(runtime.run(self.shutdown_tx.subscribe()));

        entries.by_key.insert(
            key,
            Entry {
                handle,
                task: Some(task),
            },
        );
        info!(topic, group, "Registered consumer");
        Ok(())
    }

    pub fn state(&self, topic: &str, group: &str) -> Option<RuntimeState> {
        self.with_entry(topic, group, |entry| entry.handle.state())
    }

    pub fn stats(&self, topic: &str, group: &str) -> Option<StatsSnapshot> {
        self.with_entry(topic, group, |entry| entry.handle.stats())
    }

    /// Number of receive loops still running
    pub fn active_loops(&self) -> usize {
        self.entries
            .lock()
            .by_key
            .values()
            .filter(|entry| entry.is_live())
            .count()
    }

    /// Every (topic, group) pair ever registered, sorted
    pub fn subscriptions(&self) -> Vec<(String, String)> {
        let mut keys: Vec<_> = self.entries.lock().by_key.keys().cloned().collect();
        keys.sort();
        keys
    }

    fn with_entry<T>(&self, topic: &str, group: &str, f: impl FnOnce(&Entry) -> T) -> Option<T> {
        self.entries
            .lock()
            .by_key
            .get(&(topic.to_string(), group.to_string()))
            .map(f)
    }

    /// Signal every loop to stop and wait up to `timeout` for them
    ///
    /// Loops still running at the deadline are aborted. Further registrations
    /// fail with `RegistryClosed`.
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        let tasks: Vec<(SubscriptionKey, JoinHandle<RuntimeState>)> = {
            let mut entries = self.entries.lock();
            entries.closed = true;
            entries
                .by_key
                .iter_mut()
                .filter_map(|(key, entry)| entry.task.take().map(|task| (key.clone(), task)))
                .collect()
        };

        let _ = self.shutdown_tx.send(true);
        info!(loops = tasks.len(), "Stopping consumers");

        let deadline = tokio::time::Instant::now() + timeout;
        let mut report = ShutdownReport::default();
        for ((topic, group), mut task) in tasks {
            match tokio::time::timeout_at(deadline, &mut task).await {
                Ok(Ok(RuntimeState::Crashed)) => report.crashed += 1,
                Ok(Ok(_)) => report.stopped += 1,
                Ok(Err(e)) => {
                    warn!(topic = %topic, group = %group, "Consumer task failed: {}", e);
                    report.crashed += 1;
                }
                Err(_) => {
                    warn!(topic = %topic, group = %group, "Consumer did not stop in time, aborting");
                    task.abort();
                    report.timed_out += 1;
                }
            }
        }
        report
    }
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries.lock();
        f.debug_struct("SubscriptionRegistry")
            .field("subscriptions", &entries.by_key.len())
            .field("closed", &entries.closed)
            .finish()
    }
}
