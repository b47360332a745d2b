// Backend worker module for post_relay
//
// Runs the backend side of the relay: registers one receive loop per relayed
// route, keeps those loops alive, then stops them on the shutdown signal.
// The binary wires in Kafka and PostgreSQL; tests pass the in-memory broker
// and store.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::relay::constants::SUPERVISE_INTERVAL_MS;
use crate::relay::consumer::{backoff, RuntimeState};
use crate::relay::error::Result;
use crate::relay::handlers::{standard_bindings, Binding};
use crate::relay::publisher::Publisher;
use crate::relay::registry::{ShutdownReport, SubscriptionRegistry};
use crate::relay::source::MessageSource;
use crate::relay::storage::Store;

/// Restart bookkeeping for one binding
#[derive(Debug, Default)]
struct RestartState {
    /// Consecutive restarts without the new loop making progress
    attempts: u32,
    /// Earliest time the next restart may happen
    not_before: Option<Instant>,
}

/// Register every relayed route and run until `shutdown` turns true
///
/// Registration is fail-fast: if any route cannot be registered, the loops
/// already started are stopped and the error is returned. After startup a
/// crashed loop is registered again with exponential backoff, resuming from
/// the group's last committed offset. A closed shutdown channel is treated as
/// a shutdown request.
pub async fn run_consumers(
    config: &Config,
    store: Arc<dyn Store>,
    source: Arc<dyn MessageSource>,
    dead_letters: Option<Arc<dyn Publisher>>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<ShutdownReport> {
    // Step 1: Build the registry with the configured loop settings
    let registry = SubscriptionRegistry::new(source, dead_letters, config.runtime_settings());

    // Step 2: Register the standard table (logs first, then posts)
    let bindings = standard_bindings(store);
    for binding in &bindings {
        if let Err(e) = registry.register(binding.topic, binding.group, binding.handler.clone()) {
            error!("error registering consumer: {}", e);
            let report = registry.shutdown(config.shutdown_timeout()).await;
            warn!(
                stopped = report.stopped,
                timed_out = report.timed_out,
                "Stopped consumers after failed registration"
            );
            return Err(e);
        }
    }
    info!(
        consumers = registry.active_loops(),
        policy = %config.failure_policy,
        "Relay backend started"
    );

    // Step 3: Supervise the loops until the shutdown signal
    let mut restarts: Vec<RestartState> = bindings.iter().map(|_| RestartState::default()).collect();
    let mut ticker = tokio::time::interval(Duration::from_millis(SUPERVISE_INTERVAL_MS));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut total_restarts = 0usize;

    while !*shutdown.borrow() {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = ticker.tick() => {
                total_restarts += supervise(config, &registry, &bindings, &mut restarts);
            }
        }
    }

    // Step 4: Stop the loops, bounded by the shutdown timeout
    info!("Shutdown signal received, stopping consumers");
    let report = registry.shutdown(config.shutdown_timeout()).await;
    info!(
        stopped = report.stopped,
        crashed = report.crashed,
        timed_out = report.timed_out,
        restarts = total_restarts,
        "Relay backend stopped"
    );
    Ok(report)
}

/// One supervision pass; returns how many loops were restarted
fn supervise(
    config: &Config,
    registry: &SubscriptionRegistry,
    bindings: &[Binding],
    restarts: &mut [RestartState],
) -> usize {
    let now = Instant::now();
    let mut restarted = 0;

    for (binding, restart) in bindings.iter().zip(restarts.iter_mut()) {
        match registry.state(binding.topic, binding.group) {
            Some(RuntimeState::Crashed) => {}
            Some(RuntimeState::Running) => {
                // The restarted loop got past whatever crashed it
                if restart.attempts > 0 && made_progress(registry, binding) {
                    restart.attempts = 0;
                }
                continue;
            }
            _ => continue,
        }

        let delay = backoff(config.retry_backoff_ms, restart.attempts);
        let due = *restart.not_before.get_or_insert_with(|| {
            warn!(
                topic = binding.topic,
                group = binding.group,
                attempt = restart.attempts + 1,
                delay_ms = delay.as_millis() as u64,
                "Consumer crashed, scheduling restart"
            );
            now + delay
        });
        if now < due {
            continue;
        }

        restart.attempts = restart.attempts.saturating_add(1);
        match registry.register(binding.topic, binding.group, binding.handler.clone()) {
            Ok(()) => {
                restart.not_before = None;
                restarted += 1;
                info!(
                    topic = binding.topic,
                    group = binding.group,
                    attempt = restart.attempts,
                    "Consumer restarted"
                );
            }
            Err(e) => {
                let retry_in = backoff(config.retry_backoff_ms, restart.attempts);
                restart.not_before = Some(now + retry_in);
                warn!(
                    topic = binding.topic,
                    group = binding.group,
                    attempt = restart.attempts,
                    "Consumer restart failed: {}",
                    e
                );
            }
        }
    }
    restarted
}

fn made_progress(registry: &SubscriptionRegistry, binding: &Binding) -> bool {
    registry
        .stats(binding.topic, binding.group)
        .is_some_and(|stats| stats.applied + stats.not_found + stats.dead_lettered > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::consumer::FailurePolicy;
    use crate::relay::error::RelayError;
    use crate::relay::memory::MemoryBroker;
    use crate::relay::storage::{MemoryStore, StoreAck};
    use crate::testing::mocks::MockStore;
    use crate::testing::mock_config;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_crashed_loop_restarted_and_resumes() {
        let config = Config {
            failure_policy: FailurePolicy::Halt,
            handler_max_retries: 0,
            ..mock_config()
        };
        let calls = Arc::new(AtomicUsize::new(0));
        let mut store = MockStore::new();
        {
            let calls = calls.clone();
            store.expect_delete().returning(move |_, _| {
                match calls.fetch_add(1, Ordering::SeqCst) {
                    0 => Err(RelayError::Storage("connection reset".to_string())),
                    _ => Ok(StoreAck::Applied),
                }
            });
        }

        let broker = MemoryBroker::new();
        broker.append_raw("log-delete", &br#"{"id":"5"}"#[..]);
        broker.append_raw("log-delete", &br#"{"id":"6"}"#[..]);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = {
            let broker = broker.clone();
            tokio::spawn(async move {
                run_consumers(&config, Arc::new(store), Arc::new(broker), None, shutdown_rx).await
            })
        };

        let mut committed = None;
        for _ in 0..300 {
            committed = broker.committed("log-delete", "log-d");
            if committed == Some(2) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(committed, Some(2));
        // First attempt failed, then both messages applied after the restart
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        shutdown_tx.send(true).unwrap();
        let report = worker.await.unwrap().unwrap();
        assert_eq!(report.stopped, 4);
        assert_eq!(report.crashed, 0);
    }

    #[tokio::test]
    async fn test_healthy_loops_not_restarted() {
        let config = mock_config();
        let broker = MemoryBroker::new();
        let registry = SubscriptionRegistry::new(
            Arc::new(broker.clone()),
            None,
            config.runtime_settings(),
        );
        let bindings = standard_bindings(Arc::new(MemoryStore::new()));
        for binding in &bindings {
            registry
                .register(binding.topic, binding.group, binding.handler.clone())
                .unwrap();
        }
        let mut restarts: Vec<RestartState> =
            bindings.iter().map(|_| RestartState::default()).collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(supervise(&config, &registry, &bindings, &mut restarts), 0);
        assert!(restarts.iter().all(|r| r.attempts == 0 && r.not_before.is_none()));

        registry.shutdown(config.shutdown_timeout()).await;
    }
}
