//! Mutation handlers
//!
//! A handler is bound to exactly one route. It applies a decoded command
//! through the `Store` and reports what happened; nothing flows back to the
//! request that published the command.
//!
//! Both operations are idempotent at the storage layer: re-applying an update
//! writes the same values again, and deleting an already-deleted row keeps
//! the original marker. Redelivered messages are therefore harmless.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use super::command::{MutationCommand, Operation, Route};
use super::error::{RelayError, Result};
use super::storage::{Store, StoreAck};

/// Result of applying one command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// The target row does not exist (or is deleted); retrying cannot help
    NotFound,
}

/// Applies decoded commands for one route
#[async_trait]
pub trait MutationHandler: Send + Sync {
    async fn apply(&self, command: &MutationCommand) -> Result<ApplyOutcome>;
}

/// Handler that forwards commands to a `Store`
pub struct StoreHandler {
    route: Route,
    store: Arc<dyn Store>,
}

impl StoreHandler {
    pub fn new(route: Route, store: Arc<dyn Store>) -> Self {
        Self { route, store }
    }

    pub fn route(&self) -> Route {
        self.route
    }
}

#[async_trait]
impl MutationHandler for StoreHandler {
    async fn apply(&self, command: &MutationCommand) -> Result<ApplyOutcome> {
        if command.route() != self.route {
            return Err(RelayError::RejectedInvalid(format!(
                "handler for {} received a {} command",
                self.route,
                command.route()
            )));
        }

        let entity = command.entity;
        let id = command.target_id;
        let ack = match command.operation {
            Operation::Update => self.store.update(entity, id, &command.fields).await?,
            Operation::Delete => self.store.delete(entity, id).await?,
        };

        match ack {
            StoreAck::Applied => {
                match command.operation {
                    Operation::Update => info!(
                        fields = command.fields.len(),
                        "updated {} {}", entity, id
                    ),
                    Operation::Delete => info!("deleted {} {}", entity, id),
                }
                Ok(ApplyOutcome::Applied)
            }
            StoreAck::NotFound => {
                debug!(route = %self.route, id, "Target row not found");
                Ok(ApplyOutcome::NotFound)
            }
        }
    }
}

impl std::fmt::Debug for StoreHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandler")
            .field("route", &self.route)
            .finish()
    }
}

/// One row of the registration table
#[derive(Clone)]
pub struct Binding {
    pub topic: &'static str,
    pub group: &'static str,
    pub handler: Arc<dyn MutationHandler>,
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding")
            .field("topic", &self.topic)
            .field("group", &self.group)
            .finish()
    }
}

/// The backend's registration table: every relayed route bound to `store`
///
/// Order matches the backend's startup order: logs first, then posts.
pub fn standard_bindings(store: Arc<dyn Store>) -> Vec<Binding> {
    let mut routes = Route::ALL;
    routes.sort_by_key(|route| (route.entity.as_str(), route.operation));
    routes
        .into_iter()
        .map(|route| Binding {
            topic: route.topic(),
            group: route.default_group(),
            handler: Arc::new(StoreHandler::new(route, Arc::clone(&store))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::command::EntityKind;
    use crate::testing::mocks::MockStore;
    use mockall::predicate::eq;

    fn post_update() -> Route {
        Route::new(EntityKind::Post, Operation::Update)
    }

    #[tokio::test]
    async fn test_update_calls_store_update() {
        let mut store = MockStore::new();
        store
            .expect_update()
            .withf(|entity, id, fields| {
                *entity == EntityKind::Post && *id == 42 && fields.len() == 1
            })
            .times(1)
            .returning(|_, _, _| Ok(StoreAck::Applied));

        let handler = StoreHandler::new(post_update(), Arc::new(store));
        let cmd = MutationCommand::update(EntityKind::Post, 42).with_field("title", "New");
        assert_eq!(handler.apply(&cmd).await.unwrap(), ApplyOutcome::Applied);
    }

    #[tokio::test]
    async fn test_delete_not_found() {
        let mut store = MockStore::new();
        store
            .expect_delete()
            .with(eq(EntityKind::Log), eq(7))
            .times(1)
            .returning(|_, _| Ok(StoreAck::NotFound));

        let handler = StoreHandler::new(Route::new(EntityKind::Log, Operation::Delete), Arc::new(store));
        let cmd = MutationCommand::delete(EntityKind::Log, 7);
        assert_eq!(handler.apply(&cmd).await.unwrap(), ApplyOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_rejects_command_for_other_route() {
        let store = MockStore::new();
        let handler = StoreHandler::new(post_update(), Arc::new(store));
        let cmd = MutationCommand::delete(EntityKind::Post, 1);
        assert!(matches!(
            handler.apply(&cmd).await,
            Err(RelayError::RejectedInvalid(_))
        ));
    }

    #[tokio::test]
    async fn test_storage_error_propagates() {
        let mut store = MockStore::new();
        store
            .expect_update()
            .returning(|_, _, _| Err(RelayError::Storage("deadlock".into())));

        let handler = StoreHandler::new(post_update(), Arc::new(store));
        let cmd = MutationCommand::update(EntityKind::Post, 1).with_field("title", "x");
        assert!(matches!(
            handler.apply(&cmd).await,
            Err(RelayError::Storage(_))
        ));
    }

    #[test]
    fn test_standard_bindings_table() {
        let bindings = standard_bindings(Arc::new(MockStore::new()));
        let table: Vec<(&str, &str)> = bindings.iter().map(|b| (b.topic, b.group)).collect();
        assert_eq!(
            table,
            vec![
                ("log-update", "log-u"),
                ("log-delete", "log-d"),
                ("post-update", "post-u"),
                ("post-delete", "post-d"),
            ]
        );
    }
}
