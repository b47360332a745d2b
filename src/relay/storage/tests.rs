// Storage layer tests
//
// MemoryStore is exercised against the full soft-delete contract here.
// PostgresStore needs a live database and is covered by the relay_e2e crate.

#[cfg(test)]
#[allow(clippy::module_inception)]
mod tests {
    use crate::relay::command::{
        EntityKind, FieldMap, FieldValue, MutationCommand, Operation, Route,
    };
    use crate::relay::error::RelayError;
    use crate::relay::handlers::{ApplyOutcome, MutationHandler, StoreHandler};
    use crate::relay::storage::{MemoryStore, Store, StoreAck};
    use crate::testing::mocks::MockStore;
    use mockall::predicate::eq;
    use std::sync::Arc;

    fn fields(pairs: &[(&str, FieldValue)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    // ========== MemoryStore Tests ==========

    #[tokio::test]
    async fn test_create_fills_defaults() {
        let store = MemoryStore::new();
        let id = store
            .create(EntityKind::Post, fields(&[("title", "Hello".into())]))
            .await
            .unwrap();

        let row = store.get(EntityKind::Post, id).await.unwrap().unwrap();
        assert_eq!(row.fields["title"], FieldValue::Text("Hello".into()));
        assert_eq!(row.fields["content"], FieldValue::Text(String::new()));
        assert_eq!(row.fields["user_id"], FieldValue::Integer(0));
        assert!(row.updated_at.is_none());
    }

    #[tokio::test]
    async fn test_ids_are_per_entity() {
        let store = MemoryStore::new();
        let post = store.create(EntityKind::Post, FieldMap::new()).await.unwrap();
        let log = store.create(EntityKind::Log, FieldMap::new()).await.unwrap();
        assert_eq!(post, 1);
        assert_eq!(log, 1);
    }

    #[tokio::test]
    async fn test_update_overwrites_only_given_fields() {
        let store = MemoryStore::new();
        store
            .insert_row(
                EntityKind::Post,
                42,
                fields(&[("title", "Old".into()), ("content", "Body".into())]),
            )
            .unwrap();

        let ack = store
            .update(EntityKind::Post, 42, &fields(&[("title", "New".into())]))
            .await
            .unwrap();
        assert_eq!(ack, StoreAck::Applied);

        let row = store.get(EntityKind::Post, 42).await.unwrap().unwrap();
        assert_eq!(row.fields["title"], FieldValue::Text("New".into()));
        assert_eq!(row.fields["content"], FieldValue::Text("Body".into()));
        assert!(row.updated_at.is_some());
    }

    #[tokio::test]
    async fn test_update_with_empty_string_clears_field() {
        let store = MemoryStore::new();
        store
            .insert_row(EntityKind::Log, 1, fields(&[("message", "boot".into())]))
            .unwrap();

        store
            .update(EntityKind::Log, 1, &fields(&[("message", "".into())]))
            .await
            .unwrap();

        let row = store.get(EntityKind::Log, 1).await.unwrap().unwrap();
        assert_eq!(row.fields["message"], FieldValue::Text(String::new()));
    }

    #[tokio::test]
    async fn test_update_missing_row_is_not_found() {
        let store = MemoryStore::new();
        let ack = store
            .update(EntityKind::Post, 9, &fields(&[("title", "x".into())]))
            .await
            .unwrap();
        assert_eq!(ack, StoreAck::NotFound);
    }

    #[tokio::test]
    async fn test_update_rejects_foreign_column() {
        let store = MemoryStore::new();
        store.insert_row(EntityKind::Log, 1, FieldMap::new()).unwrap();
        let result = store
            .update(EntityKind::Log, 1, &fields(&[("title", "x".into())]))
            .await;
        assert!(matches!(result, Err(RelayError::UnsupportedCommand(_))));
    }

    #[tokio::test]
    async fn test_delete_is_soft_and_idempotent() {
        let store = MemoryStore::new();
        store.insert_row(EntityKind::Log, 7, FieldMap::new()).unwrap();
        store.insert_row(EntityKind::Log, 8, FieldMap::new()).unwrap();

        assert_eq!(
            store.delete(EntityKind::Log, 7).await.unwrap(),
            StoreAck::Applied
        );
        let first_marker = store.raw_row(EntityKind::Log, 7).unwrap().deleted_at;
        assert!(first_marker.is_some());

        assert_eq!(
            store.delete(EntityKind::Log, 7).await.unwrap(),
            StoreAck::Applied
        );
        assert_eq!(
            store.raw_row(EntityKind::Log, 7).unwrap().deleted_at,
            first_marker
        );

        assert!(store.get(EntityKind::Log, 7).await.unwrap().is_none());
        let ids: Vec<i64> = store
            .list(EntityKind::Log)
            .await
            .unwrap()
            .iter()
            .map(|row| row.id)
            .collect();
        assert_eq!(ids, vec![8]);
    }

    #[tokio::test]
    async fn test_update_after_delete_is_not_found() {
        let store = MemoryStore::new();
        store.insert_row(EntityKind::Post, 3, FieldMap::new()).unwrap();
        store.delete(EntityKind::Post, 3).await.unwrap();

        let ack = store
            .update(EntityKind::Post, 3, &fields(&[("title", "zombie".into())]))
            .await
            .unwrap();
        assert_eq!(ack, StoreAck::NotFound);
    }

    #[tokio::test]
    async fn test_delete_missing_row_is_not_found() {
        let store = MemoryStore::new();
        assert_eq!(
            store.delete(EntityKind::Post, 404).await.unwrap(),
            StoreAck::NotFound
        );
    }

    #[tokio::test]
    async fn test_insert_row_advances_id_sequence() {
        let store = MemoryStore::new();
        store.insert_row(EntityKind::Post, 42, FieldMap::new()).unwrap();
        let next = store.create(EntityKind::Post, FieldMap::new()).await.unwrap();
        assert_eq!(next, 43);
    }

    // ========== Handler Over Store Tests ==========

    #[tokio::test]
    async fn test_handler_forwards_exact_update_fields() {
        let expected = fields(&[("user_id", 7i64.into()), ("title", "New".into())]);
        let mut mock = MockStore::new();
        {
            let expected = expected.clone();
            mock.expect_update()
                .withf(move |entity, id, fields| {
                    *entity == EntityKind::Post && *id == 42 && *fields == expected
                })
                .times(1)
                .returning(|_, _, _| Ok(StoreAck::Applied));
        }
        mock.expect_delete().never();

        let handler = StoreHandler::new(
            Route::new(EntityKind::Post, Operation::Update),
            Arc::new(mock),
        );
        let cmd = MutationCommand {
            fields: expected,
            ..MutationCommand::update(EntityKind::Post, 42)
        };
        assert_eq!(handler.apply(&cmd).await.unwrap(), ApplyOutcome::Applied);
    }

    #[tokio::test]
    async fn test_handler_delete_failure_is_retriable() {
        let mut mock = MockStore::new();
        mock.expect_delete()
            .with(eq(EntityKind::Log), eq(7))
            .times(1)
            .returning(|_, _| Err(RelayError::Storage("connection reset".into())));

        let handler = StoreHandler::new(
            Route::new(EntityKind::Log, Operation::Delete),
            Arc::new(mock),
        );
        let err = handler
            .apply(&MutationCommand::delete(EntityKind::Log, 7))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Storage(_)));
        assert!(err.is_retriable());
    }

    #[tokio::test]
    async fn test_handler_over_memory_store_soft_deletes_once() {
        let store = Arc::new(MemoryStore::new());
        store.insert_row(EntityKind::Log, 3, FieldMap::new()).unwrap();
        let handler = StoreHandler::new(
            Route::new(EntityKind::Log, Operation::Delete),
            store.clone(),
        );
        let cmd = MutationCommand::delete(EntityKind::Log, 3);

        assert_eq!(handler.apply(&cmd).await.unwrap(), ApplyOutcome::Applied);
        let marker = store.raw_row(EntityKind::Log, 3).unwrap().deleted_at;
        assert_eq!(handler.apply(&cmd).await.unwrap(), ApplyOutcome::Applied);
        assert_eq!(store.raw_row(EntityKind::Log, 3).unwrap().deleted_at, marker);
        assert_eq!(
            handler.apply(&MutationCommand::delete(EntityKind::Log, 4)).await.unwrap(),
            ApplyOutcome::NotFound
        );
    }
}
