//! Log delete hides the row

use std::sync::Arc;

use post_relay::relay::{
    EntityKind, FailurePolicy, FieldMap, MutationCommand, Operation, Route, StoreHandler,
};

use crate::assertions::assert_deleted_eventually;
use crate::common::{create_registry, create_relay, TestResult};
use crate::setup::TestContext;

/// Test the soft-delete path end to end
pub async fn test_log_delete() -> TestResult {
    println!("=== Test: Log Delete ===\n");

    let ctx = TestContext::new().await?;
    let mut fields = FieldMap::new();
    fields.insert("message".to_string(), format!("e2e {}", ctx.test_id).into());
    let id = ctx.create_row(EntityKind::Log, fields).await?;
    println!("✅ Created log {}", id);

    let route = Route::new(EntityKind::Log, Operation::Delete);
    let registry = create_registry(&ctx.config, FailurePolicy::DeadLetter)?;
    registry.register(
        route.topic(),
        &ctx.unique_group("log-d"),
        Arc::new(StoreHandler::new(route, ctx.store.clone())),
    )?;

    let relay = create_relay(&ctx.config)?;
    relay
        .submit(
            EntityKind::Log,
            Operation::Delete,
            &MutationCommand::delete(EntityKind::Log, id),
        )
        .await?;

    assert_deleted_eventually(ctx.store.as_ref(), EntityKind::Log, id).await?;
    println!("✅ Log {} hidden from get and list", id);

    registry.shutdown(ctx.config.shutdown_timeout()).await;
    relay.close(ctx.config.shutdown_timeout()).await?;
    ctx.cleanup().await?;
    println!("\n✅ Log delete test PASSED\n");
    Ok(())
}
