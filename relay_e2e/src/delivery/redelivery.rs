//! A halted loop does not lose its message

use async_trait::async_trait;
use std::sync::Arc;

use post_relay::relay::{
    ApplyOutcome, EntityKind, FailurePolicy, FieldMap, FieldValue, MutationCommand,
    MutationHandler, Operation, RelayError, Result, Route, RuntimeState, StoreHandler,
};

use crate::assertions::{assert_field_eventually, eventually};
use crate::common::{create_registry, create_relay, TestResult, APPLY_TIMEOUT};
use crate::setup::TestContext;

/// Handler that refuses every command with a non-retriable error
struct RefusingHandler;

#[async_trait]
impl MutationHandler for RefusingHandler {
    async fn apply(&self, command: &MutationCommand) -> Result<ApplyOutcome> {
        Err(RelayError::Handler(format!(
            "refusing {} {}",
            command.entity, command.target_id
        )))
    }
}

/// Test at-least-once delivery across a halted loop
///
/// This test:
/// 1. Submits an update, then registers a refusing handler with the halt policy
/// 2. Waits for the loop to crash without committing
/// 3. Re-registers the same (topic, group) with a working handler
/// 4. Polls until the update is applied
pub async fn test_redelivery_after_halt() -> TestResult {
    println!("=== Test: Redelivery After Halt ===\n");

    let ctx = TestContext::new().await?;
    let id = ctx.create_row(EntityKind::Post, FieldMap::new()).await?;
    let route = Route::new(EntityKind::Post, Operation::Update);

    let relay = create_relay(&ctx.config)?;
    let title = format!("Redelivered {}", ctx.test_id);
    relay
        .submit(
            EntityKind::Post,
            Operation::Update,
            &MutationCommand::update(EntityKind::Post, id).with_field("title", title.as_str()),
        )
        .await?;

    let mut config = ctx.config.clone();
    config.handler_max_retries = 0;
    let registry = create_registry(&config, FailurePolicy::Halt)?;
    let group = ctx.unique_group("post-u");

    registry.register(route.topic(), &group, Arc::new(RefusingHandler))?;
    let (registry_ref, group_ref) = (&registry, group.as_str());
    let crashed = eventually(APPLY_TIMEOUT, || async move {
        Ok(registry_ref.state(route.topic(), group_ref) == Some(RuntimeState::Crashed))
    })
    .await?;
    if !crashed {
        return Err("refusing handler did not halt the loop".into());
    }
    println!("✅ Loop halted without committing");

    registry.register(
        route.topic(),
        &group,
        Arc::new(StoreHandler::new(route, ctx.store.clone())),
    )?;
    assert_field_eventually(
        ctx.store.as_ref(),
        EntityKind::Post,
        id,
        "title",
        FieldValue::from(title),
    )
    .await?;
    println!("✅ Update applied after re-registration");

    registry.shutdown(ctx.config.shutdown_timeout()).await;
    relay.close(ctx.config.shutdown_timeout()).await?;
    ctx.cleanup().await?;
    println!("\n✅ Redelivery test PASSED\n");
    Ok(())
}
