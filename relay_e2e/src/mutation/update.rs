//! Post update reaches the database

use std::sync::Arc;

use post_relay::relay::{
    EntityKind, FailurePolicy, FieldMap, FieldValue, MutationCommand, Operation, Route,
    StoreHandler,
};

use crate::assertions::assert_field_eventually;
use crate::common::{create_registry, create_relay, TestResult};
use crate::setup::TestContext;

/// Test the update path end to end
///
/// This test:
/// 1. Creates a post directly in the database
/// 2. Registers a post-update consumer under a fresh group
/// 3. Submits a title change through the relay
/// 4. Polls until the new title is visible and content is untouched
pub async fn test_post_update() -> TestResult {
    println!("=== Test: Post Update ===\n");

    let ctx = TestContext::new().await?;
    let mut fields = FieldMap::new();
    fields.insert("title".to_string(), "Old".into());
    fields.insert("content".to_string(), "Body".into());
    let id = ctx.create_row(EntityKind::Post, fields).await?;
    println!("✅ Created post {}", id);

    let route = Route::new(EntityKind::Post, Operation::Update);
    let registry = create_registry(&ctx.config, FailurePolicy::DeadLetter)?;
    let group = ctx.unique_group("post-u");
    registry.register(
        route.topic(),
        &group,
        Arc::new(StoreHandler::new(route, ctx.store.clone())),
    )?;
    println!("✅ Registered consumer (group {})", group);

    let relay = create_relay(&ctx.config)?;
    let title = format!("New {}", ctx.test_id);
    let cmd = MutationCommand::update(EntityKind::Post, id).with_field("title", title.as_str());
    let accepted = relay.submit(EntityKind::Post, Operation::Update, &cmd).await?;
    println!(
        "✅ Accepted on {} [{}] @ {}",
        accepted.receipt.topic, accepted.receipt.partition, accepted.receipt.offset
    );

    let row = assert_field_eventually(
        ctx.store.as_ref(),
        EntityKind::Post,
        id,
        "title",
        FieldValue::from(title),
    )
    .await?;
    if row.fields.get("content") != Some(&FieldValue::from("Body")) {
        return Err("partial update overwrote content".into());
    }
    if row.updated_at.is_none() {
        return Err("updated_at was not set".into());
    }
    println!("✅ Post {} updated", id);

    registry.shutdown(ctx.config.shutdown_timeout()).await;
    relay.close(ctx.config.shutdown_timeout()).await?;
    ctx.cleanup().await?;
    println!("\n✅ Post update test PASSED\n");
    Ok(())
}
