//! Malformed payloads are dead-lettered

use std::sync::Arc;

use post_relay::relay::{
    EntityKind, FailurePolicy, KafkaSource, MessageSource, MessageStream, Operation,
    OutboundRecord, Publisher, Route, StoreHandler,
};

use crate::common::{create_publisher, create_registry, TestResult, APPLY_TIMEOUT};
use crate::setup::TestContext;

/// Test that a payload which cannot be decoded lands on `{topic}.dlq`
///
/// This test:
/// 1. Publishes raw bytes that are not an envelope to post-delete
/// 2. Registers a post-delete consumer with the dead-letter policy
/// 3. Reads post-delete.dlq until the same bytes show up
pub async fn test_dead_letter() -> TestResult {
    println!("=== Test: Dead Letter ===\n");

    let ctx = TestContext::new().await?;
    let route = Route::new(EntityKind::Post, Operation::Delete);
    let garbage = format!("not an envelope {}", ctx.test_id);

    let publisher = create_publisher(&ctx.config)?;
    publisher
        .publish(OutboundRecord::new(
            route.topic(),
            garbage.clone().into_bytes().into(),
        ))
        .await?;
    println!("✅ Published malformed payload to {}", route.topic());

    let registry = create_registry(&ctx.config, FailurePolicy::DeadLetter)?;
    registry.register(
        route.topic(),
        &ctx.unique_group("post-d"),
        Arc::new(StoreHandler::new(route, ctx.store.clone())),
    )?;

    let source = KafkaSource::new(ctx.config.source_config());
    let mut dlq = source.subscribe(&route.dead_letter_topic(), &ctx.unique_group("dlq-reader"))?;
    let found = tokio::time::timeout(APPLY_TIMEOUT, async {
        loop {
            let message = dlq.next().await?;
            if message.payload.as_ref() == garbage.as_bytes() {
                return Ok::<_, post_relay::RelayError>(message.offset);
            }
        }
    })
    .await
    .map_err(|_| format!("payload never reached {}", route.dead_letter_topic()))??;
    println!("✅ Found payload on {} @ {}", route.dead_letter_topic(), found);

    registry.shutdown(ctx.config.shutdown_timeout()).await;
    publisher.close(ctx.config.shutdown_timeout()).await?;
    ctx.cleanup().await?;
    println!("\n✅ Dead letter test PASSED\n");
    Ok(())
}
