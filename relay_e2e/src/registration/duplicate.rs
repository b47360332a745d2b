//! Duplicate registration is refused

use post_relay::relay::{standard_bindings, FailurePolicy, RelayError};

use crate::common::{create_registry, TestResult};
use crate::setup::TestContext;

/// Register the standard table twice under the same groups
///
/// Every second registration must fail with AlreadyRegistered and leave the
/// first loop running.
pub async fn test_duplicate_registration() -> TestResult {
    println!("=== Test: Duplicate Registration ===\n");

    let ctx = TestContext::new().await?;
    let registry = create_registry(&ctx.config, FailurePolicy::Skip)?;
    let suffix = ctx.unique_group("dup");

    for binding in standard_bindings(ctx.store.clone()) {
        registry.register(
            binding.topic,
            &format!("{}-{}", binding.group, suffix),
            binding.handler,
        )?;
    }
    println!("✅ Registered {} consumers", registry.active_loops());

    for binding in standard_bindings(ctx.store.clone()) {
        let group = format!("{}-{}", binding.group, suffix);
        match registry.register(binding.topic, &group, binding.handler) {
            Err(RelayError::AlreadyRegistered { .. }) => {
                println!("✅ {} refused: consumer for topic '{}' already exists", group, binding.topic)
            }
            Err(e) => return Err(e.into()),
            Ok(()) => return Err(format!("{} registered twice", group).into()),
        }
    }

    if registry.active_loops() != 4 {
        return Err(format!("expected 4 live loops, found {}", registry.active_loops()).into());
    }

    let report = registry.shutdown(ctx.config.shutdown_timeout()).await;
    println!("✅ Stopped {} consumers", report.stopped);
    ctx.cleanup().await?;
    println!("\n✅ Duplicate registration test PASSED\n");
    Ok(())
}
