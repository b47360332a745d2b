//! post_relay E2E Test Suite Orchestrator
//!
//! Runs the suites in order:
//! 1. Mutation tests (the relay path must work first)
//! 2. Registration tests
//! 3. Delivery tests (failure handling)
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p relay_e2e --release
//! ```
//!
//! ## Exit Codes
//!
//! - 0: All tests passed
//! - 1: One or more tests failed, or the environment is not ready

use relay_e2e::setup::{verify_broker_ready, verify_database_ready};
use relay_e2e::{
    test_dead_letter, test_duplicate_registration, test_log_delete, test_post_update,
    test_redelivery_after_halt,
};

/// Test suite result tracking
struct TestSuiteResults {
    passed: usize,
    failed: usize,
    results: Vec<(&'static str, &'static str, bool)>, // (category, name, passed)
}

impl TestSuiteResults {
    fn new() -> Self {
        Self {
            passed: 0,
            failed: 0,
            results: Vec::new(),
        }
    }

    fn record(&mut self, category: &'static str, name: &'static str, passed: bool) {
        if passed {
            self.passed += 1;
        } else {
            self.failed += 1;
        }
        self.results.push((category, name, passed));
    }

    fn print_summary(&self) {
        println!("\n{}", "=".repeat(60));
        println!("TEST SUITE SUMMARY");
        println!("{}\n", "=".repeat(60));

        let mut current_category = "";
        for (category, name, passed) in &self.results {
            if *category != current_category {
                if !current_category.is_empty() {
                    println!();
                }
                println!("{}:", category);
                current_category = category;
            }
            let status = if *passed { "✅ PASSED" } else { "❌ FAILED" };
            println!("  {} - {}", name, status);
        }

        println!("\n{}", "-".repeat(60));
        println!(
            "Total: {} passed, {} failed, {} total",
            self.passed,
            self.failed,
            self.passed + self.failed
        );
    }
}

/// Run a single test and record the result
macro_rules! run_test {
    ($results:expr, $category:expr, $name:expr, $test_fn:expr) => {{
        let result = $test_fn.await;
        let passed = result.is_ok();
        if let Err(e) = &result {
            println!("❌ Test failed: {}", e);
        }
        $results.record($category, $name, passed);
        passed
    }};
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║           post_relay E2E Test Suite                        ║");
    println!("╚════════════════════════════════════════════════════════════╝\n");

    if let Err(e) = verify_broker_ready().await {
        eprintln!("❌ Kafka broker not reachable: {}", e);
        std::process::exit(1);
    }
    if let Err(e) = verify_database_ready().await {
        eprintln!("❌ Database not ready: {}", e);
        std::process::exit(1);
    }

    let mut results = TestSuiteResults::new();

    // ==================== MUTATION TESTS ====================
    println!("┌────────────────────────────────────────────────────────────┐");
    println!("│ MUTATION TESTS                                             │");
    println!("└────────────────────────────────────────────────────────────┘\n");

    run_test!(results, "Mutation", "Post Update", test_post_update());
    run_test!(results, "Mutation", "Log Delete", test_log_delete());

    // ==================== REGISTRATION TESTS ====================
    println!("┌────────────────────────────────────────────────────────────┐");
    println!("│ REGISTRATION TESTS                                         │");
    println!("└────────────────────────────────────────────────────────────┘\n");

    run_test!(
        results,
        "Registration",
        "Duplicate Registration",
        test_duplicate_registration()
    );

    // ==================== DELIVERY TESTS ====================
    println!("┌────────────────────────────────────────────────────────────┐");
    println!("│ DELIVERY TESTS                                             │");
    println!("└────────────────────────────────────────────────────────────┘\n");

    run_test!(results, "Delivery", "Dead Letter", test_dead_letter());
    run_test!(
        results,
        "Delivery",
        "Redelivery After Halt",
        test_redelivery_after_halt()
    );

    // ==================== SUMMARY ====================
    results.print_summary();

    if results.failed > 0 {
        std::process::exit(1);
    }

    Ok(())
}
