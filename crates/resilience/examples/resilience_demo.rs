// crates/resilience/examples/resilience_demo.rs
//! Demonstration of the resilience pipeline

use serde_json::json;
use shipdesk_resilience::{
    BreakerRegistry, CircuitBreakerConfig, IdempotencyStore, Integration, Limiter,
    ResilienceError, RetryPolicy, StoredOutcome,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

#[tokio::main]
async fn main() {
    env_logger::init();

    println!("Resilience Pipeline Demo");
    println!("========================\n");

    let registry = BreakerRegistry::new(
        CircuitBreakerConfig::new(2, Duration::from_secs(5)).with_success_threshold(1),
    );
    let policy = RetryPolicy::new(2).with_base_delay(Duration::from_millis(50));

    demo_retry(&registry, &policy).await;
    println!();
    demo_circuit_breaker(&registry, &policy).await;
    println!();
    demo_idempotent_batch(&registry, &policy).await;
}

async fn demo_retry(registry: &BreakerRegistry, policy: &RetryPolicy) {
    println!("1. Retry inside the breaker");
    println!("---------------------------");

    let shopify = Integration::new(registry.get("shopify"), policy.clone());
    let attempts = AtomicU32::new(0);

    let result = shopify
        .call(|| async {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            println!("  Attempt {}", n);
            if n < 3 {
                Err(ResilienceError::status(503, "Service Unavailable"))
            } else {
                Ok(json!({ "order": 1001, "hold": "released" }))
            }
        })
        .await;

    match result {
        Ok(order) => println!("✓ Success after retries: {}", order),
        Err(e) => println!("✗ Failed: {}", e),
    }
    println!("  Breaker state: {}", shopify.breaker().state());
}

async fn demo_circuit_breaker(registry: &BreakerRegistry, policy: &RetryPolicy) {
    println!("2. Circuit breaker");
    println!("------------------");

    let dhl = Integration::new(registry.get("dhl"), policy.clone());

    for i in 1..=3 {
        let result: Result<(), _> = dhl
            .call(|| async { Err(ResilienceError::Network("connection refused".into())) })
            .await;
        match result {
            Ok(()) => println!("  Call {}: ok", i),
            Err(e) => println!("  Call {}: {} (breaker {})", i, e, dhl.breaker().state()),
        }
    }
}

async fn demo_idempotent_batch(registry: &BreakerRegistry, policy: &RetryPolicy) {
    println!("3. Idempotent batch under a limiter");
    println!("-----------------------------------");

    let shopify = Integration::new(registry.get("shopify"), policy.clone());
    let store = IdempotencyStore::new();
    let limiter = Limiter::new(2);
    let orders = ["1001", "1002", "1001"];

    let tasks = orders.iter().map(|order| {
        let shopify = &shopify;
        let store = &store;
        move || async move {
            shopify
                .write(store, "shopify_release_hold", order, || async {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok::<_, ResilienceError>(StoredOutcome::new("released", json!(order)))
                })
                .await
        }
    });

    for (order, result) in orders.iter().zip(limiter.run_all(tasks).await) {
        match result {
            Ok(outcome) => println!(
                "  Order {}: {} (deduplicated: {})",
                order, outcome.status, outcome.deduplicated
            ),
            Err(e) => println!("  Order {}: ✗ {}", order, e),
        }
    }
}
