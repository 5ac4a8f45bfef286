//! One function per pattern, each driving the engine against simulated services.

use futures_util::future::{FutureExt, LocalBoxFuture};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use resilience_engine::{
    Aggregator, Chain, EngineConfig, Gateway, Outcome, ResilienceEngine, ResilienceError,
    ResilienceResult,
};

use crate::demo::services::{self, ServiceError};

type DemoResult = Result<(), Box<dyn std::error::Error>>;

fn describe(error: &ResilienceError<ServiceError>) -> String {
    match error {
        ResilienceError::CircuitOpen { retry_after, .. } => {
            format!("circuit open, retry in {}ms", retry_after.as_millis())
        }
        other => other.to_string(),
    }
}

/// Order service calling a flaky payment service with a fallback.
pub async fn circuit_breaker(engine: &ResilienceEngine, calls: u32, failure_rate: f64) -> DemoResult {
    let payment = services::payment(failure_rate);

    for i in 1..=calls {
        let result = engine
            .call_with_fallback(
                "payment",
                || payment.call(),
                |error| {
                    Ok(format!(
                        "Payment temporarily unavailable, order saved for retry ({})",
                        describe(&error)
                    ))
                },
            )
            .await?;
        let state = engine
            .snapshot("payment")
            .map(|s| s.circuit.state.as_str())
            .unwrap_or("unknown");
        println!("[{i:>2}] circuit={state:<9} {result}");
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    Ok(())
}

/// Product service retrying a stock lookup that times out now and then.
pub async fn retry(engine: &ResilienceEngine, failure_rate: f64) -> DemoResult {
    let stock = services::stock(failure_rate);
    let attempts = AtomicU32::new(0);

    let result = engine
        .call("stock", || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            println!("Calling stock service, attempt {attempt}");
            stock.call()
        })
        .await;

    let attempts = attempts.load(Ordering::SeqCst);
    match result {
        Ok(reply) => println!("Product details: {reply} (after {attempts} attempts)"),
        Err(error) => println!("Stock lookup failed after {attempts} attempts: {}", describe(&error)),
    }
    Ok(())
}

/// Booking → Payment → Notification.
pub async fn chain(engine: &ResilienceEngine, payment_failure_rate: f64) -> DemoResult {
    let booking = services::booking();
    let payment = services::payment(payment_failure_rate);
    let notification = services::notification();

    let chain = Chain::<String, ServiceError>::start(engine, "Booking request".to_string())
        .then("booking", |request| {
            let svc = &booking;
            async move { svc.call().await.map(|reply| format!("{request} → {reply}")) }
        })
        .await
        .then("payment", |so_far| {
            let svc = &payment;
            async move { svc.call().await.map(|reply| format!("{so_far} → {reply}")) }
        })
        .await
        .then("notification", |so_far| {
            let svc = &notification;
            async move { svc.call().await.map(|reply| format!("{so_far} → {reply}")) }
        })
        .await;

    if let Some(step) = chain.failed_at() {
        println!("Chain stopped at {step} after {:?}", chain.completed());
    }
    match chain.finish() {
        Ok(summary) => println!("{summary}"),
        Err(error) => println!("Booking failed: {}", describe(&error)),
    }
    Ok(())
}

/// Dashboard merging orders and stock, fetched concurrently.
pub async fn aggregate(engine: &ResilienceEngine, stock_failure_rate: f64) -> DemoResult {
    let orders = services::orders();
    let stock = services::stock(stock_failure_rate).with_latency(Duration::from_millis(50));

    let mut calls: BTreeMap<&str, LocalBoxFuture<'_, ResilienceResult<String, ServiceError>>> =
        BTreeMap::new();
    calls.insert("orders", engine.call("orders", || orders.call()).boxed_local());
    calls.insert("stock", engine.call("stock", || stock.call()).boxed_local());

    let result = Aggregator::from_config(&engine.config().aggregate)
        .aggregate(calls)
        .await;

    let parts: Vec<String> = result
        .slots()
        .iter()
        .map(|(key, slot)| match &slot.outcome {
            Outcome::Success(value) => format!("{key}: {value}"),
            Outcome::Failure(error) => format!("{key}: unavailable ({})", describe(error)),
            Outcome::Timeout(after) => format!("{key}: timed out after {}ms", after.as_millis()),
        })
        .collect();
    println!("Dashboard → {} ({}ms)", parts.join(" | "), result.elapsed().as_millis());
    Ok(())
}

/// Gateway throttling one user.
pub fn rate_limit(config: &EngineConfig, user: &str, requests: u32) -> DemoResult {
    let gateway = Gateway::new(&config.gateway);
    for i in 1..=requests {
        println!("[{i:>2}] {}", gateway.handle(user));
    }
    Ok(())
}

/// Order service with retry and circuit breaker on payment.
pub async fn combined(engine: &ResilienceEngine, orders: u32, failure_rate: f64) -> DemoResult {
    let payment = services::payment(failure_rate);

    for i in 1..=orders {
        let result = engine
            .call_with_fallback(
                "payment",
                || payment.call(),
                |_| Ok("Payment service down, order queued.".to_string()),
            )
            .await?;
        println!("Order {i}: {result}");
    }
    Ok(())
}

/// Exercise a few targets and print their status as JSON.
pub async fn status(engine: &ResilienceEngine) -> DemoResult {
    let payment = services::payment(0.5);
    let stock = services::stock(0.2);
    for _ in 0..5 {
        let _ = engine.call("payment", || payment.call()).await;
        let _ = engine.call("stock", || stock.call()).await;
    }
    println!("{}", serde_json::to_string_pretty(&engine.snapshots())?);
    Ok(())
}
