//! Simulated downstream services with injected failures.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error("{service} unavailable")]
    Unavailable { service: &'static str },
}

/// A fake service that fails with probability `failure_rate`.
#[derive(Debug, Clone)]
pub struct SimulatedService {
    pub name: &'static str,
    pub failure_rate: f64,
    pub latency: Duration,
    reply: &'static str,
}

impl SimulatedService {
    pub fn new(name: &'static str, reply: &'static str) -> Self {
        Self {
            name,
            failure_rate: 0.0,
            latency: Duration::from_millis(20),
            reply,
        }
    }

    pub fn failing(mut self, failure_rate: f64) -> Self {
        self.failure_rate = failure_rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub async fn call(&self) -> Result<String, ServiceError> {
        tokio::time::sleep(self.latency).await;
        if fastrand::f64() < self.failure_rate {
            tracing::debug!(service = self.name, "Injected failure");
            Err(ServiceError::Unavailable { service: self.name })
        } else {
            Ok(self.reply.to_string())
        }
    }
}

pub fn payment(failure_rate: f64) -> SimulatedService {
    SimulatedService::new("payment", "Payment successful").failing(failure_rate)
}

pub fn stock(failure_rate: f64) -> SimulatedService {
    SimulatedService::new("stock", "Stock available: 42 units").failing(failure_rate)
}

pub fn booking() -> SimulatedService {
    SimulatedService::new("booking", "Booking created")
}

pub fn notification() -> SimulatedService {
    SimulatedService::new("notification", "Email confirmation sent")
}

pub fn orders() -> SimulatedService {
    SimulatedService::new("orders", "3 open orders").with_latency(Duration::from_millis(10))
}
