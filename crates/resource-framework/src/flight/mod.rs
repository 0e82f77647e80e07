//! # Single-Flight Coordination
//!
//! Guarantees that at most one operation per key runs at a time. Callers ask a
//! [`FlightClient`] for admission and receive a [`FlightPermit`]; dropping the permit
//! releases the key, whether the operation succeeded, failed or was abandoned.
//!
//! | Policy | Key busy |
//! |--------|----------|
//! | [`FlightPolicy::Reject`] | fails immediately with [`FlightError::InProgress`] |
//! | [`FlightPolicy::Wait`] | queues until the key is released |

mod actor;
mod client;
mod message;

pub use actor::FlightActor;
pub use client::FlightClient;
pub use message::FlightRequest;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlightPolicy {
    #[default]
    Reject,
    Wait,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum FlightError {
    #[error("{0} is already in flight")]
    InProgress(String),

    #[error("flight coordinator closed")]
    Closed,

    #[error("flight coordinator dropped the request")]
    Dropped,
}

/// Holds a key until dropped.
#[derive(Debug)]
pub struct FlightPermit {
    key: String,
    sender: mpsc::UnboundedSender<FlightRequest>,
}

impl FlightPermit {
    pub(crate) fn new(key: String, sender: mpsc::UnboundedSender<FlightRequest>) -> Self {
        Self { key, sender }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for FlightPermit {
    fn drop(&mut self) {
        let key = std::mem::take(&mut self.key);
        let _ = self.sender.send(FlightRequest::Release { key });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn coordinator() -> FlightClient {
        let (actor, client) = FlightActor::new();
        tokio::spawn(actor.run());
        client
    }

    #[tokio::test]
    async fn second_holder_is_rejected_until_release() {
        let flights = coordinator();
        let permit = flights.acquire("acme/api", FlightPolicy::Reject).await.unwrap();
        assert_eq!(
            flights.acquire("acme/api", FlightPolicy::Reject).await.unwrap_err(),
            FlightError::InProgress("acme/api".into())
        );
        assert!(flights.acquire("acme/other", FlightPolicy::Reject).await.is_ok());

        drop(permit);
        assert!(flights.acquire("acme/api", FlightPolicy::Reject).await.is_ok());
    }

    #[tokio::test]
    async fn waiter_is_admitted_when_the_holder_finishes() {
        let flights = coordinator();
        let permit = flights.acquire("acme/api", FlightPolicy::Wait).await.unwrap();

        let waiter = {
            let flights = flights.clone();
            tokio::spawn(async move { flights.acquire("acme/api", FlightPolicy::Wait).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(permit);
        let handed_over = waiter.await.unwrap().unwrap();
        assert_eq!(handed_over.key(), "acme/api");
        assert_eq!(flights.in_flight().await.unwrap(), vec!["acme/api".to_string()]);
    }

    #[tokio::test]
    async fn abandoned_waiters_do_not_hold_the_key() {
        let flights = coordinator();
        let permit = flights.acquire("acme/api", FlightPolicy::Wait).await.unwrap();
        let abandoned = {
            let flights = flights.clone();
            tokio::spawn(async move { flights.acquire("acme/api", FlightPolicy::Wait).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        abandoned.abort();
        let _ = abandoned.await;

        drop(permit);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(flights.in_flight().await.unwrap().is_empty());
    }
}
