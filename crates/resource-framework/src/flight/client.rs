//! # Flight Client
//!
//! Cheap-to-clone handle for asking the [`FlightActor`](super::FlightActor) for admission.

use super::message::FlightRequest;
use super::{FlightError, FlightPermit, FlightPolicy};
use tokio::sync::{mpsc, oneshot};

#[derive(Clone)]
pub struct FlightClient {
    sender: mpsc::UnboundedSender<FlightRequest>,
}

impl FlightClient {
    pub fn new(sender: mpsc::UnboundedSender<FlightRequest>) -> Self {
        Self { sender }
    }

    /// Waits for admission under `key`. The key is held until the permit is dropped.
    #[tracing::instrument(skip(self))]
    pub async fn acquire(&self, key: &str, policy: FlightPolicy) -> Result<FlightPermit, FlightError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(FlightRequest::Acquire {
                key: key.to_string(),
                policy,
                respond_to,
            })
            .map_err(|_| FlightError::Closed)?;
        response.await.map_err(|_| FlightError::Dropped)?
    }

    /// Keys currently held, sorted.
    pub async fn in_flight(&self) -> Result<Vec<String>, FlightError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(FlightRequest::InFlight { respond_to })
            .map_err(|_| FlightError::Closed)?;
        response.await.map_err(|_| FlightError::Dropped)?
    }
}
