//! # Flight Messages
//!
//! Messages exchanged between the [`FlightClient`](super::FlightClient) and the
//! [`FlightActor`](super::FlightActor). Admission is answered with a
//! [`FlightPermit`](super::FlightPermit) through a oneshot channel; the permit itself
//! sends `Release` when it is dropped.

use super::{FlightError, FlightPermit, FlightPolicy};
use tokio::sync::oneshot;

/// Type alias for the one-shot response channel used by the coordinator.
pub type Response<T> = oneshot::Sender<Result<T, FlightError>>;

#[derive(Debug)]
pub enum FlightRequest {
    Acquire {
        key: String,
        policy: FlightPolicy,
        respond_to: Response<FlightPermit>,
    },
    Release {
        key: String,
    },
    InFlight {
        respond_to: Response<Vec<String>>,
    },
}
