//! # Flight Coordinator
//!
//! The [`FlightActor`] tracks which keys currently have an operation in flight and
//! admits at most one holder per key.
//!
//! # Architecture Note
//! The coordinator owns its table and processes messages sequentially in its own task,
//! so admission and release never race and no lock is needed. Waiters for a busy key
//! are queued in arrival order and handed the key directly on release.

use super::client::FlightClient;
use super::message::{FlightRequest, Response};
use super::{FlightError, FlightPermit, FlightPolicy};
use std::collections::{HashMap, VecDeque};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub struct FlightActor {
    receiver: mpsc::UnboundedReceiver<FlightRequest>,
    handle: mpsc::WeakUnboundedSender<FlightRequest>,
    in_flight: HashMap<String, VecDeque<Response<FlightPermit>>>,
}

impl FlightActor {
    /// Creates the coordinator and its client. The coordinator must be run via `.run()`.
    pub fn new() -> (Self, FlightClient) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let actor = Self {
            receiver,
            handle: sender.downgrade(),
            in_flight: HashMap::new(),
        };
        (actor, FlightClient::new(sender))
    }

    /// Processes messages until every client and permit is gone.
    pub async fn run(mut self) {
        info!("Flight coordinator started");
        while let Some(msg) = self.receiver.recv().await {
            match msg {
                FlightRequest::Acquire {
                    key,
                    policy,
                    respond_to,
                } => self.acquire(key, policy, respond_to),
                FlightRequest::Release { key } => self.release(key),
                FlightRequest::InFlight { respond_to } => {
                    let mut keys: Vec<String> = self.in_flight.keys().cloned().collect();
                    keys.sort();
                    let _ = respond_to.send(Ok(keys));
                }
            }
        }
        info!("Flight coordinator stopped");
    }

    fn acquire(&mut self, key: String, policy: FlightPolicy, respond_to: Response<FlightPermit>) {
        match self.in_flight.get_mut(&key) {
            None => {
                debug!(%key, "Admitted");
                self.in_flight.insert(key.clone(), VecDeque::new());
                self.grant(key, respond_to);
            }
            Some(waiters) => match policy {
                FlightPolicy::Reject => {
                    warn!(%key, "Rejected: already in flight");
                    let _ = respond_to.send(Err(FlightError::InProgress(key)));
                }
                FlightPolicy::Wait => {
                    debug!(%key, queued = waiters.len() + 1, "Queued behind in-flight holder");
                    waiters.push_back(respond_to);
                }
            },
        }
    }

    fn release(&mut self, key: String) {
        let next = self.in_flight.get_mut(&key).and_then(VecDeque::pop_front);
        match next {
            Some(waiter) => {
                debug!(%key, "Handing over to next waiter");
                self.grant(key, waiter);
            }
            None => {
                debug!(%key, "Released");
                self.in_flight.remove(&key);
            }
        }
    }

    /// A permit the waiter no longer wants is dropped here and comes back as a release.
    fn grant(&self, key: String, respond_to: Response<FlightPermit>) {
        match self.handle.upgrade() {
            Some(sender) => {
                let _ = respond_to.send(Ok(FlightPermit::new(key, sender)));
            }
            None => {
                let _ = respond_to.send(Err(FlightError::Closed));
            }
        }
    }
}
