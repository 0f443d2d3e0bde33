//! Dispatch scheduling - explicit requests, timer ticks and network changes.

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info};

use fieldsync_common::{Error, Result};

use crate::network::{should_attempt_sync, NetworkState};
use crate::queue::{DispatchReport, SyncQueue};

/// Requests understood by the scheduler loop.
#[derive(Debug)]
enum SchedulerRequest {
    /// Run a cycle and send back its report.
    Dispatch(oneshot::Sender<DispatchReport>),
    Shutdown,
}

/// Client side of the scheduler.
#[derive(Clone)]
pub struct DispatchScheduler {
    request_tx: mpsc::Sender<SchedulerRequest>,
}

impl DispatchScheduler {
    /// Create a scheduler firing every `interval`, or only on demand when `None`.
    pub fn new(interval: Option<Duration>) -> (Self, DispatchSchedulerHandle) {
        let (request_tx, request_rx) = mpsc::channel(100);

        let handle = DispatchSchedulerHandle {
            interval,
            request_rx,
            network_rx: None,
        };

        (Self { request_tx }, handle)
    }

    /// Ask for a cycle and wait for its report.
    ///
    /// Requests that arrive while a cycle is running are answered with
    /// the report of that cycle once it finishes.
    pub async fn request_dispatch(&self) -> Result<DispatchReport> {
        let (response_tx, response_rx) = oneshot::channel();

        self.request_tx
            .send(SchedulerRequest::Dispatch(response_tx))
            .await
            .map_err(|_| Error::Scheduler("Scheduler not running".to_string()))?;

        response_rx
            .await
            .map_err(|_| Error::Scheduler("Failed to receive dispatch report".to_string()))
    }

    /// Stop the scheduler loop after the current cycle.
    pub async fn shutdown(&self) {
        let _ = self.request_tx.send(SchedulerRequest::Shutdown).await;
    }
}

/// Handle for the scheduler background task.
pub struct DispatchSchedulerHandle {
    interval: Option<Duration>,
    request_rx: mpsc::Receiver<SchedulerRequest>,
    network_rx: Option<watch::Receiver<NetworkState>>,
}

impl DispatchSchedulerHandle {
    /// Also run a cycle whenever the network becomes ready.
    pub fn with_network_changes(mut self, rx: watch::Receiver<NetworkState>) -> Self {
        self.network_rx = Some(rx);
        self
    }

    /// Run the scheduler loop against `queue`.
    ///
    /// This should be spawned in a tokio task. Returns on shutdown or once
    /// every `DispatchScheduler` has been dropped.
    pub async fn run(mut self, queue: Arc<SyncQueue>) {
        let mut ticker = self.interval.map(|period| {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker
        });
        let mut network_rx = self.network_rx.take();

        info!("Dispatch scheduler started (interval: {:?})", self.interval);

        loop {
            tokio::select! {
                request = self.request_rx.recv() => {
                    match request {
                        Some(SchedulerRequest::Dispatch(response_tx)) => {
                            debug!("Processing dispatch request");
                            let report = queue.run_dispatch_cycle().await;
                            let _ = response_tx.send(report.clone());
                            if self.answer_queued(&report) {
                                break;
                            }
                        }
                        Some(SchedulerRequest::Shutdown) => {
                            info!("Received shutdown request");
                            break;
                        }
                        None => break,
                    }
                }

                _ = Self::wait_for_tick(&mut ticker) => {
                    debug!("Triggering periodic dispatch");
                    queue.run_dispatch_cycle().await;
                }

                change = Self::wait_for_network(&mut network_rx) => {
                    match change {
                        Some(state) if should_attempt_sync(&state) => {
                            debug!("Network ready, triggering dispatch");
                            queue.run_dispatch_cycle().await;
                        }
                        Some(_) => {}
                        None => {
                            debug!("Network notifications closed");
                            network_rx = None;
                        }
                    }
                }
            }
        }

        info!("Dispatch scheduler stopped");
    }

    /// Answer requests queued during a cycle with its report.
    ///
    /// Returns `true` if a shutdown was among them.
    fn answer_queued(&mut self, report: &DispatchReport) -> bool {
        while let Ok(request) = self.request_rx.try_recv() {
            match request {
                SchedulerRequest::Dispatch(response_tx) => {
                    let _ = response_tx.send(report.clone());
                }
                SchedulerRequest::Shutdown => return true,
            }
        }
        false
    }

    async fn wait_for_tick(ticker: &mut Option<Interval>) {
        match ticker {
            Some(ticker) => {
                ticker.tick().await;
            }
            None => pending().await,
        }
    }

    async fn wait_for_network(
        rx: &mut Option<watch::Receiver<NetworkState>>,
    ) -> Option<NetworkState> {
        match rx {
            Some(rx) => match rx.changed().await {
                Ok(()) => Some(*rx.borrow_and_update()),
                Err(_) => None,
            },
            None => pending().await,
        }
    }
}
