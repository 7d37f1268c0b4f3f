// src/core/events.rs

//! Defines the event bus that fans errors and newly accepted connections out to
//! the application.
//!
//! Both channels are bounded and a send waits while a channel is full, so a slow
//! consumer applies backpressure to the producer. Every send is raced against the
//! shutdown token, and `close` drops the senders, which ends both streams once
//! in-flight sends have finished.

use crate::connection::Connection;
use crate::core::LineWireError;
use crate::core::metrics;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// The receiving ends handed to the application.
#[derive(Debug)]
pub struct EventReceivers {
    pub errors: Receiver<LineWireError>,
    pub connections: Receiver<Arc<Connection>>,
}

/// Distribution hub for error events and connection announcements.
#[derive(Debug)]
pub struct EventBus {
    error_tx: RwLock<Option<Sender<LineWireError>>>,
    connection_tx: RwLock<Option<Sender<Arc<Connection>>>>,
    suppress_errors: bool,
    error_prefix: String,
    shutdown: CancellationToken,
}

impl EventBus {
    /// Creates a new `EventBus` and returns the receivers for the application.
    pub fn new(
        capacity: usize,
        suppress_errors: bool,
        error_prefix: impl Into<String>,
        shutdown: CancellationToken,
    ) -> (Self, EventReceivers) {
        let capacity = capacity.max(1);
        let (error_tx, errors) = mpsc::channel(capacity);
        let (connection_tx, connections) = mpsc::channel(capacity);

        let bus = Self {
            error_tx: RwLock::new(Some(error_tx)),
            connection_tx: RwLock::new(Some(connection_tx)),
            suppress_errors,
            error_prefix: error_prefix.into(),
            shutdown,
        };

        (bus, EventReceivers { errors, connections })
    }

    /// Adds the configured prefix to an error.
    pub fn format_error(&self, error: LineWireError) -> LineWireError {
        if self.error_prefix.is_empty() {
            error
        } else {
            error.context(self.error_prefix.clone())
        }
    }

    /// Reports an error to the error stream, prefixed with the component name.
    ///
    /// With suppression enabled, or once the bus is shut down, the error is only logged.
    pub async fn report(&self, error: LineWireError) {
        metrics::ERRORS_TOTAL.inc();
        let error = self.format_error(error);

        if self.suppress_errors {
            debug!("Suppressed error: {}", error);
            return;
        }

        let Some(tx) = self.error_tx.read().clone() else {
            debug!("Error reported after shutdown: {}", error);
            return;
        };
        if self.shutdown.is_cancelled() {
            debug!("Error reported during shutdown: {}", error);
            return;
        }

        let description = error.to_string();
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {
                debug!("Dropping error event during shutdown: {}", description);
            }
            res = tx.send(error) => {
                if let Err(e) = res {
                    warn!("Error stream receiver is gone, dropping: {}", e.0);
                }
            }
        }
    }

    /// Announces a newly accepted connection. Returns `false` if it could not be delivered.
    pub async fn announce(&self, conn: Arc<Connection>) -> bool {
        let Some(tx) = self.connection_tx.read().clone() else {
            return false;
        };
        if self.shutdown.is_cancelled() {
            return false;
        }

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => false,
            res = tx.send(conn) => res.is_ok(),
        }
    }

    /// Drops both senders. Must only run after every producer has been told to stop.
    pub fn close(&self) {
        self.error_tx.write().take();
        self.connection_tx.write().take();
        debug!("Event bus closed.");
    }

    pub fn is_closed(&self) -> bool {
        self.error_tx.read().is_none()
    }

    pub fn suppresses_errors(&self) -> bool {
        self.suppress_errors
    }
}
