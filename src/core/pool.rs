// src/core/pool.rs

//! The registry of live connections.

use crate::connection::Connection;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// A concurrent map from connection id to connection.
///
/// Connections are added once when accepted and removed once, either by the
/// lifecycle sweep after their retention window or by a full shutdown. A closed
/// connection stays here until then so its stats can still be queried.
#[derive(Debug, Default)]
pub struct ConnectionPool {
    connections: DashMap<Uuid, Arc<Connection>>,
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, conn: Arc<Connection>) {
        debug!("Adding connection {} ({}) to pool.", conn.id(), conn.address());
        self.connections.insert(conn.id(), conn);
    }

    pub fn remove(&self, id: &Uuid) -> Option<Arc<Connection>> {
        self.connections.remove(id).map(|(_, conn)| conn)
    }

    pub fn get(&self, id: &Uuid) -> Option<Arc<Connection>> {
        self.connections.get(id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.connections.contains_key(id)
    }

    /// Count of entries currently in the pool, closed ones included.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Count of pooled connections that are not closed.
    pub fn active_count(&self) -> usize {
        self.connections
            .iter()
            .filter(|entry| entry.value().is_open())
            .count()
    }

    /// A point-in-time copy of the pooled connections, safe to iterate while the
    /// pool is being modified.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Closes every pooled connection and returns how many were still open.
    pub fn close_all(&self) -> usize {
        self.snapshot()
            .into_iter()
            .filter(|conn| conn.close())
            .count()
    }

    /// Removes every connection from the pool.
    pub fn clear(&self) {
        self.connections.clear();
    }
}
