//! Per-endpoint connection pool
//!
//! Each endpoint owns a bounded list of slots. A slot is either idle (holds a
//! parked connection) or reserved-empty (counted against the cap while its
//! connection is checked out or still being established). Requests that find
//! the endpoint full wait in that endpoint's FIFO queue and are handed the
//! next connection released for the same endpoint.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::pool::endpoint::EndpointKey;
use crate::transport::{Connection, Session, TransportError, TransportOp};

/// Continuation resumed when a connection for its endpoint becomes available.
///
/// It receives an error only when the pool tried to open a fresh connection
/// on its behalf and the transport refused.
pub type Waiter = Box<dyn FnOnce(Result<Connection, TransportError>) + Send>;

/// Outcome of asking the pool for a connection.
#[derive(Debug)]
pub enum Acquire {
    /// An idle connection was detached from its slot.
    Existing(Connection),
    /// A new slot was reserved and a connection established for it.
    Opened(Connection),
    /// A new slot was reserved but the transport failed to connect.
    Failed(TransportError),
    /// The endpoint is at capacity.
    MustWait,
}

/// Result of [`ConnectionPool::acquire_or_queue`].
pub enum Checkout<W> {
    /// Resume the returned waiter with this outcome.
    Ready(Result<Connection, TransportError>, W),
    /// The waiter was queued and will be resumed by a later release.
    Queued,
}

/// Snapshot of one endpoint's bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub slots: usize,
    pub idle: usize,
    pub waiters: usize,
}

#[derive(Default)]
struct Partition {
    slots: Vec<Option<Connection>>,
    waiters: VecDeque<Waiter>,
}

enum Reservation {
    Idle(Connection),
    Reserved,
    Full,
}

pub struct ConnectionPool {
    session: Arc<dyn Session>,
    max_per_endpoint: usize,
    partitions: Mutex<HashMap<EndpointKey, Partition>>,
}

impl ConnectionPool {
    pub fn new(session: Arc<dyn Session>, max_per_endpoint: usize) -> Self {
        Self {
            session,
            max_per_endpoint: max_per_endpoint.max(1),
            partitions: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_per_endpoint(&self) -> usize {
        self.max_per_endpoint
    }

    /// Detaches an idle connection, or opens a new one if the endpoint is
    /// below its cap. Never queues.
    pub fn acquire(&self, key: &EndpointKey) -> Acquire {
        let reservation = Self::reserve(
            self.lock().entry(key.clone()).or_default(),
            self.max_per_endpoint,
        );
        self.complete(key, reservation)
    }

    /// Acquire-or-queue under a single lock hold, so no release can slip in
    /// between a full answer and the enqueue.
    ///
    /// When a connection (or a connect failure) is available right away the
    /// waiter is handed back unqueued for the caller to resume.
    pub fn acquire_or_queue<W>(&self, key: &EndpointKey, waiter: W) -> Checkout<W>
    where
        W: FnOnce(Result<Connection, TransportError>) + Send + 'static,
    {
        let reservation = {
            let mut partitions = self.lock();
            let partition = partitions.entry(key.clone()).or_default();

            match Self::reserve(partition, self.max_per_endpoint) {
                Reservation::Full => {
                    partition.waiters.push_back(Box::new(waiter));
                    tracing::debug!(
                        endpoint = %key,
                        waiters = partition.waiters.len(),
                        "Endpoint at capacity, request queued"
                    );
                    return Checkout::Queued;
                }
                reservation => reservation,
            }
        };

        let outcome = match reservation {
            Reservation::Idle(connection) => Ok(connection),
            _ => self.connect_reserved(key),
        };

        Checkout::Ready(outcome, waiter)
    }

    /// Appends a waiter to the endpoint's queue.
    pub fn queue_waiter(&self, key: &EndpointKey, waiter: Waiter) {
        self.lock()
            .entry(key.clone())
            .or_default()
            .waiters
            .push_back(waiter);
    }

    /// Returns a checked-out connection. The oldest waiter for `key` gets it
    /// directly; otherwise it is parked in a reserved slot.
    pub fn release(&self, key: &EndpointKey, connection: Connection) {
        let mut partitions = self.lock();
        let Some(partition) = partitions.get_mut(key) else {
            drop(partitions);
            tracing::warn!(endpoint = %key, "Released connection for unknown endpoint, closing");
            self.session.close_connection(connection);
            return;
        };

        if let Some(waiter) = partition.waiters.pop_front() {
            drop(partitions);
            tracing::trace!(endpoint = %key, "Handing released connection to waiter");
            waiter(Ok(connection));
            return;
        }

        match partition.slots.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => {
                *slot = Some(connection);
                tracing::trace!(endpoint = %key, "Connection parked");
            }
            None => {
                drop(partitions);
                tracing::warn!(endpoint = %key, "No reserved slot for released connection, closing");
                self.session.close_connection(connection);
            }
        }
    }

    pub fn stats(&self, key: &EndpointKey) -> PoolStats {
        self.lock()
            .get(key)
            .map(|p| PoolStats {
                slots: p.slots.len(),
                idle: p.slots.iter().filter(|s| s.is_some()).count(),
                waiters: p.waiters.len(),
            })
            .unwrap_or_default()
    }

    /// Number of endpoints with live bookkeeping. Endpoints whose slots and
    /// waiters are all gone are forgotten.
    pub fn endpoints(&self) -> usize {
        self.lock().len()
    }

    fn complete(&self, key: &EndpointKey, reservation: Reservation) -> Acquire {
        match reservation {
            Reservation::Idle(connection) => Acquire::Existing(connection),
            Reservation::Full => Acquire::MustWait,
            Reservation::Reserved => match self.connect_reserved(key) {
                Ok(connection) => Acquire::Opened(connection),
                Err(e) => Acquire::Failed(e),
            },
        }
    }

    fn connect_reserved(&self, key: &EndpointKey) -> Result<Connection, TransportError> {
        self.session.connect(key).inspect_err(|e| {
            tracing::warn!(endpoint = %key, error = %e, "Failed to open connection");
            self.give_back(key);
        })
    }

    fn reserve(partition: &mut Partition, max: usize) -> Reservation {
        if let Some(connection) = partition.slots.iter_mut().find_map(Option::take) {
            return Reservation::Idle(connection);
        }

        if partition.slots.len() < max {
            partition.slots.push(None);
            return Reservation::Reserved;
        }

        Reservation::Full
    }

    /// Gives back a reserved slot whose connect failed. A queued waiter
    /// inherits the reservation and gets a fresh connect attempt instead.
    fn give_back(&self, key: &EndpointKey) {
        loop {
            let waiter = {
                let mut partitions = self.lock();
                let Some(partition) = partitions.get_mut(key) else {
                    return;
                };

                match partition.waiters.pop_front() {
                    Some(waiter) => waiter,
                    None => {
                        if let Some(pos) = partition.slots.iter().position(Option::is_none) {
                            partition.slots.remove(pos);
                        }
                        if partition.slots.is_empty() {
                            partitions.remove(key);
                        }
                        return;
                    }
                }
            };

            match self.session.connect(key) {
                Ok(connection) => {
                    waiter(Ok(connection));
                    return;
                }
                Err(e) => {
                    tracing::warn!(endpoint = %key, error = %e, "Failed to open connection for waiter");
                    waiter(Err(e));
                }
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<EndpointKey, Partition>> {
        self.partitions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        let partitions = std::mem::take(
            self.partitions
                .get_mut()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );

        for (key, partition) in partitions {
            let idle: Vec<Connection> = partition.slots.into_iter().flatten().collect();
            if !idle.is_empty() {
                tracing::debug!(endpoint = %key, idle = idle.len(), "Closing idle connections");
            }
            for connection in idle {
                self.session.close_connection(connection);
            }

            for waiter in partition.waiters {
                waiter(Err(TransportError::new(TransportOp::Unknown, 0)));
            }
        }
    }
}
