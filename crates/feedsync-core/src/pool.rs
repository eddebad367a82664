//! Pool of file-transfer channels over one lazily created session per endpoint.
//!
//! ```text
//! UNINITIALIZED --(first borrow)--> OPEN --(close_all)--> CLOSED
//!                                     ^                     |
//!                                     +---(next borrow)-----+
//! ```
//!
//! Every mutating operation runs under one lock. Channel setup and teardown
//! happen while holding it, so concurrent borrowers queue behind a connect.
//! A borrow that finds the endpoint at capacity waits on a condition variable
//! until a channel comes back or `borrow_timeout` elapses.
//!
//! The pool is blocking. Async callers go through `tokio::task::spawn_blocking`.

use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::models::RemoteEndpoint;
use crate::traits::{TransferChannel, TransferConnector, TransferSession};

/// Lifecycle state of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Uninitialized,
    Open,
    Closed,
}

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub state: PoolState,
    /// Endpoints with a pool.
    pub endpoints: usize,
    pub idle: usize,
    pub active: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EndpointKey {
    host: String,
    port: u16,
    username: String,
}

impl From<&RemoteEndpoint> for EndpointKey {
    fn from(endpoint: &RemoteEndpoint) -> Self {
        Self {
            host: endpoint.host.clone(),
            port: endpoint.port,
            username: endpoint.username.clone(),
        }
    }
}

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.host, self.port)
    }
}

struct EndpointPool<C: TransferConnector> {
    endpoint: RemoteEndpoint,
    session: Option<C::Session>,
    session_generation: u64,
    idle: Vec<C::Channel>,
    active: usize,
}

impl<C: TransferConnector> EndpointPool<C> {
    fn new(endpoint: &RemoteEndpoint) -> Self {
        Self {
            endpoint: endpoint.clone(),
            session: None,
            session_generation: 0,
            idle: Vec::new(),
            active: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.endpoint.max_connections.max(1)
    }

    /// Reuses the session if connected, otherwise reconnects it.
    ///
    /// Idle channels of a dropped session are discarded.
    fn ensure_session(&mut self, connector: &C, timeout: Duration) -> Result<(), AppError> {
        if self.session.as_ref().is_some_and(|s| s.is_connected()) {
            return Ok(());
        }

        for mut channel in self.idle.drain(..) {
            channel.disconnect();
        }
        if let Some(mut stale) = self.session.take() {
            stale.disconnect();
        }

        let session = connector.connect(&self.endpoint, timeout)?;
        self.session = Some(session);
        self.session_generation += 1;
        info!(
            host = %self.endpoint.host,
            port = self.endpoint.port,
            generation = self.session_generation,
            "Transfer session established"
        );
        Ok(())
    }

    fn open_channel(&mut self, connector: &C, timeout: Duration) -> Result<C::Channel, AppError> {
        self.ensure_session(connector, timeout)?;
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| AppError::TransportError("session missing after connect".to_string()))?;
        let mut channel = session.open_channel()?;
        channel.connect()?;
        debug!(host = %self.endpoint.host, active = self.active, "Opened transfer channel");
        Ok(channel)
    }

    fn shutdown(&mut self) {
        for mut channel in self.idle.drain(..) {
            if channel.is_connected() {
                channel.disconnect();
            }
        }
        if let Some(mut session) = self.session.take() {
            if session.is_connected() {
                session.disconnect();
            }
        }
    }
}

struct PoolInner<C: TransferConnector> {
    state: PoolState,
    epoch: u64,
    pools: HashMap<EndpointKey, EndpointPool<C>>,
}

struct Shared<C: TransferConnector> {
    connector: C,
    connect_timeout: Duration,
    borrow_timeout: Duration,
    inner: Mutex<PoolInner<C>>,
    available: Condvar,
}

impl<C: TransferConnector> Shared<C> {
    fn lock(&self) -> MutexGuard<'_, PoolInner<C>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn release(&self, key: &EndpointKey, epoch: u64, generation: u64, mut channel: C::Channel, reuse: bool) {
        let mut inner = self.lock();
        let current_epoch = inner.epoch;
        match inner.pools.get_mut(key) {
            Some(pool) if epoch == current_epoch => {
                pool.active = pool.active.saturating_sub(1);
                if reuse && generation == pool.session_generation && channel.is_connected() {
                    pool.idle.push(channel);
                } else {
                    channel.disconnect();
                }
            }
            _ => channel.disconnect(),
        }
        drop(inner);
        self.available.notify_all();
    }
}

/// Bounded pool of transfer channels.
///
/// Cloning yields a handle to the same pool.
pub struct ChannelPool<C: TransferConnector> {
    shared: Arc<Shared<C>>,
}

impl<C: TransferConnector> Clone for ChannelPool<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: TransferConnector> fmt::Debug for ChannelPool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelPool").field("stats", &self.stats()).finish()
    }
}

impl<C: TransferConnector> ChannelPool<C> {
    pub fn new(connector: C, connect_timeout: Duration, borrow_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                connector,
                connect_timeout,
                borrow_timeout,
                inner: Mutex::new(PoolInner {
                    state: PoolState::Uninitialized,
                    epoch: 0,
                    pools: HashMap::new(),
                }),
                available: Condvar::new(),
            }),
        }
    }

    /// Borrows a connected channel to `endpoint`.
    ///
    /// Idle channels are checked and reconnected if needed. Fails with
    /// [`AppError::PoolExhausted`] when the endpoint stays at capacity for
    /// `borrow_timeout`, or with the transport error of a failed connect.
    pub fn borrow(&self, endpoint: &RemoteEndpoint) -> Result<PooledChannel<C>, AppError> {
        let key = EndpointKey::from(endpoint);
        let deadline = Instant::now() + self.shared.borrow_timeout;
        let mut inner = self.shared.lock();

        loop {
            if inner.state != PoolState::Open {
                debug!(endpoint = %key, previous = ?inner.state, "Initializing channel pool");
                inner.state = PoolState::Open;
            }
            let epoch = inner.epoch;
            let pool = inner
                .pools
                .entry(key.clone())
                .or_insert_with(|| EndpointPool::new(endpoint));

            pool.ensure_session(&self.shared.connector, self.shared.connect_timeout)?;

            while let Some(mut channel) = pool.idle.pop() {
                if !channel.is_connected() {
                    if let Err(e) = channel.connect() {
                        warn!(endpoint = %key, error = %e, "Discarding idle channel that failed to reconnect");
                        channel.disconnect();
                        continue;
                    }
                }
                pool.active += 1;
                return Ok(self.wrap(key, epoch, pool.session_generation, channel));
            }

            if pool.active < pool.capacity() {
                let channel = pool.open_channel(&self.shared.connector, self.shared.connect_timeout)?;
                pool.active += 1;
                return Ok(self.wrap(key, epoch, pool.session_generation, channel));
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(AppError::PoolExhausted(self.shared.borrow_timeout.as_secs()));
            }
            debug!(endpoint = %key, active = pool.active, "Channel pool at capacity, waiting");
            let (guard, _timeout) = self
                .shared
                .available
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            inner = guard;
        }
    }

    fn wrap(&self, key: EndpointKey, epoch: u64, generation: u64, channel: C::Channel) -> PooledChannel<C> {
        PooledChannel {
            shared: Arc::clone(&self.shared),
            key,
            epoch,
            generation,
            channel: Some(channel),
        }
    }

    /// Gives a healthy channel back to the pool.
    pub fn return_channel(&self, channel: PooledChannel<C>) {
        channel.release(true);
    }

    /// Disconnects a channel and frees its slot. Safe on already disconnected channels.
    pub fn invalidate(&self, channel: PooledChannel<C>) {
        channel.release(false);
    }

    /// Disconnects every idle channel and every session.
    ///
    /// Channels borrowed at that time are disconnected when they come back.
    /// The next borrow reopens the pool.
    pub fn close_all(&self) {
        let mut inner = self.shared.lock();
        for (key, mut pool) in inner.pools.drain() {
            debug!(endpoint = %key, idle = pool.idle.len(), active = pool.active, "Closing channel pool");
            pool.shutdown();
        }
        inner.epoch += 1;
        if inner.state == PoolState::Open {
            info!("Channel pool closed");
        }
        inner.state = PoolState::Closed;
        drop(inner);
        self.shared.available.notify_all();
    }

    pub fn stats(&self) -> PoolStats {
        let inner = self.shared.lock();
        PoolStats {
            state: inner.state,
            endpoints: inner.pools.len(),
            idle: inner.pools.values().map(|p| p.idle.len()).sum(),
            active: inner.pools.values().map(|p| p.active).sum(),
        }
    }
}

/// A channel exclusively held by one borrower.
///
/// Dropping it without [`ChannelPool::return_channel`] invalidates it.
pub struct PooledChannel<C: TransferConnector> {
    shared: Arc<Shared<C>>,
    key: EndpointKey,
    epoch: u64,
    generation: u64,
    channel: Option<C::Channel>,
}

impl<C: TransferConnector> PooledChannel<C> {
    fn release(mut self, reuse: bool) {
        if let Some(channel) = self.channel.take() {
            self.shared
                .release(&self.key, self.epoch, self.generation, channel, reuse);
        }
    }
}

impl<C: TransferConnector> Deref for PooledChannel<C> {
    type Target = C::Channel;

    fn deref(&self) -> &Self::Target {
        // Only `release` takes the channel, and it consumes `self`.
        match self.channel.as_ref() {
            Some(channel) => channel,
            None => unreachable!("pooled channel used after release"),
        }
    }
}

impl<C: TransferConnector> DerefMut for PooledChannel<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self.channel.as_mut() {
            Some(channel) => channel,
            None => unreachable!("pooled channel used after release"),
        }
    }
}

impl<C: TransferConnector> Drop for PooledChannel<C> {
    fn drop(&mut self) {
        if let Some(channel) = self.channel.take() {
            self.shared
                .release(&self.key, self.epoch, self.generation, channel, false);
        }
    }
}

impl<C: TransferConnector> fmt::Debug for PooledChannel<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledChannel")
            .field("endpoint", &self.key.to_string())
            .field("epoch", &self.epoch)
            .field("generation", &self.generation)
            .finish()
    }
}
