//! System-wide operation registry with cooperative suspend.
//!
//! Every index run registers itself as a non-suspendable operation. While the
//! strategy blocks on the distributed run it marks its operation suspendable,
//! which lets an operator suspend the system without waiting for long exports
//! to finish. A suspend is refused while any non-suspendable operation runs.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;

use crate::error::AppError;

/// Identifier of a registered operation.
pub type OperationId = u64;

tokio::task_local! {
    /// Operation owning the current task, set by the orchestrator around a run.
    pub static CURRENT_OPERATION: OperationId;
}

#[derive(Debug)]
struct OperationEntry {
    name: String,
    suspendable: bool,
}

#[derive(Debug, Default)]
struct Registry {
    next_id: OperationId,
    operations: BTreeMap<OperationId, OperationEntry>,
}

/// Shared registry of running operations and the suspended flag.
///
/// Cloning yields a handle to the same registry.
#[derive(Debug, Clone)]
pub struct SystemState {
    registry: Arc<Mutex<Registry>>,
    suspended: Arc<watch::Sender<bool>>,
}

impl Default for SystemState {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemState {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            suspended: Arc::new(tx),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers a non-suspendable operation. It is removed when the guard drops.
    pub fn register(&self, name: impl Into<String>) -> OperationGuard {
        let mut registry = self.lock();
        registry.next_id += 1;
        let id = registry.next_id;
        registry.operations.insert(
            id,
            OperationEntry {
                name: name.into(),
                suspendable: false,
            },
        );
        OperationGuard {
            state: self.clone(),
            id,
        }
    }

    /// Sets the suspendable flag of an operation, returning the previous value.
    ///
    /// Returns `None` if the operation is not registered.
    pub fn set_suspendable(&self, id: OperationId, suspendable: bool) -> Option<bool> {
        let mut registry = self.lock();
        registry
            .operations
            .get_mut(&id)
            .map(|entry| std::mem::replace(&mut entry.suspendable, suspendable))
    }

    /// Marks the operation of the current task suspendable until the returned
    /// scope drops, then restores the previous flag.
    ///
    /// Outside of a registered operation this is a no-op scope.
    pub fn suspendable_scope(&self) -> SuspendableScope {
        let id = CURRENT_OPERATION.try_with(|id| *id).ok();
        let previous = id.and_then(|id| self.set_suspendable(id, true));
        SuspendableScope {
            state: self.clone(),
            restore: id.zip(previous),
        }
    }

    /// Names of the operations currently preventing a suspend.
    pub fn blocking_operations(&self) -> Vec<String> {
        self.lock()
            .operations
            .values()
            .filter(|entry| !entry.suspendable)
            .map(|entry| entry.name.clone())
            .collect()
    }

    pub fn running_operations(&self) -> usize {
        self.lock().operations.len()
    }

    /// Suspends the system.
    ///
    /// Fails with [`AppError::SuspendRejected`] while non-suspendable operations run.
    pub fn suspend(&self) -> Result<(), AppError> {
        let registry = self.lock();
        let blocking: Vec<String> = registry
            .operations
            .values()
            .filter(|entry| !entry.suspendable)
            .map(|entry| entry.name.clone())
            .collect();
        if !blocking.is_empty() {
            return Err(AppError::SuspendRejected(blocking));
        }
        self.suspended.send_replace(true);
        tracing::info!(operations = registry.operations.len(), "System suspended");
        Ok(())
    }

    pub fn resume(&self) {
        if self.suspended.send_replace(false) {
            tracing::info!("System resumed");
        }
    }

    pub fn is_suspended(&self) -> bool {
        *self.suspended.borrow()
    }

    /// Receiver notified on every suspend/resume transition.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.suspended.subscribe()
    }

    fn unregister(&self, id: OperationId) {
        self.lock().operations.remove(&id);
    }
}

/// Registration of one operation. Unregisters on drop.
#[derive(Debug)]
pub struct OperationGuard {
    state: SystemState,
    id: OperationId,
}

impl OperationGuard {
    pub fn id(&self) -> OperationId {
        self.id
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.state.unregister(self.id);
    }
}

/// Restores an operation's suspendable flag on drop.
#[derive(Debug)]
pub struct SuspendableScope {
    state: SystemState,
    restore: Option<(OperationId, bool)>,
}

impl Drop for SuspendableScope {
    fn drop(&mut self) {
        if let Some((id, previous)) = self.restore.take() {
            self.state.set_suspendable(id, previous);
        }
    }
}
