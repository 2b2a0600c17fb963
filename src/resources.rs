use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Wake,
    Network,
}

impl ResourceKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Wake => "wake",
            Self::Network => "network",
        }
    }
}

pub trait ResourceLock: Send + Sync {
    fn acquire(&self, kind: ResourceKind);
    fn release(&self, kind: ResourceKind);
}

#[derive(Debug, Default)]
pub struct LoggingResourceLock;

impl ResourceLock for LoggingResourceLock {
    fn acquire(&self, kind: ResourceKind) {
        debug!(resource = kind.label(), "resource acquired");
    }

    fn release(&self, kind: ResourceKind) {
        debug!(resource = kind.label(), "resource released");
    }
}

#[derive(Debug, Clone, Default)]
pub struct TrackingResourceLock {
    held: Arc<Mutex<Vec<ResourceKind>>>,
    acquisitions: Arc<AtomicUsize>,
}

impl TrackingResourceLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn held(&self) -> Vec<ResourceKind> {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_held(&self, kind: ResourceKind) -> bool {
        self.held().contains(&kind)
    }

    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }
}

impl ResourceLock for TrackingResourceLock {
    fn acquire(&self, kind: ResourceKind) {
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(kind);
    }

    fn release(&self, kind: ResourceKind) {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = held.iter().position(|entry| *entry == kind) {
            held.remove(slot);
        }
    }
}

pub struct ResourceGuard {
    lock: Arc<dyn ResourceLock>,
    held: Vec<ResourceKind>,
}

impl ResourceGuard {
    pub fn acquire(lock: Arc<dyn ResourceLock>, needs_network: bool) -> Self {
        let mut held = vec![ResourceKind::Wake];
        if needs_network {
            held.push(ResourceKind::Network);
        }
        for kind in &held {
            lock.acquire(*kind);
        }
        Self { lock, held }
    }

    pub fn holds(&self, kind: ResourceKind) -> bool {
        self.held.contains(&kind)
    }
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        for kind in self.held.drain(..).rev() {
            self.lock.release(kind);
        }
    }
}

impl std::fmt::Debug for ResourceGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceGuard")
            .field("held", &self.held)
            .finish()
    }
}
