//! Subscription registry for channel events
//!
//! Handlers are identified by their `Arc` allocation, so the handle used
//! to subscribe is the handle that deregisters — re-creating an
//! equivalent closure does not match.

use std::collections::HashMap;
use std::sync::Arc;

use crate::events::{EventKind, ServerEvent};

/// Callback invoked with each event of the kind it subscribed to
pub type EventHandler = Arc<dyn Fn(&ServerEvent) + Send + Sync>;

/// Event-kind keyed handler table
#[derive(Default)]
pub struct SubscriptionRegistry {
    handlers: HashMap<EventKind, Vec<EventHandler>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `kind`. Registering the same handle twice
    /// is a no-op.
    pub fn subscribe(&mut self, kind: EventKind, handler: EventHandler) {
        let entry = self.handlers.entry(kind).or_default();
        if entry.iter().any(|existing| Arc::ptr_eq(existing, &handler)) {
            return;
        }
        entry.push(handler);
    }

    /// Deregister `handler` from `kind`. Removing the last handler for a
    /// kind drops the entry entirely.
    pub fn unsubscribe(&mut self, kind: EventKind, handler: &EventHandler) {
        if let Some(entry) = self.handlers.get_mut(&kind) {
            entry.retain(|existing| !Arc::ptr_eq(existing, handler));
            if entry.is_empty() {
                self.handlers.remove(&kind);
            }
        }
    }

    /// Handlers for `kind` in registration order. The returned clones let
    /// the caller release the registry lock before dispatch, so handlers
    /// may re-enter the registry.
    pub fn snapshot(&self, kind: EventKind) -> Vec<EventHandler> {
        self.handlers.get(&kind).cloned().unwrap_or_default()
    }

    /// Number of handlers registered for `kind`
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.get(&kind).map_or(0, Vec::len)
    }

    /// Whether no handler is registered at all
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Drop every registration
    pub fn clear(&mut self) {
        self.handlers.clear();
    }
}
