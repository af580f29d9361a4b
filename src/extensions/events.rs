//! Event bus - routes typed events to extension handlers
//!
//! Handlers are indexed by the concrete `TypeId` of the event (exact-type
//! matching, no supertype fallback) and invoked synchronously on the
//! dispatching thread in priority order, highest first. The per-type handler
//! list is copy-on-write: dispatch takes an `Arc` snapshot and never holds a
//! lock while running handlers, so an unload can purge an extension's
//! handlers concurrently with an in-flight dispatch.

use std::any::TypeId;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::application::errors::BotError;
use crate::domain::entities::Event;

/// Type-erased handler callback. The typed registration helpers wrap the
/// caller's closure in a downcast.
pub type EventCallback = Box<dyn Fn(&mut dyn Event) -> Result<(), BotError> + Send + Sync>;

/// A handler registered on the bus, owned by exactly one extension.
pub struct RegisteredHandler {
    pub owner: String,
    pub event_name: &'static str,
    pub priority: i32,
    pub ignore_cancelled: bool,
    seq: u64,
    callback: EventCallback,
}

/// One (event type, priority, ignore-cancelled, callback) registration tuple.
///
/// This is the declarative form: a [`Listener`] reports its registrations as
/// data and the bus wires them up, so an extension never touches the dispatch
/// tables directly.
pub struct EventRegistration {
    pub event_type: TypeId,
    pub event_name: &'static str,
    pub priority: i32,
    pub ignore_cancelled: bool,
    pub callback: EventCallback,
}

impl EventRegistration {
    /// Build a registration for event type `E` from a typed closure.
    pub fn of<E, F>(priority: i32, ignore_cancelled: bool, f: F) -> Self
    where
        E: Event + 'static,
        F: Fn(&mut E) -> Result<(), BotError> + Send + Sync + 'static,
    {
        Self {
            event_type: TypeId::of::<E>(),
            event_name: std::any::type_name::<E>(),
            priority,
            ignore_cancelled,
            callback: Box::new(move |ev: &mut dyn Event| {
                // The bus routes by TypeId, so the downcast cannot miss.
                match ev.as_any_mut().downcast_mut::<E>() {
                    Some(event) => f(event),
                    None => Ok(()),
                }
            }),
        }
    }
}

/// Declarative handler discovery: an extension's listener reports its
/// registrations and the context feeds them to the bus under the owning
/// extension's name.
pub trait Listener {
    fn registrations(&self) -> Vec<EventRegistration>;
}

/// Registry of (event type -> ordered handler list).
pub struct EventBus {
    handlers: RwLock<HashMap<TypeId, Arc<Vec<Arc<RegisteredHandler>>>>>,
    seq: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            seq: AtomicU64::new(0),
        }
    }

    /// Register a typed handler for event type `E`.
    pub fn register<E, F>(
        &self,
        owner: &str,
        priority: i32,
        ignore_cancelled: bool,
        f: F,
    ) -> Result<(), BotError>
    where
        E: Event + 'static,
        F: Fn(&mut E) -> Result<(), BotError> + Send + Sync + 'static,
    {
        self.register_dyn(owner, EventRegistration::of::<E, F>(priority, ignore_cancelled, f))
    }

    /// Register a pre-built registration tuple.
    pub fn register_dyn(&self, owner: &str, reg: EventRegistration) -> Result<(), BotError> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let handler = Arc::new(RegisteredHandler {
            owner: owner.to_string(),
            event_name: reg.event_name,
            priority: reg.priority,
            ignore_cancelled: reg.ignore_cancelled,
            seq,
            callback: reg.callback,
        });

        let mut table = self
            .handlers
            .write()
            .map_err(|_| BotError::Internal("event table lock poisoned".to_string()))?;

        let mut list: Vec<Arc<RegisteredHandler>> = table
            .get(&reg.event_type)
            .map(|l| l.as_ref().clone())
            .unwrap_or_default();
        list.push(handler);
        // Descending priority; ties keep registration order via seq.
        list.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
        table.insert(reg.event_type, Arc::new(list));

        tracing::debug!(
            extension = owner,
            event = reg.event_name,
            priority = reg.priority,
            "registered event handler"
        );
        Ok(())
    }

    /// Register every tuple a listener reports, under one owner.
    pub fn register_listener(&self, owner: &str, listener: &dyn Listener) -> Result<(), BotError> {
        for reg in listener.registrations() {
            self.register_dyn(owner, reg)?;
        }
        Ok(())
    }

    /// Remove every handler belonging to `owner`. Returns the number removed.
    pub fn unregister_all(&self, owner: &str) -> usize {
        let mut table = match self.handlers.write() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::error!("event table lock poisoned during unregister");
                return 0;
            }
        };

        let mut removed = 0;
        table.retain(|_, list| {
            let kept: Vec<Arc<RegisteredHandler>> = list
                .iter()
                .filter(|h| h.owner != owner)
                .cloned()
                .collect();
            removed += list.len() - kept.len();
            if kept.is_empty() {
                false
            } else {
                *list = Arc::new(kept);
                true
            }
        });

        if removed > 0 {
            tracing::debug!(extension = owner, count = removed, "unregistered event handlers");
        }
        removed
    }

    /// Dispatch an event to every handler registered for its runtime type.
    ///
    /// Runs on the calling thread. A handler error or panic is logged with
    /// the owning extension's name and does not stop sibling handlers, nor
    /// does it reach the event source.
    pub fn dispatch(&self, event: &mut dyn Event) {
        let type_id = event.as_any().type_id();
        let snapshot = match self.handlers.read() {
            Ok(table) => table.get(&type_id).cloned(),
            Err(_) => {
                tracing::error!("event table lock poisoned during dispatch");
                None
            }
        };
        let Some(list) = snapshot else { return };

        for handler in list.iter() {
            if handler.ignore_cancelled && event.is_cancelled() {
                continue;
            }
            match catch_unwind(AssertUnwindSafe(|| (handler.callback)(&mut *event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(
                        extension = %handler.owner,
                        event = event.name(),
                        "handler returned error: {}",
                        e
                    );
                }
                Err(panic) => {
                    tracing::error!(
                        extension = %handler.owner,
                        event = event.name(),
                        "handler panicked: {}",
                        panic_message(&panic)
                    );
                }
            }
        }
    }

    /// Total number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers
            .read()
            .ok()
            .map(|t| t.values().map(|l| l.len()).sum())
            .unwrap_or(0)
    }

    /// Number of handlers owned by `owner`.
    pub fn handlers_for(&self, owner: &str) -> usize {
        self.handlers
            .read()
            .ok()
            .map(|t| {
                t.values()
                    .map(|l| l.iter().filter(|h| h.owner == owner).count())
                    .sum()
            })
            .unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
