use std::any::TypeId;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_trait::async_trait;

use herald_core::error::{HeraldError, Result};
use herald_core::message::{AnyMessage, Command, DomainEvent};

use super::{CommandHandler, EventHandler};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl HandlerId {
    pub fn get(self) -> u64 {
        self.0
    }
}

#[async_trait]
trait Invoke: Send + Sync {
    async fn invoke(&self, message: &AnyMessage) -> Result<()>;
}

struct EventInvoker<E, H> {
    handler: Arc<H>,
    _event: PhantomData<fn() -> E>,
}

#[async_trait]
impl<E: DomainEvent, H: EventHandler<E>> Invoke for EventInvoker<E, H> {
    async fn invoke(&self, message: &AnyMessage) -> Result<()> {
        let event = message.downcast_ref::<E>().ok_or_else(|| mismatch::<E>(message))?;
        self.handler.handle(event).await
    }
}

struct CommandInvoker<C, H> {
    handler: Arc<H>,
    _command: PhantomData<fn() -> C>,
}

#[async_trait]
impl<C: Command, H: CommandHandler<C>> Invoke for CommandInvoker<C, H> {
    async fn invoke(&self, message: &AnyMessage) -> Result<()> {
        let command = message.downcast_ref::<C>().ok_or_else(|| mismatch::<C>(message))?;
        self.handler.handle(command).await
    }
}

fn mismatch<T>(message: &AnyMessage) -> HeraldError {
    HeraldError::InvalidArgument(format!(
        "handler for {} received {}",
        std::any::type_name::<T>(),
        message.type_name()
    ))
}

/// A handler that was alive at lookup time. Holding it keeps the handler
/// alive until the invocation finishes.
#[derive(Clone)]
pub struct LiveHandler {
    id: HandlerId,
    invoker: Arc<dyn Invoke>,
}

impl LiveHandler {
    pub fn id(&self) -> HandlerId {
        self.id
    }

    pub async fn invoke(&self, message: &AnyMessage) -> Result<()> {
        self.invoker.invoke(message).await
    }
}

type Upgrade = Box<dyn Fn() -> Option<Arc<dyn Invoke>> + Send + Sync>;
type Alive = Box<dyn Fn() -> bool + Send + Sync>;

struct Entry {
    id: HandlerId,
    message_type: TypeId,
    /// Address of the handler allocation (reference identity).
    target: usize,
    alive: Alive,
    upgrade: Upgrade,
}

/// Weak handler registry.
///
/// - Never owns a handler: entries hold `Weak` references, dead ones are
///   pruned on the next lookup.
/// - Mutations (add/remove/prune) run under one mutex and swap in a new
///   vector; lookups clone the current `Arc` snapshot and run lock-free, so
///   no lock is held while handlers execute.
#[derive(Default)]
pub struct HandlerRegistry {
    entries: Mutex<Arc<Vec<Arc<Entry>>>>,
    next_id: AtomicU64,
}

impl HandlerRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_event_handler<E, H>(self: &Arc<Self>, handler: &Arc<H>) -> HandlerRegistration
    where
        E: DomainEvent,
        H: EventHandler<E>,
    {
        let weak = Arc::downgrade(handler);
        let probe = weak.clone();
        self.insert(
            TypeId::of::<E>(),
            target_of(handler),
            Box::new(move || probe.strong_count() > 0),
            Box::new(move || {
                weak.upgrade().map(|handler| {
                    Arc::new(EventInvoker::<E, H> {
                        handler,
                        _event: PhantomData,
                    }) as Arc<dyn Invoke>
                })
            }),
        )
    }

    pub fn add_command_handler<C, H>(self: &Arc<Self>, handler: &Arc<H>) -> HandlerRegistration
    where
        C: Command,
        H: CommandHandler<C>,
    {
        let weak = Arc::downgrade(handler);
        let probe = weak.clone();
        self.insert(
            TypeId::of::<C>(),
            target_of(handler),
            Box::new(move || probe.strong_count() > 0),
            Box::new(move || {
                weak.upgrade().map(|handler| {
                    Arc::new(CommandInvoker::<C, H> {
                        handler,
                        _command: PhantomData,
                    }) as Arc<dyn Invoke>
                })
            }),
        )
    }

    fn insert(self: &Arc<Self>, message_type: TypeId, target: usize, alive: Alive, upgrade: Upgrade) -> HandlerRegistration {
        let mut guard = self.lock();

        // same instance for the same message type: no-op
        if let Some(existing) = guard
            .iter()
            .find(|e| e.message_type == message_type && e.target == target && (e.alive)())
        {
            return HandlerRegistration {
                id: existing.id,
                registry: Arc::downgrade(self),
                armed: false,
            };
        }

        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let mut next: Vec<Arc<Entry>> = guard.iter().cloned().collect();
        next.push(Arc::new(Entry {
            id,
            message_type,
            target,
            alive,
            upgrade,
        }));
        *guard = Arc::new(next);

        HandlerRegistration {
            id,
            registry: Arc::downgrade(self),
            armed: true,
        }
    }

    /// Remove by registration id. Returns whether an entry was removed.
    pub fn remove(&self, id: HandlerId) -> bool {
        self.remove_first(|e| e.id == id)
    }

    /// Remove the first live entry pointing at `handler`.
    pub fn remove_instance<H: ?Sized>(&self, handler: &Arc<H>) -> bool {
        let target = target_of(handler);
        self.remove_first(|e| e.target == target && (e.alive)())
    }

    /// All live handlers for a message type, in registration order.
    pub fn find_handlers_for(&self, message_type: TypeId) -> Vec<LiveHandler> {
        self.lookup(message_type, usize::MAX)
    }

    /// First live handler for a message type.
    pub fn find_handler_for(&self, message_type: TypeId) -> Option<LiveHandler> {
        self.lookup(message_type, 1).into_iter().next()
    }

    /// Entries currently stored, dead ones included until the next lookup.
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    fn lookup(&self, message_type: TypeId, limit: usize) -> Vec<LiveHandler> {
        let snapshot = self.snapshot();
        let mut found = Vec::new();
        let mut saw_dead = false;

        for e in snapshot.iter() {
            if e.message_type == message_type && found.len() < limit {
                match (e.upgrade)() {
                    Some(invoker) => found.push(LiveHandler { id: e.id, invoker }),
                    None => saw_dead = true,
                }
            } else if !(e.alive)() {
                saw_dead = true;
            }
        }

        if saw_dead {
            self.prune();
        }
        found
    }

    fn prune(&self) {
        let mut guard = self.lock();
        let kept: Vec<Arc<Entry>> = guard.iter().filter(|e| (e.alive)()).cloned().collect();
        if kept.len() != guard.len() {
            tracing::debug!(pruned = guard.len() - kept.len(), "pruned dead handler references");
            *guard = Arc::new(kept);
        }
    }

    fn remove_first(&self, pred: impl Fn(&Entry) -> bool) -> bool {
        let mut guard = self.lock();
        let Some(pos) = guard.iter().position(|e| pred(e)) else {
            return false;
        };
        let mut next: Vec<Arc<Entry>> = guard.iter().cloned().collect();
        next.remove(pos);
        *guard = Arc::new(next);
        true
    }

    fn snapshot(&self) -> Arc<Vec<Arc<Entry>>> {
        Arc::clone(&self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, Arc<Vec<Arc<Entry>>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn target_of<H: ?Sized>(handler: &Arc<H>) -> usize {
    Arc::as_ptr(handler) as *const () as usize
}

/// Scoped registration: dropping it unregisters the handler.
#[must_use = "dropping the registration unregisters the handler; call keep() to rely on weak pruning"]
pub struct HandlerRegistration {
    id: HandlerId,
    registry: Weak<HandlerRegistry>,
    armed: bool,
}

impl HandlerRegistration {
    pub fn id(&self) -> HandlerId {
        self.id
    }

    /// Whether this guard owns the entry (false for duplicate adds).
    pub fn is_owner(&self) -> bool {
        self.armed
    }

    /// Detach the guard. The entry then lives until `remove` is called or
    /// the handler itself is dropped.
    pub fn keep(mut self) -> HandlerId {
        self.armed = false;
        self.id
    }

    pub fn unregister(self) {}
}

impl Drop for HandlerRegistration {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use herald_core::message::Payload;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Serialize, Deserialize)]
    struct Tick;
    impl Payload for Tick {}
    impl DomainEvent for Tick {}

    #[derive(Default)]
    struct Counter(AtomicUsize);

    #[async_trait]
    impl EventHandler<Tick> for Counter {
        async fn handle(&self, _: &Tick) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn duplicate_add_is_a_noop() {
        let reg = HandlerRegistry::new();
        let h = Arc::new(Counter::default());
        let first = reg.add_event_handler::<Tick, _>(&h);
        let second = reg.add_event_handler::<Tick, _>(&h);
        assert_eq!(first.id(), second.id());
        assert!(!second.is_owner());
        drop(second);
        assert_eq!(reg.find_handlers_for(TypeId::of::<Tick>()).len(), 1);
        drop(first);
        assert!(reg.find_handlers_for(TypeId::of::<Tick>()).is_empty());
    }

    #[test]
    fn remove_instance_removes_first_live_match() {
        let reg = HandlerRegistry::new();
        let h = Arc::new(Counter::default());
        let _id = reg.add_event_handler::<Tick, _>(&h).keep();
        assert!(reg.remove_instance(&h));
        assert!(!reg.remove_instance(&h));
        assert!(reg.is_empty());
    }

    #[tokio::test]
    async fn live_handler_invokes_target() {
        let reg = HandlerRegistry::new();
        let h = Arc::new(Counter::default());
        let _reg = reg.add_event_handler::<Tick, _>(&h);
        let live = reg.find_handler_for(TypeId::of::<Tick>()).unwrap();
        live.invoke(&AnyMessage::event(Tick)).await.unwrap();
        assert_eq!(h.0.load(Ordering::SeqCst), 1);
    }
}
