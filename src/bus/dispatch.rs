//! Message Bus (spec §4.2): typed, priority-ordered, scoped pub/sub with
//! last-value caching and per-handler failure tracking.

use super::cache::LastValueCache;
use super::failure::FailureTracker;
use super::queue::MessageQueue;
use super::stats::{BusCounters, BusStatistics};
use super::subscription::{DispatchMode, SubscriptionId};
use crate::error::{KernelError, Result};
use crate::time::SharedTimeSource;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Marker trait every bus payload implements. Payloads are small, cheaply
/// cloned value types (spec §3 `MessageType`). `stamp` is the typed
/// replacement for the source language's reflection-based timestamp
/// injection (spec §9): the default body is a no-op, and only payloads that
/// carry a well-known timestamp slot override it.
pub trait Message: Clone + Send + Sync + 'static {
    /// Called once per publish with a per-type sequence number and the
    /// publish-time monotonic instant. The default implementation does
    /// nothing; override it to populate a timestamp field.
    fn stamp(&mut self, sequence: u64, published_at_ms: i64) {
        let _ = (sequence, published_at_ms);
    }
}

type AnyList = Arc<dyn Any + Send + Sync>;
type Remover = Arc<dyn Fn() + Send + Sync>;
type HandlerFn<T> = Arc<dyn Fn(&T) -> std::result::Result<(), String> + Send + Sync>;

enum Mode<T> {
    Immediate(HandlerFn<T>),
    Deferred {
        queue: Arc<MessageQueue>,
        handler: HandlerFn<T>,
    },
}

impl<T> Mode<T> {
    fn dispatch_mode(&self) -> DispatchMode {
        match self {
            Mode::Immediate(_) => DispatchMode::Immediate,
            Mode::Deferred { .. } => DispatchMode::Deferred,
        }
    }
}

struct SubscriberEntry<T> {
    id: SubscriptionId,
    priority: i32,
    order: u64,
    mode: Mode<T>,
}

impl<T> Clone for SubscriberEntry<T> {
    fn clone(&self) -> Self {
        SubscriberEntry {
            id: self.id,
            priority: self.priority,
            order: self.order,
            mode: match &self.mode {
                Mode::Immediate(h) => Mode::Immediate(h.clone()),
                Mode::Deferred { queue, handler } => Mode::Deferred {
                    queue: queue.clone(),
                    handler: handler.clone(),
                },
            },
        }
    }
}

/// Handle returned by `subscribe`/`subscribeDeferred`. Dropping it removes
/// the subscription (spec §3: "Subscriptions are owned by whoever holds the
/// subscription handle").
pub struct SubscriptionHandle {
    id: SubscriptionId,
    remover: Remover,
    active: Arc<AtomicBool>,
    mode: DispatchMode,
}

impl SubscriptionHandle {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Whether this subscription runs inline during `publish` or on its own
    /// deferred queue (spec §3 `Subscription` data model).
    pub fn mode(&self) -> DispatchMode {
        self.mode
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if self.active.swap(false, Ordering::AcqRel) {
            (self.remover)();
        }
    }
}

struct BusInner {
    subscribers: DashMap<TypeId, AnyList>,
    scopes: DashMap<String, parking_lot::Mutex<Vec<(SubscriptionId, Remover)>>>,
    cache: LastValueCache,
    failures: FailureTracker,
    counters: BusCounters,
    sequences: DashMap<TypeId, AtomicU64>,
    order_counter: AtomicU64,
    time: SharedTimeSource,
    disposed: AtomicBool,
}

/// The kernel's single publish/subscribe hub. Cheap to clone (`Arc`-backed);
/// every clone refers to the same underlying bus.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

/// Tuning knobs corresponding to the `Bus.*` configuration keys in spec §6.
#[derive(Clone, Copy, Debug)]
pub struct BusConfig {
    pub max_last_messages: usize,
    pub last_message_ttl: Duration,
    pub max_failures_before_removal: u32,
}

impl Default for BusConfig {
    fn default() -> Self {
        BusConfig {
            max_last_messages: 100,
            last_message_ttl: Duration::from_secs(3600),
            max_failures_before_removal: 10,
        }
    }
}

/// Invokes `f`, turning both `Err` returns and panics into a single string
/// failure description, so the bus (and the message queue) can classify and
/// log a handler failure uniformly without letting a panic unwind past the
/// dispatch loop.
pub(crate) fn invoke_handler<F>(f: F) -> std::result::Result<(), String>
where
    F: FnOnce() -> std::result::Result<(), String>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(crate::error::panic_message(payload)),
    }
}

impl MessageBus {
    pub fn new(time: SharedTimeSource, config: BusConfig) -> Self {
        MessageBus {
            inner: Arc::new(BusInner {
                subscribers: DashMap::new(),
                scopes: DashMap::new(),
                cache: LastValueCache::new(config.max_last_messages, config.last_message_ttl),
                failures: FailureTracker::new(config.max_failures_before_removal),
                counters: BusCounters::default(),
                sequences: DashMap::new(),
                order_counter: AtomicU64::new(0),
                time,
                disposed: AtomicBool::new(false),
            }),
        }
    }

    fn list_for<T: Message>(&self) -> Arc<RwLock<Vec<SubscriberEntry<T>>>> {
        let entry = self
            .inner
            .subscribers
            .entry(TypeId::of::<T>())
            .or_insert_with(|| {
                Arc::new(RwLock::new(Vec::<SubscriberEntry<T>>::new())) as AnyList
            });
        let any: AnyList = entry.value().clone();
        any.downcast::<RwLock<Vec<SubscriberEntry<T>>>>()
            .expect("subscriber type map invariant violated")
    }

    fn register<T: Message>(
        &self,
        priority: i32,
        scope: Option<&str>,
        mode: Mode<T>,
    ) -> SubscriptionHandle {
        let id = SubscriptionId::next();
        let dispatch_mode = mode.dispatch_mode();
        let order = self.inner.order_counter.fetch_add(1, Ordering::Relaxed);
        let list = self.list_for::<T>();
        list.write().push(SubscriberEntry {
            id,
            priority,
            order,
            mode,
        });

        let list_for_remove = list.clone();
        let bus = self.inner.clone();
        let type_id = TypeId::of::<T>();
        let remover: Remover = Arc::new(move || {
            list_for_remove.write().retain(|e| e.id != id);
            bus.failures.forget(type_id, id);
        });

        if let Some(scope) = scope {
            self.inner
                .scopes
                .entry(scope.to_string())
                .or_default()
                .lock()
                .push((id, remover.clone()));
        }

        SubscriptionHandle {
            id,
            remover,
            active: Arc::new(AtomicBool::new(true)),
            mode: dispatch_mode,
        }
    }

    pub fn subscribe<T, F>(
        &self,
        handler: F,
        priority: i32,
        scope: Option<&str>,
    ) -> SubscriptionHandle
    where
        T: Message,
        F: Fn(&T) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.register::<T>(priority, scope, Mode::Immediate(Arc::new(handler)))
    }

    pub fn subscribe_deferred<T, F>(
        &self,
        handler: F,
        queue: Arc<MessageQueue>,
        scope: Option<&str>,
    ) -> SubscriptionHandle
    where
        T: Message,
        F: Fn(&T) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.register::<T>(
            0,
            scope,
            Mode::Deferred {
                queue,
                handler: Arc::new(handler),
            },
        )
    }

    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        drop(handle);
    }

    /// Cancels every subscription registered with `scope`, per spec §3
    /// `ScopeGroup`.
    pub fn unsubscribe_scope(&self, scope: &str) {
        if let Some((_, removers)) = self.inner.scopes.remove(scope) {
            for (_, remover) in removers.into_inner() {
                remover();
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    pub fn close(&self) {
        self.inner.disposed.store(true, Ordering::Release);
    }

    /// Synchronous publish per the dispatch algorithm in spec §4.2.
    pub fn publish<T: Message>(&self, value: T) -> Result<()> {
        if self.is_closed() {
            return Err(KernelError::Closed);
        }
        self.inner.counters.publishes.fetch_add(1, Ordering::Relaxed);

        let now_ms = self.inner.time.monotonic_millis();
        let sequence = self
            .inner
            .sequences
            .entry(TypeId::of::<T>())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed)
            + 1;

        let mut stamped = value;
        stamped.stamp(sequence, now_ms);

        self.inner.cache.insert(stamped.clone(), now_ms);

        let list = self.list_for::<T>();
        let mut snapshot: Vec<SubscriberEntry<T>> = list.read().clone();
        snapshot.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.order.cmp(&b.order)));

        let mut to_evict = Vec::new();
        let type_id = TypeId::of::<T>();
        for entry in &snapshot {
            match &entry.mode {
                Mode::Immediate(handler) => {
                    let outcome = invoke_handler(|| handler(&stamped));
                    self.record_outcome(type_id, entry.id, outcome, &mut to_evict);
                }
                Mode::Deferred { queue, handler } => {
                    let payload = stamped.clone();
                    let handler = handler.clone();
                    queue.enqueue(Box::new(move || handler(&payload)));
                }
            }
        }

        if !to_evict.is_empty() {
            let mut guard = list.write();
            guard.retain(|e| !to_evict.contains(&e.id));
            drop(guard);
            for id in to_evict {
                self.inner.failures.forget(type_id, id);
                self.inner
                    .counters
                    .subscriptions_evicted
                    .fetch_add(1, Ordering::Relaxed);
            }
        }

        Ok(())
    }

    fn record_outcome(
        &self,
        type_id: TypeId,
        id: SubscriptionId,
        outcome: std::result::Result<(), String>,
        to_evict: &mut Vec<SubscriptionId>,
    ) {
        match outcome {
            Ok(()) => self.inner.failures.record_success(type_id, id),
            Err(message) => {
                let count = self.inner.failures.record_failure(type_id, id);
                self.inner
                    .counters
                    .handler_failures
                    .fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    subscription = %id,
                    consecutive_failures = count,
                    error = %message,
                    "bus handler failed"
                );
                if self.inner.failures.should_evict(count) {
                    to_evict.push(id);
                }
            }
        }
    }

    /// Offloads `publish` onto a dedicated OS thread; delivery semantics are
    /// identical to the synchronous form (spec §4.2 `publishAsync`).
    pub fn publish_async<T: Message>(&self, value: T) {
        let bus = self.clone();
        std::thread::Builder::new()
            .name("furrow-publish-async".into())
            .spawn(move || {
                if let Err(err) = bus.publish(value) {
                    tracing::warn!(error = %err, "publishAsync failed");
                }
            })
            .expect("spawn publishAsync thread");
    }

    pub fn try_get_last<T: Message>(&self) -> Option<(T, i64)> {
        self.inner.cache.get::<T>()
    }

    pub fn statistics(&self) -> BusStatistics {
        self.inner
            .counters
            .snapshot(self.inner.subscribers.len(), self.inner.cache.len())
    }
}
