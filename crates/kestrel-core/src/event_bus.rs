// SPDX-License-Identifier: Apache-2.0
//! Per-session publish/subscribe of typed events (spec §4.D): true
//! multi-subscriber pub/sub, generalized from a single-subscriber
//! `mpsc::Sender<AgentEvent>` fan-out into both push (callback) and pull
//! (stream) subscribers.
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use kestrel_model::{Message, Role};

/// One incremental update within an in-progress assistant message.
#[derive(Debug, Clone)]
pub enum MessageDelta {
    TextDelta { idx: u32, text: String },
    ToolCallStart { idx: u32, tool: ToolCallPreview },
    ToolCallEnd { idx: u32, tool: ToolCallPreview },
    ThinkingDelta { idx: u32, text: String },
}

#[derive(Debug, Clone)]
pub struct ToolCallPreview {
    pub id: String,
    pub name: String,
}

/// Snapshot of the assistant message currently being streamed.
#[derive(Debug, Clone, Default)]
pub struct PartialMessage {
    pub text: String,
    pub thinking: String,
    pub tool_calls: Vec<ToolCallPreview>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyLevel {
    Info,
    Warn,
    Error,
}

/// The closed event-kind set published on a session's `EventBus` (spec §4.D).
#[derive(Debug, Clone)]
pub enum SessionEvent {
    MessageStart { partial_message: PartialMessage },
    MessageUpdate { partial_message: PartialMessage, delta: MessageDelta },
    MessageEnd { complete_message: Message },
    ToolStart { call_id: String, name: String, args: serde_json::Value },
    ToolUpdate { call_id: String, partial_result: String },
    ToolEnd { call_id: String, name: String, result: Result<String, String> },
    AgentEnd { final_messages: Vec<Message> },
    Error { reason: String, partial_state: Option<String> },
    SetWorkingMessage(Option<String>),
    Notify { text: String, level: NotifyLevel },
}

impl SessionEvent {
    /// A sentinel delivered once to a stream subscriber when it is closed
    /// (spec §4.D "closing the stream delivers a final sentinel").
    fn closed_sentinel() -> Self {
        SessionEvent::AgentEnd { final_messages: Vec::new() }
    }
}

/// How a bounded stream subscriber behaves once its queue is full (spec §4.D).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowStrategy {
    DropOldest,
    Block,
    ErrorOnOverflow,
}

struct StreamQueue {
    queue: Mutex<VecDeque<SessionEvent>>,
    notify: tokio::sync::Notify,
    max_queue: usize,
    strategy: OverflowStrategy,
    closed: AtomicBool,
}

impl StreamQueue {
    fn push(&self, event: SessionEvent) {
        let mut q = self.queue.lock().unwrap();
        if q.len() >= self.max_queue {
            match self.strategy {
                OverflowStrategy::DropOldest => {
                    q.pop_front();
                    q.push_back(event);
                }
                OverflowStrategy::ErrorOnOverflow => {
                    q.push_back(SessionEvent::Error {
                        reason: "stream subscriber overflowed its queue".to_string(),
                        partial_state: None,
                    });
                }
                OverflowStrategy::Block => {
                    // Caller already awaited room via `push_blocking`; a
                    // concurrent publisher landing here means the queue
                    // filled again between the wait and the lock, so fall
                    // back to dropping the oldest entry rather than
                    // deadlocking the bus.
                    q.pop_front();
                    q.push_back(event);
                }
            }
        } else {
            q.push_back(event);
        }
        drop(q);
        self.notify.notify_waiters();
    }

    async fn push_blocking(&self, event: SessionEvent) {
        loop {
            {
                let q = self.queue.lock().unwrap();
                if q.len() < self.max_queue {
                    break;
                }
            }
            self.notify.notified().await;
        }
        self.push(event);
    }

    async fn recv(&self) -> Option<SessionEvent> {
        loop {
            {
                let mut q = self.queue.lock().unwrap();
                if let Some(event) = q.pop_front() {
                    self.notify.notify_waiters();
                    return Some(event);
                }
                if self.closed.load(Ordering::SeqCst) {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.queue.lock().unwrap().push_back(SessionEvent::closed_sentinel());
            self.notify.notify_waiters();
        }
    }
}

enum Subscriber {
    Callback { f: Arc<dyn Fn(SessionEvent) + Send + Sync>, alive: Arc<AtomicBool> },
    Stream(Arc<StreamQueue>),
}

/// Per-session publish/subscribe bus (spec §4.D).
#[derive(Clone)]
pub struct EventBus {
    subscribers: Arc<Mutex<HashMap<u64, Subscriber>>>,
    next_id: Arc<AtomicU64>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self { subscribers: Arc::new(Mutex::new(HashMap::new())), next_id: Arc::new(AtomicU64::new(1)) }
    }

    /// Register a push-mode subscriber. The returned handle's `unsubscribe`
    /// is idempotent (spec §4.D invariant).
    pub fn subscribe_callback(&self, f: impl Fn(SessionEvent) + Send + Sync + 'static) -> Unsubscribe {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let alive = Arc::new(AtomicBool::new(true));
        self.subscribers.lock().unwrap().insert(id, Subscriber::Callback { f: Arc::new(f), alive });
        Unsubscribe { id, bus: self.clone() }
    }

    /// Register a pull-mode subscriber with a bounded queue and overflow
    /// strategy (spec §4.D).
    pub fn subscribe_stream(&self, max_queue: usize, strategy: OverflowStrategy) -> EventStream {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let queue = Arc::new(StreamQueue {
            queue: Mutex::new(VecDeque::new()),
            notify: tokio::sync::Notify::new(),
            max_queue: max_queue.max(1),
            strategy,
            closed: AtomicBool::new(false),
        });
        self.subscribers.lock().unwrap().insert(id, Subscriber::Stream(queue.clone()));
        EventStream { queue, handle: Unsubscribe { id, bus: self.clone() } }
    }

    fn remove(&self, id: u64) {
        if let Some(Subscriber::Stream(q)) = self.subscribers.lock().unwrap().remove(&id) {
            q.close();
        }
    }

    /// Deliver `event` to every live subscriber, in call order, pruning dead
    /// ones as it goes (spec §4.D invariants; spec §5's "events published
    /// within the same turn arrive at each subscriber in publish order").
    pub async fn publish(&self, event: SessionEvent) {
        let snapshot: Vec<(u64, Subscriber_)> = {
            let subs = self.subscribers.lock().unwrap();
            subs.iter()
                .map(|(id, s)| {
                    (
                        *id,
                        match s {
                            Subscriber::Callback { f, alive } => Subscriber_::Callback(f.clone(), alive.clone()),
                            Subscriber::Stream(q) => Subscriber_::Stream(q.clone()),
                        },
                    )
                })
                .collect()
        };

        let mut dead = Vec::new();
        for (id, sub) in snapshot {
            match sub {
                Subscriber_::Callback(f, alive) => {
                    if !alive.load(Ordering::SeqCst) {
                        dead.push(id);
                        continue;
                    }
                    if !Self::deliver_with_retry(&f, event.clone()) {
                        dead.push(id);
                    }
                }
                Subscriber_::Stream(q) => {
                    if Arc::strong_count(&q) <= 1 {
                        // The bus is the only remaining holder: the
                        // subscriber's `EventStream` handle was dropped
                        // without an explicit unsubscribe.
                        dead.push(id);
                        continue;
                    }
                    match q.strategy {
                        OverflowStrategy::Block => q.push_blocking(event.clone()).await,
                        _ => q.push(event.clone()),
                    }
                }
            }
        }

        let mut subs = self.subscribers.lock().unwrap();
        for id in dead {
            subs.remove(&id);
        }
    }

    /// At-most-one retry on a panicking callback, then treat the subscriber
    /// as dead (spec §4.D "callback mode ... at-most-one retry").
    fn deliver_with_retry(f: &Arc<dyn Fn(SessionEvent) + Send + Sync>, event: SessionEvent) -> bool {
        let attempt = |e: SessionEvent| std::panic::catch_unwind(AssertUnwindSafe(|| f(e)));
        if attempt(event.clone()).is_ok() {
            return true;
        }
        attempt(event).is_ok()
    }
}

enum Subscriber_ {
    Callback(Arc<dyn Fn(SessionEvent) + Send + Sync>, Arc<AtomicBool>),
    Stream(Arc<StreamQueue>),
}

/// Unsubscribe handle returned by `subscribe_callback` (spec §4.D "returns
/// an unsubscribe handle").
pub struct Unsubscribe {
    id: u64,
    bus: EventBus,
}

impl Unsubscribe {
    pub fn unsubscribe(&self) {
        self.bus.remove(self.id);
    }
}

/// Pull-mode subscriber handle.
pub struct EventStream {
    queue: Arc<StreamQueue>,
    handle: Unsubscribe,
}

impl EventStream {
    pub async fn recv(&self) -> Option<SessionEvent> {
        self.queue.recv().await
    }

    pub fn unsubscribe(&self) {
        self.handle.unsubscribe();
    }
}

/// Builds a `PartialMessage`/role pair incrementally as a `ResponseEvent`
/// stream is consumed, publishing `MessageStart`/`MessageUpdate` as it goes.
/// Shared by `turn_loop`'s `ModelStreaming` state.
#[derive(Debug, Clone, Default)]
pub struct MessageAccumulator {
    pub role: Option<Role>,
    pub partial: PartialMessage,
    next_idx: u32,
}

impl MessageAccumulator {
    pub fn new() -> Self {
        Self { role: Some(Role::Assistant), ..Default::default() }
    }

    pub fn next_idx(&mut self) -> u32 {
        let idx = self.next_idx;
        self.next_idx += 1;
        idx
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
