//! Parking for venue events that arrive before their order is bound.
//!
//! A venue stream may report an order before the submit response carrying its
//! remote id comes back. Such events wait here for up to the retry window.
//!
//! Resolution and binding go through the same mutex: an event is either
//! resolved against the cache or parked, and a bind either happens before the
//! resolve attempt or drains the event afterwards. No event falls between.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use tq_core::types::{OrderId, RemoteOrderId};
use tq_execution::gateway::RawOrderEvent;

/// Outcome of offering an event to the buffer.
#[derive(Debug)]
pub enum Admission {
    /// The event belongs to a known order.
    Resolved(OrderId, RawOrderEvent),
    /// Unknown for now; kept for retry.
    Parked,
    /// Unknown and the buffer is full.
    Overflow(RawOrderEvent),
}

#[derive(Debug)]
struct Parked {
    received_at: Instant,
    event: RawOrderEvent,
}

#[derive(Debug, Default)]
struct Inner {
    parked: HashMap<RemoteOrderId, VecDeque<Parked>>,
    len: usize,
    /// Handed back by [`OrphanBuffer::requeue`]; returned by the next `expire`.
    ready: Vec<RawOrderEvent>,
}

pub struct OrphanBuffer {
    window: Duration,
    capacity: usize,
    inner: Mutex<Inner>,
}

impl OrphanBuffer {
    pub fn new(window: Duration, capacity: usize) -> Self {
        Self {
            window,
            capacity,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Resolve `event` with `resolve`, parking it if that yields nothing.
    pub fn resolve_or_park(
        &self,
        event: RawOrderEvent,
        resolve: impl FnOnce(&RawOrderEvent) -> Option<OrderId>,
    ) -> Admission {
        let mut inner = self.inner.lock();
        if let Some(order_id) = resolve(&event) {
            return Admission::Resolved(order_id, event);
        }
        if inner.len >= self.capacity {
            return Admission::Overflow(event);
        }
        inner.len += 1;
        inner
            .parked
            .entry(event.remote_id.clone())
            .or_default()
            .push_back(Parked {
                received_at: Instant::now(),
                event,
            });
        Admission::Parked
    }

    /// Run `bind` and, if it succeeds, hand back every event parked for
    /// `remote_id`, oldest venue time first.
    ///
    /// Returns `None` when `bind` returns `false`.
    pub fn bind_and_drain(
        &self,
        remote_id: &RemoteOrderId,
        bind: impl FnOnce() -> bool,
    ) -> Option<Vec<RawOrderEvent>> {
        let mut inner = self.inner.lock();
        if !bind() {
            return None;
        }
        let drained = inner.parked.remove(remote_id).unwrap_or_default();
        inner.len -= drained.len();
        let mut events: Vec<RawOrderEvent> = drained.into_iter().map(|p| p.event).collect();
        events.sort_by_key(|e| e.update_time);
        Some(events)
    }

    /// Take back events that were removed from the buffer but never settled.
    ///
    /// They skip the retry window and come out of the next [`expire`](Self::expire).
    pub fn requeue(&self, events: impl IntoIterator<Item = RawOrderEvent>) {
        self.inner.lock().ready.extend(events);
    }

    /// Remove and return every requeued event, then every event that has
    /// waited at least the retry window.
    pub fn expire(&self, now: Instant) -> Vec<RawOrderEvent> {
        let mut inner = self.inner.lock();
        let mut expired = Vec::new();
        let ready = std::mem::take(&mut inner.ready);
        let window = self.window;
        inner.parked.retain(|_, queue| {
            while queue
                .front()
                .is_some_and(|p| now.saturating_duration_since(p.received_at) >= window)
            {
                if let Some(p) = queue.pop_front() {
                    expired.push(p.event);
                }
            }
            !queue.is_empty()
        });
        inner.len -= expired.len();
        let mut settled = ready;
        settled.extend(expired);
        settled
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner.len + inner.ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
