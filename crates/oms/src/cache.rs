//! Concurrent order cache.
//!
//! Each order lives in its own `Arc<Mutex<_>>` slot inside a `DashMap`, so the
//! map shard lock is only held long enough to clone the slot handle. Updates to
//! different orders never contend on the same lock; updates to one order are
//! serialized by its slot mutex.
//!
//! A secondary index maps venue ids to local ids. It is written once per order,
//! while the order's slot lock is held.

use std::sync::Arc;

use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use parking_lot::Mutex;

use tq_core::types::{OrderId, RemoteOrderId};

use crate::order::Order;

/// A snapshot queued for delivery, tagged with its per-order sequence number.
#[derive(Debug, Clone)]
pub struct Notification {
    /// Starts at 1 for every order and increases by one per notification.
    pub seq: u64,
    pub order: Order,
}

/// Mutable slot for one order.
#[derive(Debug)]
pub struct Entry {
    pub order: Order,
    notify_seq: u64,
}

impl Entry {
    /// Take the next sequence number and snapshot the order for delivery.
    ///
    /// Must be called under the slot lock, right after the change it reports.
    pub fn stamp(&mut self) -> Notification {
        self.notify_seq += 1;
        Notification {
            seq: self.notify_seq,
            order: self.order.clone(),
        }
    }
}

type Slot = Arc<Mutex<Entry>>;

/// In-memory map from [`OrderId`] to order state.
#[derive(Default)]
pub struct OrderCache {
    entries: DashMap<OrderId, Slot>,
    by_remote: DashMap<RemoteOrderId, OrderId>,
}

impl OrderCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new order. Returns `false` (and leaves the cache untouched) if
    /// the id is already present.
    pub fn insert(&self, order: Order) -> bool {
        let remote_id = order.remote_id.clone();
        let order_id = order.order_id;
        match self.entries.entry(order_id) {
            MapEntry::Occupied(_) => false,
            MapEntry::Vacant(vacant) => {
                vacant.insert(Arc::new(Mutex::new(Entry {
                    order,
                    notify_seq: 0,
                })));
                if let Some(remote_id) = remote_id {
                    self.by_remote.insert(remote_id, order_id);
                }
                true
            }
        }
    }

    fn slot(&self, order_id: OrderId) -> Option<Slot> {
        self.entries.get(&order_id).map(|s| Arc::clone(s.value()))
    }

    /// Consistent copy of one order.
    pub fn get(&self, order_id: OrderId) -> Option<Order> {
        self.slot(order_id).map(|slot| slot.lock().order.clone())
    }

    /// Local id bound to a venue id, if any.
    pub fn resolve(&self, remote_id: &RemoteOrderId) -> Option<OrderId> {
        self.by_remote.get(remote_id).map(|id| *id.value())
    }

    /// Attach a venue id to an order that has none yet.
    ///
    /// Returns `false` if the order is unknown, already carries a venue id, or
    /// `remote_id` is bound to another order.
    pub fn bind_remote(&self, order_id: OrderId, remote_id: &RemoteOrderId) -> bool {
        let Some(slot) = self.slot(order_id) else {
            return false;
        };
        let mut entry = slot.lock();
        if entry.order.remote_id.is_some() {
            return false;
        }
        match self.by_remote.entry(remote_id.clone()) {
            MapEntry::Occupied(_) => false,
            MapEntry::Vacant(vacant) => {
                vacant.insert(order_id);
                entry.order.remote_id = Some(remote_id.clone());
                true
            }
        }
    }

    /// Run `f` with exclusive access to one order.
    ///
    /// The map shard is released before the slot is locked, so `f` may run for
    /// as long as it needs without blocking other orders. `f` must not await.
    pub fn update<R>(&self, order_id: OrderId, f: impl FnOnce(&mut Entry) -> R) -> Option<R> {
        let slot = self.slot(order_id)?;
        let mut entry = slot.lock();
        Some(f(&mut entry))
    }

    /// Copies of every order, each internally consistent.
    pub fn snapshot(&self) -> Vec<Order> {
        let slots: Vec<Slot> = self.entries.iter().map(|s| Arc::clone(s.value())).collect();
        slots.iter().map(|slot| slot.lock().order.clone()).collect()
    }

    /// Copies of every order that has not reached a terminal status.
    pub fn non_terminal(&self) -> Vec<Order> {
        self.snapshot()
            .into_iter()
            .filter(|o| !o.is_terminal())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{OrderStatus, StatusUpdate, Transition};
    use rust_decimal_macros::dec;
    use std::thread;
    use tq_core::types::{Action, OrderType, StrategyIdentity, Symbol, Timestamp};

    fn make_order(id: u64) -> Order {
        let identity = StrategyIdentity::new("paper", "acct", "grid", Symbol::new("BTC/USDT"));
        Order::new(
            &identity,
            OrderId(id),
            Action::Sell,
            OrderType::Limit,
            dec!(100),
            dec!(10),
            Timestamp::from_millis(1),
        )
    }

    #[test]
    fn test_insert_and_get() {
        let cache = OrderCache::new();
        assert!(cache.insert(make_order(1)));
        assert!(!cache.insert(make_order(1)));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(OrderId(1)).unwrap().quantity, dec!(10));
        assert!(cache.get(OrderId(2)).is_none());
    }

    #[test]
    fn test_bind_remote_once() {
        let cache = OrderCache::new();
        cache.insert(make_order(1));
        cache.insert(make_order(2));
        let rid = RemoteOrderId::new("R-1");

        assert!(cache.bind_remote(OrderId(1), &rid));
        assert_eq!(cache.resolve(&rid), Some(OrderId(1)));
        // already bound
        assert!(!cache.bind_remote(OrderId(1), &RemoteOrderId::new("R-2")));
        // remote id taken by another order
        assert!(!cache.bind_remote(OrderId(2), &rid));
        assert!(!cache.bind_remote(OrderId(9), &RemoteOrderId::new("R-9")));
        assert_eq!(cache.get(OrderId(2)).unwrap().remote_id, None);
    }

    #[test]
    fn test_stamp_sequence_per_order() {
        let cache = OrderCache::new();
        cache.insert(make_order(1));
        cache.insert(make_order(2));

        let a1 = cache.update(OrderId(1), |e| e.stamp()).unwrap();
        let a2 = cache.update(OrderId(1), |e| e.stamp()).unwrap();
        let b1 = cache.update(OrderId(2), |e| e.stamp()).unwrap();
        assert_eq!((a1.seq, a2.seq, b1.seq), (1, 2, 1));
    }

    #[test]
    fn test_non_terminal_filter() {
        let cache = OrderCache::new();
        cache.insert(make_order(1));
        cache.insert(make_order(2));
        cache.update(OrderId(2), |e| e.order.fail_locally(Timestamp::from_millis(2)));

        let open: Vec<OrderId> = cache.non_terminal().iter().map(|o| o.order_id).collect();
        assert_eq!(open, vec![OrderId(1)]);
        assert_eq!(cache.snapshot().len(), 2);
    }

    #[test]
    fn test_concurrent_updates_on_distinct_orders() {
        let cache = Arc::new(OrderCache::new());
        for id in 0..8 {
            cache.insert(make_order(id));
        }

        let handles: Vec<_> = (0..8u64)
            .map(|id| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for step in 1..=10u64 {
                        let update = StatusUpdate {
                            status: OrderStatus::PartialFilled,
                            remaining_quantity: dec!(10) - rust_decimal::Decimal::from(step) + dec!(0.5),
                            average_price: dec!(100),
                            update_time: Timestamp::from_millis(step),
                        };
                        let t = cache.update(OrderId(id), |e| e.order.apply(&update)).unwrap();
                        assert_eq!(t, Ok(Transition::Changed));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        for id in 0..8 {
            let order = cache.get(OrderId(id)).unwrap();
            assert_eq!(order.remaining_quantity, dec!(0.5));
            assert_eq!(order.updated_at, Timestamp::from_millis(10));
        }
    }
}
