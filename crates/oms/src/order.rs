//! Order entity and its state machine.
//!
//! ```text
//! NONE ─► SUBMITTED ─► PARTIAL_FILLED ⇄ PARTIAL_FILLED ─► FILLED
//!            │ │              │
//!            │ └──────────────┴──► CANCELED
//!            └──► FAILED
//! ```
//!
//! `FILLED`, `CANCELED` and `FAILED` are terminal. An [`Order`] only changes
//! through [`Order::apply`] (a venue-reported update) or [`Order::fail_locally`]
//! (the venue refused the submit).

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use tq_core::types::{Action, OrderId, OrderType, RemoteOrderId, StrategyIdentity, Symbol, Timestamp};
use tq_execution::gateway::{OrderDetails, RawOrderEvent};

/// Order states in the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Not yet known to the venue.
    None,
    /// Accepted by the venue, nothing filled.
    Submitted,
    /// Some quantity filled, the rest still working.
    PartialFilled,
    /// Fully filled; terminal.
    Filled,
    /// Canceled by the strategy or the venue; terminal.
    Canceled,
    /// Refused by the venue; terminal.
    Failed,
}

impl OrderStatus {
    /// Returns `true` if this status is terminal (no further transitions).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Filled | Self::Canceled | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Submitted => "SUBMITTED",
            Self::PartialFilled => "PARTIAL_FILLED",
            Self::Filled => "FILLED",
            Self::Canceled => "CANCELED",
            Self::Failed => "FAILED",
        }
    }

    /// Whether a venue update may move an order from `self` to `to`.
    ///
    /// `SUBMITTED → SUBMITTED` and `PARTIAL_FILLED → PARTIAL_FILLED` are allowed so
    /// that repeated reports with new quantities can be merged.
    pub fn can_transition_to(self, to: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, to),
            (None, Submitted)
                | (None, Failed)
                | (Submitted, Submitted)
                | (Submitted, PartialFilled)
                | (Submitted, Filled)
                | (Submitted, Canceled)
                | (Submitted, Failed)
                | (PartialFilled, PartialFilled)
                | (PartialFilled, Filled)
                | (PartialFilled, Canceled)
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status string outside the six canonical names.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown order status {0:?}")]
pub struct UnknownStatus(pub String);

impl FromStr for OrderStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NONE" => Ok(Self::None),
            "SUBMITTED" => Ok(Self::Submitted),
            "PARTIAL_FILLED" => Ok(Self::PartialFilled),
            "FILLED" => Ok(Self::Filled),
            "CANCELED" => Ok(Self::Canceled),
            "FAILED" => Ok(Self::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// One order as tracked locally.
///
/// Identity fields and the submitted `price`/`quantity` never change after
/// creation. `updated_at` is the venue time of the last accepted update and
/// stays at [`Timestamp::ZERO`] until the venue reports on the order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub platform: String,
    pub account: String,
    pub strategy: String,
    pub symbol: Symbol,
    pub order_id: OrderId,
    /// Venue id, set once the submit response (or a matching event) arrives.
    pub remote_id: Option<RemoteOrderId>,
    pub action: Action,
    pub order_type: OrderType,
    pub price: Decimal,
    pub quantity: Decimal,
    pub remaining_quantity: Decimal,
    /// Zero until the first fill.
    pub average_price: Decimal,
    pub status: OrderStatus,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A venue update with its status already parsed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusUpdate {
    pub status: OrderStatus,
    pub remaining_quantity: Decimal,
    pub average_price: Decimal,
    pub update_time: Timestamp,
}

impl TryFrom<&RawOrderEvent> for StatusUpdate {
    type Error = UnknownStatus;

    fn try_from(event: &RawOrderEvent) -> Result<Self, Self::Error> {
        Ok(Self {
            status: event.status.parse()?,
            remaining_quantity: event.remaining_quantity,
            average_price: event.average_price,
            update_time: event.update_time,
        })
    }
}

/// Result of an accepted update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Status, remaining quantity or average price changed. Notify.
    Changed,
    /// Same state reported again with a newer venue time. Only `updated_at` moved.
    Refreshed,
}

/// Why an update was not applied.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OrderRejection {
    #[error("order already {0}")]
    Terminal(OrderStatus),
    #[error("update at {update_time} is not newer than {updated_at}")]
    Stale {
        update_time: Timestamp,
        updated_at: Timestamp,
    },
    #[error("illegal transition {from} -> {to}")]
    IllegalTransition { from: OrderStatus, to: OrderStatus },
    #[error("remaining quantity {remaining} invalid (quantity {quantity}, current {current})")]
    InvalidQuantity {
        remaining: Decimal,
        quantity: Decimal,
        current: Decimal,
    },
}

impl Order {
    /// A freshly created order, pending venue acknowledgement.
    pub fn new(
        identity: &StrategyIdentity,
        order_id: OrderId,
        action: Action,
        order_type: OrderType,
        price: Decimal,
        quantity: Decimal,
        created_at: Timestamp,
    ) -> Self {
        Self {
            platform: identity.platform.clone(),
            account: identity.account.clone(),
            strategy: identity.strategy.clone(),
            symbol: identity.symbol.clone(),
            order_id,
            remote_id: None,
            action,
            order_type,
            price,
            quantity,
            remaining_quantity: quantity,
            average_price: Decimal::ZERO,
            status: OrderStatus::Submitted,
            created_at,
            updated_at: Timestamp::ZERO,
        }
    }

    /// An order found on the venue that this session did not create.
    pub fn adopted(identity: &StrategyIdentity, order_id: OrderId, details: &OrderDetails) -> Self {
        Self::new(
            identity,
            order_id,
            details.action,
            details.order_type,
            details.price,
            details.quantity,
            details.created_at,
        )
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Merge a venue update.
    ///
    /// Checks run in order: terminal, stale, transition edge, quantity bounds.
    /// A rejected update leaves the order untouched.
    pub fn apply(&mut self, update: &StatusUpdate) -> Result<Transition, OrderRejection> {
        if self.status.is_terminal() {
            return Err(OrderRejection::Terminal(self.status));
        }
        if update.update_time <= self.updated_at {
            return Err(OrderRejection::Stale {
                update_time: update.update_time,
                updated_at: self.updated_at,
            });
        }
        if !self.status.can_transition_to(update.status) {
            return Err(OrderRejection::IllegalTransition {
                from: self.status,
                to: update.status,
            });
        }

        let remaining = update.remaining_quantity;
        // Only a cancel or failure may report more remaining than we already hold.
        let may_grow = matches!(update.status, OrderStatus::Canceled | OrderStatus::Failed);
        if remaining < Decimal::ZERO
            || remaining > self.quantity
            || (remaining > self.remaining_quantity && !may_grow)
        {
            return Err(OrderRejection::InvalidQuantity {
                remaining,
                quantity: self.quantity,
                current: self.remaining_quantity,
            });
        }

        let changed = self.status != update.status
            || self.remaining_quantity != remaining
            || self.average_price != update.average_price;

        self.status = update.status;
        self.remaining_quantity = remaining;
        self.average_price = update.average_price;
        self.updated_at = update.update_time;

        Ok(if changed {
            Transition::Changed
        } else {
            Transition::Refreshed
        })
    }

    /// Mark the order FAILED after the venue refused the submit.
    pub fn fail_locally(&mut self, now: Timestamp) -> Result<(), OrderRejection> {
        if self.status.is_terminal() {
            return Err(OrderRejection::Terminal(self.status));
        }
        if !self.status.can_transition_to(OrderStatus::Failed) {
            return Err(OrderRejection::IllegalTransition {
                from: self.status,
                to: OrderStatus::Failed,
            });
        }
        self.status = OrderStatus::Failed;
        self.updated_at = self.updated_at.max(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn identity() -> StrategyIdentity {
        StrategyIdentity::new("paper", "acct", "grid", Symbol::new("BTC/USDT"))
    }

    fn make_order() -> Order {
        Order::new(
            &identity(),
            OrderId(1),
            Action::Buy,
            OrderType::Limit,
            dec!(11.11),
            dec!(22.22),
            Timestamp::from_millis(1),
        )
    }

    fn update(status: OrderStatus, remaining: Decimal, avg: Decimal, ms: u64) -> StatusUpdate {
        StatusUpdate {
            status,
            remaining_quantity: remaining,
            average_price: avg,
            update_time: Timestamp::from_millis(ms),
        }
    }

    // ── Transition table ──

    #[test]
    fn test_transition_table_is_exhaustive() {
        use OrderStatus::*;
        let all = [None, Submitted, PartialFilled, Filled, Canceled, Failed];
        let legal = [
            (None, Submitted),
            (None, Failed),
            (Submitted, Submitted),
            (Submitted, PartialFilled),
            (Submitted, Filled),
            (Submitted, Canceled),
            (Submitted, Failed),
            (PartialFilled, PartialFilled),
            (PartialFilled, Filled),
            (PartialFilled, Canceled),
        ];
        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    legal.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        use OrderStatus::*;
        for from in [Filled, Canceled, Failed] {
            assert!(from.is_terminal());
            for to in [None, Submitted, PartialFilled, Filled, Canceled, Failed] {
                assert!(!from.can_transition_to(to));
            }
        }
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("PARTIAL_FILLED".parse::<OrderStatus>(), Ok(OrderStatus::PartialFilled));
        assert_eq!(
            "EXPIRED".parse::<OrderStatus>(),
            Err(UnknownStatus("EXPIRED".to_string()))
        );
        // canonical names only
        assert!("filled".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn test_status_serde_uses_canonical_names() {
        let json = serde_json::to_string(&OrderStatus::PartialFilled).unwrap();
        assert_eq!(json, "\"PARTIAL_FILLED\"");
    }

    // ── New orders ──

    #[test]
    fn test_new_order_defaults() {
        let order = make_order();
        assert_eq!(order.status, OrderStatus::Submitted);
        assert_eq!(order.remaining_quantity, dec!(22.22));
        assert_eq!(order.average_price, Decimal::ZERO);
        assert_eq!(order.remote_id, Option::None);
        assert_eq!(order.updated_at, Timestamp::ZERO);
        assert_eq!(order.strategy, "grid");
    }

    // ── apply ──

    #[test]
    fn test_partial_then_filled() {
        let mut order = make_order();
        let t = order.apply(&update(OrderStatus::PartialFilled, dec!(10.00), dec!(11.10), 10));
        assert_eq!(t, Ok(Transition::Changed));
        assert_eq!(order.remaining_quantity, dec!(10.00));
        assert_eq!(order.average_price, dec!(11.10));
        assert_eq!(order.updated_at, Timestamp::from_millis(10));

        let t = order.apply(&update(OrderStatus::Filled, dec!(0), dec!(11.105), 20));
        assert_eq!(t, Ok(Transition::Changed));
        assert!(order.is_terminal());
    }

    #[test]
    fn test_repeated_partial_with_lower_remaining_is_a_change() {
        let mut order = make_order();
        order
            .apply(&update(OrderStatus::PartialFilled, dec!(20), dec!(11), 10))
            .unwrap();
        let t = order.apply(&update(OrderStatus::PartialFilled, dec!(15), dec!(11), 11));
        assert_eq!(t, Ok(Transition::Changed));
    }

    #[test]
    fn test_same_state_newer_time_is_refresh() {
        let mut order = make_order();
        let t = order.apply(&update(OrderStatus::Submitted, dec!(22.22), dec!(0), 5));
        assert_eq!(t, Ok(Transition::Refreshed));
        assert_eq!(order.updated_at, Timestamp::from_millis(5));
    }

    #[test]
    fn test_duplicate_is_stale() {
        let mut order = make_order();
        let u = update(OrderStatus::PartialFilled, dec!(10), dec!(11.1), 10);
        order.apply(&u).unwrap();
        let before = order.clone();
        assert!(matches!(order.apply(&u), Err(OrderRejection::Stale { .. })));
        assert_eq!(order, before);
    }

    #[test]
    fn test_older_event_is_stale() {
        let mut order = make_order();
        order
            .apply(&update(OrderStatus::PartialFilled, dec!(10), dec!(11.1), 10))
            .unwrap();
        let err = order
            .apply(&update(OrderStatus::Submitted, dec!(22.22), dec!(0), 9))
            .unwrap_err();
        assert!(matches!(err, OrderRejection::Stale { .. }));
    }

    #[test]
    fn test_terminal_rejects_everything() {
        let mut order = make_order();
        order
            .apply(&update(OrderStatus::Canceled, dec!(22.22), dec!(0), 10))
            .unwrap();
        let err = order
            .apply(&update(OrderStatus::Filled, dec!(0), dec!(11), 99))
            .unwrap_err();
        assert_eq!(err, OrderRejection::Terminal(OrderStatus::Canceled));
        assert_eq!(order.status, OrderStatus::Canceled);
    }

    #[test]
    fn test_illegal_edge_rejected() {
        let mut order = make_order();
        order
            .apply(&update(OrderStatus::PartialFilled, dec!(10), dec!(11), 10))
            .unwrap();
        let err = order
            .apply(&update(OrderStatus::Submitted, dec!(10), dec!(11), 11))
            .unwrap_err();
        assert_eq!(
            err,
            OrderRejection::IllegalTransition {
                from: OrderStatus::PartialFilled,
                to: OrderStatus::Submitted
            }
        );
    }

    #[test]
    fn test_remaining_cannot_exceed_quantity() {
        let mut order = make_order();
        let err = order
            .apply(&update(OrderStatus::Submitted, dec!(30), dec!(0), 10))
            .unwrap_err();
        assert!(matches!(err, OrderRejection::InvalidQuantity { .. }));
    }

    #[test]
    fn test_remaining_cannot_grow_while_working() {
        let mut order = make_order();
        order
            .apply(&update(OrderStatus::PartialFilled, dec!(10), dec!(11), 10))
            .unwrap();
        let err = order
            .apply(&update(OrderStatus::PartialFilled, dec!(12), dec!(11), 11))
            .unwrap_err();
        assert!(matches!(err, OrderRejection::InvalidQuantity { .. }));
        assert_eq!(order.remaining_quantity, dec!(10));
    }

    #[test]
    fn test_cancel_may_report_larger_remaining() {
        let mut order = make_order();
        order
            .apply(&update(OrderStatus::PartialFilled, dec!(10), dec!(11), 10))
            .unwrap();
        let t = order.apply(&update(OrderStatus::Canceled, dec!(12), dec!(11), 11));
        assert_eq!(t, Ok(Transition::Changed));
    }

    // ── Local failure ──

    #[test]
    fn test_fail_locally() {
        let mut order = make_order();
        order.fail_locally(Timestamp::from_millis(50)).unwrap();
        assert_eq!(order.status, OrderStatus::Failed);
        assert_eq!(order.updated_at, Timestamp::from_millis(50));
        assert!(order.fail_locally(Timestamp::from_millis(60)).is_err());
    }

    #[test]
    fn test_fail_locally_after_fill_is_illegal() {
        let mut order = make_order();
        order
            .apply(&update(OrderStatus::PartialFilled, dec!(10), dec!(11), 10))
            .unwrap();
        assert!(matches!(
            order.fail_locally(Timestamp::from_millis(60)),
            Err(OrderRejection::IllegalTransition { .. })
        ));
    }

    #[test]
    fn test_status_update_from_raw_event() {
        let event = RawOrderEvent {
            remote_id: RemoteOrderId::new("R-1"),
            client_order_id: Option::None,
            status: "WEIRD".into(),
            remaining_quantity: dec!(1),
            average_price: dec!(0),
            update_time: Timestamp::from_millis(1),
            details: Option::None,
        };
        assert_eq!(
            StatusUpdate::try_from(&event),
            Err(UnknownStatus("WEIRD".into()))
        );
    }
}
