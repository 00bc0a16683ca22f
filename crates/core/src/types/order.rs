//! Order vocabulary: identifiers, action, order type and strategy identity.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Buy / long.
    Buy,
    /// Sell / short.
    Sell,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Buy => "buy",
            Action::Sell => "sell",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" => Ok(Action::Buy),
            "sell" => Ok(Action::Sell),
            _ => Err(ParseEnumError {
                kind: "action",
                value: s.to_string(),
            }),
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    /// Limit order resting at the given price.
    Limit,
    /// Market order, price is informational only.
    Market,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Limit => "limit",
            OrderType::Market => "market",
        }
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "limit" => Ok(OrderType::Limit),
            "market" => Ok(OrderType::Market),
            _ => Err(ParseEnumError {
                kind: "order type",
                value: s.to_string(),
            }),
        }
    }
}

/// Returned when a string does not name a known [`Action`] or [`OrderType`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {}: {:?}", self.kind, self.value)
    }
}

impl std::error::Error for ParseEnumError {}

/// Locally assigned order identifier, allocated before the venue knows the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderId(pub u64);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OID-{}", self.0)
    }
}

/// Venue-assigned order identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteOrderId(pub String);

impl RemoteOrderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trading pair symbol (e.g., "BTC/USDT").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol(pub String);

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Symbol {
    /// Create a new symbol.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

/// The (platform, account, strategy, symbol) tuple a lifecycle manager trades for.
///
/// Local [`OrderId`]s are unique within one identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StrategyIdentity {
    /// Venue name, e.g. `binance`.
    pub platform: String,
    /// Account name on the venue.
    pub account: String,
    /// Strategy name.
    pub strategy: String,
    /// Traded symbol.
    pub symbol: Symbol,
}

impl StrategyIdentity {
    pub fn new(
        platform: impl Into<String>,
        account: impl Into<String>,
        strategy: impl Into<String>,
        symbol: Symbol,
    ) -> Self {
        Self {
            platform: platform.into(),
            account: account.into(),
            strategy: strategy.into(),
            symbol,
        }
    }

    /// Client order id sent to the venue for the given local order.
    pub fn client_order_id(&self, order_id: OrderId) -> String {
        format!("{}-{}", self.strategy, order_id.0)
    }

    /// Inverse of [`client_order_id`](Self::client_order_id). `None` when the id
    /// was not issued for this strategy.
    pub fn parse_client_order_id(&self, client_order_id: &str) -> Option<OrderId> {
        client_order_id
            .strip_prefix(self.strategy.as_str())?
            .strip_prefix('-')?
            .parse()
            .ok()
            .map(OrderId)
    }
}

impl fmt::Display for StrategyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.platform, self.account, self.strategy, self.symbol
        )
    }
}
