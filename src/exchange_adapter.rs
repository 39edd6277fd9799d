//! The external exchange contract the core consumes (spec.md §6).
//!
//! This is deliberately narrow: the core treats the venue (REST/WebSocket
//! transport, credential handling, symbol metadata refresh) as an external
//! collaborator and only depends on this trait. Grounded in the teacher's
//! `exchange::ExchangeClient` trait shape (async, `&mut self`, one error
//! enum) but re-cut to the exact operation set spec.md §6 lists; concrete
//! venue wiring (Hyperliquid signing, REST caching) lives in
//! `exchange.rs`/`signing.rs` and is adapted to this trait at the edge.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderSide {
    Bid,
    Ask,
}

/// Sum-type error surface (spec.md §9 "Replacing exception-based control
/// flow"): the StrategyLoop pattern-matches on kind rather than unwinding.
#[derive(Debug, Clone)]
pub enum AdapterError {
    Transient { kind: String },
    Rejected { reason: String },
    Fatal { reason: String },
}

impl std::fmt::Display for AdapterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdapterError::Transient { kind } => write!(f, "transient error: {kind}"),
            AdapterError::Rejected { reason } => write!(f, "rejected: {reason}"),
            AdapterError::Fatal { reason } => write!(f, "fatal: {reason}"),
        }
    }
}

impl std::error::Error for AdapterError {}

pub type AdapterResult<T> = Result<T, AdapterError>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModifyRequest {
    pub exchange_id: u64,
    pub new_price: f64,
    pub new_size: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenOrderSnapshot {
    pub exchange_id: u64,
    pub client_id: String,
    pub side: OrderSideWire,
    pub price: f64,
    pub size: f64,
}

/// Wire-friendly mirror of [`OrderSide`] (serde needs a concrete type).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSideWire {
    Bid,
    Ask,
}

#[derive(Debug, Clone, Copy)]
pub struct AssetMetadata {
    pub size_decimals: u32,
    pub tick_size: f64,
}

/// Consumed by `OrderManager`/`StrategyLoop` (spec.md §6). All operations
/// are asynchronous and cancellable; implementors own credential handling,
/// symbol metadata refresh, and the underlying transport.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    async fn mid_price(&mut self, symbol: &str) -> AdapterResult<f64>;
    async fn order_book(&mut self, symbol: &str, depth: usize) -> AdapterResult<(Vec<(f64, f64)>, Vec<(f64, f64)>)>;
    async fn recent_trades(&mut self, symbol: &str, since_ms: u64) -> AdapterResult<Vec<(u64, f64, f64, OrderSide)>>;
    async fn place_order(
        &mut self,
        symbol: &str,
        side: OrderSide,
        price: f64,
        size: f64,
        post_only: bool,
        client_id: &str,
    ) -> AdapterResult<u64>;
    async fn modify_orders(&mut self, requests: &[ModifyRequest]) -> AdapterResult<Vec<AdapterResult<()>>>;
    async fn cancel_all(&mut self, symbol: &str) -> AdapterResult<u64>;
    /// Cancels a single resting order by exchange id. Grounded in the
    /// teacher's `ExchangeClient::cancel_order`; needed alongside
    /// `cancel_all` so per-level reconciliation can drop one stale level
    /// without flattening the whole book.
    async fn cancel_order(&mut self, symbol: &str, exchange_id: u64) -> AdapterResult<()>;
    async fn open_orders(&mut self, symbol: &str) -> AdapterResult<Vec<OpenOrderSnapshot>>;
    async fn position(&mut self, symbol: &str) -> AdapterResult<f64>;
    async fn arm_dead_mans_switch(&mut self, timeout_ms: u64) -> AdapterResult<()>;
    async fn metadata(&mut self, symbol: &str) -> AdapterResult<AssetMetadata>;
}
