//! Order lifecycle manager: reconciliation, rounding, dedup, dead-man
//! switch, idempotent client ids (spec.md §4.5).
//!
//! Grounded in the teacher's `execution::MmExecutionEngine` (owns
//! per-coin desired vs. live state, drives `cancel_all`/reconcile-after-
//! reconnect) and `exchange::LiveExchange::{open_order, cancel_order}`
//! for the post-only/ALO submission shape, generalized from "one order
//! per coin" into per-(side, level) reconciliation against a multi-level
//! `Quote`.

use crate::exchange_adapter::{
    AdapterResult, AssetMetadata, ExchangeAdapter, ModifyRequest, OpenOrderSnapshot, OrderSide,
};
use crate::inventory::{FillEvent, Side};
use crate::quote_engine::Quote;
use crate::rounding::VenueGranularity;
use std::collections::{HashMap, HashSet, VecDeque};

/// One live resting order, keyed by (side, level_index) — spec.md §3
/// invariant: at most one live order per (side, level).
#[derive(Debug, Clone)]
pub struct LiveOrder {
    pub client_id: String,
    pub side: OrderSide,
    pub price: f64,
    pub size: f64,
    pub level_index: u32,
    pub exchange_id: Option<u64>,
    pub placed_at_ms: u64,
}

#[derive(Debug, Clone)]
pub enum Intent {
    Place {
        side: OrderSide,
        level_index: u32,
        price: f64,
        size: f64,
        client_id: String,
    },
    Modify {
        exchange_id: u64,
        side: OrderSide,
        level_index: u32,
        new_price: f64,
        new_size: f64,
    },
    Cancel {
        exchange_id: Option<u64>,
        side: OrderSide,
        level_index: u32,
    },
}

const IDEMPOTENCE_WINDOW: usize = 256;

/// Translates a desired [`Quote`] into a minimal place/modify/cancel plan
/// against currently known live orders, then submits it to an
/// [`ExchangeAdapter`] with post-only semantics and batched modifies.
pub struct OrderManager {
    symbol: String,
    modify_threshold_bps: f64,
    batch_size: usize,
    live_orders: HashMap<(OrderSide, u32), LiveOrder>,
    tick_seq: u64,
    seen_client_ids: HashSet<String>,
    seen_client_id_order: VecDeque<String>,
    dead_man_last_armed_ms: Option<u64>,
    dead_man_cadence_ms: u64,
    dead_man_timeout_ms: u64,
}

impl OrderManager {
    pub fn new(symbol: impl Into<String>, modify_threshold_bps: f64, batch_size: usize) -> Self {
        Self {
            symbol: symbol.into(),
            modify_threshold_bps,
            batch_size: batch_size.max(1),
            live_orders: HashMap::new(),
            tick_seq: 0,
            seen_client_ids: HashSet::new(),
            seen_client_id_order: VecDeque::new(),
            dead_man_last_armed_ms: None,
            dead_man_cadence_ms: 15_000,
            dead_man_timeout_ms: 60_000,
        }
    }

    pub fn live_orders(&self) -> impl Iterator<Item = &LiveOrder> {
        self.live_orders.values()
    }

    /// Builds the reconciliation plan for one tick: rounds desired prices
    /// and sizes, dedups against live orders within `modify_threshold_bps`,
    /// and emits place/modify/cancel intents (spec.md §4.5 rules 1-5).
    pub fn reconcile(&mut self, quote: &Quote, mid: f64, granularity: VenueGranularity) -> Vec<Intent> {
        self.tick_seq += 1;
        let mut intents = Vec::new();
        let mut desired_levels: HashSet<(OrderSide, u32)> = HashSet::new();

        for (i, level) in quote.levels.iter().enumerate() {
            let level_index = i as u32;
            for side in [OrderSide::Bid, OrderSide::Ask] {
                let suppressed = match side {
                    OrderSide::Bid => quote.suppress_bid,
                    OrderSide::Ask => quote.suppress_ask,
                };
                let (raw_price, raw_size) = match side {
                    OrderSide::Bid => (level.bid_price, level.bid_size),
                    OrderSide::Ask => (level.ask_price, level.ask_size),
                };

                let desired = if suppressed {
                    None
                } else {
                    let rounded_price = granularity.round_price(raw_price);
                    granularity.round_size(raw_size).map(|size| (rounded_price, size))
                };

                let key = (side, level_index);
                let existing = self.live_orders.get(&key).cloned();

                match (existing, desired) {
                    (None, None) => {}
                    (None, Some((price, size))) => {
                        desired_levels.insert(key);
                        let client_id = self.next_client_id(side, level_index);
                        intents.push(Intent::Place {
                            side,
                            level_index,
                            price,
                            size,
                            client_id,
                        });
                    }
                    (Some(live), Some((price, size))) => {
                        desired_levels.insert(key);
                        let delta_bps = if mid > 0.0 { (price - live.price).abs() / mid * 1e4 } else { 0.0 };
                        if delta_bps >= self.modify_threshold_bps || (live.size - size).abs() > 1e-12 {
                            if let Some(exchange_id) = live.exchange_id {
                                intents.push(Intent::Modify {
                                    exchange_id,
                                    side,
                                    level_index,
                                    new_price: price,
                                    new_size: size,
                                });
                            }
                        }
                        // Else: within threshold and same size — dedup, emit nothing.
                    }
                    (Some(live), None) => {
                        intents.push(Intent::Cancel {
                            exchange_id: live.exchange_id,
                            side,
                            level_index,
                        });
                    }
                }
            }
        }

        // Any live order at a level index beyond the current quote (e.g.
        // num_levels shrank on hot-reload) has no counterpart in the loop
        // above and is cancelled too.
        let num_levels = quote.levels.len() as u32;
        for (key, live) in self.live_orders.iter() {
            if key.1 >= num_levels {
                intents.push(Intent::Cancel {
                    exchange_id: live.exchange_id,
                    side: key.0,
                    level_index: key.1,
                });
            }
        }

        intents
    }

    fn next_client_id(&mut self, side: OrderSide, level_index: u32) -> String {
        let side_tag = match side {
            OrderSide::Bid => "B",
            OrderSide::Ask => "A",
        };
        let id = format!("{}-{}-{}-{}", self.symbol, level_index, side_tag, self.tick_seq);
        self.remember_client_id(id.clone());
        id
    }

    fn remember_client_id(&mut self, id: String) {
        if self.seen_client_ids.insert(id.clone()) {
            self.seen_client_id_order.push_back(id);
            if self.seen_client_id_order.len() > IDEMPOTENCE_WINDOW {
                if let Some(oldest) = self.seen_client_id_order.pop_front() {
                    self.seen_client_ids.remove(&oldest);
                }
            }
        }
    }

    /// True if `client_id` has already been submitted this session — a
    /// replay with the same id is a no-op (spec.md §4.5 idempotence).
    pub fn is_replay(&self, client_id: &str) -> bool {
        self.seen_client_ids.contains(client_id)
    }

    /// Submits the plan: places are sent one at a time (post-only), modifies
    /// are batched up to `batch_size` per call, cancels go through
    /// individually against the adapter's per-order cancel path.
    pub async fn submit(
        &mut self,
        adapter: &mut dyn ExchangeAdapter,
        intents: Vec<Intent>,
        now_ms: u64,
    ) -> AdapterResult<()> {
        let mut modify_batch: Vec<ModifyRequest> = Vec::new();
        let mut pending_modify_keys: Vec<(OrderSide, u32)> = Vec::new();

        for intent in intents {
            match intent {
                Intent::Place {
                    side,
                    level_index,
                    price,
                    size,
                    client_id,
                } => {
                    if self.is_replay(&client_id) && self.live_orders.contains_key(&(side, level_index)) {
                        continue;
                    }
                    let exchange_id = adapter
                        .place_order(&self.symbol, side, price, size, true, &client_id)
                        .await?;
                    self.live_orders.insert(
                        (side, level_index),
                        LiveOrder {
                            client_id,
                            side,
                            price,
                            size,
                            level_index,
                            exchange_id: Some(exchange_id),
                            placed_at_ms: now_ms,
                        },
                    );
                }
                Intent::Modify {
                    exchange_id,
                    side,
                    level_index,
                    new_price,
                    new_size,
                } => {
                    modify_batch.push(ModifyRequest {
                        exchange_id,
                        new_price,
                        new_size,
                    });
                    pending_modify_keys.push((side, level_index));
                    if modify_batch.len() >= self.batch_size {
                        self.flush_modify_batch(adapter, &mut modify_batch, &mut pending_modify_keys).await?;
                    }
                }
                Intent::Cancel {
                    exchange_id,
                    side,
                    level_index,
                } => {
                    if let Some(id) = exchange_id {
                        adapter.cancel_order(&self.symbol, id).await?;
                    }
                    self.live_orders.remove(&(side, level_index));
                }
            }
        }

        if !modify_batch.is_empty() {
            let results = adapter.modify_orders(&modify_batch).await?;
            for ((key, req), result) in pending_modify_keys.iter().zip(modify_batch.iter()).zip(results.iter()) {
                if result.is_ok() {
                    if let Some(live) = self.live_orders.get_mut(key) {
                        live.price = req.new_price;
                        live.size = req.new_size;
                    }
                }
            }
        }

        Ok(())
    }

    async fn flush_modify_batch(
        &mut self,
        adapter: &mut dyn ExchangeAdapter,
        batch: &mut Vec<ModifyRequest>,
        keys: &mut Vec<(OrderSide, u32)>,
    ) -> AdapterResult<()> {
        let results = adapter.modify_orders(batch).await?;
        for ((key, req), result) in keys.iter().zip(batch.iter()).zip(results.iter()) {
            if result.is_ok() {
                if let Some(live) = self.live_orders.get_mut(key) {
                    live.price = req.new_price;
                    live.size = req.new_size;
                }
            }
        }
        batch.clear();
        keys.clear();
        Ok(())
    }

    /// Diffs a fresh `open_orders` snapshot against known live orders to
    /// recover fills when the adapter does not stream them (spec.md §4.5
    /// "Fill detection"). A vanished exchange id is a fill if `Inventory`'s
    /// net position moved on that side this tick, otherwise a cancel.
    pub fn diff_fills(&mut self, snapshot: &[OpenOrderSnapshot], position_moved_since_last: bool, now_ms: u64) -> Vec<FillEvent> {
        let live_ids: HashSet<u64> = snapshot.iter().map(|o| o.exchange_id).collect();
        let mut fills = Vec::new();

        let vanished: Vec<(OrderSide, u32)> = self
            .live_orders
            .iter()
            .filter(|(_, live)| live.exchange_id.map(|id| !live_ids.contains(&id)).unwrap_or(false))
            .map(|(key, _)| *key)
            .collect();

        for key in vanished {
            if let Some(live) = self.live_orders.remove(&key) {
                if position_moved_since_last {
                    let fill_side = match live.side {
                        OrderSide::Bid => Side::Buy,
                        OrderSide::Ask => Side::Sell,
                    };
                    fills.push(FillEvent {
                        side_is_buy: fill_side == Side::Buy,
                        price: live.price,
                        size: live.size,
                        fee: 0.0,
                        timestamp_ms: now_ms,
                    });
                }
            }
        }

        for snap in snapshot {
            for live in self.live_orders.values_mut() {
                if live.exchange_id == Some(snap.exchange_id) && (live.size - snap.size).abs() > 1e-12 {
                    let filled_size = live.size - snap.size;
                    if filled_size > 0.0 {
                        fills.push(FillEvent {
                            side_is_buy: live.side == OrderSide::Bid,
                            price: live.price,
                            size: filled_size,
                            fee: 0.0,
                            timestamp_ms: now_ms,
                        });
                    }
                    live.size = snap.size;
                }
            }
        }

        fills
    }

    /// Re-arms the venue-side auto-cancel if `dead_man_cadence_ms` has
    /// elapsed since the last arm (spec.md §4.5 dead-man switch).
    pub async fn maybe_arm_dead_mans_switch(&mut self, adapter: &mut dyn ExchangeAdapter, now_ms: u64) -> AdapterResult<bool> {
        let due = match self.dead_man_last_armed_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.dead_man_cadence_ms,
        };
        if due {
            adapter.arm_dead_mans_switch(self.dead_man_timeout_ms).await?;
            self.dead_man_last_armed_ms = Some(now_ms);
        }
        Ok(due)
    }

    pub async fn fetch_metadata(&self, adapter: &mut dyn ExchangeAdapter) -> AdapterResult<AssetMetadata> {
        adapter.metadata(&self.symbol).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quote_engine::QuoteLevel;

    fn granularity() -> VenueGranularity {
        VenueGranularity { size_decimals: 2 }
    }

    fn one_level_quote(bid: f64, ask: f64, size: f64) -> Quote {
        Quote {
            levels: vec![QuoteLevel {
                bid_price: bid,
                bid_size: size,
                ask_price: ask,
                ask_size: size,
            }],
            suppress_bid: false,
            suppress_ask: false,
        }
    }

    #[test]
    fn fresh_tick_with_no_live_orders_emits_two_places() {
        let mut om = OrderManager::new("BTC", 1.0, 20);
        let quote = one_level_quote(99.83, 100.17, 1.0);
        let intents = om.reconcile(&quote, 100.0, granularity());
        assert_eq!(intents.len(), 2);
        assert!(intents.iter().all(|i| matches!(i, Intent::Place { .. })));
    }

    #[test]
    fn suppressed_side_with_no_live_order_emits_nothing() {
        let mut om = OrderManager::new("BTC", 1.0, 20);
        let mut quote = one_level_quote(99.83, 100.17, 1.0);
        quote.suppress_bid = true;
        let intents = om.reconcile(&quote, 100.0, granularity());
        assert_eq!(intents.len(), 1);
        assert!(matches!(intents[0], Intent::Place { side: OrderSide::Ask, .. }));
    }

    #[test]
    fn unchanged_price_within_threshold_dedups() {
        let mut om = OrderManager::new("BTC", 1.0, 20);
        om.live_orders.insert(
            (OrderSide::Bid, 0),
            LiveOrder {
                client_id: "x".into(),
                side: OrderSide::Bid,
                price: 99.83,
                size: 1.0,
                level_index: 0,
                exchange_id: Some(1),
                placed_at_ms: 0,
            },
        );
        om.live_orders.insert(
            (OrderSide::Ask, 0),
            LiveOrder {
                client_id: "y".into(),
                side: OrderSide::Ask,
                price: 100.17,
                size: 1.0,
                level_index: 0,
                exchange_id: Some(2),
                placed_at_ms: 0,
            },
        );
        let quote = one_level_quote(99.8301, 100.1699, 1.0);
        let intents = om.reconcile(&quote, 100.0, granularity());
        assert!(intents.is_empty());
    }

    #[test]
    fn price_move_beyond_threshold_emits_modify() {
        let mut om = OrderManager::new("BTC", 1.0, 20);
        om.live_orders.insert(
            (OrderSide::Bid, 0),
            LiveOrder {
                client_id: "x".into(),
                side: OrderSide::Bid,
                price: 99.83,
                size: 1.0,
                level_index: 0,
                exchange_id: Some(1),
                placed_at_ms: 0,
            },
        );
        om.live_orders.insert(
            (OrderSide::Ask, 0),
            LiveOrder {
                client_id: "y".into(),
                side: OrderSide::Ask,
                price: 100.17,
                size: 1.0,
                level_index: 0,
                exchange_id: Some(2),
                placed_at_ms: 0,
            },
        );
        let quote = one_level_quote(99.50, 100.50, 1.0);
        let intents = om.reconcile(&quote, 100.0, granularity());
        assert_eq!(intents.len(), 2);
        assert!(intents.iter().all(|i| matches!(i, Intent::Modify { .. })));
    }

    #[test]
    fn toxicity_suppression_cancels_existing_live_orders() {
        let mut om = OrderManager::new("BTC", 1.0, 20);
        om.live_orders.insert(
            (OrderSide::Bid, 0),
            LiveOrder {
                client_id: "x".into(),
                side: OrderSide::Bid,
                price: 99.83,
                size: 1.0,
                level_index: 0,
                exchange_id: Some(1),
                placed_at_ms: 0,
            },
        );
        let mut quote = one_level_quote(99.83, 100.17, 1.0);
        quote.suppress_bid = true;
        quote.suppress_ask = true;
        let intents = om.reconcile(&quote, 100.0, granularity());
        assert_eq!(intents.len(), 1);
        assert!(matches!(intents[0], Intent::Cancel { side: OrderSide::Bid, .. }));
    }

    #[test]
    fn client_ids_are_unique_per_tick_and_level() {
        let mut om = OrderManager::new("BTC", 1.0, 20);
        let id_a = om.next_client_id(OrderSide::Bid, 0);
        om.tick_seq += 1;
        let id_b = om.next_client_id(OrderSide::Bid, 0);
        assert_ne!(id_a, id_b);
        assert!(om.is_replay(&id_a));
    }

    #[test]
    fn rounding_zeroes_size_treats_level_as_suppressed() {
        let mut om = OrderManager::new("BTC", 1.0, 20);
        let granularity = VenueGranularity { size_decimals: 0 };
        let quote = one_level_quote(99.83, 100.17, 0.004);
        let intents = om.reconcile(&quote, 100.0, granularity);
        assert!(intents.is_empty());
    }
}
