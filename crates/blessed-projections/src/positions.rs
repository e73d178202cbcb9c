//! Positions view: open/closed positions plus the portfolio statistics the
//! kill switch evaluates its automatic triggers against.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use blessed_store_core::payloads::from_value;
use blessed_store_core::Event;
use blessed_types::{Direction, KIND_INTENT_CLOSE, KIND_INTENT_OPEN};

use crate::Projection;

/// Payload of `intent.open.v1`.
///
/// `size` is a fraction of equity; `entry`, `stop` and `target` are venue
/// prices derived from the volatility band at decision time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenIntentPayload {
    /// Stable identifier of the position being opened.
    pub position_id: String,
    /// Asset symbol.
    pub asset: String,
    /// Long or short.
    pub direction: Direction,
    /// Entry price.
    pub entry: f64,
    /// Position size as a fraction of equity.
    pub size: f64,
    /// Protective stop price.
    pub stop: f64,
    /// Profit target price.
    pub target: f64,
    /// Final conviction that produced the intent.
    pub conviction: f64,
}

/// Payload of `intent.close.v1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseIntentPayload {
    /// Position being closed.
    pub position_id: String,
    /// Exit price.
    pub exit: f64,
    /// Realized profit and loss as a fraction of equity.
    pub realized_pnl: f64,
    /// Why the position was closed.
    pub reason: String,
}

/// A position derived from intent events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Stable position identifier.
    pub id: String,
    /// Asset symbol.
    pub asset: String,
    /// Long or short.
    pub direction: Direction,
    /// Entry price.
    pub entry: f64,
    /// Size as a fraction of equity.
    pub size: f64,
    /// Protective stop price.
    pub stop: f64,
    /// Profit target price.
    pub target: f64,
    /// Sequence number of the opening intent.
    pub opened_seq: u64,
    /// Sequence number of the closing intent, if closed.
    pub closed_seq: Option<u64>,
    /// Realized profit and loss, if closed.
    pub realized_pnl: Option<f64>,
    /// Event id of the opening intent, linking back to its conviction.
    pub conviction_ref: String,
}

impl Position {
    /// Fraction of equity at risk if the stop is hit.
    pub fn risk(&self) -> f64 {
        if self.entry == 0.0 {
            return 0.0;
        }
        ((self.entry - self.stop).abs() / self.entry) * self.size
    }

    /// Whether the position is still open.
    pub fn is_open(&self) -> bool {
        self.closed_seq.is_none()
    }
}

/// Aggregate statistics the kill switch consults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioStats {
    /// Sum of all realized PnL fractions since genesis.
    pub realized_total: f64,
    /// Highest value `realized_total` has reached.
    pub peak_total: f64,
    /// Realized PnL per UTC date (`YYYY-MM-DD`).
    pub daily: BTreeMap<String, f64>,
}

impl PortfolioStats {
    /// Realized PnL for a UTC date.
    pub fn daily_pnl(&self, date: &str) -> f64 {
        self.daily.get(date).copied().unwrap_or(0.0)
    }

    /// Lifetime drawdown from the realized peak, in equity fraction points.
    pub fn drawdown(&self) -> f64 {
        (self.peak_total - self.realized_total).max(0.0)
    }
}

/// Positions and portfolio statistics, folded from intent events.
#[derive(Debug, Default)]
pub struct PositionsProjection {
    positions: BTreeMap<String, Position>,
    stats: PortfolioStats,
}

impl PositionsProjection {
    /// Empty view.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a position.
    pub fn position(&self, id: &str) -> Option<&Position> {
        self.positions.get(id)
    }

    /// All open positions.
    pub fn open_positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values().filter(|p| p.is_open())
    }

    /// Open position for an asset, if any.
    pub fn open_for_asset(&self, asset: &str) -> Option<&Position> {
        self.open_positions().find(|p| p.asset == asset)
    }

    /// Portfolio heat: total fraction of equity at risk across open
    /// positions.
    pub fn heat(&self) -> f64 {
        self.open_positions().map(Position::risk).sum()
    }

    /// Aggregate realized statistics.
    pub fn stats(&self) -> &PortfolioStats {
        &self.stats
    }

    fn apply_open(&mut self, event: &Event) {
        let payload: OpenIntentPayload = match from_value(&event.payload) {
            Ok(p) => p,
            Err(e) => {
                warn!(seq = event.seq, error = %e, "skipping malformed open intent");
                return;
            }
        };
        if self.positions.contains_key(&payload.position_id) {
            warn!(seq = event.seq, position_id = %payload.position_id, "duplicate open intent ignored");
            return;
        }
        self.positions.insert(
            payload.position_id.clone(),
            Position {
                id: payload.position_id,
                asset: payload.asset,
                direction: payload.direction,
                entry: payload.entry,
                size: payload.size,
                stop: payload.stop,
                target: payload.target,
                opened_seq: event.seq,
                closed_seq: None,
                realized_pnl: None,
                conviction_ref: event.event_id.to_string(),
            },
        );
    }

    fn apply_close(&mut self, event: &Event) {
        let payload: CloseIntentPayload = match from_value(&event.payload) {
            Ok(p) => p,
            Err(e) => {
                warn!(seq = event.seq, error = %e, "skipping malformed close intent");
                return;
            }
        };
        let Some(position) = self.positions.get_mut(&payload.position_id) else {
            warn!(seq = event.seq, position_id = %payload.position_id, "close intent for unknown position");
            return;
        };
        if !position.is_open() {
            warn!(seq = event.seq, position_id = %payload.position_id, "close intent for closed position");
            return;
        }
        position.closed_seq = Some(event.seq);
        position.realized_pnl = Some(payload.realized_pnl);

        self.stats.realized_total += payload.realized_pnl;
        self.stats.peak_total = self.stats.peak_total.max(self.stats.realized_total);
        let date = event.ts.format("%Y-%m-%d").to_string();
        *self.stats.daily.entry(date).or_insert(0.0) += payload.realized_pnl;
    }
}

impl Projection for PositionsProjection {
    fn name(&self) -> &'static str {
        "positions"
    }

    fn apply(&mut self, event: &Event) {
        match event.kind.as_str() {
            k if k == KIND_INTENT_OPEN => self.apply_open(event),
            k if k == KIND_INTENT_CLOSE => self.apply_close(event),
            _ => {}
        }
    }

    fn reset(&mut self) {
        self.positions.clear();
        self.stats = PortfolioStats::default();
    }

    fn state(&self) -> serde_json::Value {
        json!({
            "positions": self.positions,
            "stats": self.stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blessed_store_core::EventDraft;
    use chrono::{TimeZone, Utc};
    use serde_json::Value;

    fn event_at(seq: u64, kind: &str, payload: Value, day: u32) -> Event {
        let draft = EventDraft::new(kind, payload);
        Event {
            event_id: draft.event_id,
            seq,
            ts: Utc.with_ymd_and_hms(2026, 7, day, 12, 0, 0).unwrap(),
            kind: draft.kind,
            schema_version: draft.schema_version,
            source: None,
            trace_id: None,
            dedupe_key: None,
            payload: draft.payload,
            prev_hash: [0u8; 32],
            hash: [0u8; 32],
            signer: blessed_types::NodeId("n".into()),
            signature: ed25519_dalek::Signature::from_bytes(&[0u8; 64]),
        }
    }

    fn open_event(seq: u64, id: &str, day: u32) -> Event {
        event_at(
            seq,
            KIND_INTENT_OPEN,
            json!({
                "position_id": id,
                "asset": "BTC",
                "direction": "long",
                "entry": 50000.0,
                "size": 0.1,
                "stop": 47500.0,
                "target": 55000.0,
                "conviction": 0.8,
            }),
            day,
        )
    }

    fn close_event(seq: u64, id: &str, pnl: f64, day: u32) -> Event {
        event_at(
            seq,
            KIND_INTENT_CLOSE,
            json!({
                "position_id": id,
                "exit": 52000.0,
                "realized_pnl": pnl,
                "reason": "target",
            }),
            day,
        )
    }

    #[test]
    fn open_then_close_lifecycle() {
        let mut view = PositionsProjection::new();
        view.apply(&open_event(1, "p1", 1));
        assert_eq!(view.open_positions().count(), 1);
        assert!(view.heat() > 0.0);

        view.apply(&close_event(2, "p1", 0.02, 1));
        assert_eq!(view.open_positions().count(), 0);
        let p = view.position("p1").unwrap();
        assert_eq!(p.closed_seq, Some(2));
        assert_eq!(p.realized_pnl, Some(0.02));
        assert_eq!(view.heat(), 0.0);
    }

    #[test]
    fn heat_sums_open_risk() {
        let mut view = PositionsProjection::new();
        view.apply(&open_event(1, "p1", 1));
        view.apply(&open_event(2, "p2", 1));
        // Each position risks (2500/50000) * 0.1 = 0.005 of equity.
        assert!((view.heat() - 0.01).abs() < 1e-12);
    }

    #[test]
    fn stats_track_daily_and_drawdown() {
        let mut view = PositionsProjection::new();
        view.apply(&open_event(1, "p1", 1));
        view.apply(&close_event(2, "p1", 0.05, 1));
        view.apply(&open_event(3, "p2", 2));
        view.apply(&close_event(4, "p2", -0.03, 2));

        let stats = view.stats();
        assert!((stats.realized_total - 0.02).abs() < 1e-12);
        assert!((stats.peak_total - 0.05).abs() < 1e-12);
        assert!((stats.drawdown() - 0.03).abs() < 1e-12);
        assert!((stats.daily_pnl("2026-07-01") - 0.05).abs() < 1e-12);
        assert!((stats.daily_pnl("2026-07-02") + 0.03).abs() < 1e-12);
        assert_eq!(stats.daily_pnl("2026-07-03"), 0.0);
    }

    #[test]
    fn close_for_unknown_position_is_skipped() {
        let mut view = PositionsProjection::new();
        view.apply(&close_event(1, "ghost", 0.5, 1));
        assert_eq!(view.stats().realized_total, 0.0);
    }

    #[test]
    fn reset_clears_everything() {
        let mut view = PositionsProjection::new();
        view.apply(&open_event(1, "p1", 1));
        view.apply(&close_event(2, "p1", 0.02, 1));
        view.reset();
        assert_eq!(view.state(), PositionsProjection::new().state());
    }
}
