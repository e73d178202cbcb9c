//! Schema-version upcasting for historical payloads.
//!
//! Each event kind registers its current schema version and a set of
//! stepwise upcast functions (`v1 → v2`, `v2 → v3`, …). Normalization walks
//! the chain until the payload reaches the current shape. A version with no
//! path to current – typically a *future* version written by newer software
//! – is quarantined: logged, counted, and withheld from projections.

use std::collections::HashMap;

use serde_json::Value;
use tracing::warn;

use blessed_store_core::Event;

use crate::ProjectionError;

/// A single stepwise payload migration.
pub type UpcastFn = fn(Value) -> Result<Value, String>;

/// Record of an event withheld from projections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuarantinedEvent {
    /// Sequence number of the withheld event.
    pub seq: u64,
    /// Event kind.
    pub kind: String,
    /// Unrecognized schema version.
    pub schema_version: String,
}

/// Outcome of normalizing one event.
#[derive(Debug)]
pub enum Normalized {
    /// Event payload is in the current shape (possibly after upcasting).
    Current(Event),
    /// No upcast path exists; the event is withheld.
    Quarantined(QuarantinedEvent),
}

/// Registry of current schema versions and upcast steps per kind.
///
/// Kinds absent from the registry pass through untouched: projections
/// simply ignore kinds they do not fold, and versioning those kinds is the
/// business of whoever registers them.
#[derive(Default)]
pub struct UpcasterRegistry {
    current: HashMap<String, String>,
    steps: HashMap<(String, String), (String, UpcastFn)>,
}

impl UpcasterRegistry {
    /// Empty registry; everything passes through.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the current schema version for `kind`.
    pub fn register_current(&mut self, kind: impl Into<String>, version: impl Into<String>) {
        self.current.insert(kind.into(), version.into());
    }

    /// Register a stepwise migration for `kind` from `from` to `to`.
    pub fn register_step(
        &mut self,
        kind: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
        f: UpcastFn,
    ) {
        self.steps
            .insert((kind.into(), from.into()), (to.into(), f));
    }

    /// Bring an event's payload to the current shape, or quarantine it.
    pub fn normalize(&self, event: &Event) -> Result<Normalized, ProjectionError> {
        let current = match self.current.get(&event.kind) {
            Some(version) => version,
            None => return Ok(Normalized::Current(event.clone())),
        };
        if &event.schema_version == current {
            return Ok(Normalized::Current(event.clone()));
        }

        let mut version = event.schema_version.clone();
        let mut payload = event.payload.clone();
        // Walk the step chain; an absent step means no path to current.
        while &version != current {
            let Some((next, f)) = self.steps.get(&(event.kind.clone(), version.clone())) else {
                warn!(
                    seq = event.seq,
                    kind = %event.kind,
                    schema_version = %event.schema_version,
                    "quarantining event with no upcast path"
                );
                return Ok(Normalized::Quarantined(QuarantinedEvent {
                    seq: event.seq,
                    kind: event.kind.clone(),
                    schema_version: event.schema_version.clone(),
                }));
            };
            payload = f(payload).map_err(|detail| ProjectionError::UpcastFailed {
                kind: event.kind.clone(),
                version: version.clone(),
                seq: event.seq,
                detail,
            })?;
            version = next.clone();
        }

        let mut upcast = event.clone();
        upcast.schema_version = version;
        upcast.payload = payload;
        Ok(Normalized::Current(upcast))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blessed_store_core::EventDraft;
    use chrono::Utc;
    use serde_json::json;

    fn event_with(kind: &str, version: &str, payload: Value) -> Event {
        // Hand-built record; upcasting only looks at kind/version/payload.
        let draft = EventDraft::new(kind, payload).with_schema_version(version);
        Event {
            event_id: draft.event_id,
            seq: 7,
            ts: Utc::now(),
            kind: draft.kind,
            schema_version: draft.schema_version,
            source: None,
            trace_id: None,
            dedupe_key: None,
            payload: draft.payload,
            prev_hash: [0u8; 32],
            hash: [1u8; 32],
            signer: blessed_types::NodeId("n".into()),
            signature: ed25519_dalek::Signature::from_bytes(&[0u8; 64]),
        }
    }

    fn rename_rsi(mut v: Value) -> Result<Value, String> {
        let obj = v.as_object_mut().ok_or("not an object")?;
        let old = obj.remove("rsi_value").ok_or("missing rsi_value")?;
        obj.insert("rsi".into(), old);
        Ok(v)
    }

    #[test]
    fn current_version_passes_through() {
        let mut registry = UpcasterRegistry::new();
        registry.register_current("signal.ta.rsi.v1", "2");
        let event = event_with("signal.ta.rsi.v1", "2", json!({"rsi": 24.1}));
        assert!(matches!(
            registry.normalize(&event).unwrap(),
            Normalized::Current(_)
        ));
    }

    #[test]
    fn unregistered_kind_passes_through() {
        let registry = UpcasterRegistry::new();
        let event = event_with("signal.custom.x.v1", "9", json!({}));
        assert!(matches!(
            registry.normalize(&event).unwrap(),
            Normalized::Current(_)
        ));
    }

    #[test]
    fn step_chain_upcasts_historical_payload() {
        let mut registry = UpcasterRegistry::new();
        registry.register_current("signal.ta.rsi.v1", "2");
        registry.register_step("signal.ta.rsi.v1", "1", "2", rename_rsi);

        let event = event_with("signal.ta.rsi.v1", "1", json!({"rsi_value": 24.1}));
        match registry.normalize(&event).unwrap() {
            Normalized::Current(upcast) => {
                assert_eq!(upcast.schema_version, "2");
                assert_eq!(upcast.payload, json!({"rsi": 24.1}));
            }
            other => panic!("expected upcast, got {other:?}"),
        }
    }

    #[test]
    fn future_version_is_quarantined() {
        let mut registry = UpcasterRegistry::new();
        registry.register_current("signal.ta.rsi.v1", "2");
        let event = event_with("signal.ta.rsi.v1", "3", json!({"rsi": 1.0}));
        match registry.normalize(&event).unwrap() {
            Normalized::Quarantined(entry) => {
                assert_eq!(entry.seq, 7);
                assert_eq!(entry.schema_version, "3");
            }
            other => panic!("expected quarantine, got {other:?}"),
        }
    }

    #[test]
    fn failing_step_is_an_error() {
        let mut registry = UpcasterRegistry::new();
        registry.register_current("signal.ta.rsi.v1", "2");
        registry.register_step("signal.ta.rsi.v1", "1", "2", rename_rsi);
        let event = event_with("signal.ta.rsi.v1", "1", json!({"wrong_field": 1}));
        assert!(matches!(
            registry.normalize(&event),
            Err(ProjectionError::UpcastFailed { .. })
        ));
    }
}
