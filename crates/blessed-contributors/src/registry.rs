//! Contributor registry: a projection over `contributor.register.v1`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use blessed_projections::Projection;
use blessed_store_core::payloads::{from_value, to_value};
use blessed_store_core::{Event, EventDraft, StoreError};
use blessed_types::{NodeId, Role, KIND_CONTRIBUTOR_REGISTER, MAX_CONTRIBUTOR_NAME_LEN};

use crate::ContributorError;

/// Payload of `contributor.register.v1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterPayload {
    /// Node identity the contributor submits under.
    pub node_id: NodeId,
    /// Display name.
    pub name: String,
    /// Assigned role; drives the ingress permission matrix.
    pub role: Role,
    /// Free-form metadata.
    pub metadata: serde_json::Value,
}

/// A registered contributor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contributor {
    /// Stable contributor id (the registration event's id).
    pub id: String,
    /// Node identity the contributor submits under.
    pub node_id: NodeId,
    /// Display name.
    pub name: String,
    /// Assigned role.
    pub role: Role,
    /// Free-form metadata.
    pub metadata: serde_json::Value,
    /// Sequence number of the registration event.
    pub created_seq: u64,
}

/// Registry view folded from registration events.
#[derive(Debug, Default)]
pub struct ContributorRegistry {
    by_id: BTreeMap<String, Contributor>,
    by_node: BTreeMap<String, String>,
}

impl ContributorRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registration draft, rejecting duplicates and oversized names
    /// before anything reaches the journal.
    pub fn register_draft(&self, payload: &RegisterPayload) -> Result<EventDraft, StoreError> {
        if payload.name.is_empty() || payload.name.len() > MAX_CONTRIBUTOR_NAME_LEN {
            return Err(StoreError::InvalidPayload(format!(
                "contributor name must be 1..={MAX_CONTRIBUTOR_NAME_LEN} bytes"
            )));
        }
        if self.by_node.contains_key(payload.node_id.as_str()) {
            return Err(StoreError::InvalidPayload(
                ContributorError::DuplicateNodeId(payload.node_id.to_string()).to_string(),
            ));
        }
        Ok(EventDraft::new(KIND_CONTRIBUTOR_REGISTER, to_value(payload)?)
            .with_dedupe_key(payload.node_id.to_string()))
    }

    /// Look up a contributor by id.
    pub fn contributor(&self, id: &str) -> Option<&Contributor> {
        self.by_id.get(id)
    }

    /// Look up a contributor by node id.
    pub fn by_node_id(&self, node_id: &NodeId) -> Option<&Contributor> {
        self.by_node
            .get(node_id.as_str())
            .and_then(|id| self.by_id.get(id))
    }

    /// Number of registered contributors.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// True when nobody has registered yet.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Resolve a contributor or produce the ingress-facing error.
    pub fn require(&self, id: &str) -> Result<&Contributor, ContributorError> {
        self.contributor(id)
            .ok_or_else(|| ContributorError::NotFound(id.to_string()))
    }
}

impl Projection for ContributorRegistry {
    fn name(&self) -> &'static str {
        "contributors"
    }

    fn apply(&mut self, event: &Event) {
        if event.kind != KIND_CONTRIBUTOR_REGISTER {
            return;
        }
        let payload: RegisterPayload = match from_value(&event.payload) {
            Ok(p) => p,
            Err(e) => {
                warn!(seq = event.seq, error = %e, "skipping malformed registration");
                return;
            }
        };
        // Ingestion rejects duplicates; a replayed historical duplicate is
        // folded first-wins to keep the view deterministic.
        if self.by_node.contains_key(payload.node_id.as_str()) {
            warn!(seq = event.seq, node_id = %payload.node_id, "duplicate registration ignored");
            return;
        }
        let id = event.event_id.to_string();
        self.by_node
            .insert(payload.node_id.to_string(), id.clone());
        self.by_id.insert(
            id.clone(),
            Contributor {
                id,
                node_id: payload.node_id,
                name: payload.name,
                role: payload.role,
                metadata: payload.metadata,
                created_seq: event.seq,
            },
        );
    }

    fn reset(&mut self) {
        self.by_id.clear();
        self.by_node.clear();
    }

    fn state(&self) -> serde_json::Value {
        json!({ "contributors": self.by_id })
    }
}
