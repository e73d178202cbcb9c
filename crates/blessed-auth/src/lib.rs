#![forbid(unsafe_code)]

//! **blessed-auth** – Capability-based authorization primitives for the
//! Blessed ledger.
//!
//! This crate defines the canonical `Claims` structure and the two key
//! traits – [`CapabilityToken`] and [`TokenValidator`] – used across the
//! workspace, together with the permission vocabulary enforced at the
//! ingress boundary. A simple HS256 JWT implementation (`JwtHs256Token` /
//! `JwtHs256Validator`) is bundled.
//!
//! The kill switch distinguishes the *default* operator capability from the
//! *elevated* one: compromise of a routine operator token must never be
//! sufficient to lower the kill-switch level or rewrite settlement policy.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use blessed_types::Role;

//─────────────────────────────
//  Permission vocabulary
//─────────────────────────────

/// Permission names carried in [`Claims::permissions`].
pub mod permissions {
    /// Submit producer signals through the attributed ingress path.
    pub const SUBMIT_SIGNAL: &str = "signal.submit";
    /// Trigger a brain cycle.
    pub const RUN_CYCLE: &str = "cycle.run";
    /// Raise the kill-switch level.
    pub const KILL_SWITCH_RAISE: &str = "kill_switch.raise";
    /// Lower the kill-switch level. Elevated: never granted by default
    /// operator tokens.
    pub const KILL_SWITCH_LOWER: &str = "kill_switch.lower";
    /// Settle karma intents.
    pub const KARMA_SETTLE: &str = "karma.settle";
    /// Change settlement policy after first settlement. Elevated.
    pub const KARMA_POLICY: &str = "karma.policy";
}

/// Default (non-elevated) permission set for a role.
pub fn default_permissions(role: Role) -> Vec<String> {
    use permissions::*;
    let perms: &[&str] = match role {
        Role::Operator => &[SUBMIT_SIGNAL, RUN_CYCLE, KILL_SWITCH_RAISE, KARMA_SETTLE],
        Role::Agent | Role::Curator | Role::Tester => &[SUBMIT_SIGNAL],
    };
    perms.iter().map(|p| p.to_string()).collect()
}

//─────────────────────────────
//  Errors
//─────────────────────────────

/// Authorization errors.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Token failed signature, structure, or expiry checks.
    #[error("token rejected: {0}")]
    TokenRejected(String),
    /// The system clock is unusable for issuing timestamps.
    #[error("clock error: {0}")]
    Clock(String),
}

/// Crate result helper.
pub type Result<T> = std::result::Result<T, AuthError>;

//─────────────────────────────
//  Claims
//─────────────────────────────

/// Canonical claim set embedded in every capability token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject – the contributor identifier presenting the capability.
    pub sub: String,
    /// Node the capability was issued for.
    pub node: String,
    /// Ordered list of permissions (see [`permissions`]).
    pub permissions: Vec<String>,
    /// Issued-at timestamp (seconds since Unix epoch).
    pub iat: u64,
    /// Absolute expiry timestamp (seconds since Unix epoch).
    pub exp: u64,
    /// Unique token identifier (UUIDv4) for replay protection.
    pub jti: String,
}

impl Claims {
    /// Issue a claim set valid for `ttl_secs` from now, with a fresh
    /// replay-protection id.
    pub fn issue(
        subject: impl Into<String>,
        node: impl Into<String>,
        permissions: Vec<String>,
        ttl_secs: u64,
    ) -> Result<Self> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| AuthError::Clock(e.to_string()))?
            .as_secs();
        Ok(Self {
            sub: subject.into(),
            node: node.into(),
            permissions,
            iat: now,
            exp: now.saturating_add(ttl_secs),
            jti: Uuid::new_v4().to_string(),
        })
    }

    /// True when the claim set carries `permission`.
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }

    /// True when the claim set carries an elevated permission, i.e. one
    /// outside [`default_permissions`] for every role.
    pub fn is_elevated(&self) -> bool {
        self.has_permission(permissions::KILL_SWITCH_LOWER)
            || self.has_permission(permissions::KARMA_POLICY)
    }
}

//─────────────────────────────
//  Trait definitions
//─────────────────────────────

/// Abstract behaviour common to *all* capability token formats.
#[async_trait]
pub trait CapabilityToken: Sized + Send + Sync {
    /// Mint a new token from raw `claims` using the provided secret / key.
    async fn mint(claims: &Claims, key: &[u8]) -> Result<Self>;

    /// Return the serialized wire representation (e.g. JWT string).
    fn as_str(&self) -> &str;
}

/// Verifier trait used by the ingress boundary before executing an operation.
#[async_trait]
pub trait TokenValidator: Send + Sync {
    /// Verify authenticity + expiry, returning the embedded [`Claims`].
    async fn validate(&self, raw: &str) -> Result<Claims>;
}

//─────────────────────────────
//  HS256 JWT implementation
//─────────────────────────────

/// Bundled HS256 JWT capability tokens.
pub mod hs256 {
    use async_trait::async_trait;
    use jsonwebtoken::{
        decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation,
    };

    use super::{AuthError, CapabilityToken, Claims, Result, TokenValidator};

    /// JWT `typ` header marking Blessed capability tokens.
    const TOKEN_TYPE: &str = "blessed.cap+jwt";

    /// A minted HS256 capability token. Holds only the encoded wire form;
    /// the claims come back out through a validator, never by trusting the
    /// token object itself.
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    #[serde(transparent)]
    pub struct JwtHs256Token {
        encoded: String,
    }

    #[async_trait]
    impl CapabilityToken for JwtHs256Token {
        async fn mint(claims: &Claims, key: &[u8]) -> Result<Self> {
            let mut header = Header::new(Algorithm::HS256);
            header.typ = Some(TOKEN_TYPE.to_string());
            encode(&header, claims, &EncodingKey::from_secret(key))
                .map(|encoded| Self { encoded })
                .map_err(|e| AuthError::TokenRejected(e.to_string()))
        }

        fn as_str(&self) -> &str {
            &self.encoded
        }
    }

    /// HS256 validator holding the prepared decoding key and rules.
    ///
    /// Expiry is mandatory and checked with zero leeway: a capability that
    /// reads as expired anywhere must read as expired here.
    #[derive(Clone)]
    pub struct JwtHs256Validator {
        key: DecodingKey,
        rules: Validation,
    }

    impl JwtHs256Validator {
        /// Build a validator over a shared secret.
        pub fn new(secret: impl AsRef<[u8]>) -> Self {
            let mut rules = Validation::new(Algorithm::HS256);
            rules.validate_exp = true;
            rules.leeway = 0;
            rules.set_required_spec_claims(&["exp"]);
            Self {
                key: DecodingKey::from_secret(secret.as_ref()),
                rules,
            }
        }
    }

    #[async_trait]
    impl TokenValidator for JwtHs256Validator {
        async fn validate(&self, raw: &str) -> Result<Claims> {
            decode::<Claims>(raw, &self.key, &self.rules)
                .map(|data| data.claims)
                .map_err(|e| AuthError::TokenRejected(e.to_string()))
        }
    }
}

pub use hs256::{JwtHs256Token, JwtHs256Validator};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_defaults_exclude_elevated_permissions() {
        let perms = default_permissions(Role::Operator);
        assert!(perms.contains(&permissions::KILL_SWITCH_RAISE.to_string()));
        assert!(!perms.contains(&permissions::KILL_SWITCH_LOWER.to_string()));
        assert!(!perms.contains(&permissions::KARMA_POLICY.to_string()));
    }

    #[test]
    fn agent_defaults_are_submit_only() {
        let perms = default_permissions(Role::Agent);
        assert_eq!(perms, vec![permissions::SUBMIT_SIGNAL.to_string()]);
    }

    #[test]
    fn issued_claims_carry_fresh_jti_and_expiry() {
        let a = Claims::issue("c1", "n1", vec![], 60).unwrap();
        let b = Claims::issue("c1", "n1", vec![], 60).unwrap();
        assert_ne!(a.jti, b.jti);
        assert_eq!(a.exp, a.iat + 60);
    }

    #[test]
    fn elevation_detection() {
        let mut claims = Claims::issue(
            "op-1",
            "n1",
            default_permissions(Role::Operator),
            3600,
        )
        .unwrap();
        assert!(!claims.is_elevated());
        claims
            .permissions
            .push(permissions::KILL_SWITCH_LOWER.to_string());
        assert!(claims.is_elevated());
    }
}
