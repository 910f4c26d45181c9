// crates/variant-gate-core/src/runtime/identity.rs
// ============================================================================
// Module: Variant Gate User Identity
// Description: Stable user ids and per-session ids backed by key-value stores.
// Purpose: Resolve the bucketing identity once per session.
// Dependencies: crate::{core, interfaces}, rand
// ============================================================================

//! ## Overview
//! A user id is generated once and kept in the durable store; a session id is
//! generated once per session and kept in the session store. Generated ids
//! look like `user_1700000000000_k3j9x0q2a`. When a store cannot be written
//! the identity still resolves, but only for the current process, and the
//! resolution reports [`Persistence::Ephemeral`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use rand::Rng;

use crate::core::identifiers::SessionId;
use crate::core::identifiers::UserId;
use crate::core::time::Timestamp;
use crate::interfaces::Clock;
use crate::interfaces::KeyValueStore;
use crate::runtime::service::Persistence;

// ============================================================================
// SECTION: Storage Keys
// ============================================================================

/// Durable key holding the user identifier.
pub const USER_ID_KEY: &str = "variant_gate.user_id";
/// Session key holding the session identifier.
pub const SESSION_ID_KEY: &str = "variant_gate.session_id";
/// Durable key holding the serialized assignment list.
pub const ASSIGNMENTS_KEY: &str = "variant_gate.assignments";

/// Alphabet used for random id suffixes.
const SUFFIX_ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
/// Number of random characters in generated ids.
const SUFFIX_LEN: usize = 9;

// ============================================================================
// SECTION: Identity
// ============================================================================

/// Identity of the user the service assigns variants for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    /// Stable user identifier.
    user_id: UserId,
    /// Current session identifier.
    session_id: SessionId,
}

/// Identity plus the outcome of writing newly generated ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityResolution {
    /// Resolved identity.
    pub identity: UserIdentity,
    /// Whether generated ids reached their stores.
    pub persistence: Persistence,
}

impl UserIdentity {
    /// Creates an identity from known identifiers.
    #[must_use]
    pub const fn new(user_id: UserId, session_id: SessionId) -> Self {
        Self {
            user_id,
            session_id,
        }
    }

    /// Reads or creates the user id (durable store) and session id (session store).
    pub fn resolve(
        durable: &impl KeyValueStore,
        session: &impl KeyValueStore,
        clock: &impl Clock,
    ) -> IdentityResolution {
        let now = clock.now();
        let mut rng = rand::thread_rng();
        let (user_id, user_persistence) = read_or_create(durable, USER_ID_KEY, || {
            generate_user_id(&mut rng, now).to_string()
        });
        let (session_id, session_persistence) = read_or_create(session, SESSION_ID_KEY, || {
            generate_session_id(&mut rng, now).to_string()
        });
        IdentityResolution {
            identity: Self::new(UserId::new(user_id), SessionId::new(session_id)),
            persistence: user_persistence.combine(session_persistence),
        }
    }

    /// Returns the user identifier.
    #[must_use]
    pub const fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Returns the session identifier.
    #[must_use]
    pub const fn session_id(&self) -> &SessionId {
        &self.session_id
    }
}

// ============================================================================
// SECTION: Generators
// ============================================================================

/// Generates a user identifier of the form `user_<millis>_<suffix>`.
pub fn generate_user_id<R: Rng + ?Sized>(rng: &mut R, now: Timestamp) -> UserId {
    UserId::new(format!("user_{now}_{}", random_suffix(rng)))
}

/// Generates a session identifier of the form `session_<millis>_<suffix>`.
pub fn generate_session_id<R: Rng + ?Sized>(rng: &mut R, now: Timestamp) -> SessionId {
    SessionId::new(format!("session_{now}_{}", random_suffix(rng)))
}

/// Returns a random lowercase base36 suffix.
fn random_suffix<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..SUFFIX_LEN)
        .map(|_| char::from(SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())]))
        .collect()
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Reads a non-blank value or stores a freshly generated one.
fn read_or_create(
    store: &impl KeyValueStore,
    key: &str,
    generate: impl FnOnce() -> String,
) -> (String, Persistence) {
    match store.get(key) {
        Ok(Some(existing)) if !existing.trim().is_empty() => (existing, Persistence::Skipped),
        Ok(_) => {
            let value = generate();
            let persistence = match store.set(key, &value) {
                Ok(()) => Persistence::Persisted,
                Err(error) => Persistence::Ephemeral {
                    error,
                },
            };
            (value, persistence)
        }
        Err(error) => (generate(), Persistence::Ephemeral {
            error,
        }),
    }
}
