//! Audit hand-off: events, sinks and input fingerprints.
//!
//! Events carry identifiers, statuses and a fingerprint of the input only; plaintext
//! values and raw ciphertext bytes never reach a sink. Fingerprints are keyed with a
//! per-session secret so low-entropy inputs cannot be recovered by hashing candidates.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use hmac::digest::generic_array::GenericArray;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use tracing::info;

use crate::sampling::secure_rng;

type HmacSha256 = Hmac<Sha256>;

/// Events kept by [`MemoryAuditSink::default`].
pub const DEFAULT_AUDIT_CAPACITY: usize = 100;

/// Hex characters kept from the HMAC-SHA256 tag.
const FINGERPRINT_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit sink unavailable: {0}")]
    Unavailable(String),
}

/// One audited action.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub actor_id: String,
    pub action: String,
    pub status: String,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        actor_id: impl Into<String>,
        action: impl Into<String>,
        status: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            actor_id: actor_id.into(),
            action: action.into(),
            status: status.into(),
            detail: detail.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Destination for audit events. Failures are reported but never fail a request.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent) -> Result<(), AuditError>;
}

/// Emits every event on the `audit` tracing target.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        info!(
            target: "audit",
            actor_id = %event.actor_id,
            action = %event.action,
            status = %event.status,
            detail = %event.detail,
            timestamp = %event.timestamp.to_rfc3339(),
            "audit event"
        );
        Ok(())
    }
}

/// Keeps the most recent `capacity` events in memory.
#[derive(Debug)]
pub struct MemoryAuditSink {
    capacity: usize,
    events: Mutex<VecDeque<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
        }
    }

    /// Snapshot, oldest first.
    pub fn events(&self) -> Vec<AuditEvent> {
        let events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        events.iter().cloned().collect()
    }
}

impl Default for MemoryAuditSink {
    fn default() -> Self {
        Self::new(DEFAULT_AUDIT_CAPACITY)
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event.clone());
        Ok(())
    }
}

/// Secret key behind input fingerprints. Equal inputs fingerprint equally under one key
/// only, which keeps audit trails correlatable within a session.
#[derive(Clone)]
pub struct FingerprintKey {
    mac: HmacSha256,
}

impl FingerprintKey {
    /// Fresh 64-byte key from the OS-seeded generator.
    pub fn generate() -> Self {
        let mut key = [0u8; 64];
        secure_rng().fill_bytes(&mut key);
        Self {
            mac: <HmacSha256 as Mac>::new(GenericArray::from_slice(&key)),
        }
    }

    /// First 16 hex chars of HMAC-SHA256 over `bytes`.
    pub fn fingerprint_bytes(&self, bytes: &[u8]) -> String {
        let mut mac = self.mac.clone();
        mac.update(bytes);
        let mut digest = hex::encode(mac.finalize().into_bytes());
        digest.truncate(FINGERPRINT_LEN);
        digest
    }

    /// Fingerprint of plaintext values over their little-endian encoding.
    pub fn fingerprint_values(&self, values: &[f64]) -> String {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.fingerprint_bytes(&bytes)
    }
}

impl Default for FingerprintKey {
    fn default() -> Self {
        Self::generate()
    }
}

impl fmt::Debug for FingerprintKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FingerprintKey(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use sha2::Digest;

    #[test]
    fn test_fingerprint() {
        let key = FingerprintKey::generate();
        assert_eq!(key.fingerprint_values(&[1.0]).len(), FINGERPRINT_LEN);
        assert_eq!(key.fingerprint_values(&[1.0]), key.fingerprint_values(&[1.0]));
        assert_ne!(key.fingerprint_values(&[1.0]), key.fingerprint_values(&[2.0]));
        assert_eq!(format!("{key:?}"), "FingerprintKey(..)");
    }

    #[test]
    fn test_fingerprint_is_keyed() {
        let (a, b) = (FingerprintKey::generate(), FingerprintKey::generate());
        assert_ne!(a.fingerprint_values(&[52_345.0]), b.fingerprint_values(&[52_345.0]));

        // an unkeyed digest of the same encoding does not match
        let unkeyed = hex::encode(Sha256::digest(52_345.0f64.to_le_bytes()));
        assert_ne!(a.fingerprint_values(&[52_345.0]), unkeyed[..FINGERPRINT_LEN]);
    }

    #[test]
    fn test_memory_sink_is_bounded() {
        let sink = MemoryAuditSink::new(3);
        for i in 0..5 {
            sink.record(&AuditEvent::new("alice", "evaluate", "ok", format!("n={i}")))
                .unwrap();
        }
        let details: Vec<String> = sink.events().into_iter().map(|e| e.detail).collect();
        assert_eq!(details, ["n=2", "n=3", "n=4"]);
        assert_eq!(MemoryAuditSink::default().capacity, DEFAULT_AUDIT_CAPACITY);
    }
}
