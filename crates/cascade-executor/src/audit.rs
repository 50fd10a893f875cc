//! 5W+H audit records
//!
//! [`AuditTrail`] is append-only and SHA-256 hash-chained: each record
//! commits to its predecessor's hash, so any later edit is caught by
//! [`AuditTrail::verify_integrity`].

use crate::error::AuditError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Outcome recorded in [`How`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    /// Tier started
    Started,
    /// One attempt failed
    Failed,
    /// Tier produced an accepted value
    Succeeded,
    /// Moved on to the next tier
    Escalated,
    /// Every configured tier failed
    Exhausted,
    /// Total time budget exceeded
    TimedOut,
}

impl AuditStatus {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Failed => "failed",
            Self::Succeeded => "succeeded",
            Self::Escalated => "escalated",
            Self::Exhausted => "exhausted",
            Self::TimedOut => "timed_out",
        }
    }
}

/// How an action went
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct How {
    /// Outcome
    pub status: AuditStatus,
    /// Elapsed milliseconds, when meaningful
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Free-form details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiveWHEvent {
    /// Actor
    pub who: String,
    /// Action
    pub what: String,
    /// Emission time
    pub when: DateTime<Utc>,
    /// Location, e.g. unit name and tier
    #[serde(rename = "where")]
    pub location: String,
    /// Reason, for failures and escalations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub why: Option<String>,
    /// Outcome
    pub how: How,
}

impl FiveWHEvent {
    /// New record stamped now
    #[must_use]
    pub fn new(
        who: impl Into<String>,
        what: impl Into<String>,
        location: impl Into<String>,
        status: AuditStatus,
    ) -> Self {
        Self {
            who: who.into(),
            what: what.into(),
            when: Utc::now(),
            location: location.into(),
            why: None,
            how: How {
                status,
                duration_ms: None,
                metadata: None,
            },
        }
    }

    /// With reason
    #[must_use]
    pub fn because(mut self, why: impl Into<String>) -> Self {
        self.why = Some(why.into());
        self
    }

    /// With elapsed time
    #[must_use]
    pub fn took(mut self, duration: std::time::Duration) -> Self {
        self.how.duration_ms = Some(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// With metadata
    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.how.metadata = Some(metadata);
        self
    }
}

/// Receiver of audit records
///
/// Failures are logged by the emitter and never abort execution.
pub trait EventSink: Send + Sync {
    /// Handle one record
    fn on_event(&self, event: &FiveWHEvent) -> anyhow::Result<()>;
}

/// Record with its chain links
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// The event
    pub event: FiveWHEvent,
    /// Hash of the previous record, zeros for the first
    #[serde(with = "hex_hash")]
    pub prev_hash: [u8; 32],
    /// Hash of this record
    #[serde(with = "hex_hash")]
    pub hash: [u8; 32],
}

/// Append-only hash-chained audit trail
#[derive(Debug, Default)]
pub struct AuditTrail {
    inner: Mutex<Vec<AuditRecord>>,
}

impl AuditTrail {
    /// Empty trail
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append and chain an event, returning its index
    pub fn append(&self, event: FiveWHEvent) -> usize {
        let mut guard = self.inner.lock();
        let prev_hash = guard.last().map_or([0u8; 32], |r| r.hash);
        let hash = compute_hash(&event, &prev_hash);
        guard.push(AuditRecord {
            event,
            prev_hash,
            hash,
        });
        guard.len() - 1
    }

    /// Copy of all events in order
    #[must_use]
    pub fn events(&self) -> Vec<FiveWHEvent> {
        self.inner.lock().iter().map(|r| r.event.clone()).collect()
    }

    /// Copy of all records with chain links
    #[must_use]
    pub fn records(&self) -> Vec<AuditRecord> {
        self.inner.lock().clone()
    }

    /// Number of records
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether nothing was recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Hex hash of the newest record
    #[must_use]
    pub fn head(&self) -> Option<String> {
        self.inner.lock().last().map(|r| hex::encode(r.hash))
    }

    /// Recompute the chain
    ///
    /// # Errors
    /// `AuditError::IntegrityViolation` at the first broken link.
    pub fn verify_integrity(&self) -> Result<(), AuditError> {
        let guard = self.inner.lock();
        let mut prev = [0u8; 32];
        for (index, record) in guard.iter().enumerate() {
            if record.prev_hash != prev || record.hash != compute_hash(&record.event, &prev) {
                return Err(AuditError::IntegrityViolation { index });
            }
            prev = record.hash;
        }
        Ok(())
    }
}

impl EventSink for AuditTrail {
    fn on_event(&self, event: &FiveWHEvent) -> anyhow::Result<()> {
        self.append(event.clone());
        Ok(())
    }
}

fn compute_hash(event: &FiveWHEvent, prev_hash: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(event.who.as_bytes());
    hasher.update([0]);
    hasher.update(event.what.as_bytes());
    hasher.update([0]);
    hasher.update(event.when.timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
    hasher.update(event.location.as_bytes());
    hasher.update([0]);
    hasher.update(event.why.as_deref().unwrap_or_default().as_bytes());
    hasher.update([0]);
    hasher.update(event.how.status.as_str().as_bytes());
    hasher.update(event.how.duration_ms.unwrap_or_default().to_le_bytes());
    if let Some(metadata) = &event.how.metadata {
        hasher.update(metadata.to_string().as_bytes());
    }
    hasher.update([0]);
    hasher.update(prev_hash);
    hasher.finalize().into()
}

mod hex_hash {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(hash: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(hash))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let text = String::deserialize(deserializer)?;
        let bytes = hex::decode(text).map_err(D::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| D::Error::custom("expected a 32-byte hash"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(what: &str) -> FiveWHEvent {
        FiveWHEvent::new("executor", what, "unit/code", AuditStatus::Started)
    }

    #[test]
    fn chain_links_records() {
        let trail = AuditTrail::new();
        trail.append(event("tier_start"));
        trail.append(event("tier_success").took(std::time::Duration::from_millis(3)));

        let records = trail.records();
        assert_eq!(records[0].prev_hash, [0u8; 32]);
        assert_eq!(records[1].prev_hash, records[0].hash);
        assert_eq!(trail.head(), Some(hex::encode(records[1].hash)));
        trail.verify_integrity().unwrap();
    }

    #[test]
    fn tampering_is_detected() {
        let trail = AuditTrail::new();
        trail.append(event("a"));
        trail.append(event("b"));
        trail.append(event("c"));

        trail.inner.lock()[1].event.what = "rewritten".to_string();
        assert_eq!(
            trail.verify_integrity(),
            Err(AuditError::IntegrityViolation { index: 1 })
        );
    }

    #[test]
    fn serializes_where_key() {
        let ev = event("tier_start").because("first try").with_metadata(json!({"attempt": 1}));
        let value = serde_json::to_value(&ev).unwrap();
        assert_eq!(value["where"], "unit/code");
        assert_eq!(value["how"]["status"], "started");
        assert_eq!(value["how"]["metadata"]["attempt"], 1);
    }

    #[test]
    fn records_round_trip_with_hex_hashes() {
        let trail = AuditTrail::new();
        trail.append(event("a"));
        let json = serde_json::to_string(&trail.records()).unwrap();
        let back: Vec<AuditRecord> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, trail.records());
    }
}
