//! Append-only security audit trail.

use crate::plugin::permissions::{Permission, SecurityLevel};
use crate::plugin::security::AnomalySeverity;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

/// Security event recorded for a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    /// Profile created
    Registration {
        /// Declared level
        level: SecurityLevel,
        /// Granted permissions
        granted: Vec<Permission>,
        /// Requested permissions outside the level
        dropped: Vec<Permission>,
    },
    /// Membership test against the granted set
    PermissionCheck {
        /// Checked permission
        permission: Permission,
        /// Test outcome
        granted: bool,
    },
    /// Permission added after registration
    PermissionGranted {
        /// Granted permission
        permission: Permission,
        /// Whether the grant expires
        temporary: bool,
    },
    /// Grant refused
    PermissionRefused {
        /// Requested permission
        permission: Permission,
        /// Refusal reason
        reason: String,
    },
    /// Permission removed on request
    PermissionRevoked {
        /// Removed permission
        permission: Permission,
    },
    /// Temporary grant lapsed
    PermissionExpired {
        /// Removed permission
        permission: Permission,
    },
    /// Pre-load security check finished
    SecurityScan {
        /// Aggregate rating
        rating: SecurityLevel,
        /// Whether the artifact may be admitted
        safe: bool,
        /// Findings from every stage
        findings: Vec<String>,
    },
    /// Artifact digest permanently blocked
    ArtifactBlocked {
        /// Blocked digest
        digest: String,
    },
    /// Runtime anomaly analysed
    AnomalyDetected {
        /// Finding severity
        severity: AnomalySeverity,
        /// Reasons for the finding
        reasons: Vec<String>,
    },
    /// Sensitive permissions removed after a medium-severity anomaly
    PluginRestricted {
        /// Removed permissions
        removed: Vec<Permission>,
    },
    /// Every permission removed after a high-severity anomaly
    PluginDisabled,
    /// Profile removed on unload
    Unregistered,
}

/// A single audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Monotonic sequence number
    pub sequence: u64,
    /// Plugin the entry concerns
    pub plugin_id: String,
    /// Record time
    pub timestamp: DateTime<Utc>,
    /// Recorded event
    pub event: AuditEvent,
}

/// Bounded ring of audit entries.
///
/// Oldest entries are evicted once `capacity` is reached; sequence numbers
/// keep increasing so gaps reveal eviction.
#[derive(Debug)]
pub struct AuditLog {
    entries: Mutex<VecDeque<AuditEntry>>,
    capacity: usize,
    next_sequence: AtomicU64,
}

impl AuditLog {
    /// Create a log holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            next_sequence: AtomicU64::new(0),
        }
    }

    /// Append an entry and return its sequence number.
    pub fn record(&self, plugin_id: &str, event: AuditEvent) -> u64 {
        let mut entries = self.entries.lock();
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);

        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(AuditEntry {
            sequence,
            plugin_id: plugin_id.to_string(),
            timestamp: Utc::now(),
            event,
        });

        sequence
    }

    /// Entries for one plugin, oldest first.
    pub fn entries_for(&self, plugin_id: &str) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|entry| entry.plugin_id == plugin_id)
            .cloned()
            .collect()
    }

    /// The `limit` most recent entries, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<AuditEntry> {
        let entries = self.entries.lock();
        let skip = entries.len().saturating_sub(limit);
        entries.iter().skip(skip).cloned().collect()
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Entries recorded since creation, including evicted ones.
    pub fn total_recorded(&self) -> u64 {
        self.next_sequence.load(Ordering::Relaxed)
    }
}
