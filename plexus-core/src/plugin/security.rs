//! Security and sandbox layer.
//!
//! Holds one [`SecurityProfile`] per plugin. A profile's granted set is
//! always a subset of its level's allowed permissions: registration drops
//! anything outside the level, grants outside the level are refused, and
//! temporary grants only ever remove what they added.

use crate::config::SecurityConfig;
use crate::plugin::audit::{AuditEntry, AuditEvent, AuditLog};
use crate::plugin::error::{SecurityError, SecurityResult};
use crate::plugin::health::HealthLevel;
use crate::plugin::loader::PluginArtifact;
use crate::plugin::permissions::{Permission, PermissionSet, SecurityLevel};
use crate::plugin::scanner::{ArtifactScanner, SecurityCheckResult};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Permissions removed by a medium-severity anomaly.
pub const RESTRICTED_ON_ANOMALY: [Permission; 3] = [
    Permission::NativeCodeExecution,
    Permission::SystemSettings,
    Permission::DeleteFiles,
];

/// Per-plugin security state.
#[derive(Debug, Clone)]
pub struct SecurityProfile {
    level: SecurityLevel,
    granted: PermissionSet,
    temporary: HashMap<Permission, Instant>,
    disabled: bool,
    registered_at: DateTime<Utc>,
}

impl SecurityProfile {
    fn new(level: SecurityLevel, granted: PermissionSet) -> Self {
        Self {
            level,
            granted,
            temporary: HashMap::new(),
            disabled: false,
            registered_at: Utc::now(),
        }
    }

    /// Declared security level.
    pub fn level(&self) -> SecurityLevel {
        self.level
    }

    /// Currently granted permissions.
    pub fn granted(&self) -> &PermissionSet {
        &self.granted
    }

    /// Whether the plugin was disabled by the anomaly path.
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Registration time.
    pub fn registered_at(&self) -> DateTime<Utc> {
        self.registered_at
    }

    /// Remaining lifetime of a temporary grant.
    pub fn temporary_remaining(&self, permission: Permission) -> Option<Duration> {
        self.temporary
            .get(&permission)
            .map(|expiry| expiry.saturating_duration_since(Instant::now()))
    }

    fn holds(&self, permission: Permission, now: Instant) -> bool {
        if self.disabled || !self.granted.contains(&permission) {
            return false;
        }
        self.temporary.get(&permission).map_or(true, |expiry| *expiry > now)
    }

    fn remove(&mut self, permission: Permission) -> bool {
        self.temporary.remove(&permission);
        self.granted.remove(&permission)
    }
}

/// Runtime behavior flagged by the host or the plugin's supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BehaviorPattern {
    /// Access to files outside the plugin's allowance
    UnauthorizedFileAccess,
    /// Unexpected network destinations or volume
    SuspiciousNetworkActivity,
    /// Bulk data leaving the host
    DataExfiltration,
    /// Attempt to gain capabilities beyond the declared level
    PrivilegeEscalationAttempt,
}

/// Observed runtime activity of a plugin.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActivityReport {
    /// CPU usage in percent
    pub cpu_percent: f64,
    /// Resident memory in bytes
    pub memory_bytes: u64,
    /// Outbound network requests per minute
    pub network_requests_per_minute: u32,
    /// File operations per minute
    pub file_operations_per_minute: u32,
    /// Permissions the plugin attempted to use
    pub attempted_permissions: Vec<Permission>,
    /// Flagged behaviors
    pub behaviors: Vec<BehaviorPattern>,
    /// Current health level, when known
    pub health_level: Option<HealthLevel>,
}

/// Severity of an anomaly finding.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum AnomalySeverity {
    /// Nothing unusual
    #[default]
    None,
    /// Audited only
    Low,
    /// Sensitive permissions are removed
    Medium,
    /// The plugin is disabled
    High,
}

/// Mitigation applied for a finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MitigationAction {
    /// No action
    None,
    /// The listed permissions were removed
    Restricted(Vec<Permission>),
    /// Every permission was removed and further grants are refused
    Disabled,
}

/// Result of anomaly analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnomalyFinding {
    /// Analysed plugin
    pub plugin_id: String,
    /// Highest severity found
    pub severity: AnomalySeverity,
    /// One reason per triggered rule
    pub reasons: Vec<String>,
    /// Mitigation applied
    pub action: MitigationAction,
}

/// Per-plugin permission store, artifact checks and anomaly response.
#[derive(Debug)]
pub struct SecurityManager {
    config: SecurityConfig,
    scanner: ArtifactScanner,
    profiles: RwLock<HashMap<String, SecurityProfile>>,
    blocked_digests: RwLock<HashSet<String>>,
    audit: AuditLog,
}

impl SecurityManager {
    /// Create a security manager.
    pub fn new(config: SecurityConfig) -> Self {
        let blocked = config
            .blocked_digests
            .iter()
            .map(|digest| digest.trim().to_ascii_lowercase())
            .collect();

        Self {
            scanner: ArtifactScanner::new(&config),
            audit: AuditLog::new(config.max_audit_entries),
            profiles: RwLock::new(HashMap::new()),
            blocked_digests: RwLock::new(blocked),
            config,
        }
    }

    /// Security configuration.
    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    /// Audit trail.
    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Audit entries for one plugin.
    pub fn audit_entries(&self, plugin_id: &str) -> Vec<AuditEntry> {
        self.audit.entries_for(plugin_id)
    }

    /// Create (or replace) the profile for `plugin_id`.
    ///
    /// Requested permissions outside `level` are dropped and logged;
    /// registration never fails because of them.
    pub fn register_plugin(
        &self,
        plugin_id: &str,
        requested: &[Permission],
        level: SecurityLevel,
    ) -> PermissionSet {
        let (granted, dropped) = level.partition(requested.iter().copied());

        for permission in &dropped {
            tracing::warn!(
                plugin_id = %plugin_id,
                permission = %permission,
                level = %level,
                "Requested permission exceeds security level; not granted"
            );
        }

        self.profiles
            .write()
            .insert(plugin_id.to_string(), SecurityProfile::new(level, granted.clone()));

        self.audit.record(
            plugin_id,
            AuditEvent::Registration {
                level,
                granted: granted.iter().copied().collect(),
                dropped: dropped.into_iter().collect(),
            },
        );

        tracing::debug!(
            plugin_id = %plugin_id,
            level = %level,
            granted = granted.len(),
            "Security profile registered"
        );

        granted
    }

    /// Remove the profile for `plugin_id`.
    pub fn unregister_plugin(&self, plugin_id: &str) -> bool {
        let removed = self.profiles.write().remove(plugin_id).is_some();
        if removed {
            self.audit.record(plugin_id, AuditEvent::Unregistered);
        }
        removed
    }

    /// Whether a profile exists.
    pub fn is_registered(&self, plugin_id: &str) -> bool {
        self.profiles.read().contains_key(plugin_id)
    }

    /// Audited membership test. Unknown plugins hold nothing.
    pub fn check_permission(&self, plugin_id: &str, permission: Permission) -> bool {
        let granted = self
            .profiles
            .read()
            .get(plugin_id)
            .is_some_and(|profile| profile.holds(permission, Instant::now()));

        self.audit
            .record(plugin_id, AuditEvent::PermissionCheck { permission, granted });
        granted
    }

    /// Grant `permission`, temporarily for the configured TTL when `temporary`.
    pub fn grant_permission(
        &self,
        plugin_id: &str,
        permission: Permission,
        temporary: bool,
    ) -> SecurityResult<()> {
        let ttl = temporary.then(|| self.config.temporary_grant_ttl());
        self.grant(plugin_id, permission, ttl)
    }

    /// Grant `permission` until `ttl` elapses.
    pub fn grant_permission_for(
        &self,
        plugin_id: &str,
        permission: Permission,
        ttl: Duration,
    ) -> SecurityResult<()> {
        self.grant(plugin_id, permission, Some(ttl))
    }

    fn grant(&self, plugin_id: &str, permission: Permission, ttl: Option<Duration>) -> SecurityResult<()> {
        let mut profiles = self.profiles.write();
        let profile = profiles.get_mut(plugin_id).ok_or_else(|| SecurityError::NotRegistered {
            plugin_id: plugin_id.to_string(),
        })?;

        let refusal = if profile.disabled {
            Some(SecurityError::Disabled {
                plugin_id: plugin_id.to_string(),
            })
        } else if !profile.level.allows(permission) {
            Some(SecurityError::PermissionDenied {
                plugin_id: plugin_id.to_string(),
                permission: permission.to_string(),
                reason: format!("outside security level {}", profile.level),
            })
        } else {
            None
        };

        if let Some(error) = refusal {
            drop(profiles);
            self.audit.record(
                plugin_id,
                AuditEvent::PermissionRefused {
                    permission,
                    reason: error.to_string(),
                },
            );
            return Err(error);
        }

        let permanent = profile.granted.contains(&permission) && !profile.temporary.contains_key(&permission);
        profile.granted.insert(permission);
        match ttl {
            // A temporary grant never shortens a permanent one.
            Some(ttl) if !permanent => {
                profile.temporary.insert(permission, Instant::now() + ttl);
            }
            Some(_) => {}
            None => {
                profile.temporary.remove(&permission);
            }
        }
        drop(profiles);

        self.audit.record(
            plugin_id,
            AuditEvent::PermissionGranted {
                permission,
                temporary: ttl.is_some(),
            },
        );
        tracing::debug!(plugin_id = %plugin_id, permission = %permission, temporary = ttl.is_some(), "Permission granted");
        Ok(())
    }

    /// Remove `permission` unconditionally.
    pub fn revoke_permission(&self, plugin_id: &str, permission: Permission) -> bool {
        let removed = self
            .profiles
            .write()
            .get_mut(plugin_id)
            .is_some_and(|profile| profile.remove(permission));

        self.audit
            .record(plugin_id, AuditEvent::PermissionRevoked { permission });
        removed
    }

    /// Remove every lapsed temporary grant.
    pub fn sweep_expired(&self) -> Vec<(String, Permission)> {
        let now = Instant::now();
        let mut expired = Vec::new();

        {
            let mut profiles = self.profiles.write();
            for (plugin_id, profile) in profiles.iter_mut() {
                let lapsed: Vec<Permission> = profile
                    .temporary
                    .iter()
                    .filter(|(_, expiry)| **expiry <= now)
                    .map(|(permission, _)| *permission)
                    .collect();
                for permission in lapsed {
                    profile.remove(permission);
                    expired.push((plugin_id.clone(), permission));
                }
            }
        }

        for (plugin_id, permission) in &expired {
            tracing::debug!(plugin_id = %plugin_id, permission = %permission, "Temporary permission expired");
            self.audit
                .record(plugin_id, AuditEvent::PermissionExpired { permission: *permission });
        }
        expired
    }

    /// Run [`Self::sweep_expired`] every `sweep_interval` until the manager is dropped.
    pub fn spawn_expiry_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let manager: Weak<Self> = Arc::downgrade(self);
        let interval = self.config.sweep_interval();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match manager.upgrade() {
                    Some(manager) => {
                        manager.sweep_expired();
                    }
                    None => break,
                }
            }
        })
    }

    /// Snapshot of a profile.
    pub fn profile(&self, plugin_id: &str) -> Option<SecurityProfile> {
        self.profiles.read().get(plugin_id).cloned()
    }

    /// Currently granted permissions (empty for unknown plugins).
    pub fn granted_permissions(&self, plugin_id: &str) -> PermissionSet {
        self.profiles
            .read()
            .get(plugin_id)
            .map(|profile| profile.granted.clone())
            .unwrap_or_default()
    }

    /// Whether the plugin was disabled by the anomaly path.
    pub fn is_disabled(&self, plugin_id: &str) -> bool {
        self.profiles
            .read()
            .get(plugin_id)
            .is_some_and(|profile| profile.disabled)
    }

    /// Whether `digest` is on the block list.
    pub fn is_blocked(&self, digest: &str) -> bool {
        self.blocked_digests.read().contains(&digest.to_ascii_lowercase())
    }

    /// Permanently block `digest`.
    pub fn block_digest(&self, plugin_id: &str, digest: &str) {
        let inserted = self.blocked_digests.write().insert(digest.to_ascii_lowercase());
        if inserted {
            tracing::error!(plugin_id = %plugin_id, digest = %digest, "Artifact digest blocked");
            self.audit.record(
                plugin_id,
                AuditEvent::ArtifactBlocked {
                    digest: digest.to_string(),
                },
            );
        }
    }

    /// Run the five-stage check and audit the result.
    ///
    /// A detected threat blocks the artifact's digest for the life of the
    /// manager.
    pub fn perform_security_check(&self, artifact: &PluginArtifact) -> SecurityCheckResult {
        let plugin_id = artifact.plugin_id();
        let result = self.scanner.check(artifact, self.is_blocked(artifact.digest()));

        if !result.threats.is_empty() {
            self.block_digest(plugin_id, artifact.digest());
        }

        self.audit.record(
            plugin_id,
            AuditEvent::SecurityScan {
                rating: result.rating,
                safe: result.is_safe(),
                findings: result.findings(),
            },
        );

        if result.is_safe() {
            tracing::debug!(plugin_id = %plugin_id, rating = %result.rating, "Security check passed");
        } else {
            tracing::warn!(plugin_id = %plugin_id, findings = ?result.findings(), "Security check failed");
        }

        result
    }

    /// Check an artifact and turn an unsafe result into a typed error.
    ///
    /// # Errors
    /// - `ArtifactBlocked`: the digest was blocked before this check
    /// - `MalwareDetected`: the scan found a threat (the digest is now blocked)
    /// - `SignatureInvalid` / `IntegrityFailure`: the respective stage failed
    pub fn verify_artifact(&self, artifact: &PluginArtifact) -> SecurityResult<SecurityCheckResult> {
        let plugin_id = artifact.plugin_id().to_string();

        if self.is_blocked(artifact.digest()) {
            tracing::error!(plugin_id = %plugin_id, digest = %artifact.digest(), "Rejected blocked artifact");
            return Err(SecurityError::ArtifactBlocked {
                plugin_id,
                digest: artifact.digest().to_string(),
            });
        }

        let result = self.perform_security_check(artifact);

        if !result.threats.is_empty() {
            return Err(SecurityError::MalwareDetected {
                plugin_id,
                threats: result.threats,
            });
        }
        if !result.signature_valid {
            return Err(SecurityError::SignatureInvalid {
                plugin_id,
                reason: result.failures.join("; "),
            });
        }
        if !result.integrity_valid {
            return Err(SecurityError::IntegrityFailure {
                plugin_id,
                expected: artifact.descriptor().checksum.clone().unwrap_or_default(),
                actual: artifact.digest().to_string(),
            });
        }

        Ok(result)
    }

    /// Classify runtime activity against a profile without side effects.
    pub fn analyze_activity(&self, profile: &SecurityProfile, report: &ActivityReport) -> (AnomalySeverity, Vec<String>) {
        let thresholds = &self.config.thresholds;
        let mut severity = AnomalySeverity::None;
        let mut reasons = Vec::new();
        let mut flag = |level: AnomalySeverity, reason: String| {
            severity = severity.max(level);
            reasons.push(reason);
        };

        for permission in &report.attempted_permissions {
            if !profile.level.allows(*permission) {
                flag(
                    AnomalySeverity::High,
                    format!("privilege escalation: {permission} is outside level {}", profile.level),
                );
            } else if !profile.granted.contains(permission) {
                flag(AnomalySeverity::Low, format!("attempted ungranted permission {permission}"));
            }
        }

        for behavior in &report.behaviors {
            let level = match behavior {
                BehaviorPattern::PrivilegeEscalationAttempt => AnomalySeverity::High,
                BehaviorPattern::UnauthorizedFileAccess
                | BehaviorPattern::SuspiciousNetworkActivity
                | BehaviorPattern::DataExfiltration => AnomalySeverity::Medium,
            };
            flag(level, format!("behavior: {behavior:?}"));
        }

        if report.network_requests_per_minute > thresholds.max_network_requests_per_minute {
            flag(
                AnomalySeverity::Medium,
                format!(
                    "network requests {}/min exceed {}",
                    report.network_requests_per_minute, thresholds.max_network_requests_per_minute
                ),
            );
        }
        if report.file_operations_per_minute > thresholds.max_file_operations_per_minute {
            flag(
                AnomalySeverity::Medium,
                format!(
                    "file operations {}/min exceed {}",
                    report.file_operations_per_minute, thresholds.max_file_operations_per_minute
                ),
            );
        }
        if report.cpu_percent > thresholds.max_cpu_percent {
            flag(
                AnomalySeverity::Low,
                format!("cpu {:.1}% exceeds {:.1}%", report.cpu_percent, thresholds.max_cpu_percent),
            );
        }
        if report.memory_bytes > thresholds.max_memory_bytes {
            flag(
                AnomalySeverity::Low,
                format!("memory {} bytes exceeds {}", report.memory_bytes, thresholds.max_memory_bytes),
            );
        }

        match report.health_level {
            Some(HealthLevel::Unhealthy) => flag(AnomalySeverity::Medium, "health level UNHEALTHY".to_string()),
            Some(HealthLevel::Critical) => flag(AnomalySeverity::Low, "health level CRITICAL".to_string()),
            _ => {}
        }

        (severity, reasons)
    }

    /// Analyse runtime activity and apply the mitigation.
    ///
    /// High severity disables the plugin (empty permission set, grants
    /// refused); medium severity removes [`RESTRICTED_ON_ANOMALY`].
    pub fn detect_suspicious_activity(
        &self,
        plugin_id: &str,
        report: &ActivityReport,
    ) -> SecurityResult<AnomalyFinding> {
        let mut profiles = self.profiles.write();
        let profile = profiles.get_mut(plugin_id).ok_or_else(|| SecurityError::NotRegistered {
            plugin_id: plugin_id.to_string(),
        })?;

        let (severity, reasons) = self.analyze_activity(profile, report);
        let action = match severity {
            AnomalySeverity::High => {
                profile.granted.clear();
                profile.temporary.clear();
                profile.disabled = true;
                MitigationAction::Disabled
            }
            AnomalySeverity::Medium => {
                let removed: Vec<Permission> = RESTRICTED_ON_ANOMALY
                    .iter()
                    .copied()
                    .filter(|permission| profile.remove(*permission))
                    .collect();
                MitigationAction::Restricted(removed)
            }
            AnomalySeverity::Low | AnomalySeverity::None => MitigationAction::None,
        };
        drop(profiles);

        if severity > AnomalySeverity::None {
            tracing::warn!(
                plugin_id = %plugin_id,
                severity = ?severity,
                reasons = ?reasons,
                "Suspicious plugin activity detected"
            );
            self.audit.record(
                plugin_id,
                AuditEvent::AnomalyDetected {
                    severity,
                    reasons: reasons.clone(),
                },
            );
        }
        match &action {
            MitigationAction::Disabled => {
                tracing::warn!(plugin_id = %plugin_id, "Plugin disabled by security layer");
                self.audit.record(plugin_id, AuditEvent::PluginDisabled);
            }
            MitigationAction::Restricted(removed) => {
                tracing::warn!(plugin_id = %plugin_id, removed = ?removed, "Plugin permissions restricted");
                self.audit.record(
                    plugin_id,
                    AuditEvent::PluginRestricted {
                        removed: removed.clone(),
                    },
                );
            }
            MitigationAction::None => {}
        }

        Ok(AnomalyFinding {
            plugin_id: plugin_id.to_string(),
            severity,
            reasons,
            action,
        })
    }
}
