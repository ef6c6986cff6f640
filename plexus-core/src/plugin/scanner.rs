//! Pre-load artifact checks.
//!
//! Five stages feed one [`SecurityCheckResult`]: signature, integrity,
//! threat scan, permission-combination analysis and static code patterns.
//! The first three are pass/fail; the last two only lower the rating.

use crate::config::SecurityConfig;
use crate::plugin::loader::PluginArtifact;
use crate::plugin::permissions::{Permission, SecurityLevel};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Permission pairs that are flagged when requested together.
pub const SUSPICIOUS_COMBINATIONS: &[(Permission, Permission)] = &[
    (Permission::NetworkAccess, Permission::NativeCodeExecution),
    (Permission::NetworkAccess, Permission::KeystoreAccess),
    (Permission::NetworkAccess, Permission::CameraAccess),
    (Permission::NetworkAccess, Permission::MicrophoneAccess),
];

/// Sign a content digest with `key`, returning the hex MAC.
pub fn sign_digest(key: &[u8], digest: &str) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(key).ok()?;
    mac.update(digest.as_bytes());
    Some(hex::encode(mac.finalize().into_bytes()))
}

fn verify_digest(key: &[u8], digest: &str, signature: &[u8]) -> bool {
    match HmacSha256::new_from_slice(key) {
        Ok(mut mac) => {
            mac.update(digest.as_bytes());
            mac.verify_slice(signature).is_ok()
        }
        Err(_) => false,
    }
}

fn contains_pattern(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|window| window == needle)
}

/// Outcome of the five-stage check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityCheckResult {
    /// Plugin id declared by the artifact
    pub plugin_id: String,
    /// Content digest
    pub digest: String,
    /// Signature stage passed
    pub signature_valid: bool,
    /// Integrity stage passed
    pub integrity_valid: bool,
    /// Threats found by the scan
    pub threats: Vec<String>,
    /// Flagged permission combinations
    pub suspicious_combinations: Vec<String>,
    /// Flagged code patterns
    pub code_findings: Vec<String>,
    /// Failure reasons from the pass/fail stages
    pub failures: Vec<String>,
    /// Aggregate rating
    pub rating: SecurityLevel,
}

impl SecurityCheckResult {
    /// Whether the artifact may be admitted.
    pub fn is_safe(&self) -> bool {
        self.signature_valid && self.integrity_valid && self.threats.is_empty()
    }

    /// Every finding as a message.
    pub fn findings(&self) -> Vec<String> {
        self.failures
            .iter()
            .chain(&self.threats)
            .chain(&self.suspicious_combinations)
            .chain(&self.code_findings)
            .cloned()
            .collect()
    }
}

/// Aggregate rating from stage outcomes.
pub fn overall_rating(failed: bool, advisory_findings: usize) -> SecurityLevel {
    match (failed, advisory_findings) {
        (true, _) => SecurityLevel::Minimal,
        (false, 0) => SecurityLevel::Full,
        (false, 1..=2) => SecurityLevel::Elevated,
        (false, _) => SecurityLevel::Standard,
    }
}

/// Stateless artifact scanner built from the security configuration.
#[derive(Debug, Clone)]
pub struct ArtifactScanner {
    require_signatures: bool,
    trusted_keys: Vec<Vec<u8>>,
    threat_signatures: Vec<String>,
    code_patterns: Vec<String>,
}

impl ArtifactScanner {
    /// Create a scanner; undecodable keys are skipped.
    pub fn new(config: &SecurityConfig) -> Self {
        let trusted_keys = config
            .trusted_keys
            .iter()
            .filter_map(|key| match hex::decode(key) {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring trusted key that is not valid hex");
                    None
                }
            })
            .collect();

        Self {
            require_signatures: config.require_signatures,
            trusted_keys,
            threat_signatures: config.threat_signatures.clone(),
            code_patterns: config.suspicious_code_patterns.clone(),
        }
    }

    /// Check the declared signature against the trusted keys.
    pub fn verify_signature(&self, artifact: &PluginArtifact) -> Result<(), String> {
        let Some(signature) = artifact.descriptor().signature.as_deref() else {
            return if self.require_signatures {
                Err("artifact is unsigned".to_string())
            } else {
                Ok(())
            };
        };

        let signature = hex::decode(signature.trim()).map_err(|_| "signature is not valid hex".to_string())?;
        if self
            .trusted_keys
            .iter()
            .any(|key| verify_digest(key, artifact.digest(), &signature))
        {
            Ok(())
        } else {
            Err("signature does not match any trusted key".to_string())
        }
    }

    /// Compare the declared checksum with the recomputed digest.
    pub fn verify_integrity(&self, artifact: &PluginArtifact) -> Result<(), String> {
        match artifact.descriptor().checksum.as_deref() {
            Some(expected) if !expected.trim().eq_ignore_ascii_case(artifact.digest()) => Err(format!(
                "checksum mismatch: expected {}, computed {}",
                expected.trim(),
                artifact.digest()
            )),
            _ => Ok(()),
        }
    }

    /// Look for known threats in the artifact's resources.
    pub fn scan_threats(&self, artifact: &PluginArtifact) -> Vec<String> {
        let mut threats = Vec::new();
        for (name, content) in artifact.resources() {
            for signature in &self.threat_signatures {
                if contains_pattern(content, signature.as_bytes()) {
                    threats.push(format!("{name}: matches threat signature '{signature}'"));
                }
            }
        }
        threats
    }

    /// Flag risky permission pairs.
    pub fn analyze_permissions(&self, permissions: &[Permission]) -> Vec<String> {
        SUSPICIOUS_COMBINATIONS
            .iter()
            .filter(|(a, b)| permissions.contains(a) && permissions.contains(b))
            .map(|(a, b)| format!("suspicious permission combination: {a} + {b}"))
            .collect()
    }

    /// Flag suspicious code patterns in the artifact's resources.
    pub fn analyze_code_patterns(&self, artifact: &PluginArtifact) -> Vec<String> {
        let mut findings = Vec::new();
        for (name, content) in artifact.resources() {
            for pattern in &self.code_patterns {
                if contains_pattern(content, pattern.as_bytes()) {
                    findings.push(format!("{name}: suspicious code pattern '{pattern}'"));
                }
            }
        }
        findings
    }

    /// Run every stage.
    ///
    /// `blocked` marks a digest already on the block list; it counts as a
    /// threat.
    pub fn check(&self, artifact: &PluginArtifact, blocked: bool) -> SecurityCheckResult {
        let mut failures = Vec::new();

        let signature = self.verify_signature(artifact);
        if let Err(reason) = &signature {
            failures.push(reason.clone());
        }
        let integrity = self.verify_integrity(artifact);
        if let Err(reason) = &integrity {
            failures.push(reason.clone());
        }

        let mut threats = Vec::new();
        if blocked {
            threats.push(format!("digest {} is blocked", artifact.digest()));
        }
        threats.extend(self.scan_threats(artifact));

        let suspicious_combinations = self.analyze_permissions(&artifact.descriptor().permissions);
        let code_findings = self.analyze_code_patterns(artifact);

        let failed = signature.is_err() || integrity.is_err() || !threats.is_empty();
        let rating = overall_rating(failed, suspicious_combinations.len() + code_findings.len());

        SecurityCheckResult {
            plugin_id: artifact.plugin_id().to_string(),
            digest: artifact.digest().to_string(),
            signature_valid: signature.is_ok(),
            integrity_valid: integrity.is_ok(),
            threats,
            suspicious_combinations,
            code_findings,
            failures,
            rating,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoaderConfig;
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;

    const KEY_HEX: &str = "6b6579";

    fn artifact(extra_manifest: &str, entries: &[(&str, &[u8])]) -> PluginArtifact {
        let manifest = format!(
            "name = \"S\"\nversion = \"1\"\nauthor = \"x\"\nmain-class = \"s.Main\"\n{extra_manifest}"
        );
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer.start_file("plugin.toml", SimpleFileOptions::default()).unwrap();
        writer.write_all(manifest.as_bytes()).unwrap();
        for (name, content) in entries {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(content).unwrap();
        }
        let bytes = writer.finish().unwrap().into_inner();
        PluginArtifact::from_bytes("s.zip", bytes, &LoaderConfig::default()).unwrap()
    }

    fn scanner(require_signatures: bool) -> ArtifactScanner {
        ArtifactScanner::new(&SecurityConfig {
            require_signatures,
            trusted_keys: vec![KEY_HEX.to_string()],
            ..SecurityConfig::default()
        })
    }

    #[test]
    fn test_clean_artifact_rates_full() {
        let result = scanner(false).check(&artifact("", &[("main.js", b"console.log(1)")]), false);
        assert!(result.is_safe());
        assert_eq!(result.rating, SecurityLevel::Full);
        assert!(result.findings().is_empty());
    }

    #[test]
    fn test_signature_verification() {
        let unsigned = artifact("", &[("main.js", b"x")]);
        assert!(scanner(true).verify_signature(&unsigned).is_err());
        assert!(scanner(false).verify_signature(&unsigned).is_ok());

        let signature = sign_digest(b"key", unsigned.digest()).unwrap();
        let signed = artifact(&format!("signature = \"{signature}\"\n"), &[("main.js", b"x")]);
        assert!(scanner(true).verify_signature(&signed).is_ok());

        let forged = sign_digest(b"other", unsigned.digest()).unwrap();
        let forged = artifact(&format!("signature = \"{forged}\"\n"), &[("main.js", b"x")]);
        let result = scanner(false).check(&forged, false);
        assert!(!result.signature_valid);
        assert_eq!(result.rating, SecurityLevel::Minimal);
    }

    #[test]
    fn test_integrity_mismatch() {
        let result = scanner(false).check(&artifact("checksum = \"00ff\"\n", &[("main.js", b"x")]), false);
        assert!(!result.integrity_valid);
        assert!(!result.is_safe());
        assert_eq!(result.rating, SecurityLevel::Minimal);
    }

    #[test]
    fn test_threat_forces_minimal() {
        let result = scanner(false).check(
            &artifact("", &[("payload.bin", b"xx EICAR-STANDARD-ANTIVIRUS-TEST-FILE xx")]),
            false,
        );
        assert_eq!(result.threats.len(), 1);
        assert!(!result.is_safe());
        assert_eq!(result.rating, SecurityLevel::Minimal);

        let blocked = scanner(false).check(&artifact("", &[("main.js", b"x")]), true);
        assert!(!blocked.is_safe());
    }

    #[test]
    fn test_advisory_findings_lower_rating() {
        let one = artifact(
            "permissions = [\"network_access\", \"native_code_execution\"]\n",
            &[("main.js", b"x")],
        );
        let result = scanner(false).check(&one, false);
        assert!(result.is_safe());
        assert_eq!(result.suspicious_combinations.len(), 1);
        assert_eq!(result.rating, SecurityLevel::Elevated);

        let many = artifact(
            "permissions = [\"network_access\", \"camera_access\", \"microphone_access\"]\n",
            &[("main.js", b"eval(x); dlopen(y)")],
        );
        let result = scanner(false).check(&many, false);
        assert!(result.is_safe());
        assert_eq!(result.rating, SecurityLevel::Standard);
    }
}
