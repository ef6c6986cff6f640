//! Security, configuration and versioning integration tests

mod common;

use common::*;
use plexus_core::plugin::{
    ActivityReport, AnomalySeverity, AuditEvent, BehaviorPattern, ErrorKind, FactoryTable,
    LifecycleError, MitigationAction, Permission, PluginError, PluginState, SecurityError,
};
use plexus_core::PluginRuntime;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

async fn running(runtime: &PluginRuntime, path: &std::path::Path) {
    let descriptor = runtime.load_plugin(path, "").await.unwrap();
    runtime.initialize_plugin(&descriptor.id, None).await.unwrap();
    runtime.start_plugin(&descriptor.id).await.unwrap();
}

/// Artifact Verification Tests Module
mod verification_tests {
    use super::*;

    #[tokio::test]
    async fn test_checksum_mismatch_is_rejected() {
        let dir = TempDir::new().unwrap();
        let journal = Arc::new(Journal::default());
        let factories = FactoryTable::new();
        register(&factories, "notes", "1.0", Behavior::default(), &journal);
        let runtime = runtime(&dir, factories);

        let path = ArtifactBuilder::new("notes", "1.0")
            .checksum(&"0".repeat(64))
            .write(dir.path());
        let error = runtime.load_plugin(&path, "").await.unwrap_err();
        assert!(matches!(
            error,
            PluginError::Security(SecurityError::IntegrityFailure { .. })
        ));
        assert_eq!(error.kind(), ErrorKind::Security);
        assert!(!runtime.is_loaded("notes"));
    }

    #[tokio::test]
    async fn test_matching_checksum_is_accepted() {
        let dir = TempDir::new().unwrap();
        let journal = Arc::new(Journal::default());
        let factories = FactoryTable::new();
        register(&factories, "notes", "1.0", Behavior::default(), &journal);
        let runtime = runtime(&dir, factories);

        let builder = ArtifactBuilder::new("notes", "1.0");
        let path = builder.clone().checksum(&builder.digest()).write(dir.path());
        runtime.load_plugin(&path, "").await.unwrap();
        assert!(runtime.is_loaded("notes"));
    }

    #[tokio::test]
    async fn test_threat_blocks_the_digest() {
        let dir = TempDir::new().unwrap();
        let journal = Arc::new(Journal::default());
        let factories = FactoryTable::new();
        register(&factories, "notes", "1.0", Behavior::default(), &journal);
        let runtime = runtime(&dir, factories);

        let path = ArtifactBuilder::new("notes", "1.0")
            .resource("payload.bin", b"xx EICAR-STANDARD-ANTIVIRUS-TEST-FILE xx")
            .write(dir.path());

        let error = runtime.load_plugin(&path, "").await.unwrap_err();
        assert!(matches!(
            error,
            PluginError::Security(SecurityError::MalwareDetected { .. })
        ));

        let error = runtime.load_plugin(&path, "").await.unwrap_err();
        assert!(matches!(
            error,
            PluginError::Security(SecurityError::ArtifactBlocked { .. })
        ));
        assert!(runtime.list_plugins().is_empty());
    }

    #[tokio::test]
    async fn test_signatures_against_trusted_keys() {
        let dir = TempDir::new().unwrap();
        let journal = Arc::new(Journal::default());
        let factories = FactoryTable::new();
        register(&factories, "notes", "1.0", Behavior::default(), &journal);

        let key = b"plexus-test-key";
        let mut config = test_config(&dir);
        config.security.trusted_keys = vec![hex::encode(key)];
        config.security.require_signatures = true;
        let runtime = PluginRuntime::new(config, factories).unwrap();

        let unsigned = ArtifactBuilder::new("notes", "1.0").write_as(dir.path(), "unsigned.zip");
        let error = runtime.load_plugin(&unsigned, "").await.unwrap_err();
        assert!(matches!(
            error,
            PluginError::Security(SecurityError::SignatureInvalid { .. })
        ));

        let forged = ArtifactBuilder::new("notes", "1.0")
            .signature(&hex::encode([7u8; 32]))
            .write_as(dir.path(), "forged.zip");
        assert!(runtime.load_plugin(&forged, "").await.is_err());

        let builder = ArtifactBuilder::new("notes", "1.0");
        let signature = plexus_core::plugin::scanner::sign_digest(key, &builder.digest()).unwrap();
        let signed = builder.signature(&signature).write_as(dir.path(), "signed.zip");
        runtime.load_plugin(&signed, "").await.unwrap();
        assert!(runtime.is_loaded("notes"));
    }
}

/// Permission Tests Module
mod permission_tests {
    use super::*;

    #[tokio::test]
    async fn test_level_bounds_granted_permissions() {
        let dir = TempDir::new().unwrap();
        let journal = Arc::new(Journal::default());
        let factories = FactoryTable::new();
        register(&factories, "viewer", "1.0", Behavior::default(), &journal);
        let runtime = runtime(&dir, factories);

        let path = ArtifactBuilder::new("viewer", "1.0")
            .level("minimal")
            .permission("read_files")
            .permission("native_code_execution")
            .write(dir.path());
        runtime.load_plugin(&path, "").await.unwrap();

        assert!(runtime.check_permission("viewer", Permission::ReadFiles));
        assert!(!runtime.check_permission("viewer", Permission::NativeCodeExecution));

        let error = runtime
            .grant_permission("viewer", Permission::NativeCodeExecution, false)
            .unwrap_err();
        assert!(matches!(
            error,
            PluginError::Security(SecurityError::PermissionDenied { .. })
        ));

        runtime
            .grant_permission("viewer", Permission::DataAccess, false)
            .unwrap();
        assert!(runtime.granted_permissions("viewer").contains(&Permission::DataAccess));

        let registration = runtime
            .audit_log("viewer")
            .into_iter()
            .find_map(|entry| match entry.event {
                AuditEvent::Registration { dropped, .. } => Some(dropped),
                _ => None,
            })
            .unwrap();
        assert_eq!(registration, vec![Permission::NativeCodeExecution]);
    }

    #[tokio::test]
    async fn test_revoke_and_temporary_grant() {
        let dir = TempDir::new().unwrap();
        let journal = Arc::new(Journal::default());
        let factories = FactoryTable::new();
        register(&factories, "sync", "1.0", Behavior::default(), &journal);
        let runtime = runtime(&dir, factories);

        let path = ArtifactBuilder::new("sync", "1.0")
            .permission("network_access")
            .write(dir.path());
        runtime.load_plugin(&path, "").await.unwrap();

        assert!(runtime.revoke_permission("sync", Permission::NetworkAccess));
        assert!(!runtime.check_permission("sync", Permission::NetworkAccess));

        runtime
            .grant_permission("sync", Permission::WriteFiles, true)
            .unwrap();
        assert!(runtime.check_permission("sync", Permission::WriteFiles));
        let profile = runtime.security().profile("sync").unwrap();
        assert!(profile.temporary_remaining(Permission::WriteFiles).is_some());
    }

    #[tokio::test]
    async fn test_high_anomaly_disables_and_stops() {
        let dir = TempDir::new().unwrap();
        let journal = Arc::new(Journal::default());
        let factories = FactoryTable::new();
        register(&factories, "rogue", "1.0", Behavior::default(), &journal);
        let runtime = runtime(&dir, factories);

        let path = ArtifactBuilder::new("rogue", "1.0")
            .permission("network_access")
            .write(dir.path());
        running(&runtime, &path).await;
        let mut events = runtime.subscribe();

        let report = ActivityReport {
            behaviors: vec![BehaviorPattern::PrivilegeEscalationAttempt],
            ..ActivityReport::default()
        };
        let finding = runtime.report_activity("rogue", &report).unwrap();
        assert_eq!(finding.severity, AnomalySeverity::High);
        assert_eq!(finding.action, MitigationAction::Disabled);

        assert!(wait_for_state(&runtime, "rogue", PluginState::Stopped).await);
        assert!(!runtime.check_permission("rogue", Permission::NetworkAccess));
        assert!(runtime.granted_permissions("rogue").is_empty());

        let error = runtime
            .grant_permission("rogue", Permission::NetworkAccess, false)
            .unwrap_err();
        assert!(matches!(error, PluginError::Security(SecurityError::Disabled { .. })));

        let error = runtime.start_plugin("rogue").await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Security);
        assert_eq!(runtime.get_state("rogue").unwrap(), PluginState::Stopped);

        let event = events.recv().await.unwrap();
        assert!(matches!(
            event,
            plexus_core::plugin::RuntimeEvent::AnomalyDetected {
                severity: AnomalySeverity::High,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_medium_anomaly_restricts() {
        let dir = TempDir::new().unwrap();
        let journal = Arc::new(Journal::default());
        let factories = FactoryTable::new();
        register(&factories, "tool", "1.0", Behavior::default(), &journal);
        let runtime = runtime(&dir, factories);

        let path = ArtifactBuilder::new("tool", "1.0")
            .level("elevated")
            .permission("delete_files")
            .permission("read_files")
            .write(dir.path());
        running(&runtime, &path).await;

        let report = ActivityReport {
            behaviors: vec![BehaviorPattern::UnauthorizedFileAccess],
            ..ActivityReport::default()
        };
        let finding = runtime.report_activity("tool", &report).unwrap();
        assert_eq!(finding.severity, AnomalySeverity::Medium);
        assert_eq!(
            finding.action,
            MitigationAction::Restricted(vec![Permission::DeleteFiles])
        );
        assert!(runtime.check_permission("tool", Permission::ReadFiles));
        assert!(!runtime.check_permission("tool", Permission::DeleteFiles));
        assert_eq!(runtime.get_state("tool").unwrap(), PluginState::Running);
    }
}

/// Configuration Tests Module
mod configuration_tests {
    use super::*;

    fn schema_behavior() -> Behavior {
        Behavior {
            schema: Some(notes_schema()),
            ..Behavior::default()
        }
    }

    #[tokio::test]
    async fn test_defaults_and_validation() {
        let dir = TempDir::new().unwrap();
        let journal = Arc::new(Journal::default());
        let factories = FactoryTable::new();
        register(&factories, "notes", "1.0", schema_behavior(), &journal);
        let runtime = runtime(&dir, factories);

        let path = ArtifactBuilder::new("notes", "1.0").write(dir.path());
        running(&runtime, &path).await;

        let config = runtime.get_configuration("notes").unwrap();
        assert_eq!(config["theme"], json!("light"));
        assert_eq!(config["font_size"], json!(12));
        assert_eq!(journal.configs.lock()[0], config);

        let error = runtime
            .update_configuration("notes", object(json!({"theme": "light", "font_size": 40})))
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Configuration);
        assert_eq!(runtime.get_configuration("notes").unwrap()["font_size"], json!(12));

        let updated = runtime
            .set_configuration_value("notes", "theme", json!("dark"))
            .await
            .unwrap();
        assert_eq!(updated["theme"], json!("dark"));
        assert_eq!(journal.configs.lock().last().unwrap()["theme"], json!("dark"));
        assert_eq!(runtime.get_state("notes").unwrap(), PluginState::Running);
    }

    #[tokio::test]
    async fn test_rejected_configuration_is_restored() {
        let dir = TempDir::new().unwrap();
        let journal = Arc::new(Journal::default());
        let factories = FactoryTable::new();
        let behavior = Behavior {
            reject_configuration: true,
            ..schema_behavior()
        };
        register(&factories, "notes", "1.0", behavior, &journal);
        let runtime = runtime(&dir, factories);

        let path = ArtifactBuilder::new("notes", "1.0").write(dir.path());
        runtime.load_plugin(&path, "").await.unwrap();
        runtime.initialize_plugin("notes", None).await.unwrap();

        let error = runtime
            .set_configuration_value("notes", "theme", json!("dark"))
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Lifecycle);
        assert_eq!(runtime.get_configuration("notes").unwrap()["theme"], json!("light"));
        assert_eq!(runtime.get_state("notes").unwrap(), PluginState::Initialized);
    }

    #[tokio::test]
    async fn test_profiles() {
        let dir = TempDir::new().unwrap();
        let journal = Arc::new(Journal::default());
        let factories = FactoryTable::new();
        register(&factories, "notes", "1.0", schema_behavior(), &journal);
        let runtime = runtime(&dir, factories);

        let path = ArtifactBuilder::new("notes", "1.0").write(dir.path());
        running(&runtime, &path).await;

        runtime
            .create_profile("notes", "night", Some(object(json!({"theme": "dark"}))))
            .unwrap();
        assert!(runtime.create_profile("notes", "night", None).is_err());
        assert_eq!(runtime.list_profiles("notes").unwrap(), vec!["default", "night"]);

        let active = runtime.switch_profile("notes", "night").await.unwrap();
        assert_eq!(active["theme"], json!("dark"));
        assert_eq!(active["font_size"], json!(12));
        assert!(runtime.delete_profile("notes", "night").is_err());
        assert!(runtime.delete_profile("notes", "default").is_err());

        runtime.switch_profile("notes", "default").await.unwrap();
        runtime.delete_profile("notes", "night").unwrap();
        assert_eq!(runtime.list_profiles("notes").unwrap(), vec!["default"]);
        assert!(runtime.switch_profile("notes", "night").await.is_err());
    }

    #[tokio::test]
    async fn test_export_import() {
        let dir = TempDir::new().unwrap();
        let journal = Arc::new(Journal::default());
        let factories = FactoryTable::new();
        register(&factories, "notes", "1.0", schema_behavior(), &journal);
        register(&factories, "other", "1.0", schema_behavior(), &journal);
        let runtime = runtime(&dir, factories);

        let notes = ArtifactBuilder::new("notes", "1.0").write(dir.path());
        let other = ArtifactBuilder::new("other", "1.0").write(dir.path());
        running(&runtime, &notes).await;
        runtime.load_plugin(&other, "").await.unwrap();

        runtime
            .set_configuration_value("notes", "sync", json!(true))
            .await
            .unwrap();
        let document = runtime.export_configuration("notes").unwrap();

        assert!(runtime
            .import_configuration("other", document.clone())
            .await
            .is_err());

        runtime
            .set_configuration_value("notes", "sync", json!(false))
            .await
            .unwrap();
        let restored = runtime.import_configuration("notes", document).await.unwrap();
        assert_eq!(restored["sync"], json!(true));
    }

    #[tokio::test]
    async fn test_configuration_persists_across_runtimes() {
        let dir = TempDir::new().unwrap();
        let journal = Arc::new(Journal::default());
        let path = ArtifactBuilder::new("notes", "1.0").write(dir.path());

        let mut config = test_config(&dir);
        config.orchestrator.config_dir = Some(dir.path().join("configs"));

        {
            let factories = FactoryTable::new();
            register(&factories, "notes", "1.0", schema_behavior(), &journal);
            let runtime = PluginRuntime::new(config.clone(), factories).unwrap();
            runtime.load_plugin(&path, "").await.unwrap();
            runtime
                .set_configuration_value("notes", "font_size", json!(20))
                .await
                .unwrap();
            runtime.shutdown().await;
        }

        let factories = FactoryTable::new();
        register(&factories, "notes", "1.0", schema_behavior(), &journal);
        let runtime = PluginRuntime::new(config, factories).unwrap();
        runtime.load_plugin(&path, "").await.unwrap();
        assert_eq!(runtime.get_configuration("notes").unwrap()["font_size"], json!(20));
    }
}

/// Update And Rollback Tests Module
mod versioning_tests {
    use super::*;

    fn factories(journal: &Arc<Journal>, v2: Behavior) -> FactoryTable {
        let factories = FactoryTable::new();
        register(&factories, "notes", "1.0", Behavior::default(), journal);
        register_as(&factories, "notes.V2", "notes", "2.0", v2, journal);
        factories
    }

    async fn version_of(runtime: &PluginRuntime) -> String {
        runtime
            .dispatch_event("notes", "version", json!(null))
            .await
            .unwrap()
            .message
    }

    #[tokio::test]
    async fn test_update_then_rollback() {
        let dir = TempDir::new().unwrap();
        let journal = Arc::new(Journal::default());
        let runtime = runtime(&dir, factories(&journal, Behavior::default()));

        let v1 = ArtifactBuilder::new("notes", "1.0").write(dir.path());
        let v2 = ArtifactBuilder::new("notes", "2.0")
            .main_class("notes.V2")
            .write(dir.path());
        running(&runtime, &v1).await;

        let descriptor = runtime.update_plugin("notes", &v2, "").await.unwrap();
        assert_eq!(descriptor.version.to_string(), "2.0");
        assert_eq!(runtime.get_state("notes").unwrap(), PluginState::Running);
        assert_eq!(version_of(&runtime).await, "2.0");

        let retained: Vec<String> = runtime
            .retained_versions("notes")
            .iter()
            .map(|v| v.to_string())
            .collect();
        assert_eq!(retained, vec!["1.0", "2.0"]);

        // The original file is gone; the backup copy is used.
        std::fs::remove_file(&v1).unwrap();
        let descriptor = runtime.rollback_plugin("notes", "1.0").await.unwrap();
        assert_eq!(descriptor.version.to_string(), "1.0");
        assert_eq!(runtime.get_state("notes").unwrap(), PluginState::Running);
        assert_eq!(version_of(&runtime).await, "1.0");
    }

    #[tokio::test]
    async fn test_failed_update_leaves_plugin_unloaded() {
        let dir = TempDir::new().unwrap();
        let journal = Arc::new(Journal::default());
        let broken = Behavior {
            fail_start: true,
            ..Behavior::default()
        };
        let runtime = runtime(&dir, factories(&journal, broken));

        let v1 = ArtifactBuilder::new("notes", "1.0").write(dir.path());
        let v2 = ArtifactBuilder::new("notes", "2.0")
            .main_class("notes.V2")
            .write(dir.path());
        running(&runtime, &v1).await;

        assert!(runtime.update_plugin("notes", &v2, "").await.is_err());
        assert!(!runtime.is_loaded("notes"));

        runtime.rollback_plugin("notes", "1.0").await.unwrap();
        assert_eq!(runtime.get_state("notes").unwrap(), PluginState::Running);
        assert_eq!(version_of(&runtime).await, "1.0");
    }

    #[tokio::test]
    async fn test_update_keeps_configuration() {
        let dir = TempDir::new().unwrap();
        let journal = Arc::new(Journal::default());
        let factories = FactoryTable::new();
        let with_schema = Behavior {
            schema: Some(notes_schema()),
            ..Behavior::default()
        };
        register(&factories, "notes", "1.0", with_schema.clone(), &journal);
        register_as(&factories, "notes.V2", "notes", "2.0", with_schema, &journal);
        let runtime = runtime(&dir, factories);

        let v1 = ArtifactBuilder::new("notes", "1.0").write(dir.path());
        let v2 = ArtifactBuilder::new("notes", "2.0")
            .main_class("notes.V2")
            .write(dir.path());
        runtime.load_plugin(&v1, "").await.unwrap();
        runtime.initialize_plugin("notes", None).await.unwrap();
        runtime
            .set_configuration_value("notes", "theme", json!("dark"))
            .await
            .unwrap();

        runtime.update_plugin("notes", &v2, "").await.unwrap();
        assert_eq!(runtime.get_state("notes").unwrap(), PluginState::Running);
        assert_eq!(runtime.get_configuration("notes").unwrap()["theme"], json!("dark"));
    }

    #[tokio::test]
    async fn test_rollback_refuses_overwritten_artifact() {
        let dir = TempDir::new().unwrap();
        let journal = Arc::new(Journal::default());
        let mut config = test_config(&dir);
        config.orchestrator.backup_dir = None;
        let runtime = PluginRuntime::new(config, factories(&journal, Behavior::default())).unwrap();

        let path = ArtifactBuilder::new("notes", "1.0").write_as(dir.path(), "notes.zip");
        running(&runtime, &path).await;

        ArtifactBuilder::new("notes", "2.0")
            .main_class("notes.V2")
            .write_as(dir.path(), "notes.zip");
        runtime.update_plugin("notes", &path, "").await.unwrap();

        let error = runtime.rollback_plugin("notes", "1.0").await.unwrap_err();
        assert!(matches!(
            error,
            PluginError::Lifecycle(LifecycleError::NoRollbackHistory { .. })
        ));
        assert_eq!(runtime.get_state("notes").unwrap(), PluginState::Running);
        assert_eq!(version_of(&runtime).await, "2.0");
    }

    #[tokio::test]
    async fn test_rollback_accepts_short_version() {
        let dir = TempDir::new().unwrap();
        let journal = Arc::new(Journal::default());
        let runtime = runtime(&dir, factories(&journal, Behavior::default()));

        let v1 = ArtifactBuilder::new("notes", "1.0").write(dir.path());
        let v2 = ArtifactBuilder::new("notes", "2.0")
            .main_class("notes.V2")
            .write(dir.path());
        running(&runtime, &v1).await;
        runtime.update_plugin("notes", &v2, "").await.unwrap();

        let descriptor = runtime.rollback_plugin("notes", "1").await.unwrap();
        assert_eq!(descriptor.version.to_string(), "1.0");
        assert_eq!(version_of(&runtime).await, "1.0");
    }

    #[tokio::test]
    async fn test_rollback_to_unknown_version() {
        let dir = TempDir::new().unwrap();
        let journal = Arc::new(Journal::default());
        let runtime = runtime(&dir, factories(&journal, Behavior::default()));

        let v1 = ArtifactBuilder::new("notes", "1.0").write(dir.path());
        runtime.load_plugin(&v1, "").await.unwrap();

        let error = runtime.rollback_plugin("notes", "0.9").await.unwrap_err();
        assert!(matches!(
            error,
            PluginError::Lifecycle(LifecycleError::NoRollbackHistory { .. })
        ));
        assert!(runtime.is_loaded("notes"));
    }
}
