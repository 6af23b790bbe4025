//! Email manifest assembly.
//!
//! The pipeline does not speak SMTP. When email is enabled it writes a
//! manifest naming the recipients, subject and attachment paths; an
//! external sender picks that file up.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::EmailConfig;
use crate::error::Result;
use crate::types::Artifacts;

const MANIFEST_FILE: &str = "email_manifest.json";

/// What an external mailer needs to send the report.
#[derive(Debug, Clone, Serialize)]
pub struct EmailManifest {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<PathBuf>,
}

/// Assemble the manifest from the run's artifacts.
///
/// Returns `None` when email is disabled or no recipients are configured;
/// the attachments are the report tables followed by the model files.
pub fn build_manifest(config: &EmailConfig, artifacts: &Artifacts) -> Option<EmailManifest> {
    if !config.enabled {
        debug!("Email disabled, no manifest");
        return None;
    }
    if config.to.is_empty() {
        warn!("Email enabled but no recipients configured, skipping manifest");
        return None;
    }

    let mut attachments: Vec<PathBuf> = Vec::new();
    attachments.extend(artifacts.tables.iter().cloned());
    attachments.extend(artifacts.models.iter().cloned());

    let body = format!(
        "Sales pipeline run finished: {} report tables and {} model files attached.",
        artifacts.tables.len(),
        artifacts.models.len()
    );
    Some(EmailManifest {
        to: config.to.clone(),
        subject: config.subject.clone(),
        body,
        attachments,
    })
}

/// Write the manifest as JSON under `dir`, returning the path on success.
/// A failed write costs the manifest file, not the run.
pub fn write_manifest(manifest: &EmailManifest, dir: &Path) -> Option<PathBuf> {
    let path = dir.join(MANIFEST_FILE);
    let result = (|| -> Result<()> {
        fs::create_dir_all(dir)?;
        let json = serde_json::to_string_pretty(manifest)?;
        fs::write(&path, json)?;
        Ok(())
    })();
    match result {
        Ok(()) => {
            info!(
                "Email manifest written: {} ({} recipients, {} attachments)",
                path.display(),
                manifest.to.len(),
                manifest.attachments.len()
            );
            Some(path)
        }
        Err(e) => {
            warn!("Failed to write email manifest {}: {}", path.display(), e);
            None
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn artifacts_fixture() -> Artifacts {
        Artifacts {
            tables: vec![PathBuf::from("reports/overall_metrics.csv")],
            models: vec![PathBuf::from("models/rf_amount.json")],
            ..Artifacts::default()
        }
    }

    #[test]
    fn test_no_manifest_when_disabled() {
        let config = EmailConfig::default();
        assert!(build_manifest(&config, &artifacts_fixture()).is_none());
    }

    #[test]
    fn test_no_manifest_without_recipients() {
        let config = EmailConfig {
            enabled: true,
            ..EmailConfig::default()
        };
        assert!(build_manifest(&config, &artifacts_fixture()).is_none());
    }

    #[test]
    fn test_manifest_collects_attachments() {
        let config = EmailConfig {
            enabled: true,
            to: vec!["ops@example.com".to_string()],
            ..EmailConfig::default()
        };
        let manifest = build_manifest(&config, &artifacts_fixture()).unwrap();
        assert_eq!(manifest.subject, "Pipeline report");
        assert_eq!(manifest.attachments.len(), 2);
        assert!(manifest.body.contains("1 report tables"));
    }

    #[test]
    fn test_write_manifest_produces_json() {
        let dir = tempdir().unwrap();
        let manifest = EmailManifest {
            to: vec!["ops@example.com".to_string()],
            subject: "Pipeline report".to_string(),
            body: "done".to_string(),
            attachments: vec![],
        };
        let path = write_manifest(&manifest, dir.path()).unwrap();
        assert!(path.exists());
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["to"][0], "ops@example.com");
    }
}
