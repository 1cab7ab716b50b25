//! Building the catalog from `barman-cloud-backup-list --format json`.

use super::lsn::Lsn;
use super::{parse_timestamp, BackupCatalog, BackupDescriptor};
use crate::executor::command::{run_capturing, BarmanTools};
use crate::executor::exit_code::ToolKind;
use crate::store::credentials::Environment;
use crate::store::StoreConfiguration;
use crate::{RestoreError, Result};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct BackupList {
    #[serde(default)]
    backups_list: Vec<BackupEntry>,
}

/// One backup as printed by barman
#[derive(Debug, Deserialize)]
struct BackupEntry {
    backup_id: String,
    #[serde(default)]
    backup_name: Option<String>,
    #[serde(default)]
    server_name: Option<String>,
    #[serde(default)]
    begin_time: Option<String>,
    #[serde(default)]
    end_time: Option<String>,
    #[serde(default)]
    begin_wal: Option<String>,
    #[serde(default)]
    end_wal: Option<String>,
    #[serde(default)]
    begin_xlog: Option<String>,
    #[serde(default)]
    end_xlog: Option<String>,
    #[serde(default)]
    timeline: Option<u32>,
    #[serde(default)]
    error: Option<String>,
}

impl BackupEntry {
    fn into_descriptor(self, server_name: &str) -> BackupDescriptor {
        let timestamp = |field: &str, raw: Option<String>| {
            let raw = raw.filter(|r| !r.trim().is_empty())?;
            let parsed = parse_timestamp(&raw);
            if parsed.is_none() {
                warn!("Backup {}: unparseable {} {:?}", self.backup_id, field, raw);
            }
            parsed
        };
        let lsn = |field: &str, raw: Option<String>| {
            let raw = raw.filter(|r| !r.trim().is_empty())?;
            match raw.parse::<Lsn>() {
                Ok(lsn) => Some(lsn),
                Err(e) => {
                    warn!("Backup {}: {} {}", self.backup_id, field, e);
                    None
                }
            }
        };

        BackupDescriptor {
            begin_time: timestamp("begin_time", self.begin_time.clone()),
            end_time: timestamp("end_time", self.end_time.clone()),
            begin_lsn: lsn("begin_xlog", self.begin_xlog.clone()),
            end_lsn: lsn("end_xlog", self.end_xlog.clone()),
            id: self.backup_id,
            name: self.backup_name.filter(|n| !n.is_empty()),
            server_name: self
                .server_name
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| server_name.to_string()),
            begin_wal: self.begin_wal.unwrap_or_default(),
            end_wal: self.end_wal.unwrap_or_default(),
            timeline: self.timeline.unwrap_or_default(),
            error: self.error.filter(|e| !e.is_empty()),
        }
    }
}

/// Decode the JSON printed by `barman-cloud-backup-list --format json`
pub fn parse_backup_list(output: &str, server_name: &str) -> Result<BackupCatalog> {
    let list: BackupList = serde_json::from_str(output)?;
    Ok(list
        .backups_list
        .into_iter()
        .map(|entry| entry.into_descriptor(server_name))
        .collect())
}

/// Command line of the listing tool for one server
pub fn backup_list_options(store: &StoreConfiguration, server_name: &str) -> Vec<String> {
    let mut options = store.endpoint_options();
    options.extend(["--format".to_string(), "json".to_string()]);
    options.push(store.destination_path.clone());
    options.push(server_name.to_string());
    options.extend(store.provider_options());
    options
}

/// List the backups `server_name` has in `store`
pub async fn list_backups(
    tools: &BarmanTools,
    store: &StoreConfiguration,
    server_name: &str,
    env: &Environment,
    cancel: &CancellationToken,
) -> Result<BackupCatalog> {
    let options = backup_list_options(store, server_name);
    let output = run_capturing(tools, ToolKind::BackupList, &options, env, cancel)
        .await?
        .into_result()?;

    let catalog = parse_backup_list(&output.stdout, server_name).map_err(|e| match e {
        RestoreError::Serialization(e) => RestoreError::Config(format!(
            "cannot decode {} output: {}",
            ToolKind::BackupList,
            e
        )),
        other => other,
    })?;

    info!(
        "Found {} backups for server {} in {}",
        catalog.len(),
        server_name,
        store.destination_path
    );
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::select;
    use crate::executor::command::tests::{fake_tool, test_env};
    use crate::executor::exit_code::ExitClass;
    use crate::store::tests::s3_store;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    const LIST_OUTPUT: &str = r#"{
        "backups_list": [
            {
                "backup_id": "20251007T100000",
                "backup_name": "nightly",
                "begin_time": "Tue Oct  7 09:50:00 2025",
                "end_time": "Tue Oct  7 10:00:00 2025",
                "begin_wal": "000000010000000000000002",
                "end_wal": "000000010000000000000002",
                "begin_xlog": "0/2000028",
                "end_xlog": "0/2000138",
                "timeline": 1,
                "error": null
            },
            {
                "backup_id": "20251007T110000",
                "begin_time": "Tue Oct  7 10:50:00 2025",
                "end_time": "",
                "begin_wal": "000000010000000000000004",
                "timeline": 1,
                "error": "failure uploading data (connection reset)"
            }
        ]
    }"#;

    #[test]
    fn test_parse_backup_list() {
        let catalog = parse_backup_list(LIST_OUTPUT, "cluster-example").unwrap();
        assert_eq!(catalog.len(), 2);

        let nightly = catalog.get("20251007T100000").unwrap();
        assert_eq!(nightly.name.as_deref(), Some("nightly"));
        assert_eq!(nightly.server_name, "cluster-example");
        assert_eq!(nightly.begin_lsn, Some(Lsn(0x2000028)));
        assert_eq!(nightly.end_time, Some(Utc.with_ymd_and_hms(2025, 10, 7, 10, 0, 0).unwrap()));
        assert!(nightly.is_usable());

        let failed = catalog.get("20251007T110000").unwrap();
        assert_eq!(failed.end_time, None);
        assert!(!failed.is_usable());

        assert_eq!(select(&catalog, None).unwrap().id, "20251007T100000");
    }

    #[test]
    fn test_parse_empty_list() {
        let catalog = parse_backup_list(r#"{"backups_list": []}"#, "cluster-example").unwrap();
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_backup_list_options() {
        assert_eq!(
            backup_list_options(&s3_store(), "cluster-example"),
            vec![
                "--endpoint-url",
                "http://minio:9000",
                "--format",
                "json",
                "s3://backups/",
                "cluster-example",
                "--cloud-provider",
                "aws-s3",
            ]
        );
    }

    #[tokio::test]
    async fn test_list_backups_runs_tool() {
        let temp_dir = TempDir::new().unwrap();
        let listing = temp_dir.path().join("list.json");
        std::fs::write(&listing, LIST_OUTPUT).unwrap();

        let tools = BarmanTools {
            backup_list: fake_tool(
                temp_dir.path(),
                "backup-list",
                &format!("[ \"$6\" = cluster-example ] || exit 3\ncat '{}'\n", listing.display()),
            ),
            ..BarmanTools::default()
        };

        let catalog = list_backups(
            &tools,
            &s3_store(),
            "cluster-example",
            &test_env(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(catalog.len(), 2);
    }

    #[tokio::test]
    async fn test_list_backups_connectivity_failure() {
        let temp_dir = TempDir::new().unwrap();
        let tools = BarmanTools {
            backup_list: fake_tool(temp_dir.path(), "backup-list", "exit 2\n"),
            ..BarmanTools::default()
        };

        let result = list_backups(
            &tools,
            &s3_store(),
            "cluster-example",
            &test_env(),
            &CancellationToken::new(),
        )
        .await;

        match result {
            Err(err @ RestoreError::Mechanism { .. }) => {
                assert!(err.is_transient());
                assert!(matches!(
                    err,
                    RestoreError::Mechanism { class: ExitClass::Connectivity, .. }
                ));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
