//! Safety check of the archive the new cluster will write to.
//!
//! A freshly bootstrapped cluster must not start archiving WAL on top of
//! another cluster's archive. When the cluster opts in, the target destination
//! is probed with `barman-cloud-check-wal-archive` before anything is restored.

use super::command::{run_streaming, BarmanTools};
use super::exit_code::{ExitClass, ToolKind};
use crate::cluster::ClusterDescriptor;
use crate::store::credentials::{Environment, SecretStore};
use crate::store::StoreConfiguration;
use crate::{RestoreError, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Why the probe did not run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoTargetStore,
    NoCredentials,
    NotRequested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationStatus {
    Skipped(SkipReason),
    Verified,
}

pub fn check_wal_archive_options(store: &StoreConfiguration, server_name: &str) -> Vec<String> {
    let mut options = store.endpoint_options();
    options.push(store.destination_path.clone());
    options.push(server_name.to_string());
    options.extend(store.provider_options());
    options
}

/// Verify the target archive is unused, if the cluster asked for it
pub async fn check_destination(
    tools: &BarmanTools,
    secrets: &SecretStore,
    base_env: &Environment,
    cluster: &ClusterDescriptor,
    target_store: Option<&StoreConfiguration>,
    cancel: &CancellationToken,
) -> Result<DestinationStatus> {
    let Some(store) = target_store else {
        return Ok(DestinationStatus::Skipped(SkipReason::NoTargetStore));
    };

    let Some(env) = secrets.resolve(cluster.namespace(), store, base_env)? else {
        return Ok(DestinationStatus::Skipped(SkipReason::NoCredentials));
    };

    let server_name = cluster.archive_server_name()?;

    if !cluster.empty_wal_archive_check_enabled() {
        return Ok(DestinationStatus::Skipped(SkipReason::NotRequested));
    }

    let options = check_wal_archive_options(store, &server_name);
    let output = run_streaming(tools, ToolKind::CheckWalArchive, &options, &env, cancel).await?;

    match output.failure() {
        None => {
            info!(
                "WAL archive destination {} is safe for server {}",
                store.destination_path, server_name
            );
            Ok(DestinationStatus::Verified)
        }
        Some(ExitClass::ArchiveInUse) => Err(RestoreError::UnsafeDestination {
            destination: store.destination_path.clone(),
            server_name,
        }),
        Some(class) => Err(RestoreError::Mechanism {
            tool: ToolKind::CheckWalArchive,
            class,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::tests::cluster_json;
    use crate::cluster::{decode_cluster, CHECK_EMPTY_WAL_ARCHIVE_ANNOTATION};
    use crate::executor::command::tests::{fake_tool, test_env};
    use crate::store::tests::s3_store;
    use serde_json::json;
    use std::path::Path;
    use tempfile::TempDir;

    struct Fixture {
        _temp_dir: TempDir,
        secrets: SecretStore,
        tools: BarmanTools,
        marker: std::path::PathBuf,
    }

    /// Secrets for `s3_store()` plus a check tool exiting with `code`. The
    /// tool records its server name argument in a marker file.
    fn fixture(code: i32) -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        let secret_dir = temp_dir.path().join("secrets/default/minio");
        std::fs::create_dir_all(&secret_dir).unwrap();
        std::fs::write(secret_dir.join("ACCESS_KEY_ID"), "id").unwrap();
        std::fs::write(secret_dir.join("ACCESS_SECRET_KEY"), "secret").unwrap();

        let marker = temp_dir.path().join("checked");
        let tools = BarmanTools {
            check_wal_archive: fake_tool(
                temp_dir.path(),
                "check",
                &format!("echo \"$4\" > '{}'\nexit {}\n", marker.display(), code),
            ),
            ..BarmanTools::default()
        };

        Fixture {
            secrets: SecretStore::new(temp_dir.path().join("secrets")),
            tools,
            marker,
            _temp_dir: temp_dir,
        }
    }

    fn opted_in_cluster() -> ClusterDescriptor {
        let mut value = cluster_json();
        value["metadata"]["annotations"] = json!({ CHECK_EMPTY_WAL_ARCHIVE_ANNOTATION: "enabled" });
        decode_cluster(value).unwrap()
    }

    async fn check(fixture: &Fixture, cluster: &ClusterDescriptor, store: Option<&StoreConfiguration>) -> Result<DestinationStatus> {
        check_destination(
            &fixture.tools,
            &fixture.secrets,
            &test_env(),
            cluster,
            store,
            &CancellationToken::new(),
        )
        .await
    }

    fn checked_server(marker: &Path) -> Option<String> {
        std::fs::read_to_string(marker).ok().map(|s| s.trim().to_string())
    }

    #[tokio::test]
    async fn test_empty_destination_is_verified() {
        let fixture = fixture(0);
        let status = check(&fixture, &opted_in_cluster(), Some(&s3_store())).await.unwrap();
        assert_eq!(status, DestinationStatus::Verified);
        assert_eq!(checked_server(&fixture.marker).as_deref(), Some("cluster-restore"));
    }

    #[tokio::test]
    async fn test_used_destination_is_unsafe() {
        let fixture = fixture(1);
        let err = check(&fixture, &opted_in_cluster(), Some(&s3_store())).await.unwrap_err();
        match err {
            RestoreError::UnsafeDestination { destination, server_name } => {
                assert_eq!(destination, "s3://backups/");
                assert_eq!(server_name, "cluster-restore");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_other_failures_are_mechanism_errors() {
        let fixture = fixture(2);
        let err = check(&fixture, &opted_in_cluster(), Some(&s3_store())).await.unwrap_err();
        assert!(matches!(
            err,
            RestoreError::Mechanism { tool: ToolKind::CheckWalArchive, class: ExitClass::Connectivity }
        ));
    }

    #[tokio::test]
    async fn test_skipped_cases() {
        let fixture = fixture(1);

        let status = check(&fixture, &opted_in_cluster(), None).await.unwrap();
        assert_eq!(status, DestinationStatus::Skipped(SkipReason::NoTargetStore));

        let no_credentials = StoreConfiguration {
            destination_path: "s3://backups/".to_string(),
            ..Default::default()
        };
        let status = check(&fixture, &opted_in_cluster(), Some(&no_credentials)).await.unwrap();
        assert_eq!(status, DestinationStatus::Skipped(SkipReason::NoCredentials));

        let not_opted_in = decode_cluster(cluster_json()).unwrap();
        let status = check(&fixture, &not_opted_in, Some(&s3_store())).await.unwrap();
        assert_eq!(status, DestinationStatus::Skipped(SkipReason::NotRequested));

        assert!(checked_server(&fixture.marker).is_none());
    }

    #[tokio::test]
    async fn test_plugin_server_name_is_checked() {
        let fixture = fixture(0);
        let mut value = cluster_json();
        value["metadata"]["annotations"] = json!({ CHECK_EMPTY_WAL_ARCHIVE_ANNOTATION: "enabled" });
        value["spec"]["plugins"][0]["parameters"]["serverName"] = json!("cluster-restore-v2");
        let cluster = decode_cluster(value).unwrap();

        check(&fixture, &cluster, Some(&s3_store())).await.unwrap();
        assert_eq!(checked_server(&fixture.marker).as_deref(), Some("cluster-restore-v2"));
    }
}
