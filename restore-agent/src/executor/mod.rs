//! Restore executor - Orchestrates one restore attempt.
//!
//! Stages run strictly in order, each finishing its cleanup before the next
//! one starts:
//! - destination safety check on the target archive
//! - catalog listing and backup selection on the source archive
//! - archive continuity probe
//! - data directory materialization
//! - WAL volume relocation
//! - recovery configuration

pub mod command;
pub mod continuity;
pub mod destination;
pub mod directive;
pub mod exit_code;
pub mod materialize;

use crate::catalog::listing::list_backups;
use crate::catalog::target::RecoveryTarget;
use crate::catalog::{select, BackupDescriptor};
use crate::cluster::ClusterDescriptor;
use crate::fs::{relocate, WAL_DIRECTORY};
use crate::store::control_plane::ControlPlane;
use crate::store::credentials::{Environment, SecretStore};
use crate::store::StoreConfiguration;
use crate::{RestoreError, Result};
use command::BarmanTools;
use exit_code::ToolKind;
use materialize::RestoreOutcome;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

/// Locations a restore writes to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestorePaths {
    /// Data directory to populate
    pub pgdata: PathBuf,
    /// Scratch area exclusive to the running attempt
    pub scratch_dir: PathBuf,
    /// Dedicated WAL volume, required when the cluster declares WAL storage
    #[serde(default)]
    pub wal_volume: Option<PathBuf>,
}

impl Default for RestorePaths {
    fn default() -> Self {
        Self {
            pgdata: PathBuf::from("/var/lib/postgresql/data/pgdata"),
            scratch_dir: PathBuf::from("/controller"),
            wal_volume: None,
        }
    }
}

/// Everything a restore needs besides the cluster itself
pub struct RestoreContext<C> {
    pub control_plane: C,
    pub secrets: SecretStore,
    pub tools: BarmanTools,
    pub paths: RestorePaths,
    /// Snapshot of the agent environment, the base of every child environment
    pub base_env: Environment,
}

/// The chosen backup together with where to fetch it from
#[derive(Debug, Clone)]
pub struct ResolvedBackup {
    pub descriptor: BackupDescriptor,
    /// Server name the backup is archived under
    pub server_name: String,
    pub store: StoreConfiguration,
}

/// Answer to a restore request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreResponse {
    /// Lines to append to the instance configuration
    pub restore_config: String,
    /// Environment the instance needs to run the restore command, as `KEY=VALUE`
    pub envs: Vec<String>,
}

/// Main restore executor
pub struct RestoreExecutor<C> {
    ctx: Arc<RestoreContext<C>>,
    cancel_token: CancellationToken,
    attempt_id: String,
}

impl<C: ControlPlane> RestoreExecutor<C> {
    /// Create a new restore executor (no cancellation support)
    pub fn new(ctx: Arc<RestoreContext<C>>) -> Self {
        Self::with_cancel(ctx, CancellationToken::new())
    }

    /// Create a new restore executor with cancellation support
    pub fn with_cancel(ctx: Arc<RestoreContext<C>>, cancel_token: CancellationToken) -> Self {
        Self {
            ctx,
            cancel_token,
            attempt_id: Uuid::new_v4().to_string(),
        }
    }

    /// Log under an id assigned elsewhere (the API's attempt id)
    pub fn with_attempt_id(mut self, attempt_id: impl Into<String>) -> Self {
        self.attempt_id = attempt_id.into();
        self
    }

    pub fn attempt_id(&self) -> &str {
        &self.attempt_id
    }

    /// Run a full restore for `cluster`
    pub async fn execute(&self, cluster: &ClusterDescriptor) -> Result<RestoreResponse> {
        let span = info_span!(
            "restore",
            attempt = %self.attempt_id,
            cluster = %cluster.name(),
            namespace = %cluster.namespace()
        );

        async {
            info!("Starting restore");
            let result = self.run(cluster).await;
            match &result {
                Ok(_) => info!("Restore attempt succeeded"),
                Err(e) => error!(kind = e.kind(), transient = e.is_transient(), "Restore attempt failed: {}", e),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run(&self, cluster: &ClusterDescriptor) -> Result<RestoreResponse> {
        let ctx = &*self.ctx;
        let cancel = &self.cancel_token;
        let namespace = cluster.namespace();

        // Everything that can be rejected without I/O is rejected first
        let source = cluster.recovery_source()?;
        let target = cluster
            .recovery()
            .and_then(|r| r.recovery_target.as_ref())
            .map(RecoveryTarget::from_spec)
            .transpose()?;
        let wal_volume = if cluster.has_wal_storage() {
            Some(ctx.paths.wal_volume.clone().ok_or_else(|| {
                RestoreError::Config(
                    "cluster declares WAL storage but no WAL volume path is configured".to_string(),
                )
            })?)
        } else {
            None
        };
        let target_store_name = cluster.own_plugin_parameters()?.barman_object_name;

        info!(
            "Recovering from external cluster {} (server {}, object store {})",
            source.name, source.server_name, source.object_store
        );

        let source_store = self
            .cancellable(ctx.control_plane.get_object_store(namespace, &source.object_store))
            .await?
            .spec
            .configuration;
        let target_store = match &target_store_name {
            Some(name) => Some(
                self.cancellable(ctx.control_plane.get_object_store(namespace, name))
                    .await?
                    .spec
                    .configuration,
            ),
            None => None,
        };

        self.check_cancelled()?;
        let status = destination::check_destination(
            &ctx.tools,
            &ctx.secrets,
            &ctx.base_env,
            cluster,
            target_store.as_ref(),
            cancel,
        )
        .await?;
        info!("Destination check: {:?}", status);

        self.check_cancelled()?;
        let env = ctx
            .secrets
            .resolve(namespace, &source_store, &ctx.base_env)?
            .unwrap_or_else(|| ctx.base_env.clone());
        let catalog = list_backups(&ctx.tools, &source_store, &source.server_name, &env, cancel).await?;
        let descriptor = select(&catalog, target.as_ref())?;
        info!(
            "Target backup found: {} (begin WAL {}, ended {:?})",
            descriptor.id, descriptor.begin_wal, descriptor.end_time
        );

        let resolved = ResolvedBackup {
            descriptor,
            server_name: source.server_name,
            store: source_store,
        };

        self.check_cancelled()?;
        continuity::ensure_continuity(&ctx.tools, &resolved, &env, &ctx.paths.scratch_dir, cancel).await?;

        self.check_cancelled()?;
        match materialize::materialize(&ctx.tools, &resolved, &env, &ctx.paths.pgdata, cancel).await? {
            RestoreOutcome::Restored => {}
            RestoreOutcome::Failed(class) => {
                return Err(RestoreError::Mechanism {
                    tool: ToolKind::Restore,
                    class,
                });
            }
        }

        if let Some(volume) = &wal_volume {
            self.check_cancelled()?;
            let performed = relocate(&ctx.paths.pgdata, WAL_DIRECTORY, volume, cancel).await?;
            info!("WAL volume relocation performed: {}", performed);
        }

        Ok(RestoreResponse {
            restore_config: directive::build_restore_config(&ctx.tools, &resolved),
            envs: env.to_env_list(),
        })
    }

    /// Race `operation` against cancellation
    async fn cancellable<T>(&self, operation: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            result = operation => result,
            _ = self.cancel_token.cancelled() => Err(RestoreError::Cancelled),
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel_token.is_cancelled() {
            Err(RestoreError::Cancelled)
        } else {
            Ok(())
        }
    }
}
