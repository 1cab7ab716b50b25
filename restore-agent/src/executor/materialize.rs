//! Populating the data directory with `barman-cloud-restore`.

use super::command::{run_streaming, BarmanTools};
use super::exit_code::{ExitClass, ToolKind};
use super::ResolvedBackup;
use crate::store::credentials::Environment;
use crate::Result;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// What happened to the data directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    Restored,
    /// The tool failed; whatever it wrote is left in place
    Failed(ExitClass),
}

pub fn restore_options(resolved: &ResolvedBackup, target_dir: &Path) -> Vec<String> {
    let mut options = resolved.store.endpoint_options();
    options.push(resolved.store.destination_path.clone());
    options.push(resolved.server_name.clone());
    options.push(resolved.descriptor.id.clone());
    options.extend(resolved.store.provider_options());
    options.push(target_dir.to_string_lossy().into_owned());
    options
}

/// Restore the resolved backup into `target_dir`
pub async fn materialize(
    tools: &BarmanTools,
    resolved: &ResolvedBackup,
    env: &Environment,
    target_dir: &Path,
    cancel: &CancellationToken,
) -> Result<RestoreOutcome> {
    info!(
        "Restoring backup {} of server {} into {}",
        resolved.descriptor.id,
        resolved.server_name,
        target_dir.display()
    );

    let options = restore_options(resolved, target_dir);
    let output = run_streaming(tools, ToolKind::Restore, &options, env, cancel).await?;

    match output.failure() {
        None => {
            info!("Restore completed");
            Ok(RestoreOutcome::Restored)
        }
        Some(class) => {
            error!("Can't restore backup {}: {}", resolved.descriptor.id, class);
            Ok(RestoreOutcome::Failed(class))
        }
    }
}
