//! Recovery configuration handed back to the instance manager.

use super::command::BarmanTools;
use super::continuity::wal_restore_options;
use super::exit_code::ToolKind;
use super::ResolvedBackup;

/// Render the lines appended to the instance configuration: replay fetches
/// further segments with `barman-cloud-wal-restore` and the instance is
/// promoted once the archive is exhausted.
pub fn build_restore_config(tools: &BarmanTools, resolved: &ResolvedBackup) -> String {
    let mut command = tools.get(ToolKind::WalRestore).command_line();
    command.extend(wal_restore_options(resolved, "%f", "%p"));

    format!(
        "recovery_target_action = promote\nrestore_command = '{}'\n",
        command.join(" ").replace('\'', "''")
    )
}
