//! Configuration management for the restore agent.
//!
//! Built-in defaults are layered under an optional TOML file, and
//! `RESTORE_AGENT__<SECTION>__<KEY>` environment variables override both.

use crate::executor::command::BarmanTools;
use crate::executor::{RestoreContext, RestorePaths};
use crate::store::control_plane::{
    ControlPlaneClient, FileControlPlane, HttpControlPlane, DEFAULT_REQUEST_TIMEOUT,
};
use crate::store::credentials::{Environment, SecretStore};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "RESTORE_AGENT";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub agent: AgentConfig,
    pub paths: RestorePaths,
    pub control_plane: ControlPlaneConfig,
    pub secrets: SecretsConfig,
    pub tools: BarmanTools,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Unique agent identifier
    pub id: String,

    /// HTTP server port
    pub port: u16,
}

/// Where object store definitions are read from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ControlPlaneConfig {
    /// One TOML file per store under `<root>/<namespace>/<name>.toml`
    File { root: PathBuf },
    /// The orchestrator API
    Http {
        url: String,
        #[serde(default)]
        token: Option<String>,
        /// Per-request timeout in seconds
        #[serde(default = "default_request_timeout_secs")]
        timeout_secs: u64,
    },
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT.as_secs()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretsConfig {
    /// Mounted secrets, laid out as `<root>/<namespace>/<secret>/<key>`
    pub root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            agent: AgentConfig {
                id: hostname::get()
                    .ok()
                    .and_then(|h| h.into_string().ok())
                    .unwrap_or_else(|| "restore-agent".to_string()),
                port: 9990,
            },
            paths: RestorePaths::default(),
            control_plane: ControlPlaneConfig::File {
                root: PathBuf::from("/etc/restore-agent/objectstores"),
            },
            secrets: SecretsConfig {
                root: PathBuf::from("/etc/restore-agent/secrets"),
            },
            tools: BarmanTools::default(),
            log: LogConfig {
                level: default_log_level(),
            },
        }
    }
}

impl Config {
    /// Load configuration: defaults, then the file if given, then the environment
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        Self::load(Some(path))
    }

    pub fn control_plane_client(&self) -> crate::Result<ControlPlaneClient> {
        Ok(match &self.control_plane {
            ControlPlaneConfig::File { root } => {
                ControlPlaneClient::File(FileControlPlane::new(root.clone()))
            }
            ControlPlaneConfig::Http {
                url,
                token,
                timeout_secs,
            } => ControlPlaneClient::Http(HttpControlPlane::new(
                url.clone(),
                token.clone(),
                Duration::from_secs(*timeout_secs),
            )?),
        })
    }

    /// Everything a restore needs, with `base_env` as the parent of every tool environment
    pub fn restore_context(
        &self,
        base_env: Environment,
    ) -> crate::Result<RestoreContext<ControlPlaneClient>> {
        Ok(RestoreContext {
            control_plane: self.control_plane_client()?,
            secrets: SecretStore::new(self.secrets.root.clone()),
            tools: self.tools.clone(),
            paths: self.paths.clone(),
            base_env,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn toml_file(content: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = Config::load(None).unwrap();
        assert_eq!(config.agent.port, 9990);
        assert_eq!(config.paths, RestorePaths::default());
        assert_eq!(config.tools, BarmanTools::default());
        assert_eq!(config.log.level, "info");
        assert!(matches!(config.control_plane, ControlPlaneConfig::File { .. }));
    }

    #[test]
    fn test_file_overrides_defaults() {
        let file = toml_file(
            r#"
[agent]
id = "restore-7"

[paths]
pgdata = "/data/pgdata"
wal_volume = "/data/wal"

[control_plane]
kind = "http"
url = "https://orchestrator:6443"
token = "t0ken"
timeout_secs = 5

[tools.restore]
program = "sh"
prefix_args = ["/opt/fake-restore.sh"]
"#,
        );

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.agent.id, "restore-7");
        assert_eq!(config.agent.port, 9990);
        assert_eq!(config.paths.pgdata, PathBuf::from("/data/pgdata"));
        assert_eq!(config.paths.wal_volume, Some(PathBuf::from("/data/wal")));
        assert_eq!(config.paths.scratch_dir, PathBuf::from("/controller"));
        assert_eq!(
            config.control_plane,
            ControlPlaneConfig::Http {
                url: "https://orchestrator:6443".to_string(),
                token: Some("t0ken".to_string()),
                timeout_secs: 5,
            }
        );
        assert_eq!(
            config.tools.restore.command_line(),
            vec!["sh".to_string(), "/opt/fake-restore.sh".to_string()]
        );
        assert_eq!(config.tools.wal_restore, BarmanTools::default().wal_restore);
        assert!(matches!(config.control_plane_client().unwrap(), ControlPlaneClient::Http(_)));
    }

    #[test]
    fn test_http_timeout_defaults() {
        let file = toml_file(
            r#"
[control_plane]
kind = "http"
url = "https://orchestrator:6443"
"#,
        );
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(
            config.control_plane,
            ControlPlaneConfig::Http {
                url: "https://orchestrator:6443".to_string(),
                token: None,
                timeout_secs: 30,
            }
        );
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load(Some(&dir.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn test_restore_context() {
        let config = Config::default();
        let env = Environment::empty().with("PATH", "/usr/bin");
        let ctx = config.restore_context(env.clone()).unwrap();
        assert_eq!(ctx.base_env, env);
        assert_eq!(ctx.secrets.root(), config.secrets.root.as_path());
        assert!(matches!(ctx.control_plane, ControlPlaneClient::File(_)));
    }
}
