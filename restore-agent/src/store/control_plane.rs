//! Lookup of `ObjectStore` documents.
//!
//! The file backend reads `<root>/<namespace>/<name>.toml`; the HTTP backend
//! talks to an API server exposing the `barmancloud.cnpg.io/v1` group.

use super::ObjectStore;
use crate::{RestoreError, Result};
use reqwest::StatusCode;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const OBJECT_STORE_GROUP_VERSION: &str = "barmancloud.cnpg.io/v1";

/// Upper bound on one object store request, connection included
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Read access to object store configuration
pub trait ControlPlane: Send + Sync {
    fn get_object_store(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl std::future::Future<Output = Result<ObjectStore>> + Send;
}

/// Object stores kept as TOML files on a mounted volume
#[derive(Debug, Clone)]
pub struct FileControlPlane {
    root: PathBuf,
}

impl FileControlPlane {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn document_path(&self, namespace: &str, name: &str) -> PathBuf {
        self.root.join(namespace).join(format!("{}.toml", name))
    }
}

impl ControlPlane for FileControlPlane {
    async fn get_object_store(&self, namespace: &str, name: &str) -> Result<ObjectStore> {
        let path = self.document_path(namespace, name);
        debug!("Reading object store {}/{} from {}", namespace, name, path.display());

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RestoreError::NotFound(format!(
                    "object store {}/{}",
                    namespace, name
                )));
            }
            Err(e) => return Err(RestoreError::fs(path, e)),
        };

        toml::from_str(&content).map_err(|e| {
            RestoreError::ControlPlane(format!(
                "invalid object store document {}: {}",
                path.display(),
                e
            ))
        })
    }
}

/// Object stores served by an API server
#[derive(Debug, Clone)]
pub struct HttpControlPlane {
    url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpControlPlane {
    pub fn new(url: impl Into<String>, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;

        Ok(Self {
            url: url.into().trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
            client,
        })
    }

    fn object_store_url(&self, namespace: &str, name: &str) -> String {
        format!(
            "{}/apis/{}/namespaces/{}/objectstores/{}",
            self.url, OBJECT_STORE_GROUP_VERSION, namespace, name
        )
    }
}

/// Error body returned by the API server on failures
#[derive(Debug, Deserialize)]
struct StatusBody {
    #[serde(default)]
    message: String,
}

impl ControlPlane for HttpControlPlane {
    async fn get_object_store(&self, namespace: &str, name: &str) -> Result<ObjectStore> {
        let url = self.object_store_url(namespace, name);
        debug!("Fetching object store {}/{} from {}", namespace, name, url);

        let mut request = self.client.get(&url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(RestoreError::NotFound(format!(
                "object store {}/{}",
                namespace, name
            )));
        }
        if !status.is_success() {
            let message = response
                .json::<StatusBody>()
                .await
                .map(|body| body.message)
                .unwrap_or_default();
            return Err(RestoreError::ControlPlane(format!(
                "HTTP {} while reading object store {}/{}: {}",
                status, namespace, name, message
            )));
        }

        Ok(response.json::<ObjectStore>().await?)
    }
}

/// The backend selected by configuration
#[derive(Debug, Clone)]
pub enum ControlPlaneClient {
    File(FileControlPlane),
    Http(HttpControlPlane),
}

impl ControlPlane for ControlPlaneClient {
    async fn get_object_store(&self, namespace: &str, name: &str) -> Result<ObjectStore> {
        match self {
            ControlPlaneClient::File(backend) => backend.get_object_store(namespace, name).await,
            ControlPlaneClient::Http(backend) => backend.get_object_store(namespace, name).await,
        }
    }
}
