//! Credential resolution into child-process environments.
//!
//! Secrets are read from files laid out as `<root>/<namespace>/<secret>/<key>`,
//! the shape of a mounted secret volume. The result is an immutable
//! [`Environment`] that is handed to each barman-cloud process explicitly; the
//! agent never writes to its own process environment.

use super::{SecretKeySelector, StoreConfiguration};
use crate::{RestoreError, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Immutable set of environment variables for a child process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: BTreeMap<String, String>,
}

impl Environment {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Snapshot of the agent's own environment, taken once at startup
    pub fn from_process() -> Self {
        std::env::vars().collect()
    }

    /// A copy of this environment with one more variable
    pub fn with(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut vars = self.vars.clone();
        vars.insert(key.into(), value.into());
        Self { vars }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// `KEY=VALUE` strings, the form the operator expects in the response
    pub fn to_env_list(&self) -> Vec<String> {
        self.vars.iter().map(|(k, v)| format!("{}={}", k, v)).collect()
    }
}

impl FromIterator<(String, String)> for Environment {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            vars: iter.into_iter().collect(),
        }
    }
}

/// Reads secret values from a mounted secrets directory
#[derive(Debug, Clone)]
pub struct SecretStore {
    root: PathBuf,
}

impl SecretStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the file holding one secret key
    pub fn path_of(&self, namespace: &str, selector: &SecretKeySelector) -> PathBuf {
        self.root.join(namespace).join(&selector.name).join(&selector.key)
    }

    pub fn read(&self, namespace: &str, selector: &SecretKeySelector) -> Result<String> {
        let path = self.path_of(namespace, selector);
        match std::fs::read_to_string(&path) {
            Ok(value) => Ok(value.trim_end_matches(['\r', '\n']).to_string()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(RestoreError::NotFound(
                format!("secret key {}/{} in namespace {}", selector.name, selector.key, namespace),
            )),
            Err(e) => Err(RestoreError::fs(path, e)),
        }
    }

    /// Layer the credentials of `store` on top of `base`.
    ///
    /// Returns `None` when the store has no credentials configured at all.
    pub fn resolve(
        &self,
        namespace: &str,
        store: &StoreConfiguration,
        base: &Environment,
    ) -> Result<Option<Environment>> {
        if !store.has_credentials() {
            return Ok(None);
        }

        let mut env = base.clone();

        if let Some(s3) = &store.s3_credentials {
            if !s3.inherit_from_iam_role {
                env = self.with_secret(env, namespace, "AWS_ACCESS_KEY_ID", &s3.access_key_id)?;
                env = self.with_secret(env, namespace, "AWS_SECRET_ACCESS_KEY", &s3.secret_access_key)?;
            }
            env = self.with_secret(env, namespace, "AWS_DEFAULT_REGION", &s3.region)?;
            env = self.with_secret(env, namespace, "AWS_SESSION_TOKEN", &s3.session_token)?;
        } else if let Some(azure) = &store.azure_credentials {
            if !azure.inherit_from_azure_ad {
                env = self.with_secret(env, namespace, "AZURE_STORAGE_CONNECTION_STRING", &azure.connection_string)?;
                env = self.with_secret(env, namespace, "AZURE_STORAGE_ACCOUNT", &azure.storage_account)?;
                env = self.with_secret(env, namespace, "AZURE_STORAGE_KEY", &azure.storage_key)?;
                env = self.with_secret(env, namespace, "AZURE_STORAGE_SAS_TOKEN", &azure.storage_sas_token)?;
            }
        } else if let Some(google) = &store.google_credentials {
            if let Some(selector) = google.application_credentials.as_ref().filter(|_| !google.gke_environment) {
                env = self.with_secret_path(env, namespace, "GOOGLE_APPLICATION_CREDENTIALS", selector)?;
            }
        }

        if let Some(ca) = &store.endpoint_ca {
            env = self.with_secret_path(env, namespace, "AWS_CA_BUNDLE", ca)?;
            env = self.with_secret_path(env, namespace, "REQUESTS_CA_BUNDLE", ca)?;
        }

        Ok(Some(env))
    }

    fn with_secret(
        &self,
        env: Environment,
        namespace: &str,
        var: &str,
        selector: &Option<SecretKeySelector>,
    ) -> Result<Environment> {
        match selector {
            Some(selector) => Ok(env.with(var, self.read(namespace, selector)?)),
            None => Ok(env),
        }
    }

    /// Tools that want a file (CA bundles, service account keys) get the
    /// path of the mounted secret instead of its value.
    fn with_secret_path(
        &self,
        env: Environment,
        namespace: &str,
        var: &str,
        selector: &SecretKeySelector,
    ) -> Result<Environment> {
        let path = self.path_of(namespace, selector);
        if !path.is_file() {
            return Err(RestoreError::NotFound(format!(
                "secret key {}/{} in namespace {}",
                selector.name, selector.key, namespace
            )));
        }
        Ok(env.with(var, path.to_string_lossy()))
    }
}
