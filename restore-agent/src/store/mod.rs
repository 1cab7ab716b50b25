//! Object store configuration.
//!
//! An `ObjectStore` document describes where a barman-cloud archive lives and
//! which credentials reach it. A restore reads up to two of them: the source
//! being recovered from and the target the new cluster archives to.

pub mod control_plane;
pub mod credentials;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectStore {
    pub metadata: ObjectStoreMeta,
    pub spec: ObjectStoreSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectStoreMeta {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectStoreSpec {
    pub configuration: StoreConfiguration,
}

/// Where and how to reach a barman-cloud archive.
///
/// The archive server name is a cluster setting (plugin `serverName`), so a
/// `serverName` key in the store document is ignored like any unknown key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfiguration {
    /// Archive root, e.g. `s3://backups/cluster-example`
    pub destination_path: String,
    #[serde(default, rename = "endpointURL")]
    pub endpoint_url: Option<String>,
    #[serde(default, rename = "endpointCA")]
    pub endpoint_ca: Option<SecretKeySelector>,
    #[serde(default, rename = "s3Credentials")]
    pub s3_credentials: Option<S3Credentials>,
    #[serde(default)]
    pub azure_credentials: Option<AzureCredentials>,
    #[serde(default)]
    pub google_credentials: Option<GoogleCredentials>,
}

/// Reference to one key of a secret
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretKeySelector {
    pub name: String,
    pub key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3Credentials {
    #[serde(default, rename = "accessKeyId")]
    pub access_key_id: Option<SecretKeySelector>,
    #[serde(default)]
    pub secret_access_key: Option<SecretKeySelector>,
    #[serde(default)]
    pub region: Option<SecretKeySelector>,
    #[serde(default)]
    pub session_token: Option<SecretKeySelector>,
    #[serde(default, rename = "inheritFromIAMRole")]
    pub inherit_from_iam_role: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureCredentials {
    #[serde(default)]
    pub connection_string: Option<SecretKeySelector>,
    #[serde(default)]
    pub storage_account: Option<SecretKeySelector>,
    #[serde(default)]
    pub storage_key: Option<SecretKeySelector>,
    #[serde(default)]
    pub storage_sas_token: Option<SecretKeySelector>,
    #[serde(default, rename = "inheritFromAzureAD")]
    pub inherit_from_azure_ad: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleCredentials {
    #[serde(default)]
    pub application_credentials: Option<SecretKeySelector>,
    /// Workload identity on GKE; no key file is handed to the tools
    #[serde(default)]
    pub gke_environment: bool,
}

impl StoreConfiguration {
    pub fn has_credentials(&self) -> bool {
        self.s3_credentials.is_some()
            || self.azure_credentials.is_some()
            || self.google_credentials.is_some()
    }

    /// Leading `--endpoint-url` option, if an endpoint override is configured
    pub fn endpoint_options(&self) -> Vec<String> {
        match self.endpoint_url.as_deref().filter(|u| !u.is_empty()) {
            Some(url) => vec!["--endpoint-url".to_string(), url.to_string()],
            None => Vec::new(),
        }
    }

    /// Provider selection options understood by every barman-cloud tool
    pub fn provider_options(&self) -> Vec<String> {
        let mut options = Vec::new();

        if self.s3_credentials.is_some() {
            options.extend(["--cloud-provider".to_string(), "aws-s3".to_string()]);
        } else if let Some(azure) = &self.azure_credentials {
            options.extend(["--cloud-provider".to_string(), "azure-blob-storage".to_string()]);
            if azure.inherit_from_azure_ad {
                options.extend(["--credential".to_string(), "managed-identity".to_string()]);
            }
        } else if self.google_credentials.is_some() {
            options.extend(["--cloud-provider".to_string(), "google-cloud-storage".to_string()]);
        }

        options
    }
}
