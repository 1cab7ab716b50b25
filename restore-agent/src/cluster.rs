//! Cluster descriptor as handed over by the operator.
//!
//! Only the fields the restore hook consumes are modelled; everything else in
//! the document is ignored by serde.

use crate::{RestoreError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// API version accepted for cluster descriptors
pub const CLUSTER_API_VERSION: &str = "postgresql.cnpg.io/v1";

/// Kind accepted for cluster descriptors
pub const CLUSTER_KIND: &str = "Cluster";

/// Name under which this plugin is referenced by clusters
pub const PLUGIN_NAME: &str = "barman-cloud.cloudnative-pg.io";

/// Annotation opting a cluster into the empty WAL archive check
pub const CHECK_EMPTY_WAL_ARCHIVE_ANNOTATION: &str = "cnpg.io/checkEmptyWalArchive";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterDescriptor {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ClusterSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    #[serde(default)]
    pub bootstrap: Option<BootstrapConfiguration>,
    #[serde(default)]
    pub external_clusters: Vec<ExternalCluster>,
    #[serde(default)]
    pub plugins: Vec<PluginConfiguration>,
    #[serde(default)]
    pub wal_storage: Option<StorageConfiguration>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapConfiguration {
    #[serde(default)]
    pub recovery: Option<BootstrapRecovery>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapRecovery {
    /// Name of the external cluster to recover from
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub recovery_target: Option<RecoveryTargetSpec>,
}

/// Recovery target exactly as written in the cluster definition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryTargetSpec {
    #[serde(default, rename = "backupID")]
    pub backup_id: Option<String>,
    #[serde(default, rename = "targetTLI")]
    pub target_tli: Option<String>,
    #[serde(default, rename = "targetXID")]
    pub target_xid: Option<String>,
    #[serde(default)]
    pub target_name: Option<String>,
    #[serde(default, rename = "targetLSN")]
    pub target_lsn: Option<String>,
    #[serde(default)]
    pub target_time: Option<String>,
    #[serde(default)]
    pub target_immediate: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalCluster {
    pub name: String,
    #[serde(default)]
    pub plugin: Option<PluginConfiguration>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginConfiguration {
    pub name: String,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl PluginConfiguration {
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfiguration {
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub storage_class: Option<String>,
}

/// Typed view of the plugin parameters map.
///
/// Recognized keys are `barmanObjectName` and `serverName`. Unknown keys are
/// ignored with a warning so newer operators can add parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginParameters {
    pub barman_object_name: Option<String>,
    pub server_name: Option<String>,
}

impl PluginParameters {
    pub const BARMAN_OBJECT_NAME: &'static str = "barmanObjectName";
    pub const SERVER_NAME: &'static str = "serverName";

    pub fn parse(raw: &BTreeMap<String, String>) -> Result<Self> {
        let mut params = PluginParameters::default();

        for (key, value) in raw {
            let slot = match key.as_str() {
                Self::BARMAN_OBJECT_NAME => &mut params.barman_object_name,
                Self::SERVER_NAME => &mut params.server_name,
                unknown => {
                    warn!("Ignoring unknown plugin parameter: {}", unknown);
                    continue;
                }
            };

            if value.trim().is_empty() {
                return Err(RestoreError::Config(format!(
                    "plugin parameter {} must not be empty",
                    key
                )));
            }
            *slot = Some(value.clone());
        }

        Ok(params)
    }

    /// The object store name, required wherever the plugin is referenced
    pub fn require_object_name(&self, context: &str) -> Result<&str> {
        self.barman_object_name.as_deref().ok_or_else(|| {
            RestoreError::Config(format!(
                "missing {} parameter in {}",
                Self::BARMAN_OBJECT_NAME,
                context
            ))
        })
    }
}

/// External cluster chosen as recovery source, with its parsed parameters
#[derive(Debug, Clone)]
pub struct RecoverySource {
    pub name: String,
    pub server_name: String,
    pub object_store: String,
}

/// Decode a cluster descriptor, rejecting unexpected API versions or kinds
pub fn decode_cluster(value: serde_json::Value) -> Result<ClusterDescriptor> {
    let cluster: ClusterDescriptor = serde_json::from_value(value)
        .map_err(|e| RestoreError::Config(format!("invalid cluster definition: {}", e)))?;

    if cluster.api_version != CLUSTER_API_VERSION || cluster.kind != CLUSTER_KIND {
        return Err(RestoreError::Config(format!(
            "unsupported object {}/{}, expected {}/{}",
            cluster.api_version, cluster.kind, CLUSTER_API_VERSION, CLUSTER_KIND
        )));
    }
    if cluster.metadata.name.is_empty() {
        return Err(RestoreError::Config("cluster has no name".to_string()));
    }

    Ok(cluster)
}

impl ClusterDescriptor {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    pub fn recovery(&self) -> Option<&BootstrapRecovery> {
        self.spec.bootstrap.as_ref()?.recovery.as_ref()
    }

    pub fn external_cluster(&self, name: &str) -> Option<&ExternalCluster> {
        self.spec.external_clusters.iter().find(|c| c.name == name)
    }

    /// This plugin's entry in `spec.plugins`, if enabled. The last matching
    /// entry wins.
    pub fn own_plugin(&self) -> Option<&PluginConfiguration> {
        self.spec
            .plugins
            .iter()
            .rev()
            .find(|p| p.is_enabled() && p.name == PLUGIN_NAME)
    }

    /// Parameters of this plugin's entry, empty when the plugin is not enabled
    pub fn own_plugin_parameters(&self) -> Result<PluginParameters> {
        match self.own_plugin() {
            Some(plugin) => PluginParameters::parse(&plugin.parameters),
            None => Ok(PluginParameters::default()),
        }
    }

    /// Server identity this cluster archives under
    pub fn archive_server_name(&self) -> Result<String> {
        Ok(self
            .own_plugin_parameters()?
            .server_name
            .unwrap_or_else(|| self.name().to_string()))
    }

    pub fn empty_wal_archive_check_enabled(&self) -> bool {
        self.metadata
            .annotations
            .get(CHECK_EMPTY_WAL_ARCHIVE_ANNOTATION)
            .is_some_and(|v| v == "enabled")
    }

    pub fn has_wal_storage(&self) -> bool {
        self.spec.wal_storage.is_some()
    }

    /// Resolve the external cluster named as recovery source.
    ///
    /// This runs before any catalog is consulted: a missing source is a
    /// configuration error, an unknown one is not found.
    pub fn recovery_source(&self) -> Result<RecoverySource> {
        let source_name = self
            .recovery()
            .map(|r| r.source.as_str())
            .unwrap_or_default();

        if source_name.is_empty() {
            return Err(RestoreError::Config("recovery source not specified".to_string()));
        }

        let server = self.external_cluster(source_name).ok_or_else(|| {
            RestoreError::NotFound(format!("missing external cluster: {}", source_name))
        })?;

        let plugin = server.plugin.as_ref().ok_or_else(|| {
            RestoreError::Config(format!(
                "external cluster {} has no plugin configuration",
                source_name
            ))
        })?;
        let params = PluginParameters::parse(&plugin.parameters)?;
        let object_store = params
            .require_object_name(&format!("external cluster {}", source_name))?
            .to_string();

        Ok(RecoverySource {
            name: source_name.to_string(),
            server_name: params.server_name.unwrap_or_else(|| server.name.clone()),
            object_store,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn cluster_json() -> serde_json::Value {
        json!({
            "apiVersion": "postgresql.cnpg.io/v1",
            "kind": "Cluster",
            "metadata": {
                "name": "cluster-restore",
                "namespace": "default",
            },
            "spec": {
                "bootstrap": {
                    "recovery": { "source": "origin" }
                },
                "externalClusters": [{
                    "name": "origin",
                    "plugin": {
                        "name": PLUGIN_NAME,
                        "parameters": { "barmanObjectName": "source-store", "serverName": "cluster-example" }
                    }
                }],
                "plugins": [{
                    "name": PLUGIN_NAME,
                    "parameters": { "barmanObjectName": "target-store" }
                }]
            }
        })
    }

    #[test]
    fn test_decode_cluster() {
        let cluster = decode_cluster(cluster_json()).unwrap();
        assert_eq!(cluster.name(), "cluster-restore");
        assert_eq!(cluster.namespace(), "default");
        assert!(!cluster.has_wal_storage());
        assert!(!cluster.empty_wal_archive_check_enabled());
    }

    #[test]
    fn test_decode_rejects_other_kinds() {
        let mut value = cluster_json();
        value["kind"] = json!("Backup");
        assert!(matches!(decode_cluster(value), Err(RestoreError::Config(_))));

        let mut value = cluster_json();
        value["apiVersion"] = json!("postgresql.cnpg.io/v2");
        assert!(matches!(decode_cluster(value), Err(RestoreError::Config(_))));
    }

    #[test]
    fn test_recovery_source_resolution() {
        let cluster = decode_cluster(cluster_json()).unwrap();
        let source = cluster.recovery_source().unwrap();
        assert_eq!(source.name, "origin");
        assert_eq!(source.server_name, "cluster-example");
        assert_eq!(source.object_store, "source-store");
    }

    #[test]
    fn test_recovery_source_defaults_server_name() {
        let mut value = cluster_json();
        value["spec"]["externalClusters"][0]["plugin"]["parameters"] =
            json!({ "barmanObjectName": "source-store" });
        let cluster = decode_cluster(value).unwrap();
        assert_eq!(cluster.recovery_source().unwrap().server_name, "origin");
    }

    #[test]
    fn test_missing_recovery_source() {
        let mut value = cluster_json();
        value["spec"]["bootstrap"]["recovery"]["source"] = json!("");
        let cluster = decode_cluster(value).unwrap();
        match cluster.recovery_source() {
            Err(RestoreError::Config(msg)) => assert_eq!(msg, "recovery source not specified"),
            other => panic!("unexpected result: {:?}", other),
        }

        let mut value = cluster_json();
        value["spec"]["bootstrap"] = json!({});
        let cluster = decode_cluster(value).unwrap();
        assert!(matches!(cluster.recovery_source(), Err(RestoreError::Config(_))));
    }

    #[test]
    fn test_unknown_external_cluster() {
        let mut value = cluster_json();
        value["spec"]["bootstrap"]["recovery"]["source"] = json!("elsewhere");
        let cluster = decode_cluster(value).unwrap();
        assert!(matches!(cluster.recovery_source(), Err(RestoreError::NotFound(_))));
    }

    #[test]
    fn test_plugin_parameters() {
        let mut raw = BTreeMap::new();
        raw.insert("barmanObjectName".to_string(), "store".to_string());
        raw.insert("futureKnob".to_string(), "on".to_string());
        let params = PluginParameters::parse(&raw).unwrap();
        assert_eq!(params.barman_object_name.as_deref(), Some("store"));
        assert_eq!(params.server_name, None);

        raw.insert("serverName".to_string(), "  ".to_string());
        assert!(matches!(PluginParameters::parse(&raw), Err(RestoreError::Config(_))));

        let empty = PluginParameters::parse(&BTreeMap::new()).unwrap();
        assert!(empty.require_object_name("test").is_err());
    }

    #[test]
    fn test_archive_server_name() {
        let cluster = decode_cluster(cluster_json()).unwrap();
        assert_eq!(cluster.archive_server_name().unwrap(), "cluster-restore");

        let mut value = cluster_json();
        value["spec"]["plugins"][0]["parameters"]["serverName"] = json!("renamed");
        let cluster = decode_cluster(value).unwrap();
        assert_eq!(cluster.archive_server_name().unwrap(), "renamed");

        let mut value = cluster_json();
        value["spec"]["plugins"][0]["enabled"] = json!(false);
        value["spec"]["plugins"][0]["parameters"]["serverName"] = json!("renamed");
        let cluster = decode_cluster(value).unwrap();
        assert!(cluster.own_plugin().is_none());
        assert_eq!(cluster.archive_server_name().unwrap(), "cluster-restore");
    }

    #[test]
    fn test_check_annotation_is_opt_in() {
        let mut value = cluster_json();
        value["metadata"]["annotations"] =
            json!({ CHECK_EMPTY_WAL_ARCHIVE_ANNOTATION: "enabled" });
        assert!(decode_cluster(value).unwrap().empty_wal_archive_check_enabled());

        let mut value = cluster_json();
        value["metadata"]["annotations"] =
            json!({ CHECK_EMPTY_WAL_ARCHIVE_ANNOTATION: "disabled" });
        assert!(!decode_cluster(value).unwrap().empty_wal_archive_check_enabled());
    }
}
