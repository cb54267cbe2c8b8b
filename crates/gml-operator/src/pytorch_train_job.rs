use std::collections::BTreeMap;

use gml_scheduler::SchedulingPolicy;
use k8s_openapi::api::core::v1::PodTemplateSpec;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "gml.gerardosalazar.com",
    version = "v1",
    kind = "PyTorchTrainJob",
    namespaced,
    status = "PyTorchTrainJobStatus",
    shortname = "ptj"
)]
#[serde(rename_all = "camelCase")]
pub struct PyTorchTrainJobSpec {
    /// Image for containers whose template leaves it empty.
    pub image: String,
    /// Replica roles keyed by name, e.g. Master and Worker.
    pub replica_specs: BTreeMap<String, ReplicaTemplate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduling_policy: Option<SchedulingPolicy>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
pub struct ReplicaTemplate {
    pub replicas: i32,
    #[serde(default)]
    pub template: PodTemplateSpec,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PyTorchTrainJobStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gang_state: Option<String>,
    #[serde(default)]
    pub gang_ready: bool,
    #[serde(default)]
    pub min_member: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
