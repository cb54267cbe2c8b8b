//! Caller-facing job description.
//!
//! The job controller owns the job object; the gang reconciler only sees this
//! read-only view of its identity plus the replica specs for one pass.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{ObjectReference, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Identity of the job being gang scheduled.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct JobMeta {
    pub name: String,
    pub namespace: Option<String>,
    pub uid: String,
    pub api_version: String,
    pub kind: String,
    pub scheduling_policy: Option<SchedulingPolicy>,
}

impl JobMeta {
    /// Controller owner reference, so the gang resource is garbage collected with the job.
    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            name: self.name.clone(),
            uid: self.uid.clone(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    /// Reference used to attach events to the job.
    pub fn object_reference(&self) -> ObjectReference {
        ObjectReference {
            api_version: Some(self.api_version.clone()),
            kind: Some(self.kind.clone()),
            name: Some(self.name.clone()),
            namespace: self.namespace.clone(),
            uid: Some(self.uid.clone()),
            ..Default::default()
        }
    }
}

/// Job-level gang scheduling overrides.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SchedulingPolicy {
    /// Replaces the summed replica count as the gang minimum.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_available: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_class: Option<String>,
    /// Replaces the aggregated pod requests as the gang minimum resources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_resources: Option<BTreeMap<String, Quantity>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_timeout_seconds: Option<i32>,
}

/// One replica role of a job for a single reconcile pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReplicaSpec {
    pub role: String,
    pub replicas: i32,
    pub template: PodTemplateSpec,
}

impl ReplicaSpec {
    pub fn new(role: impl Into<String>, replicas: i32, template: PodTemplateSpec) -> Self {
        Self {
            role: role.into(),
            replicas,
            template,
        }
    }
}
