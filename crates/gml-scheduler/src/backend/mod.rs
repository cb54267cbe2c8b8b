//! Gang scheduling backends.
//!
//! Each backend knows the name of the external scheduler binary, how that
//! scheduler correlates pods with a gang, and how to express the gang as its
//! own PodGroup-like custom resource. The decoration policy itself lives in
//! [`crate::decorate`] and is shared by every backend.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use k8s_openapi::api::core::v1::PodTemplateSpec;
use kube::api::{ApiResource, DynamicObject, ObjectMeta};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::GangError;
use crate::job::JobMeta;
use crate::model::{GangGroupModel, MinMemberPolicy};

mod koordinator;
mod scheduler_framework;
mod volcano;
mod yunikorn;

pub use koordinator::{KOORD_SCHEDULER_NAME, Koordinator};
pub use scheduler_framework::{
    POD_GROUP_LABEL, SCHEDULER_PLUGINS_SCHEDULER_NAME, SchedulerFramework,
};
pub use volcano::{
    VOLCANO_DEFAULT_QUEUE, VOLCANO_GROUP_ANNOTATION, VOLCANO_SCHEDULER_NAME, Volcano,
};
pub use yunikorn::{YUNIKORN_APP_LABEL, YUNIKORN_SCHEDULER_NAME, YuniKorn};

pub mod crd {
    //! Typed gang resources for each backend.
    pub use super::scheduler_framework::{
        PodGroup as SchedulerPluginsPodGroup, PodGroupSpec as SchedulerPluginsPodGroupSpec,
        PodGroupStatus as SchedulerPluginsPodGroupStatus,
    };
    pub use super::volcano::{
        PodGroup as VolcanoPodGroup, PodGroupSpec as VolcanoPodGroupSpec,
        PodGroupStatus as VolcanoPodGroupStatus,
    };
}

/// Label carrying the job name on every gang resource.
pub const JOB_NAME_LABEL: &str = "gml.gerardosalazar.com/job-name";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY: &str = "gml-operator";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    SchedulerPlugins,
    Koordinator,
    Volcano,
    YuniKorn,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::SchedulerPlugins => "scheduler-plugins",
            BackendKind::Koordinator => "koordinator",
            BackendKind::Volcano => "volcano",
            BackendKind::YuniKorn => "yunikorn",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = GangError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scheduler-plugins" | "scheduler-framework" => Ok(BackendKind::SchedulerPlugins),
            "koordinator" => Ok(BackendKind::Koordinator),
            "volcano" => Ok(BackendKind::Volcano),
            "yunikorn" => Ok(BackendKind::YuniKorn),
            _ => Err(GangError::UnknownBackend(s.to_string())),
        }
    }
}

/// Where a backend expects the gang name on a pod.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupKey {
    Label(&'static str),
    Annotation(&'static str),
}

pub trait GangBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Value stamped into `spec.schedulerName` of decorated pods.
    fn gang_scheduler_name(&self) -> &str;

    fn group_key(&self) -> GroupKey;

    fn min_member_policy(&self) -> &MinMemberPolicy;

    /// API of the gang resource, `None` when the backend has no such resource.
    fn gang_resource_api(&self) -> Option<ApiResource>;

    /// Map the model into the backend's gang resource. Makes no client calls.
    fn build_gang_resource(
        &self,
        model: &GangGroupModel,
        job: &JobMeta,
    ) -> Result<Option<DynamicObject>, GangError>;

    /// Spec keys this backend writes. A key missing from the desired spec is
    /// removed from the live object on update.
    fn owned_spec_keys(&self) -> &'static [&'static str] {
        &[]
    }

    /// Whether the observed gang resource reports the gang as admitted.
    fn is_gang_resource_ready(&self, observed: &DynamicObject) -> bool;

    /// Extra backend metadata on a template, applied after the shared policy.
    fn decorate_backend_specific(
        &self,
        _role: &str,
        _template: &mut PodTemplateSpec,
        _model: &GangGroupModel,
    ) {
    }
}

/// Metadata shared by every gang resource: deterministic name, job labels, owner reference.
pub(crate) fn gang_metadata(job: &JobMeta) -> Result<ObjectMeta, GangError> {
    let namespace = job
        .namespace
        .clone()
        .filter(|ns| !ns.is_empty())
        .ok_or(GangError::MissingNamespace)?;

    Ok(ObjectMeta {
        name: Some(job.name.clone()),
        namespace: Some(namespace),
        labels: Some(BTreeMap::from([
            (JOB_NAME_LABEL.to_string(), job.name.clone()),
            (MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string()),
        ])),
        owner_references: Some(vec![job.owner_reference()]),
        ..Default::default()
    })
}

pub(crate) fn to_dynamic<K: Serialize>(resource: &K) -> Result<DynamicObject, GangError> {
    let value = serde_json::to_value(resource)?;
    Ok(serde_json::from_value(value)?)
}

pub(crate) fn observed_status<S: DeserializeOwned>(observed: &DynamicObject) -> Option<S> {
    let status = observed.data.get("status")?.clone();
    serde_json::from_value(status).ok()
}

pub(crate) fn observed_min_member(observed: &DynamicObject) -> Option<i64> {
    observed.data.get("spec")?.get("minMember")?.as_i64()
}
