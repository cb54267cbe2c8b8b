use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::CustomResource;
use kube::api::{ApiResource, DynamicObject};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{
    BackendKind, GangBackend, GroupKey, gang_metadata, observed_min_member, observed_status,
    to_dynamic,
};
use crate::error::GangError;
use crate::job::JobMeta;
use crate::model::{GangGroupModel, MinMemberPolicy};

pub const SCHEDULER_PLUGINS_SCHEDULER_NAME: &str = "scheduler-plugins-scheduler";
/// Label the coscheduling plugin reads to find a pod's PodGroup.
pub const POD_GROUP_LABEL: &str = "pod-group.scheduling.sigs.k8s.io/name";

/// PodGroup of the scheduler-plugins coscheduling plugin, also served by koordinator.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "scheduling.sigs.k8s.io",
    version = "v1alpha1",
    kind = "PodGroup",
    namespaced,
    status = "PodGroupStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct PodGroupSpec {
    pub min_member: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_resources: Option<BTreeMap<String, Quantity>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_timeout_seconds: Option<i32>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PodGroupStatus {
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default)]
    pub occupied_by: Option<String>,
    #[serde(default)]
    pub scheduled: Option<i32>,
    #[serde(default)]
    pub running: Option<i32>,
    #[serde(default)]
    pub succeeded: Option<i32>,
    #[serde(default)]
    pub failed: Option<i32>,
}

/// Backend for schedulers built on the Kubernetes scheduling framework that
/// share the scheduler-plugins PodGroup CRD.
#[derive(Clone, Debug)]
pub struct SchedulerFramework {
    scheduler_name: String,
    policy: MinMemberPolicy,
}

impl SchedulerFramework {
    pub fn new(policy: MinMemberPolicy) -> Self {
        Self::with_scheduler_name(SCHEDULER_PLUGINS_SCHEDULER_NAME, policy)
    }

    /// scheduler-plugins is often deployed as a second scheduler under a custom name.
    pub fn with_scheduler_name(scheduler_name: impl Into<String>, policy: MinMemberPolicy) -> Self {
        Self {
            scheduler_name: scheduler_name.into(),
            policy,
        }
    }

    pub(crate) fn pod_group(&self, model: &GangGroupModel, job: &JobMeta) -> Result<PodGroup, GangError> {
        let spec = PodGroupSpec {
            min_member: i32::try_from(model.min_member).unwrap_or(i32::MAX),
            min_resources: (!model.min_resources.is_empty()).then(|| model.min_resources.clone()),
            schedule_timeout_seconds: model.schedule_timeout_seconds,
        };
        Ok(PodGroup {
            metadata: gang_metadata(job)?,
            spec,
            status: None,
        })
    }
}

impl GangBackend for SchedulerFramework {
    fn kind(&self) -> BackendKind {
        BackendKind::SchedulerPlugins
    }

    fn gang_scheduler_name(&self) -> &str {
        &self.scheduler_name
    }

    fn group_key(&self) -> GroupKey {
        GroupKey::Label(POD_GROUP_LABEL)
    }

    fn min_member_policy(&self) -> &MinMemberPolicy {
        &self.policy
    }

    fn gang_resource_api(&self) -> Option<ApiResource> {
        Some(ApiResource::erase::<PodGroup>(&()))
    }

    fn build_gang_resource(
        &self,
        model: &GangGroupModel,
        job: &JobMeta,
    ) -> Result<Option<DynamicObject>, GangError> {
        let pod_group = self.pod_group(model, job)?;
        Ok(Some(to_dynamic(&pod_group)?))
    }

    fn owned_spec_keys(&self) -> &'static [&'static str] {
        &["minMember", "minResources", "scheduleTimeoutSeconds"]
    }

    fn is_gang_resource_ready(&self, observed: &DynamicObject) -> bool {
        let Some(status) = observed_status::<PodGroupStatus>(observed) else {
            return false;
        };
        if matches!(status.phase.as_deref(), Some("Scheduled" | "Running" | "Finished")) {
            return true;
        }
        match (observed_min_member(observed), status.scheduled) {
            (Some(min_member), Some(scheduled)) => min_member > 0 && i64::from(scheduled) >= min_member,
            _ => false,
        }
    }
}
