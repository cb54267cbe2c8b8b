use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::CustomResource;
use kube::api::{ApiResource, DynamicObject};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{BackendKind, GangBackend, GroupKey, gang_metadata, observed_status, to_dynamic};
use crate::error::GangError;
use crate::job::JobMeta;
use crate::model::{GangGroupModel, MinMemberPolicy};

pub const VOLCANO_SCHEDULER_NAME: &str = "volcano";
/// Volcano correlates pods through an annotation rather than a label.
pub const VOLCANO_GROUP_ANNOTATION: &str = "scheduling.k8s.io/group-name";
/// Queue volcano's admission webhook assigns when none is set.
pub const VOLCANO_DEFAULT_QUEUE: &str = "default";

/// Volcano PodGroup (`scheduling.volcano.sh/v1beta1`)
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "scheduling.volcano.sh",
    version = "v1beta1",
    kind = "PodGroup",
    namespaced,
    status = "PodGroupStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct PodGroupSpec {
    pub min_member: i32,
    /// Per-task minimum, keyed by replica role.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_task_member: Option<BTreeMap<String, i32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_resources: Option<BTreeMap<String, Quantity>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_class_name: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PodGroupStatus {
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default)]
    pub running: Option<i32>,
    #[serde(default)]
    pub succeeded: Option<i32>,
    #[serde(default)]
    pub failed: Option<i32>,
}

#[derive(Clone, Debug)]
pub struct Volcano {
    policy: MinMemberPolicy,
}

impl Volcano {
    pub fn new(policy: MinMemberPolicy) -> Self {
        Self { policy }
    }
}

impl GangBackend for Volcano {
    fn kind(&self) -> BackendKind {
        BackendKind::Volcano
    }

    fn gang_scheduler_name(&self) -> &str {
        VOLCANO_SCHEDULER_NAME
    }

    fn group_key(&self) -> GroupKey {
        GroupKey::Annotation(VOLCANO_GROUP_ANNOTATION)
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
        // Keys are lowercased roles. They stay unique because the reconciler
        // rejects roles that differ only by case. A narrowed minMember drops
        // the per-task minimum, which would otherwise demand every replica.
        let narrowed = model.min_member < model.total_replicas();
        let min_task_member: BTreeMap<String, i32> = model
            .roles
            .iter()
            .filter(|(_, role)| !narrowed && role.replicas > 0)
            .map(|(name, role)| {
                (
                    name.to_ascii_lowercase(),
                    i32::try_from(role.replicas).unwrap_or(i32::MAX),
                )
            })
            .collect();

        let pod_group = PodGroup {
            metadata: gang_metadata(job)?,
            spec: PodGroupSpec {
                min_member: i32::try_from(model.min_member).unwrap_or(i32::MAX),
                min_task_member: (!min_task_member.is_empty()).then_some(min_task_member),
                min_resources: (!model.min_resources.is_empty())
                    .then(|| model.min_resources.clone()),
                queue: Some(
                    model
                        .queue
                        .clone()
                        .unwrap_or_else(|| VOLCANO_DEFAULT_QUEUE.to_string()),
                ),
                priority_class_name: model.priority_class.clone(),
            },
            status: None,
        };
        Ok(Some(to_dynamic(&pod_group)?))
    }

    fn owned_spec_keys(&self) -> &'static [&'static str] {
        &[
            "minMember",
            "minTaskMember",
            "minResources",
            "queue",
            "priorityClassName",
        ]
    }

    fn is_gang_resource_ready(&self, observed: &DynamicObject) -> bool {
        observed_status::<PodGroupStatus>(observed)
            .and_then(|s| s.phase)
            .is_some_and(|phase| matches!(phase.as_str(), "Inqueue" | "Running" | "Completed"))
    }
}
