use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::PodTemplateSpec;
use kube::api::{ApiResource, DynamicObject};
use serde_json::json;

use super::{BackendKind, GangBackend, GroupKey};
use crate::error::GangError;
use crate::job::JobMeta;
use crate::model::{GangGroupModel, MinMemberPolicy};

pub const YUNIKORN_SCHEDULER_NAME: &str = "yunikorn";
pub const YUNIKORN_APP_LABEL: &str = "applicationId";
const TASK_GROUP_NAME_ANNOTATION: &str = "yunikorn.apache.org/task-group-name";
const TASK_GROUPS_ANNOTATION: &str = "yunikorn.apache.org/task-groups";
const SCHEDULING_POLICY_ANNOTATION: &str = "yunikorn.apache.org/schedulingPolicyParameters";

/// Apache YuniKorn has no gang resource; the gang is declared through task
/// group annotations on the pods and YuniKorn reserves it with placeholders.
#[derive(Clone, Debug)]
pub struct YuniKorn {
    policy: MinMemberPolicy,
}

impl YuniKorn {
    pub fn new(policy: MinMemberPolicy) -> Self {
        Self { policy }
    }
}

impl GangBackend for YuniKorn {
    fn kind(&self) -> BackendKind {
        BackendKind::YuniKorn
    }

    fn gang_scheduler_name(&self) -> &str {
        YUNIKORN_SCHEDULER_NAME
    }

    fn group_key(&self) -> GroupKey {
        GroupKey::Label(YUNIKORN_APP_LABEL)
    }

    fn min_member_policy(&self) -> &MinMemberPolicy {
        &self.policy
    }

    fn gang_resource_api(&self) -> Option<ApiResource> {
        None
    }

    fn build_gang_resource(
        &self,
        _model: &GangGroupModel,
        _job: &JobMeta,
    ) -> Result<Option<DynamicObject>, GangError> {
        Ok(None)
    }

    fn is_gang_resource_ready(&self, _observed: &DynamicObject) -> bool {
        true
    }

    fn decorate_backend_specific(
        &self,
        role: &str,
        template: &mut PodTemplateSpec,
        model: &GangGroupModel,
    ) {
        // Roles outside the gang are scheduled as ordinary YuniKorn pods.
        if !model.roles.contains_key(role) {
            return;
        }

        // Task group names are lowercased roles; the reconciler rejects roles
        // that differ only by case, so no two groups collide.
        let task_groups: Vec<serde_json::Value> = model
            .roles
            .iter()
            .map(|(name, gang)| {
                json!({
                    "name": name.to_ascii_lowercase(),
                    "minMember": gang.replicas,
                    "minResource": gang.pod_resources,
                })
            })
            .collect();

        let annotations = template
            .metadata
            .get_or_insert_with(Default::default)
            .annotations
            .get_or_insert_with(BTreeMap::new);
        annotations.insert(TASK_GROUP_NAME_ANNOTATION.to_string(), role.to_ascii_lowercase());
        annotations.insert(
            TASK_GROUPS_ANNOTATION.to_string(),
            serde_json::Value::Array(task_groups).to_string(),
        );
        if let Some(timeout) = model.schedule_timeout_seconds {
            annotations.insert(
                SCHEDULING_POLICY_ANNOTATION.to_string(),
                format!("placeholderTimeoutInSeconds={timeout}"),
            );
        }
    }
}
