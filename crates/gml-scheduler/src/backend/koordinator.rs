use kube::api::{ApiResource, DynamicObject};

use super::{BackendKind, GangBackend, GroupKey, SchedulerFramework};
use crate::error::GangError;
use crate::job::JobMeta;
use crate::model::{GangGroupModel, MinMemberPolicy};

pub const KOORD_SCHEDULER_NAME: &str = "koord-scheduler";

/// koordinator.sh reuses the scheduler-plugins PodGroup and label; only the
/// scheduler binary differs.
#[derive(Clone, Debug)]
pub struct Koordinator {
    framework: SchedulerFramework,
}

impl Koordinator {
    pub fn new(policy: MinMemberPolicy) -> Self {
        Self {
            framework: SchedulerFramework::with_scheduler_name(KOORD_SCHEDULER_NAME, policy),
        }
    }
}

impl GangBackend for Koordinator {
    fn kind(&self) -> BackendKind {
        BackendKind::Koordinator
    }

    fn gang_scheduler_name(&self) -> &str {
        KOORD_SCHEDULER_NAME
    }

    fn group_key(&self) -> GroupKey {
        self.framework.group_key()
    }

    fn min_member_policy(&self) -> &MinMemberPolicy {
        self.framework.min_member_policy()
    }

    fn gang_resource_api(&self) -> Option<ApiResource> {
        self.framework.gang_resource_api()
    }

    fn build_gang_resource(
        &self,
        model: &GangGroupModel,
        job: &JobMeta,
    ) -> Result<Option<DynamicObject>, GangError> {
        self.framework.build_gang_resource(model, job)
    }

    fn owned_spec_keys(&self) -> &'static [&'static str] {
        self.framework.owned_spec_keys()
    }

    fn is_gang_resource_ready(&self, observed: &DynamicObject) -> bool {
        self.framework.is_gang_resource_ready(observed)
    }
}
