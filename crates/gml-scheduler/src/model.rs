//! Gang group model: how many pods and how much resource must be admitted together.

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use crate::job::{ReplicaSpec, SchedulingPolicy};
use crate::resources::{self, MilliResources};

/// Which replica roles count towards the gang minimum.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum MinMemberPolicy {
    #[default]
    AllRoles,
    /// Roles matched case-insensitively, e.g. a master/launcher that starts first.
    ExcludeRoles(BTreeSet<String>),
}

impl MinMemberPolicy {
    pub fn exclude<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let roles: BTreeSet<String> = roles
            .into_iter()
            .map(|r| r.as_ref().to_ascii_lowercase())
            .collect();
        if roles.is_empty() {
            MinMemberPolicy::AllRoles
        } else {
            MinMemberPolicy::ExcludeRoles(roles)
        }
    }

    pub fn is_gang_eligible(&self, role: &str) -> bool {
        match self {
            MinMemberPolicy::AllRoles => true,
            MinMemberPolicy::ExcludeRoles(roles) => !roles.contains(&role.to_ascii_lowercase()),
        }
    }
}

/// Per-role share of the gang.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RoleGang {
    pub replicas: u32,
    pub pod_resources: BTreeMap<String, Quantity>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct GangGroupModel {
    pub min_member: u32,
    pub min_resources: BTreeMap<String, Quantity>,
    pub scheduler_name: String,
    /// Gang-eligible roles only.
    pub roles: BTreeMap<String, RoleGang>,
    pub queue: Option<String>,
    pub priority_class: Option<String>,
    pub schedule_timeout_seconds: Option<i32>,
}

impl GangGroupModel {
    /// Compute the gang model for one reconcile pass.
    ///
    /// A zero `min_member` means gang scheduling should be skipped for this pass.
    pub fn compute(
        replicas: &[ReplicaSpec],
        policy: &MinMemberPolicy,
        scheduling_policy: Option<&SchedulingPolicy>,
        scheduler_name: &str,
    ) -> Self {
        let mut roles = BTreeMap::new();
        let mut total = MilliResources::new();
        let mut min_member: u32 = 0;

        for spec in replicas.iter().filter(|s| policy.is_gang_eligible(&s.role)) {
            let count = u32::try_from(spec.replicas).unwrap_or(0);
            let pod = spec
                .template
                .spec
                .as_ref()
                .map(resources::pod_requests)
                .unwrap_or_default();

            resources::add_scaled(&mut total, &pod, i128::from(count));
            min_member = min_member.saturating_add(count);

            let role: &mut RoleGang = roles.entry(spec.role.clone()).or_default();
            role.replicas = role.replicas.saturating_add(count);
            role.pod_resources = resources::to_quantities(&pod);
        }

        // An override narrows the gang; it never revives an empty one or asks
        // for more pods than the job runs. Non-positive overrides are ignored.
        let min_member = match scheduling_policy.and_then(|p| p.min_available) {
            Some(n) if n > 0 && min_member > 0 => {
                u32::try_from(n).map_or(min_member, |n| n.min(min_member))
            }
            _ => min_member,
        };

        let min_resources = scheduling_policy
            .and_then(|p| p.min_resources.clone())
            .unwrap_or_else(|| resources::to_quantities(&total));

        GangGroupModel {
            min_member,
            min_resources,
            scheduler_name: scheduler_name.to_string(),
            roles,
            queue: scheduling_policy.and_then(|p| p.queue.clone()),
            priority_class: scheduling_policy.and_then(|p| p.priority_class.clone()),
            schedule_timeout_seconds: scheduling_policy.and_then(|p| p.schedule_timeout_seconds),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min_member == 0
    }

    /// Pods across the gang-eligible roles, before any `minAvailable` override.
    pub fn total_replicas(&self) -> u32 {
        self.roles.values().fold(0, |acc, r| acc.saturating_add(r.replicas))
    }
}
