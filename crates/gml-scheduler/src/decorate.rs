//! Pod template decoration shared by every backend.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::PodTemplateSpec;
use kube::runtime::events::EventType;
use tracing::warn;

use crate::backend::{GangBackend, GroupKey};
use crate::events::{EventPublisher, actions, reasons};
use crate::job::JobMeta;
use crate::model::GangGroupModel;

const SCHEDULER_NAME_CONFLICT: &str =
    "Another scheduler is specified when gang-scheduling is enabled and it will not be overwritten";

/// Decorate a pod template so the backend's scheduler can gang schedule it.
///
/// An explicit scheduler name already on the template wins over the backend's;
/// that case only produces a warning event. The grouping label or annotation
/// is always set to the job name. Calling this again on a decorated template
/// changes nothing.
pub async fn decorate_pod_template(
    backend: &dyn GangBackend,
    events: &dyn EventPublisher,
    job: &JobMeta,
    role: &str,
    template: &mut PodTemplateSpec,
    model: &GangGroupModel,
) {
    let gang_scheduler = backend.gang_scheduler_name();
    let spec = template.spec.get_or_insert_with(Default::default);
    let current = spec.scheduler_name.as_deref().unwrap_or_default();

    if current.is_empty() || current == gang_scheduler {
        spec.scheduler_name = Some(gang_scheduler.to_string());
    } else {
        warn!(
            job = %job.name,
            namespace = job.namespace.as_deref().unwrap_or_default(),
            replica_type = %role,
            scheduler = %current,
            gang_scheduler = %gang_scheduler,
            "{SCHEDULER_NAME_CONFLICT}"
        );
        events
            .publish(
                &job.object_reference(),
                EventType::Warning,
                reasons::SCHEDULER_NAME_ALREADY_SET,
                actions::DECORATE,
                Some(SCHEDULER_NAME_CONFLICT.to_string()),
            )
            .await;
    }

    let metadata = template.metadata.get_or_insert_with(Default::default);
    let labels = metadata.labels.get_or_insert_with(BTreeMap::new);
    match backend.group_key() {
        GroupKey::Label(key) => {
            labels.insert(key.to_string(), job.name.clone());
        }
        GroupKey::Annotation(key) => {
            metadata
                .annotations
                .get_or_insert_with(BTreeMap::new)
                .insert(key.to_string(), job.name.clone());
        }
    }

    backend.decorate_backend_specific(role, template, model);
}
