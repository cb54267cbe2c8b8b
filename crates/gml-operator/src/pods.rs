//! Pods for each replica of a job, built from the decorated templates.

use std::collections::BTreeMap;

use gml_scheduler::backend::JOB_NAME_LABEL;
use gml_scheduler::{JobMeta, ReplicaSpec};
use k8s_openapi::api::core::v1::Pod;
use kube::api::ObjectMeta;

pub const REPLICA_TYPE_LABEL: &str = "gml.gerardosalazar.com/replica-type";
pub const REPLICA_INDEX_LABEL: &str = "gml.gerardosalazar.com/replica-index";

pub fn pod_name(job: &str, role: &str, index: i32) -> String {
    format!("{job}-{}-{index}", role.to_lowercase())
}

/// Pod `index` of `replica`. Template labels and annotations are carried over,
/// so the gang grouping key set during decoration lands on the pod.
pub fn build_pod(job: &JobMeta, image: &str, replica: &ReplicaSpec, index: i32) -> Pod {
    let template = &replica.template;
    let template_meta = template.metadata.clone().unwrap_or_default();

    let mut labels: BTreeMap<String, String> = template_meta.labels.unwrap_or_default();
    labels.insert(JOB_NAME_LABEL.to_string(), job.name.clone());
    labels.insert(REPLICA_TYPE_LABEL.to_string(), replica.role.to_lowercase());
    labels.insert(REPLICA_INDEX_LABEL.to_string(), index.to_string());

    let mut spec = template.spec.clone().unwrap_or_default();
    for container in &mut spec.containers {
        if container.image.as_deref().is_none_or(str::is_empty) {
            container.image = Some(image.to_string());
        }
    }
    if spec.restart_policy.is_none() {
        spec.restart_policy = Some("Never".to_string());
    }

    Pod {
        metadata: ObjectMeta {
            name: Some(pod_name(&job.name, &replica.role, index)),
            namespace: job.namespace.clone(),
            labels: Some(labels),
            annotations: template_meta.annotations,
            owner_references: Some(vec![job.owner_reference()]),
            ..Default::default()
        },
        spec: Some(spec),
        status: None,
    }
}
