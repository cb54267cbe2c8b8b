use std::sync::Arc;
use std::time::Duration;

use gml_scheduler::client::FIELD_MANAGER;
use gml_scheduler::{GangError, GangReconciler, GangStatus, JobMeta, ReplicaSpec};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::runtime::controller::Action;
use kube::{Client, Resource, ResourceExt};
use serde_json::json;
use tracing::{error, info, instrument, warn};

use crate::pods::{build_pod, pod_name};
use crate::pytorch_train_job::{PyTorchTrainJob, PyTorchTrainJobStatus};

pub const CONTROLLER_NAME: &str = "gml-operator";

const NOT_READY_REQUEUE: Duration = Duration::from_secs(15);
const RETRYABLE_REQUEUE: Duration = Duration::from_secs(30);
const FATAL_REQUEUE: Duration = Duration::from_secs(300);

pub struct Context {
    pub client: Client,
    pub gang: GangReconciler,
}

#[instrument(skip_all, fields(job = %job.name_any(), namespace = %job.namespace().unwrap_or_default()))]
pub async fn reconcile(job: Arc<PyTorchTrainJob>, ctx: Arc<Context>) -> Result<Action, GangError> {
    let meta = job_meta(&job);
    let namespace = meta.namespace.clone().ok_or(GangError::MissingNamespace)?;
    let mut replicas = replica_specs(&job);

    let gang = match ctx.gang.reconcile(&meta, &mut replicas).await {
        Ok(gang) => gang,
        Err(e) => {
            let status = PyTorchTrainJobStatus {
                message: Some(e.to_string()),
                ..job.status.clone().unwrap_or_default()
            };
            if let Err(patch_err) = patch_status(&ctx.client, &job, &namespace, status).await {
                warn!(error = %patch_err, "failed to record gang scheduling error on job status");
            }
            return Err(e);
        }
    };

    ensure_pods(&ctx.client, &namespace, &meta, &job.spec.image, &replicas).await?;
    patch_status(&ctx.client, &job, &namespace, status_for(&gang)).await?;

    if gang.ready {
        Ok(Action::await_change())
    } else {
        info!(min_member = gang.min_member, "waiting for gang admission");
        Ok(Action::requeue(NOT_READY_REQUEUE))
    }
}

pub fn error_policy(job: Arc<PyTorchTrainJob>, error: &GangError, _ctx: Arc<Context>) -> Action {
    if error.is_retryable() {
        warn!(job = %job.name_any(), error = %error, "reconcile failed, retrying");
        Action::requeue(RETRYABLE_REQUEUE)
    } else {
        error!(job = %job.name_any(), error = %error, "reconcile failed");
        Action::requeue(FATAL_REQUEUE)
    }
}

pub fn job_meta(job: &PyTorchTrainJob) -> JobMeta {
    JobMeta {
        name: job.name_any(),
        namespace: job.namespace(),
        uid: job.uid().unwrap_or_default(),
        api_version: PyTorchTrainJob::api_version(&()).into_owned(),
        kind: PyTorchTrainJob::kind(&()).into_owned(),
        scheduling_policy: job.spec.scheduling_policy.clone(),
    }
}

pub fn replica_specs(job: &PyTorchTrainJob) -> Vec<ReplicaSpec> {
    job.spec
        .replica_specs
        .iter()
        .map(|(role, spec)| ReplicaSpec::new(role.clone(), spec.replicas, spec.template.clone()))
        .collect()
}

pub fn status_for(gang: &GangStatus) -> PyTorchTrainJobStatus {
    PyTorchTrainJobStatus {
        gang_state: Some(gang.state.to_string()),
        gang_ready: gang.ready,
        min_member: gang.min_member,
        message: None,
    }
}

async fn ensure_pods(
    client: &Client,
    namespace: &str,
    job: &JobMeta,
    image: &str,
    replicas: &[ReplicaSpec],
) -> Result<(), GangError> {
    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let params = PostParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    };

    for replica in replicas {
        for index in 0..replica.replicas.max(0) {
            let name = pod_name(&job.name, &replica.role, index);
            if pods.get_opt(&name).await?.is_some() {
                continue;
            }
            match pods.create(&params, &build_pod(job, image, replica, index)).await {
                Ok(_) => info!(pod = %name, replica_type = %replica.role, "created pod"),
                Err(kube::Error::Api(ae)) if ae.code == 409 => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
    Ok(())
}

async fn patch_status(
    client: &Client,
    job: &PyTorchTrainJob,
    namespace: &str,
    status: PyTorchTrainJobStatus,
) -> Result<(), GangError> {
    if job.status.as_ref() == Some(&status) {
        return Ok(());
    }
    let jobs: Api<PyTorchTrainJob> = Api::namespaced(client.clone(), namespace);
    jobs.patch_status(
        &job.name_any(),
        &PatchParams::default(),
        &Patch::Merge(json!({ "status": status })),
    )
    .await?;
    Ok(())
}
