use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use futures::StreamExt;
use gml_scheduler::{GangConfig, GangError, GangReconciler, KubeEventPublisher, KubeGangClient};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{
    api::{Api, Patch, PatchParams},
    core::CustomResourceExt,
    Client,
    runtime::{Controller, watcher, wait::{conditions, await_condition}},
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::controller::{CONTROLLER_NAME, Context};
use crate::pytorch_train_job::PyTorchTrainJob;

mod controller;
mod pods;
mod pytorch_train_job;

const CRD_NAME: &str = "pytorchtrainjobs.gml.gerardosalazar.com";

#[derive(Parser, Debug)]
#[command(name = "gml-operator", about = "Runs PyTorchTrainJobs with optional gang scheduling")]
struct Args {
    /// Gang scheduling config file (YAML)
    #[arg(long, env = "GML_GANG_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, env = "GML_ENABLE_GANG_SCHEDULING")]
    enable_gang_scheduling: bool,

    /// scheduler-plugins, koordinator, volcano or yunikorn
    #[arg(long, env = "GML_GANG_SCHEDULER")]
    gang_scheduler: Option<String>,

    /// Scheduler name for scheduler-plugins deployments under a custom name
    #[arg(long, env = "GML_GANG_SCHEDULER_NAME")]
    gang_scheduler_name: Option<String>,
}

impl Args {
    /// File values first, then flags on top.
    fn gang_config(&self) -> Result<GangConfig, GangError> {
        let mut config = match &self.config {
            Some(path) => GangConfig::from_yaml_file(path)?,
            None => GangConfig::default(),
        };
        if self.enable_gang_scheduling {
            config.enabled = true;
        }
        if let Some(backend) = &self.gang_scheduler {
            config.backend = backend.clone();
        }
        if let Some(name) = &self.gang_scheduler_name {
            config.scheduler_name = Some(name.clone());
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let gang_config = args.gang_config()?;
    let backend = gang_config.build_backend()?;

    let client = Client::try_default().await?;
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());

    crds.patch(CRD_NAME,
    &PatchParams::apply(CONTROLLER_NAME),
        &Patch::Apply(PyTorchTrainJob::crd())).await?;

    tokio::time::timeout(
        std::time::Duration::from_secs(10),
        await_condition(crds, CRD_NAME, conditions::is_crd_established())
    ).await??;

    let gang = GangReconciler::new(
        backend,
        Arc::new(KubeGangClient::new(client.clone())),
        Arc::new(KubeEventPublisher::new(client.clone(), CONTROLLER_NAME)),
        &gang_config,
    );
    info!(
        enabled = gang.is_enabled(),
        backend = %gang.backend().kind(),
        scheduler = gang.backend().gang_scheduler_name(),
        "starting controller"
    );
    let ctx = Arc::new(Context {
        client: client.clone(),
        gang,
    });

    let pytorchtrainjobs: Api<PyTorchTrainJob> = Api::all(client.clone());
    Controller::new(pytorchtrainjobs, watcher::Config::default())
        .owns(Api::<Pod>::all(client.clone()), watcher::Config::default())
        .shutdown_on_signal()
        .run(controller::reconcile, controller::error_policy, ctx)
        .for_each(|res| async move {
            if let Err(e) = res {
                warn!(error = %e, "reconcile loop error");
            }
        })
        .await;

    Ok(())
}
