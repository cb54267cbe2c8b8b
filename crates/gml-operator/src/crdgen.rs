use kube::CustomResourceExt;

mod pytorch_train_job;
use pytorch_train_job::PyTorchTrainJob;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let yaml = serde_yaml::to_string(&PyTorchTrainJob::crd())?;
    std::fs::write("pytorch_train_job_crd.yaml", yaml)?;
    Ok(())
}
