use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::backend::{BackendKind, GangBackend, Koordinator, SchedulerFramework, Volcano, YuniKorn};
use crate::error::GangError;
use crate::model::MinMemberPolicy;
use crate::retry::RetryConfig;

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct GangConfig {
    pub enabled: bool,
    pub backend: String,
    /// Scheduler name override, only honoured by scheduler-plugins.
    pub scheduler_name: Option<String>,
    /// Roles left out of the gang minimum, e.g. a launcher.
    pub exclude_roles: Vec<String>,
    pub api_timeout_seconds: u64,
    pub retry: RetryConfig,
}

impl Default for GangConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            backend: BackendKind::SchedulerPlugins.to_string(),
            scheduler_name: None,
            exclude_roles: Vec::new(),
            api_timeout_seconds: 10,
            retry: RetryConfig::default(),
        }
    }
}

impl GangConfig {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, GangError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| GangError::Config(format!("reading {}: {e}", path.display())))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, GangError> {
        let config: Self =
            serde_yaml::from_str(content).map_err(|e| GangError::Config(e.to_string()))?;
        config.retry.validate()?;
        Ok(config)
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_seconds.max(1))
    }

    pub fn min_member_policy(&self) -> MinMemberPolicy {
        MinMemberPolicy::exclude(&self.exclude_roles)
    }

    /// Instantiate the configured backend. An unknown backend or unusable
    /// retry settings are fatal.
    pub fn build_backend(&self) -> Result<Arc<dyn GangBackend>, GangError> {
        self.retry.validate()?;
        let policy = self.min_member_policy();
        let backend: Arc<dyn GangBackend> = match self.backend.parse::<BackendKind>()? {
            BackendKind::SchedulerPlugins => match self.scheduler_name.as_deref() {
                Some(name) if !name.is_empty() => {
                    Arc::new(SchedulerFramework::with_scheduler_name(name, policy))
                }
                _ => Arc::new(SchedulerFramework::new(policy)),
            },
            BackendKind::Koordinator => Arc::new(Koordinator::new(policy)),
            BackendKind::Volcano => Arc::new(Volcano::new(policy)),
            BackendKind::YuniKorn => Arc::new(YuniKorn::new(policy)),
        };
        Ok(backend)
    }
}
