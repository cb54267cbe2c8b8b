//! Gang scheduling reconciler.
//!
//! Runs once per job reconcile pass:
//! Disabled → (compute model) → sync gang resource → decorate templates → readiness
//!
//! The reconciler keeps no state between passes. The live gang resource is
//! re-read every pass and only written when it drifts from the model.

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use kube::api::{ApiResource, DynamicObject};
use kube::runtime::events::EventType;
use kube::ResourceExt;
use serde_json::{Map, Value};
use tracing::{debug, info, instrument};

use crate::backend::GangBackend;
use crate::client::GangClient;
use crate::config::GangConfig;
use crate::decorate::decorate_pod_template;
use crate::error::GangError;
use crate::events::{EventPublisher, actions, reasons};
use crate::job::{JobMeta, ReplicaSpec};
use crate::model::GangGroupModel;
use crate::resources::parse_milli;
use crate::retry::{RetryConfig, retry_with_backoff};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GangState {
    /// Gang scheduling is switched off; nothing was touched.
    Disabled,
    /// The gang has no members this pass.
    Skipped,
    /// Backend without a gang resource; templates were decorated.
    Unmanaged,
    Created,
    Updated,
    InSync,
}

impl GangState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GangState::Disabled => "Disabled",
            GangState::Skipped => "Skipped",
            GangState::Unmanaged => "Unmanaged",
            GangState::Created => "Created",
            GangState::Updated => "Updated",
            GangState::InSync => "InSync",
        }
    }
}

impl fmt::Display for GangState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one pass. `ready == false` means the gang is not admitted yet
/// and the caller should requeue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GangStatus {
    pub state: GangState,
    pub ready: bool,
    pub min_member: u32,
}

impl GangStatus {
    fn passthrough(state: GangState) -> Self {
        Self {
            state,
            ready: true,
            min_member: 0,
        }
    }
}

pub struct GangReconciler {
    backend: Arc<dyn GangBackend>,
    client: Arc<dyn GangClient>,
    events: Arc<dyn EventPublisher>,
    enabled: bool,
    retry: RetryConfig,
    api_timeout: Duration,
}

impl GangReconciler {
    pub fn new(
        backend: Arc<dyn GangBackend>,
        client: Arc<dyn GangClient>,
        events: Arc<dyn EventPublisher>,
        config: &GangConfig,
    ) -> Self {
        Self {
            backend,
            client,
            events,
            enabled: config.enabled,
            retry: config.retry.clone(),
            api_timeout: config.api_timeout(),
        }
    }

    pub fn backend(&self) -> &dyn GangBackend {
        self.backend.as_ref()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Reconcile gang scheduling for one job and decorate its pod templates in place.
    #[instrument(skip_all, fields(job = %job.name, backend = %self.backend.kind()))]
    pub async fn reconcile(
        &self,
        job: &JobMeta,
        replicas: &mut [ReplicaSpec],
    ) -> Result<GangStatus, GangError> {
        if !self.enabled {
            return Ok(GangStatus::passthrough(GangState::Disabled));
        }

        let namespace = validate(job, replicas)?;
        let model = GangGroupModel::compute(
            replicas,
            self.backend.min_member_policy(),
            job.scheduling_policy.as_ref(),
            self.backend.gang_scheduler_name(),
        );
        if model.is_empty() {
            debug!("no gang members this pass, skipping gang scheduling");
            return Ok(GangStatus::passthrough(GangState::Skipped));
        }

        let (state, ready) = match self.backend.build_gang_resource(&model, job)? {
            None => (GangState::Unmanaged, true),
            Some(desired) => {
                let api = self.backend.gang_resource_api().ok_or_else(|| {
                    GangError::Config(format!(
                        "backend {} built a gang resource without an API",
                        self.backend.kind()
                    ))
                })?;
                let (state, live) = self.sync_with_retry(&api, namespace, &desired).await?;
                self.announce(job, state).await;
                (state, self.backend.is_gang_resource_ready(&live))
            }
        };

        for spec in replicas.iter_mut() {
            decorate_pod_template(
                self.backend.as_ref(),
                self.events.as_ref(),
                job,
                &spec.role,
                &mut spec.template,
                &model,
            )
            .await;
        }

        info!(
            namespace,
            state = %state,
            ready,
            min_member = model.min_member,
            "gang scheduling reconciled"
        );

        Ok(GangStatus {
            state,
            ready,
            min_member: model.min_member,
        })
    }

    async fn sync_with_retry(
        &self,
        api: &ApiResource,
        namespace: &str,
        desired: &DynamicObject,
    ) -> Result<(GangState, DynamicObject), GangError> {
        let operation = format!("sync {} {}/{}", api.kind, namespace, desired.name_any());
        retry_with_backoff(&self.retry, &operation, GangError::is_retryable, move || {
            self.sync_gang_resource(api, namespace, desired)
        })
        .await
        .map_err(|e| {
            if e.is_retryable() {
                GangError::RetriesExhausted {
                    operation,
                    attempts: self.retry.max_attempts.max(1),
                    source: Box::new(e),
                }
            } else {
                e
            }
        })
    }

    /// Create the gang resource, or bring the live one back in line with `desired`.
    async fn sync_gang_resource(
        &self,
        api: &ApiResource,
        namespace: &str,
        desired: &DynamicObject,
    ) -> Result<(GangState, DynamicObject), GangError> {
        let name = desired.name_any();
        let live = self
            .call("get gang resource", self.client.get(api, namespace, &name))
            .await?;

        match live {
            None => {
                let created = self
                    .call("create gang resource", self.client.create(api, namespace, desired))
                    .await?;
                info!(kind = %api.kind, name = %name, "created gang resource");
                Ok((GangState::Created, created))
            }
            Some(live) => match drifted(&live, desired, self.backend.owned_spec_keys()) {
                None => Ok((GangState::InSync, live)),
                Some(updated) => {
                    let replaced = self
                        .call("replace gang resource", self.client.replace(api, namespace, &updated))
                        .await?;
                    info!(kind = %api.kind, name = %name, "updated gang resource");
                    Ok((GangState::Updated, replaced))
                }
            },
        }
    }

    async fn call<T>(
        &self,
        operation: &str,
        request: impl Future<Output = Result<T, GangError>>,
    ) -> Result<T, GangError> {
        tokio::time::timeout(self.api_timeout, request)
            .await
            .map_err(|_| GangError::Timeout {
                operation: operation.to_string(),
            })?
    }

    async fn announce(&self, job: &JobMeta, state: GangState) {
        let reason = match state {
            GangState::Created => reasons::GANG_RESOURCE_CREATED,
            GangState::Updated => reasons::GANG_RESOURCE_UPDATED,
            _ => return,
        };
        self.events
            .publish(
                &job.object_reference(),
                EventType::Normal,
                reason,
                actions::RECONCILE,
                Some(format!("{} gang resource {}", self.backend.kind(), job.name)),
            )
            .await;
    }
}

fn validate<'a>(job: &'a JobMeta, replicas: &[ReplicaSpec]) -> Result<&'a str, GangError> {
    let namespace = job
        .namespace
        .as_deref()
        .filter(|ns| !ns.is_empty())
        .ok_or(GangError::MissingNamespace)?;

    let mut roles = BTreeSet::new();
    for spec in replicas {
        let invalid = |reason: &str| GangError::InvalidReplicaSpec {
            role: spec.role.clone(),
            reason: reason.to_string(),
        };
        if spec.role.is_empty() {
            return Err(invalid("role name is empty"));
        }
        if spec.replicas < 0 {
            return Err(invalid("replica count is negative"));
        }
        if !roles.insert(spec.role.to_ascii_lowercase()) {
            return Err(invalid("role is listed more than once"));
        }
    }
    Ok(namespace)
}

/// The live object with `desired`'s spec fields and owner references applied,
/// or `None` when nothing differs. Keys in `owned` that `desired` no longer
/// sets are removed. Name, namespace, resourceVersion, status and spec fields
/// outside `owned` are left as they are.
fn drifted(
    live: &DynamicObject,
    desired: &DynamicObject,
    owned: &[&str],
) -> Option<DynamicObject> {
    let mut updated = live.clone();
    let mut changed = false;

    if let Some(desired_spec) = desired.data.get("spec").and_then(Value::as_object) {
        if !updated.data.is_object() {
            updated.data = Value::Object(Map::new());
        }
        if let Some(data) = updated.data.as_object_mut() {
            let spec = data
                .entry("spec")
                .or_insert_with(|| Value::Object(Map::new()));
            if !spec.is_object() {
                *spec = Value::Object(Map::new());
            }
            if let Some(spec) = spec.as_object_mut() {
                for (key, want) in desired_spec {
                    if !spec.get(key).is_some_and(|have| equivalent(have, want)) {
                        spec.insert(key.clone(), want.clone());
                        changed = true;
                    }
                }
                for key in owned.iter().filter(|k| !desired_spec.contains_key(**k)) {
                    if spec.remove(*key).is_some() {
                        changed = true;
                    }
                }
            }
        }
    }

    for owner in desired.owner_references() {
        let owners = updated.metadata.owner_references.get_or_insert_with(Vec::new);
        if !owners.iter().any(|o| o.uid == owner.uid) {
            owners.push(owner.clone());
            changed = true;
        }
    }

    changed.then_some(updated)
}

/// JSON equality, except that quantity strings compare by value ("1000m" == "1").
fn equivalent(have: &Value, want: &Value) -> bool {
    match (have, want) {
        (Value::String(a), Value::String(b)) => {
            a == b || matches!((parse_milli(a), parse_milli(b)), (Some(x), Some(y)) if x == y)
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && b.iter()
                    .all(|(k, v)| a.get(k).is_some_and(|existing| equivalent(existing, v)))
        }
        _ => have == want,
    }
}
