use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use gml_scheduler::backend::{POD_GROUP_LABEL, VOLCANO_GROUP_ANNOTATION, YUNIKORN_APP_LABEL};
use gml_scheduler::retry::RetryConfig;
use gml_scheduler::{
    EventPublisher, GangClient, GangConfig, GangError, GangReconciler, GangState, JobMeta,
    ReplicaSpec, SchedulingPolicy,
};
use k8s_openapi::api::core::v1::{
    Container, ObjectReference, PodSpec, PodTemplateSpec, ResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::ResourceExt;
use kube::api::{ApiResource, DynamicObject};
use kube::runtime::events::EventType;
use serde_json::json;

/// In-memory stand-in for the API server with optimistic concurrency.
#[derive(Default)]
struct FakeCluster {
    objects: Mutex<BTreeMap<(String, String), DynamicObject>>,
    gets: AtomicU32,
    creates: AtomicU32,
    replaces: AtomicU32,
    next_version: AtomicU32,
    /// Gets that report "not found" even when the object exists.
    hidden_gets: AtomicU32,
    /// Gets that never answer.
    stalled: AtomicBool,
}

impl FakeCluster {
    fn stored(&self, namespace: &str, name: &str) -> Option<DynamicObject> {
        self.objects
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    fn set_status(&self, namespace: &str, name: &str, status: serde_json::Value) {
        let mut objects = self.objects.lock().unwrap();
        let obj = objects
            .get_mut(&(namespace.to_string(), name.to_string()))
            .unwrap();
        obj.data["status"] = status;
        obj.metadata.resource_version = Some(self.bump());
    }

    fn bump(&self) -> String {
        (self.next_version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn writes(&self) -> u32 {
        self.creates.load(Ordering::SeqCst) + self.replaces.load(Ordering::SeqCst)
    }

    fn calls(&self) -> u32 {
        self.gets.load(Ordering::SeqCst) + self.writes()
    }
}

#[async_trait]
impl GangClient for FakeCluster {
    async fn get(
        &self,
        _api: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, GangError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let hidden = self
            .hidden_gets
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if hidden {
            return Ok(None);
        }
        Ok(self.stored(namespace, name))
    }

    async fn create(
        &self,
        _api: &ApiResource,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, GangError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        let key = (namespace.to_string(), object.name_any());
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(&key) {
            return Err(GangError::AlreadyExists { name: key.1 });
        }
        let mut stored = object.clone();
        stored.metadata.resource_version = Some(self.bump());
        objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn replace(
        &self,
        _api: &ApiResource,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, GangError> {
        self.replaces.fetch_add(1, Ordering::SeqCst);
        let key = (namespace.to_string(), object.name_any());
        let mut objects = self.objects.lock().unwrap();
        let current = objects.get(&key).ok_or_else(|| GangError::Conflict {
            name: key.1.clone(),
        })?;
        if current.metadata.resource_version != object.metadata.resource_version {
            return Err(GangError::Conflict { name: key.1 });
        }
        let mut stored = object.clone();
        stored.metadata.resource_version = Some(self.bump());
        objects.insert(key, stored.clone());
        Ok(stored)
    }
}

#[derive(Default)]
struct RecordingEvents {
    events: Mutex<Vec<(EventType, String)>>,
}

impl RecordingEvents {
    fn warnings(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| matches!(t, EventType::Warning))
            .map(|(_, reason)| reason.clone())
            .collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingEvents {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
        self.events.lock().unwrap().push((type_, reason.to_string()));
    }
}

struct Harness {
    cluster: Arc<FakeCluster>,
    events: Arc<RecordingEvents>,
    reconciler: GangReconciler,
}

fn harness(backend: &str, enabled: bool, exclude_roles: &[&str]) -> Harness {
    let config = GangConfig {
        enabled,
        backend: backend.to_string(),
        exclude_roles: exclude_roles.iter().map(|r| r.to_string()).collect(),
        retry: RetryConfig {
            max_attempts: 3,
            initial_delay_ms: 1,
            max_delay_ms: 2,
            backoff_multiplier: 2.0,
        },
        ..Default::default()
    };
    let cluster = Arc::new(FakeCluster::default());
    let events = Arc::new(RecordingEvents::default());
    let reconciler = GangReconciler::new(
        config.build_backend().unwrap(),
        cluster.clone(),
        events.clone(),
        &config,
    );
    Harness {
        cluster,
        events,
        reconciler,
    }
}

fn job() -> JobMeta {
    JobMeta {
        name: "trainer-1".to_string(),
        namespace: Some("ml".to_string()),
        uid: "5b0c7c1e-uid".to_string(),
        api_version: "gml.gerardosalazar.com/v1".to_string(),
        kind: "PyTorchTrainJob".to_string(),
        scheduling_policy: None,
    }
}

fn template(cpu: &str, scheduler_name: Option<&str>) -> PodTemplateSpec {
    PodTemplateSpec {
        metadata: None,
        spec: Some(PodSpec {
            scheduler_name: scheduler_name.map(str::to_string),
            containers: vec![Container {
                name: "pytorch".to_string(),
                image: Some("pytorch/pytorch:2.3.0".to_string()),
                resources: Some(ResourceRequirements {
                    requests: Some(BTreeMap::from([
                        ("cpu".to_string(), Quantity(cpu.to_string())),
                        ("nvidia.com/gpu".to_string(), Quantity("1".to_string())),
                    ])),
                    ..Default::default()
                }),
                ..Default::default()
            }],
            ..Default::default()
        }),
    }
}

fn bare_template() -> PodTemplateSpec {
    PodTemplateSpec {
        metadata: None,
        spec: Some(PodSpec {
            containers: vec![Container {
                name: "pytorch".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        }),
    }
}

fn trainer_replicas(workers: i32) -> Vec<ReplicaSpec> {
    vec![
        ReplicaSpec::new("Worker", workers, template("2", None)),
        ReplicaSpec::new("Master", 1, template("1", None)),
    ]
}

#[tokio::test]
async fn koordinator_trainer_example() {
    let h = harness("koordinator", true, &[]);
    let mut replicas = trainer_replicas(4);

    let status = h.reconciler.reconcile(&job(), &mut replicas).await.unwrap();

    assert_eq!(status.state, GangState::Created);
    assert_eq!(status.min_member, 5);
    assert!(!status.ready);

    for spec in &replicas {
        let pod_spec = spec.template.spec.as_ref().unwrap();
        assert_eq!(pod_spec.scheduler_name.as_deref(), Some("koord-scheduler"));
        let labels = spec.template.metadata.as_ref().unwrap().labels.as_ref().unwrap();
        assert_eq!(labels[POD_GROUP_LABEL], "trainer-1");
    }

    let pod_group = h.cluster.stored("ml", "trainer-1").unwrap();
    assert_eq!(pod_group.data["spec"]["minMember"], 5);
    assert_eq!(pod_group.data["spec"]["minResources"]["cpu"], "9");
    assert_eq!(pod_group.data["spec"]["minResources"]["nvidia.com/gpu"], "5");
    let owners = pod_group.owner_references();
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0].uid, "5b0c7c1e-uid");
    assert_eq!(owners[0].controller, Some(true));
}

#[tokio::test]
async fn second_pass_reads_without_writing() {
    let h = harness("scheduler-plugins", true, &[]);

    h.reconciler.reconcile(&job(), &mut trainer_replicas(4)).await.unwrap();
    let writes = h.cluster.writes();
    let gets = h.cluster.gets.load(Ordering::SeqCst);

    let status = h.reconciler.reconcile(&job(), &mut trainer_replicas(4)).await.unwrap();

    assert_eq!(status.state, GangState::InSync);
    assert_eq!(h.cluster.writes(), writes);
    assert_eq!(h.cluster.gets.load(Ordering::SeqCst), gets + 1);
}

#[tokio::test]
async fn scaling_workers_updates_min_member() {
    let h = harness("scheduler-plugins", true, &[]);
    h.reconciler.reconcile(&job(), &mut trainer_replicas(4)).await.unwrap();

    let status = h.reconciler.reconcile(&job(), &mut trainer_replicas(8)).await.unwrap();

    assert_eq!(status.state, GangState::Updated);
    assert_eq!(status.min_member, 9);
    let pod_group = h.cluster.stored("ml", "trainer-1").unwrap();
    assert_eq!(pod_group.data["spec"]["minMember"], 9);
    assert_eq!(pod_group.data["spec"]["minResources"]["cpu"], "17");
    assert_eq!(h.cluster.replaces.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn readiness_comes_from_observed_status() {
    let h = harness("koordinator", true, &[]);
    h.reconciler.reconcile(&job(), &mut trainer_replicas(4)).await.unwrap();

    h.cluster.set_status("ml", "trainer-1", json!({ "phase": "Running", "scheduled": 5 }));
    let status = h.reconciler.reconcile(&job(), &mut trainer_replicas(4)).await.unwrap();

    assert_eq!(status.state, GangState::InSync);
    assert!(status.ready);
}

#[tokio::test]
async fn status_written_by_the_scheduler_survives_an_update() {
    let h = harness("scheduler-plugins", true, &[]);
    h.reconciler.reconcile(&job(), &mut trainer_replicas(4)).await.unwrap();
    h.cluster.set_status("ml", "trainer-1", json!({ "phase": "Scheduling" }));

    h.reconciler.reconcile(&job(), &mut trainer_replicas(6)).await.unwrap();

    let pod_group = h.cluster.stored("ml", "trainer-1").unwrap();
    assert_eq!(pod_group.data["status"]["phase"], "Scheduling");
    assert_eq!(pod_group.data["spec"]["minMember"], 7);
}

#[tokio::test]
async fn disabled_touches_nothing() {
    let h = harness("koordinator", false, &[]);
    let mut replicas = trainer_replicas(4);
    let before = replicas.clone();

    let status = h.reconciler.reconcile(&job(), &mut replicas).await.unwrap();

    assert_eq!(status.state, GangState::Disabled);
    assert!(status.ready);
    assert_eq!(h.cluster.calls(), 0);
    assert_eq!(replicas, before);
    assert!(h.events.events.lock().unwrap().is_empty());
}

#[tokio::test]
async fn foreign_scheduler_name_is_kept_with_one_warning() {
    let h = harness("koordinator", true, &[]);
    let mut replicas = vec![
        ReplicaSpec::new("Worker", 4, template("2", Some("custom"))),
        ReplicaSpec::new("Master", 1, template("1", None)),
    ];

    h.reconciler.reconcile(&job(), &mut replicas).await.unwrap();

    let worker = &replicas[0].template;
    assert_eq!(worker.spec.as_ref().unwrap().scheduler_name.as_deref(), Some("custom"));
    assert_eq!(
        worker.metadata.as_ref().unwrap().labels.as_ref().unwrap()[POD_GROUP_LABEL],
        "trainer-1"
    );
    let master = &replicas[1].template;
    assert_eq!(
        master.spec.as_ref().unwrap().scheduler_name.as_deref(),
        Some("koord-scheduler")
    );
    assert_eq!(h.events.warnings(), vec!["PodTemplateSchedulerNameAlreadySet".to_string()]);
}

#[tokio::test]
async fn decorating_twice_changes_nothing() {
    let h = harness("koordinator", true, &[]);
    let mut replicas = trainer_replicas(4);

    h.reconciler.reconcile(&job(), &mut replicas).await.unwrap();
    let once = replicas.clone();
    h.reconciler.reconcile(&job(), &mut replicas).await.unwrap();

    assert_eq!(replicas, once);
}

#[tokio::test]
async fn excluded_master_is_not_counted() {
    let h = harness("volcano", true, &["master"]);
    let mut replicas = trainer_replicas(4);

    let status = h.reconciler.reconcile(&job(), &mut replicas).await.unwrap();

    assert_eq!(status.min_member, 4);
    let pod_group = h.cluster.stored("ml", "trainer-1").unwrap();
    assert_eq!(pod_group.data["spec"]["minMember"], 4);
    assert_eq!(pod_group.data["spec"]["minTaskMember"]["worker"], 4);
    assert!(pod_group.data["spec"]["minTaskMember"].get("master").is_none());

    // Excluded roles are still decorated so every pod lands on the same scheduler.
    let master = replicas[1].template.metadata.as_ref().unwrap();
    assert_eq!(master.annotations.as_ref().unwrap()[VOLCANO_GROUP_ANNOTATION], "trainer-1");
}

#[tokio::test]
async fn volcano_queue_from_scheduling_policy() {
    let h = harness("volcano", true, &[]);
    let job = JobMeta {
        scheduling_policy: Some(SchedulingPolicy {
            queue: Some("research".to_string()),
            min_available: Some(3),
            ..Default::default()
        }),
        ..job()
    };

    let status = h.reconciler.reconcile(&job, &mut trainer_replicas(4)).await.unwrap();

    assert_eq!(status.min_member, 3);
    let pod_group = h.cluster.stored("ml", "trainer-1").unwrap();
    assert_eq!(pod_group.data["spec"]["queue"], "research");
    assert_eq!(pod_group.data["spec"]["minMember"], 3);
}

#[tokio::test]
async fn yunikorn_decorates_without_a_gang_resource() {
    let h = harness("yunikorn", true, &[]);
    let mut replicas = trainer_replicas(2);

    let status = h.reconciler.reconcile(&job(), &mut replicas).await.unwrap();

    assert_eq!(status.state, GangState::Unmanaged);
    assert!(status.ready);
    assert_eq!(h.cluster.calls(), 0);
    let worker = &replicas[0].template;
    assert_eq!(worker.spec.as_ref().unwrap().scheduler_name.as_deref(), Some("yunikorn"));
    assert_eq!(
        worker.metadata.as_ref().unwrap().labels.as_ref().unwrap()[YUNIKORN_APP_LABEL],
        "trainer-1"
    );
}

#[tokio::test]
async fn create_race_falls_back_to_update() {
    let h = harness("scheduler-plugins", true, &[]);
    h.reconciler.reconcile(&job(), &mut trainer_replicas(2)).await.unwrap();

    // The next get misses the PodGroup another writer just created, so the
    // create collides and the pass has to re-read and update instead.
    h.cluster.hidden_gets.store(1, Ordering::SeqCst);
    let status = h.reconciler.reconcile(&job(), &mut trainer_replicas(4)).await.unwrap();

    assert_eq!(status.state, GangState::Updated);
    assert_eq!(h.cluster.creates.load(Ordering::SeqCst), 2);
    assert_eq!(h.cluster.stored("ml", "trainer-1").unwrap().data["spec"]["minMember"], 5);
}

#[tokio::test]
async fn persistent_conflicts_surface_as_retryable() {
    let h = harness("scheduler-plugins", true, &[]);
    h.reconciler.reconcile(&job(), &mut trainer_replicas(2)).await.unwrap();

    h.cluster.hidden_gets.store(u32::MAX, Ordering::SeqCst);
    let err = h
        .reconciler
        .reconcile(&job(), &mut trainer_replicas(4))
        .await
        .unwrap_err();

    assert!(matches!(err, GangError::RetriesExhausted { attempts: 3, .. }));
    assert!(err.is_retryable());
    assert_eq!(h.cluster.creates.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn dropped_requests_clear_min_resources() {
    let h = harness("koordinator", true, &[]);
    h.reconciler.reconcile(&job(), &mut trainer_replicas(4)).await.unwrap();

    let mut bare = vec![
        ReplicaSpec::new("Worker", 4, bare_template()),
        ReplicaSpec::new("Master", 1, bare_template()),
    ];
    let status = h.reconciler.reconcile(&job(), &mut bare).await.unwrap();

    assert_eq!(status.state, GangState::Updated);
    let pod_group = h.cluster.stored("ml", "trainer-1").unwrap();
    assert!(pod_group.data["spec"].get("minResources").is_none());
    assert_eq!(pod_group.data["spec"]["minMember"], 5);

    let status = h.reconciler.reconcile(&job(), &mut bare).await.unwrap();
    assert_eq!(status.state, GangState::InSync);
}

#[tokio::test]
async fn min_available_on_an_empty_job_skips_the_pass() {
    let h = harness("volcano", true, &[]);
    let job = JobMeta {
        scheduling_policy: Some(SchedulingPolicy {
            min_available: Some(3),
            ..Default::default()
        }),
        ..job()
    };
    let mut replicas = vec![ReplicaSpec::new("Worker", 0, template("2", None))];

    let status = h.reconciler.reconcile(&job, &mut replicas).await.unwrap();

    assert_eq!(status.state, GangState::Skipped);
    assert_eq!(h.cluster.calls(), 0);
}

#[tokio::test]
async fn volcano_min_available_is_capped_and_drops_task_minimum() {
    let h = harness("volcano", true, &[]);
    h.reconciler.reconcile(&job(), &mut trainer_replicas(4)).await.unwrap();
    let pod_group = h.cluster.stored("ml", "trainer-1").unwrap();
    assert_eq!(pod_group.data["spec"]["minTaskMember"]["worker"], 4);

    let narrowed = JobMeta {
        scheduling_policy: Some(SchedulingPolicy {
            min_available: Some(2),
            ..Default::default()
        }),
        ..job()
    };
    let status = h.reconciler.reconcile(&narrowed, &mut trainer_replicas(4)).await.unwrap();
    assert_eq!(status.state, GangState::Updated);
    let pod_group = h.cluster.stored("ml", "trainer-1").unwrap();
    assert_eq!(pod_group.data["spec"]["minMember"], 2);
    assert!(pod_group.data["spec"].get("minTaskMember").is_none());

    let oversized = JobMeta {
        scheduling_policy: Some(SchedulingPolicy {
            min_available: Some(10),
            ..Default::default()
        }),
        ..job()
    };
    let status = h.reconciler.reconcile(&oversized, &mut trainer_replicas(4)).await.unwrap();
    assert_eq!(status.min_member, 5);
}

#[tokio::test(start_paused = true)]
async fn stalled_api_calls_time_out_and_exhaust_retries() {
    let h = harness("scheduler-plugins", true, &[]);
    h.cluster.stalled.store(true, Ordering::SeqCst);
    let mut replicas = trainer_replicas(4);

    let err = h.reconciler.reconcile(&job(), &mut replicas).await.unwrap_err();

    match &err {
        GangError::RetriesExhausted { attempts, source, .. } => {
            assert_eq!(*attempts, 3);
            assert!(matches!(**source, GangError::Timeout { .. }));
        }
        other => panic!("expected exhausted retries, got {other}"),
    }
    assert!(err.is_retryable());
    assert_eq!(h.cluster.gets.load(Ordering::SeqCst), 3);
    assert_eq!(h.cluster.writes(), 0);
    assert!(replicas.iter().all(|r| r.template.metadata.is_none()));
}

#[tokio::test]
async fn roles_differing_only_by_case_are_rejected_before_any_write() {
    let h = harness("volcano", true, &[]);
    let mut replicas = vec![
        ReplicaSpec::new("Worker", 2, template("2", None)),
        ReplicaSpec::new("worker", 2, template("2", None)),
    ];

    let err = h.reconciler.reconcile(&job(), &mut replicas).await.unwrap_err();

    assert!(matches!(err, GangError::InvalidReplicaSpec { .. }));
    assert_eq!(h.cluster.calls(), 0);
}
