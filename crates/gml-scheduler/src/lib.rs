//! Gang scheduling for gml training jobs.
//!
//! A job controller hands its replica specs to [`GangReconciler::reconcile`]
//! once per pass. The reconciler keeps the configured backend's PodGroup in
//! line with the job's replica topology, decorates every pod template for that
//! backend's scheduler, and reports whether the gang has been admitted.

pub mod backend;
pub mod client;
pub mod config;
pub mod decorate;
pub mod error;
pub mod events;
pub mod job;
pub mod model;
pub mod reconciler;
pub mod resources;
pub mod retry;

pub use backend::{BackendKind, GangBackend, GroupKey};
pub use client::{GangClient, KubeGangClient};
pub use config::GangConfig;
pub use error::GangError;
pub use events::{EventPublisher, KubeEventPublisher, NoopEventPublisher};
pub use job::{JobMeta, ReplicaSpec, SchedulingPolicy};
pub use model::{GangGroupModel, MinMemberPolicy};
pub use reconciler::{GangReconciler, GangState, GangStatus};
