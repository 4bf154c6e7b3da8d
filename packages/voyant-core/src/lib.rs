//! # voyant-core
//!
//! The multi-tenant execution core for Voyant's data-intelligence control
//! plane: a per-tenant job queue with lease-based ownership, tier/quota
//! enforcement, a workflow/activity runtime with retries and circuit
//! breakers, a plugin pipeline for analyzers and generators, and a
//! schema-validated event bus.
//!
//! ## Layout
//!
//! - [`ids`] — monotonic clock abstraction and ULID-backed typed identifiers
//! - [`tiers`] / [`quota`] — named quota profiles and per-tenant enforcement
//! - [`queue`] — the per-tenant job queue and lease lifecycle
//! - [`artifact`] — the artifact reference the generator pipeline produces
//! - [`breaker`] — the circuit breaker and its process-wide registry
//! - [`activity`] / [`workflow`] — the activity executor and the four
//!   defined workflows built on top of it
//! - [`plugin`] — the analyzer/generator pipeline and artifact-key taxonomy
//! - [`event_schema`] / [`events`] — named, versioned event schemas and the
//!   durable event bus validated against them
//! - [`voyant_error`] / [`pii`] — the externally observable error boundary
//!   and the PII masking applied at it
//! - [`metrics`] — the mode-gated metrics registry
//! - [`context`] — [`context::CoreContext`], which owns one instance of each
//!   of the above and is the only thing an external API surface depends on
//! - [`config`] — [`config::Settings`], loaded once from the environment
//!
//! None of these modules perform their own process-wide IO subsystem setup;
//! logging initialization and environment loading belong to the worker
//! binary that links this crate, not to the library itself.

mod error;

pub mod ids;
pub mod tiers;
pub mod quota;
pub mod queue;
pub mod artifact;
pub mod breaker;
pub mod activity;
pub mod workflow;
pub mod plugin;
pub mod event_schema;
pub mod events;
pub mod voyant_error;
pub mod pii;
pub mod metrics;
pub mod context;
pub mod config;

pub use crate::error::{Categorizable, SafeErrorCategory};

pub use ids::{ArtifactId, Clock, EventId, FrozenClock, Id, JobId, SystemClock, TenantId};
pub use tiers::{Tier, TierTable};
pub use quota::{LimitName, QuotaManager, UsageSnapshot};
pub use queue::{InMemoryJobQueue, Job, JobStatus, JobType, QueueStats};
pub use artifact::ArtifactReference;
pub use breaker::{BreakerConfig, BreakerState, CircuitBreaker, CircuitBreakerRegistry};
pub use activity::{
    Activity, ActivityContext, ActivityDefinition, ActivityHistory, ActivityInvocation,
    ActivityStatus, RetryPolicy,
};
pub use workflow::{ActivityRegistry, StepOutcome, WorkflowOutcome, WorkflowRunner};
pub use plugin::{
    FeatureFlags, GeneratedArtifact, PipelineResult, Plugin, PluginCategory, PluginDescriptor,
    PluginRegistry,
};
pub use event_schema::{EventSchema, FieldSpec, FieldType, SchemaRegistry, ValidationResult};
pub use events::{Event as VoyantEvent, EventBus as DurableEventBus, InMemoryTopicPublisher, TopicPublisher};
pub use voyant_error::{ErrorKind, VoyantError};
pub use metrics::{MetricsMode, MetricsRegistry};
pub use context::CoreContext;
pub use config::Settings;

pub use async_trait::async_trait;
