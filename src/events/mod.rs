//! Domain-event fan-out.
//!
//! The core only emits abstract events; delivery (websockets, push, etc.)
//! belongs to whatever subscribes. The bus is an explicitly owned registry
//! handed around by `Arc`, never a process-wide singleton.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::{mpsc, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    AgentStatus,
    CampaignStatus,
    TaskUpdate,
    CrackResult,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AgentStatus => "agent_status",
            Self::CampaignStatus => "campaign_status",
            Self::TaskUpdate => "task_update",
            Self::CrackResult => "crack_result",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    pub event_type: EventType,
    pub project_id: String,
    pub payload: serde_json::Value,
}

/// Subscriber registry with a defined creation/teardown lifecycle.
pub struct EventBus {
    subscribers: RwLock<HashMap<String, mpsc::Sender<DomainEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    pub async fn subscribe(&self, subscriber_id: String, tx: mpsc::Sender<DomainEvent>) {
        let mut subs = self.subscribers.write().await;
        subs.insert(subscriber_id, tx);
    }

    pub async fn unsubscribe(&self, subscriber_id: &str) {
        let mut subs = self.subscribers.write().await;
        subs.remove(subscriber_id);
    }

    /// Fan the event out to every live subscriber. A full or closed
    /// channel drops that subscriber's copy; guarantees are the sink's
    /// problem, not the core's.
    pub async fn publish(
        &self,
        event_type: EventType,
        project_id: &str,
        payload: serde_json::Value,
    ) {
        let event = DomainEvent {
            event_type,
            project_id: project_id.to_string(),
            payload,
        };

        tracing::debug!(
            event_type = event_type.as_str(),
            project_id = %project_id,
            "Domain event"
        );

        let subs = self.subscribers.read().await;
        for (subscriber_id, tx) in subs.iter() {
            if tx.try_send(event.clone()).is_err() {
                tracing::warn!(subscriber_id = %subscriber_id, "Dropped event for subscriber");
            }
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
