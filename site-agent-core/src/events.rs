//! Event-driven dispatch (`spec.md` §4.8, `EventDriven` [`crate::config::DispatchMode`]).
//!
//! The source federates these signals over MQTT/STOMP; no such crate is
//! attested anywhere in the retrieved pack, so the control-plane-facing
//! transport is left to the embedding binary (it decodes whatever wire
//! message its messaging broker delivers and calls [`EventBus::publish`]).
//! What lives here is the in-process fan-out from that publish point to
//! every subscribed lane task, built the teacher's way: a thin trait seam
//! over `tokio::sync::broadcast`, mirroring how `backend/driver.rs` wraps
//! `BackendClient` rather than calling it a pattern name.

use site_agent_types::Order;
use tokio::sync::broadcast;
use uuid::Uuid;

/// One federation signal a lane task reacts to (`spec.md` §4.8).
#[derive(Debug, Clone)]
pub enum AgentEvent {
    OrderCreated { offering_uuid: Uuid, order: Order },
    ResourceUpdated { offering_uuid: Uuid, resource_uuid: Uuid },
    UserRoleChanged { offering_uuid: Uuid, username: String, project_uuid: Uuid, granted: bool },
    ProjectUserSync { offering_uuid: Uuid, project_uuid: Uuid },
}

impl AgentEvent {
    pub fn offering_uuid(&self) -> Uuid {
        match self {
            AgentEvent::OrderCreated { offering_uuid, .. }
            | AgentEvent::ResourceUpdated { offering_uuid, .. }
            | AgentEvent::UserRoleChanged { offering_uuid, .. }
            | AgentEvent::ProjectUserSync { offering_uuid, .. } => *offering_uuid,
        }
    }
}

/// Seam between the messaging transport and the reconciliation lanes.
/// `publish` never blocks on subscriber processing: it's a fire-and-forget
/// fan-out, and subscribers that fall behind drop the oldest events rather
/// than back-pressuring the publisher (`spec.md` §4.8: "a safety-sweep poll
/// still runs underneath event dispatch", so a dropped event is recovered
/// on the next sweep rather than requiring guaranteed delivery here).
pub trait EventBus: Send + Sync {
    fn publish(&self, event: AgentEvent);

    fn subscribe(&self) -> broadcast::Receiver<AgentEvent>;
}

/// In-process broadcast-channel [`EventBus`]. One instance is shared by the
/// whole agent process; each offering's lane tasks subscribe independently
/// and filter by `offering_uuid`.
pub struct BroadcastEventBus {
    sender: broadcast::Sender<AgentEvent>,
}

impl BroadcastEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        BroadcastEventBus { sender }
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        BroadcastEventBus::new(1024)
    }
}

impl EventBus for BroadcastEventBus {
    fn publish(&self, event: AgentEvent) {
        // No receivers yet, or all lagged out, is not an error: the safety
        // sweep picks up whatever a dropped event would have triggered.
        let _ = self.sender.send(event);
    }

    fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.sender.subscribe()
    }
}
