use std::str::FromStr;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::event::{Entity, EventPayload, StreamEvent};

/// Fans out state-change events to subscribed observers. Delivery is
/// at-least-once per subscriber; a lagging receiver is dropped from the ring
/// buffer and detects the gap through the per-entity sequence numbers.
pub struct Broadcaster {
    tx: broadcast::Sender<StreamEvent>,
    sequences: DashMap<Uuid, u64>,
}

impl Broadcaster {
    pub fn new(buffer: usize) -> Self {
        let (tx, _unused_rx) = broadcast::channel(buffer);
        Self {
            tx,
            sequences: DashMap::new(),
        }
    }

    /// Stamps the next sequence number for the entity and fans the event out.
    /// Events for one entity are numbered 1, 2, 3, ... with no reuse.
    pub fn publish(&self, entity: Entity, payload: EventPayload) -> StreamEvent {
        let seq = {
            let mut counter = self.sequences.entry(entity.id()).or_insert(0);
            *counter += 1;
            *counter
        };

        let event = StreamEvent {
            entity,
            seq,
            at: Utc::now(),
            payload,
        };

        // Send only fails when no subscriber is connected, which is fine.
        let _ = self.tx.send(event.clone());
        event
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.tx.subscribe()
    }

    pub fn last_seq(&self, entity_id: Uuid) -> u64 {
        self.sequences.get(&entity_id).map(|s| *s).unwrap_or(0)
    }
}

/// What a subscriber asked to watch: every driver, one driver, or one order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    AllDrivers,
    Driver(Uuid),
    Order(Uuid),
}

impl Topic {
    pub fn matches(&self, event: &StreamEvent) -> bool {
        match (self, event.entity) {
            (Topic::AllDrivers, Entity::Driver(_)) => true,
            (Topic::Driver(id), Entity::Driver(entity_id)) => *id == entity_id,
            (Topic::Order(id), Entity::Order(entity_id)) => *id == entity_id,
            _ => false,
        }
    }
}

impl FromStr for Topic {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if raw == "drivers" {
            return Ok(Topic::AllDrivers);
        }
        if let Some(id) = raw.strip_prefix("driver:") {
            let id = Uuid::parse_str(id).map_err(|err| format!("bad driver id: {err}"))?;
            return Ok(Topic::Driver(id));
        }
        if let Some(id) = raw.strip_prefix("order:") {
            let id = Uuid::parse_str(id).map_err(|err| format!("bad order id: {err}"))?;
            return Ok(Topic::Order(id));
        }
        Err(format!(
            "unknown topic {raw:?}, expected drivers, driver:<uuid> or order:<uuid>"
        ))
    }
}
