use std::collections::HashMap;
use tokio::sync::broadcast;

use pkg_types::{Kind, Resource, ResourceKey};

/// A state change, carrying snapshots taken at commit time. Updated events
/// carry both sides so triggers can react to label transitions.
#[derive(Debug, Clone)]
pub enum Event {
    Created(Resource),
    Updated { old: Resource, new: Resource },
    Deleted(Resource),
}

impl Event {
    /// The snapshot observers should act on (the `new` side for updates).
    pub fn resource(&self) -> &Resource {
        match self {
            Event::Created(r) => r,
            Event::Updated { new, .. } => new,
            Event::Deleted(r) => r,
        }
    }

    pub fn key(&self) -> ResourceKey {
        self.resource().key()
    }
}

/// Per-kind broadcast hub. One channel per kind keeps controllers from
/// sifting through events they never act on.
#[derive(Clone)]
pub struct WatchHub {
    senders: HashMap<Kind, broadcast::Sender<Event>>,
}

impl WatchHub {
    pub fn new(capacity: usize) -> Self {
        let mut senders = HashMap::new();
        for kind in [Kind::Pod, Kind::ReplicaSet, Kind::Service] {
            let (tx, _) = broadcast::channel(capacity);
            senders.insert(kind, tx);
        }
        Self { senders }
    }

    /// Publish an event to subscribers of its kind. Send errors mean no
    /// receivers are connected and are ignored, as with any broadcast.
    pub fn publish(&self, event: Event) {
        let kind = event.resource().kind();
        if let Some(tx) = self.senders.get(&kind) {
            let _ = tx.send(event);
        }
    }

    pub fn subscribe(&self, kind: Kind) -> broadcast::Receiver<Event> {
        self.senders
            .get(&kind)
            .expect("hub covers every kind")
            .subscribe()
    }
}
