use k8s_openapi::api::discovery::v1::EndpointSlice;
use std::fmt;

/// Kind of a lifecycle event delivered by the watch layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Add,
    Update,
    Delete,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Add => write!(f, "add"),
            EventKind::Update => write!(f, "update"),
            EventKind::Delete => write!(f, "delete"),
        }
    }
}

/// A slice event emitted by the watch layer.
///
/// Slices always arrive as full snapshots, so `old` is informational only.
#[derive(Debug, Clone)]
pub struct SliceEvent {
    /// Type of event (add, update, delete)
    pub kind: EventKind,
    /// Previous snapshot, when the watch layer has one
    pub old: Option<EndpointSlice>,
    /// Current snapshot (the last known state for deletes)
    pub slice: EndpointSlice,
}

impl SliceEvent {
    /// Create an add event
    pub fn added(slice: EndpointSlice) -> Self {
        Self {
            kind: EventKind::Add,
            old: None,
            slice,
        }
    }

    /// Create an update event
    pub fn updated(old: EndpointSlice, slice: EndpointSlice) -> Self {
        Self {
            kind: EventKind::Update,
            old: Some(old),
            slice,
        }
    }

    /// Create a delete event
    pub fn deleted(slice: EndpointSlice) -> Self {
        Self {
            kind: EventKind::Delete,
            old: None,
            slice,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_constructors() {
        let mut slice = EndpointSlice::default();
        slice.metadata.name = Some("foo-abc".to_string());

        let event = SliceEvent::added(slice.clone());
        assert_eq!(event.kind, EventKind::Add);
        assert!(event.old.is_none());

        let event = SliceEvent::updated(slice.clone(), slice.clone());
        assert_eq!(event.kind, EventKind::Update);
        assert!(event.old.is_some());

        let event = SliceEvent::deleted(slice);
        assert_eq!(event.kind, EventKind::Delete);
        assert_eq!(event.slice.metadata.name.as_deref(), Some("foo-abc"));
    }

    #[test]
    fn test_event_kind_display() {
        assert_eq!(EventKind::Delete.to_string(), "delete");
    }
}
