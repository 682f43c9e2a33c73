//! Typed event channels for connectivity notifications.
//!
//! The state machine publishes a fixed set of events; external collaborators
//! (displays, application logic) subscribe per event kind and receive
//! callbacks inline on the emitting task. A subscriber that returns an error
//! is logged and skipped; it never stops the remaining subscribers and never
//! propagates to the code that triggered the event.
//!
//! Subscriptions are handle-based:
//!
//! ```
//! use std::sync::Arc;
//! use picore_net::events::{Event, EventBus, EventKind};
//!
//! let bus = EventBus::new();
//! let sub = bus.on(
//!     EventKind::Connected,
//!     Arc::new(|event: &Event| {
//!         if let Event::Connected { ip } = event {
//!             println!("got address {ip}");
//!         }
//!         Ok(())
//!     }),
//! );
//! bus.off(EventKind::Connected, sub);
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use log::error;

use crate::state::ConnectionState;

/// The closed set of event channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A station join succeeded; payload is the assigned IP.
    Connected,
    /// The machine left the Connected state.
    Disconnected,
    /// Any state transition; payload is (old, new).
    StateChange,
    /// The provisioning access point came up; payload is its SSID.
    ApModeStarted,
    /// The retry budget was exhausted; payload is the attempt count.
    ConnectionFailed,
}

impl EventKind {
    /// All event kinds, in channel order.
    pub const ALL: [EventKind; 5] = [
        EventKind::Connected,
        EventKind::Disconnected,
        EventKind::StateChange,
        EventKind::ApModeStarted,
        EventKind::ConnectionFailed,
    ];

    /// Wire/config name of the channel.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Connected => "connected",
            EventKind::Disconnected => "disconnected",
            EventKind::StateChange => "state_change",
            EventKind::ApModeStarted => "ap_mode_started",
            EventKind::ConnectionFailed => "connection_failed",
        }
    }

    fn index(&self) -> usize {
        match self {
            EventKind::Connected => 0,
            EventKind::Disconnected => 1,
            EventKind::StateChange => 2,
            EventKind::ApModeStarted => 3,
            EventKind::ConnectionFailed => 4,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "connected" => Ok(EventKind::Connected),
            "disconnected" => Ok(EventKind::Disconnected),
            "state_change" => Ok(EventKind::StateChange),
            "ap_mode_started" => Ok(EventKind::ApModeStarted),
            "connection_failed" => Ok(EventKind::ConnectionFailed),
            _ => Err(EventError::UnknownEvent(s.to_string())),
        }
    }
}

/// A published event with its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Connected { ip: String },
    Disconnected,
    StateChange { old: ConnectionState, new: ConnectionState },
    ApModeStarted { ssid: String },
    ConnectionFailed { retry_count: u32 },
}

impl Event {
    /// The channel this event is dispatched on.
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Connected { .. } => EventKind::Connected,
            Event::Disconnected => EventKind::Disconnected,
            Event::StateChange { .. } => EventKind::StateChange,
            Event::ApModeStarted { .. } => EventKind::ApModeStarted,
            Event::ConnectionFailed { .. } => EventKind::ConnectionFailed,
        }
    }
}

/// Errors from event registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// The string does not name a known event channel.
    UnknownEvent(String),
}

impl fmt::Display for EventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventError::UnknownEvent(name) => {
                write!(f, "unknown event: {} (valid events:", name)?;
                for kind in EventKind::ALL {
                    write!(f, " {}", kind)?;
                }
                write!(f, ")")
            }
        }
    }
}

impl std::error::Error for EventError {}

/// Result a subscriber returns; errors are logged and absorbed by the bus.
pub type EventResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// A subscriber callback. Shared so the bus can detect duplicate
/// registrations of the same callback via pointer identity.
pub type EventCallback = Arc<dyn Fn(&Event) -> EventResult + Send + Sync>;

/// Handle identifying one registration, returned by [`EventBus::on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

struct BusInner {
    next_id: u64,
    listeners: [Vec<(u64, EventCallback)>; 5],
}

/// Publish/subscribe surface with one typed subscriber list per event kind.
///
/// Cheap to clone; clones share the same subscriber lists.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(BusInner {
                next_id: 1,
                listeners: std::array::from_fn(|_| Vec::new()),
            })),
        }
    }

    /// Register a callback on a channel.
    ///
    /// Registering the same callback `Arc` twice on the same channel is a
    /// no-op that returns the existing handle.
    pub fn on(&self, kind: EventKind, callback: EventCallback) -> Subscription {
        let mut inner = self.inner.lock().unwrap();
        let list = &mut inner.listeners[kind.index()];
        if let Some((id, _)) = list
            .iter()
            .find(|(_, existing)| Arc::ptr_eq(existing, &callback))
        {
            return Subscription(*id);
        }
        let id = inner.next_id;
        inner.next_id += 1;
        inner.listeners[kind.index()].push((id, callback));
        Subscription(id)
    }

    /// Remove one registration. Returns false if the handle was not found
    /// on that channel.
    pub fn off(&self, kind: EventKind, sub: Subscription) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let list = &mut inner.listeners[kind.index()];
        let before = list.len();
        list.retain(|(id, _)| *id != sub.0);
        list.len() != before
    }

    /// Remove every subscriber of a channel.
    pub fn clear(&self, kind: EventKind) {
        let mut inner = self.inner.lock().unwrap();
        inner.listeners[kind.index()].clear();
    }

    /// Number of subscribers on a channel.
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.listeners[kind.index()].len()
    }

    /// Invoke every subscriber of the event's channel, in registration order.
    ///
    /// The subscriber list is snapshotted first, so callbacks may register
    /// or remove subscriptions without deadlocking the bus.
    pub fn emit(&self, event: &Event) {
        let snapshot: Vec<EventCallback> = {
            let inner = self.inner.lock().unwrap();
            inner.listeners[event.kind().index()]
                .iter()
                .map(|(_, cb)| Arc::clone(cb))
                .collect()
        };
        for callback in snapshot {
            if let Err(e) = callback(event) {
                error!("Event callback error ({}): {}", event.kind(), e);
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_callback(counter: Arc<AtomicUsize>) -> EventCallback {
        Arc::new(move |_event: &Event| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn test_emit_reaches_subscriber() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        bus.on(EventKind::Connected, counting_callback(hits.clone()));

        bus.emit(&Event::Connected { ip: "10.0.0.2".into() });
        bus.emit(&Event::Disconnected); // different channel

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_duplicate_registration_is_noop() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let callback = counting_callback(hits.clone());

        let first = bus.on(EventKind::Disconnected, callback.clone());
        let second = bus.on(EventKind::Disconnected, callback);
        assert_eq!(first, second);
        assert_eq!(bus.subscriber_count(EventKind::Disconnected), 1);

        bus.emit(&Event::Disconnected);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_off_removes_only_target() {
        let bus = EventBus::new();
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        let sub_a = bus.on(EventKind::Disconnected, counting_callback(a.clone()));
        bus.on(EventKind::Disconnected, counting_callback(b.clone()));

        assert!(bus.off(EventKind::Disconnected, sub_a));
        assert!(!bus.off(EventKind::Disconnected, sub_a));

        bus.emit(&Event::Disconnected);
        assert_eq!(a.load(Ordering::SeqCst), 0);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clear_removes_all() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        bus.on(EventKind::ApModeStarted, counting_callback(hits.clone()));
        bus.on(EventKind::ApModeStarted, counting_callback(hits.clone()));
        assert_eq!(bus.subscriber_count(EventKind::ApModeStarted), 2);

        bus.clear(EventKind::ApModeStarted);
        bus.emit(&Event::ApModeStarted { ssid: "Setup".into() });
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_erroring_subscriber_does_not_stop_dispatch() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        bus.on(
            EventKind::ConnectionFailed,
            Arc::new(|_| Err("display unavailable".into())),
        );
        bus.on(EventKind::ConnectionFailed, counting_callback(hits.clone()));

        bus.emit(&Event::ConnectionFailed { retry_count: 5 });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_kind_round_trip() {
        for kind in EventKind::ALL {
            assert_eq!(kind.as_str().parse::<EventKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_unknown_event_name_rejected() {
        let err = "rebooted".parse::<EventKind>().unwrap_err();
        assert_eq!(err, EventError::UnknownEvent("rebooted".to_string()));
    }

    #[test]
    fn test_event_kind_mapping() {
        assert_eq!(
            Event::Connected { ip: String::new() }.kind(),
            EventKind::Connected
        );
        assert_eq!(
            Event::StateChange {
                old: ConnectionState::Idle,
                new: ConnectionState::Connecting,
            }
            .kind(),
            EventKind::StateChange
        );
    }
}
