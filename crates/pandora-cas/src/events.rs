//! Downstream event topics.
//!
//! Two logical topics per Account: `pandora_cas_event` (domain events from
//! the alarm unit) and `pandora_cas_command` (terminated commands).  Both
//! are broadcast channels; publishing with no subscribers is fine.

use pandora_protocol::{CommandId, EventFrame, SettingsUpdate, codifier};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;

const TOPIC_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Payload of the `pandora_cas_event` topic.
///
/// `event_type` is the stable symbolic name from the codifier; the raw
/// `(primary, secondary)` codes are always present so consumers can map
/// pairs the built-in table does not.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlarmEvent {
    pub device_id: u64,
    pub event_id_primary: u32,
    pub event_id_secondary: u32,
    pub title_primary: Option<&'static str>,
    pub title_secondary: Option<&'static str>,
    pub event_type: &'static str,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub gsm_level: Option<u8>,
    pub fuel: Option<u8>,
    pub exterior_temperature: Option<i32>,
    pub engine_temperature: Option<i32>,
}

impl AlarmEvent {
    pub fn from_frame(frame: &EventFrame) -> Self {
        AlarmEvent {
            device_id: frame.device_id,
            event_id_primary: frame.event_id_primary,
            event_id_secondary: frame.event_id_secondary,
            title_primary: codifier::title_primary(frame.event_id_primary),
            title_secondary: codifier::title_secondary(
                frame.event_id_primary,
                frame.event_id_secondary,
            ),
            event_type: codifier::event_type(frame.event_id_primary, frame.event_id_secondary),
            latitude: frame.latitude,
            longitude: frame.longitude,
            gsm_level: frame.gsm_level,
            fuel: frame.fuel,
            exterior_temperature: frame.exterior_temperature,
            engine_temperature: frame.engine_temperature,
        }
    }

    /// An `update-settings` frame surfaced as an event.  The cloud attaches
    /// no code pair to these, so both ids are zero.
    pub fn settings_changed(update: &SettingsUpdate) -> Self {
        AlarmEvent {
            device_id: update.device_id,
            event_id_primary: 0,
            event_id_secondary: 0,
            title_primary: None,
            title_secondary: None,
            event_type: "settings_changed",
            latitude: None,
            longitude: None,
            gsm_level: None,
            fuel: None,
            exterior_temperature: None,
            engine_temperature: None,
        }
    }
}

/// Payload of the `pandora_cas_command` topic.  `result == 0` is success;
/// negative values are client-side terminations (timeout, cancel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CommandEvent {
    pub device_id: u64,
    pub command_id: CommandId,
    pub result: i32,
    pub reply: Option<i32>,
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct EventBus {
    alarm_tx: broadcast::Sender<Arc<AlarmEvent>>,
    command_tx: broadcast::Sender<CommandEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (alarm_tx, _) = broadcast::channel(TOPIC_CAPACITY);
        let (command_tx, _) = broadcast::channel(TOPIC_CAPACITY);
        EventBus {
            alarm_tx,
            command_tx,
        }
    }

    pub fn subscribe_alarms(&self) -> broadcast::Receiver<Arc<AlarmEvent>> {
        self.alarm_tx.subscribe()
    }

    pub fn subscribe_commands(&self) -> broadcast::Receiver<CommandEvent> {
        self.command_tx.subscribe()
    }

    /// The alarm topic as a `Stream`, for `while let` consumers.
    pub fn alarm_stream(&self) -> BroadcastStream<Arc<AlarmEvent>> {
        BroadcastStream::new(self.alarm_tx.subscribe())
    }

    /// The command topic as a `Stream`.
    pub fn command_stream(&self) -> BroadcastStream<CommandEvent> {
        BroadcastStream::new(self.command_tx.subscribe())
    }

    pub fn publish_alarm(&self, event: AlarmEvent) {
        match self.alarm_tx.send(Arc::new(event)) {
            Ok(n) => debug!(receivers = n, "alarm event published"),
            Err(_) => debug!("no alarm subscribers"),
        }
    }

    pub fn publish_command(&self, event: CommandEvent) {
        match self.command_tx.send(event) {
            Ok(n) => debug!(receivers = n, "command event published"),
            Err(_) => debug!("no command subscribers"),
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
    use serde_json::Map;

    fn event_frame(primary: u32, secondary: u32) -> EventFrame {
        EventFrame {
            device_id: 1234,
            event_id_primary: primary,
            event_id_secondary: secondary,
            ts: 1_722_430_000,
            latitude: Some(55.75),
            longitude: Some(37.61),
            gsm_level: Some(3),
            fuel: Some(48),
            exterior_temperature: Some(21),
            engine_temperature: None,
            raw: Map::new(),
        }
    }

    #[test]
    fn alarm_event_codifies_frame() {
        let ev = AlarmEvent::from_frame(&event_frame(3, 4));
        assert_eq!(ev.event_type, "alert_door");
        assert_eq!(ev.title_primary, Some("Alert"));
        assert_eq!(ev.title_secondary, Some("Door opened"));
        assert_eq!(ev.fuel, Some(48));
    }

    #[test]
    fn unknown_codes_keep_raw_ids() {
        let ev = AlarmEvent::from_frame(&event_frame(901, 7));
        assert_eq!(ev.event_type, "unknown");
        assert_eq!(ev.title_primary, None);
        assert_eq!(ev.event_id_primary, 901);
        assert_eq!(ev.event_id_secondary, 7);
    }

    #[test]
    fn publish_and_receive_on_both_topics() {
        let bus = EventBus::new();
        let mut alarms = bus.subscribe_alarms();
        let mut commands = bus.subscribe_commands();

        bus.publish_alarm(AlarmEvent::from_frame(&event_frame(1, 0)));
        bus.publish_command(CommandEvent {
            device_id: 1234,
            command_id: CommandId::LOCK,
            result: 0,
            reply: None,
        });

        assert_eq!(alarms.try_recv().unwrap().event_type, "locking");
        assert_eq!(commands.try_recv().unwrap().result, 0);
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish_command(CommandEvent {
            device_id: 1,
            command_id: CommandId::CHECK,
            result: -1,
            reply: None,
        });
    }
}
