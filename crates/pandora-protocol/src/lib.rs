// pandora-protocol: Pandora/PanDECT cloud wire types and serialization.
//
// All WebSocket frames use a top-level `type` field with the payload under
// `data`.  The enum variants map 1:1 to the frame kinds the cloud emits.
// Decoding is pure; nothing in this crate performs I/O.

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

pub mod bits;
pub mod codifier;

pub use bits::{BIT_STATE_MAP, CAN_BIT_STATE_MAP, CanFlags, StateFlags, expand_bits};

// ---------------------------------------------------------------------------
// Sparse field wrapper
// ---------------------------------------------------------------------------

/// A field of a sparse state payload.
///
/// The cloud sends only changed keys, so every telemetry field is in one of
/// three states: absent (unchanged), explicit `null` (cleared), or a value.
/// Plain `Option<T>` cannot distinguish the first two, which the merge rules
/// depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field<T> {
    /// Key absent from the payload: the previous value is retained.
    Missing,
    /// Key present as `null`: the value is cleared.
    Null,
    /// Key present with a value.
    Value(T),
}

// Hand-written so `Field<T>: Default` holds without a `T: Default` bound.
impl<T> Default for Field<T> {
    fn default() -> Self {
        Field::Missing
    }
}

impl<T> Field<T> {
    pub fn is_missing(&self) -> bool {
        matches!(self, Field::Missing)
    }

    /// The carried value, if any.
    pub fn value(&self) -> Option<&T> {
        match self {
            Field::Value(v) => Some(v),
            _ => None,
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Field<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Only reached when the key is present: `null` -> Null, value -> Value.
        // Absent keys never hit this path and fall back to Default (Missing).
        Ok(match Option::<T>::deserialize(deserializer)? {
            None => Field::Null,
            Some(v) => Field::Value(v),
        })
    }
}

impl<T: Serialize> Serialize for Field<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            // Missing is normally skipped via skip_serializing_if; if it is
            // serialized anyway it degrades to null.
            Field::Missing | Field::Null => serializer.serialize_none(),
            Field::Value(v) => v.serialize(serializer),
        }
    }
}

// ---------------------------------------------------------------------------
// Device wire types
// ---------------------------------------------------------------------------

/// Identity attributes of one alarm unit.  Mutated only by snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub name: String,
    pub model: String,
    #[serde(default)]
    pub firmware: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Capability bitmask as published by the service; opaque to this crate.
    #[serde(default)]
    pub capabilities: u64,
}

/// Account balance on the device's SIM contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub value: f64,
    pub currency: String,
}

/// Sparse telemetry and flag-word payload shared by snapshots and deltas.
///
/// Every field is independently absent/null/value; see [`Field`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StateFields {
    #[serde(default, skip_serializing_if = "Field::is_missing")]
    pub latitude: Field<f64>,
    #[serde(default, skip_serializing_if = "Field::is_missing")]
    pub longitude: Field<f64>,
    #[serde(default, skip_serializing_if = "Field::is_missing")]
    pub speed: Field<f64>,
    #[serde(default, skip_serializing_if = "Field::is_missing")]
    pub bearing: Field<f64>,
    #[serde(default, skip_serializing_if = "Field::is_missing")]
    pub engine_rpm: Field<u32>,
    #[serde(default, skip_serializing_if = "Field::is_missing")]
    pub voltage: Field<f64>,
    #[serde(default, skip_serializing_if = "Field::is_missing")]
    pub engine_temperature: Field<i32>,
    #[serde(default, skip_serializing_if = "Field::is_missing")]
    pub exterior_temperature: Field<i32>,
    #[serde(default, skip_serializing_if = "Field::is_missing")]
    pub interior_temperature: Field<i32>,
    /// Fuel level in percent.
    #[serde(default, skip_serializing_if = "Field::is_missing")]
    pub fuel: Field<u8>,
    #[serde(default, skip_serializing_if = "Field::is_missing")]
    pub mileage: Field<f64>,
    #[serde(default, skip_serializing_if = "Field::is_missing")]
    pub gsm_level: Field<u8>,
    #[serde(default, skip_serializing_if = "Field::is_missing")]
    pub balance: Field<Balance>,
    /// Unix seconds; monotonic non-decreasing under merge.
    #[serde(default, skip_serializing_if = "Field::is_missing")]
    pub last_online: Field<i64>,
    #[serde(default, skip_serializing_if = "Field::is_missing")]
    pub last_command_at: Field<i64>,
    /// Positive-assertion flag word; always replaced whole, never OR-merged.
    #[serde(default, skip_serializing_if = "Field::is_missing")]
    pub bit_state: Field<u64>,
    /// CAN-sourced flag word (TPMS, EV charge, glass positions).
    #[serde(default, skip_serializing_if = "Field::is_missing")]
    pub can_bit_state: Field<u32>,
}

/// One device entry in a full snapshot (HTTP `updates` or WS `initial-state`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub id: u64,
    #[serde(flatten)]
    pub identity: DeviceIdentity,
    #[serde(flatten)]
    pub state: StateFields,
    /// Keys this crate does not model, preserved for round-trips.
    #[serde(flatten)]
    pub raw: Map<String, Value>,
}

// ---------------------------------------------------------------------------
// WebSocket frames (cloud -> client)
// ---------------------------------------------------------------------------

/// Full snapshot for every device on the account.
///
/// Always the first frame after (re)subscription, so a reconnect replaces
/// rather than patches stale state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialState {
    pub ts: i64,
    pub devices: Vec<DeviceRecord>,
}

/// Delta for a single device.  Absent keys mean "unchanged".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDelta {
    pub device_id: u64,
    pub ts: i64,
    #[serde(flatten)]
    pub fields: StateFields,
    #[serde(flatten)]
    pub raw: Map<String, Value>,
}

/// Domain event with the vendor's `(primary, secondary)` code pair and an
/// optional telemetry sidecar captured at event time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
    pub device_id: u64,
    pub event_id_primary: u32,
    #[serde(default)]
    pub event_id_secondary: u32,
    pub ts: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gsm_level: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fuel: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exterior_temperature: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_temperature: Option<i32>,
    #[serde(flatten)]
    pub raw: Map<String, Value>,
}

/// Asynchronous reply to a submitted command.
///
/// `result == 0` means the unit accepted the command; any other value is a
/// failure with `reply` carrying vendor detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandReply {
    pub device_id: u64,
    pub command_id: u16,
    pub result: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<i32>,
    #[serde(flatten)]
    pub raw: Map<String, Value>,
}

/// GPS track point.  Unlike deltas, every field is always present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    pub device_id: u64,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: f64,
    pub direction: f64,
    pub ts: i64,
    #[serde(flatten)]
    pub raw: Map<String, Value>,
}

/// Opaque settings-changed notification; surfaced as an event downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsUpdate {
    pub device_id: u64,
    #[serde(flatten)]
    pub raw: Map<String, Value>,
}

/// All frame kinds the cloud sends over `WS /api/v4/updates`.
///
/// ```json
/// { "type": "initial-state", "data": { ... } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
#[serde(rename_all = "kebab-case")]
pub enum WsFrame {
    InitialState(InitialState),
    State(StateDelta),
    Event(EventFrame),
    Command(CommandReply),
    Point(TrackPoint),
    UpdateSettings(SettingsUpdate),
}

// ---------------------------------------------------------------------------
// WebSocket frames (client -> cloud)
// ---------------------------------------------------------------------------

/// Subscription request sent as the first frame after connecting.
///
/// `initial_state: true` asks the cloud to lead with a full snapshot before
/// any deltas, which is what makes reconnects safe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscribe {
    pub initial_state: bool,
}

/// Frame kinds the client sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
#[serde(rename_all = "kebab-case")]
pub enum ClientFrame {
    Subscribe(Subscribe),
}

// ---------------------------------------------------------------------------
// HTTP API types
// ---------------------------------------------------------------------------

/// Response to `POST /api/users/login`.
///
/// The session cookie travels in `Set-Cookie`; this body carries the issued
/// `session_id` and the account's user id.  On failure `status != "success"`
/// and `error` names the cause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    pub status: String,
    #[serde(default)]
    pub user_id: u64,
    #[serde(default)]
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response to `GET /api/updates?ts=<last_ts>`.
///
/// Devices are keyed by their numeric id (JSON object keys are strings).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdatesResponse {
    pub ts: i64,
    pub devices: HashMap<String, DeviceRecord>,
}

/// Response to `POST /api/devices/command`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_result: Option<Map<String, Value>>,
}

impl CommandResponse {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }

    /// Vendor failure code from `action_result`, when the POST was rejected.
    pub fn failure_code(&self) -> i32 {
        self.action_result
            .as_ref()
            .and_then(|m| m.get("code"))
            .and_then(Value::as_i64)
            .and_then(|c| i32::try_from(c).ok())
            .unwrap_or(-1)
    }
}

// ---------------------------------------------------------------------------
// Command identifiers
// ---------------------------------------------------------------------------

/// A remote command id.  The numeric id is authoritative; the symbolic names
/// are a convenience for callers and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(pub u16);

impl CommandId {
    pub const LOCK: CommandId = CommandId(1);
    pub const UNLOCK: CommandId = CommandId(2);
    pub const START_ENGINE: CommandId = CommandId(4);
    pub const STOP_ENGINE: CommandId = CommandId(8);
    pub const DISABLE_CONNECTION: CommandId = CommandId(15);
    pub const ENABLE_TRACKING: CommandId = CommandId(16);
    pub const ENABLE_ACTIVE_SECURITY: CommandId = CommandId(17);
    pub const DISABLE_ACTIVE_SECURITY: CommandId = CommandId(18);
    pub const TURN_ON_COOLANT_HEATER: CommandId = CommandId(21);
    pub const TURN_OFF_COOLANT_HEATER: CommandId = CommandId(22);
    pub const TRIGGER_HORN: CommandId = CommandId(23);
    pub const TRIGGER_LIGHT: CommandId = CommandId(24);
    pub const DISABLE_TRACKING: CommandId = CommandId(32);
    pub const TURN_ON_EXT_CHANNEL: CommandId = CommandId(33);
    pub const TURN_OFF_EXT_CHANNEL: CommandId = CommandId(34);
    pub const ENABLE_SERVICE_MODE: CommandId = CommandId(40);
    pub const DISABLE_SERVICE_MODE: CommandId = CommandId(41);
    pub const ENABLE_STATUS_OUTPUT: CommandId = CommandId(48);
    pub const DISABLE_STATUS_OUTPUT: CommandId = CommandId(49);
    pub const ADDITIONAL_COMMAND_1: CommandId = CommandId(100);
    pub const ADDITIONAL_COMMAND_2: CommandId = CommandId(128);
    pub const ENABLE_CONNECTION: CommandId = CommandId(240);
    pub const CHECK: CommandId = CommandId(255);

    const NAMES: &'static [(u16, &'static str)] = &[
        (1, "lock"),
        (2, "unlock"),
        (4, "start_engine"),
        (8, "stop_engine"),
        (15, "disable_connection"),
        (16, "enable_tracking"),
        (17, "enable_active_security"),
        (18, "disable_active_security"),
        (21, "turn_on_coolant_heater"),
        (22, "turn_off_coolant_heater"),
        (23, "trigger_horn"),
        (24, "trigger_light"),
        (32, "disable_tracking"),
        (33, "turn_on_ext_channel"),
        (34, "turn_off_ext_channel"),
        (40, "enable_service_mode"),
        (41, "disable_service_mode"),
        (48, "enable_status_output"),
        (49, "disable_status_output"),
        (100, "additional_command_1"),
        (128, "additional_command_2"),
        (240, "enable_connection"),
        (255, "check"),
    ];

    /// Symbolic name for a known id.
    pub fn name(self) -> Option<&'static str> {
        Self::NAMES
            .iter()
            .find(|(id, _)| *id == self.0)
            .map(|(_, n)| *n)
    }

    /// Resolve a symbolic alias back to its id.
    pub fn from_name(name: &str) -> Option<CommandId> {
        Self::NAMES
            .iter()
            .find(|(_, n)| *n == name)
            .map(|(id, _)| CommandId(*id))
    }
}

impl std::fmt::Display for CommandId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.name() {
            Some(n) => write!(f, "{} ({})", n, self.0),
            None => write!(f, "{}", self.0),
        }
    }
}
