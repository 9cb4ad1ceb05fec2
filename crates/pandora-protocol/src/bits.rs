//! Flag-word expansion for `bit_state` and `can_bit_state`.
//!
//! Both words are positive assertions: a set bit means the condition holds
//! right now, a clear bit means it does not.  That is why merges replace the
//! whole word instead of OR-ing.  The bit positions mirror the alarm
//! vendor's published codification.

use std::collections::BTreeMap;

/// One named bit of a flag word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitSpec {
    pub bit: u8,
    pub name: &'static str,
}

const fn spec(bit: u8, name: &'static str) -> BitSpec {
    BitSpec { bit, name }
}

/// Published bit positions of the 64-bit `bit_state` word.
pub const BIT_STATE_MAP: &[BitSpec] = &[
    spec(0, "armed"),
    spec(1, "alarm_triggered"),
    spec(2, "engine_running"),
    spec(3, "ignition"),
    spec(4, "autostart_pending"),
    spec(5, "immobilizer_active"),
    spec(6, "handsfree_locking"),
    spec(7, "handsfree_unlocking"),
    spec(8, "gsm_connected"),
    spec(9, "gps_active"),
    spec(10, "tracking_enabled"),
    spec(11, "engine_blocked"),
    spec(12, "ext_sensor_alert_zone"),
    spec(13, "ext_sensor_main_zone"),
    spec(14, "shock_sensor_alert_zone"),
    spec(15, "shock_sensor_main_zone"),
    spec(16, "moving"),
    spec(17, "stay_home_mode"),
    spec(18, "preheater_active"),
    spec(19, "active_security"),
    spec(20, "service_mode"),
    spec(21, "door_front_left_open"),
    spec(22, "door_front_right_open"),
    spec(23, "door_rear_left_open"),
    spec(24, "door_rear_right_open"),
    spec(25, "trunk_open"),
    spec(26, "hood_open"),
    spec(27, "handbrake_engaged"),
    spec(28, "brakes_engaged"),
    spec(29, "coolant_heater_active"),
    spec(30, "status_output_enabled"),
    spec(31, "connection_enabled"),
    spec(32, "window_front_left_open"),
    spec(33, "window_front_right_open"),
    spec(34, "window_rear_left_open"),
    spec(35, "window_rear_right_open"),
    spec(36, "evacuation_mode"),
    spec(37, "maintenance_due"),
];

/// Published bit positions of the 32-bit `can_bit_state` word.
///
/// Tire-pressure bits flag "low" per wheel; the raw pressure integers travel
/// in the state payload and are not interpreted here.
pub const CAN_BIT_STATE_MAP: &[BitSpec] = &[
    spec(0, "can_tpms_front_left_low"),
    spec(1, "can_tpms_front_right_low"),
    spec(2, "can_tpms_rear_left_low"),
    spec(3, "can_tpms_rear_right_low"),
    spec(4, "can_glass_front_left_open"),
    spec(5, "can_glass_front_right_open"),
    spec(6, "can_glass_rear_left_open"),
    spec(7, "can_glass_rear_right_open"),
    spec(8, "can_ev_charging"),
    spec(9, "can_ev_charge_port_open"),
    spec(10, "can_low_beam_on"),
    spec(11, "can_high_beam_on"),
    spec(12, "can_seatbelt_driver_fastened"),
    spec(13, "can_sunroof_open"),
];

/// Expand a flag word into a name → bool map using one of the published maps.
pub fn expand_bits(word: u64, map: &[BitSpec]) -> BTreeMap<&'static str, bool> {
    map.iter()
        .map(|s| (s.name, word & (1u64 << s.bit) != 0))
        .collect()
}

// ---------------------------------------------------------------------------
// Typed wrappers
// ---------------------------------------------------------------------------

/// The `bit_state` word with typed accessors for commonly consumed bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StateFlags(pub u64);

impl StateFlags {
    fn bit(self, n: u8) -> bool {
        self.0 & (1u64 << n) != 0
    }

    pub fn armed(self) -> bool {
        self.bit(0)
    }
    pub fn alarm_triggered(self) -> bool {
        self.bit(1)
    }
    pub fn engine_running(self) -> bool {
        self.bit(2)
    }
    pub fn ignition(self) -> bool {
        self.bit(3)
    }
    pub fn tracking_enabled(self) -> bool {
        self.bit(10)
    }
    pub fn engine_blocked(self) -> bool {
        self.bit(11)
    }
    pub fn moving(self) -> bool {
        self.bit(16)
    }
    pub fn active_security(self) -> bool {
        self.bit(19)
    }
    pub fn service_mode(self) -> bool {
        self.bit(20)
    }
    pub fn door_front_left_open(self) -> bool {
        self.bit(21)
    }
    pub fn door_front_right_open(self) -> bool {
        self.bit(22)
    }
    pub fn door_rear_left_open(self) -> bool {
        self.bit(23)
    }
    pub fn door_rear_right_open(self) -> bool {
        self.bit(24)
    }
    pub fn any_door_open(self) -> bool {
        self.0 & (0b1111 << 21) != 0
    }
    pub fn trunk_open(self) -> bool {
        self.bit(25)
    }
    pub fn hood_open(self) -> bool {
        self.bit(26)
    }
    pub fn handbrake_engaged(self) -> bool {
        self.bit(27)
    }
    pub fn coolant_heater_active(self) -> bool {
        self.bit(29)
    }

    pub fn expand(self) -> BTreeMap<&'static str, bool> {
        expand_bits(self.0, BIT_STATE_MAP)
    }
}

/// The `can_bit_state` word with typed accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CanFlags(pub u32);

impl CanFlags {
    fn bit(self, n: u8) -> bool {
        self.0 & (1u32 << n) != 0
    }

    pub fn ev_charging(self) -> bool {
        self.bit(8)
    }
    pub fn any_tpms_low(self) -> bool {
        self.0 & 0b1111 != 0
    }
    pub fn any_glass_open(self) -> bool {
        self.0 & (0b1111 << 4) != 0
    }

    pub fn expand(self) -> BTreeMap<&'static str, bool> {
        expand_bits(u64::from(self.0), CAN_BIT_STATE_MAP)
    }
}
