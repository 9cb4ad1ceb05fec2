//! Event codification: `(primary, secondary)` code pairs to stable names.
//!
//! The vendor's table is large and only partly documented; pairs with no
//! entry here codify as `"unknown"`.  Raw codes always travel alongside the
//! symbolic name in downstream payloads, so consumers can map what this
//! table cannot.

/// Stable symbolic event type for a `(primary, secondary)` code pair.
pub fn event_type(primary: u32, secondary: u32) -> &'static str {
    match (primary, secondary) {
        (1, _) => "locking",
        (2, _) => "unlocking",
        (3, 4) => "alert_door",
        (3, 5) => "alert_hood",
        (3, 6) => "alert_trunk",
        (3, 7) => "alert_ignition",
        (3, _) => "alert",
        (4, _) => "engine_started",
        (5, _) => "engine_stopped",
        (6, _) => "engine_blocked",
        (8, 1) => "service_mode_enabled",
        (8, 2) => "service_mode_disabled",
        (8, _) => "service_mode",
        (9, _) => "settings_changed",
        (10, _) => "gsm_connection",
        (12, _) => "low_battery",
        (15, _) => "status_check",
        (16, _) => "firmware_update",
        (17, _) => "active_security",
        (18, _) => "preheater",
        (19, _) => "scheduled_task",
        (20, _) => "evacuation_mode",
        _ => "unknown",
    }
}

/// Human-readable title for a primary code.
pub fn title_primary(primary: u32) -> Option<&'static str> {
    Some(match primary {
        1 => "Locking",
        2 => "Unlocking",
        3 => "Alert",
        4 => "Engine started",
        5 => "Engine stopped",
        6 => "Engine blocked",
        8 => "Service mode",
        9 => "Settings changed",
        10 => "GSM connection",
        12 => "Low battery",
        15 => "Status check",
        16 => "Firmware update",
        17 => "Active security",
        18 => "Preheater",
        19 => "Scheduled task",
        20 => "Evacuation mode",
        _ => return None,
    })
}

/// Human-readable title for a secondary code, where the primary has
/// documented refinements.
pub fn title_secondary(primary: u32, secondary: u32) -> Option<&'static str> {
    Some(match (primary, secondary) {
        (3, 1) => "Shock sensor",
        (3, 2) => "Tilt sensor",
        (3, 3) => "Motion sensor",
        (3, 4) => "Door opened",
        (3, 5) => "Hood opened",
        (3, 6) => "Trunk opened",
        (3, 7) => "Ignition on",
        (8, 1) => "Enabled",
        (8, 2) => "Disabled",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_primary_codes_resolve() {
        assert_eq!(event_type(1, 0), "locking");
        assert_eq!(event_type(4, 0), "engine_started");
        assert_eq!(event_type(9, 3), "settings_changed");
    }

    #[test]
    fn secondary_refines_alerts() {
        assert_eq!(event_type(3, 4), "alert_door");
        assert_eq!(event_type(3, 99), "alert");
    }

    #[test]
    fn unknown_pairs_codify_as_unknown() {
        assert_eq!(event_type(999, 0), "unknown");
        assert_eq!(title_primary(999), None);
        assert_eq!(title_secondary(1, 1), None);
    }

    #[test]
    fn titles_exist_for_every_typed_primary() {
        for primary in [1, 2, 3, 4, 5, 6, 8, 9, 10, 12, 15, 16, 17, 18, 19, 20] {
            assert_ne!(event_type(primary, 0), "unknown");
            assert!(title_primary(primary).is_some(), "primary {primary}");
        }
    }
}
