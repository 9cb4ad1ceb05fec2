//! WebSocket stream lifecycle.
//!
//! One connection per Account while it is streaming:
//! connect → subscribe (requesting a fresh `initial-state`) → dispatch
//! frames → on close or error, backoff and reconnect.  Session expiry gets
//! one immediate redial after a refresh; backoff applies from the second
//! consecutive expiry.
//!
//! Transport and protocol errors inside the loop never kill the Account;
//! they route to the backoff path.  Only a persistent credential failure
//! escalates.

use crate::account::{AccountStatus, Shared};
use crate::auth;
use crate::backoff::Backoff;
use crate::command;
use crate::events::AlarmEvent;
use crate::http::HttpError;
use futures_util::{SinkExt, StreamExt};
use pandora_protocol::{ClientFrame, Subscribe, WsFrame};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

pub const WS_PATH: &str = "/api/v4/updates";
pub const PING_INTERVAL: Duration = Duration::from_secs(30);
pub const PONG_TIMEOUT: Duration = Duration::from_secs(10);
pub const BACKOFF_BASE: Duration = Duration::from_secs(1);
pub const BACKOFF_CAP: Duration = Duration::from_secs(120);
/// Connection lifetime after which the backoff resets to base.
pub const STABLE_RESET: Duration = Duration::from_secs(60);

enum StreamExit {
    Shutdown,
    AuthExpired,
    Disconnected,
}

#[derive(Debug, thiserror::Error)]
enum StreamError {
    #[error("http: {0}")]
    Http(HttpError),
    #[error("ws: {0}")]
    Ws(tokio_tungstenite::tungstenite::Error),
    #[error("encode: {0}")]
    Encode(serde_json::Error),
    #[error("no pong within {PONG_TIMEOUT:?}")]
    HeartbeatTimeout,
}

// ---------------------------------------------------------------------------
// Reconnect loop
// ---------------------------------------------------------------------------

pub(crate) async fn run_stream_loop(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let mut backoff = Backoff::new(BACKOFF_BASE, BACKOFF_CAP);
    let mut consecutive_auth_expiries: u32 = 0;

    loop {
        if *shutdown.borrow() {
            break;
        }
        let connected_at = tokio::time::Instant::now();
        match connect_and_stream(&shared, &mut shutdown).await {
            Ok(StreamExit::Shutdown) => break,
            Ok(StreamExit::AuthExpired) => {
                consecutive_auth_expiries += 1;
                info!(consecutive_auth_expiries, "session expired on stream, refreshing");
                match shared.auth.refresh().await {
                    Ok(()) => {}
                    Err(auth::AuthError::BadCredentials)
                        if shared.auth.bad_credential_streak()
                            >= auth::MAX_BAD_CREDENTIAL_REFRESHES =>
                    {
                        warn!("credentials no longer accepted, closing account");
                        shared.set_status(AccountStatus::AuthFailure);
                        break;
                    }
                    Err(e) => warn!(error = %e, "session refresh failed"),
                }
                if consecutive_auth_expiries == 1 {
                    // First expiry redials immediately; only repeats back off.
                    continue;
                }
            }
            Ok(StreamExit::Disconnected) => {
                consecutive_auth_expiries = 0;
                info!("stream disconnected");
            }
            Err(e) => {
                consecutive_auth_expiries = 0;
                warn!(error = %e, "stream error");
            }
        }

        if connected_at.elapsed() >= STABLE_RESET {
            backoff.reset();
        }
        let delay = backoff.next();
        debug!(delay_ms = delay.as_millis() as u64, "reconnecting after backoff");
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Single connection lifecycle
// ---------------------------------------------------------------------------

async fn connect_and_stream(
    shared: &Shared,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<StreamExit, StreamError> {
    let mut ws = match shared.http.open_ws(WS_PATH).await {
        Ok(ws) => ws,
        Err(e) if e.is_auth_expired() => return Ok(StreamExit::AuthExpired),
        Err(e) => return Err(StreamError::Http(e)),
    };

    // Request a full snapshot up front so no device stays stale after a
    // reconnect; deltas only start making sense after it.
    let subscribe = ClientFrame::Subscribe(Subscribe {
        initial_state: true,
    });
    let json = serde_json::to_string(&subscribe).map_err(StreamError::Encode)?;
    ws.send(Message::Text(json.into()))
        .await
        .map_err(StreamError::Ws)?;
    info!("stream subscribed");

    let mut ping = tokio::time::interval_at(
        tokio::time::Instant::now() + PING_INTERVAL,
        PING_INTERVAL,
    );
    let mut pong_due: Option<tokio::time::Instant> = None;

    loop {
        let pong_deadline = async {
            match pong_due {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    let _ = ws.send(Message::Close(None)).await;
                    return Ok(StreamExit::Shutdown);
                }
            }
            () = pong_deadline => return Err(StreamError::HeartbeatTimeout),
            _ = ping.tick() => {
                ws.send(Message::Ping(Vec::new().into())).await.map_err(StreamError::Ws)?;
                if pong_due.is_none() {
                    pong_due = Some(tokio::time::Instant::now() + PONG_TIMEOUT);
                }
            }
            msg = ws.next() => match msg {
                None => return Ok(StreamExit::Disconnected),
                Some(Err(e)) => return Err(StreamError::Ws(e)),
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<WsFrame>(&text) {
                        Ok(frame) => dispatch_frame(shared, frame),
                        // A malformed frame never kills the stream.
                        Err(e) => warn!(error = %e, "frame decode failed"),
                    }
                }
                Some(Ok(Message::Pong(_))) => { pong_due = None; }
                Some(Ok(Message::Ping(data))) => { let _ = ws.send(Message::Pong(data)).await; }
                Some(Ok(Message::Close(frame))) => {
                    if let Some(cf) = &frame {
                        if auth::close_code_indicates_expiry(u16::from(cf.code)) {
                            return Ok(StreamExit::AuthExpired);
                        }
                        info!(code = %cf.code, reason = %cf.reason, "stream closed by server");
                    }
                    return Ok(StreamExit::Disconnected);
                }
                Some(Ok(_)) => {}
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Frame dispatch
// ---------------------------------------------------------------------------

fn dispatch_frame(shared: &Shared, frame: WsFrame) {
    match frame {
        WsFrame::InitialState(snapshot) => {
            debug!(devices = snapshot.devices.len(), "initial-state received");
            for record in &snapshot.devices {
                let device = shared.registry.get_or_create(record.id);
                device.apply_snapshot(record, snapshot.ts);
            }
            shared.store_last_ts(snapshot.ts);
        }
        WsFrame::State(delta) => {
            let device = shared.registry.get_or_create(delta.device_id);
            let changed = device.apply_delta(&delta.fields, delta.ts);
            if !changed.is_empty() {
                debug!(device_id = delta.device_id, ?changed, "delta applied");
            }
        }
        WsFrame::Point(point) => {
            let device = shared.registry.get_or_create(point.device_id);
            device.apply_point(&point);
        }
        WsFrame::Event(frame) => {
            shared.events.publish_alarm(AlarmEvent::from_frame(&frame));
        }
        WsFrame::Command(reply) => command::handle_reply(shared, &reply),
        WsFrame::UpdateSettings(update) => {
            shared
                .events
                .publish_alarm(AlarmEvent::settings_changed(&update));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AccountConfig;
    use pandora_protocol::{DeviceIdentity, DeviceRecord, Field, InitialState, StateDelta, StateFields};

    fn shared() -> Arc<Shared> {
        Shared::new(AccountConfig::new("u", "p")).expect("shared")
    }

    fn record(id: u64) -> DeviceRecord {
        DeviceRecord {
            id,
            identity: DeviceIdentity {
                name: "car".to_owned(),
                model: "DXL".to_owned(),
                firmware: String::new(),
                color: None,
                capabilities: 0,
            },
            state: StateFields {
                fuel: Field::Value(40),
                bit_state: Field::Value(1),
                ..StateFields::default()
            },
            raw: serde_json::Map::new(),
        }
    }

    #[test]
    fn initial_state_creates_devices_and_advances_ts() {
        let shared = shared();
        dispatch_frame(
            &shared,
            WsFrame::InitialState(InitialState {
                ts: 500,
                devices: vec![record(1), record(2)],
            }),
        );
        assert_eq!(shared.registry.device_ids().len(), 2);
        assert_eq!(shared.last_ts(), 500);
        let view = shared.registry.get(1).unwrap().snapshot();
        assert!(view.flags().armed());
    }

    #[test]
    fn state_delta_reaches_the_device_model() {
        let shared = shared();
        dispatch_frame(
            &shared,
            WsFrame::InitialState(InitialState {
                ts: 500,
                devices: vec![record(1)],
            }),
        );
        dispatch_frame(
            &shared,
            WsFrame::State(StateDelta {
                device_id: 1,
                ts: 501,
                fields: StateFields {
                    speed: Field::Value(42.0),
                    ..StateFields::default()
                },
                raw: serde_json::Map::new(),
            }),
        );
        let view = shared.registry.get(1).unwrap().snapshot();
        assert_eq!(view.telemetry.speed, Some(42.0));
        assert_eq!(view.telemetry.fuel, Some(40));
    }

    #[test]
    fn event_frame_reaches_the_alarm_topic() {
        let shared = shared();
        let mut alarms = shared.events.subscribe_alarms();
        dispatch_frame(
            &shared,
            WsFrame::Event(pandora_protocol::EventFrame {
                device_id: 1,
                event_id_primary: 2,
                event_id_secondary: 0,
                ts: 1,
                latitude: None,
                longitude: None,
                gsm_level: None,
                fuel: None,
                exterior_temperature: None,
                engine_temperature: None,
                raw: serde_json::Map::new(),
            }),
        );
        assert_eq!(alarms.try_recv().unwrap().event_type, "unlocking");
    }

    #[test]
    fn point_frame_updates_position() {
        let shared = shared();
        dispatch_frame(
            &shared,
            WsFrame::Point(pandora_protocol::TrackPoint {
                device_id: 7,
                latitude: 55.7,
                longitude: 37.6,
                speed: 60.0,
                direction: 180.0,
                ts: 10,
                raw: serde_json::Map::new(),
            }),
        );
        let view = shared.registry.get(7).unwrap().snapshot();
        assert_eq!(view.telemetry.latitude, Some(55.7));
        assert_eq!(view.telemetry.bearing, Some(180.0));
    }

    #[test]
    fn settings_update_surfaces_as_event() {
        let shared = shared();
        let mut alarms = shared.events.subscribe_alarms();
        dispatch_frame(
            &shared,
            WsFrame::UpdateSettings(pandora_protocol::SettingsUpdate {
                device_id: 7,
                raw: serde_json::Map::new(),
            }),
        );
        assert_eq!(alarms.try_recv().unwrap().event_type, "settings_changed");
    }
}
