// pandora-cas: session and streaming layer for the Pandora/PanDECT
// vehicle-alarm cloud.
//
// One `Account` per credential pair owns the authenticated session, the
// WebSocket stream, the snapshot poller, and the commander.  External code
// holds the Account and subscribes to devices and event topics.

pub mod account;
pub mod auth;
pub mod backoff;
pub mod command;
pub mod config;
pub mod events;
pub mod http;
pub mod model;
pub mod poller;
pub mod stream;

pub use account::{Account, AccountError, AccountStatus};
pub use auth::{AuthError, Authenticator, Session};
pub use command::{CommandError, CommandOutcome};
pub use config::AccountConfig;
pub use events::{AlarmEvent, CommandEvent, EventBus};
pub use http::{HttpClient, HttpError};
pub use model::{
    Device, DeviceNotification, DeviceRegistry, DeviceSubscription, DeviceView, ListenerHandle,
    Telemetry,
};

pub use pandora_protocol as protocol;
