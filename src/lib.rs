//! Connectivity monitor that combines passive reachability signals with
//! optional periodic HTTP heartbeats and reports online/offline transitions.

pub mod config;
pub mod connectivity;
pub mod error;
pub mod events;
pub mod heartbeat;
pub mod monitor;

pub use config::{AppConfig, MonitorConfig};
pub use connectivity::{ConnectivitySource, ManualConnectivity, Reachability, SubscriptionId};
pub use error::{ConfigurationError, MonitorError};
pub use events::{ConnectionEvent, EventEmitter, ListenerId};
pub use heartbeat::{default_classifier, HeartbeatResponse, HeartbeatTransport, ReqwestTransport, StatusClassifier};
pub use monitor::{start_monitor, Monitor, MonitorOptions};
