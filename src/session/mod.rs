//! Central session management: token lifecycle, single-flight refresh,
//! idle/expiry tracking and the exactly-once profile load.
//! Keep the public surface thin and split implementation across sub-modules.

pub mod state;
pub mod tokens;
pub mod manager;
pub mod activity;
pub mod user_bridge;

pub use state::{ExpiryNotice, Redirect, SessionCell, SessionState, SharedSession, User, UserStatus, UserWire};
pub use tokens::{SessionGrant, TokenPair, TokenStore};
pub use manager::TokenManager;
pub use activity::{ActivityState, Interaction, MonitorConfig, MonitorHandle};
pub use user_bridge::{DashboardSnapshot, LoadState, UserStoreBridge};
