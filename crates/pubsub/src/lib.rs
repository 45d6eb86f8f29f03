//! Subscription broadcast engine.
//!
//! [`SubscriptionRegistry`] tracks who wants what, [`ConnectionHub`] tracks
//! who is connected and fans notifications out, and [`EventPoller`] watches
//! the upstream node and feeds the hub.

pub mod filter;
pub mod hub;
pub mod poller;
pub mod registry;
pub mod session;

pub use filter::{matches, LogFilter, SubscriptionFilter};
pub use hub::{notification, ConnectionHub, HubStats};
pub use poller::{evaluate_sync, BlockCursor, EventPoller, PollerConfig};
pub use registry::{generate_subscription_id, Subscription, SubscriptionKind, SubscriptionRegistry};
pub use session::{ClientInfo, ClientSession};
