//! External collaborators: routing, weather/traffic, route history and
//! notifications. Each sits behind an async trait so the tracker can be run
//! against in-memory stand-ins.

pub mod conditions;
pub mod history;
pub mod notifier;
pub mod routing;

pub use conditions::{Conditions, ConditionsProvider, FixedConditions};
pub use history::{HistoryProvider, InMemoryHistory};
pub use notifier::{
    ChannelNotifier, FanoutNotifier, LogNotifier, Notification, Notifier, WebhookNotifier,
};
pub use routing::{GreatCircleRouting, RouteTable, RoutingProvider};
