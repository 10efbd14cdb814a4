pub mod bus;
pub mod types;

pub use bus::{EventBus, SubscriberFn, Subscription};
pub use types::{
    event_types, Event, EventData, EventStats, SubscriptionInfo, SubscriptionStats,
};
