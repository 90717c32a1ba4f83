//! System-wide unique identifiers of ports.
//!
//! Every id is drawn from one counter in the registry segment, so ids of
//! different port kinds never collide either.

use std::fmt;

macro_rules! unique_port_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            pub(crate) fn new(value: u64) -> Self {
                Self(value)
            }

            pub fn value(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#x})", stringify!($name), self.0)
            }
        }
    };
}

unique_port_id!(
    /// Identifies a [`Publisher`](crate::publish_subscribe::Publisher).
    UniquePublisherId
);
unique_port_id!(
    /// Identifies a [`Subscriber`](crate::publish_subscribe::Subscriber).
    UniqueSubscriberId
);
unique_port_id!(
    /// Identifies a [`Notifier`](crate::event::Notifier).
    UniqueNotifierId
);
unique_port_id!(
    /// Identifies a [`Listener`](crate::event::Listener).
    UniqueListenerId
);
unique_port_id!(
    /// Identifies a [`Client`](crate::request_response::Client).
    UniqueClientId
);
unique_port_id!(
    /// Identifies a [`Server`](crate::request_response::Server).
    UniqueServerId
);
