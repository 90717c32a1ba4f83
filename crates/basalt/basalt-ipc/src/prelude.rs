//! The names most programs need, in one import.

pub use crate::CallbackProgression;
pub use crate::config::{Config, UnableToDeliverStrategy};
pub use crate::event::EventId;
pub use crate::node::{Node, NodeBuilder, NodeEvent, NodeId, NodeName, NodeState};
pub use crate::port::{ConnectionFailure, LoanError, ReceiveError, SendError};
pub use crate::service::{MessagingPattern, Service};
pub use crate::service_name::ServiceName;
