//! Zero-copy inter-process communication over shared memory.
//!
//! Processes attach to a common root directory, create a [`node::Node`] and
//! meet in named services. Three messaging patterns are offered:
//!
//! * [`publish_subscribe`]: publishers loan samples from shared memory, fill
//!   them in place and hand only their slot index to subscribers.
//! * [`request_response`]: clients send requests to every server and receive
//!   a stream of responses per request.
//! * [`event`]: notifiers wake listeners with small event ids.
//!
//! ```no_run
//! use basalt_ipc::prelude::*;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let node = NodeBuilder::new().create()?;
//! let service = node
//!     .service_builder(&ServiceName::new("radar/echo")?)
//!     .publish_subscribe::<u64>()
//!     .open_or_create()?;
//!
//! let publisher = service.publisher_builder().create()?;
//! publisher.send_copy(42)?;
//! # Ok(())
//! # }
//! ```

pub mod event;
mod monitor;
pub mod node;
pub mod port;
pub mod port_id;
pub mod prelude;
pub mod publish_subscribe;
mod registry;
pub mod request_response;
pub mod service;
pub mod service_name;
mod shm;

pub use basalt_config as config;

/// Returned by enumeration callbacks to continue or end the enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackProgression {
    Continue,
    Stop,
}
