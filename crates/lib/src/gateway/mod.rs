//! Gateway: HTTP callback endpoint and the dispatch loop behind it.
//!
//! Every chatbot event is acknowledged right away; replies are produced by detached dispatch
//! units that are drained on shutdown.

mod dispatch;
mod protocol;
mod server;

pub use dispatch::{DeliveryMode, DispatchError, Dispatcher, APOLOGY, TEXT_ONLY_NOTICE};
pub use protocol::{Ack, STATUS_OK};
pub use server::{build_dispatcher, router, run_gateway, GatewayState};
