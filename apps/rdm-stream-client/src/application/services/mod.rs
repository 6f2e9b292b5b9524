//! Application Services
//!
//! - [`MessageDispatcher`]: routes inbound batches through the session

mod dispatcher;

pub use dispatcher::{DispatchOutcome, MessageDispatcher};
