//! Outbound HTTP: the remote-call helper for credential endpoints and the
//! externally registered dynamic-params / callback hooks.

pub mod call;
pub mod hooks;

pub use call::{call, check_envelope, JsonMap};
pub use hooks::{Callback, Supplier};
