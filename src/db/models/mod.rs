//! Database models split into domain-specific modules.

pub mod common;
pub mod device;
pub mod session;
pub mod webhook;

pub use common::*;
pub use device::*;
pub use session::*;
pub use webhook::*;
