//! Alert creation and notification fan-out.

pub mod dispatch;
pub mod engine;

pub use dispatch::{DispatchConfig, DispatchHandle, Dispatcher, OutboundEmail};
pub use engine::AlertEngine;
