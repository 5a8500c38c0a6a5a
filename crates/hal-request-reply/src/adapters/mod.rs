//! Adapters between the engine and the bus.

pub mod bus_adapter;
pub mod responder;

pub use responder::{Responder, ResponderHandle};
