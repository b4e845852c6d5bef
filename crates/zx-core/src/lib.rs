//! Core types shared by the Spectrum machine and its chips.
//!
//! Two concerns live here: the event bitmap that `run()` returns to the
//! host, and the observability interface that lets a host inspect any
//! component without affecting emulation state.

mod events;
mod observable;

pub use events::Events;
pub use observable::{Observable, Value};
