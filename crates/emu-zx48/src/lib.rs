//! Cycle-accurate ZX Spectrum 48K machine core.
//!
//! The machine couples a Z80 to the ULA with exact tick accounting: every
//! memory and I/O cycle is stretched by the ULA's contention pattern, the
//! frame is painted in lock-step with the CPU two pixels per tick, and the
//! interrupt is asserted for the first 32 ticks of every frame.
//!
//! The host drives one `Spectrum` per emulated machine: load memory, edit
//! the packed state image, call [`Spectrum::run`], and consume the events
//! bitmap, the screen chunks, and the port-write log it leaves behind.

mod machine;
mod marks;
mod memory;
mod portlog;
mod state;

pub use machine::{Spectrum, StopHandle};
pub use marks::{MarkMap, Marks};
pub use memory::MemoryImage;
pub use portlog::{PORT_LOG_CAPACITY, PortLog, PortWrite};
pub use state::{STATE_IMAGE_SIZE, StateError, StateImage, offsets};

pub use zx_core::{Events, Observable, Value};
