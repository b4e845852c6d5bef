//! Run-loop event bitmap.

use bitflags::bitflags;

bitflags! {
    /// Events produced during `run()` and consumed by the host.
    ///
    /// A non-empty bitmap terminates the execution loop. These are control
    /// flow signals, not errors: the host resumes by clearing the cause
    /// (limit, breakpoint) and calling `run()` again.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Events: u32 {
        /// The host requested a stop via `stop()` or a failed input hook.
        const MACHINE_STOPPED   = 1 << 0;
        /// The tick counter reached the end of the frame.
        const END_OF_FRAME      = 1 << 1;
        /// The `ticks_to_stop` countdown reached zero.
        const TICKS_LIMIT_HIT   = 1 << 2;
        /// The `fetches_to_stop` countdown reached zero.
        const FETCHES_LIMIT_HIT = 1 << 3;
        /// The program counter was set to a breakpoint-marked address.
        const BREAKPOINT_HIT    = 1 << 4;
    }
}
