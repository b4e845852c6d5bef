//! The CPU's view of the machine it is plugged into.

/// Host callbacks for every Z80 machine cycle.
///
/// The CPU sequences cycles; the host accounts ticks and may stretch any of
/// them with contention delays. Base costs the host must charge:
///
/// - `m1_fetch`: 4 ticks (opcode fetch with refresh),
/// - `fetch` / `read` / `write`: 3 ticks,
/// - `input` / `output`: 4 ticks distributed per the host's port timing,
/// - the `*_extra` calls: exactly the named number of idle ticks, each one
///   contended against the address last presented with [`set_addr_bus`]
///   (memory cycles implicitly leave their own address on the bus).
///
/// [`set_addr_bus`]: Bus::set_addr_bus
pub trait Bus {
    /// Account `n` idle ticks.
    fn tick(&mut self, n: u32);

    /// Fetch an operand byte from the instruction stream (3 ticks).
    fn fetch(&mut self, addr: u16) -> u8;

    /// Fetch an opcode byte — an M1 cycle (4 ticks). Called for the first
    /// byte of every instruction and for each prefix byte.
    fn m1_fetch(&mut self, addr: u16) -> u8;

    /// Read a byte from memory (3 ticks).
    fn read(&mut self, addr: u16) -> u8;

    /// Write a byte to memory (3 ticks).
    fn write(&mut self, addr: u16, value: u8);

    /// Read from an I/O port.
    fn input(&mut self, port: u16) -> u8;

    /// Write to an I/O port.
    fn output(&mut self, port: u16, value: u8);

    /// Report the value currently on the address bus, so the idle-tick
    /// helpers know which address to check for contention.
    fn set_addr_bus(&mut self, addr: u16);

    /// One or two idle ticks following a read cycle.
    fn read_extra(&mut self, n: u32);

    /// Two idle ticks following a write cycle.
    fn write_extra_2t(&mut self);

    /// A block of 3-5 internal execution ticks.
    fn exec_extra(&mut self, n: u32);

    /// The program counter was written. The host checks breakpoints here.
    fn set_pc(&mut self, addr: u16);

    /// When true, EI does not suppress interrupt sampling at the next
    /// instruction boundary. Hosts that replay recorded interrupt streams
    /// use this to re-arm an interrupt that was accepted right after EI.
    fn int_allowed_after_ei(&mut self) -> bool {
        false
    }
}
