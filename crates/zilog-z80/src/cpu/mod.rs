//! Z80 CPU state and instruction sequencing.

mod execute;

use crate::bus::Bus;
use crate::registers::{IndexReg, Registers};

/// The Z80 CPU.
///
/// Owns the register file plus the small amount of sequencing state that is
/// not part of any register: the HL/IX/IY redirection selected by a DD/FD
/// prefix, the HALT latch, and the interrupt-suppression latch that EI and
/// the prefixes raise for one instruction boundary.
pub struct Z80 {
    pub regs: Registers,
    /// Which pair HL-flavoured operands resolve to for the next instruction.
    iregp: IndexReg,
    /// Set by HALT; cleared by interrupt acceptance or reset. While halted
    /// the CPU burns one refresh cycle per step without advancing PC.
    halted: bool,
    /// True at the boundary following EI or a DD/FD prefix: the host must
    /// not sample an interrupt before the next instruction.
    int_suppressed: bool,
}

impl Z80 {
    #[must_use]
    pub fn new() -> Self {
        Self {
            regs: Registers {
                sp: 0xFFFF,
                ..Registers::default()
            },
            iregp: IndexReg::Hl,
            halted: false,
            int_suppressed: false,
        }
    }

    /// Reset to power-on state. PC, I, R and the interrupt state clear;
    /// the general-purpose registers are left as they are (undefined on
    /// real hardware).
    pub fn reset(&mut self) {
        self.regs.pc = 0;
        self.regs.i = 0;
        self.regs.r = 0;
        self.regs.iff1 = false;
        self.regs.iff2 = false;
        self.regs.im = 0;
        self.regs.wz = 0;
        self.iregp = IndexReg::Hl;
        self.halted = false;
        self.int_suppressed = false;
    }

    /// Which pair HL-flavoured operands currently resolve to.
    #[must_use]
    pub fn iregp(&self) -> IndexReg {
        self.iregp
    }

    pub fn set_iregp(&mut self, iregp: IndexReg) {
        self.iregp = iregp;
    }

    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Is interrupt sampling suppressed at the current boundary?
    #[must_use]
    pub fn int_suppressed(&self) -> bool {
        self.int_suppressed
    }

    pub fn set_int_suppressed(&mut self, suppressed: bool) {
        self.int_suppressed = suppressed;
    }

    /// Execute one instruction (or one refresh cycle while halted).
    pub fn step(&mut self, bus: &mut impl Bus) {
        self.int_suppressed = false;

        if self.halted {
            // Halted: keep fetching (and discarding) the byte after the
            // HALT, 4 ticks per cycle, PC frozen.
            bus.m1_fetch(self.regs.pc);
            self.regs.inc_r();
            return;
        }

        let opcode = self.fetch_m1(bus);
        match opcode {
            0xDD => {
                self.iregp = IndexReg::Ix;
                self.int_suppressed = true;
            }
            0xFD => {
                self.iregp = IndexReg::Iy;
                self.int_suppressed = true;
            }
            0xCB => {
                self.execute_cb(bus);
                self.iregp = IndexReg::Hl;
            }
            0xED => {
                self.execute_ed(bus);
                self.iregp = IndexReg::Hl;
            }
            _ => {
                self.execute_main(bus, opcode);
                self.iregp = IndexReg::Hl;
            }
        }
    }

    /// Accept a pending maskable interrupt if IFF1 allows it.
    ///
    /// Returns false when interrupts are disabled or suppressed at this
    /// boundary. On acceptance: un-halts, clears both IFFs, and jumps per
    /// the interrupt mode — IM 0/1 to 0x0038 (13 ticks), IM 2 through the
    /// vector at `(I << 8) | 0xFF` (19 ticks). The data bus is assumed to
    /// carry 0xFF, as on a ZX Spectrum.
    pub fn accept_int(&mut self, bus: &mut impl Bus) -> bool {
        if !self.regs.iff1 || self.int_suppressed {
            return false;
        }

        self.halted = false;
        self.regs.iff1 = false;
        self.regs.iff2 = false;
        self.regs.inc_r();

        // Interrupt-acknowledge M1 plus the first internal cycle.
        bus.set_addr_bus(self.regs.pc);
        bus.tick(7);

        let pc = self.regs.pc;
        self.push16(bus, pc);

        let target = if self.regs.im == 2 {
            let vector = (u16::from(self.regs.i) << 8) | 0x00FF;
            let lo = bus.read(vector);
            let hi = bus.read(vector.wrapping_add(1));
            (u16::from(hi) << 8) | u16::from(lo)
        } else {
            0x0038
        };

        self.regs.wz = target;
        self.write_pc(bus, target);
        true
    }

    // === Cycle helpers ===

    /// M1 fetch of the next opcode byte, advancing PC and R.
    fn fetch_m1(&mut self, bus: &mut impl Bus) -> u8 {
        let pc = self.regs.pc;
        let opcode = bus.m1_fetch(pc);
        self.write_pc(bus, pc.wrapping_add(1));
        self.regs.inc_r();
        opcode
    }

    /// Fetch an operand byte, advancing PC.
    fn fetch_imm(&mut self, bus: &mut impl Bus) -> u8 {
        let pc = self.regs.pc;
        let value = bus.fetch(pc);
        self.write_pc(bus, pc.wrapping_add(1));
        value
    }

    /// Fetch a little-endian operand word.
    fn fetch_imm16(&mut self, bus: &mut impl Bus) -> u16 {
        let lo = self.fetch_imm(bus);
        let hi = self.fetch_imm(bus);
        (u16::from(hi) << 8) | u16::from(lo)
    }

    /// Write PC and report it to the host (breakpoint check).
    fn write_pc(&mut self, bus: &mut impl Bus, addr: u16) {
        self.regs.pc = addr;
        bus.set_pc(addr);
    }

    fn push16(&mut self, bus: &mut impl Bus, value: u16) {
        let sp = self.regs.sp.wrapping_sub(1);
        bus.write(sp, (value >> 8) as u8);
        let sp = sp.wrapping_sub(1);
        bus.write(sp, value as u8);
        self.regs.sp = sp;
    }

    fn pop16(&mut self, bus: &mut impl Bus) -> u16 {
        let lo = bus.read(self.regs.sp);
        let hi = bus.read(self.regs.sp.wrapping_add(1));
        self.regs.sp = self.regs.sp.wrapping_add(2);
        (u16::from(hi) << 8) | u16::from(lo)
    }

    /// Value of the pair HL-flavoured operands resolve to.
    fn iregp_val(&self) -> u16 {
        match self.iregp {
            IndexReg::Hl => self.regs.hl(),
            IndexReg::Ix => self.regs.ix,
            IndexReg::Iy => self.regs.iy,
        }
    }

    fn set_iregp_val(&mut self, value: u16) {
        match self.iregp {
            IndexReg::Hl => self.regs.set_hl(value),
            IndexReg::Ix => self.regs.ix = value,
            IndexReg::Iy => self.regs.iy = value,
        }
    }

    /// Resolve an (HL) memory operand: plain HL, or indexed with a fetched
    /// displacement plus the five address-add ticks (contended against the
    /// displacement byte's address). Latches WZ for the indexed forms.
    fn mem_operand_addr(&mut self, bus: &mut impl Bus) -> u16 {
        if self.iregp == IndexReg::Hl {
            return self.regs.hl();
        }
        let d = self.fetch_imm(bus) as i8;
        bus.set_addr_bus(self.regs.pc.wrapping_sub(1));
        bus.exec_extra(5);
        let addr = self.iregp_val().wrapping_add(d as u16);
        self.regs.wz = addr;
        addr
    }

    /// 8-bit register by decode index. `subst` selects whether H/L follow
    /// the active index pair (IXH/IXL); instructions that also address
    /// (IX+d) memory always use the plain halves.
    fn get_r(&self, idx: u8, subst: bool) -> u8 {
        match idx {
            0 => self.regs.b,
            1 => self.regs.c,
            2 => self.regs.d,
            3 => self.regs.e,
            4 if subst => (self.iregp_val() >> 8) as u8,
            4 => self.regs.h,
            5 if subst => self.iregp_val() as u8,
            5 => self.regs.l,
            _ => self.regs.a,
        }
    }

    fn set_r(&mut self, idx: u8, value: u8, subst: bool) {
        match idx {
            0 => self.regs.b = value,
            1 => self.regs.c = value,
            2 => self.regs.d = value,
            3 => self.regs.e = value,
            4 if subst => {
                let v = (self.iregp_val() & 0x00FF) | (u16::from(value) << 8);
                self.set_iregp_val(v);
            }
            4 => self.regs.h = value,
            5 if subst => {
                let v = (self.iregp_val() & 0xFF00) | u16::from(value);
                self.set_iregp_val(v);
            }
            5 => self.regs.l = value,
            _ => self.regs.a = value,
        }
    }

    /// 16-bit register pair by decode index (SP family).
    fn get_rp(&self, idx: u8) -> u16 {
        match idx {
            0 => self.regs.bc(),
            1 => self.regs.de(),
            2 => self.iregp_val(),
            _ => self.regs.sp,
        }
    }

    fn set_rp(&mut self, idx: u8, value: u16) {
        match idx {
            0 => self.regs.set_bc(value),
            1 => self.regs.set_de(value),
            2 => self.set_iregp_val(value),
            _ => self.regs.sp = value,
        }
    }

    /// 16-bit register pair by decode index, never index-substituted.
    /// The ED block ignores DD/FD prefixes entirely.
    fn get_rp_plain(&self, idx: u8) -> u16 {
        match idx {
            0 => self.regs.bc(),
            1 => self.regs.de(),
            2 => self.regs.hl(),
            _ => self.regs.sp,
        }
    }

    fn set_rp_plain(&mut self, idx: u8, value: u16) {
        match idx {
            0 => self.regs.set_bc(value),
            1 => self.regs.set_de(value),
            2 => self.regs.set_hl(value),
            _ => self.regs.sp = value,
        }
    }

    /// Condition code by decode index: NZ, Z, NC, C, PO, PE, P, M.
    fn condition(&self, idx: u8) -> bool {
        use crate::flags::{CF, PF, SF, ZF};
        match idx {
            0 => self.regs.f & ZF == 0,
            1 => self.regs.f & ZF != 0,
            2 => self.regs.f & CF == 0,
            3 => self.regs.f & CF != 0,
            4 => self.regs.f & PF == 0,
            5 => self.regs.f & PF != 0,
            6 => self.regs.f & SF == 0,
            _ => self.regs.f & SF != 0,
        }
    }
}

impl Default for Z80 {
    fn default() -> Self {
        Self::new()
    }
}
