//! Instruction execution for the Z80.

use crate::alu;
use crate::bus::Bus;
use crate::flags::{CF, HF, NF, PF, SF, XF, YF, ZF, parity, sz53, sz53p};
use crate::registers::IndexReg;

use super::Z80;

impl Z80 {
    // =========================================================================
    // Unprefixed instructions
    // =========================================================================

    /// Execute an unprefixed instruction (prefix bytes are handled by the
    /// caller and never reach this function).
    pub(super) fn execute_main(&mut self, bus: &mut impl Bus, op: u8) {
        match op {
            // NOP
            0x00 => {}

            // LD rr, nn (01=BC, 11=DE, 21=HL, 31=SP)
            0x01 | 0x11 | 0x21 | 0x31 => {
                let value = self.fetch_imm16(bus);
                self.set_rp((op >> 4) & 3, value);
            }

            // LD (BC), A
            0x02 => {
                let addr = self.regs.bc();
                self.regs.wz =
                    (u16::from(self.regs.a) << 8) | (addr.wrapping_add(1) & 0x00FF);
                bus.write(addr, self.regs.a);
            }

            // INC rr (03=BC, 13=DE, 23=HL, 33=SP)
            0x03 | 0x13 | 0x23 | 0x33 => {
                bus.set_addr_bus(self.regs.ir());
                bus.read_extra(2);
                let rp = (op >> 4) & 3;
                let value = self.get_rp(rp).wrapping_add(1);
                self.set_rp(rp, value);
            }

            // INC r (04=B, 0C=C, 14=D, 1C=E, 24=H, 2C=L, 3C=A)
            0x04 | 0x0C | 0x14 | 0x1C | 0x24 | 0x2C | 0x3C => {
                let r = (op >> 3) & 7;
                let result = alu::inc8(self.get_r(r, true));
                self.set_r(r, result.value, true);
                self.regs.f = (self.regs.f & CF) | result.flags;
            }

            // DEC r (05=B, 0D=C, 15=D, 1D=E, 25=H, 2D=L, 3D=A)
            0x05 | 0x0D | 0x15 | 0x1D | 0x25 | 0x2D | 0x3D => {
                let r = (op >> 3) & 7;
                let result = alu::dec8(self.get_r(r, true));
                self.set_r(r, result.value, true);
                self.regs.f = (self.regs.f & CF) | result.flags;
            }

            // LD r, n (06=B, 0E=C, 16=D, 1E=E, 26=H, 2E=L, 3E=A)
            0x06 | 0x0E | 0x16 | 0x1E | 0x26 | 0x2E | 0x3E => {
                let value = self.fetch_imm(bus);
                self.set_r((op >> 3) & 7, value, true);
            }

            // RLCA
            0x07 => {
                let carry = self.regs.a >> 7;
                self.regs.a = (self.regs.a << 1) | carry;
                self.regs.f = (self.regs.f & (SF | ZF | PF))
                    | (self.regs.a & (YF | XF))
                    | carry;
            }

            // EX AF, AF'
            0x08 => {
                core::mem::swap(&mut self.regs.a, &mut self.regs.a_alt);
                core::mem::swap(&mut self.regs.f, &mut self.regs.f_alt);
            }

            // ADD HL, rr (09=BC, 19=DE, 29=HL, 39=SP)
            0x09 | 0x19 | 0x29 | 0x39 => {
                bus.set_addr_bus(self.regs.ir());
                bus.exec_extra(4);
                bus.exec_extra(3);
                let hl = self.iregp_val();
                let rr = self.get_rp((op >> 4) & 3);
                self.regs.wz = hl.wrapping_add(1);
                let (value, flags) = alu::add16(hl, rr);
                self.set_iregp_val(value);
                self.regs.f = (self.regs.f & (SF | ZF | PF)) | flags;
            }

            // LD A, (BC)
            0x0A => {
                let addr = self.regs.bc();
                self.regs.wz = addr.wrapping_add(1);
                self.regs.a = bus.read(addr);
            }

            // DEC rr (0B=BC, 1B=DE, 2B=HL, 3B=SP)
            0x0B | 0x1B | 0x2B | 0x3B => {
                bus.set_addr_bus(self.regs.ir());
                bus.read_extra(2);
                let rp = (op >> 4) & 3;
                let value = self.get_rp(rp).wrapping_sub(1);
                self.set_rp(rp, value);
            }

            // RRCA
            0x0F => {
                let carry = self.regs.a & 1;
                self.regs.a = (self.regs.a >> 1) | (carry << 7);
                self.regs.f = (self.regs.f & (SF | ZF | PF))
                    | (self.regs.a & (YF | XF))
                    | carry;
            }

            // DJNZ e
            0x10 => {
                bus.set_addr_bus(self.regs.ir());
                bus.read_extra(1);
                let d = self.fetch_imm(bus) as i8;
                self.regs.b = self.regs.b.wrapping_sub(1);
                if self.regs.b != 0 {
                    bus.set_addr_bus(self.regs.pc.wrapping_sub(1));
                    bus.exec_extra(5);
                    let target = self.regs.pc.wrapping_add(d as u16);
                    self.regs.wz = target;
                    self.write_pc(bus, target);
                }
            }

            // LD (DE), A
            0x12 => {
                let addr = self.regs.de();
                self.regs.wz =
                    (u16::from(self.regs.a) << 8) | (addr.wrapping_add(1) & 0x00FF);
                bus.write(addr, self.regs.a);
            }

            // RLA
            0x17 => {
                let old_carry = self.regs.f & CF;
                let new_carry = self.regs.a >> 7;
                self.regs.a = (self.regs.a << 1) | old_carry;
                self.regs.f = (self.regs.f & (SF | ZF | PF))
                    | (self.regs.a & (YF | XF))
                    | new_carry;
            }

            // JR e
            0x18 => {
                let d = self.fetch_imm(bus) as i8;
                bus.set_addr_bus(self.regs.pc.wrapping_sub(1));
                bus.exec_extra(5);
                let target = self.regs.pc.wrapping_add(d as u16);
                self.regs.wz = target;
                self.write_pc(bus, target);
            }

            // LD A, (DE)
            0x1A => {
                let addr = self.regs.de();
                self.regs.wz = addr.wrapping_add(1);
                self.regs.a = bus.read(addr);
            }

            // RRA
            0x1F => {
                let old_carry = self.regs.f & CF;
                let new_carry = self.regs.a & 1;
                self.regs.a = (self.regs.a >> 1) | (old_carry << 7);
                self.regs.f = (self.regs.f & (SF | ZF | PF))
                    | (self.regs.a & (YF | XF))
                    | new_carry;
            }

            // JR cc, e (20=NZ, 28=Z, 30=NC, 38=C)
            0x20 | 0x28 | 0x30 | 0x38 => {
                let d = self.fetch_imm(bus) as i8;
                if self.condition(((op >> 3) & 7) - 4) {
                    bus.set_addr_bus(self.regs.pc.wrapping_sub(1));
                    bus.exec_extra(5);
                    let target = self.regs.pc.wrapping_add(d as u16);
                    self.regs.wz = target;
                    self.write_pc(bus, target);
                }
            }

            // LD (nn), HL
            0x22 => {
                let addr = self.fetch_imm16(bus);
                self.regs.wz = addr.wrapping_add(1);
                let value = self.iregp_val();
                bus.write(addr, value as u8);
                bus.write(addr.wrapping_add(1), (value >> 8) as u8);
            }

            // DAA
            0x27 => {
                let a = self.regs.a;
                let nf = self.regs.f & NF != 0;
                let cf = self.regs.f & CF != 0;
                let hf = self.regs.f & HF != 0;

                let mut correction: u8 = 0;
                let mut new_cf = cf;

                if hf || (a & 0x0F) > 9 {
                    correction |= 0x06;
                }
                if cf || a > 0x99 {
                    correction |= 0x60;
                    new_cf = true;
                }

                let value = if nf {
                    a.wrapping_sub(correction)
                } else {
                    a.wrapping_add(correction)
                };

                let new_hf = if nf {
                    hf && (a & 0x0F) < 6
                } else {
                    (a & 0x0F) > 9
                };

                self.regs.a = value;
                self.regs.f = sz53p(value)
                    | if nf { NF } else { 0 }
                    | if new_cf { CF } else { 0 }
                    | if new_hf { HF } else { 0 };
            }

            // LD HL, (nn)
            0x2A => {
                let addr = self.fetch_imm16(bus);
                self.regs.wz = addr.wrapping_add(1);
                let lo = bus.read(addr);
                let hi = bus.read(addr.wrapping_add(1));
                self.set_iregp_val((u16::from(hi) << 8) | u16::from(lo));
            }

            // CPL
            0x2F => {
                self.regs.a = !self.regs.a;
                self.regs.f = (self.regs.f & (SF | ZF | PF | CF))
                    | HF
                    | NF
                    | (self.regs.a & (XF | YF));
            }

            // LD (nn), A
            0x32 => {
                let addr = self.fetch_imm16(bus);
                self.regs.wz =
                    (u16::from(self.regs.a) << 8) | (addr.wrapping_add(1) & 0x00FF);
                bus.write(addr, self.regs.a);
            }

            // INC (HL) / INC (IX+d)
            0x34 => {
                let addr = self.mem_operand_addr(bus);
                let value = bus.read(addr);
                bus.read_extra(1);
                let result = alu::inc8(value);
                self.regs.f = (self.regs.f & CF) | result.flags;
                bus.write(addr, result.value);
            }

            // DEC (HL) / DEC (IX+d)
            0x35 => {
                let addr = self.mem_operand_addr(bus);
                let value = bus.read(addr);
                bus.read_extra(1);
                let result = alu::dec8(value);
                self.regs.f = (self.regs.f & CF) | result.flags;
                bus.write(addr, result.value);
            }

            // LD (HL), n / LD (IX+d), n
            0x36 => {
                if self.iregp() == IndexReg::Hl {
                    let value = self.fetch_imm(bus);
                    bus.write(self.regs.hl(), value);
                } else {
                    // Indexed form fetches d and n back to back; the address
                    // add overlaps the operand fetch, leaving only 2 idle
                    // ticks after n.
                    let d = self.fetch_imm(bus) as i8;
                    let value = self.fetch_imm(bus);
                    bus.set_addr_bus(self.regs.pc.wrapping_sub(1));
                    bus.read_extra(2);
                    let addr = self.iregp_val().wrapping_add(d as u16);
                    self.regs.wz = addr;
                    bus.write(addr, value);
                }
            }

            // SCF
            0x37 => {
                self.regs.f = (self.regs.f & (SF | ZF | PF))
                    | CF
                    | (self.regs.a & (XF | YF));
            }

            // LD A, (nn)
            0x3A => {
                let addr = self.fetch_imm16(bus);
                self.regs.wz = addr.wrapping_add(1);
                self.regs.a = bus.read(addr);
            }

            // CCF
            0x3F => {
                let old_carry = self.regs.f & CF;
                self.regs.f = (self.regs.f & (SF | ZF | PF))
                    | (old_carry << 4)
                    | ((old_carry ^ CF) & CF)
                    | (self.regs.a & (XF | YF));
            }

            // HALT
            0x76 => {
                self.halted = true;
            }

            // LD r, r' (0x40-0x7F minus HALT)
            0x40..=0x7F => {
                let dst = (op >> 3) & 7;
                let src = op & 7;
                if src == 6 {
                    let addr = self.mem_operand_addr(bus);
                    let value = bus.read(addr);
                    self.set_r(dst, value, false);
                } else if dst == 6 {
                    let addr = self.mem_operand_addr(bus);
                    let value = self.get_r(src, false);
                    bus.write(addr, value);
                } else {
                    let value = self.get_r(src, true);
                    self.set_r(dst, value, true);
                }
            }

            // ALU A, r (ADD/ADC/SUB/SBC/AND/XOR/OR/CP by bits 5-3)
            0x80..=0xBF => {
                let src = op & 7;
                let operand = if src == 6 {
                    let addr = self.mem_operand_addr(bus);
                    bus.read(addr)
                } else {
                    self.get_r(src, true)
                };
                self.alu_acc((op >> 3) & 7, operand);
            }

            // RET cc
            0xC0 | 0xC8 | 0xD0 | 0xD8 | 0xE0 | 0xE8 | 0xF0 | 0xF8 => {
                bus.set_addr_bus(self.regs.ir());
                bus.read_extra(1);
                if self.condition((op >> 3) & 7) {
                    let target = self.pop16(bus);
                    self.regs.wz = target;
                    self.write_pc(bus, target);
                }
            }

            // POP rr (C1=BC, D1=DE, E1=HL, F1=AF)
            0xC1 | 0xD1 | 0xE1 | 0xF1 => {
                let value = self.pop16(bus);
                self.set_rp2((op >> 4) & 3, value);
            }

            // JP cc, nn
            0xC2 | 0xCA | 0xD2 | 0xDA | 0xE2 | 0xEA | 0xF2 | 0xFA => {
                let target = self.fetch_imm16(bus);
                self.regs.wz = target;
                if self.condition((op >> 3) & 7) {
                    self.write_pc(bus, target);
                }
            }

            // JP nn
            0xC3 => {
                let target = self.fetch_imm16(bus);
                self.regs.wz = target;
                self.write_pc(bus, target);
            }

            // CALL cc, nn
            0xC4 | 0xCC | 0xD4 | 0xDC | 0xE4 | 0xEC | 0xF4 | 0xFC => {
                let target = self.fetch_imm16(bus);
                self.regs.wz = target;
                if self.condition((op >> 3) & 7) {
                    bus.set_addr_bus(self.regs.pc.wrapping_sub(1));
                    bus.read_extra(1);
                    let ret = self.regs.pc;
                    self.push16(bus, ret);
                    self.write_pc(bus, target);
                }
            }

            // PUSH rr (C5=BC, D5=DE, E5=HL, F5=AF)
            0xC5 | 0xD5 | 0xE5 | 0xF5 => {
                bus.set_addr_bus(self.regs.ir());
                bus.read_extra(1);
                let value = self.get_rp2((op >> 4) & 3);
                self.push16(bus, value);
            }

            // ALU A, n
            0xC6 | 0xCE | 0xD6 | 0xDE | 0xE6 | 0xEE | 0xF6 | 0xFE => {
                let operand = self.fetch_imm(bus);
                self.alu_acc((op >> 3) & 7, operand);
            }

            // RST p
            0xC7 | 0xCF | 0xD7 | 0xDF | 0xE7 | 0xEF | 0xF7 | 0xFF => {
                bus.set_addr_bus(self.regs.ir());
                bus.read_extra(1);
                let ret = self.regs.pc;
                self.push16(bus, ret);
                let target = u16::from(op & 0x38);
                self.regs.wz = target;
                self.write_pc(bus, target);
            }

            // RET
            0xC9 => {
                let target = self.pop16(bus);
                self.regs.wz = target;
                self.write_pc(bus, target);
            }

            // CALL nn
            0xCD => {
                let target = self.fetch_imm16(bus);
                self.regs.wz = target;
                bus.set_addr_bus(self.regs.pc.wrapping_sub(1));
                bus.read_extra(1);
                let ret = self.regs.pc;
                self.push16(bus, ret);
                self.write_pc(bus, target);
            }

            // OUT (n), A
            0xD3 => {
                let n = self.fetch_imm(bus);
                let port = (u16::from(self.regs.a) << 8) | u16::from(n);
                self.regs.wz = (u16::from(self.regs.a) << 8)
                    | u16::from(n.wrapping_add(1));
                bus.output(port, self.regs.a);
            }

            // EXX
            0xD9 => {
                core::mem::swap(&mut self.regs.b, &mut self.regs.b_alt);
                core::mem::swap(&mut self.regs.c, &mut self.regs.c_alt);
                core::mem::swap(&mut self.regs.d, &mut self.regs.d_alt);
                core::mem::swap(&mut self.regs.e, &mut self.regs.e_alt);
                core::mem::swap(&mut self.regs.h, &mut self.regs.h_alt);
                core::mem::swap(&mut self.regs.l, &mut self.regs.l_alt);
            }

            // IN A, (n)
            0xDB => {
                let n = self.fetch_imm(bus);
                let port = (u16::from(self.regs.a) << 8) | u16::from(n);
                self.regs.wz = port.wrapping_add(1);
                self.regs.a = bus.input(port);
            }

            // EX (SP), HL
            0xE3 => {
                let sp = self.regs.sp;
                let lo = bus.read(sp);
                let hi = bus.read(sp.wrapping_add(1));
                bus.read_extra(1);
                let value = self.iregp_val();
                bus.write(sp.wrapping_add(1), (value >> 8) as u8);
                bus.write(sp, value as u8);
                bus.write_extra_2t();
                let swapped = (u16::from(hi) << 8) | u16::from(lo);
                self.regs.wz = swapped;
                self.set_iregp_val(swapped);
            }

            // JP (HL)
            0xE9 => {
                let target = self.iregp_val();
                self.write_pc(bus, target);
            }

            // EX DE, HL (always the real HL, even under DD/FD)
            0xEB => {
                core::mem::swap(&mut self.regs.d, &mut self.regs.h);
                core::mem::swap(&mut self.regs.e, &mut self.regs.l);
            }

            // DI
            0xF3 => {
                self.regs.iff1 = false;
                self.regs.iff2 = false;
            }

            // LD SP, HL
            0xF9 => {
                bus.set_addr_bus(self.regs.ir());
                bus.read_extra(2);
                self.regs.sp = self.iregp_val();
            }

            // EI
            0xFB => {
                self.regs.iff1 = true;
                self.regs.iff2 = true;
                if !bus.int_allowed_after_ei() {
                    self.int_suppressed = true;
                }
            }

            _ => unreachable!("prefix byte {op:#04X} reached execute_main"),
        }
    }

    /// One of the eight accumulator ALU operations, by decode index.
    fn alu_acc(&mut self, which: u8, operand: u8) {
        let a = self.regs.a;
        let carry = self.regs.f & CF != 0;
        match which {
            0 => {
                let r = alu::add8(a, operand, false);
                self.regs.a = r.value;
                self.regs.f = r.flags;
            }
            1 => {
                let r = alu::add8(a, operand, carry);
                self.regs.a = r.value;
                self.regs.f = r.flags;
            }
            2 => {
                let r = alu::sub8(a, operand, false);
                self.regs.a = r.value;
                self.regs.f = r.flags;
            }
            3 => {
                let r = alu::sub8(a, operand, carry);
                self.regs.a = r.value;
                self.regs.f = r.flags;
            }
            4 => {
                let r = alu::and8(a, operand);
                self.regs.a = r.value;
                self.regs.f = r.flags;
            }
            5 => {
                let r = alu::xor8(a, operand);
                self.regs.a = r.value;
                self.regs.f = r.flags;
            }
            6 => {
                let r = alu::or8(a, operand);
                self.regs.a = r.value;
                self.regs.f = r.flags;
            }
            _ => {
                self.regs.f = alu::cp8(a, operand);
            }
        }
    }

    /// 16-bit register pair for PUSH/POP decode (AF family).
    fn get_rp2(&self, idx: u8) -> u16 {
        match idx {
            0 => self.regs.bc(),
            1 => self.regs.de(),
            2 => self.iregp_val(),
            _ => self.regs.af(),
        }
    }

    fn set_rp2(&mut self, idx: u8, value: u16) {
        match idx {
            0 => self.regs.set_bc(value),
            1 => self.regs.set_de(value),
            2 => self.set_iregp_val(value),
            _ => self.regs.set_af(value),
        }
    }

    // =========================================================================
    // CB prefix: rotates, shifts, bit operations
    // =========================================================================

    pub(super) fn execute_cb(&mut self, bus: &mut impl Bus) {
        if self.iregp() == IndexReg::Hl {
            let op = self.fetch_m1(bus);
            let z = op & 7;
            if z == 6 {
                let addr = self.regs.hl();
                let value = bus.read(addr);
                bus.read_extra(1);
                if op >> 6 == 1 {
                    // BIT n,(HL): X/Y leak from WZ, not the operand
                    let flags = alu::bit(value, (op >> 3) & 7);
                    self.regs.f = (self.regs.f & CF)
                        | (flags & !(XF | YF))
                        | ((self.regs.wz >> 8) as u8 & (XF | YF));
                } else {
                    let result = self.cb_apply(op, value);
                    bus.write(addr, result);
                }
            } else if op >> 6 == 1 {
                let value = self.get_r(z, false);
                self.regs.f = (self.regs.f & CF) | alu::bit(value, (op >> 3) & 7);
            } else {
                let value = self.get_r(z, false);
                let result = self.cb_apply(op, value);
                self.set_r(z, result, false);
            }
        } else {
            // DD CB d op: every operation targets (IX+d); the non-BIT forms
            // additionally copy the result into the register selected by the
            // low bits (undocumented).
            let d = self.fetch_imm(bus) as i8;
            let addr = self.iregp_val().wrapping_add(d as u16);
            self.regs.wz = addr;

            // The final opcode byte is a plain 3-tick fetch (no refresh)
            // stretched by two idle ticks.
            let pc = self.regs.pc;
            let op = bus.fetch(pc);
            self.write_pc(bus, pc.wrapping_add(1));
            bus.set_addr_bus(pc);
            bus.read_extra(2);

            let value = bus.read(addr);
            bus.read_extra(1);
            if op >> 6 == 1 {
                let flags = alu::bit(value, (op >> 3) & 7);
                self.regs.f = (self.regs.f & CF)
                    | (flags & !(XF | YF))
                    | ((addr >> 8) as u8 & (XF | YF));
            } else {
                let result = self.cb_apply(op, value);
                bus.write(addr, result);
                if op & 7 != 6 {
                    self.set_r(op & 7, result, false);
                }
            }
        }
    }

    /// Apply a CB rotate/shift/RES/SET to a value. Rotates and shifts update
    /// the flags; RES/SET leave them alone.
    fn cb_apply(&mut self, op: u8, value: u8) -> u8 {
        match op >> 6 {
            0 => {
                let carry = self.regs.f & CF != 0;
                let result = match (op >> 3) & 7 {
                    0 => alu::rlc(value),
                    1 => alu::rrc(value),
                    2 => alu::rl(value, carry),
                    3 => alu::rr(value, carry),
                    4 => alu::sla(value),
                    5 => alu::sra(value),
                    6 => alu::sll(value),
                    _ => alu::srl(value),
                };
                self.regs.f = result.flags;
                result.value
            }
            2 => value & !(1 << ((op >> 3) & 7)),
            _ => value | (1 << ((op >> 3) & 7)),
        }
    }

    // =========================================================================
    // ED prefix
    // =========================================================================

    pub(super) fn execute_ed(&mut self, bus: &mut impl Bus) {
        let op = self.fetch_m1(bus);
        match op {
            // IN r, (C) — r=6 is the flags-only IN (C)
            0x40 | 0x48 | 0x50 | 0x58 | 0x60 | 0x68 | 0x70 | 0x78 => {
                let port = self.regs.bc();
                self.regs.wz = port.wrapping_add(1);
                let value = bus.input(port);
                self.regs.f = (self.regs.f & CF) | sz53p(value);
                let r = (op >> 3) & 7;
                if r != 6 {
                    self.set_r(r, value, false);
                }
            }

            // OUT (C), r — r=6 is the undocumented OUT (C),0
            0x41 | 0x49 | 0x51 | 0x59 | 0x61 | 0x69 | 0x71 | 0x79 => {
                let port = self.regs.bc();
                self.regs.wz = port.wrapping_add(1);
                let r = (op >> 3) & 7;
                let value = if r == 6 { 0 } else { self.get_r(r, false) };
                bus.output(port, value);
            }

            // SBC HL, rr
            0x42 | 0x52 | 0x62 | 0x72 => {
                bus.set_addr_bus(self.regs.ir());
                bus.exec_extra(4);
                bus.exec_extra(3);
                let hl = self.regs.hl();
                let rr = self.get_rp_plain((op >> 4) & 3);
                self.regs.wz = hl.wrapping_add(1);
                let carry = self.regs.f & CF != 0;
                let (value, flags) = alu::sbc16(hl, rr, carry);
                self.regs.set_hl(value);
                self.regs.f = flags;
            }

            // ADC HL, rr
            0x4A | 0x5A | 0x6A | 0x7A => {
                bus.set_addr_bus(self.regs.ir());
                bus.exec_extra(4);
                bus.exec_extra(3);
                let hl = self.regs.hl();
                let rr = self.get_rp_plain((op >> 4) & 3);
                self.regs.wz = hl.wrapping_add(1);
                let carry = self.regs.f & CF != 0;
                let (value, flags) = alu::adc16(hl, rr, carry);
                self.regs.set_hl(value);
                self.regs.f = flags;
            }

            // LD (nn), rr
            0x43 | 0x53 | 0x63 | 0x73 => {
                let addr = self.fetch_imm16(bus);
                self.regs.wz = addr.wrapping_add(1);
                let value = self.get_rp_plain((op >> 4) & 3);
                bus.write(addr, value as u8);
                bus.write(addr.wrapping_add(1), (value >> 8) as u8);
            }

            // LD rr, (nn)
            0x4B | 0x5B | 0x6B | 0x7B => {
                let addr = self.fetch_imm16(bus);
                self.regs.wz = addr.wrapping_add(1);
                let lo = bus.read(addr);
                let hi = bus.read(addr.wrapping_add(1));
                self.set_rp_plain((op >> 4) & 3, (u16::from(hi) << 8) | u16::from(lo));
            }

            // NEG (documented 0x44 plus mirrors)
            0x44 | 0x4C | 0x54 | 0x5C | 0x64 | 0x6C | 0x74 | 0x7C => {
                let result = alu::sub8(0, self.regs.a, false);
                self.regs.a = result.value;
                self.regs.f = result.flags;
            }

            // RETN / RETI (and mirrors; all restore IFF1 from IFF2)
            0x45 | 0x4D | 0x55 | 0x5D | 0x65 | 0x6D | 0x75 | 0x7D => {
                self.regs.iff1 = self.regs.iff2;
                let target = self.pop16(bus);
                self.regs.wz = target;
                self.write_pc(bus, target);
            }

            // IM 0/1/2 (with undocumented mirrors)
            0x46 | 0x4E | 0x66 | 0x6E => self.regs.im = 0,
            0x56 | 0x76 => self.regs.im = 1,
            0x5E | 0x7E => self.regs.im = 2,

            // LD I, A
            0x47 => {
                bus.set_addr_bus(self.regs.ir());
                bus.read_extra(1);
                self.regs.i = self.regs.a;
            }

            // LD R, A
            0x4F => {
                bus.set_addr_bus(self.regs.ir());
                bus.read_extra(1);
                self.regs.r = self.regs.a;
            }

            // LD A, I
            0x57 => {
                bus.set_addr_bus(self.regs.ir());
                bus.read_extra(1);
                self.regs.a = self.regs.i;
                self.regs.f = (self.regs.f & CF)
                    | sz53(self.regs.a)
                    | if self.regs.iff2 { PF } else { 0 };
            }

            // LD A, R
            0x5F => {
                bus.set_addr_bus(self.regs.ir());
                bus.read_extra(1);
                self.regs.a = self.regs.r;
                self.regs.f = (self.regs.f & CF)
                    | sz53(self.regs.a)
                    | if self.regs.iff2 { PF } else { 0 };
            }

            // RRD
            0x67 => {
                let hl = self.regs.hl();
                let value = bus.read(hl);
                bus.exec_extra(4);
                let a = self.regs.a;
                bus.write(hl, (a << 4) | (value >> 4));
                self.regs.a = (a & 0xF0) | (value & 0x0F);
                self.regs.f = (self.regs.f & CF) | sz53p(self.regs.a);
                self.regs.wz = hl.wrapping_add(1);
            }

            // RLD
            0x6F => {
                let hl = self.regs.hl();
                let value = bus.read(hl);
                bus.exec_extra(4);
                let a = self.regs.a;
                bus.write(hl, (value << 4) | (a & 0x0F));
                self.regs.a = (a & 0xF0) | (value >> 4);
                self.regs.f = (self.regs.f & CF) | sz53p(self.regs.a);
                self.regs.wz = hl.wrapping_add(1);
            }

            // LDI / LDD / LDIR / LDDR
            0xA0 | 0xA8 | 0xB0 | 0xB8 => self.block_transfer(bus, op),

            // CPI / CPD / CPIR / CPDR
            0xA1 | 0xA9 | 0xB1 | 0xB9 => self.block_compare(bus, op),

            // INI / IND / INIR / INDR
            0xA2 | 0xAA | 0xB2 | 0xBA => self.block_input(bus, op),

            // OUTI / OUTD / OTIR / OTDR
            0xA3 | 0xAB | 0xB3 | 0xBB => self.block_output(bus, op),

            // Every remaining ED opcode is an 8-tick no-op
            _ => {}
        }
    }

    /// LDI/LDD and their repeating forms.
    fn block_transfer(&mut self, bus: &mut impl Bus, op: u8) {
        let hl = self.regs.hl();
        let de = self.regs.de();
        let value = bus.read(hl);
        bus.write(de, value);
        bus.write_extra_2t();

        let step = if op & 0x08 == 0 { 1u16 } else { 0xFFFF };
        self.regs.set_hl(hl.wrapping_add(step));
        self.regs.set_de(de.wrapping_add(step));
        let bc = self.regs.bc().wrapping_sub(1);
        self.regs.set_bc(bc);

        let n = value.wrapping_add(self.regs.a);
        self.regs.f = (self.regs.f & (SF | ZF | CF))
            | (n & XF)
            | ((n & 0x02) << 4)
            | if bc != 0 { PF } else { 0 };

        // Repeat: 5 more ticks against the write address, PC rewinds
        if op & 0x10 != 0 && bc != 0 {
            bus.exec_extra(5);
            let pc = self.regs.pc.wrapping_sub(2);
            self.write_pc(bus, pc);
            self.regs.wz = pc.wrapping_add(1);
        }
    }

    /// CPI/CPD and their repeating forms.
    fn block_compare(&mut self, bus: &mut impl Bus, op: u8) {
        let hl = self.regs.hl();
        let value = bus.read(hl);
        bus.exec_extra(5);

        let step = if op & 0x08 == 0 { 1u16 } else { 0xFFFF };
        self.regs.set_hl(hl.wrapping_add(step));
        self.regs.wz = self.regs.wz.wrapping_add(step);
        let bc = self.regs.bc().wrapping_sub(1);
        self.regs.set_bc(bc);

        let result = self.regs.a.wrapping_sub(value);
        let half = (self.regs.a ^ value ^ result) & 0x10;
        let n = result.wrapping_sub(half >> 4);
        self.regs.f = (self.regs.f & CF)
            | NF
            | half
            | (result & SF)
            | if result == 0 { ZF } else { 0 }
            | (n & XF)
            | ((n & 0x02) << 4)
            | if bc != 0 { PF } else { 0 };

        if op & 0x10 != 0 && bc != 0 && result != 0 {
            bus.exec_extra(5);
            let pc = self.regs.pc.wrapping_sub(2);
            self.write_pc(bus, pc);
            self.regs.wz = pc.wrapping_add(1);
        }
    }

    /// INI/IND and their repeating forms.
    fn block_input(&mut self, bus: &mut impl Bus, op: u8) {
        bus.set_addr_bus(self.regs.ir());
        bus.read_extra(1);

        let port = self.regs.bc();
        let step = if op & 0x08 == 0 { 1u16 } else { 0xFFFF };
        self.regs.wz = port.wrapping_add(step);
        let value = bus.input(port);
        let hl = self.regs.hl();
        bus.write(hl, value);

        self.regs.b = self.regs.b.wrapping_sub(1);
        self.regs.set_hl(hl.wrapping_add(step));

        let k = u16::from(value) + u16::from(self.regs.c.wrapping_add(step as u8));
        self.block_io_flags(value, k);

        if op & 0x10 != 0 && self.regs.b != 0 {
            bus.exec_extra(5);
            let pc = self.regs.pc.wrapping_sub(2);
            self.write_pc(bus, pc);
        }
    }

    /// OUTI/OUTD and their repeating forms.
    fn block_output(&mut self, bus: &mut impl Bus, op: u8) {
        bus.set_addr_bus(self.regs.ir());
        bus.read_extra(1);

        let hl = self.regs.hl();
        let value = bus.read(hl);
        self.regs.b = self.regs.b.wrapping_sub(1);
        let port = self.regs.bc();
        bus.output(port, value);

        let step = if op & 0x08 == 0 { 1u16 } else { 0xFFFF };
        self.regs.set_hl(hl.wrapping_add(step));
        self.regs.wz = port.wrapping_add(step);

        let k = u16::from(value) + u16::from(self.regs.l);
        self.block_io_flags(value, k);

        if op & 0x10 != 0 && self.regs.b != 0 {
            bus.exec_extra(5);
            let pc = self.regs.pc.wrapping_sub(2);
            self.write_pc(bus, pc);
        }
    }

    /// The shared (and thoroughly undocumented) flag rule of the block I/O
    /// instructions: everything derives from the transferred byte, the `k`
    /// carry sum, and the decremented B.
    fn block_io_flags(&mut self, value: u8, k: u16) {
        let b = self.regs.b;
        self.regs.f = sz53(b)
            | if value & 0x80 != 0 { NF } else { 0 }
            | if k > 0xFF { HF | CF } else { 0 }
            | parity((k as u8 & 0x07) ^ b);
    }
}
