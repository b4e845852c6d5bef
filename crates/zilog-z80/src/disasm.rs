//! One-line Z80 disassembler.
//!
//! Decodes a single instruction from a byte window and returns the mnemonic
//! plus the number of bytes consumed. Used by the machine's trace facility;
//! not a full listing tool. Undocumented opcodes get their conventional
//! names (SLL, OUT (C),0, the ED no-op mirrors as NOP*).

/// 8-bit register names by decode index.
const R8: [&str; 8] = ["B", "C", "D", "E", "H", "L", "(HL)", "A"];
/// Register pairs, SP family.
const RP: [&str; 4] = ["BC", "DE", "HL", "SP"];
/// Register pairs, AF family.
const RP2: [&str; 4] = ["BC", "DE", "HL", "AF"];
/// Condition codes.
const CC: [&str; 8] = ["NZ", "Z", "NC", "C", "PO", "PE", "P", "M"];
/// Accumulator ALU mnemonics.
const ALU: [&str; 8] = [
    "ADD A,", "ADC A,", "SUB ", "SBC A,", "AND ", "XOR ", "OR ", "CP ",
];
/// CB rotate/shift mnemonics.
const ROT: [&str; 8] = ["RLC", "RRC", "RL", "RR", "SLA", "SRA", "SLL", "SRL"];

/// Disassemble one instruction from the start of `bytes`.
///
/// Returns the mnemonic and the byte count consumed. A truncated window
/// yields `"??"` with everything available consumed.
#[must_use]
pub fn disassemble(bytes: &[u8]) -> (String, usize) {
    Cursor { bytes, pos: 0 }.instruction()
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    fn next(&mut self) -> Option<u8> {
        let byte = self.bytes.get(self.pos).copied();
        if byte.is_some() {
            self.pos += 1;
        }
        byte
    }

    fn imm8(&mut self) -> Option<String> {
        self.next().map(|n| format!("{n:#04X}"))
    }

    fn imm16(&mut self) -> Option<String> {
        let lo = self.next()?;
        let hi = self.next()?;
        Some(format!("{:#06X}", (u16::from(hi) << 8) | u16::from(lo)))
    }

    /// Relative-jump target is rendered as a displacement, not an absolute
    /// address — the caller knows PC, we do not.
    fn rel(&mut self) -> Option<String> {
        self.next().map(|d| format!("{:+}", d as i8))
    }

    fn truncated(self) -> (String, usize) {
        ("??".to_string(), self.pos)
    }

    fn instruction(mut self) -> (String, usize) {
        match self.next() {
            None => self.truncated(),
            Some(0xCB) => self.cb(None),
            Some(0xED) => self.ed(),
            Some(op @ (0xDD | 0xFD)) => {
                let index = if op == 0xDD { "IX" } else { "IY" };
                self.indexed(index)
            }
            Some(op) => self.main(op, None),
        }
    }

    /// DD/FD-prefixed instruction. `index` is "IX" or "IY".
    fn indexed(mut self, index: &str) -> (String, usize) {
        match self.next() {
            None => self.truncated(),
            Some(0xCB) => {
                let Some(d) = self.next() else {
                    return self.truncated();
                };
                self.cb(Some((index, d as i8)))
            }
            // A stacked prefix: only the last one counts; show it as such.
            Some(0xDD | 0xFD | 0xED) => {
                self.pos -= 1;
                (format!("prefix {index}"), self.pos)
            }
            Some(op) => self.main(op, Some(index)),
        }
    }

    /// Substituted name for H/L/(HL) operands under an index prefix.
    fn r8(&mut self, idx: u8, index: Option<&str>) -> Option<String> {
        match (idx, index) {
            (4, Some(ix)) => Some(format!("{ix}H")),
            (5, Some(ix)) => Some(format!("{ix}L")),
            (6, Some(ix)) => {
                let d = self.next()? as i8;
                Some(format!("({ix}{d:+})"))
            }
            _ => Some(R8[idx as usize].to_string()),
        }
    }

    fn rp(idx: u8, index: Option<&str>) -> String {
        match (idx, index) {
            (2, Some(ix)) => ix.to_string(),
            _ => RP[idx as usize].to_string(),
        }
    }

    fn main(mut self, op: u8, index: Option<&str>) -> (String, usize) {
        let x = op >> 6;
        let y = (op >> 3) & 7;
        let z = op & 7;
        let hl = index.unwrap_or("HL");

        let text = match (x, y, z) {
            (0, 0, 0) => Some("NOP".to_string()),
            (0, 1, 0) => Some("EX AF,AF'".to_string()),
            (0, 2, 0) => self.rel().map(|d| format!("DJNZ {d}")),
            (0, 3, 0) => self.rel().map(|d| format!("JR {d}")),
            (0, 4..=7, 0) => {
                let cc = CC[(y - 4) as usize];
                self.rel().map(|d| format!("JR {cc},{d}"))
            }
            (0, _, 1) if y & 1 == 0 => {
                let rp = Self::rp(y >> 1, index);
                self.imm16().map(|nn| format!("LD {rp},{nn}"))
            }
            (0, _, 1) => Some(format!("ADD {hl},{}", Self::rp(y >> 1, index))),
            (0, 0, 2) => Some("LD (BC),A".to_string()),
            (0, 1, 2) => Some("LD A,(BC)".to_string()),
            (0, 2, 2) => Some("LD (DE),A".to_string()),
            (0, 3, 2) => Some("LD A,(DE)".to_string()),
            (0, 4, 2) => self.imm16().map(|nn| format!("LD ({nn}),{hl}")),
            (0, 5, 2) => self.imm16().map(|nn| format!("LD {hl},({nn})")),
            (0, 6, 2) => self.imm16().map(|nn| format!("LD ({nn}),A")),
            (0, 7, 2) => self.imm16().map(|nn| format!("LD A,({nn})")),
            (0, _, 3) if y & 1 == 0 => Some(format!("INC {}", Self::rp(y >> 1, index))),
            (0, _, 3) => Some(format!("DEC {}", Self::rp(y >> 1, index))),
            (0, _, 4) => self.r8(y, index).map(|r| format!("INC {r}")),
            (0, _, 5) => self.r8(y, index).map(|r| format!("DEC {r}")),
            (0, _, 6) => {
                let r = self.r8(y, index);
                let n = self.imm8();
                r.zip(n).map(|(r, n)| format!("LD {r},{n}"))
            }
            (0, 0, 7) => Some("RLCA".to_string()),
            (0, 1, 7) => Some("RRCA".to_string()),
            (0, 2, 7) => Some("RLA".to_string()),
            (0, 3, 7) => Some("RRA".to_string()),
            (0, 4, 7) => Some("DAA".to_string()),
            (0, 5, 7) => Some("CPL".to_string()),
            (0, 6, 7) => Some("SCF".to_string()),
            (0, 7, 7) => Some("CCF".to_string()),

            (1, 6, 6) => Some("HALT".to_string()),
            (1, _, _) => {
                // Under a prefix, only the memory operand is substituted;
                // the register side stays plain.
                if z == 6 {
                    let src = self.r8(z, index);
                    src.map(|src| format!("LD {},{src}", R8[y as usize]))
                } else if y == 6 {
                    let dst = self.r8(y, index);
                    dst.map(|dst| format!("LD {dst},{}", R8[z as usize]))
                } else {
                    let src = self.r8(z, index);
                    let dst = self.r8(y, index);
                    dst.zip(src).map(|(dst, src)| format!("LD {dst},{src}"))
                }
            }

            (2, _, _) => self
                .r8(z, index)
                .map(|r| format!("{}{r}", ALU[y as usize])),

            (3, _, 0) => Some(format!("RET {}", CC[y as usize])),
            (3, _, 1) if y & 1 == 0 => {
                let rp = match (y >> 1, index) {
                    (2, Some(ix)) => ix.to_string(),
                    (p, _) => RP2[p as usize].to_string(),
                };
                Some(format!("POP {rp}"))
            }
            (3, 1, 1) => Some("RET".to_string()),
            (3, 3, 1) => Some("EXX".to_string()),
            (3, 5, 1) => Some(format!("JP ({hl})")),
            (3, 7, 1) => Some(format!("LD SP,{hl}")),
            (3, _, 2) => {
                let cc = CC[y as usize];
                self.imm16().map(|nn| format!("JP {cc},{nn}"))
            }
            (3, 0, 3) => self.imm16().map(|nn| format!("JP {nn}")),
            (3, 2, 3) => self.imm8().map(|n| format!("OUT ({n}),A")),
            (3, 3, 3) => self.imm8().map(|n| format!("IN A,({n})")),
            (3, 4, 3) => Some(format!("EX (SP),{hl}")),
            (3, 5, 3) => Some("EX DE,HL".to_string()),
            (3, 6, 3) => Some("DI".to_string()),
            (3, 7, 3) => Some("EI".to_string()),
            (3, _, 4) => {
                let cc = CC[y as usize];
                self.imm16().map(|nn| format!("CALL {cc},{nn}"))
            }
            (3, _, 5) if y & 1 == 0 => {
                let rp = match (y >> 1, index) {
                    (2, Some(ix)) => ix.to_string(),
                    (p, _) => RP2[p as usize].to_string(),
                };
                Some(format!("PUSH {rp}"))
            }
            (3, 1, 5) => self.imm16().map(|nn| format!("CALL {nn}")),
            (3, _, 6) => self.imm8().map(|n| format!("{}{n}", ALU[y as usize])),
            (3, _, 7) => Some(format!("RST {:#04X}", op & 0x38)),

            _ => None,
        };

        match text {
            Some(text) => (text, self.pos),
            None => self.truncated(),
        }
    }

    /// CB block; `indexed` carries the prefix name and displacement for the
    /// DDCB/FDCB forms.
    fn cb(mut self, indexed: Option<(&str, i8)>) -> (String, usize) {
        let Some(op) = self.next() else {
            return self.truncated();
        };
        let x = op >> 6;
        let y = (op >> 3) & 7;
        let z = op & 7;

        let operand = match indexed {
            Some((ix, d)) => format!("({ix}{d:+})"),
            None => R8[z as usize].to_string(),
        };

        // DDCB non-BIT forms with a register field copy the result there.
        let copy = match indexed {
            Some(_) if z != 6 && x != 1 => format!(",{}", R8[z as usize]),
            _ => String::new(),
        };

        let text = match x {
            0 => format!("{} {operand}{copy}", ROT[y as usize]),
            1 => format!("BIT {y},{operand}"),
            2 => format!("RES {y},{operand}{copy}"),
            _ => format!("SET {y},{operand}{copy}"),
        };
        (text, self.pos)
    }

    fn ed(mut self) -> (String, usize) {
        let Some(op) = self.next() else {
            return self.truncated();
        };
        let y = (op >> 3) & 7;

        let text = match op {
            0x40 | 0x48 | 0x50 | 0x58 | 0x60 | 0x68 | 0x78 => {
                format!("IN {},(C)", R8[y as usize])
            }
            0x70 => "IN (C)".to_string(),
            0x41 | 0x49 | 0x51 | 0x59 | 0x61 | 0x69 | 0x79 => {
                format!("OUT (C),{}", R8[y as usize])
            }
            0x71 => "OUT (C),0".to_string(),
            0x42 | 0x52 | 0x62 | 0x72 => {
                format!("SBC HL,{}", RP[(op >> 4 & 3) as usize])
            }
            0x4A | 0x5A | 0x6A | 0x7A => {
                format!("ADC HL,{}", RP[(op >> 4 & 3) as usize])
            }
            0x43 | 0x53 | 0x63 | 0x73 => {
                let rp = RP[(op >> 4 & 3) as usize];
                match self.imm16() {
                    Some(nn) => format!("LD ({nn}),{rp}"),
                    None => return self.truncated(),
                }
            }
            0x4B | 0x5B | 0x6B | 0x7B => {
                let rp = RP[(op >> 4 & 3) as usize];
                match self.imm16() {
                    Some(nn) => format!("LD {rp},({nn})"),
                    None => return self.truncated(),
                }
            }
            0x44 | 0x4C | 0x54 | 0x5C | 0x64 | 0x6C | 0x74 | 0x7C => "NEG".to_string(),
            0x45 | 0x55 | 0x65 | 0x75 => "RETN".to_string(),
            0x4D | 0x5D | 0x6D | 0x7D => "RETI".to_string(),
            0x46 | 0x4E | 0x66 | 0x6E => "IM 0".to_string(),
            0x56 | 0x76 => "IM 1".to_string(),
            0x5E | 0x7E => "IM 2".to_string(),
            0x47 => "LD I,A".to_string(),
            0x4F => "LD R,A".to_string(),
            0x57 => "LD A,I".to_string(),
            0x5F => "LD A,R".to_string(),
            0x67 => "RRD".to_string(),
            0x6F => "RLD".to_string(),
            0xA0 => "LDI".to_string(),
            0xA1 => "CPI".to_string(),
            0xA2 => "INI".to_string(),
            0xA3 => "OUTI".to_string(),
            0xA8 => "LDD".to_string(),
            0xA9 => "CPD".to_string(),
            0xAA => "IND".to_string(),
            0xAB => "OUTD".to_string(),
            0xB0 => "LDIR".to_string(),
            0xB1 => "CPIR".to_string(),
            0xB2 => "INIR".to_string(),
            0xB3 => "OTIR".to_string(),
            0xB8 => "LDDR".to_string(),
            0xB9 => "CPDR".to_string(),
            0xBA => "INDR".to_string(),
            0xBB => "OTDR".to_string(),
            _ => "NOP*".to_string(),
        };
        (text, self.pos)
    }
}
