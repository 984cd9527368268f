//! The Spyre instruction set.
//!
//! Opcode byte values, mnemonics, and operand shapes are reproduced
//! byte-for-byte from the reference `instructions[]` table so that the
//! assembler and the VM can never disagree about what a byte means.

/// The kind of a single instruction operand as it appears in the bytecode
/// stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// 8-byte little-endian signed integer.
    Int64,
    /// 4-byte little-endian integer (label/constant offset, slot index, or count).
    Int32,
    /// 8-byte little-endian IEEE-754 double.
    Float64,
}

impl OperandKind {
    /// Size of this operand in the encoded instruction stream.
    pub const fn byte_size(self) -> usize {
        match self {
            OperandKind::Int64 => 8,
            OperandKind::Int32 => 4,
            OperandKind::Float64 => 8,
        }
    }
}

/// The operand list an instruction expects, in encoding order.
pub type OperandShape = &'static [OperandKind];

macro_rules! opcodes {
    ($( $byte:literal => $variant:ident ( $name:literal ) [ $($operand:expr),* ] ),* $(,)?) => {
        /// A single Spyre opcode.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum Opcode {
            $( $variant = $byte, )*
        }

        impl Opcode {
            /// All opcodes, in ascending byte-value order.
            pub const ALL: &'static [Opcode] = &[ $( Opcode::$variant ),* ];

            /// The assembler mnemonic for this opcode (upper case).
            pub const fn mnemonic(self) -> &'static str {
                match self {
                    $( Opcode::$variant => $name, )*
                }
            }

            /// The operand kinds this opcode expects, in encoding order.
            pub const fn operands(self) -> OperandShape {
                match self {
                    $( Opcode::$variant => &[ $($operand),* ], )*
                }
            }

            /// Total encoded size of this instruction, opcode byte included.
            pub fn encoded_len(self) -> usize {
                1 + self.operands().iter().map(|o| o.byte_size()).sum::<usize>()
            }

            /// Look up an opcode by its mnemonic, case-insensitively.
            pub fn from_mnemonic(name: &str) -> Option<Opcode> {
                Opcode::ALL.iter().copied().find(|op| op.mnemonic().eq_ignore_ascii_case(name))
            }

            /// Look up an opcode by its encoded byte value.
            pub fn from_byte(byte: u8) -> Option<Opcode> {
                match byte {
                    $( $byte => Some(Opcode::$variant), )*
                    _ => None,
                }
            }
        }
    };
}

use OperandKind::{Float64, Int32, Int64};

opcodes! {
    0x00 => Noop("NOOP") [],
    0x01 => IPush("IPUSH") [Int64],
    0x02 => IAdd("IADD") [],
    0x03 => ISub("ISUB") [],
    0x04 => IMul("IMUL") [],
    0x05 => IDiv("IDIV") [],
    0x06 => Mod("MOD") [],
    0x07 => Shl("SHL") [],
    0x08 => Shr("SHR") [],
    0x09 => And("AND") [],
    0x0A => Or("OR") [],
    0x0B => Xor("XOR") [],
    0x0C => Not("NOT") [],
    0x0D => Neg("NEG") [],
    0x0E => IGt("IGT") [],
    0x0F => IGe("IGE") [],
    0x10 => ILt("ILT") [],
    0x11 => ILe("ILE") [],
    0x12 => ICmp("ICMP") [],
    0x13 => Jnz("JNZ") [Int32],
    0x14 => Jz("JZ") [Int32],
    0x15 => Jmp("JMP") [Int32],
    0x16 => Call("CALL") [Int32, Int32],
    0x17 => IRet("IRET") [],
    0x18 => CCall("CCALL") [Int32, Int32],
    0x19 => FPush("FPUSH") [Float64],
    0x1A => FAdd("FADD") [],
    0x1B => FSub("FSUB") [],
    0x1C => FMul("FMUL") [],
    0x1D => FDiv("FDIV") [],
    0x1E => FGt("FGT") [],
    0x1F => FGe("FGE") [],
    0x20 => FLt("FLT") [],
    0x21 => FLe("FLE") [],
    0x22 => FCmp("FCMP") [],
    0x23 => FRet("FRET") [],
    0x24 => ILLoad("ILLOAD") [Int32],
    0x25 => ILSave("ILSAVE") [Int32],
    0x26 => IArg("IARG") [Int32],
    0x27 => ILoad("ILOAD") [],
    0x28 => ISave("ISAVE") [],
    0x29 => Res("RES") [Int32],
    0x2A => Lea("LEA") [Int32],
    0x2B => IDer("IDER") [],
    0x2C => ICInc("ICINC") [Int64],
    0x2D => CDer("CDER") [],
    0x2E => LOr("LOR") [],
    0x2F => LAnd("LAND") [],
    0x30 => PAdd("PADD") [],
    0x31 => PSub("PSUB") [],
    0x32 => Log("LOG") [Int32],
    0x33 => VRet("VRET") [],
    0x34 => DbOn("DBON") [],
    0x35 => DbOff("DBOFF") [],
    0x36 => DbDs("DBDS") [],
    0x37 => CJnz("CJNZ") [],
    0x38 => CJz("CJZ") [],
    0x39 => CJmp("CJMP") [],
    0x3A => ILnSave("ILNSAVE") [Int32, Int32],
    0x3B => ILnLoad("ILNLOAD") [Int32, Int32],
    0x3C => FLLoad("FLLOAD") [Int32],
    0x3D => FLSave("FLSAVE") [Int32],
    0x3E => FToI("FTOI") [Int32],
    0x3F => IToF("ITOF") [Int32],
    0x40 => FDer("FDER") [],
    0x41 => FSave("FSAVE") [],
    0x42 => LNot("LNOT") [],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_values_match_reference_table() {
        assert_eq!(Opcode::Noop as u8, 0x00);
        assert_eq!(Opcode::IPush as u8, 0x01);
        assert_eq!(Opcode::Call as u8, 0x16);
        assert_eq!(Opcode::CCall as u8, 0x18);
        assert_eq!(Opcode::ILnLoad as u8, 0x3B);
        assert_eq!(Opcode::LNot as u8, 0x42);
    }

    #[test]
    fn round_trips_through_mnemonic_and_byte() {
        for op in Opcode::ALL.iter().copied() {
            assert_eq!(Opcode::from_mnemonic(op.mnemonic()), Some(op));
            assert_eq!(Opcode::from_byte(op as u8), Some(op));
        }
    }

    #[test]
    fn mnemonic_lookup_is_case_insensitive() {
        assert_eq!(Opcode::from_mnemonic("ipush"), Some(Opcode::IPush));
        assert_eq!(Opcode::from_mnemonic("IpUsH"), Some(Opcode::IPush));
    }

    #[test]
    fn encoded_length_accounts_for_operands() {
        assert_eq!(Opcode::Noop.encoded_len(), 1);
        assert_eq!(Opcode::IPush.encoded_len(), 9);
        assert_eq!(Opcode::Call.encoded_len(), 9);
        assert_eq!(Opcode::Jmp.encoded_len(), 5);
    }
}
