//! Opcode table for the instructions that have no operands

use crate::jvm::code::{CompareMode, Instruction, ShiftType};

/// Generates the decoding and encoding directions of the operand-free opcode table from a single
/// list, so the two can't drift apart
macro_rules! simple_opcodes {
    ($($opcode:literal => $variant:ident $(($($arg:tt)*))?,)*) => {
        /// Instruction for an opcode that takes no operands
        pub fn decode_simple(opcode: u8) -> Option<Instruction> {
            match opcode {
                $($opcode => Some(Instruction::$variant $(($($arg)*))?),)*
                _ => None,
            }
        }

        /// Opcode of an instruction that takes no operands
        pub fn encode_simple(instruction: &Instruction) -> Option<u8> {
            match instruction {
                $(Instruction::$variant $(($($arg)*))? => Some($opcode),)*
                _ => None,
            }
        }
    };
}

simple_opcodes! {
    0x00 => Nop,
    0x01 => AConstNull,
    0x02 => IConstM1,
    0x03 => IConst0,
    0x04 => IConst1,
    0x05 => IConst2,
    0x06 => IConst3,
    0x07 => IConst4,
    0x08 => IConst5,
    0x09 => LConst0,
    0x0a => LConst1,
    0x0b => FConst0,
    0x0c => FConst1,
    0x0d => FConst2,
    0x0e => DConst0,
    0x0f => DConst1,
    0x2e => IALoad,
    0x2f => LALoad,
    0x30 => FALoad,
    0x31 => DALoad,
    0x32 => AALoad,
    0x33 => BALoad,
    0x34 => CALoad,
    0x35 => SALoad,
    0x4f => IAStore,
    0x50 => LAStore,
    0x51 => FAStore,
    0x52 => DAStore,
    0x53 => AAStore,
    0x54 => BAStore,
    0x55 => CAStore,
    0x56 => SAStore,
    0x57 => Pop,
    0x58 => Pop2,
    0x59 => Dup,
    0x5a => DupX1,
    0x5b => DupX2,
    0x5c => Dup2,
    0x5d => Dup2X1,
    0x5e => Dup2X2,
    0x5f => Swap,
    0x60 => IAdd,
    0x61 => LAdd,
    0x62 => FAdd,
    0x63 => DAdd,
    0x64 => ISub,
    0x65 => LSub,
    0x66 => FSub,
    0x67 => DSub,
    0x68 => IMul,
    0x69 => LMul,
    0x6a => FMul,
    0x6b => DMul,
    0x6c => IDiv,
    0x6d => LDiv,
    0x6e => FDiv,
    0x6f => DDiv,
    0x70 => IRem,
    0x71 => LRem,
    0x72 => FRem,
    0x73 => DRem,
    0x74 => INeg,
    0x75 => LNeg,
    0x76 => FNeg,
    0x77 => DNeg,
    0x78 => ISh(ShiftType::Left),
    0x79 => LSh(ShiftType::Left),
    0x7a => ISh(ShiftType::ArithmeticRight),
    0x7b => LSh(ShiftType::ArithmeticRight),
    0x7c => ISh(ShiftType::LogicalRight),
    0x7d => LSh(ShiftType::LogicalRight),
    0x7e => IAnd,
    0x7f => LAnd,
    0x80 => IOr,
    0x81 => LOr,
    0x82 => IXor,
    0x83 => LXor,
    0x85 => I2L,
    0x86 => I2F,
    0x87 => I2D,
    0x88 => L2I,
    0x89 => L2F,
    0x8a => L2D,
    0x8b => F2I,
    0x8c => F2L,
    0x8d => F2D,
    0x8e => D2I,
    0x8f => D2L,
    0x90 => D2F,
    0x91 => I2B,
    0x92 => I2C,
    0x93 => I2S,
    0x94 => LCmp,
    0x95 => FCmp(CompareMode::L),
    0x96 => FCmp(CompareMode::G),
    0x97 => DCmp(CompareMode::L),
    0x98 => DCmp(CompareMode::G),
    0xbe => ArrayLength,
    0xc2 => MonitorEnter,
    0xc3 => MonitorExit,
}

pub const BIPUSH: u8 = 0x10;
pub const SIPUSH: u8 = 0x11;
pub const LDC: u8 = 0x12;
pub const LDC_W: u8 = 0x13;
pub const LDC2_W: u8 = 0x14;
pub const ILOAD: u8 = 0x15;
pub const LLOAD: u8 = 0x16;
pub const FLOAD: u8 = 0x17;
pub const DLOAD: u8 = 0x18;
pub const ALOAD: u8 = 0x19;
/// `iload_0` (the other compact loads follow in groups of four)
pub const ILOAD_0: u8 = 0x1a;
pub const ISTORE: u8 = 0x36;
pub const LSTORE: u8 = 0x37;
pub const FSTORE: u8 = 0x38;
pub const DSTORE: u8 = 0x39;
pub const ASTORE: u8 = 0x3a;
/// `istore_0` (the other compact stores follow in groups of four)
pub const ISTORE_0: u8 = 0x3b;
pub const IINC: u8 = 0x84;
pub const IFEQ: u8 = 0x99;
pub const IF_ICMPEQ: u8 = 0x9f;
pub const IF_ACMPEQ: u8 = 0xa5;
pub const IF_ACMPNE: u8 = 0xa6;
pub const GOTO: u8 = 0xa7;
pub const JSR: u8 = 0xa8;
pub const RET: u8 = 0xa9;
pub const TABLESWITCH: u8 = 0xaa;
pub const LOOKUPSWITCH: u8 = 0xab;
pub const IRETURN: u8 = 0xac;
pub const LRETURN: u8 = 0xad;
pub const FRETURN: u8 = 0xae;
pub const DRETURN: u8 = 0xaf;
pub const ARETURN: u8 = 0xb0;
pub const RETURN: u8 = 0xb1;
pub const GETSTATIC: u8 = 0xb2;
pub const PUTSTATIC: u8 = 0xb3;
pub const GETFIELD: u8 = 0xb4;
pub const PUTFIELD: u8 = 0xb5;
pub const INVOKEVIRTUAL: u8 = 0xb6;
pub const INVOKESPECIAL: u8 = 0xb7;
pub const INVOKESTATIC: u8 = 0xb8;
pub const INVOKEINTERFACE: u8 = 0xb9;
pub const INVOKEDYNAMIC: u8 = 0xba;
pub const NEW: u8 = 0xbb;
pub const NEWARRAY: u8 = 0xbc;
pub const ANEWARRAY: u8 = 0xbd;
pub const ATHROW: u8 = 0xbf;
pub const CHECKCAST: u8 = 0xc0;
pub const INSTANCEOF: u8 = 0xc1;
pub const WIDE: u8 = 0xc4;
pub const MULTIANEWARRAY: u8 = 0xc5;
pub const IFNULL: u8 = 0xc6;
pub const IFNONNULL: u8 = 0xc7;
pub const GOTO_W: u8 = 0xc8;
pub const JSR_W: u8 = 0xc9;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn table_is_consistent() {
        for opcode in 0..=u8::MAX {
            if let Some(instruction) = decode_simple(opcode) {
                assert_eq!(encode_simple(&instruction), Some(opcode));
            }
        }
        assert_eq!(decode_simple(GOTO_W), None);
        assert_eq!(encode_simple(&Instruction::ILoad(0)), None);
    }
}
