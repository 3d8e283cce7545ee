use crate::jvm::code::Label;
use crate::jvm::BinaryName;
use std::fmt;

/// Errors reading, modelling, or writing class files
#[derive(Debug)]
pub enum Error {
    IoError(std::io::Error),

    /// Bytes that do not follow the class file format
    Malformed(String),

    /// A constant pool index is missing or points at the wrong kind of entry
    BadConstant { index: u16, expected: &'static str },

    /// A field or method descriptor could not be parsed
    BadDescriptor(String),

    /// A name in the constant pool is not a valid binary or unqualified name
    BadName(String),

    /// The constant pool grew past its `u16` addressable limit
    ConstantPoolOverflow,

    /// Opcodes this crate refuses to model (`jsr`, `ret`, or an unassigned opcode)
    UnsupportedInstruction { offset: usize, opcode: u8 },

    /// Branch or table offset pointing outside the method or into the middle of an instruction
    InvalidBranchTarget { offset: usize, target: i64 },

    /// Assembled method body would exceed the 64KiB code limit
    MethodCodeOverflow(usize),

    /// Maximum stack or locals no longer fit in `u16`
    MethodCodeMaxStackOverflow(usize),
    MethodCodeMaxLocalsOverflow(usize),

    /// A conditional jump whose target is further than a signed 16-bit offset can reach
    BranchOffsetOverflow { offset: usize, target: usize },

    /// A branch or table entry refers to a label which was never placed
    UnplacedLabel(Label),

    /// Error trying to verify
    VerifierError {
        instruction: usize,
        kind: VerifierErrorKind,
    },
}

/// Ways a forward dataflow analysis over method code can fail
#[derive(Debug, Clone, PartialEq)]
pub enum VerifierErrorKind {
    EmptyStack,
    InvalidWidth(usize),
    NotArrayType,
    InvalidIndex(u16),
    InvalidType,
    /// Stack heights disagree where control flow joins
    IncompatibleStackHeights(usize, usize),
    /// Execution can run past the last instruction
    FallOffEnd,
    /// `max_locals` is too small for the method parameters
    TooManyParameters(usize),
    /// Branch or exception handler refers to a label absent from the method
    UnknownLabel(Label),
    /// A type needed to merge two references could not be resolved
    TypeNotFound(BinaryName),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::IoError(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::IoError(err) => write!(f, "I/O error: {}", err),
            Error::Malformed(msg) => write!(f, "malformed class file: {}", msg),
            Error::BadConstant { index, expected } => {
                write!(f, "constant #{} is not a valid {}", index, expected)
            }
            Error::BadDescriptor(desc) => write!(f, "invalid descriptor {:?}", desc),
            Error::BadName(name) => write!(f, "invalid name {:?}", name),
            Error::ConstantPoolOverflow => write!(f, "constant pool overflow"),
            Error::UnsupportedInstruction { offset, opcode } => {
                write!(f, "unsupported opcode 0x{:02x} at offset {}", opcode, offset)
            }
            Error::InvalidBranchTarget { offset, target } => write!(
                f,
                "instruction at offset {} jumps to invalid target {}",
                offset, target
            ),
            Error::MethodCodeOverflow(len) => write!(f, "method code too long ({} bytes)", len),
            Error::MethodCodeMaxStackOverflow(size) => write!(f, "max stack too large ({})", size),
            Error::MethodCodeMaxLocalsOverflow(size) => {
                write!(f, "max locals too large ({})", size)
            }
            Error::BranchOffsetOverflow { offset, target } => write!(
                f,
                "conditional branch at offset {} cannot reach offset {}",
                offset, target
            ),
            Error::UnplacedLabel(label) => write!(f, "label {:?} was never placed", label),
            Error::VerifierError { instruction, kind } => {
                write!(f, "verification failed at instruction {}: {}", instruction, kind)
            }
        }
    }
}

impl fmt::Display for VerifierErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            VerifierErrorKind::EmptyStack => write!(f, "operand stack underflow"),
            VerifierErrorKind::InvalidWidth(width) => {
                write!(f, "value of width {} used at the wrong width", width)
            }
            VerifierErrorKind::NotArrayType => write!(f, "expected an array type"),
            VerifierErrorKind::InvalidIndex(index) => write!(f, "invalid local index {}", index),
            VerifierErrorKind::InvalidType => write!(f, "operand has the wrong type"),
            VerifierErrorKind::IncompatibleStackHeights(h1, h2) => {
                write!(f, "incompatible stack heights {} and {}", h1, h2)
            }
            VerifierErrorKind::FallOffEnd => write!(f, "execution falls off the end of the code"),
            VerifierErrorKind::TooManyParameters(slots) => {
                write!(f, "parameters need {} local slots", slots)
            }
            VerifierErrorKind::UnknownLabel(label) => write!(f, "unknown label {:?}", label),
            VerifierErrorKind::TypeNotFound(name) => write!(f, "type {} not found", name),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(err) => Some(err),
            _ => None,
        }
    }
}
