//! Runtime crash reporting.
//!
//! Every crash is fatal: there is no recovery, only a diagnostic and a
//! nonzero exit. `VmError`'s `Display` impl matches the "SPYRE RUNTIME
//! ERROR: ..." wording the original interpreter prints.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmError {
    StackOverflow,
    UnknownOpcode(u8),
    UnknownHostFunction(String),
    FreeInvalidPointer(u64),
    OutOfMemory,
    DivisionByZero,
    Io(String),
    Unimplemented(&'static str),
}

impl std::fmt::Display for VmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SPYRE RUNTIME ERROR: ")?;
        match self {
            VmError::StackOverflow => write!(f, "stack overflow"),
            VmError::UnknownOpcode(byte) => write!(f, "unknown opcode 0x{byte:02X}"),
            VmError::UnknownHostFunction(name) => {
                write!(f, "attempt to call undefined C function '{name}'")
            }
            VmError::FreeInvalidPointer(addr) => {
                write!(f, "attempt to free an invalid pointer (0x{addr:x})")
            }
            VmError::OutOfMemory => write!(f, "out of memory"),
            VmError::DivisionByZero => write!(f, "division by zero"),
            VmError::Io(msg) => write!(f, "I/O error: {msg}"),
            VmError::Unimplemented(what) => write!(f, "'{what}' is not implemented"),
        }
    }
}

impl std::error::Error for VmError {}

impl From<std::io::Error> for VmError {
    fn from(e: std::io::Error) -> Self {
        VmError::Io(e.to_string())
    }
}
