//! The CLI's single error type: every stage's error folded together so
//! `main` has exactly one `Result` to unwrap into an exit code.

use std::fmt;

#[derive(Debug)]
pub enum CliError {
    Io(std::io::Error),
    Image(spyre_core::image::ImageError),
    Compile(spyre_compiler::CompileError),
    Assemble(spyre_asm::AssembleError),
    Vm(spyre_vm::VmError),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Io(e) => write!(f, "{e}"),
            CliError::Image(e) => write!(f, "{e}"),
            CliError::Compile(e) => write!(f, "{e}"),
            CliError::Assemble(e) => write!(f, "{e}"),
            CliError::Vm(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for CliError {}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        CliError::Io(e)
    }
}

impl From<spyre_core::image::ImageError> for CliError {
    fn from(e: spyre_core::image::ImageError) -> Self {
        CliError::Image(e)
    }
}

impl From<spyre_compiler::CompileError> for CliError {
    fn from(e: spyre_compiler::CompileError) -> Self {
        CliError::Compile(e)
    }
}

impl From<spyre_asm::AssembleError> for CliError {
    fn from(e: spyre_asm::AssembleError) -> Self {
        CliError::Assemble(e)
    }
}

impl From<spyre_vm::VmError> for CliError {
    fn from(e: spyre_vm::VmError) -> Self {
        CliError::Vm(e)
    }
}
