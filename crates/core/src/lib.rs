//! Spyre core: the bits every other crate in the toolchain needs to agree on.
//!
//! This crate has no opinion on lexing, typechecking, or interpretation — it
//! only fixes the *contract* between the compiler, the assembler, and the
//! virtual machine:
//!
//! - `memory`: the flat address space layout (ROM / stack / heap) and the
//!   `VirtualAddress` newtype that indexes into it.
//! - `opcode`: the closed set of ~65 opcodes, their byte values, and their
//!   operand shapes, reproduced from the reference opcode table.
//! - `image`: the binary image container (magic, section offsets, bytes)
//!   that the assembler writes and the VM reads.
//! - `source`: a small `file:line` location type shared by every stage's
//!   error type.

pub mod image;
pub mod memory;
pub mod opcode;
pub mod source;

pub use image::BinaryImage;
pub use memory::VirtualAddress;
pub use opcode::{Opcode, OperandShape};
pub use source::SourceLocation;
