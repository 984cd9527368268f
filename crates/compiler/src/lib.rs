//! The Spyre compiler: turns source text into the assembly text
//! `spyre-asm` assembles.
//!
//! - `lex`: tokenizes Spyre source.
//! - `ast`: the arena-of-indices tree both `parser` and `codegen` operate on.
//! - `types`: the type system (primitives, pointers, structs, generics).
//! - `parser`: builds the tree, then typechecks it into a [`parser::Unit`].
//! - `optimize`: optional constant folding / dead-branch elimination.
//! - `codegen`: walks a [`parser::Unit`] and emits assembly text.
//! - `error`: the single error type parsing/typechecking reports through.

pub mod ast;
pub mod codegen;
pub mod error;
pub mod lex;
pub mod optimize;
pub mod parser;
pub mod types;

pub use codegen::CodeGenError;
pub use error::ParseError;
pub use parser::Unit;

use std::fmt;

#[derive(Debug, Clone)]
pub enum CompileError {
    Parse(ParseError),
    CodeGen(CodeGenError),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Parse(e) => write!(f, "{e}"),
            CompileError::CodeGen(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for CompileError {}

impl From<ParseError> for CompileError {
    fn from(e: ParseError) -> Self {
        CompileError::Parse(e)
    }
}

impl From<CodeGenError> for CompileError {
    fn from(e: CodeGenError) -> Self {
        CompileError::CodeGen(e)
    }
}

/// Parse, typecheck, optimize, and generate assembly text for one
/// translation unit. `opt_level` is forwarded to [`optimize::optimize`]
/// (`0` disables it).
pub fn compile(source: &str, opt_level: u8) -> Result<String, CompileError> {
    tracing::debug!(bytes = source.len(), opt_level, "parsing and typechecking");
    let mut unit = parser::parse(source)?;
    optimize::optimize(&mut unit, opt_level);
    let asm = codegen::generate(&unit)?;
    tracing::debug!(functions = unit.functions.len(), asm_bytes = asm.len(), "generated assembly");
    Ok(asm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_a_trivial_program_end_to_end() {
        let asm = compile("main: () -> int = 2 + 3 * 4;", 0).unwrap();
        assert!(asm.contains("__FUNC__main:"));
        assert!(asm.contains("CALL __FUNC__main, 0"));
    }

    #[test]
    fn opt_level_one_folds_constants_before_codegen() {
        let asm = compile("main: () -> int = 2 + 3 * 4;", 1).unwrap();
        assert!(asm.contains("IPUSH 14"));
        assert!(!asm.contains("IMUL"));
    }

    #[test]
    fn reports_parse_errors_through_compile_error() {
        let err = compile("main: () -> int = undeclared_name;", 0).unwrap_err();
        assert!(matches!(err, CompileError::Parse(_)));
    }
}
