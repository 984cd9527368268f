//! The single error type the parser/typechecker reports through. Lex errors
//! are folded in via `From` so the front end has one `Result` to thread.

use crate::lex::LexError;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    Lex(LexError),
    UnexpectedToken { found: String, line: u32 },
    UnexpectedEof,
    UnknownType { name: String, line: u32 },
    UndeclaredIdentifier { name: String, line: u32 },
    DuplicateDeclaration { name: String, line: u32 },
    MismatchedParens { line: u32 },
    TypeMismatch { expected: String, found: String, line: u32 },
    WrongArity { name: String, expected: usize, found: usize, line: u32 },
    WrongGenericArity { name: String, expected: usize, found: usize, line: u32 },
    MisplacedReturn { line: u32 },
    MisplacedBreakOrContinue { line: u32 },
    ConflictingDeclaration { name: String, line: u32 },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Lex(e) => write!(f, "{e}"),
            ParseError::UnexpectedToken { found, line } => write!(f, "line {line}: unexpected token '{found}'"),
            ParseError::UnexpectedEof => write!(f, "unexpected end of input"),
            ParseError::UnknownType { name, line } => write!(f, "line {line}: unknown type '{name}'"),
            ParseError::UndeclaredIdentifier { name, line } => {
                write!(f, "line {line}: undeclared identifier '{name}'")
            }
            ParseError::DuplicateDeclaration { name, line } => {
                write!(f, "line {line}: '{name}' is already declared in this scope")
            }
            ParseError::MismatchedParens { line } => write!(f, "line {line}: mismatched parentheses"),
            ParseError::TypeMismatch { expected, found, line } => {
                write!(f, "line {line}: type mismatch: expected '{expected}', found '{found}'")
            }
            ParseError::WrongArity { name, expected, found, line } => {
                write!(f, "line {line}: '{name}' expects {expected} argument(s), found {found}")
            }
            ParseError::WrongGenericArity { name, expected, found, line } => {
                write!(f, "line {line}: '{name}' expects {expected} generic argument(s), found {found}")
            }
            ParseError::MisplacedReturn { line } => write!(f, "line {line}: 'return' outside of a function"),
            ParseError::MisplacedBreakOrContinue { line } => {
                write!(f, "line {line}: 'break'/'continue' outside of a loop")
            }
            ParseError::ConflictingDeclaration { name, line } => {
                write!(f, "line {line}: '{name}' conflicts with its forward declaration")
            }
        }
    }
}

impl std::error::Error for ParseError {}

impl From<LexError> for ParseError {
    fn from(e: LexError) -> Self {
        ParseError::Lex(e)
    }
}
