use crate::lex::LexError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssembleError {
    Lex(LexError),
    UnknownInstruction { name: String, line: u32 },
    UnresolvedReference { name: String, line: u32 },
    MissingOperand { line: u32 },
    DuplicateLabel { name: String, line: u32 },
    DuplicateConstant { name: String, line: u32 },
}

impl std::fmt::Display for AssembleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "spyre assembler error")?;
        match self {
            AssembleError::Lex(e) => write!(f, ": {e}"),
            AssembleError::UnknownInstruction { name, line } => {
                write!(f, " (line {line}): unknown instruction '{name}'")
            }
            AssembleError::UnresolvedReference { name, line } => {
                write!(f, " (line {line}): unexpected identifier '{name}'")
            }
            AssembleError::MissingOperand { line } => write!(f, " (line {line}): expected operand(s)"),
            AssembleError::DuplicateLabel { name, line } => {
                write!(f, " (line {line}): label '{name}' already defined")
            }
            AssembleError::DuplicateConstant { name, line } => {
                write!(f, " (line {line}): constant '{name}' already defined")
            }
        }
    }
}

impl std::error::Error for AssembleError {}

impl From<LexError> for AssembleError {
    fn from(e: LexError) -> Self {
        AssembleError::Lex(e)
    }
}
