//! The two-pass assembler: a scan pass that resolves every label and ROM
//! constant to a numeric offset, followed by an emission pass that turns
//! each instruction into its encoded bytes.
//!
//! The source dialect lets a reference to a not-yet-seen label (a forward
//! jump) resolve correctly, which is the entire reason this isn't one pass:
//! the scan pass has to see the whole token stream before emission can
//! trust any label value.

use std::collections::HashMap;

use spyre_core::image::BinaryImage;
use spyre_core::opcode::{Opcode, OperandKind};

use crate::error::AssembleError;
use crate::lex::{self, lex, Token, TokenKind};

struct SymbolTable {
    labels: HashMap<String, u32>,
    constants: HashMap<String, u32>,
}

/// Advance `i` past `count` operand tokens, skipping at most one comma
/// ahead of each, and return their positions in the token stream.
fn collect_operand_positions(tokens: &[Token], i: &mut usize, count: usize) -> Vec<usize> {
    let mut positions = Vec::with_capacity(count);
    for _ in 0..count {
        *i += 1;
        if matches!(tokens.get(*i).map(|t| &t.kind), Some(TokenKind::Punct(','))) {
            *i += 1;
        }
        positions.push(*i);
    }
    positions
}

fn scan(tokens: &[Token]) -> Result<(SymbolTable, Vec<u8>, u32), AssembleError> {
    let mut labels = HashMap::new();
    let mut constants = HashMap::new();
    let mut rom = Vec::new();
    let mut code_len: u32 = 0;
    let mut i = 0usize;

    while i < tokens.len() {
        let TokenKind::Identifier(name) = &tokens[i].kind else {
            i += 1;
            continue;
        };
        let line = tokens[i].line;

        if name.eq_ignore_ascii_case("let") {
            let const_name = match tokens.get(i + 1).map(|t| &t.kind) {
                Some(TokenKind::Identifier(n)) => n.clone(),
                _ => return Err(AssembleError::MissingOperand { line }),
            };
            let text = match tokens.get(i + 2).map(|t| &t.kind) {
                Some(TokenKind::StringLiteral(s)) => s.clone(),
                _ => return Err(AssembleError::MissingOperand { line }),
            };
            if constants.contains_key(&const_name) {
                return Err(AssembleError::DuplicateConstant { name: const_name, line });
            }
            constants.insert(const_name, rom.len() as u32);
            rom.extend_from_slice(text.as_bytes());
            rom.push(0);
            i += 3;
            continue;
        }

        if matches!(tokens.get(i + 1).map(|t| &t.kind), Some(TokenKind::Punct(':'))) {
            if labels.contains_key(name) {
                return Err(AssembleError::DuplicateLabel { name: name.clone(), line });
            }
            labels.insert(name.clone(), code_len);
            i += 2;
            continue;
        }

        if let Some(op) = Opcode::from_mnemonic(name) {
            code_len += op.encoded_len() as u32;
            i += 1;
            let arity = op.operands().len();
            if arity > 0 {
                collect_operand_positions(tokens, &mut i, arity);
                i += 1;
            }
            continue;
        }

        // A bare identifier that is neither a label definition nor an
        // instruction is a forward operand reference; it gets resolved
        // during emission, so it contributes nothing here.
        i += 1;
    }

    Ok((SymbolTable { labels, constants }, rom, code_len))
}

fn resolve_int_operand(tok: &Token, symbols: &SymbolTable) -> Result<i64, AssembleError> {
    match &tok.kind {
        TokenKind::Number(text) => Ok(lex::parse_int(text)),
        TokenKind::Identifier(name) => symbols
            .labels
            .get(name)
            .or_else(|| symbols.constants.get(name))
            .map(|&v| v as i64)
            .ok_or_else(|| AssembleError::UnresolvedReference { name: name.clone(), line: tok.line }),
        _ => Err(AssembleError::MissingOperand { line: tok.line }),
    }
}

fn emit(tokens: &[Token], symbols: &SymbolTable) -> Result<Vec<u8>, AssembleError> {
    let mut code = Vec::new();
    let mut i = 0usize;

    while i < tokens.len() {
        let TokenKind::Identifier(name) = &tokens[i].kind else {
            i += 1;
            continue;
        };
        let line = tokens[i].line;

        if name.eq_ignore_ascii_case("let") {
            i += 3;
            continue;
        }
        if matches!(tokens.get(i + 1).map(|t| &t.kind), Some(TokenKind::Punct(':'))) {
            i += 2;
            continue;
        }

        let op = Opcode::from_mnemonic(name)
            .ok_or_else(|| AssembleError::UnknownInstruction { name: name.clone(), line })?;
        code.push(op as u8);
        i += 1;

        let shape = op.operands();
        if !shape.is_empty() {
            let positions = collect_operand_positions(tokens, &mut i, shape.len());
            for (kind, pos) in shape.iter().zip(positions) {
                let tok = tokens.get(pos).ok_or(AssembleError::MissingOperand { line })?;
                match kind {
                    OperandKind::Int64 => {
                        let v = resolve_int_operand(tok, symbols)?;
                        code.extend_from_slice(&v.to_le_bytes());
                    }
                    OperandKind::Int32 => {
                        let v = resolve_int_operand(tok, symbols)?;
                        code.extend_from_slice(&(v as i32).to_le_bytes());
                    }
                    OperandKind::Float64 => {
                        let f = match &tok.kind {
                            TokenKind::Number(text) => lex::parse_float(text),
                            _ => resolve_int_operand(tok, symbols)? as f64,
                        };
                        code.extend_from_slice(&f.to_le_bytes());
                    }
                }
            }
            i += 1;
        }
    }

    Ok(code)
}

/// Assemble Spyre assembly source text into a binary image.
pub fn assemble(source: &str) -> Result<BinaryImage, AssembleError> {
    let tokens = lex(source)?;
    let (symbols, rom, _code_len) = scan(&tokens)?;
    let code = emit(&tokens, &symbols)?;
    tracing::debug!(
        labels = symbols.labels.len(),
        constants = symbols.constants.len(),
        rom_bytes = rom.len(),
        code_bytes = code.len(),
        "assembled binary image"
    );
    Ok(BinaryImage::new(rom, code))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembles_a_trivial_program() {
        let image = assemble("IPUSH 2\nIPUSH 3\nIADD\nNOOP").unwrap();
        assert_eq!(image.code[0], Opcode::IPush as u8);
        assert_eq!(image.code.len(), Opcode::IPush.encoded_len() * 2 + 2);
    }

    #[test]
    fn forward_label_reference_resolves_to_the_label_offset() {
        let image = assemble("JMP skip\nIPUSH 1\nskip:\nNOOP").unwrap();
        let target = i32::from_le_bytes(image.code[1..5].try_into().unwrap());
        // JMP is 5 bytes; IPUSH 1 is 9 bytes; skip: lands at byte 14.
        assert_eq!(target, 14);
    }

    #[test]
    fn let_constant_lands_in_rom_and_resolves_by_offset() {
        let image = assemble("let msg \"hi\"\nCCALL msg, 0\nNOOP").unwrap();
        assert_eq!(&image.rom, b"hi\0");
        let name_offset = i32::from_le_bytes(image.code[1..5].try_into().unwrap());
        assert_eq!(name_offset, 0);
    }

    #[test]
    fn unknown_instruction_is_rejected() {
        let err = assemble("BOGUS").unwrap_err();
        assert!(matches!(err, AssembleError::UnknownInstruction { .. }));
    }

    #[test]
    fn unresolved_operand_reference_is_rejected() {
        let err = assemble("JMP nowhere\nNOOP").unwrap_err();
        assert!(matches!(err, AssembleError::UnresolvedReference { .. }));
    }

    #[test]
    fn negative_immediate_operand_encodes_correctly() {
        let image = assemble("RES -1\nNOOP").unwrap();
        let operand = i32::from_le_bytes(image.code[1..5].try_into().unwrap());
        assert_eq!(operand, -1);
    }

    #[test]
    fn round_trips_through_the_binary_image_format() {
        let image = assemble("IPUSH 5\nNOOP").unwrap();
        let bytes = image.to_bytes();
        let decoded = BinaryImage::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, image);
    }
}
