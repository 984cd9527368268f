//! The assembler round-trip law: decoding the emitted code section
//! instruction-by-instruction, using only each opcode's own operand shape,
//! recovers exactly the mnemonic sequence that was assembled, and the
//! code section's byte length equals the sum of each instruction's
//! `1 + operand_sizes`.

use spyre_asm::assemble;
use spyre_core::opcode::Opcode;

/// Walk a code section generically (the same way the VM's dispatch loop
/// does) and return the opcode of every instruction in order.
fn decode_opcodes(code: &[u8]) -> Vec<Opcode> {
    let mut ops = Vec::new();
    let mut ip = 0;
    while ip < code.len() {
        let op = Opcode::from_byte(code[ip]).expect("unknown opcode byte in assembled output");
        ip += op.encoded_len();
        ops.push(op);
    }
    ops
}

#[test]
fn decoded_opcode_sequence_matches_source_order() {
    let source = "IPUSH 2\nIPUSH 3\nIADD\nIPUSH 4\nIMUL\nNOOP";
    let image = assemble(source).unwrap();
    let decoded = decode_opcodes(&image.code);
    assert_eq!(decoded, vec![Opcode::IPush, Opcode::IPush, Opcode::IAdd, Opcode::IPush, Opcode::IMul, Opcode::Noop]);
}

#[test]
fn code_length_equals_sum_of_instruction_sizes() {
    let source = "JMP end\nIPUSH 1\nend:\nILLOAD 0\nFLSAVE 1\nNOOP";
    let image = assemble(source).unwrap();
    let decoded_len: usize = decode_opcodes(&image.code).iter().map(|op| op.encoded_len()).sum();
    assert_eq!(image.code.len(), decoded_len);
}

#[test]
fn forward_and_backward_labels_both_decode_cleanly() {
    let source = "top:\nIPUSH 1\nJMP bottom\nIPUSH 2\nbottom:\nJMP top\nNOOP";
    let image = assemble(source).unwrap();
    let decoded = decode_opcodes(&image.code);
    assert_eq!(decoded, vec![Opcode::IPush, Opcode::Jmp, Opcode::IPush, Opcode::Jmp, Opcode::Noop]);
}

#[test]
fn string_constant_round_trips_through_rom() {
    let image = assemble("let greeting \"hello\"\nCCALL greeting, 0\nNOOP").unwrap();
    assert_eq!(&image.rom, b"hello\0");
    let decoded = decode_opcodes(&image.code);
    assert_eq!(decoded, vec![Opcode::CCall, Opcode::Noop]);
}
