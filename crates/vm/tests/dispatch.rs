//! Integration tests for the interpreter loop, built against hand-encoded
//! bytecode rather than through the assembler (which is a separate crate).

use spyre_core::image::BinaryImage;
use spyre_core::memory::{SIZE_ROM, START_HEAP, START_STACK};
use spyre_core::opcode::Opcode;
use spyre_vm::{OptionFlags, Vm};

/// A minimal bytecode builder: push opcodes and little-endian operands,
/// patching forward references once their target offset is known.
struct Builder {
    bytes: Vec<u8>,
}

impl Builder {
    fn new() -> Self {
        Builder { bytes: Vec::new() }
    }

    fn here(&self) -> i32 {
        self.bytes.len() as i32
    }

    fn op(&mut self, op: Opcode) -> &mut Self {
        self.bytes.push(op as u8);
        self
    }

    fn i32_operand(&mut self, v: i32) -> &mut Self {
        self.bytes.extend_from_slice(&v.to_le_bytes());
        self
    }

    fn i64_operand(&mut self, v: i64) -> &mut Self {
        self.bytes.extend_from_slice(&v.to_le_bytes());
        self
    }

    /// Reserve space for an i32 operand, returning the byte offset to patch later.
    fn i32_placeholder(&mut self) -> usize {
        let at = self.bytes.len();
        self.bytes.extend_from_slice(&0i32.to_le_bytes());
        at
    }

    fn patch_i32(&mut self, at: usize, v: i32) {
        self.bytes[at..at + 4].copy_from_slice(&v.to_le_bytes());
    }

    fn image(self) -> BinaryImage {
        BinaryImage { rom: Vec::new(), code: self.bytes }
    }

    fn image_with_rom(self, rom: Vec<u8>) -> BinaryImage {
        BinaryImage { rom, code: self.bytes }
    }
}

fn run_image(image: &BinaryImage) -> i64 {
    let mut vm = Vm::new(OptionFlags::default());
    vm.load(image);
    vm.run().expect("program should run to completion")
}

#[test]
fn constant_arithmetic_folds_to_expected_value() {
    let mut b = Builder::new();
    b.op(Opcode::IPush).i64_operand(2);
    b.op(Opcode::IPush).i64_operand(3);
    b.op(Opcode::IAdd);
    b.op(Opcode::IPush).i64_operand(4);
    b.op(Opcode::IMul);
    b.op(Opcode::Noop);
    assert_eq!(run_image(&b.image()), 20);
}

#[test]
fn comparisons_and_logic_produce_boolean_ints() {
    let mut b = Builder::new();
    b.op(Opcode::IPush).i64_operand(5);
    b.op(Opcode::IPush).i64_operand(3);
    b.op(Opcode::IGt); // 5 > 3 -> 1
    b.op(Opcode::IPush).i64_operand(0);
    b.op(Opcode::LAnd); // 1 && 0 -> 0
    b.op(Opcode::Noop);
    assert_eq!(run_image(&b.image()), 0);
}

#[test]
fn call_and_return_balances_the_stack_and_resumes_after_the_call() {
    let mut b = Builder::new();
    b.op(Opcode::Call);
    let target_patch = b.i32_placeholder();
    b.i32_operand(0); // argc
    b.op(Opcode::Noop);

    let func_offset = b.here();
    b.op(Opcode::IPush).i64_operand(42);
    b.op(Opcode::IRet);
    b.patch_i32(target_patch, func_offset);

    let mut vm = Vm::new(OptionFlags::default());
    vm.load(&b.image());
    let sp_before = vm.stack_pointer();
    let bp_before = vm.base_pointer();
    let result = vm.run().unwrap();
    assert_eq!(result, 42);
    assert_eq!(vm.stack_pointer(), sp_before + 8, "call+iret should leave exactly the return value");
    assert_eq!(vm.base_pointer(), bp_before, "iret must restore the caller's frame base");
}

#[test]
fn call_passes_arguments_with_argument_zero_nearest_the_frame() {
    // fn(a, b) { return a - b; } called as fn(10, 3) -> expect 7, proving
    // the caller-side argument reversal lands arg0 nearest bp as IARG 0.
    let mut b = Builder::new();
    b.op(Opcode::IPush).i64_operand(10); // a
    b.op(Opcode::IPush).i64_operand(3); // b
    b.op(Opcode::Call);
    let target_patch = b.i32_placeholder();
    b.i32_operand(2); // argc
    b.op(Opcode::Noop);

    let func_offset = b.here();
    b.op(Opcode::IArg).i32_operand(0); // a
    b.op(Opcode::IArg).i32_operand(1); // b
    b.op(Opcode::ISub);
    b.op(Opcode::IRet);
    b.patch_i32(target_patch, func_offset);

    assert_eq!(run_image(&b.image()), 7);
}

#[test]
fn locals_round_trip_through_ilload_and_ilsave() {
    let mut b = Builder::new();
    b.op(Opcode::Res).i32_operand(1); // reserve one local slot
    b.op(Opcode::IPush).i64_operand(99);
    b.op(Opcode::ILSave).i32_operand(0);
    b.op(Opcode::ILLoad).i32_operand(0);
    b.op(Opcode::Noop);
    assert_eq!(run_image(&b.image()), 99);
}

#[test]
fn malloc_returns_the_first_heap_address() {
    let malloc_name = b"malloc\0";
    let mut rom = Vec::new();
    rom.extend_from_slice(malloc_name);

    let mut b = Builder::new();
    b.op(Opcode::IPush).i64_operand(64);
    b.op(Opcode::CCall).i32_operand(0).i32_operand(1);
    b.op(Opcode::Noop);

    let image = b.image_with_rom(rom);
    assert_eq!(run_image(&image), START_HEAP as i64);
}

#[test]
fn malloc_then_free_leaves_no_live_chunks() {
    let mut rom = Vec::new();
    rom.extend_from_slice(b"malloc\0");
    let malloc_off = 0i32;
    rom.extend_from_slice(b"free\0");
    let free_off = malloc_off + 7;

    let mut b = Builder::new();
    b.op(Opcode::IPush).i64_operand(64);
    b.op(Opcode::CCall).i32_operand(malloc_off).i32_operand(1);
    b.op(Opcode::CCall).i32_operand(free_off).i32_operand(1);
    b.op(Opcode::Noop);

    let image = b.image_with_rom(rom);
    let mut vm = Vm::new(OptionFlags::default());
    vm.load(&image);
    vm.run().unwrap();
    assert_eq!(vm.heap().live_count(), 0);
}

#[test]
fn division_by_zero_crashes_with_a_runtime_error() {
    let mut b = Builder::new();
    b.op(Opcode::IPush).i64_operand(1);
    b.op(Opcode::IPush).i64_operand(0);
    b.op(Opcode::IDiv);
    b.op(Opcode::Noop);

    let mut vm = Vm::new(OptionFlags::default());
    vm.load(&b.image());
    let err = vm.run().unwrap_err();
    assert_eq!(err, spyre_vm::VmError::DivisionByZero);
}

#[test]
fn unknown_host_function_crashes_rather_than_silently_continuing() {
    let mut rom = Vec::new();
    rom.extend_from_slice(b"fprintf\0");

    let mut b = Builder::new();
    b.op(Opcode::CCall).i32_operand(0).i32_operand(0);
    b.op(Opcode::Noop);

    let image = b.image_with_rom(rom);
    let mut vm = Vm::new(OptionFlags::default());
    vm.load(&image);
    let err = vm.run().unwrap_err();
    assert!(matches!(err, spyre_vm::VmError::UnknownHostFunction(name) if name == "fprintf"));
}

#[test]
fn stack_pointer_never_drops_below_the_stack_region_start() {
    let mut b = Builder::new();
    b.op(Opcode::IPush).i64_operand(7);
    b.op(Opcode::Noop);
    let mut vm = Vm::new(OptionFlags::default());
    vm.load(&b.image());
    vm.run().unwrap();
    assert!(vm.stack_pointer() >= START_STACK - 1);
    assert!(vm.base_pointer() >= SIZE_ROM - 1);
}
