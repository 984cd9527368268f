//! Code generator (component C): walks a typechecked [`Unit`] and emits the
//! assembly text `spyre-asm` turns into a ROM image.
//!
//! The original tool emitted machine code directly and had to defer a
//! branch's target address until the branch's body had been walked, patching
//! the jump back in afterwards. `spyre-asm` already does two-pass label
//! resolution (see `spyre_asm::assemble::scan`), so this generator can just
//! write straight-line text with forward-referenced labels and let the
//! assembler resolve them — there is no patch buffer to maintain here.

use std::collections::HashMap;
use std::fmt::Write as _;

use crate::ast::{Ast, BinOp, ExprId, ExprKind, StmtId, StmtKind, UnOp};
use crate::parser::{Binding, FunctionEntry, Unit};
use crate::types::Type;

#[derive(Debug, Clone)]
pub enum CodeGenError {
    /// An invariant a typechecked `Unit` should already guarantee was
    /// violated — these indicate a bug in this crate, not in the input.
    Logic(String),
    Format(std::fmt::Error),
}

impl std::fmt::Display for CodeGenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodeGenError::Logic(msg) => write!(f, "codegen: {msg}"),
            CodeGenError::Format(e) => write!(f, "codegen: {e}"),
        }
    }
}

impl std::error::Error for CodeGenError {}

impl From<std::fmt::Error> for CodeGenError {
    fn from(e: std::fmt::Error) -> Self {
        CodeGenError::Format(e)
    }
}

impl From<String> for CodeGenError {
    fn from(e: String) -> Self {
        CodeGenError::Logic(e)
    }
}

/// Generate the `spyre-asm` source for a whole typechecked unit.
pub fn generate(unit: &Unit) -> Result<String, CodeGenError> {
    let mut cg = Codegen {
        unit,
        out: String::new(),
        label_counter: 0,
        string_consts: HashMap::new(),
        cfunc_consts: HashMap::new(),
        scratch_slot: 0,
        loop_starts: Vec::new(),
        loop_ends: Vec::new(),
    };
    cg.generate_program()
}

struct Codegen<'u> {
    unit: &'u Unit,
    out: String,
    label_counter: u32,
    string_consts: HashMap<Vec<u8>, String>,
    cfunc_consts: HashMap<String, String>,
    /// The slot reserved past every declared local, used as scratch storage
    /// to hold an lvalue's address across a compound assignment (this ISA
    /// has no instruction to duplicate a stack word).
    scratch_slot: u32,
    loop_starts: Vec<String>,
    loop_ends: Vec<String>,
}

fn escape_for_asm(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\0' => out.push_str("\\0"),
            _ => out.push(ch),
        }
    }
    out
}

/// `byte` has no dedicated store opcode (only `CDER` reads narrow); writes
/// through a `byte^` fall back to `ISAVE`, which writes a full 8-byte word.
/// This mirrors a real gap in the instruction set rather than one this
/// generator introduces.
fn store_mnemonic(ty: &Type) -> &'static str {
    if ty.is_float() {
        "FSAVE"
    } else {
        "ISAVE"
    }
}

fn deref_mnemonic(ty: &Type) -> &'static str {
    if ty.is_float() {
        "FDER"
    } else if ty.pointer_depth == 0 && ty.name == "byte" {
        "CDER"
    } else {
        "IDER"
    }
}

fn compound_base_op(op: BinOp) -> Option<BinOp> {
    Some(match op {
        BinOp::AddAssign => BinOp::Add,
        BinOp::SubAssign => BinOp::Sub,
        BinOp::MulAssign => BinOp::Mul,
        BinOp::DivAssign => BinOp::Div,
        BinOp::ModAssign => BinOp::Mod,
        BinOp::ShlAssign => BinOp::Shl,
        BinOp::ShrAssign => BinOp::Shr,
        BinOp::AndAssign => BinOp::BitAnd,
        BinOp::OrAssign => BinOp::BitOr,
        BinOp::XorAssign => BinOp::BitXor,
        _ => return None,
    })
}

fn binding_slot(binding: &Binding) -> u32 {
    match binding {
        Binding::Param(slot, _) | Binding::Local(slot, _) => *slot,
    }
}

impl<'u> Codegen<'u> {
    fn fresh_label(&mut self) -> String {
        let n = self.label_counter;
        self.label_counter += 1;
        format!("__LABEL__{n}")
    }

    fn string_const(&mut self, bytes: &[u8]) -> String {
        if let Some(name) = self.string_consts.get(bytes) {
            return name.clone();
        }
        let name = format!("__STR_{}", self.string_consts.len());
        self.string_consts.insert(bytes.to_vec(), name.clone());
        name
    }

    fn cfunc_const(&mut self, name: &str) -> String {
        if let Some(const_name) = self.cfunc_consts.get(name) {
            return const_name.clone();
        }
        let const_name = format!("__CFUNC_{name}");
        self.cfunc_consts.insert(name.to_string(), const_name.clone());
        const_name
    }

    fn ast(&self) -> &Ast {
        &self.unit.ast
    }

    fn generate_program(&mut self) -> Result<String, CodeGenError> {
        writeln!(self.out, "JMP __LABEL__ENTRY")?;

        let unit = self.unit;
        let mut names: Vec<&String> = unit.functions.keys().collect();
        names.sort();
        for name in names {
            let entry = &unit.functions[name];
            if entry.sig.is_cfunc || entry.body.is_none() {
                continue;
            }
            self.generate_function(name, entry.clone())?;
        }

        writeln!(self.out, "__LABEL__ENTRY:")?;
        writeln!(self.out, "CALL __FUNC__main, 0")?;
        writeln!(self.out, "NOOP")?;

        let mut consts = String::new();
        let mut strings: Vec<(&Vec<u8>, &String)> = self.string_consts.iter().collect();
        strings.sort_by(|a, b| a.1.cmp(b.1));
        for (bytes, name) in strings {
            writeln!(consts, "let {name} \"{}\"", escape_for_asm(bytes))?;
        }
        let mut cfuncs: Vec<(&String, &String)> = self.cfunc_consts.iter().collect();
        cfuncs.sort_by(|a, b| a.1.cmp(b.1));
        for (fname, const_name) in cfuncs {
            writeln!(consts, "let {const_name} \"{fname}\"")?;
        }

        Ok(format!("{consts}{}", self.out))
    }

    fn generate_function(&mut self, name: &str, entry: FunctionEntry) -> Result<(), CodeGenError> {
        let body = entry.body.ok_or_else(|| format!("function '{name}' has no body to generate"))?;
        let total_locals = *self.unit.locals_count.get(name).unwrap_or(&0);
        self.scratch_slot = total_locals;
        let frame_slots = total_locals + 1;

        writeln!(self.out, "__FUNC__{name}:")?;
        writeln!(self.out, "RES {frame_slots}")?;
        for (i, (_, pty)) in entry.sig.params.iter().enumerate() {
            writeln!(self.out, "IARG {i}")?;
            let store = if pty.is_float() { "FLSAVE" } else { "ILSAVE" };
            writeln!(self.out, "{store} {i}")?;
        }

        self.generate_stmt(body)?;

        // Fallthrough epilogue for a body that doesn't return on every path
        // (always true for `void` functions, a safety net otherwise).
        let ret = &entry.sig.return_type;
        if *ret == Type::void() {
            writeln!(self.out, "VRET")?;
        } else if ret.is_float() {
            writeln!(self.out, "FPUSH 0.0")?;
            writeln!(self.out, "FRET")?;
        } else {
            writeln!(self.out, "IPUSH 0")?;
            writeln!(self.out, "IRET")?;
        }
        Ok(())
    }

    fn generate_stmt(&mut self, id: StmtId) -> Result<(), CodeGenError> {
        match self.ast().stmt(id).kind.clone() {
            StmtKind::Block { children, .. } => {
                for c in children {
                    self.generate_stmt(c)?;
                }
            }
            StmtKind::If { cond, then_body, else_body } => {
                let else_label = self.fresh_label();
                let end_label = self.fresh_label();
                self.generate_value(cond)?;
                writeln!(self.out, "JZ {else_label}")?;
                self.generate_stmt(then_body)?;
                writeln!(self.out, "JMP {end_label}")?;
                writeln!(self.out, "{else_label}:")?;
                if let Some(e) = else_body {
                    self.generate_stmt(e)?;
                }
                writeln!(self.out, "{end_label}:")?;
            }
            StmtKind::While { cond, body } => {
                let top = self.fresh_label();
                let end = self.fresh_label();
                writeln!(self.out, "{top}:")?;
                self.generate_value(cond)?;
                writeln!(self.out, "JZ {end}")?;
                self.loop_starts.push(top.clone());
                self.loop_ends.push(end.clone());
                self.generate_stmt(body)?;
                self.loop_starts.pop();
                self.loop_ends.pop();
                writeln!(self.out, "JMP {top}")?;
                writeln!(self.out, "{end}:")?;
            }
            StmtKind::For { init, cond, step, body } => {
                if let Some(i) = init {
                    self.generate_stmt(i)?;
                }
                let top = self.fresh_label();
                let end = self.fresh_label();
                let continue_label = self.fresh_label();
                writeln!(self.out, "{top}:")?;
                if let Some(c) = cond {
                    self.generate_value(c)?;
                    writeln!(self.out, "JZ {end}")?;
                }
                self.loop_starts.push(continue_label.clone());
                self.loop_ends.push(end.clone());
                self.generate_stmt(body)?;
                self.loop_starts.pop();
                self.loop_ends.pop();
                writeln!(self.out, "{continue_label}:")?;
                if let Some(s) = step {
                    self.generate_value(s)?;
                    writeln!(self.out, "RES -1")?;
                }
                writeln!(self.out, "JMP {top}")?;
                writeln!(self.out, "{end}:")?;
            }
            StmtKind::Function { .. } => {
                // Nested declarations aren't reachable as their own call
                // target; only root-level functions get a `__FUNC__` label.
            }
            StmtKind::Local { ty, init, slot, .. } => {
                if let Some(init_id) = init {
                    self.generate_value(init_id)?;
                    let slot = slot.ok_or_else(|| "local has no slot assigned by typechecking".to_string())?;
                    let store = if ty.is_float() { "FLSAVE" } else { "ILSAVE" };
                    writeln!(self.out, "{store} {slot}")?;
                }
            }
            StmtKind::Statement(e) => {
                self.generate_value(e)?;
                // A `void`-returning call (e.g. `println(...)`) leaves
                // nothing on the stack to discard — see stdlib host
                // functions, most of which never push a value back.
                let ty = self.ast().expr(e).ty.clone();
                if ty.as_ref() != Some(&Type::void()) {
                    writeln!(self.out, "RES -1")?;
                }
            }
            StmtKind::Return(expr) => match expr {
                Some(e) => {
                    self.generate_value(e)?;
                    let ty = self
                        .ast()
                        .expr(e)
                        .ty
                        .clone()
                        .ok_or_else(|| "return expression missing an inferred type".to_string())?;
                    writeln!(self.out, "{}", if ty.is_float() { "FRET" } else { "IRET" })?;
                }
                None => {
                    writeln!(self.out, "VRET")?;
                }
            },
            StmtKind::Break => {
                let label = self.loop_ends.last().ok_or_else(|| "'break' outside of a loop".to_string())?.clone();
                writeln!(self.out, "JMP {label}")?;
            }
            StmtKind::Continue => {
                let label =
                    self.loop_starts.last().ok_or_else(|| "'continue' outside of a loop".to_string())?.clone();
                writeln!(self.out, "JMP {label}")?;
            }
        }
        Ok(())
    }

    /// Push the single value an expression evaluates to.
    fn generate_value(&mut self, id: ExprId) -> Result<(), CodeGenError> {
        let ty = self.ast().expr(id).ty.clone();
        match self.ast().expr(id).kind.clone() {
            ExprKind::Integer(v) => {
                writeln!(self.out, "IPUSH {v}")?;
            }
            ExprKind::Float(v) => {
                writeln!(self.out, "FPUSH {v:?}")?;
            }
            ExprKind::Str(bytes) => {
                let name = self.string_const(&bytes);
                writeln!(self.out, "IPUSH {name}")?;
            }
            ExprKind::Identifier(_) => {
                let binding = self
                    .unit
                    .bindings
                    .get(&id)
                    .ok_or_else(|| "identifier has no resolved binding".to_string())?;
                let slot = binding_slot(binding);
                let ty = ty.ok_or_else(|| "identifier missing an inferred type".to_string())?;
                let load = if ty.is_float() { "FLLOAD" } else { "ILLOAD" };
                writeln!(self.out, "{load} {slot}")?;
            }
            ExprKind::UnaryOp(UnOp::AddrOf, inner) => {
                self.generate_address(inner)?;
            }
            ExprKind::UnaryOp(UnOp::Deref, inner) => {
                self.generate_value(inner)?;
                let result_ty = ty.ok_or_else(|| "dereference missing an inferred type".to_string())?;
                writeln!(self.out, "{}", deref_mnemonic(&result_ty))?;
            }
            ExprKind::UnaryOp(op, inner) => {
                self.generate_value(inner)?;
                let mnemonic = match op {
                    UnOp::Neg => "NEG",
                    UnOp::Not => "LNOT",
                    UnOp::BitNot => "NOT",
                    UnOp::AddrOf | UnOp::Deref => unreachable!("handled above"),
                };
                writeln!(self.out, "{mnemonic}")?;
            }
            ExprKind::BinaryOp(BinOp::Member, ..) => {
                self.generate_address(id)?;
                let result_ty = ty.ok_or_else(|| "member access missing an inferred type".to_string())?;
                writeln!(self.out, "{}", deref_mnemonic(&result_ty))?;
            }
            ExprKind::BinaryOp(op, l, r) if op == BinOp::Assign || op.is_compound_assign() => {
                self.generate_assign(op, l, r)?;
            }
            ExprKind::BinaryOp(BinOp::Comma, l, r) => {
                self.generate_value(l)?;
                writeln!(self.out, "RES -1")?;
                self.generate_value(r)?;
            }
            ExprKind::BinaryOp(BinOp::LogAnd, l, r) => {
                self.generate_value(l)?;
                self.generate_value(r)?;
                writeln!(self.out, "LAND")?;
            }
            ExprKind::BinaryOp(BinOp::LogOr, l, r) => {
                self.generate_value(l)?;
                self.generate_value(r)?;
                writeln!(self.out, "LOR")?;
            }
            ExprKind::BinaryOp(op, l, r) => {
                let lt = self
                    .ast()
                    .expr(l)
                    .ty
                    .clone()
                    .ok_or_else(|| "left operand missing an inferred type".to_string())?;
                self.generate_value(l)?;
                self.generate_value(r)?;
                self.emit_binary_op(op, &lt)?;
            }
            ExprKind::Cast(target, operand) => {
                let operand_ty = self
                    .ast()
                    .expr(operand)
                    .ty
                    .clone()
                    .ok_or_else(|| "cast operand missing an inferred type".to_string())?;
                self.generate_value(operand)?;
                match (operand_ty.is_float(), target.is_float()) {
                    (false, true) => writeln!(self.out, "ITOF 0")?,
                    (true, false) => writeln!(self.out, "FTOI 0")?,
                    _ => {}
                }
            }
            ExprKind::FuncCall(name, args, _generic_args) => {
                self.generate_call(&name, args)?;
            }
        }
        Ok(())
    }

    fn emit_binary_op(&mut self, op: BinOp, lt: &Type) -> Result<(), CodeGenError> {
        if matches!(op, BinOp::Add | BinOp::Sub) && lt.is_pointer() {
            let scaled = lt.pointee_width() == 8;
            let mnemonic = match (op, scaled) {
                (BinOp::Add, true) => "PADD",
                (BinOp::Sub, true) => "PSUB",
                (BinOp::Add, false) => "IADD",
                (BinOp::Sub, false) => "ISUB",
                _ => unreachable!(),
            };
            writeln!(self.out, "{mnemonic}")?;
            return Ok(());
        }
        if op == BinOp::Ne {
            writeln!(self.out, "{}", if lt.is_float() { "FCMP" } else { "ICMP" })?;
            writeln!(self.out, "LNOT")?;
            return Ok(());
        }
        let f = lt.is_float();
        let mnemonic = match op {
            BinOp::Add => if f { "FADD" } else { "IADD" },
            BinOp::Sub => if f { "FSUB" } else { "ISUB" },
            BinOp::Mul => if f { "FMUL" } else { "IMUL" },
            BinOp::Div => if f { "FDIV" } else { "IDIV" },
            BinOp::Mod => "MOD",
            BinOp::Shl => "SHL",
            BinOp::Shr => "SHR",
            BinOp::BitAnd => "AND",
            BinOp::BitOr => "OR",
            BinOp::BitXor => "XOR",
            BinOp::Gt => if f { "FGT" } else { "IGT" },
            BinOp::Ge => if f { "FGE" } else { "IGE" },
            BinOp::Lt => if f { "FLT" } else { "ILT" },
            BinOp::Le => if f { "FLE" } else { "ILE" },
            BinOp::Eq => if f { "FCMP" } else { "ICMP" },
            other => return Err(format!("'{other:?}' does not produce a value directly").into()),
        };
        writeln!(self.out, "{mnemonic}")?;
        Ok(())
    }

    /// Push the address of an lvalue (identifier slot, struct member, or
    /// pointer dereference) without reading through it.
    fn generate_address(&mut self, id: ExprId) -> Result<(), CodeGenError> {
        match self.ast().expr(id).kind.clone() {
            ExprKind::Identifier(_) => {
                let binding = self
                    .unit
                    .bindings
                    .get(&id)
                    .ok_or_else(|| "identifier has no resolved binding".to_string())?;
                writeln!(self.out, "LEA {}", binding_slot(binding))?;
            }
            ExprKind::BinaryOp(BinOp::Member, base, field_expr) => {
                let base_ty = self
                    .ast()
                    .expr(base)
                    .ty
                    .clone()
                    .ok_or_else(|| "struct base missing an inferred type".to_string())?;
                let field_name = match &self.ast().expr(field_expr).kind {
                    ExprKind::Identifier(name) => name.clone(),
                    _ => return Err("member access field is not an identifier".to_string().into()),
                };
                if base_ty.is_pointer() {
                    self.generate_value(base)?;
                } else {
                    self.generate_address(base)?;
                }
                let field = base_ty
                    .field(&field_name)
                    .ok_or_else(|| format!("'{}' has no field '{field_name}'", base_ty.name))?;
                writeln!(self.out, "ICINC {}", field.offset)?;
            }
            ExprKind::UnaryOp(UnOp::Deref, inner) => {
                self.generate_value(inner)?;
            }
            _ => return Err("expression is not assignable".to_string().into()),
        }
        Ok(())
    }

    fn generate_assign(&mut self, op: BinOp, lhs: ExprId, rhs: ExprId) -> Result<(), CodeGenError> {
        let result_ty = self
            .ast()
            .expr(lhs)
            .ty
            .clone()
            .ok_or_else(|| "assignment target missing an inferred type".to_string())?;
        let base_op = compound_base_op(op);

        if let ExprKind::Identifier(_) = self.ast().expr(lhs).kind.clone() {
            let binding = self
                .unit
                .bindings
                .get(&lhs)
                .ok_or_else(|| "assignment target has no resolved binding".to_string())?;
            let slot = binding_slot(binding);
            let store = if result_ty.is_float() { "FLSAVE" } else { "ILSAVE" };
            let load = if result_ty.is_float() { "FLLOAD" } else { "ILLOAD" };
            if let Some(base) = base_op {
                writeln!(self.out, "{load} {slot}")?;
                self.generate_value(rhs)?;
                self.emit_binary_op(base, &result_ty)?;
            } else {
                self.generate_value(rhs)?;
            }
            writeln!(self.out, "{store} {slot}")?;
            writeln!(self.out, "{load} {slot}")?;
            return Ok(());
        }

        // Member-access or pointer-dereference target: this ISA has no
        // DUP, so the address is stashed in the function's scratch slot and
        // reloaded each time it's needed.
        let deref_read = deref_mnemonic(&result_ty);
        let scratch = self.scratch_slot;
        self.generate_address(lhs)?;
        writeln!(self.out, "ILSAVE {scratch}")?;
        if let Some(base) = base_op {
            writeln!(self.out, "ILLOAD {scratch}")?;
            writeln!(self.out, "ILLOAD {scratch}")?;
            writeln!(self.out, "{deref_read}")?;
            self.generate_value(rhs)?;
            self.emit_binary_op(base, &result_ty)?;
        } else {
            writeln!(self.out, "ILLOAD {scratch}")?;
            self.generate_value(rhs)?;
        }
        writeln!(self.out, "{}", store_mnemonic(&result_ty))?;
        writeln!(self.out, "ILLOAD {scratch}")?;
        writeln!(self.out, "{deref_read}")?;
        Ok(())
    }

    fn generate_call(&mut self, name: &str, args: Option<ExprId>) -> Result<(), CodeGenError> {
        let entry = self
            .unit
            .functions
            .get(name)
            .cloned()
            .ok_or_else(|| format!("call to unknown function '{name}'"))?;
        let arg_ids = self.ast().flatten_comma_chain(args);
        for &a in &arg_ids {
            self.generate_value(a)?;
        }
        if entry.sig.is_cfunc {
            let const_name = self.cfunc_const(name);
            writeln!(self.out, "CCALL {const_name}, {}", arg_ids.len())?;
        } else {
            writeln!(self.out, "CALL __FUNC__{name}, {}", arg_ids.len())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    #[test]
    fn emits_entry_trampoline_and_main_label() {
        let unit = parse("main: () -> int = 41 + 1;").unwrap();
        let asm = generate(&unit).unwrap();
        assert!(asm.contains("JMP __LABEL__ENTRY"));
        assert!(asm.contains("__LABEL__ENTRY:"));
        assert!(asm.contains("CALL __FUNC__main, 0"));
        assert!(asm.contains("__FUNC__main:"));
        assert!(asm.contains("IRET"));
    }

    #[test]
    fn deduplicates_repeated_string_literals() {
        let source = r#"
            greet: cfunc (s: byte^) -> int;
            main: () -> int {
                greet("hi");
                greet("hi");
                return 0;
            }
        "#;
        let unit = parse(source).unwrap();
        let asm = generate(&unit).unwrap();
        assert_eq!(asm.matches("let __STR_0 \"hi\"").count(), 1);
        assert_eq!(asm.matches("IPUSH __STR_0").count(), 2);
    }

    #[test]
    fn host_call_emits_ccall_with_a_name_constant() {
        let source = "main: () -> int { println(\"hi\"); return 0; }";
        let unit = parse(source).unwrap();
        let asm = generate(&unit).unwrap();
        assert!(asm.contains("let __CFUNC_println \"println\""));
        assert!(asm.contains("CCALL __CFUNC_println, 1"));
    }

    #[test]
    fn struct_field_store_uses_scratch_slot_and_byte_offsets() {
        let source = r#"
            p: struct { x: int; y: int; }
            main: () -> int {
                v: p;
                v.y = 7;
                return v.y;
            }
        "#;
        let unit = parse(source).unwrap();
        let asm = generate(&unit).unwrap();
        assert!(asm.contains("ICINC 8"));
        assert!(asm.contains("ISAVE"));
    }

    #[test]
    fn while_loop_emits_top_and_end_labels() {
        let source = "main: () -> int { i: int = 0; while (i < 10) { i += 1; } return i; }";
        let unit = parse(source).unwrap();
        let asm = generate(&unit).unwrap();
        assert!(asm.contains("ILT"));
        assert!(asm.contains("JZ __LABEL__"));
        assert!(asm.contains("JMP __LABEL__"));
    }

    #[test]
    fn pointer_arithmetic_on_int_pointer_scales_via_padd() {
        let source = "main: () -> int { p: int^; q: int^ = p + 1; return 0; }";
        let unit = parse(source).unwrap();
        let asm = generate(&unit).unwrap();
        assert!(asm.contains("PADD"));
    }
}
