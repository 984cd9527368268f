//! Optional pre-codegen passes (component B', run after typechecking):
//! constant folding and dead-branch elimination. Both work by mutating the
//! arena in place rather than rebuilding a tree, mirroring how the rest of
//! this crate treats the AST as a flat, index-addressed structure.

use crate::ast::{Ast, BinOp, ExprId, ExprKind, StmtId, StmtKind, UnOp};
use crate::parser::Unit;
use crate::types::Type;

/// Fold constant subexpressions and drop statically-dead `if`/`while`
/// branches. `level == 0` is a no-op; anything higher runs the full pass
/// (there is currently only one optimization level worth gating on).
pub fn optimize(unit: &mut Unit, level: u8) {
    if level == 0 {
        return;
    }
    if let Some(root) = unit.ast.root {
        fold_and_prune_stmt(&mut unit.ast, root);
    }
}

#[derive(Debug, Clone, Copy)]
enum Lit {
    Int(i64),
    Float(f64),
}

impl Lit {
    fn truthy(self) -> bool {
        match self {
            Lit::Int(v) => v != 0,
            Lit::Float(v) => v != 0.0,
        }
    }
}

fn as_literal(ast: &Ast, id: ExprId) -> Option<Lit> {
    match ast.expr(id).kind {
        ExprKind::Integer(v) => Some(Lit::Int(v)),
        ExprKind::Float(v) => Some(Lit::Float(v)),
        _ => None,
    }
}

fn fold_unary(op: UnOp, v: Lit) -> Option<ExprKind> {
    Some(match (op, v) {
        (UnOp::Neg, Lit::Int(a)) => ExprKind::Integer(a.wrapping_neg()),
        (UnOp::Neg, Lit::Float(a)) => ExprKind::Float(-a),
        (UnOp::Not, Lit::Int(a)) => ExprKind::Integer((a == 0) as i64),
        (UnOp::BitNot, Lit::Int(a)) => ExprKind::Integer(!a),
        _ => return None,
    })
}

fn fold_binary(op: BinOp, l: Lit, r: Lit) -> Option<ExprKind> {
    use Lit::{Float, Int};
    Some(match (op, l, r) {
        (BinOp::Add, Int(a), Int(b)) => ExprKind::Integer(a.wrapping_add(b)),
        (BinOp::Add, Float(a), Float(b)) => ExprKind::Float(a + b),
        (BinOp::Sub, Int(a), Int(b)) => ExprKind::Integer(a.wrapping_sub(b)),
        (BinOp::Sub, Float(a), Float(b)) => ExprKind::Float(a - b),
        (BinOp::Mul, Int(a), Int(b)) => ExprKind::Integer(a.wrapping_mul(b)),
        (BinOp::Mul, Float(a), Float(b)) => ExprKind::Float(a * b),
        (BinOp::Div, Int(a), Int(b)) if b != 0 => ExprKind::Integer(a.wrapping_div(b)),
        (BinOp::Div, Float(a), Float(b)) => ExprKind::Float(a / b),
        (BinOp::Mod, Int(a), Int(b)) if b != 0 => ExprKind::Integer(a % b),
        (BinOp::Shl, Int(a), Int(b)) => ExprKind::Integer(a.wrapping_shl(b as u32)),
        (BinOp::Shr, Int(a), Int(b)) => ExprKind::Integer(a.wrapping_shr(b as u32)),
        (BinOp::BitAnd, Int(a), Int(b)) => ExprKind::Integer(a & b),
        (BinOp::BitOr, Int(a), Int(b)) => ExprKind::Integer(a | b),
        (BinOp::BitXor, Int(a), Int(b)) => ExprKind::Integer(a ^ b),
        (BinOp::Gt, Int(a), Int(b)) => ExprKind::Integer((a > b) as i64),
        (BinOp::Gt, Float(a), Float(b)) => ExprKind::Integer((a > b) as i64),
        (BinOp::Ge, Int(a), Int(b)) => ExprKind::Integer((a >= b) as i64),
        (BinOp::Ge, Float(a), Float(b)) => ExprKind::Integer((a >= b) as i64),
        (BinOp::Lt, Int(a), Int(b)) => ExprKind::Integer((a < b) as i64),
        (BinOp::Lt, Float(a), Float(b)) => ExprKind::Integer((a < b) as i64),
        (BinOp::Le, Int(a), Int(b)) => ExprKind::Integer((a <= b) as i64),
        (BinOp::Le, Float(a), Float(b)) => ExprKind::Integer((a <= b) as i64),
        (BinOp::Eq, Int(a), Int(b)) => ExprKind::Integer((a == b) as i64),
        (BinOp::Eq, Float(a), Float(b)) => ExprKind::Integer((a == b) as i64),
        (BinOp::Ne, Int(a), Int(b)) => ExprKind::Integer((a != b) as i64),
        (BinOp::Ne, Float(a), Float(b)) => ExprKind::Integer((a != b) as i64),
        _ => return None,
    })
}

fn fold_cast(ty: &Type, v: Lit) -> ExprKind {
    match (ty.is_float(), v) {
        (true, Lit::Int(a)) => ExprKind::Float(a as f64),
        (true, Lit::Float(a)) => ExprKind::Float(a),
        (false, Lit::Float(a)) => ExprKind::Integer(a as i64),
        (false, Lit::Int(a)) => ExprKind::Integer(a),
    }
}

fn fold_expr(ast: &mut Ast, id: ExprId) {
    match ast.expr(id).kind.clone() {
        ExprKind::UnaryOp(op, inner) => {
            fold_expr(ast, inner);
            if let Some(v) = as_literal(ast, inner) {
                if let Some(folded) = fold_unary(op, v) {
                    ast.expr_mut(id).kind = folded;
                }
            }
        }
        ExprKind::BinaryOp(op, l, r) => {
            fold_expr(ast, l);
            fold_expr(ast, r);
            if op.is_foldable() {
                if let (Some(lv), Some(rv)) = (as_literal(ast, l), as_literal(ast, r)) {
                    if let Some(folded) = fold_binary(op, lv, rv) {
                        ast.expr_mut(id).kind = folded;
                    }
                }
            }
        }
        ExprKind::Cast(ty, inner) => {
            fold_expr(ast, inner);
            if let Some(v) = as_literal(ast, inner) {
                ast.expr_mut(id).kind = fold_cast(&ty, v);
            }
        }
        ExprKind::FuncCall(_, args, _) => {
            for a in ast.flatten_comma_chain(args) {
                fold_expr(ast, a);
            }
        }
        ExprKind::Integer(_) | ExprKind::Float(_) | ExprKind::Str(_) | ExprKind::Identifier(_) => {}
    }
}

/// The body of an `if`/`while` is always a synthetic `Block` (see
/// `Checker::parse_body_block`), so a dead branch's replacement is just its
/// children spliced straight into the surrounding block.
fn block_children(ast: &Ast, id: StmtId) -> Vec<StmtId> {
    match &ast.stmt(id).kind {
        StmtKind::Block { children, .. } => children.clone(),
        _ => vec![id],
    }
}

fn fold_and_prune_stmt(ast: &mut Ast, id: StmtId) {
    let kind = ast.stmt(id).kind.clone();
    match kind {
        StmtKind::Block { children, .. } => {
            for c in children {
                fold_and_prune_stmt(ast, c);
            }
        }
        StmtKind::If { cond, then_body, else_body } => {
            fold_expr(ast, cond);
            fold_and_prune_stmt(ast, then_body);
            if let Some(e) = else_body {
                fold_and_prune_stmt(ast, e);
            }
            if let Some(v) = as_literal(ast, cond) {
                let replacement = if v.truthy() {
                    block_children(ast, then_body)
                } else if let Some(e) = else_body {
                    block_children(ast, e)
                } else {
                    Vec::new()
                };
                ast.splice_into_parent(id, &replacement);
            }
        }
        StmtKind::While { cond, body } => {
            fold_expr(ast, cond);
            fold_and_prune_stmt(ast, body);
            // Only a statically-false condition is safe to prune: `while
            // (1) { ... }` is an intentional infinite loop, not dead code.
            if matches!(as_literal(ast, cond), Some(v) if !v.truthy()) {
                ast.splice_into_parent(id, &[]);
            }
        }
        StmtKind::For { init, cond, step, body } => {
            if let Some(i) = init {
                fold_and_prune_stmt(ast, i);
            }
            if let Some(c) = cond {
                fold_expr(ast, c);
            }
            if let Some(s) = step {
                fold_expr(ast, s);
            }
            fold_and_prune_stmt(ast, body);
        }
        StmtKind::Function { body, .. } => {
            if let Some(b) = body {
                fold_and_prune_stmt(ast, b);
            }
        }
        StmtKind::Local { init, .. } => {
            if let Some(i) = init {
                fold_expr(ast, i);
            }
        }
        StmtKind::Statement(e) => fold_expr(ast, e),
        StmtKind::Return(Some(e)) => fold_expr(ast, e),
        StmtKind::Return(None) | StmtKind::Break | StmtKind::Continue => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn main_children(unit: &Unit) -> Vec<StmtId> {
        let body = unit.functions["main"].body.unwrap();
        match &unit.ast.stmt(body).kind {
            StmtKind::Block { children, .. } => children.clone(),
            other => panic!("expected a block, got {other:?}"),
        }
    }

    #[test]
    fn folds_constant_arithmetic_in_a_return_expression() {
        let mut unit = parse("main: () -> int = 2 + 3 * 4;").unwrap();
        optimize(&mut unit, 1);
        let ret_id = main_children(&unit)[0];
        match &unit.ast.stmt(ret_id).kind {
            StmtKind::Return(Some(e)) => {
                assert!(matches!(unit.ast.expr(*e).kind, ExprKind::Integer(14)));
            }
            other => panic!("expected a return statement, got {other:?}"),
        }
    }

    #[test]
    fn level_zero_leaves_the_tree_untouched() {
        let mut unit = parse("main: () -> int = 2 + 3 * 4;").unwrap();
        optimize(&mut unit, 0);
        let ret_id = main_children(&unit)[0];
        match &unit.ast.stmt(ret_id).kind {
            StmtKind::Return(Some(e)) => {
                assert!(matches!(unit.ast.expr(*e).kind, ExprKind::BinaryOp(BinOp::Add, _, _)));
            }
            other => panic!("expected a return statement, got {other:?}"),
        }
    }

    #[test]
    fn eliminates_a_statically_false_if_branch() {
        let source = "main: () -> int { if (0) { return 1; } return 2; }";
        let mut unit = parse(source).unwrap();
        optimize(&mut unit, 1);
        assert_eq!(main_children(&unit).len(), 1);
    }

    #[test]
    fn keeps_a_statically_true_if_branch_and_drops_no_children() {
        let source = "main: () -> int { if (1) { return 1; } return 2; }";
        let mut unit = parse(source).unwrap();
        optimize(&mut unit, 1);
        // The `if`'s single child statement replaces it; the unreachable
        // `return 2;` after it is untouched since control flow analysis
        // isn't part of this pass.
        let children = main_children(&unit);
        assert_eq!(children.len(), 2);
        match &unit.ast.stmt(children[0]).kind {
            StmtKind::Return(Some(e)) => {
                assert!(matches!(unit.ast.expr(*e).kind, ExprKind::Integer(1)));
            }
            other => panic!("expected a return statement, got {other:?}"),
        }
    }

    #[test]
    fn eliminates_a_statically_false_while_loop() {
        let source = "main: () -> int { while (0) { } return 2; }";
        let mut unit = parse(source).unwrap();
        optimize(&mut unit, 1);
        assert_eq!(main_children(&unit).len(), 1);
    }

    #[test]
    fn keeps_an_infinite_while_loop() {
        let source = "main: () -> int { while (1) { } }";
        let mut unit = parse(source).unwrap();
        optimize(&mut unit, 1);
        assert_eq!(main_children(&unit).len(), 1);
    }
}
