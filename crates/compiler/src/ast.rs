//! The AST as an arena of nodes addressed by index, per the data model's
//! arena encoding: `parent`/`prev`/`next` become index fields instead of
//! pointer links, which removes every cyclic-ownership concern while
//! preserving the doubly-linked traversal the original tool relied on.

use crate::types::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StmtId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExprId(pub u32);

/// Which slot of a `BinaryOp` an expression node occupies. Needed so
/// constant folding can splice a literal into its parent in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shl,
    Shr,
    BitAnd,
    BitOr,
    BitXor,
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
    LogAnd,
    LogOr,
    Assign,
    AddAssign,
    SubAssign,
    MulAssign,
    DivAssign,
    ModAssign,
    ShlAssign,
    ShrAssign,
    AndAssign,
    OrAssign,
    XorAssign,
    Comma,
    Member,
}

impl BinOp {
    /// Arithmetic/relational family that requires exact operand type match
    /// per the typechecking rules (as opposed to the bitwise family, which
    /// only requires `int` operands).
    pub fn is_exact_match_family(self) -> bool {
        matches!(
            self,
            BinOp::Add
                | BinOp::Sub
                | BinOp::Mul
                | BinOp::Div
                | BinOp::Gt
                | BinOp::Ge
                | BinOp::Lt
                | BinOp::Le
                | BinOp::Assign
                | BinOp::AddAssign
                | BinOp::SubAssign
                | BinOp::MulAssign
                | BinOp::DivAssign
        )
    }

    pub fn is_bitwise_family(self) -> bool {
        matches!(
            self,
            BinOp::Mod
                | BinOp::Shl
                | BinOp::Shr
                | BinOp::BitAnd
                | BinOp::BitOr
                | BinOp::BitXor
                | BinOp::ModAssign
                | BinOp::ShlAssign
                | BinOp::ShrAssign
                | BinOp::AndAssign
                | BinOp::OrAssign
                | BinOp::XorAssign
        )
    }

    pub fn is_compound_assign(self) -> bool {
        matches!(
            self,
            BinOp::AddAssign
                | BinOp::SubAssign
                | BinOp::MulAssign
                | BinOp::DivAssign
                | BinOp::ModAssign
                | BinOp::ShlAssign
                | BinOp::ShrAssign
                | BinOp::AndAssign
                | BinOp::OrAssign
                | BinOp::XorAssign
        )
    }

    /// Whitelist of operators constant folding is permitted to fold.
    pub fn is_foldable(self) -> bool {
        !matches!(self, BinOp::Comma | BinOp::Member | BinOp::LogAnd | BinOp::LogOr)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
    BitNot,
    Deref,
    AddrOf,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Integer(i64),
    Float(f64),
    Str(Vec<u8>),
    Identifier(String),
    UnaryOp(UnOp, ExprId),
    BinaryOp(BinOp, ExprId, ExprId),
    Cast(Type, ExprId),
    /// callee name, comma-chain argument expression (None if zero args),
    /// explicit generic type arguments from `<...>`.
    FuncCall(String, Option<ExprId>, Vec<Type>),
}

#[derive(Debug, Clone)]
pub struct ExprNode {
    pub kind: ExprKind,
    pub parent: Option<ExprId>,
    pub side: Option<Side>,
    pub line: u32,
    /// Filled in during typechecking.
    pub ty: Option<Type>,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    If { cond: ExprId, then_body: StmtId, else_body: Option<StmtId> },
    While { cond: ExprId, body: StmtId },
    For { init: Option<StmtId>, cond: Option<ExprId>, step: Option<ExprId>, body: StmtId },
    Function {
        name: String,
        generics: Vec<String>,
        params: Vec<(String, Type)>,
        return_type: Type,
        body: Option<StmtId>,
        is_cfunc: bool,
    },
    /// A local variable declaration, `name: Type [= init];`, living in the
    /// nearest enclosing `Block`. `slot` is filled in during typechecking.
    Local { name: String, ty: Type, init: Option<ExprId>, slot: Option<u32> },
    Block { locals: Vec<(String, Type)>, children: Vec<StmtId> },
    Statement(ExprId),
    Return(Option<ExprId>),
    Break,
    Continue,
}

#[derive(Debug, Clone)]
pub struct StmtNode {
    pub kind: StmtKind,
    pub parent: Option<StmtId>,
    pub prev: Option<StmtId>,
    pub next: Option<StmtId>,
    pub line: u32,
}

/// Owns every statement and expression node created while parsing one
/// translation unit, addressed by `StmtId`/`ExprId` rather than pointers.
#[derive(Debug, Default)]
pub struct Ast {
    pub stmts: Vec<StmtNode>,
    pub exprs: Vec<ExprNode>,
    pub root: Option<StmtId>,
}

impl Ast {
    pub fn new() -> Self {
        Ast::default()
    }

    pub fn push_stmt(&mut self, kind: StmtKind, line: u32) -> StmtId {
        let id = StmtId(self.stmts.len() as u32);
        self.stmts.push(StmtNode { kind, parent: None, prev: None, next: None, line });
        id
    }

    pub fn push_expr(&mut self, kind: ExprKind, line: u32) -> ExprId {
        let id = ExprId(self.exprs.len() as u32);
        self.exprs.push(ExprNode { kind, parent: None, side: None, line, ty: None });
        id
    }

    pub fn stmt(&self, id: StmtId) -> &StmtNode {
        &self.stmts[id.0 as usize]
    }

    pub fn stmt_mut(&mut self, id: StmtId) -> &mut StmtNode {
        &mut self.stmts[id.0 as usize]
    }

    pub fn expr(&self, id: ExprId) -> &ExprNode {
        &self.exprs[id.0 as usize]
    }

    pub fn expr_mut(&mut self, id: ExprId) -> &mut ExprNode {
        &mut self.exprs[id.0 as usize]
    }

    /// Append `child` to the end of `block`'s children, wiring prev/next/parent.
    pub fn append_child(&mut self, block: StmtId, child: StmtId) {
        let last = match &mut self.stmt_mut(block).kind {
            StmtKind::Block { children, .. } => {
                let last = children.last().copied();
                children.push(child);
                last
            }
            _ => panic!("append_child called on a non-Block node"),
        };
        self.stmt_mut(child).parent = Some(block);
        if let Some(last) = last {
            self.stmt_mut(last).next = Some(child);
            self.stmt_mut(child).prev = Some(last);
        }
    }

    /// Replace `old`'s slot in its parent's child list with `new` (used by
    /// dead-branch elimination to splice a body in place of an `If`).
    pub fn splice_into_parent(&mut self, old: StmtId, replacement: &[StmtId]) {
        let Some(parent) = self.stmt(old).parent else { return };
        let prev = self.stmt(old).prev;
        let next = self.stmt(old).next;
        if let StmtKind::Block { children, .. } = &mut self.stmt_mut(parent).kind {
            let pos = children.iter().position(|&c| c == old).expect("old must be a child of parent");
            children.splice(pos..=pos, replacement.iter().copied());
        }
        let mut cursor = prev;
        for &id in replacement {
            self.stmt_mut(id).parent = Some(parent);
            self.stmt_mut(id).prev = cursor;
            if let Some(c) = cursor {
                self.stmt_mut(c).next = Some(id);
            }
            cursor = Some(id);
        }
        self.stmt_mut_next_link(cursor, next);
    }

    fn stmt_mut_next_link(&mut self, of: Option<StmtId>, next: Option<StmtId>) {
        if let Some(id) = of {
            self.stmt_mut(id).next = next;
        }
        if let Some(id) = next {
            self.stmt_mut(id).prev = of;
        }
    }

    /// Unlink `old` from its parent's child list entirely (falsy dead branch).
    pub fn unlink(&mut self, old: StmtId) {
        self.splice_into_parent(old, &[]);
    }

    /// Flatten a left-leaning `BinOp::Comma` chain (how call arguments are
    /// parsed) into source-order operands. `None` means zero arguments.
    pub fn flatten_comma_chain(&self, root: Option<ExprId>) -> Vec<ExprId> {
        let Some(root) = root else { return Vec::new() };
        let mut out = Vec::new();
        fn walk(ast: &Ast, id: ExprId, out: &mut Vec<ExprId>) {
            if let ExprKind::BinaryOp(BinOp::Comma, l, r) = ast.expr(id).kind {
                walk(ast, l, out);
                out.push(r);
            } else {
                out.push(id);
            }
        }
        walk(self, root, &mut out);
        out
    }
}
