//! Expression graph.
//!
//! All expressions live in an arena owned by [`Ast`] and are referred to by
//! [`ExprId`] indices; variable and function declarations live in sibling
//! arenas behind [`DeclId`] and [`FunId`]. Back-references (an identifier's
//! declaration, a call's resolved overload) are plain optional indices, so
//! the possibly-cyclic declaration graph needs no ownership cycles: a node
//! is anchored the moment it is allocated.
//!
//! Type-insts are ordinary expression nodes (`ExprKind::TypeInst`), so the
//! dependency sorter and the typer can walk index-set and domain
//! expressions like any other. The declared type of a type-inst is carried
//! in the node's `ty` field and refined in place by the typer.

use crate::span::Span;
use crate::ty::Type;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Index of an expression in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExprId(pub u32);

/// Index of a variable declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeclId(pub u32);

/// Index of a function declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunId(pub u32);

/// Identifier spelling. The anonymous identifier is the empty string.
pub type Ident = String;

/// Integer literal value used for the upper end of open ranges (`x..`).
pub const INT_INFINITY: i64 = i64::MAX;
/// Integer literal value used for the lower end of open ranges (`..x`).
pub const INT_NEG_INFINITY: i64 = i64::MIN;

/// Binary operators, named by their canonical quoted function identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOpKind {
    Plus,
    Minus,
    Mult,
    Div,
    IDiv,
    Mod,
    Pow,
    DotDot,
    PlusPlus,
    Eq,
    Neq,
    Le,
    Leq,
    Gr,
    Geq,
    In,
    Subset,
    Superset,
    Union,
    Diff,
    SymDiff,
    Intersect,
    And,
    Or,
    Impl,
    RImpl,
    Equiv,
    Xor,
}

impl BinOpKind {
    /// The quoted function identifier this operator resolves against.
    pub fn op_name(self) -> &'static str {
        match self {
            BinOpKind::Plus => "'+'",
            BinOpKind::Minus => "'-'",
            BinOpKind::Mult => "'*'",
            BinOpKind::Div => "'/'",
            BinOpKind::IDiv => "'div'",
            BinOpKind::Mod => "'mod'",
            BinOpKind::Pow => "'^'",
            BinOpKind::DotDot => "'..'",
            BinOpKind::PlusPlus => "'++'",
            BinOpKind::Eq => "'='",
            BinOpKind::Neq => "'!='",
            BinOpKind::Le => "'<'",
            BinOpKind::Leq => "'<='",
            BinOpKind::Gr => "'>'",
            BinOpKind::Geq => "'>='",
            BinOpKind::In => "'in'",
            BinOpKind::Subset => "'subset'",
            BinOpKind::Superset => "'superset'",
            BinOpKind::Union => "'union'",
            BinOpKind::Diff => "'diff'",
            BinOpKind::SymDiff => "'symdiff'",
            BinOpKind::Intersect => "'intersect'",
            BinOpKind::And => "'/\\'",
            BinOpKind::Or => "'\\/'",
            BinOpKind::Impl => "'->'",
            BinOpKind::RImpl => "'<-'",
            BinOpKind::Equiv => "'<->'",
            BinOpKind::Xor => "'xor'",
        }
    }

    /// True for `=`, `!=`, `<`, `<=`, `>`, `>=`.
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOpKind::Eq
                | BinOpKind::Neq
                | BinOpKind::Le
                | BinOpKind::Leq
                | BinOpKind::Gr
                | BinOpKind::Geq
        )
    }

    /// Mirror a comparison so its operands can be swapped.
    pub fn swapped(self) -> Self {
        match self {
            BinOpKind::Le => BinOpKind::Gr,
            BinOpKind::Leq => BinOpKind::Geq,
            BinOpKind::Gr => BinOpKind::Le,
            BinOpKind::Geq => BinOpKind::Leq,
            other => other,
        }
    }
}

impl fmt::Display for BinOpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.op_name())
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnOpKind {
    Not,
    UMinus,
    UPlus,
}

impl UnOpKind {
    pub fn op_name(self) -> &'static str {
        match self {
            UnOpKind::Not => "'not'",
            UnOpKind::UMinus => "'-'",
            UnOpKind::UPlus => "'+'",
        }
    }
}

impl fmt::Display for UnOpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.op_name())
    }
}

/// One comprehension generator: `i, j in e where w`.
///
/// An *assignment generator* (`i = e`) has `in_expr == None` and carries
/// its defining expression in `where_expr`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generator {
    pub decls: Vec<DeclId>,
    pub in_expr: Option<ExprId>,
    pub where_expr: Option<ExprId>,
}

/// An item of a `let` body: a local declaration or a constraint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum LetItem {
    Decl(DeclId),
    Constraint(ExprId),
}

/// Expression node kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    IntLit(i64),
    FloatLit(f64),
    BoolLit(bool),
    StringLit(String),
    /// The absent literal `<>`
    Absent,
    /// The anonymous wildcard `_`
    Anon,
    SetLit(Vec<ExprId>),
    Id {
        name: Ident,
        decl: Option<DeclId>,
    },
    ArrayLit {
        elems: Vec<ExprId>,
        /// Number of declared dimensions (1 for plain literals)
        dims: u8,
    },
    ArrayAccess {
        array: ExprId,
        idxs: Vec<ExprId>,
    },
    Comprehension {
        generators: Vec<Generator>,
        body: ExprId,
        set: bool,
    },
    IfThenElse {
        /// (condition, then) pairs, in source order
        branches: Vec<(ExprId, ExprId)>,
        else_expr: Option<ExprId>,
    },
    BinOp {
        op: BinOpKind,
        lhs: ExprId,
        rhs: ExprId,
        decl: Option<FunId>,
    },
    UnOp {
        op: UnOpKind,
        expr: ExprId,
        decl: Option<FunId>,
    },
    Call {
        name: Ident,
        args: Vec<ExprId>,
        decl: Option<FunId>,
    },
    Let {
        items: Vec<LetItem>,
        body: ExprId,
    },
    /// Type-inst: index-set ranges (each a `TypeInst`) and a domain.
    ///
    /// `is_enum` marks a user enum declaration's type-inst; the driver
    /// demotes it after elaboration.
    TypeInst {
        ranges: Vec<ExprId>,
        domain: Option<ExprId>,
        is_enum: bool,
    },
    /// Type-inst variable `$T` (or `$$E` when `is_enum`)
    TiId {
        name: String,
        is_enum: bool,
    },
}

/// An expression: kind, inferred type, source span and annotations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: Type,
    pub span: Span,
    pub ann: Vec<ExprId>,
}

/// A variable declaration.
///
/// Every named entity is one of these; function parameters, generator
/// variables and let bindings are non-toplevel declarations. `payload`
/// is stamped by the dependency sorter with the declaration's position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarDecl {
    pub name: Ident,
    /// Always an `ExprKind::TypeInst` node
    pub ti: ExprId,
    pub init: Option<ExprId>,
    pub ann: Vec<ExprId>,
    pub toplevel: bool,
    pub ty: Type,
    pub payload: i32,
    pub span: Span,
}

impl VarDecl {
    pub fn new(name: impl Into<Ident>, ti: ExprId, init: Option<ExprId>, span: Span) -> Self {
        VarDecl {
            name: name.into(),
            ti,
            init,
            ann: Vec::new(),
            toplevel: true,
            ty: Type::unknown(),
            payload: 0,
            span,
        }
    }

    pub fn non_toplevel(mut self) -> Self {
        self.toplevel = false;
        self
    }

    pub fn is_anon(&self) -> bool {
        self.name.is_empty()
    }
}

/// A function declaration. A single identifier may name many overloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub name: Ident,
    /// Return type-inst (an `ExprKind::TypeInst` node)
    pub ti: ExprId,
    pub params: Vec<DeclId>,
    pub body: Option<ExprId>,
    pub ann: Vec<ExprId>,
    /// True for builtin signatures registered by the standard interface
    pub from_stdlib: bool,
    pub span: Span,
}

impl FunctionDecl {
    pub fn new(
        name: impl Into<Ident>,
        ti: ExprId,
        params: Vec<DeclId>,
        body: Option<ExprId>,
        span: Span,
    ) -> Self {
        FunctionDecl {
            name: name.into(),
            ti,
            params,
            body,
            ann: Vec::new(),
            from_stdlib: false,
            span,
        }
    }
}

/// The expression/declaration arena.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Ast {
    exprs: Vec<Expr>,
    decls: Vec<VarDecl>,
    funcs: Vec<FunctionDecl>,
    /// Counter for generated identifiers (`X_INTRODUCED_<n>_`)
    next_intro_id: u32,
}

impl Ast {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, kind: ExprKind, span: Span) -> ExprId {
        self.exprs.push(Expr {
            kind,
            ty: Type::unknown(),
            span,
            ann: Vec::new(),
        });
        ExprId(self.exprs.len() as u32 - 1)
    }

    pub fn alloc_typed(&mut self, kind: ExprKind, ty: Type, span: Span) -> ExprId {
        let id = self.alloc(kind, span);
        self.exprs[id.0 as usize].ty = ty;
        id
    }

    pub fn expr(&self, id: ExprId) -> &Expr {
        &self.exprs[id.0 as usize]
    }

    pub fn expr_mut(&mut self, id: ExprId) -> &mut Expr {
        &mut self.exprs[id.0 as usize]
    }

    pub fn ty(&self, id: ExprId) -> Type {
        self.exprs[id.0 as usize].ty
    }

    pub fn set_ty(&mut self, id: ExprId, ty: Type) {
        self.exprs[id.0 as usize].ty = ty;
    }

    pub fn span(&self, id: ExprId) -> Span {
        self.exprs[id.0 as usize].span
    }

    pub fn add_decl(&mut self, decl: VarDecl) -> DeclId {
        self.decls.push(decl);
        DeclId(self.decls.len() as u32 - 1)
    }

    pub fn decl(&self, id: DeclId) -> &VarDecl {
        &self.decls[id.0 as usize]
    }

    pub fn decl_mut(&mut self, id: DeclId) -> &mut VarDecl {
        &mut self.decls[id.0 as usize]
    }

    pub fn decl_count(&self) -> usize {
        self.decls.len()
    }

    pub fn add_func(&mut self, func: FunctionDecl) -> FunId {
        self.funcs.push(func);
        FunId(self.funcs.len() as u32 - 1)
    }

    pub fn func(&self, id: FunId) -> &FunctionDecl {
        &self.funcs[id.0 as usize]
    }

    pub fn func_mut(&mut self, id: FunId) -> &mut FunctionDecl {
        &mut self.funcs[id.0 as usize]
    }

    pub fn func_count(&self) -> usize {
        self.funcs.len()
    }

    /// A fresh generated identifier, distinct from any user name.
    pub fn gen_ident(&mut self) -> Ident {
        self.next_intro_id += 1;
        format!("X_INTRODUCED_{}_", self.next_intro_id - 1)
    }

    // --- Builders ---------------------------------------------------------
    //
    // Shorthand constructors used by the elaborators and by tests. All of
    // them allocate with an introduced span; callers that care about the
    // source location allocate through `alloc` directly.

    pub fn int_lit(&mut self, v: i64) -> ExprId {
        self.alloc(ExprKind::IntLit(v), Span::introduced())
    }

    pub fn float_lit(&mut self, v: f64) -> ExprId {
        self.alloc(ExprKind::FloatLit(v), Span::introduced())
    }

    pub fn bool_lit(&mut self, v: bool) -> ExprId {
        self.alloc(ExprKind::BoolLit(v), Span::introduced())
    }

    pub fn str_lit(&mut self, s: impl Into<String>) -> ExprId {
        self.alloc(ExprKind::StringLit(s.into()), Span::introduced())
    }

    pub fn absent(&mut self) -> ExprId {
        self.alloc(ExprKind::Absent, Span::introduced())
    }

    pub fn anon(&mut self) -> ExprId {
        self.alloc(ExprKind::Anon, Span::introduced())
    }

    /// An unresolved identifier occurrence.
    pub fn ident(&mut self, name: impl Into<Ident>) -> ExprId {
        self.alloc(
            ExprKind::Id {
                name: name.into(),
                decl: None,
            },
            Span::introduced(),
        )
    }

    /// An identifier occurrence already bound to its declaration.
    pub fn ident_for(&mut self, decl: DeclId) -> ExprId {
        let name = self.decl(decl).name.clone();
        let ty = self.decl(decl).ty;
        self.alloc_typed(
            ExprKind::Id {
                name,
                decl: Some(decl),
            },
            ty,
            Span::introduced(),
        )
    }

    pub fn set_lit(&mut self, members: Vec<ExprId>) -> ExprId {
        self.alloc(ExprKind::SetLit(members), Span::introduced())
    }

    pub fn array_lit(&mut self, elems: Vec<ExprId>) -> ExprId {
        self.alloc(ExprKind::ArrayLit { elems, dims: 1 }, Span::introduced())
    }

    pub fn array_access(&mut self, array: ExprId, idxs: Vec<ExprId>) -> ExprId {
        self.alloc(ExprKind::ArrayAccess { array, idxs }, Span::introduced())
    }

    pub fn call(&mut self, name: impl Into<Ident>, args: Vec<ExprId>) -> ExprId {
        self.alloc(
            ExprKind::Call {
                name: name.into(),
                args,
                decl: None,
            },
            Span::introduced(),
        )
    }

    pub fn binop(&mut self, op: BinOpKind, lhs: ExprId, rhs: ExprId) -> ExprId {
        self.alloc(
            ExprKind::BinOp {
                op,
                lhs,
                rhs,
                decl: None,
            },
            Span::introduced(),
        )
    }

    pub fn unop(&mut self, op: UnOpKind, expr: ExprId) -> ExprId {
        self.alloc(ExprKind::UnOp { op, expr, decl: None }, Span::introduced())
    }

    pub fn ite(&mut self, branches: Vec<(ExprId, ExprId)>, else_expr: Option<ExprId>) -> ExprId {
        self.alloc(
            ExprKind::IfThenElse { branches, else_expr },
            Span::introduced(),
        )
    }

    pub fn let_in(&mut self, items: Vec<LetItem>, body: ExprId) -> ExprId {
        self.alloc(ExprKind::Let { items, body }, Span::introduced())
    }

    pub fn comprehension(&mut self, generators: Vec<Generator>, body: ExprId, set: bool) -> ExprId {
        self.alloc(
            ExprKind::Comprehension {
                generators,
                body,
                set,
            },
            Span::introduced(),
        )
    }

    /// A type-inst with the given declared type and no ranges or domain.
    pub fn type_inst(&mut self, ty: Type) -> ExprId {
        self.alloc_typed(
            ExprKind::TypeInst {
                ranges: Vec::new(),
                domain: None,
                is_enum: false,
            },
            ty,
            Span::introduced(),
        )
    }

    pub fn type_inst_domain(&mut self, ty: Type, domain: ExprId) -> ExprId {
        self.alloc_typed(
            ExprKind::TypeInst {
                ranges: Vec::new(),
                domain: Some(domain),
                is_enum: false,
            },
            ty,
            Span::introduced(),
        )
    }

    pub fn type_inst_ranges(
        &mut self,
        ty: Type,
        ranges: Vec<ExprId>,
        domain: Option<ExprId>,
    ) -> ExprId {
        self.alloc_typed(
            ExprKind::TypeInst {
                ranges,
                domain,
                is_enum: false,
            },
            ty,
            Span::introduced(),
        )
    }

    pub fn ti_id(&mut self, name: impl Into<String>, is_enum: bool) -> ExprId {
        self.alloc(
            ExprKind::TiId {
                name: name.into(),
                is_enum,
            },
            Span::introduced(),
        )
    }

    /// A non-toplevel parameter declaration with the given declared type.
    pub fn param(&mut self, name: impl Into<Ident>, ty: Type) -> DeclId {
        let ti = self.type_inst(ty);
        let mut vd = VarDecl::new(name, ti, None, Span::introduced());
        vd.toplevel = false;
        vd.ty = ty;
        self.add_decl(vd)
    }

    // --- Traversal --------------------------------------------------------

    /// Collect the direct child expressions of a node, in evaluation order.
    ///
    /// Declarations encountered through `let` items and generators
    /// contribute their type-inst and initialiser. Annotations are not
    /// included; passes handle them explicitly.
    pub fn children(&self, id: ExprId) -> Vec<ExprId> {
        let mut out = Vec::new();
        match &self.expr(id).kind {
            ExprKind::IntLit(_)
            | ExprKind::FloatLit(_)
            | ExprKind::BoolLit(_)
            | ExprKind::StringLit(_)
            | ExprKind::Absent
            | ExprKind::Anon
            | ExprKind::Id { .. }
            | ExprKind::TiId { .. } => {}
            ExprKind::SetLit(members) => out.extend(members),
            ExprKind::ArrayLit { elems, .. } => out.extend(elems),
            ExprKind::ArrayAccess { array, idxs } => {
                out.push(*array);
                out.extend(idxs);
            }
            ExprKind::Comprehension {
                generators, body, ..
            } => {
                for g in generators {
                    if let Some(e) = g.in_expr {
                        out.push(e);
                    }
                    for d in &g.decls {
                        out.push(self.decl(*d).ti);
                    }
                    if let Some(w) = g.where_expr {
                        out.push(w);
                    }
                }
                out.push(*body);
            }
            ExprKind::IfThenElse {
                branches,
                else_expr,
            } => {
                for (c, t) in branches {
                    out.push(*c);
                    out.push(*t);
                }
                if let Some(e) = else_expr {
                    out.push(*e);
                }
            }
            ExprKind::BinOp { lhs, rhs, .. } => {
                out.push(*lhs);
                out.push(*rhs);
            }
            ExprKind::UnOp { expr, .. } => out.push(*expr),
            ExprKind::Call { args, .. } => out.extend(args),
            ExprKind::Let { items, body } => {
                for item in items {
                    match item {
                        LetItem::Decl(d) => {
                            out.push(self.decl(*d).ti);
                            if let Some(e) = self.decl(*d).init {
                                out.push(e);
                            }
                        }
                        LetItem::Constraint(e) => out.push(*e),
                    }
                }
                out.push(*body);
            }
            ExprKind::TypeInst { ranges, domain, .. } => {
                out.extend(ranges);
                if let Some(d) = domain {
                    out.push(*d);
                }
            }
        }
        out
    }

    /// Pre-order walk of an expression tree.
    pub fn walk(&self, root: ExprId, f: &mut impl FnMut(&Ast, ExprId)) {
        let mut stack = vec![root];
        while let Some(e) = stack.pop() {
            f(self, e);
            let mut children = self.children(e);
            children.reverse();
            stack.extend(children);
        }
    }

    // --- Deep copy --------------------------------------------------------

    /// Deep-copy an expression tree.
    ///
    /// Local declarations (let bindings, generator variables) are copied
    /// and entered into `decl_map`; identifier references to mapped
    /// declarations are redirected, while references to unmapped (i.e.
    /// toplevel) declarations are kept as-is. Used by par-specialisation
    /// to clone function bodies.
    pub fn copy_expr(&mut self, root: ExprId, decl_map: &mut HashMap<DeclId, DeclId>) -> ExprId {
        let Expr {
            kind, ty, span, ann, ..
        } = self.expr(root).clone();
        let new_kind = match kind {
            ExprKind::Id { name, decl } => ExprKind::Id {
                name,
                decl: decl.map(|d| *decl_map.get(&d).unwrap_or(&d)),
            },
            ExprKind::SetLit(members) => ExprKind::SetLit(
                members
                    .into_iter()
                    .map(|m| self.copy_expr(m, decl_map))
                    .collect(),
            ),
            ExprKind::ArrayLit { elems, dims } => ExprKind::ArrayLit {
                elems: elems
                    .into_iter()
                    .map(|m| self.copy_expr(m, decl_map))
                    .collect(),
                dims,
            },
            ExprKind::ArrayAccess { array, idxs } => ExprKind::ArrayAccess {
                array: self.copy_expr(array, decl_map),
                idxs: idxs
                    .into_iter()
                    .map(|m| self.copy_expr(m, decl_map))
                    .collect(),
            },
            ExprKind::Comprehension {
                generators,
                body,
                set,
            } => {
                let generators = generators
                    .into_iter()
                    .map(|g| Generator {
                        in_expr: g.in_expr.map(|e| self.copy_expr(e, decl_map)),
                        decls: g
                            .decls
                            .into_iter()
                            .map(|d| self.copy_decl(d, decl_map))
                            .collect(),
                        where_expr: g.where_expr.map(|e| self.copy_expr(e, decl_map)),
                    })
                    .collect();
                ExprKind::Comprehension {
                    generators,
                    body: self.copy_expr(body, decl_map),
                    set,
                }
            }
            ExprKind::IfThenElse {
                branches,
                else_expr,
            } => ExprKind::IfThenElse {
                branches: branches
                    .into_iter()
                    .map(|(c, t)| (self.copy_expr(c, decl_map), self.copy_expr(t, decl_map)))
                    .collect(),
                else_expr: else_expr.map(|e| self.copy_expr(e, decl_map)),
            },
            ExprKind::BinOp { op, lhs, rhs, decl } => ExprKind::BinOp {
                op,
                lhs: self.copy_expr(lhs, decl_map),
                rhs: self.copy_expr(rhs, decl_map),
                decl,
            },
            ExprKind::UnOp { op, expr, decl } => ExprKind::UnOp {
                op,
                expr: self.copy_expr(expr, decl_map),
                decl,
            },
            ExprKind::Call { name, args, decl } => ExprKind::Call {
                name,
                args: args
                    .into_iter()
                    .map(|m| self.copy_expr(m, decl_map))
                    .collect(),
                decl,
            },
            ExprKind::Let { items, body } => {
                let items = items
                    .into_iter()
                    .map(|item| match item {
                        LetItem::Decl(d) => LetItem::Decl(self.copy_decl(d, decl_map)),
                        LetItem::Constraint(e) => LetItem::Constraint(self.copy_expr(e, decl_map)),
                    })
                    .collect();
                ExprKind::Let {
                    items,
                    body: self.copy_expr(body, decl_map),
                }
            }
            ExprKind::TypeInst {
                ranges,
                domain,
                is_enum,
            } => ExprKind::TypeInst {
                ranges: ranges
                    .into_iter()
                    .map(|r| self.copy_expr(r, decl_map))
                    .collect(),
                domain: domain.map(|d| self.copy_expr(d, decl_map)),
                is_enum,
            },
            leaf => leaf,
        };
        let new_ann = ann
            .into_iter()
            .map(|a| self.copy_expr(a, decl_map))
            .collect();
        let id = self.alloc_typed(new_kind, ty, span);
        self.expr_mut(id).ann = new_ann;
        id
    }

    /// Copy a local declaration, registering the mapping for later
    /// identifier redirection.
    pub fn copy_decl(&mut self, decl: DeclId, decl_map: &mut HashMap<DeclId, DeclId>) -> DeclId {
        if let Some(mapped) = decl_map.get(&decl) {
            return *mapped;
        }
        let old = self.decl(decl).clone();
        let ti = self.copy_expr(old.ti, decl_map);
        let init = old.init.map(|e| self.copy_expr(e, decl_map));
        let new_id = self.add_decl(VarDecl {
            name: old.name,
            ti,
            init,
            ann: old.ann.clone(),
            toplevel: old.toplevel,
            ty: old.ty,
            payload: 0,
            span: old.span,
        });
        decl_map.insert(decl, new_id);
        new_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_and_access() {
        let mut ast = Ast::new();
        let e = ast.int_lit(42);
        assert!(matches!(ast.expr(e).kind, ExprKind::IntLit(42)));
        assert!(ast.ty(e).is_unknown());
    }

    #[test]
    fn test_children_order() {
        let mut ast = Ast::new();
        let a = ast.int_lit(1);
        let b = ast.int_lit(2);
        let bo = ast.binop(BinOpKind::Plus, a, b);
        assert_eq!(ast.children(bo), vec![a, b]);
    }

    #[test]
    fn test_walk_visits_let_decls() {
        let mut ast = Ast::new();
        let ti = ast.type_inst(Type::par_int());
        let init = ast.int_lit(1);
        let d = ast.add_decl(VarDecl::new("x", ti, Some(init), Span::introduced()).non_toplevel());
        let body = ast.ident_for(d);
        let l = ast.let_in(vec![LetItem::Decl(d)], body);

        let mut seen = Vec::new();
        ast.walk(l, &mut |_, e| seen.push(e));
        assert!(seen.contains(&ti));
        assert!(seen.contains(&init));
        assert!(seen.contains(&body));
    }

    #[test]
    fn test_copy_expr_remaps_locals() {
        let mut ast = Ast::new();
        let ti = ast.type_inst(Type::par_int());
        let init = ast.int_lit(1);
        let d = ast.add_decl(VarDecl::new("x", ti, Some(init), Span::introduced()).non_toplevel());
        let body = ast.ident_for(d);
        let l = ast.let_in(vec![LetItem::Decl(d)], body);

        let mut map = HashMap::new();
        let copy = ast.copy_expr(l, &mut map);
        let ExprKind::Let { items, body } = &ast.expr(copy).kind else {
            panic!("expected let");
        };
        let LetItem::Decl(new_d) = items[0] else {
            panic!("expected decl item");
        };
        assert_ne!(new_d, d);
        let ExprKind::Id { decl, .. } = &ast.expr(*body).kind else {
            panic!("expected id body");
        };
        assert_eq!(*decl, Some(new_d));
    }

    #[test]
    fn test_copy_expr_keeps_toplevel_refs() {
        let mut ast = Ast::new();
        let ti = ast.type_inst(Type::par_int());
        let d = ast.add_decl(VarDecl::new("g", ti, None, Span::introduced()));
        let id = ast.ident_for(d);
        let mut map = HashMap::new();
        let copy = ast.copy_expr(id, &mut map);
        let ExprKind::Id { decl, .. } = &ast.expr(copy).kind else {
            panic!("expected id");
        };
        assert_eq!(*decl, Some(d));
    }

    #[test]
    fn test_gen_ident_unique() {
        let mut ast = Ast::new();
        assert_ne!(ast.gen_ident(), ast.gen_ident());
    }

    #[test]
    fn test_comparison_swap() {
        assert_eq!(BinOpKind::Leq.swapped(), BinOpKind::Geq);
        assert_eq!(BinOpKind::Gr.swapped(), BinOpKind::Le);
        assert_eq!(BinOpKind::Eq.swapped(), BinOpKind::Eq);
    }
}
