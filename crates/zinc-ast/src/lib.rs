//! AST and foundation types for the zinc constraint-modelling frontend.
//!
//! This crate owns the data the semantic analyser operates on:
//!
//! - [`ty`] — the type lattice (base kind × instantiation × set/opt flags ×
//!   dimension × enum tag × contains-var)
//! - [`expr`] — the expression arena and declaration tables
//! - [`model`] — top-level items
//! - [`span`] — source locations
//!
//! The arena hands out plain index handles; nodes are anchored at
//! allocation time, so there is no separate allocation lock or collector
//! to cooperate with.

pub mod expr;
pub mod model;
pub mod span;
pub mod ty;

pub use expr::{
    Ast, BinOpKind, DeclId, Expr, ExprId, ExprKind, FunId, FunctionDecl, Generator, Ident,
    LetItem, UnOpKind, VarDecl, INT_INFINITY, INT_NEG_INFINITY,
};
pub use model::{Item, ItemKind, Model, SolveGoal};
pub use span::Span;
pub use ty::{BaseType, Inst, OptType, SetType, Type};
