//! Model items.
//!
//! A model is the ordered list of top-level items handed over by the
//! parser: declarations, assignments, constraints, at most one solve
//! directive, output directives, function definitions and (pre-resolved)
//! includes. The analyser mutates the model in place: enum elaboration
//! appends items, assignment folding removes them, and the dependency
//! sorter reorders declarations.

use crate::expr::{DeclId, ExprId, FunId, Ident};
use crate::span::Span;
use serde::{Deserialize, Serialize};

/// Goal of a solve item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolveGoal {
    Satisfy,
    Minimize,
    Maximize,
}

/// Kinds of top-level items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ItemKind {
    VarDeclItem(DeclId),
    Assign {
        name: Ident,
        expr: ExprId,
        decl: Option<DeclId>,
    },
    Constraint(ExprId),
    Solve {
        goal: SolveGoal,
        expr: Option<ExprId>,
        ann: Vec<ExprId>,
    },
    Output {
        expr: ExprId,
        ann: Vec<ExprId>,
    },
    Function(FunId),
    /// Already merged by the include resolver; kept only for ordering.
    Include {
        path: String,
    },
}

/// A top-level item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub kind: ItemKind,
    pub span: Span,
    /// Set when the analyser consumes the item (folded assignments,
    /// collected output items).
    pub removed: bool,
}

impl Item {
    pub fn new(kind: ItemKind, span: Span) -> Self {
        Item {
            kind,
            span,
            removed: false,
        }
    }
}

/// An ordered collection of top-level items.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub items: Vec<Item>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_item(&mut self, item: Item) {
        self.items.push(item);
    }

    pub fn push(&mut self, kind: ItemKind, span: Span) {
        self.items.push(Item::new(kind, span));
    }

    /// Iterate the live (non-removed) items.
    pub fn live_items(&self) -> impl Iterator<Item = &Item> {
        self.items.iter().filter(|i| !i.removed)
    }

    /// Declaration ids of all live declaration items, in model order.
    pub fn decl_items(&self) -> Vec<DeclId> {
        self.live_items()
            .filter_map(|i| match i.kind {
                ItemKind::VarDeclItem(d) => Some(d),
                _ => None,
            })
            .collect()
    }

    /// Function ids of all live function items, in model order.
    pub fn function_items(&self) -> Vec<FunId> {
        self.live_items()
            .filter_map(|i| match i.kind {
                ItemKind::Function(f) => Some(f),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::DeclId;

    #[test]
    fn test_live_items_skip_removed() {
        let mut m = Model::new();
        m.push(ItemKind::VarDeclItem(DeclId(0)), Span::introduced());
        m.push(ItemKind::VarDeclItem(DeclId(1)), Span::introduced());
        m.items[0].removed = true;
        assert_eq!(m.decl_items(), vec![DeclId(1)]);
    }
}
