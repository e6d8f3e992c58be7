//! Topological ordering of declarations by definition-use dependency.
//!
//! Walks every expression reachable from the model, resolves identifier
//! occurrences to their declarations, and records a linear order of
//! declarations such that a definition always precedes its uses. A
//! position of `-1` marks a visit in progress and doubles as the
//! circular-definition sentinel.
//!
//! `let` bindings are stable-sorted by their recorded positions after the
//! walk, so evaluation order inside a `let` respects declaration
//! dependencies.

use crate::env::Env;
use crate::error::{ErrorKind, TypeError, TypeResult};
use crate::scopes::Scopes;
use std::collections::HashMap;
use zinc_ast::{Ast, DeclId, ExprId, ExprKind, LetItem, Span};

/// Declaration ordering state.
#[derive(Debug, Default)]
pub struct TopoSorter {
    pub scopes: Scopes,
    /// Declaration → position; -1 while the declaration is being visited
    pub pos: HashMap<DeclId, i32>,
    /// Declarations in dependency order
    pub decls: Vec<DeclId>,
}

impl TopoSorter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter a declaration into the current scope.
    pub fn add_decl(&mut self, ast: &Ast, env: &mut Env, decl: DeclId) -> TypeResult<()> {
        self.scopes.add(ast, env, decl)
    }

    /// Resolve a name, without visiting the found declaration.
    ///
    /// Used for assignment targets and checker-model variables.
    pub fn get(&self, ast: &Ast, name: &str, span: Span) -> TypeResult<DeclId> {
        match self.scopes.find(name) {
            Some(d) => Ok(d),
            None => Err(self.undefined(ast, name, span)),
        }
    }

    fn undefined(&self, ast: &Ast, name: &str, span: Span) -> TypeError {
        let mut err = TypeError::new(
            ErrorKind::UndefinedIdentifier,
            span,
            format!("undefined identifier `{}'", name),
        );
        if let Some(similar) = self.scopes.find_similar(name) {
            err = err.with_note(format!("did you mean `{}'?", ast.decl(similar).name));
        }
        err
    }

    /// Resolve a name and visit its declaration if it has not been
    /// visited yet; detect circular definitions.
    fn check_id(&mut self, ast: &mut Ast, env: &mut Env, name: &str, span: Span) -> TypeResult<DeclId> {
        let Some(decl) = self.scopes.find(name) else {
            return Err(self.undefined(ast, name, span));
        };
        match self.pos.get(&decl).copied() {
            None => {
                self.scopes.push_toplevel();
                let result = self.run_decl(ast, env, decl);
                self.scopes.pop();
                result?;
            }
            Some(-1) => {
                return Err(TypeError::new(
                    ErrorKind::CircularDefinition,
                    span,
                    format!("circular definition of `{}'", name),
                ));
            }
            Some(_) => {}
        }
        Ok(decl)
    }

    /// Visit a declaration: walk its type-inst and initialiser, then
    /// assign its position.
    pub fn run_decl(&mut self, ast: &mut Ast, env: &mut Env, decl: DeclId) -> TypeResult<()> {
        match self.pos.get(&decl).copied() {
            None => {
                self.pos.insert(decl, -1);
                let ti = ast.decl(decl).ti;
                self.run(ast, env, ti)?;
                if let Some(init) = ast.decl(decl).init {
                    self.run(ast, env, init)?;
                }
                self.run_annotations_of_decl(ast, env, decl)?;
                let position = self.decls.len() as i32;
                ast.decl_mut(decl).payload = position;
                self.decls.push(decl);
                self.pos.insert(decl, position);
            }
            Some(p) => debug_assert_ne!(p, -1, "re-entered a declaration under visit"),
        }
        Ok(())
    }

    /// Walk an expression, resolving identifiers and recording positions.
    pub fn run(&mut self, ast: &mut Ast, env: &mut Env, e: ExprId) -> TypeResult<()> {
        match ast.expr(e).kind.clone() {
            ExprKind::IntLit(_)
            | ExprKind::FloatLit(_)
            | ExprKind::BoolLit(_)
            | ExprKind::StringLit(_)
            | ExprKind::Absent
            | ExprKind::Anon
            | ExprKind::TiId { .. } => {}
            ExprKind::SetLit(members) => {
                for m in members {
                    self.run(ast, env, m)?;
                }
            }
            ExprKind::Id { name, .. } => {
                let decl = self.check_id(ast, env, &name, ast.span(e))?;
                if let ExprKind::Id { decl: slot, .. } = &mut ast.expr_mut(e).kind {
                    *slot = Some(decl);
                }
            }
            ExprKind::ArrayLit { elems, .. } => {
                for el in elems {
                    self.run(ast, env, el)?;
                }
            }
            ExprKind::ArrayAccess { array, idxs } => {
                self.run(ast, env, array)?;
                for i in idxs {
                    self.run(ast, env, i)?;
                }
            }
            ExprKind::Comprehension {
                generators, body, ..
            } => {
                self.scopes.push();
                for g in &generators {
                    if let Some(in_expr) = g.in_expr {
                        self.run(ast, env, in_expr)?;
                    }
                    for &d in &g.decls {
                        self.run_decl(ast, env, d)?;
                        self.scopes.add(ast, env, d)?;
                    }
                    if let Some(w) = g.where_expr {
                        self.run(ast, env, w)?;
                    }
                }
                let result = self.run(ast, env, body);
                self.scopes.pop();
                result?;
            }
            ExprKind::IfThenElse {
                branches,
                else_expr,
            } => {
                for (c, t) in branches {
                    self.run(ast, env, c)?;
                    self.run(ast, env, t)?;
                }
                if let Some(el) = else_expr {
                    self.run(ast, env, el)?;
                }
            }
            ExprKind::BinOp { lhs, rhs, .. } => {
                self.run(ast, env, lhs)?;
                self.run(ast, env, rhs)?;
            }
            ExprKind::UnOp { expr, .. } => self.run(ast, env, expr)?,
            ExprKind::Call { args, .. } => {
                for a in args {
                    self.run(ast, env, a)?;
                }
            }
            ExprKind::Let { items, body } => {
                self.scopes.push();
                let result = self.run_let_items(ast, env, &items, body);
                self.scopes.pop();
                result?;
                // order bindings by dependency: declarations first, in
                // position order; constraints keep their relative order
                let mut sorted = items;
                sorted.sort_by_key(|item| match item {
                    LetItem::Decl(d) => (0, self.pos.get(d).copied().unwrap_or(i32::MAX)),
                    LetItem::Constraint(_) => (1, 0),
                });
                if let ExprKind::Let { items: slot, .. } = &mut ast.expr_mut(e).kind {
                    *slot = sorted;
                }
            }
            ExprKind::TypeInst { ranges, domain, .. } => {
                for r in ranges {
                    self.run(ast, env, r)?;
                }
                if let Some(d) = domain {
                    self.run(ast, env, d)?;
                }
            }
        }
        self.run_annotations(ast, env, e)
    }

    fn run_let_items(
        &mut self,
        ast: &mut Ast,
        env: &mut Env,
        items: &[LetItem],
        body: ExprId,
    ) -> TypeResult<()> {
        for item in items {
            match *item {
                LetItem::Decl(d) => {
                    self.run_decl(ast, env, d)?;
                    self.scopes.add(ast, env, d)?;
                }
                LetItem::Constraint(c) => self.run(ast, env, c)?,
            }
        }
        self.run(ast, env, body)
    }

    /// Walk an expression's annotations. In ignore-unknown-ids mode,
    /// annotations that fail to resolve are dropped instead of aborting.
    fn run_annotations(&mut self, ast: &mut Ast, env: &mut Env, e: ExprId) -> TypeResult<()> {
        let anns = ast.expr(e).ann.clone();
        if env.ignore_unknown_ids {
            let mut keep = Vec::with_capacity(anns.len());
            for a in anns {
                if self.run(ast, env, a).is_ok() {
                    keep.push(a);
                }
            }
            ast.expr_mut(e).ann = keep;
        } else {
            for a in anns {
                self.run(ast, env, a)?;
            }
        }
        Ok(())
    }

    fn run_annotations_of_decl(
        &mut self,
        ast: &mut Ast,
        env: &mut Env,
        decl: DeclId,
    ) -> TypeResult<()> {
        let anns = ast.decl(decl).ann.clone();
        if env.ignore_unknown_ids {
            let mut keep = Vec::with_capacity(anns.len());
            for a in anns {
                if self.run(ast, env, a).is_ok() {
                    keep.push(a);
                }
            }
            ast.decl_mut(decl).ann = keep;
        } else {
            for a in anns {
                self.run(ast, env, a)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zinc_ast::{Type, VarDecl};

    fn toplevel_decl(ast: &mut Ast, name: &str, init: Option<ExprId>) -> DeclId {
        let ti = ast.type_inst(Type::par_int());
        ast.add_decl(VarDecl::new(name, ti, init, Span::new(0, 0, 1, 1)))
    }

    #[test]
    fn test_use_before_definition_orders_decls() {
        // int: x = y;  int: y = 1;
        let mut ast = Ast::new();
        let mut env = Env::new();
        let mut ts = TopoSorter::new();

        let y_init = ast.int_lit(1);
        let y = toplevel_decl(&mut ast, "y", Some(y_init));
        let x_init = ast.ident("y");
        let x = toplevel_decl(&mut ast, "x", Some(x_init));

        ts.add_decl(&ast, &mut env, x).unwrap();
        ts.add_decl(&ast, &mut env, y).unwrap();
        ts.run_decl(&mut ast, &mut env, x).unwrap();
        ts.run_decl(&mut ast, &mut env, y).unwrap();

        assert_eq!(ts.decls, vec![y, x]);
        assert!(ts.pos[&y] < ts.pos[&x]);
        // the identifier got its back-reference
        let ExprKind::Id { decl, .. } = ast.expr(x_init).kind else {
            panic!("expected id");
        };
        assert_eq!(decl, Some(y));
    }

    #[test]
    fn test_undefined_identifier_with_hint() {
        let mut ast = Ast::new();
        let mut env = Env::new();
        let mut ts = TopoSorter::new();

        let defined = toplevel_decl(&mut ast, "column", None);
        ts.add_decl(&ast, &mut env, defined).unwrap();

        let use_site = ast.ident("colunm");
        let err = ts.run(&mut ast, &mut env, use_site).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UndefinedIdentifier);
        assert!(err.notes.iter().any(|n| n.contains("column")));
    }

    #[test]
    fn test_circular_definition() {
        // int: x = y + 1; int: y = x + 1;
        let mut ast = Ast::new();
        let mut env = Env::new();
        let mut ts = TopoSorter::new();

        let one_a = ast.int_lit(1);
        let y_ref = ast.ident("y");
        let x_init = ast.binop(zinc_ast::BinOpKind::Plus, y_ref, one_a);
        let x = toplevel_decl(&mut ast, "x", Some(x_init));

        let one_b = ast.int_lit(1);
        let x_ref = ast.ident("x");
        let y_init = ast.binop(zinc_ast::BinOpKind::Plus, x_ref, one_b);
        let y = toplevel_decl(&mut ast, "y", Some(y_init));

        ts.add_decl(&ast, &mut env, x).unwrap();
        ts.add_decl(&ast, &mut env, y).unwrap();
        let err = ts.run_decl(&mut ast, &mut env, x).unwrap_err();
        assert_eq!(err.kind, ErrorKind::CircularDefinition);
    }

    #[test]
    fn test_let_bindings_sorted_before_constraints() {
        // let { constraint true; int: a = 1 } in a
        let mut ast = Ast::new();
        let mut env = Env::new();
        let mut ts = TopoSorter::new();

        let c = ast.bool_lit(true);
        let a_init = ast.int_lit(1);
        let a_ti = ast.type_inst(Type::par_int());
        let a = ast.add_decl(
            VarDecl::new("a", a_ti, Some(a_init), Span::introduced()).non_toplevel(),
        );
        let body = ast.ident("a");
        let l = ast.let_in(vec![LetItem::Constraint(c), LetItem::Decl(a)], body);

        ts.run(&mut ast, &mut env, l).unwrap();
        let ExprKind::Let { items, .. } = &ast.expr(l).kind else {
            panic!("expected let");
        };
        assert_eq!(items, &vec![LetItem::Decl(a), LetItem::Constraint(c)]);
    }

    #[test]
    fn test_forward_reference_inside_let_is_undefined() {
        // let { int: a = b; int: b = 1 } in a — lexical order binds
        let mut ast = Ast::new();
        let mut env = Env::new();
        let mut ts = TopoSorter::new();

        let b_init = ast.int_lit(1);
        let b_ti = ast.type_inst(Type::par_int());
        let b = ast.add_decl(
            VarDecl::new("b", b_ti, Some(b_init), Span::introduced()).non_toplevel(),
        );
        let a_init = ast.ident("b");
        let a_ti = ast.type_inst(Type::par_int());
        let a = ast.add_decl(
            VarDecl::new("a", a_ti, Some(a_init), Span::introduced()).non_toplevel(),
        );
        let body = ast.ident("a");
        let l = ast.let_in(vec![LetItem::Decl(a), LetItem::Decl(b)], body);

        let err = ts.run(&mut ast, &mut env, l).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UndefinedIdentifier);
    }

    #[test]
    fn test_ignore_unknown_ids_drops_failing_annotations() {
        let mut ast = Ast::new();
        let mut env = Env::new();
        env.ignore_unknown_ids = true;
        let mut ts = TopoSorter::new();

        let e = ast.int_lit(1);
        let bad_ann = ast.ident("no_such_annotation");
        ast.expr_mut(e).ann.push(bad_ann);
        ts.run(&mut ast, &mut env, e).unwrap();
        assert!(ast.expr(e).ann.is_empty());
    }
}
