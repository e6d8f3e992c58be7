//! Nested lexical scopes and name lookup.
//!
//! Scopes come in three kinds:
//!
//! - **toplevel** — model-level names. These are global: lookup that
//!   reaches any toplevel scope jumps straight to the outermost one.
//! - **function** — a function's parameter scope.
//! - **inner** — `let` bodies and comprehension generators.
//!
//! Redeclaration inside one scope is an error (except for the anonymous
//! identifier); an inner declaration that shadows a name from an
//! enclosing non-inner scope produces a warning. Failed lookups can ask
//! [`Scopes::find_similar`] for a "did you mean ...?" candidate; that
//! path is off the hot path and only runs after a lookup already failed.

use crate::env::Env;
use crate::error::{ErrorKind, TypeError, TypeResult};
use indexmap::IndexMap;
use zinc_ast::{Ast, DeclId, ExprKind, Ident};

/// Kind tag of one scope level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Toplevel,
    Function,
    Inner,
}

#[derive(Debug)]
struct Scope {
    kind: ScopeKind,
    decls: IndexMap<Ident, DeclId>,
}

impl Scope {
    fn new(kind: ScopeKind) -> Self {
        Scope {
            kind,
            decls: IndexMap::new(),
        }
    }

    fn toplevel(&self) -> bool {
        self.kind == ScopeKind::Toplevel
    }
}

/// The scope stack. Always contains at least the outermost toplevel scope.
#[derive(Debug)]
pub struct Scopes {
    stack: Vec<Scope>,
}

impl Default for Scopes {
    fn default() -> Self {
        Self::new()
    }
}

impl Scopes {
    pub fn new() -> Self {
        Scopes {
            stack: vec![Scope::new(ScopeKind::Toplevel)],
        }
    }

    pub fn push_toplevel(&mut self) {
        self.stack.push(Scope::new(ScopeKind::Toplevel));
    }

    pub fn push_fun(&mut self) {
        self.stack.push(Scope::new(ScopeKind::Function));
    }

    pub fn push(&mut self) {
        self.stack.push(Scope::new(ScopeKind::Inner));
    }

    pub fn pop(&mut self) {
        self.stack.pop();
    }

    /// Add a declaration to the innermost scope.
    ///
    /// Anonymous declarations are skipped. Enum declarations with an
    /// initialiser are only legal at top level. Redeclaration in the same
    /// scope is fatal; shadowing an enclosing non-inner declaration from
    /// an inner scope is a warning.
    pub fn add(&mut self, ast: &Ast, env: &mut Env, decl: DeclId) -> TypeResult<()> {
        let vd = ast.decl(decl);
        let is_enum_ti = matches!(
            ast.expr(vd.ti).kind,
            ExprKind::TypeInst { is_enum: true, .. }
        );
        if !self.stack.last().unwrap().toplevel() && is_enum_ti && vd.init.is_some() {
            return Err(TypeError::new(
                ErrorKind::InvalidEnum,
                vd.span,
                "enums are only allowed at top level",
            ));
        }
        if vd.is_anon() {
            return Ok(());
        }
        if self.stack.last().unwrap().kind == ScopeKind::Inner {
            for scope in self.stack[..self.stack.len() - 1].iter().rev() {
                if let Some(previous) = scope.decls.get(&vd.name) {
                    let earlier = ast.decl(*previous).span;
                    env.warnings.push(TypeError::warning(
                        ErrorKind::DuplicateIdentifier,
                        vd.span,
                        format!(
                            "variable `{}` shadows variable with the same name in line {}",
                            vd.name, earlier.start_line
                        ),
                    ));
                    break;
                }
                if scope.kind != ScopeKind::Inner {
                    break;
                }
            }
        }
        let top = self.stack.last_mut().unwrap();
        if top.decls.contains_key(&vd.name) {
            return Err(TypeError::new(
                ErrorKind::DuplicateIdentifier,
                vd.span,
                format!("identifier `{}' already defined", vd.name),
            ));
        }
        top.decls.insert(vd.name.clone(), decl);
        Ok(())
    }

    /// Look up a name.
    ///
    /// Searches outwards from the innermost scope. Reaching any toplevel
    /// scope without a hit jumps directly to the outermost toplevel scope:
    /// model-level names are global, not lexical.
    pub fn find(&self, name: &str) -> Option<DeclId> {
        let mut cur = self.stack.len() - 1;
        loop {
            if let Some(d) = self.stack[cur].decls.get(name) {
                return Some(*d);
            }
            if self.stack[cur].toplevel() {
                if cur > 0 {
                    cur = 0;
                } else {
                    return None;
                }
            } else {
                cur -= 1;
            }
        }
    }

    /// Find the closest-named visible declaration, for diagnostics.
    ///
    /// Walks the same scope order as [`find`](Self::find) and reports the
    /// declaration whose name is within Levenshtein distance 3 (exclusive)
    /// and length difference 3 (inclusive) of the query.
    pub fn find_similar(&self, name: &str) -> Option<DeclId> {
        let mut most_similar = None;
        let mut min_edits = 3;
        let mut cur = self.stack.len() - 1;
        loop {
            for (candidate, decl) in &self.stack[cur].decls {
                let edits = levenshtein(name, candidate);
                if edits < min_edits
                    && (name.len() as i64 - candidate.len() as i64).abs() <= 3
                {
                    min_edits = edits;
                    most_similar = Some(*decl);
                }
            }
            if self.stack[cur].toplevel() {
                if cur > 0 {
                    cur = 0;
                } else {
                    break;
                }
            } else {
                cur -= 1;
            }
        }
        most_similar
    }
}

/// Edit distance between two identifier spellings.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        cur[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let subst = prev[j] + usize::from(ca != cb);
            cur[j + 1] = subst.min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use zinc_ast::{Span, Type, VarDecl};

    fn decl(ast: &mut Ast, name: &str, line: u16) -> DeclId {
        let ti = ast.type_inst(Type::par_int());
        ast.add_decl(VarDecl::new(
            name,
            ti,
            None,
            Span::new(0, 0, 1, line),
        ))
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("abc", "abc"), 0);
        assert_eq!(levenshtein("abc", "abd"), 1);
        assert_eq!(levenshtein("abc", ""), 3);
        assert_eq!(levenshtein("kitten", "sitting"), 3);
    }

    #[test]
    fn test_add_and_find() {
        let mut ast = Ast::new();
        let mut env = Env::new();
        let mut scopes = Scopes::new();
        let x = decl(&mut ast, "x", 1);
        scopes.add(&ast, &mut env, x).unwrap();
        assert_eq!(scopes.find("x"), Some(x));
        assert_eq!(scopes.find("y"), None);
    }

    #[test]
    fn test_duplicate_is_fatal() {
        let mut ast = Ast::new();
        let mut env = Env::new();
        let mut scopes = Scopes::new();
        let a = decl(&mut ast, "x", 1);
        let b = decl(&mut ast, "x", 2);
        scopes.add(&ast, &mut env, a).unwrap();
        let err = scopes.add(&ast, &mut env, b).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DuplicateIdentifier);
    }

    #[test]
    fn test_anonymous_exempt_from_duplicates() {
        let mut ast = Ast::new();
        let mut env = Env::new();
        let mut scopes = Scopes::new();
        let a = decl(&mut ast, "", 1);
        let b = decl(&mut ast, "", 2);
        scopes.add(&ast, &mut env, a).unwrap();
        scopes.add(&ast, &mut env, b).unwrap();
    }

    #[test]
    fn test_shadow_warning_from_inner_scope() {
        let mut ast = Ast::new();
        let mut env = Env::new();
        let mut scopes = Scopes::new();
        let outer = decl(&mut ast, "x", 1);
        scopes.add(&ast, &mut env, outer).unwrap();
        scopes.push();
        let inner = decl(&mut ast, "x", 5);
        scopes.add(&ast, &mut env, inner).unwrap();
        assert_eq!(env.warnings.len(), 1);
        assert!(env.warnings[0].message.contains("shadows"));
        // the inner declaration wins lookups
        assert_eq!(scopes.find("x"), Some(inner));
        scopes.pop();
        assert_eq!(scopes.find("x"), Some(outer));
    }

    #[test]
    fn test_toplevel_jump_skips_function_locals() {
        let mut ast = Ast::new();
        let mut env = Env::new();
        let mut scopes = Scopes::new();
        let global = decl(&mut ast, "g", 1);
        scopes.add(&ast, &mut env, global).unwrap();

        // inside a function body, a fresh toplevel scope is pushed for
        // recursing into another declaration: lookup from there must jump
        // to the outermost toplevel, not see the function's params
        scopes.push_fun();
        let param = decl(&mut ast, "p", 2);
        scopes.add(&ast, &mut env, param).unwrap();
        scopes.push_toplevel();
        assert_eq!(scopes.find("g"), Some(global));
        assert_eq!(scopes.find("p"), None);
        scopes.pop();
        assert_eq!(scopes.find("p"), Some(param));
        scopes.pop();
    }

    #[test]
    fn test_find_similar() {
        let mut ast = Ast::new();
        let mut env = Env::new();
        let mut scopes = Scopes::new();
        let x = decl(&mut ast, "column", 1);
        scopes.add(&ast, &mut env, x).unwrap();
        assert_eq!(scopes.find_similar("colunm"), Some(x));
        assert_eq!(scopes.find_similar("somethingelse"), None);
    }
}
