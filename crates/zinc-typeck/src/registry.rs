//! Function and operator overload registry.
//!
//! A multi-map from identifier to overloads. Matching distinguishes *any
//! match* from *best match*: the best overload is the one whose parameter
//! types are pointwise subtypes of every other candidate's; ambiguous
//! pairs survive until the driver's overload-coherence check reports
//! them.
//!
//! # Polymorphic signatures
//!
//! Builtin signatures use type-inst variables in two positions:
//!
//! - `$T` in a domain position binds the argument's element type. A
//!   parameter whose declared type is the maximally permissive
//!   `var opt $T` behaves like `any $T`: the binding captures the
//!   argument's instantiation and optionality wholesale and the return
//!   type reproduces them. Any other declared type accounts for its own
//!   var/opt flags, so `opt $T` strips optionality (this is how `deopt`
//!   removes opt-ness).
//! - `$U` as the sole index range of a polymorphic-dimension parameter
//!   binds the argument's dimension and index enums (`array1d`,
//!   `slice_<n>d`). A concrete range written as `$$E` binds that index
//!   position's enum only.

use crate::env::Env;
use crate::error::{ErrorKind, TypeError};
use indexmap::IndexMap;
use std::collections::HashMap;
use zinc_ast::{Ast, BaseType, DeclId, ExprKind, FunId, Ident, Inst, OptType, SetType, Type};

/// The declared type of a parameter: the resolved declaration type when
/// known, the type-inst's declared type before the first type pass.
pub fn param_type(ast: &Ast, decl: DeclId) -> Type {
    let vd = ast.decl(decl);
    if !vd.ty.is_unknown() {
        vd.ty
    } else {
        ast.ty(vd.ti)
    }
}

/// The reified variant name of a predicate.
pub fn reify_name(name: &str) -> String {
    format!("{}_reif", name)
}

/// Type bindings collected while instantiating a polymorphic signature.
#[derive(Debug, Default)]
struct Bindings {
    /// `$T`-style element bindings
    scalar: HashMap<String, Type>,
    /// `$U`-style whole-index bindings: dimension + index enum ids
    index: HashMap<String, (i8, Vec<u32>)>,
}

/// Multi-map from identifier to function overloads.
#[derive(Debug, Default)]
pub struct FunctionRegistry {
    by_name: IndexMap<Ident, Vec<FunId>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an overload.
    ///
    /// Duplicate signatures are accepted here; they are reported by the
    /// driver's overload-coherence check instead.
    pub fn register(&mut self, ast: &Ast, fun: FunId) {
        let name = ast.func(fun).name.clone();
        self.by_name.entry(name).or_default().push(fun);
    }

    /// Register an overload unless one with the identical parameter type
    /// vector already exists. Returns whether it was registered. Used by
    /// par-specialisation, which must not shadow existing signatures.
    pub fn register_if_new(&mut self, ast: &Ast, fun: FunId) -> bool {
        let params: Vec<Type> = ast
            .func(fun)
            .params
            .iter()
            .map(|p| param_type(ast, *p))
            .collect();
        let name = ast.func(fun).name.clone();
        let overloads = self.by_name.entry(name).or_default();
        for existing in overloads.iter() {
            let e = ast.func(*existing);
            if e.params.len() == params.len()
                && e.params
                    .iter()
                    .zip(params.iter())
                    .all(|(p, t)| param_type(ast, *p) == *t)
            {
                return false;
            }
        }
        overloads.push(fun);
        true
    }

    pub fn fn_exists(&self, name: &str) -> bool {
        self.by_name.get(name).is_some_and(|v| !v.is_empty())
    }

    pub fn overloads(&self, name: &str) -> &[FunId] {
        self.by_name.get(name).map_or(&[], |v| v.as_slice())
    }

    /// Iterate all registered overloads.
    pub fn all(&self) -> impl Iterator<Item = FunId> + '_ {
        self.by_name.values().flatten().copied()
    }

    /// Find the best-matching overload for the given argument types.
    ///
    /// An overload matches when every argument is a subtype of the
    /// corresponding declared parameter type (the contains-var bit is
    /// ignored during matching and re-attached by the callers). The best
    /// match is the candidate whose parameters are pointwise subtypes of
    /// every other candidate's; ties resolve to registration order.
    pub fn match_fn(
        &self,
        ast: &Ast,
        env: &Env,
        name: &str,
        arg_types: &[Type],
        strict_enums: bool,
    ) -> Option<FunId> {
        let overloads = self.by_name.get(name)?;
        let mut candidates = Vec::new();
        for &f in overloads {
            let params = &ast.func(f).params;
            if params.len() != arg_types.len() {
                continue;
            }
            let ok = params.iter().zip(arg_types).all(|(p, a)| {
                env.is_subtype(a.with_cv(false), param_type(ast, *p), strict_enums)
            });
            if ok && self.tiids_consistent(ast, env, f, arg_types) {
                candidates.push(f);
            }
        }
        if candidates.len() <= 1 {
            return candidates.first().copied();
        }
        // most-specific candidate
        'outer: for &c in &candidates {
            for &d in &candidates {
                if c == d {
                    continue;
                }
                let cp = &ast.func(c).params;
                let dp = &ast.func(d).params;
                let le = cp.iter().zip(dp.iter()).all(|(a, b)| {
                    env.is_subtype(param_type(ast, *a), param_type(ast, *b), false)
                });
                if !le {
                    continue 'outer;
                }
            }
            return Some(c);
        }
        candidates.first().copied()
    }

    /// Check that every `$T` variable of `fun` binds compatibly across
    /// all argument positions that mention it: the bound element types
    /// must share a join and agree on enum tags. This is what makes
    /// `'='($T, $T)` reject an `int`/`string` pair.
    fn tiids_consistent(&self, ast: &Ast, env: &Env, fun: FunId, arg_types: &[Type]) -> bool {
        let mut seen: HashMap<String, Type> = HashMap::new();
        let params = &ast.func(fun).params;
        for (p, &at) in params.iter().zip(arg_types) {
            let pt = param_type(ast, *p);
            let ExprKind::TypeInst {
                domain: Some(d), ..
            } = &ast.expr(ast.decl(*p).ti).kind
            else {
                continue;
            };
            let ExprKind::TiId { name, .. } = &ast.expr(*d).kind else {
                continue;
            };
            let elem = Self::elem_binding(env, pt, at);
            if let Some(prev) = seen.get(name) {
                if elem.bt != BaseType::Bot
                    && prev.bt != BaseType::Bot
                    && Type::join(
                        prev.with_inst(Inst::Par).with_ot(OptType::Present),
                        elem.with_inst(Inst::Par)
                            .with_ot(OptType::Present)
                            .with_st(prev.st),
                    )
                    .is_none()
                {
                    return false;
                }
                if prev.enum_id != 0 && elem.enum_id != 0 && prev.enum_id != elem.enum_id {
                    return false;
                }
            } else {
                seen.insert(name.clone(), elem);
            }
        }
        true
    }

    /// Collect type-inst-variable bindings for a call of `fun`.
    fn bindings(&self, ast: &Ast, env: &Env, fun: FunId, arg_types: &[Type]) -> Bindings {
        let mut b = Bindings::default();
        let params = ast.func(fun).params.clone();
        for (p, &at) in params.iter().zip(arg_types) {
            let pt = param_type(ast, *p);
            let ti = ast.decl(*p).ti;
            let ExprKind::TypeInst { ranges, domain, .. } = &ast.expr(ti).kind else {
                continue;
            };
            // index bindings
            if ranges.len() == 1 && pt.dim == -1 {
                if let Some(name) = Self::range_ti_id(ast, ranges[0]) {
                    let mut idx = env.array_enum_ids(at);
                    idx.pop();
                    b.index.entry(name).or_insert((at.dim, idx));
                }
            } else if !ranges.is_empty() {
                let idx = env.array_enum_ids(at);
                for (k, &r) in ranges.iter().enumerate() {
                    if let Some(name) = Self::range_ti_id(ast, r) {
                        let e = idx.get(k).copied().unwrap_or(0);
                        b.scalar
                            .entry(name)
                            .or_insert_with(|| Type::par_enum(e));
                    }
                }
            }
            // element bindings; repeated mentions bind the join, so
            // `'='(1, 1.5)` instantiates $T at float and widens the int
            if let Some(d) = domain {
                if let ExprKind::TiId { name, .. } = &ast.expr(*d).kind {
                    let elem = Self::elem_binding(env, pt, at);
                    b.scalar
                        .entry(name.clone())
                        .and_modify(|prev| {
                            if let Some(joined) = Type::join(*prev, elem.with_st(prev.st)) {
                                *prev = joined;
                            }
                        })
                        .or_insert(elem);
                }
            }
        }
        b
    }

    /// The TiId name of an index range, if it is one.
    fn range_ti_id(ast: &Ast, range: zinc_ast::ExprId) -> Option<String> {
        match &ast.expr(range).kind {
            ExprKind::TiId { name, .. } => Some(name.clone()),
            ExprKind::TypeInst {
                domain: Some(d), ..
            } => match &ast.expr(*d).kind {
                ExprKind::TiId { name, .. } => Some(name.clone()),
                _ => None,
            },
            _ => None,
        }
    }

    fn is_any_param(pt: Type) -> bool {
        pt.bt == BaseType::Top && pt.inst == Inst::Var && pt.ot == OptType::Optional
    }

    /// The element type an argument binds to a `$T` variable.
    fn elem_binding(env: &Env, pt: Type, at: Type) -> Type {
        let mut elem = at.with_dim(0).with_enum_id(env.elem_enum_id(at));
        if !Self::is_any_param(pt) {
            // the parameter's declared flags account for themselves
            if pt.inst == Inst::Var {
                elem.inst = Inst::Par;
            }
            if pt.ot == OptType::Optional {
                elem.ot = OptType::Present;
            }
            elem.st = SetType::Plain;
        }
        elem
    }

    /// Instantiate one type-inst under the collected bindings.
    fn instantiate(&self, ast: &Ast, env: &mut Env, ti: zinc_ast::ExprId, b: &Bindings) -> Type {
        let declared = ast.ty(ti);
        let ExprKind::TypeInst { ranges, domain, .. } = &ast.expr(ti).kind else {
            return declared;
        };
        let mut t = declared;
        let mut idx_enums: Vec<u32> = Vec::new();
        if ranges.len() == 1 && declared.dim == -1 {
            if let Some(name) = Self::range_ti_id(ast, ranges[0]) {
                if let Some((dim, idx)) = b.index.get(&name) {
                    t.dim = *dim;
                    idx_enums = idx.clone();
                }
            }
        } else if !ranges.is_empty() {
            for &r in ranges.iter() {
                let e = Self::range_ti_id(ast, r)
                    .and_then(|name| b.scalar.get(&name).map(|s| s.enum_id))
                    .unwrap_or(0);
                idx_enums.push(e);
            }
        }
        let mut elem_enum = env.elem_enum_id(declared);
        if let Some(d) = domain {
            if let ExprKind::TiId { name, .. } = &ast.expr(*d).kind {
                if let Some((_, idx)) = b.index.get(name) {
                    // an index binding used in element position yields the
                    // first index enum (the return type of index_set)
                    elem_enum = idx.first().copied().unwrap_or(0);
                }
                if let Some(bound) = b.scalar.get(name) {
                    if Self::is_any_param(declared) {
                        t.inst = bound.inst;
                        t.ot = bound.ot;
                        t.st = bound.st;
                        t.bt = bound.bt;
                        elem_enum = bound.enum_id;
                    } else {
                        if declared.bt == BaseType::Top || declared.bt == BaseType::Unknown {
                            t.bt = bound.bt;
                        }
                        if declared.enum_id == 0 {
                            elem_enum = bound.enum_id;
                        }
                        if declared.inst == Inst::Par {
                            t.inst = bound.inst;
                        }
                        if declared.ot == OptType::Present {
                            t.ot = bound.ot;
                        }
                    }
                }
            }
        }
        if t.dim > 0 {
            idx_enums.resize(t.dim as usize, 0);
            if elem_enum != 0 || idx_enums.iter().any(|&e| e != 0) {
                idx_enums.push(elem_enum);
                t.enum_id = env.register_array_enum(&idx_enums);
            } else {
                t.enum_id = 0;
            }
        } else {
            t.enum_id = elem_enum;
        }
        t
    }

    /// The instantiated return type of `fun` applied to `arg_types`.
    pub fn rtype(&self, ast: &Ast, env: &mut Env, fun: FunId, arg_types: &[Type]) -> Type {
        let b = self.bindings(ast, env, fun, arg_types);
        self.instantiate(ast, env, ast.func(fun).ti, &b)
    }

    /// The instantiated type of parameter `i` of `fun` applied to
    /// `arg_types`, used as a coercion target.
    pub fn argtype(
        &self,
        ast: &Ast,
        env: &mut Env,
        fun: FunId,
        arg_types: &[Type],
        i: usize,
    ) -> Type {
        let b = self.bindings(ast, env, fun, arg_types);
        let ti = ast.decl(ast.func(fun).params[i]).ti;
        self.instantiate(ast, env, ti, &b)
    }

    /// Report overload pairs that cannot coexist: identical parameter
    /// type vectors where both overloads carry a body.
    pub fn check_overloading(&self, ast: &Ast) -> Vec<TypeError> {
        let mut errors = Vec::new();
        for (name, overloads) in &self.by_name {
            for (i, &f) in overloads.iter().enumerate() {
                for &g in &overloads[i + 1..] {
                    let fp = &ast.func(f).params;
                    let gp = &ast.func(g).params;
                    if fp.len() != gp.len() {
                        continue;
                    }
                    let same = fp
                        .iter()
                        .zip(gp.iter())
                        .all(|(a, b)| param_type(ast, *a) == param_type(ast, *b));
                    if same && ast.func(f).body.is_some() && ast.func(g).body.is_some() {
                        errors.push(TypeError::new(
                            ErrorKind::OverloadConflict,
                            ast.func(g).span,
                            format!(
                                "function `{}' with this signature already defined",
                                name
                            ),
                        ));
                    }
                }
            }
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zinc_ast::{FunctionDecl, Span};

    fn simple_fn(ast: &mut Ast, name: &str, ret: Type, params: &[Type], with_body: bool) -> FunId {
        let ti = ast.type_inst(ret);
        let params = params
            .iter()
            .enumerate()
            .map(|(i, t)| ast.param(format!("p{}", i), *t))
            .collect();
        let body = with_body.then(|| ast.bool_lit(true));
        ast.add_func(FunctionDecl::new(name, ti, params, body, Span::introduced()))
    }

    #[test]
    fn test_register_and_exists() {
        let mut ast = Ast::new();
        let mut reg = FunctionRegistry::new();
        let f = simple_fn(&mut ast, "f", Type::par_int(), &[Type::par_int()], false);
        reg.register(&ast, f);
        assert!(reg.fn_exists("f"));
        assert!(!reg.fn_exists("g"));
    }

    #[test]
    fn test_register_if_new_rejects_duplicate_signature() {
        let mut ast = Ast::new();
        let mut reg = FunctionRegistry::new();
        let f = simple_fn(&mut ast, "f", Type::par_int(), &[Type::par_int()], true);
        let g = simple_fn(&mut ast, "f", Type::par_int(), &[Type::par_int()], true);
        assert!(reg.register_if_new(&ast, f));
        assert!(!reg.register_if_new(&ast, g));
    }

    #[test]
    fn test_best_match_prefers_par() {
        let mut ast = Ast::new();
        let env = Env::new();
        let mut reg = FunctionRegistry::new();
        let par = simple_fn(
            &mut ast,
            "'+'",
            Type::par_int(),
            &[Type::par_int(), Type::par_int()],
            false,
        );
        let var = simple_fn(
            &mut ast,
            "'+'",
            Type::var_int(),
            &[Type::var_int(), Type::var_int()],
            false,
        );
        reg.register(&ast, par);
        reg.register(&ast, var);

        let best = reg.match_fn(&ast, &env, "'+'", &[Type::par_int(), Type::par_int()], true);
        assert_eq!(best, Some(par));
        let best = reg.match_fn(&ast, &env, "'+'", &[Type::var_int(), Type::par_int()], true);
        assert_eq!(best, Some(var));
        assert_eq!(reg.match_fn(&ast, &env, "'+'", &[Type::par_string()], true), None);
    }

    #[test]
    fn test_polymorphic_element_passthrough() {
        // array1d(array[$U] of any $T) -> array[int] of any $T
        let mut ast = Ast::new();
        let mut env = Env::new();
        let mut reg = FunctionRegistry::new();

        let any_elem = Type::top().with_inst(Inst::Var).with_ot(OptType::Optional);
        let u = ast.ti_id("U", false);
        let t_par = ast.ti_id("T", false);
        let param_ti = ast.type_inst_ranges(any_elem.with_dim(-1), vec![u], Some(t_par));
        let p = {
            let mut vd = zinc_ast::VarDecl::new("x", param_ti, None, Span::introduced());
            vd.toplevel = false;
            ast.add_decl(vd)
        };
        let int_range = ast.type_inst(Type::par_int());
        let t_ret = ast.ti_id("T", false);
        let ret_ti = ast.type_inst_ranges(any_elem.with_dim(1), vec![int_range], Some(t_ret));
        let f = ast.add_func(FunctionDecl::new(
            "array1d",
            ret_ti,
            vec![p],
            None,
            Span::introduced(),
        ));
        reg.register(&ast, f);

        let arg = Type::var_int().with_ot(OptType::Optional).with_dim(2);
        let got = reg.match_fn(&ast, &env, "array1d", &[arg], true).unwrap();
        assert_eq!(got, f);
        let rt = reg.rtype(&ast, &mut env, f, &[arg]);
        assert_eq!(rt.dim, 1);
        assert_eq!(rt.bt, BaseType::Int);
        assert_eq!(rt.inst, Inst::Var);
        assert_eq!(rt.ot, OptType::Optional);
    }

    #[test]
    fn test_opt_stripping_binding() {
        // deopt(opt $T) -> $T
        let mut ast = Ast::new();
        let mut env = Env::new();
        let mut reg = FunctionRegistry::new();

        let t_p = ast.ti_id("T", false);
        let pt = Type::top().with_ot(OptType::Optional);
        let param_ti = ast.type_inst_domain(pt, t_p);
        let p = {
            let mut vd = zinc_ast::VarDecl::new("x", param_ti, None, Span::introduced());
            vd.toplevel = false;
            ast.add_decl(vd)
        };
        let t_r = ast.ti_id("T", false);
        let ret_ti = ast.type_inst_domain(Type::top(), t_r);
        let f = ast.add_func(FunctionDecl::new(
            "deopt",
            ret_ti,
            vec![p],
            None,
            Span::introduced(),
        ));
        reg.register(&ast, f);

        let arg = Type::par_enum(7).with_ot(OptType::Optional);
        let rt = reg.rtype(&ast, &mut env, f, &[arg]);
        assert_eq!(rt.ot, OptType::Present);
        assert_eq!(rt.bt, BaseType::Int);
        assert_eq!(rt.enum_id, 7);
    }

    #[test]
    fn test_overload_conflict_detection() {
        let mut ast = Ast::new();
        let mut reg = FunctionRegistry::new();
        let f = simple_fn(&mut ast, "f", Type::par_int(), &[Type::par_int()], true);
        let g = simple_fn(&mut ast, "f", Type::var_int(), &[Type::par_int()], true);
        reg.register(&ast, f);
        // return types do not distinguish overloads: the parameter
        // vectors collide and both carry bodies
        reg.register(&ast, g);
        let errors = reg.check_overloading(&ast);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ErrorKind::OverloadConflict);
    }
}
