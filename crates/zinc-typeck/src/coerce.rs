//! Type-directed coercion insertion.
//!
//! `add_coercion(e, target)` returns an expression whose type is a subtype
//! of `target`, wrapping `e` in the minimal conversion sequence:
//!
//! 1. An array access that still carries set-valued indices is rewritten
//!    into a `slice_<n>d` call. Scalar indices collapse into singleton
//!    `i..i` slice sets; set-valued indices are intersected with the
//!    array's original `index_set`(`_<i>of<n>`) unless the slice is
//!    already a known finite range.
//! 2. A set meeting an array target goes through `set2array`.
//! 3. Base kinds widen along the lattice with `bool2int`, `bool2float`
//!    and `int2float`.
//!
//! Every inserted call is resolved against the registry on the spot; a
//! missing builtin here is a defect in the standard interface and
//! surfaces as an internal error.

use crate::env::Env;
use crate::error::{ErrorKind, TypeError, TypeResult};
use crate::registry::FunctionRegistry;
use zinc_ast::{
    Ast, BaseType, BinOpKind, ExprId, ExprKind, LetItem, Span, Type, VarDecl, INT_INFINITY,
    INT_NEG_INFINITY,
};

/// The two interesting shapes of a range-valued index.
#[derive(PartialEq)]
enum RangeShape {
    /// `..` — covers the whole index set
    Full,
    /// `a..b` with both endpoints literal and finite
    Finite,
    /// anything else set-valued
    Other,
}

fn range_shape(ast: &Ast, e: ExprId) -> RangeShape {
    if let ExprKind::BinOp {
        op: BinOpKind::DotDot,
        lhs,
        rhs,
        ..
    } = ast.expr(e).kind
    {
        let lo = match ast.expr(lhs).kind {
            ExprKind::IntLit(v) => Some(v),
            _ => None,
        };
        let hi = match ast.expr(rhs).kind {
            ExprKind::IntLit(v) => Some(v),
            _ => None,
        };
        return match (lo, hi) {
            (Some(INT_NEG_INFINITY), Some(INT_INFINITY)) => RangeShape::Full,
            (Some(a), Some(b)) if a != INT_NEG_INFINITY && b != INT_INFINITY => RangeShape::Finite,
            _ => RangeShape::Other,
        };
    }
    RangeShape::Other
}

/// Build and resolve a call, assigning its instantiated return type.
///
/// Fails with an internal error when the name has no matching overload:
/// the callers only construct calls to the standard interface.
fn resolved_call(
    ast: &mut Ast,
    env: &mut Env,
    registry: &FunctionRegistry,
    name: &str,
    args: Vec<ExprId>,
    span: Span,
) -> TypeResult<ExprId> {
    let arg_types: Vec<Type> = args.iter().map(|a| ast.ty(*a)).collect();
    let Some(fi) = registry.match_fn(ast, env, name, &arg_types, false) else {
        return Err(TypeError::new(
            ErrorKind::Internal,
            span,
            format!("missing builtin {}", name),
        ));
    };
    let ty = registry.rtype(ast, env, fi, &arg_types);
    let call = ast.alloc_typed(
        ExprKind::Call {
            name: name.to_string(),
            args,
            decl: Some(fi),
        },
        ty,
        span,
    );
    Ok(call)
}

/// Rewrite an array access with set-valued indices into `slice_<n>d`.
fn slice_rewrite(
    ast: &mut Ast,
    env: &mut Env,
    registry: &FunctionRegistry,
    e: ExprId,
) -> TypeResult<ExprId> {
    let span = ast.span(e);
    let access_ty = ast.ty(e);
    let ExprKind::ArrayAccess { array, idxs } = ast.expr(e).kind.clone() else {
        return Ok(e);
    };
    let n_idxs = idxs.len();
    let mut args: Vec<ExprId> = vec![array];
    let mut idx_set_args: Vec<ExprId> = Vec::new();
    let mut slice: Vec<ExprId> = Vec::new();

    for (i, idx) in idxs.iter().copied().enumerate() {
        if ast.ty(idx).is_set() {
            let shape = range_shape(ast, idx);
            if shape == RangeShape::Finite {
                idx_set_args.push(idx);
            } else {
                // need the original index set of this dimension
                let name = if n_idxs > 1 {
                    format!("index_set_{}of{}", i + 1, n_idxs)
                } else {
                    "index_set".to_string()
                };
                let orig = resolved_call(ast, env, registry, &name, vec![array], span)?;
                if shape == RangeShape::Full {
                    idx_set_args.push(orig);
                } else {
                    let inter = ast.binop(BinOpKind::Intersect, idx, orig);
                    ast.set_ty(inter, Type::par_set_int());
                    idx_set_args.push(inter);
                }
            }
            slice.push(idx);
        } else {
            // scalar index: a singleton slice set i..i; compound index
            // expressions are hoisted into a let so they evaluate once
            let slice_set = match ast.expr(idx).kind {
                ExprKind::Id { .. } | ExprKind::IntLit(_) => {
                    let bo = ast.binop(BinOpKind::DotDot, idx, idx);
                    ast.set_ty(bo, Type::par_set_int());
                    bo
                }
                _ => {
                    let idx_ty = ast.ty(idx);
                    let ti = ast.type_inst(idx_ty);
                    let name = ast.gen_ident();
                    let vd = ast.add_decl(
                        VarDecl::new(name, ti, Some(idx), Span::introduced()).non_toplevel(),
                    );
                    ast.decl_mut(vd).ty = idx_ty;
                    let lhs = ast.ident_for(vd);
                    let rhs = ast.ident_for(vd);
                    let bo = ast.binop(BinOpKind::DotDot, lhs, rhs);
                    ast.set_ty(bo, Type::par_set_int());
                    let l = ast.let_in(vec![LetItem::Decl(vd)], bo);
                    ast.set_ty(l, Type::par_set_int());
                    l
                }
            };
            slice.push(slice_set);
        }
    }

    let a_slice = ast.array_lit(slice);
    ast.set_ty(a_slice, Type::par_set_int().with_dim(1));
    args.push(a_slice);
    args.extend(idx_set_args);

    let name = format!("slice_{}d", args.len() - 2);
    let call = resolved_call(ast, env, registry, &name, args, span)?;
    // the access already computed the sliced type, including enum tags;
    // keep it in preference to the builtin's generic instantiation
    if !access_ty.is_unknown() {
        ast.set_ty(call, access_ty);
    }
    Ok(call)
}

/// Coerce `e` to (a subtype of) `target`.
pub fn add_coercion(
    ast: &mut Ast,
    env: &mut Env,
    registry: &FunctionRegistry,
    e: ExprId,
    target: Type,
) -> TypeResult<ExprId> {
    let mut e = e;
    if matches!(ast.expr(e).kind, ExprKind::ArrayAccess { .. }) && ast.ty(e).dim > 0 {
        e = slice_rewrite(ast, env, registry, e)?;
    }
    let et = ast.ty(e);
    if et.dim == target.dim
        && (target.bt == BaseType::Bot
            || target.bt == BaseType::Top
            || et.bt == target.bt
            || et.bt == BaseType::Bot)
    {
        return Ok(e);
    }
    if et.dim == 0 && target.dim != 0 {
        if et.is_var() {
            return Err(TypeError::new(
                ErrorKind::TypeMismatch,
                ast.span(e),
                "cannot coerce var set into array",
            ));
        }
        if et.is_opt() {
            return Err(TypeError::new(
                ErrorKind::TypeMismatch,
                ast.span(e),
                "cannot coerce opt set into array",
            ));
        }
        let span = ast.span(e);
        if let Ok(call) = resolved_call(ast, env, registry, "set2array", vec![e], span) {
            e = call;
        }
    }
    let et = ast.ty(e);
    if target.bt == BaseType::Top || et.bt == target.bt || et.bt == BaseType::Bot {
        return Ok(e);
    }
    let name = match (et.bt, target.bt) {
        (BaseType::Bool, BaseType::Int) => Some("bool2int"),
        (BaseType::Bool, BaseType::Float) => Some("bool2float"),
        (BaseType::Int, BaseType::Float) => Some("int2float"),
        _ => None,
    };
    if let Some(name) = name {
        let span = ast.span(e);
        let arg_types = [ast.ty(e)];
        if let Some(fi) = registry.match_fn(ast, env, name, &arg_types, false) {
            let mut ty = registry.rtype(ast, env, fi, &arg_types);
            ty.cv = et.cv || ty.cv;
            let call = ast.alloc_typed(
                ExprKind::Call {
                    name: name.to_string(),
                    args: vec![e],
                    decl: Some(fi),
                },
                ty,
                span,
            );
            return Ok(call);
        }
    }
    Err(TypeError::new(
        ErrorKind::TypeMismatch,
        ast.span(e),
        format!(
            "cannot determine coercion from type {} to type {}",
            env.type_str(ast, et),
            env.type_str(ast, target)
        ),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins;
    use zinc_ast::Model;

    fn setup() -> (Ast, Env, FunctionRegistry) {
        let mut ast = Ast::new();
        let mut model = Model::new();
        let mut reg = FunctionRegistry::new();
        builtins::install(&mut ast, &mut model, &mut reg);
        (ast, Env::new(), reg)
    }

    #[test]
    fn test_no_coercion_for_matching_types() {
        let (mut ast, mut env, reg) = setup();
        let e = ast.int_lit(1);
        ast.set_ty(e, Type::par_int());
        let out = add_coercion(&mut ast, &mut env, &reg, e, Type::var_int()).unwrap();
        assert_eq!(out, e);
    }

    #[test]
    fn test_bool_to_int() {
        let (mut ast, mut env, reg) = setup();
        let e = ast.bool_lit(true);
        ast.set_ty(e, Type::var_bool());
        let out = add_coercion(&mut ast, &mut env, &reg, e, Type::var_int()).unwrap();
        let ExprKind::Call { name, decl, .. } = &ast.expr(out).kind else {
            panic!("expected a coercion call");
        };
        assert_eq!(name, "bool2int");
        assert!(decl.is_some());
        assert_eq!(ast.ty(out), Type::var_int());
    }

    #[test]
    fn test_int_to_float_keeps_cv() {
        let (mut ast, mut env, reg) = setup();
        let e = ast.int_lit(3);
        ast.set_ty(e, Type::par_int().with_cv(true));
        let out = add_coercion(&mut ast, &mut env, &reg, e, Type::par_float().with_cv(true)).unwrap();
        assert_eq!(ast.ty(out).bt, BaseType::Float);
        assert!(ast.ty(out).cv);
    }

    #[test]
    fn test_set_to_array() {
        let (mut ast, mut env, reg) = setup();
        let a = ast.int_lit(1);
        ast.set_ty(a, Type::par_int());
        let s = ast.set_lit(vec![a]);
        ast.set_ty(s, Type::par_set_int());
        let out =
            add_coercion(&mut ast, &mut env, &reg, s, Type::par_int().with_dim(1)).unwrap();
        let ExprKind::Call { name, .. } = &ast.expr(out).kind else {
            panic!("expected set2array call");
        };
        assert_eq!(name, "set2array");
    }

    #[test]
    fn test_var_set_to_array_fails() {
        let (mut ast, mut env, reg) = setup();
        let s = ast.set_lit(vec![]);
        ast.set_ty(s, Type::var_set_int());
        let err =
            add_coercion(&mut ast, &mut env, &reg, s, Type::var_int().with_dim(1)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TypeMismatch);
    }

    #[test]
    fn test_no_coercion_exists() {
        let (mut ast, mut env, reg) = setup();
        let e = ast.str_lit("hi");
        ast.set_ty(e, Type::par_string());
        let err = add_coercion(&mut ast, &mut env, &reg, e, Type::par_int()).unwrap_err();
        assert!(err.message.contains("cannot determine coercion"));
    }

    #[test]
    fn test_slice_rewrite_builds_slice_call() {
        let (mut ast, mut env, reg) = setup();
        // a : array[1..5] of int, access a[1..2] (finite range slice)
        let ti = ast.type_inst(Type::par_int().with_dim(1));
        let arr_decl = ast.add_decl(VarDecl::new("a", ti, None, Span::introduced()));
        ast.decl_mut(arr_decl).ty = Type::par_int().with_dim(1);
        let arr = ast.ident_for(arr_decl);

        let lo = ast.int_lit(1);
        let hi = ast.int_lit(2);
        for e in [lo, hi] {
            ast.set_ty(e, Type::par_int());
        }
        let range = ast.binop(BinOpKind::DotDot, lo, hi);
        ast.set_ty(range, Type::par_set_int());

        let access = ast.array_access(arr, vec![range]);
        ast.set_ty(access, Type::par_int().with_dim(1));

        let out =
            add_coercion(&mut ast, &mut env, &reg, access, Type::par_int().with_dim(1)).unwrap();
        let ExprKind::Call { name, args, decl } = &ast.expr(out).kind else {
            panic!("expected slice call");
        };
        assert_eq!(name, "slice_1d");
        assert!(decl.is_some());
        // array, slice-set array literal, and the finite index set
        assert_eq!(args.len(), 3);
    }
}
