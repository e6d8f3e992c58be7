//! The semantic-analysis driver.
//!
//! Sequences the passes over a parsed model:
//!
//! 1. install the standard interface and register user functions
//!    (expanding `annotated_expression` parameter annotations),
//! 2. walk items: enter declarations into scope, elaborate enums,
//!    collect assignments, synthesize the solve objective,
//! 3. fold assignment items into their target declarations (re-running
//!    enum elaboration where an `enum E; E = ...;` pair meets),
//! 4. dependency-sort every declaration and reorder the items,
//! 5. run the bottom-up typer twice: signatures first, then everything,
//! 6. par-specialise var functions with par-computable bodies,
//! 7. check overload coherence, collect output sections, apply the
//!    post-conditions (enum demotion, missing parameters, checker-model
//!    wiring).
//!
//! Recoverable diagnostics accumulate into the returned list; circular
//! definitions, scope failures and elaborator invariant violations are
//! fatal and surface as `Err`.

use crate::builtins::{self, Builtins};
use crate::coerce::add_coercion;
use crate::enums::EnumElaborator;
use crate::env::Env;
use crate::error::{ErrorKind, TypeError, TypeResult};
use crate::eval::eval_string;
use crate::registry::{param_type, FunctionRegistry};
use crate::toposort::TopoSorter;
use crate::typer::Typer;
use std::collections::{HashMap, HashSet};
use tracing::debug;
use zinc_ast::{
    Ast, BaseType, BinOpKind, DeclId, ExprId, ExprKind, FunId, FunctionDecl, Inst, Item,
    ItemKind, Model, OptType, SolveGoal, Span, Type, VarDecl,
};

/// Driver configuration.
#[derive(Debug, Default, Clone, Copy)]
pub struct TypecheckOptions {
    /// Par inputs without data are tolerated (model-interface tooling)
    pub ignore_undefined_parameters: bool,
    /// Re-assignment emits an equality constraint instead of an error
    pub allow_multi_assignment: bool,
    /// The model is a solution checker: the objective is named
    /// `_checker_objective`
    pub is_checker: bool,
    /// Annotations referencing unknown identifiers are dropped
    pub ignore_unknown_ids: bool,
}

/// The analyser's output: accumulated diagnostics, the dependency order
/// of toplevel declarations, and the populated overload registry.
#[derive(Debug)]
pub struct Typechecked {
    pub errors: Vec<TypeError>,
    pub decl_order: Vec<DeclId>,
    pub registry: FunctionRegistry,
}

/// Accumulate a recoverable failure, propagate a fatal one.
fn note_or_fail(errors: &mut Vec<TypeError>, r: TypeResult<()>) -> TypeResult<()> {
    match r {
        Ok(()) => Ok(()),
        Err(e) => match e.kind {
            ErrorKind::CircularDefinition
            | ErrorKind::DuplicateIdentifier
            | ErrorKind::InvalidEnum
            | ErrorKind::Internal => Err(e),
            _ => {
                errors.push(e);
                Ok(())
            }
        },
    }
}

/// Type-check a model in place.
pub fn typecheck(
    ast: &mut Ast,
    model: &mut Model,
    env: &mut Env,
    options: &TypecheckOptions,
) -> TypeResult<Typechecked> {
    env.ignore_unknown_ids = options.ignore_unknown_ids;
    let mut errors: Vec<TypeError> = Vec::new();
    let mut registry = FunctionRegistry::new();
    let b = builtins::install(ast, model, &mut registry);

    let mut ts = TopoSorter::new();
    let mut elab = EnumElaborator::new();

    register_functions(ast, model, &mut registry, &mut errors);
    debug!(items = model.items.len(), "functions registered");

    // --- item walk: scopes, enums, assignments, objective ----------------
    let mut assignments: Vec<(usize, String, ExprId)> = Vec::new();
    let mut enum_items: Vec<Item> = Vec::new();
    let mut had_solve = false;
    let mut objective: Option<DeclId> = None;
    for idx in 0..model.items.len() {
        let span = model.items[idx].span;
        match model.items[idx].kind.clone() {
            ItemKind::VarDeclItem(d) => {
                handle_enum_decl(ast, env, &mut elab, d, &mut enum_items)?;
                ts.add_decl(ast, env, d)?;
            }
            ItemKind::Assign { name, expr, .. } => {
                assignments.push((idx, name, expr));
            }
            ItemKind::Solve { goal, expr, .. } => {
                if had_solve {
                    errors.push(TypeError::new(
                        ErrorKind::TypeMismatch,
                        span,
                        "Only one solve item allowed",
                    ));
                    continue;
                }
                had_solve = true;
                if let Some(goal_expr) = expr {
                    let obj_name = if options.is_checker {
                        "_checker_objective"
                    } else {
                        "_objective"
                    };
                    let ti = ast.type_inst(Type::unknown());
                    let mut vd = VarDecl::new(
                        obj_name,
                        ti,
                        Some(goal_expr),
                        ast.span(goal_expr).introduce(),
                    );
                    let ctx = if goal == SolveGoal::Maximize {
                        b.ctx_pos
                    } else {
                        b.ctx_neg
                    };
                    let ctx_id = ast.ident_for(ctx);
                    vd.ann.push(ctx_id);
                    let obj = ast.add_decl(vd);
                    let obj_id = ast.ident_for(obj);
                    if let ItemKind::Solve { expr: slot, .. } = &mut model.items[idx].kind {
                        *slot = Some(obj_id);
                    }
                    objective = Some(obj);
                }
            }
            _ => {}
        }
    }
    if let Some(obj) = objective {
        model.push(ItemKind::VarDeclItem(obj), Span::introduced());
        ts.add_decl(ast, env, obj)?;
    }
    distribute_enum_items(ast, model, &mut registry, &mut ts, env, enum_items)?;

    // --- assignment folding ----------------------------------------------
    let mut enum_items2: Vec<Item> = Vec::new();
    for (idx, name, expr) in assignments {
        let span = model.items[idx].span;
        model.items[idx].removed = true;
        let vd = match ts.get(ast, &name, span) {
            Ok(vd) => vd,
            Err(e) => {
                if !env.ignore_unknown_ids {
                    errors.push(e);
                }
                continue;
            }
        };
        if let ItemKind::Assign { decl, .. } = &mut model.items[idx].kind {
            *decl = Some(vd);
        }
        if ast.decl(vd).init.is_some() {
            if options.allow_multi_assignment {
                let id = ast.ident_for(vd);
                let eq = ast.alloc(
                    ExprKind::BinOp {
                        op: BinOpKind::Eq,
                        lhs: id,
                        rhs: expr,
                        decl: None,
                    },
                    span,
                );
                model.push(ItemKind::Constraint(eq), span);
            } else {
                errors.push(TypeError::new(
                    ErrorKind::TypeMismatch,
                    span,
                    "multiple assignment to the same variable",
                ));
            }
        } else {
            ast.decl_mut(vd).init = Some(expr);
            let rhs_ann = ast.ident_for(b.rhs_from_assignment);
            ast.decl_mut(vd).ann.push(rhs_ann);
            let ti = ast.decl(vd).ti;
            if matches!(
                ast.expr(ti).kind,
                ExprKind::TypeInst { is_enum: true, .. }
            ) {
                let enum_id = ast.ty(ti).enum_id;
                elab.elaborate(ast, env, enum_id, vd, &mut enum_items2)?;
            }
        }
    }
    distribute_enum_items(ast, model, &mut registry, &mut ts, env, enum_items2)?;

    // identifiers whose enum arrives at call time need a generic renderer
    let mut generic_items = Vec::new();
    elab.emit_generic_to_strings(ast, &registry, &mut generic_items);
    distribute_enum_items(ast, model, &mut registry, &mut ts, env, generic_items)?;

    // --- dependency sort --------------------------------------------------
    //
    // A recoverable resolution failure poisons its item: the diagnostic
    // is kept and the item excluded from the type passes.
    debug!("running dependency analysis");
    for idx in 0..model.items.len() {
        if model.items[idx].removed {
            continue;
        }
        let r = match model.items[idx].kind.clone() {
            ItemKind::VarDeclItem(d) => ts.run_decl(ast, env, d),
            ItemKind::Constraint(e) => ts.run(ast, env, e),
            ItemKind::Solve { expr, ann, .. } => (|| {
                for a in ann {
                    ts.run(ast, env, a)?;
                }
                if let Some(e) = expr {
                    ts.run(ast, env, e)?;
                }
                Ok(())
            })(),
            ItemKind::Output { expr, .. } => ts.run(ast, env, expr),
            ItemKind::Function(f) => run_function_decl(ast, env, &mut ts, f),
            ItemKind::Assign { .. } | ItemKind::Include { .. } => Ok(()),
        };
        if r.is_err() {
            model.items[idx].removed = true;
        }
        note_or_fail(&mut errors, r)?;
    }

    // reorder items so definitions precede uses
    model.items.sort_by_key(|item| match &item.kind {
        ItemKind::Include { .. } => (0u8, 0i32),
        ItemKind::VarDeclItem(d) => (1, ast.decl(*d).payload),
        _ => (2, 0),
    });

    // --- type pass 1: signatures only -------------------------------------
    debug!(decls = ts.decls.len(), "type pass 1");
    {
        let mut typer = Typer {
            ast: &mut *ast,
            env: &mut *env,
            registry: &registry,
            errors: &mut errors,
            full: false,
            empty_annotation: Some(b.empty_annotation),
        };
        for &d in &ts.decls {
            typer.ast.decl_mut(d).payload = 0;
            if typer.ast.decl(d).toplevel {
                let r = typer.run_var_decl(d);
                note_or_fail(typer.errors, r)?;
            }
        }
        for f in model.function_items() {
            let ti = typer.ast.func(f).ti;
            let r = typer.run(ti);
            note_or_fail(typer.errors, r)?;
            for p in typer.ast.func(f).params.clone() {
                let r = typer.run_var_decl(p);
                note_or_fail(typer.errors, r)?;
            }
        }
    }

    // --- type pass 2: everything ------------------------------------------
    debug!("type pass 2");
    {
        let mut typer = Typer {
            ast: &mut *ast,
            env: &mut *env,
            registry: &registry,
            errors: &mut errors,
            full: true,
            empty_annotation: Some(b.empty_annotation),
        };

        // anonymous-enum initialisers are typed before everything else
        for c in elab.constructor_set_types.clone() {
            let ExprKind::Call { name, args, .. } = typer.ast.expr(c).kind.clone() else {
                continue;
            };
            let r = typer.run(args[0]);
            note_or_fail(typer.errors, r)?;
            let at = typer.ast.ty(args[0]);
            if name == "anon_enum" && !at.shape_eq(Type::par_int()) {
                return Err(TypeError::new(
                    ErrorKind::InvalidEnum,
                    typer.ast.span(args[0]),
                    format!(
                        "anonymous enum initializer must be of type `int', but is `{}'",
                        typer.env.type_str(typer.ast, at)
                    ),
                ));
            }
            if name == "anon_enum_set" && !typer.env.is_subtype(at, Type::par_set_int(), false) {
                return Err(TypeError::new(
                    ErrorKind::InvalidEnum,
                    typer.ast.span(args[0]),
                    format!(
                        "anonymous enum initializer must be of type `set of int', but is `{}'",
                        typer.env.type_str(typer.ast, at)
                    ),
                ));
            }
        }

        for idx in 0..model.items.len() {
            if model.items[idx].removed {
                continue;
            }
            let kind = model.items[idx].kind.clone();
            let r = type_item(&mut typer, model, idx, kind);
            note_or_fail(typer.errors, r)?;
        }
    }

    // --- par-specialisation ------------------------------------------------
    debug!("par-specialisation");
    par_specialise(ast, model, env, &mut registry, &mut errors, &b)?;

    errors.extend(registry.check_overloading(ast));

    // --- output sections ---------------------------------------------------
    if errors.is_empty() {
        for idx in 0..model.items.len() {
            if model.items[idx].removed {
                continue;
            }
            if let ItemKind::Output { expr, ann } = model.items[idx].kind.clone() {
                let mut section = "default".to_string();
                for a in &ann {
                    if let ExprKind::Call { name, args, .. } = &ast.expr(*a).kind {
                        if name == "mzn_output_section" && args.len() == 1 {
                            if let Some(s) = eval_string(ast, args[0]) {
                                section = s;
                            }
                        }
                    }
                }
                env.output_sections.entry(section).or_default().push(expr);
                model.items[idx].removed = true;
            }
        }
    }

    // --- post-conditions ---------------------------------------------------
    for &d in &ts.decls {
        let vd = ast.decl(d);
        if vd.toplevel && vd.ty.is_par() && vd.ty.bt != BaseType::Ann && vd.init.is_none() {
            if vd.ty.is_opt() && vd.ty.dim == 0 {
                let absent = ast.absent();
                ast.set_ty(absent, Type::bot(0).with_ot(OptType::Optional));
                ast.decl_mut(d).init = Some(absent);
                let ann = ast.ident_for(b.mzn_was_undefined);
                ast.decl_mut(d).ann.push(ann);
            } else if !options.ignore_undefined_parameters {
                errors.push(TypeError::new(
                    ErrorKind::MissingParameter,
                    ast.decl(d).span,
                    format!(
                        "symbol error: variable `{}' must be defined (did you forget to \
                         specify a data file?)",
                        ast.decl(d).name
                    ),
                ));
            }
        }
        let ti = ast.decl(d).ti;
        if matches!(
            ast.expr(ti).kind,
            ExprKind::TypeInst { is_enum: true, .. }
        ) {
            if let ExprKind::TypeInst { is_enum, .. } = &mut ast.expr_mut(ti).kind {
                *is_enum = false;
            }
            let demoted = ast.ty(ti).with_enum_id(0);
            ast.set_ty(ti, demoted);
        }
    }

    check_checker_vars(ast, env, &registry, &ts, &mut errors, &b);

    debug!(errors = errors.len(), warnings = env.warnings.len(), "typecheck finished");
    Ok(Typechecked {
        errors,
        decl_order: ts.decls.clone(),
        registry,
    })
}

/// Type-check a standalone assignment (a data-file item) against its
/// target declaration.
pub fn typecheck_assignment(
    ast: &mut Ast,
    env: &mut Env,
    registry: &FunctionRegistry,
    decl: DeclId,
    expr: ExprId,
) -> TypeResult<()> {
    let mut errors = Vec::new();
    let mut typer = Typer {
        ast: &mut *ast,
        env: &mut *env,
        registry,
        errors: &mut errors,
        full: true,
        empty_annotation: None,
    };
    typer.run(expr)?;
    if let Some(e) = errors.into_iter().next() {
        return Err(e);
    }
    let target = ast.ty(ast.decl(decl).ti);
    let et = ast.ty(expr);
    if !env.is_subtype(et, target, true) {
        return Err(TypeError::new(
            ErrorKind::TypeMismatch,
            ast.span(expr),
            format!(
                "assignment value for `{}' has invalid type-inst: expected `{}', actual `{}'",
                ast.decl(decl).name,
                env.type_str(ast, target),
                env.type_str(ast, et)
            ),
        ));
    }
    Ok(())
}

/// Register an enum declaration and run the elaborator over it.
fn handle_enum_decl(
    ast: &mut Ast,
    env: &mut Env,
    elab: &mut EnumElaborator,
    d: DeclId,
    out: &mut Vec<Item>,
) -> TypeResult<()> {
    let ti = ast.decl(d).ti;
    if !matches!(
        ast.expr(ti).kind,
        ExprKind::TypeInst { is_enum: true, .. }
    ) {
        return Ok(());
    }
    let enum_id = env.register_enum(d);
    let tagged = ast.ty(ti).with_enum_id(enum_id);
    ast.set_ty(ti, tagged);
    ast.decl_mut(d).ty = tagged;
    elab.elaborate(ast, env, enum_id, d, out)
}

/// Distribute elaborator output: declarations enter the scopes (without
/// re-running enum handling), functions are registered.
fn distribute_enum_items(
    ast: &mut Ast,
    model: &mut Model,
    registry: &mut FunctionRegistry,
    ts: &mut TopoSorter,
    env: &mut Env,
    items: Vec<Item>,
) -> TypeResult<()> {
    for item in items {
        match item.kind {
            ItemKind::VarDeclItem(d) => {
                ts.add_decl(ast, env, d)?;
                model.add_item(item);
            }
            ItemKind::Function(f) => {
                registry.register(ast, f);
                model.add_item(item);
            }
            _ => model.add_item(item),
        }
    }
    Ok(())
}

/// Register user function items, expanding `annotated_expression`
/// parameter annotations into annotation declarations.
fn register_functions(
    ast: &mut Ast,
    model: &mut Model,
    registry: &mut FunctionRegistry,
    errors: &mut Vec<TypeError>,
) {
    let mut to_add: Vec<Item> = Vec::new();
    let mut reified_annotation_ids: HashSet<String> = HashSet::new();
    for idx in 0..model.items.len() {
        let ItemKind::Function(f) = model.items[idx].kind else {
            continue;
        };
        if ast.func(f).from_stdlib {
            continue; // installed and registered already
        }
        registry.register(ast, f);

        let mut reified_idx: Option<usize> = None;
        for (j, &p) in ast.func(f).params.iter().enumerate() {
            let annotated = ast.decl(p).ann.iter().any(|&a| {
                matches!(&ast.expr(a).kind, ExprKind::Id { name, .. } if name == "annotated_expression")
            });
            if annotated {
                if j != 0 {
                    errors.push(TypeError::new(
                        ErrorKind::TypeMismatch,
                        ast.decl(p).span,
                        "only the first argument can be annotated with annotated_expression",
                    ));
                }
                reified_idx = Some(j);
            }
        }
        let Some(reified_idx) = reified_idx else {
            continue;
        };
        let name = ast.func(f).name.clone();
        if ast.func(f).params.len() == 1 {
            // an annotation constant carrying the annotated expression
            if reified_annotation_ids.insert(name.clone()) {
                let ti = ast.type_inst(Type::ann());
                let mut vd = VarDecl::new(name, ti, None, Span::introduced());
                vd.ty = Type::ann();
                let idx_lit = ast.int_lit(0);
                let ann = ast.call("mzn_add_annotated_expression", vec![idx_lit]);
                vd.ann.push(ann);
                let d = ast.add_decl(vd);
                to_add.push(Item::new(ItemKind::VarDeclItem(d), Span::introduced()));
            }
        } else {
            // an annotation function with the annotated argument removed
            let mut map = HashMap::new();
            let params: Vec<DeclId> = ast
                .func(f)
                .params
                .clone()
                .into_iter()
                .enumerate()
                .filter(|(k, _)| *k != reified_idx)
                .map(|(_, p)| ast.copy_decl(p, &mut map))
                .collect();
            let ret_ti = ast.func(f).ti;
            let mut nf = FunctionDecl::new(name, ret_ti, params, None, Span::introduced());
            let idx_lit = ast.int_lit(reified_idx as i64);
            let ann = ast.call("mzn_add_annotated_expression", vec![idx_lit]);
            nf.ann.push(ann);
            let nf = ast.add_func(nf);
            registry.register(ast, nf);
            to_add.push(Item::new(ItemKind::Function(nf), Span::introduced()));
        }
    }
    for item in to_add {
        model.add_item(item);
    }
}

/// Dependency-walk a function declaration: signature in the enclosing
/// scope, body under the parameter scope.
fn run_function_decl(
    ast: &mut Ast,
    env: &mut Env,
    ts: &mut TopoSorter,
    f: FunId,
) -> TypeResult<()> {
    let ti = ast.func(f).ti;
    ts.run(ast, env, ti)?;
    for p in ast.func(f).params.clone() {
        ts.run_decl(ast, env, p)?;
    }
    for a in ast.func(f).ann.clone() {
        ts.run(ast, env, a)?;
    }
    ts.scopes.push_fun();
    let result = (|| -> TypeResult<()> {
        for p in ast.func(f).params.clone() {
            ts.scopes.add(ast, env, p)?;
        }
        if let Some(body) = ast.func(f).body {
            ts.run(ast, env, body)?;
        }
        Ok(())
    })();
    ts.scopes.pop();
    result
}

/// The full type pass over one item.
fn type_item(
    typer: &mut Typer<'_>,
    model: &mut Model,
    idx: usize,
    kind: ItemKind,
) -> TypeResult<()> {
    match kind {
        ItemKind::VarDeclItem(d) => {
            typer.run_var_decl(d)?;
            let ti = typer.ast.decl(d).ti;
            if typer.has_ti_variable(ti) {
                typer.errors.push(TypeError::new(
                    ErrorKind::TypeMismatch,
                    typer.ast.decl(d).span,
                    format!(
                        "type-inst variables not allowed in type-inst for `{}'",
                        typer.ast.decl(d).name
                    ),
                ));
            }
            let vd_ty = typer.ast.decl(d).ty;
            let has_domain = matches!(
                typer.ast.expr(ti).kind,
                ExprKind::TypeInst { domain: Some(_), .. }
            );
            if typer.ast.decl(d).init.is_none()
                && vd_ty.is_set()
                && vd_ty.is_var()
                && !has_domain
            {
                typer.errors.push(TypeError::new(
                    ErrorKind::TypeMismatch,
                    typer.ast.decl(d).span,
                    format!(
                        "set element type for `{}' is not finite",
                        typer.ast.decl(d).name
                    ),
                ));
            }
            let output_only = typer.ast.decl(d).ann.iter().any(|&a| {
                matches!(&typer.ast.expr(a).kind, ExprKind::Id { name, .. } if name == "output_only")
            });
            if output_only {
                match typer.ast.decl(d).init {
                    None => typer.errors.push(TypeError::new(
                        ErrorKind::TypeMismatch,
                        typer.ast.decl(d).span,
                        "variables annotated with ::output_only must have a right hand side",
                    )),
                    Some(init) => {
                        if typer.ast.ty(init).is_var() {
                            typer.errors.push(TypeError::new(
                                ErrorKind::TypeMismatch,
                                typer.ast.decl(d).span,
                                "variables annotated with ::output_only must be par",
                            ));
                        }
                    }
                }
            }
        }
        ItemKind::Constraint(e) => {
            typer.run(e)?;
            let coerced = add_coercion(
                typer.ast,
                typer.env,
                typer.registry,
                e,
                Type::var_bool(),
            )?;
            if let ItemKind::Constraint(slot) = &mut model.items[idx].kind {
                *slot = coerced;
            }
            let ct = typer.ast.ty(coerced);
            if !typer.env.is_subtype(ct, Type::var_bool(), true) {
                typer.errors.push(TypeError::new(
                    ErrorKind::TypeMismatch,
                    typer.ast.span(e),
                    format!(
                        "invalid type of constraint, expected `var bool', actual `{}'",
                        typer.env.type_str(typer.ast, ct)
                    ),
                ));
            }
        }
        ItemKind::Solve { goal, expr, ann } => {
            for a in ann {
                typer.run(a)?;
                let at = typer.ast.ty(a);
                if !at.is_ann() {
                    typer.errors.push(TypeError::new(
                        ErrorKind::TypeMismatch,
                        typer.ast.span(a),
                        format!(
                            "expected annotation, got `{}'",
                            typer.env.type_str(typer.ast, at)
                        ),
                    ));
                }
            }
            let Some(e) = expr else { return Ok(()) };
            typer.run(e)?;
            let et = typer.ast.ty(e);
            let mut obj = e;
            if et.bt == BaseType::Bool && et.dim == 0 && !et.is_set() {
                let mut target = Type::var_int();
                if et.is_opt() {
                    target = target.with_ot(OptType::Optional);
                }
                obj = add_coercion(typer.ast, typer.env, typer.registry, obj, target)?;
            }
            let need_opt_coercion = et.is_opt() && et.bt == BaseType::Int && et.dim == 0;
            let mut check_t = typer.ast.ty(obj);
            if need_opt_coercion {
                check_t = check_t.with_ot(OptType::Present);
            }
            if !(typer.env.is_subtype(check_t, Type::var_int(), true)
                || typer.env.is_subtype(check_t, Type::var_float(), true))
            {
                typer.errors.push(TypeError::new(
                    ErrorKind::TypeMismatch,
                    typer.ast.span(e),
                    format!(
                        "objective has invalid type, expected int or float, actual `{}'",
                        typer.env.type_str(typer.ast, typer.ast.ty(obj))
                    ),
                ));
            }
            if need_opt_coercion {
                let maximise = typer.ast.bool_lit(goal == SolveGoal::Maximize);
                typer.ast.set_ty(maximise, Type::par_bool());
                let args = vec![obj, maximise];
                let tys: Vec<Type> = args.iter().map(|a| typer.ast.ty(*a)).collect();
                let Some(fi) = typer.registry.match_fn(
                    typer.ast,
                    typer.env,
                    "objective_deopt_",
                    &tys,
                    false,
                ) else {
                    return Err(TypeError::new(
                        ErrorKind::Internal,
                        typer.ast.span(e),
                        "missing builtin objective_deopt_",
                    ));
                };
                let et = typer.ast.ty(obj);
                obj = typer.ast.alloc_typed(
                    ExprKind::Call {
                        name: "objective_deopt_".to_string(),
                        args,
                        decl: Some(fi),
                    },
                    et,
                    typer.ast.span(e),
                );
            }
            if obj != e {
                if let ItemKind::Solve { expr: slot, .. } = &mut model.items[idx].kind {
                    *slot = Some(obj);
                }
            }
        }
        ItemKind::Output { expr, ann } => {
            for a in ann {
                typer.run(a)?;
                let at = typer.ast.ty(a);
                if !at.is_ann() {
                    typer.errors.push(TypeError::new(
                        ErrorKind::TypeMismatch,
                        typer.ast.span(a),
                        format!(
                            "expected annotation, got `{}'",
                            typer.env.type_str(typer.ast, at)
                        ),
                    ));
                }
            }
            typer.run(expr)?;
            let et = typer.ast.ty(expr);
            let expected = Type::par_string().with_dim(1);
            if !et.shape_eq(expected) && !et.shape_eq(Type::bot(1)) {
                typer.errors.push(TypeError::new(
                    ErrorKind::TypeMismatch,
                    typer.ast.span(expr),
                    format!(
                        "invalid type in output item, expected `array[int] of string', \
                         actual `{}'",
                        typer.env.type_str(typer.ast, et)
                    ),
                ));
            }
        }
        ItemKind::Function(f) => type_function_item(typer, f)?,
        ItemKind::Assign { .. } | ItemKind::Include { .. } => {}
    }
    Ok(())
}

/// Where a type-inst variable appears in a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TiVarPosition {
    Index,
    Domain,
}

fn type_function_item(typer: &mut Typer<'_>, f: FunId) -> TypeResult<()> {
    for a in typer.ast.func(f).ann.clone() {
        typer.run(a)?;
        let at = typer.ast.ty(a);
        if !at.is_ann() {
            typer.errors.push(TypeError::new(
                ErrorKind::TypeMismatch,
                typer.ast.span(a),
                format!(
                    "expected annotation, got `{}'",
                    typer.env.type_str(typer.ast, at)
                ),
            ));
        }
    }
    let ret_ti = typer.ast.func(f).ti;
    typer.run(ret_ti)?;

    // type-inst variables must be used consistently between array and
    // non-array positions, and return-type variables must be bound by
    // the parameters
    let mut ti_map: HashMap<String, TiVarPosition> = HashMap::new();
    let params = typer.ast.func(f).params.clone();
    let mut all_params_par = true;
    for &p in &params {
        all_params_par = all_params_par && param_type(typer.ast, p).is_par();
        let p_ti = typer.ast.decl(p).ti;
        collect_ti_vars(typer, p_ti, &mut ti_map, true);
    }
    check_return_ti_vars(typer, ret_ti, &ti_map);

    let body = typer.ast.func(f).body;
    if let Some(body) = body {
        typer.run(body)?;
        let bt = typer.ast.ty(body);
        let declared = typer.ast.ty(ret_ti);
        if !typer.env.is_subtype(bt, declared, true) && !typer.has_ti_variable(ret_ti) {
            typer.errors.push(TypeError::new(
                ErrorKind::TypeMismatch,
                typer.ast.span(body),
                format!(
                    "return type of function does not match body, declared type is `{}', \
                     body type is `{}'",
                    typer.env.type_str(typer.ast, declared),
                    typer.env.type_str(typer.ast, bt)
                ),
            ));
        }
        // a par body under all-par parameters overrides a var return
        if bt.is_par() && all_params_par && declared.is_var() {
            let demoted = declared.with_inst(Inst::Par);
            typer.ast.set_ty(ret_ti, demoted);
        }
        let target = typer.ast.ty(ret_ti);
        if !typer.has_ti_variable(ret_ti) {
            let coerced = add_coercion(typer.ast, typer.env, typer.registry, body, target)?;
            typer.ast.func_mut(f).body = Some(coerced);
        }
    }
    Ok(())
}

/// Record every type-inst variable of a signature type-inst, reporting
/// array/non-array conflicts.
fn collect_ti_vars(
    typer: &mut Typer<'_>,
    ti: ExprId,
    ti_map: &mut HashMap<String, TiVarPosition>,
    declare: bool,
) {
    let ExprKind::TypeInst { ranges, domain, .. } = typer.ast.expr(ti).kind.clone() else {
        return;
    };
    let mut record = |typer: &mut Typer<'_>, name: String, is_enum: bool, pos: TiVarPosition, span| {
        if is_enum {
            ti_map.entry(name).or_insert(pos);
            return;
        }
        match ti_map.get(&name) {
            None => {
                if declare {
                    ti_map.insert(name, pos);
                }
            }
            Some(existing) => {
                if *existing != pos {
                    typer.errors.push(TypeError::new(
                        ErrorKind::TypeMismatch,
                        span,
                        format!(
                            "type-inst variable ${} used in both array and non-array position",
                            name
                        ),
                    ));
                }
            }
        }
    };
    for r in ranges {
        if let ExprKind::TypeInst {
            domain: Some(d), ..
        } = typer.ast.expr(r).kind
        {
            if let ExprKind::TiId { name, is_enum } = typer.ast.expr(d).kind.clone() {
                let span = typer.ast.span(d);
                record(typer, name, is_enum, TiVarPosition::Index, span);
            }
        } else if let ExprKind::TiId { name, is_enum } = typer.ast.expr(r).kind.clone() {
            let span = typer.ast.span(r);
            record(typer, name, is_enum, TiVarPosition::Index, span);
        }
    }
    if let Some(d) = domain {
        if let ExprKind::TiId { name, is_enum } = typer.ast.expr(d).kind.clone() {
            let span = typer.ast.span(d);
            record(typer, name, is_enum, TiVarPosition::Domain, span);
        }
    }
}

/// Return-type type-inst variables must be defined by the parameters and
/// agree on their position.
fn check_return_ti_vars(
    typer: &mut Typer<'_>,
    ret_ti: ExprId,
    ti_map: &HashMap<String, TiVarPosition>,
) {
    let ExprKind::TypeInst { ranges, domain, .. } = typer.ast.expr(ret_ti).kind.clone() else {
        return;
    };
    let mut check = |typer: &mut Typer<'_>, name: &str, is_enum: bool, pos: TiVarPosition, span| {
        match ti_map.get(name) {
            None => typer.errors.push(TypeError::new(
                ErrorKind::TypeMismatch,
                span,
                format!(
                    "type-inst variable ${} used in return type but not defined in argument \
                     list",
                    name
                ),
            )),
            Some(existing) => {
                if !is_enum && *existing != pos {
                    typer.errors.push(TypeError::new(
                        ErrorKind::TypeMismatch,
                        span,
                        format!(
                            "type-inst variable ${} used in both array and non-array position",
                            name
                        ),
                    ));
                }
            }
        }
    };
    for r in ranges {
        let node = if let ExprKind::TypeInst {
            domain: Some(d), ..
        } = typer.ast.expr(r).kind
        {
            d
        } else {
            r
        };
        if let ExprKind::TiId { name, is_enum } = typer.ast.expr(node).kind.clone() {
            let span = typer.ast.span(node);
            check(typer, &name, is_enum, TiVarPosition::Index, span);
        }
    }
    if let Some(d) = domain {
        if let ExprKind::TiId { name, is_enum } = typer.ast.expr(d).kind.clone() {
            let span = typer.ast.span(d);
            check(typer, &name, is_enum, TiVarPosition::Domain, span);
        }
    }
}

/// Create par versions of var functions whose bodies are par-computable.
///
/// A candidate is confirmed when its body reads no toplevel vars, every
/// `let` binding has a right-hand side, and every called function has a
/// usable par version (possibly another candidate); the set converges by
/// repeatedly dropping candidates with unsatisfiable dependencies. No
/// enum elaboration runs during this step.
fn par_specialise(
    ast: &mut Ast,
    model: &mut Model,
    env: &mut Env,
    registry: &mut FunctionRegistry,
    errors: &mut Vec<TypeError>,
    b: &Builtins,
) -> TypeResult<()> {
    // candidate → (already usable, dependencies)
    let mut fns_to_make_par: HashMap<FunId, (bool, Vec<FunId>)> = HashMap::new();
    let all_funs: Vec<FunId> = registry.all().collect();
    for &f in &all_funs {
        if ast.func(f).name == "mzn_reverse_map_var" {
            continue;
        }
        if ast.func(f).body.is_none() {
            continue;
        }
        if ast.ty(ast.func(f).ti).bt == BaseType::Ann {
            continue;
        }
        let params = ast.func(f).params.clone();
        let found_var = params.iter().any(|&p| param_type(ast, p).is_var());
        if !found_var {
            continue;
        }
        let tv: Vec<Type> = params
            .iter()
            .map(|&p| param_type(ast, p).with_inst(Inst::Par).with_cv(false))
            .collect();
        let name = ast.func(f).name.clone();
        let fi_par = registry.match_fn(ast, env, &name, &tv, false);
        let par_usable = fi_par.is_some_and(|fp| {
            ast.func(fp)
                .params
                .iter()
                .all(|&p| param_type(ast, p).is_par())
        });
        if par_usable {
            fns_to_make_par.insert(fi_par.unwrap(), (true, Vec::new()));
            continue;
        }
        // is the body par-computable?
        let body = ast.func(f).body.unwrap();
        let mut is_par = true;
        let mut deps: Vec<FunId> = Vec::new();
        ast.walk(body, &mut |ast, e| {
            if !is_par {
                return;
            }
            match &ast.expr(e).kind {
                ExprKind::Id { decl: Some(d), .. } => {
                    if ast.decl(*d).toplevel && ast.decl(*d).ty.is_var() {
                        is_par = false;
                    }
                }
                ExprKind::Let { items, .. } => {
                    for item in items {
                        if let zinc_ast::LetItem::Decl(d) = item {
                            if ast.decl(*d).init.is_none() {
                                is_par = false;
                            }
                        }
                    }
                }
                ExprKind::Call {
                    decl: Some(cd), ..
                } => {
                    if ast.ty(e).bt != BaseType::Ann {
                        deps.push(*cd);
                    }
                }
                _ => {}
            }
        });
        if !is_par {
            continue;
        }
        // resolve call dependencies to their par versions
        let mut par_deps = Vec::new();
        let mut usable = true;
        for dep in deps {
            let dep_params = ast.func(dep).params.clone();
            let tv: Vec<Type> = dep_params
                .iter()
                .map(|&p| param_type(ast, p).with_inst(Inst::Par).with_cv(false))
                .collect();
            let dep_name = ast.func(dep).name.clone();
            let Some(dep_par) = registry.match_fn(ast, env, &dep_name, &tv, false) else {
                usable = false;
                break;
            };
            let ret_par = ast.ty(ast.func(dep_par).ti).is_par();
            let stdlib_builtin = ast.func(dep_par).body.is_none() && ast.func(dep_par).from_stdlib;
            let all_par = ast
                .func(dep_par)
                .params
                .iter()
                .all(|&p| param_type(ast, p).is_par());
            if ret_par && (stdlib_builtin || all_par) {
                continue;
            }
            par_deps.push(dep_par);
        }
        if usable {
            fns_to_make_par.insert(f, (false, par_deps));
        }
    }

    // drop candidates whose dependencies cannot be made par
    loop {
        let to_remove: Vec<FunId> = fns_to_make_par
            .iter()
            .filter(|(_, (_, deps))| deps.iter().any(|d| !fns_to_make_par.contains_key(d)))
            .map(|(&f, _)| f)
            .collect();
        if to_remove.is_empty() {
            break;
        }
        for f in to_remove {
            fns_to_make_par.remove(&f);
        }
    }

    // clone, re-type and register the confirmed candidates
    let mut par_functions: Vec<FunId> = Vec::new();
    let mut candidates: Vec<FunId> = fns_to_make_par
        .iter()
        .filter(|(_, (usable, _))| !usable)
        .map(|(&f, _)| f)
        .collect();
    candidates.sort_by_key(|f| f.0);
    for f in candidates {
        let mut map = HashMap::new();
        let params: Vec<DeclId> = ast
            .func(f)
            .params
            .clone()
            .into_iter()
            .map(|p| ast.copy_decl(p, &mut map))
            .collect();
        for &p in &params {
            let pt = param_type(ast, p).with_inst(Inst::Par).with_cv(false);
            ast.decl_mut(p).ty = pt;
            let ti = ast.decl(p).ti;
            ast.set_ty(ti, pt);
        }
        let body = ast.func(f).body.unwrap();
        let new_body = ast.copy_expr(body, &mut map);
        let ret = ast.ty(ast.func(f).ti).with_inst(Inst::Par);
        let ret_ti = ast.type_inst(ret);
        let name = ast.func(f).name.clone();
        let span = ast.func(f).span;
        let mut nf = FunctionDecl::new(name, ret_ti, params, Some(new_body), span);
        nf.ann = ast.func(f).ann.clone();
        let nf = ast.add_func(nf);
        if registry.register_if_new(ast, nf) {
            model.push(ItemKind::Function(nf), Span::introduced());
            par_functions.push(nf);
        }
    }

    // make the cloned bodies par and re-type them
    for &p in &par_functions {
        let body = ast.func(p).body.unwrap();
        make_par(ast, env, registry, body);
        let mut typer = Typer {
            ast: &mut *ast,
            env: &mut *env,
            registry: &*registry,
            errors: &mut *errors,
            full: false,
            empty_annotation: Some(b.empty_annotation),
        };
        let r = typer.run(body);
        note_or_fail(typer.errors, r)?;
    }
    Ok(())
}

/// Demote every expression of a cloned body to par and re-resolve its
/// calls and operators against the par overloads.
fn make_par(ast: &mut Ast, env: &Env, registry: &FunctionRegistry, root: ExprId) {
    let mut nodes = Vec::new();
    ast.walk(root, &mut |_, e| nodes.push(e));
    for &e in &nodes {
        let t = ast.ty(e).with_inst(Inst::Par).with_cv(false);
        ast.set_ty(e, t);
    }
    // bottom-up: children appear after parents in the pre-order list
    for &e in nodes.iter().rev() {
        match ast.expr(e).kind.clone() {
            ExprKind::Call { name, args, .. } => {
                let tys: Vec<Type> = args.iter().map(|a| ast.ty(*a)).collect();
                if let Some(decl) = registry.match_fn(ast, env, &name, &tys, false) {
                    if let ExprKind::Call { decl: slot, .. } = &mut ast.expr_mut(e).kind {
                        *slot = Some(decl);
                    }
                }
            }
            ExprKind::BinOp {
                op,
                lhs,
                rhs,
                decl: Some(_),
            } => {
                let tys = [ast.ty(lhs), ast.ty(rhs)];
                if let Some(decl) = registry.match_fn(ast, env, op.op_name(), &tys, false) {
                    if let ExprKind::BinOp { decl: slot, .. } = &mut ast.expr_mut(e).kind {
                        *slot = Some(decl);
                    }
                }
            }
            ExprKind::UnOp {
                op,
                expr,
                decl: Some(_),
            } => {
                let tys = [ast.ty(expr)];
                if let Some(decl) = registry.match_fn(ast, env, op.op_name(), &tys, false) {
                    if let ExprKind::UnOp { decl: slot, .. } = &mut ast.expr_mut(e).kind {
                        *slot = Some(decl);
                    }
                }
            }
            _ => {}
        }
    }
}

/// Cross-check variables a checker model requires: they must exist and
/// be subtypes of the checker-declared types; enum-typed checker
/// variables receive the `mzn_check_enum_var` annotation.
fn check_checker_vars(
    ast: &mut Ast,
    env: &mut Env,
    registry: &FunctionRegistry,
    ts: &TopoSorter,
    errors: &mut Vec<TypeError>,
    b: &Builtins,
) {
    for vd_k in env.check_vars.clone() {
        let name = ast.decl(vd_k).name.clone();
        let span = ast.decl(vd_k).span;
        let vd = match ts.get(ast, &name, span) {
            Ok(vd) => vd,
            Err(e) => {
                if ast.decl(vd_k).ty.is_var() {
                    continue; // var can be undefined
                }
                errors.push(TypeError::new(
                    ErrorKind::CheckerMismatch,
                    e.span,
                    format!("{} (required by solution checker model)", e.message),
                ));
                continue;
            }
        };
        let check_ann = ast.ident_for(b.mzn_check_var);
        ast.decl_mut(vd).ann.push(check_ann);
        let vd_ty = ast.decl(vd).ty;
        if vd_ty.enum_id != 0 {
            let enum_ids = if vd_ty.dim > 0 {
                env.array_enum_ids(vd_ty)
            } else {
                vec![vd_ty.enum_id]
            };
            let elems: Vec<ExprId> = enum_ids
                .iter()
                .map(|&eid| match env.get_enum(eid) {
                    Some(d) => {
                        let id = ast.ident_for(d);
                        ast.set_ty(id, Type::par_set_enum(eid));
                        id
                    }
                    None => {
                        let s = ast.set_lit(vec![]);
                        ast.set_ty(s, Type::par_set_int().with_bt(BaseType::Bot));
                        s
                    }
                })
                .collect();
            let al = ast.array_lit(elems);
            ast.set_ty(al, Type::par_set_int().with_dim(1));
            let check_enum = ast.call("mzn_check_enum_var", vec![al]);
            ast.set_ty(check_enum, Type::ann());
            let tys = [ast.ty(al)];
            if let Some(fi) = registry.match_fn(ast, env, "mzn_check_enum_var", &tys, false) {
                if let ExprKind::Call { decl, .. } = &mut ast.expr_mut(check_enum).kind {
                    *decl = Some(fi);
                }
            }
            ast.decl_mut(vd).ann.push(check_enum);
        }
        let vdk_ty = ast.decl(vd_k).ty;
        if !env.is_subtype(vdk_ty, ast.decl(vd).ty, false) {
            let required = vdk_ty.with_inst(Inst::Var);
            errors.push(TypeError::new(
                ErrorKind::CheckerMismatch,
                ast.decl(vd).span,
                format!(
                    "Solution checker requires `{}' to be of type `{}'",
                    ast.decl(vd).name,
                    env.type_str(ast, required)
                ),
            ));
        }
    }
}
