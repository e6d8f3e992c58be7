//! End-to-end analyser scenarios.
//!
//! Models are built through the arena builders the way the parser would
//! hand them over, then run through the full driver.

use zinc_ast::{
    Ast, BinOpKind, DeclId, ExprId, ExprKind, Generator, ItemKind, Model, SolveGoal, Span, Type,
    VarDecl,
};
use zinc_typeck::error::ErrorKind;
use zinc_typeck::{typecheck, Env, TypecheckOptions, Typechecked};

/// A model under construction.
struct ModelBuilder {
    ast: Ast,
    model: Model,
    env: Env,
}

impl ModelBuilder {
    fn new() -> Self {
        ModelBuilder {
            ast: Ast::new(),
            model: Model::new(),
            env: Env::new(),
        }
    }

    fn var_decl(&mut self, name: &str, ty: Type, init: Option<ExprId>) -> DeclId {
        let ti = self.ast.type_inst(ty);
        let d = self
            .ast
            .add_decl(VarDecl::new(name, ti, init, Span::new(0, 0, 1, 1)));
        self.model
            .push(ItemKind::VarDeclItem(d), Span::new(0, 0, 1, 1));
        d
    }

    fn enum_decl(&mut self, name: &str, rhs: Option<ExprId>) -> DeclId {
        let ti = self.ast.alloc_typed(
            ExprKind::TypeInst {
                ranges: Vec::new(),
                domain: None,
                is_enum: true,
            },
            Type::par_set_int(),
            Span::introduced(),
        );
        let d = self
            .ast
            .add_decl(VarDecl::new(name, ti, rhs, Span::new(0, 0, 1, 1)));
        self.model
            .push(ItemKind::VarDeclItem(d), Span::new(0, 0, 1, 1));
        d
    }

    fn constraint(&mut self, e: ExprId) {
        self.model.push(ItemKind::Constraint(e), Span::new(0, 0, 1, 1));
    }

    fn range(&mut self, lo: i64, hi: i64) -> ExprId {
        let lo = self.ast.int_lit(lo);
        let hi = self.ast.int_lit(hi);
        self.ast.binop(BinOpKind::DotDot, lo, hi)
    }

    /// Run the driver, expecting no fatal error.
    fn check(mut self) -> (Ast, Model, Env, Typechecked) {
        let result = typecheck(
            &mut self.ast,
            &mut self.model,
            &mut self.env,
            &TypecheckOptions::default(),
        )
        .expect("fatal type error");
        (self.ast, self.model, self.env, result)
    }

    fn check_options(
        mut self,
        options: TypecheckOptions,
    ) -> (Ast, Model, Env, Typechecked) {
        let result = typecheck(&mut self.ast, &mut self.model, &mut self.env, &options)
            .expect("fatal type error");
        (self.ast, self.model, self.env, result)
    }
}

/// Find a toplevel declaration by name.
fn decl_named(ast: &Ast, model: &Model, name: &str) -> Option<DeclId> {
    model
        .decl_items()
        .into_iter()
        .find(|d| ast.decl(*d).name == name)
}

/// Every expression reachable from the live items.
fn decl_roots(ast: &Ast, roots: &mut Vec<ExprId>, d: DeclId) {
    roots.push(ast.decl(d).ti);
    if let Some(e) = ast.decl(d).init {
        roots.push(e);
    }
    roots.extend(ast.decl(d).ann.iter().copied());
}

fn reachable_exprs(ast: &Ast, model: &Model) -> Vec<ExprId> {
    let mut roots: Vec<ExprId> = Vec::new();
    for item in model.live_items() {
        match &item.kind {
            ItemKind::VarDeclItem(d) => decl_roots(ast, &mut roots, *d),
            ItemKind::Constraint(e) => roots.push(*e),
            ItemKind::Solve { expr, ann, .. } => {
                roots.extend(expr.iter().copied());
                roots.extend(ann.iter().copied());
            }
            ItemKind::Output { expr, ann } => {
                roots.push(*expr);
                roots.extend(ann.iter().copied());
            }
            ItemKind::Function(f) => {
                roots.push(ast.func(*f).ti);
                for &p in &ast.func(*f).params {
                    roots.push(ast.decl(p).ti);
                }
                if let Some(b) = ast.func(*f).body {
                    roots.push(b);
                }
            }
            ItemKind::Assign { expr, .. } => roots.push(*expr),
            ItemKind::Include { .. } => {}
        }
    }
    let mut all = Vec::new();
    for r in roots {
        ast.walk(r, &mut |_, e| all.push(e));
    }
    all
}

// --- scenario 1: simple coercion -----------------------------------------

#[test]
fn coercion_wraps_bool_initialiser() {
    // var bool: b; var int: x = b;
    let mut m = ModelBuilder::new();
    let b = m.var_decl("b", Type::var_bool(), None);
    let b_ref = m.ast.ident_for(b);
    let x = m.var_decl("x", Type::var_int(), Some(b_ref));

    let (ast, _, _, result) = m.check();
    assert!(result.errors.is_empty(), "{:?}", result.errors);
    assert_eq!(ast.decl(b).ty, Type::var_bool());
    assert_eq!(ast.decl(x).ty, Type::var_int());
    let init = ast.decl(x).init.unwrap();
    let ExprKind::Call { name, decl, .. } = &ast.expr(init).kind else {
        panic!("expected coercion call, got {:?}", ast.expr(init).kind);
    };
    assert_eq!(name, "bool2int");
    assert!(decl.is_some());
    assert_eq!(ast.ty(init), Type::var_int());
}

// --- scenario 2: enum elaboration ----------------------------------------

#[test]
fn enum_elaboration_produces_family() {
    // enum E = {A, B, C};
    let mut m = ModelBuilder::new();
    let a = m.ast.ident("A");
    let b = m.ast.ident("B");
    let c = m.ast.ident("C");
    let rhs = m.ast.set_lit(vec![a, b, c]);
    let e = m.enum_decl("E", Some(rhs));

    let (ast, model, env, result) = m.check();
    assert!(result.errors.is_empty(), "{:?}", result.errors);

    // member constants bound to to_enum(E, k)
    for member in ["A", "B", "C"] {
        let d = decl_named(&ast, &model, member).expect(member);
        assert_ne!(ast.decl(d).ty.enum_id, 0);
        assert!(ast.decl(d).ty.is_int());
        let init = ast.decl(d).init.unwrap();
        let ExprKind::Call { name, args, decl } = &ast.expr(init).kind else {
            panic!("expected to_enum initialiser");
        };
        assert_eq!(name, "to_enum");
        assert!(decl.is_some());
        assert!(ast.ty(args[1]).is_int());
        assert!(env.reverse_enum.contains_key(member));
    }

    // the spelling array
    let strings = decl_named(&ast, &model, "_enum_to_string_0_E").unwrap();
    let arr = ast.decl(strings).init.unwrap();
    let ExprKind::ArrayLit { elems, .. } = &ast.expr(arr).kind else {
        panic!("expected spelling array");
    };
    let spellings: Vec<&str> = elems
        .iter()
        .map(|e| match &ast.expr(*e).kind {
            ExprKind::StringLit(s) => s.as_str(),
            _ => panic!("expected string literal"),
        })
        .collect();
    assert_eq!(spellings, vec!["A", "B", "C"]);

    // the to-string dispatch family exists
    assert!(result.registry.fn_exists("_toString_E"));
    assert!(result.registry.overloads("_toString_E").len() >= 4);

    // the right-hand side was rewritten to 1..<cardinality>
    let new_rhs = ast.decl(e).init.unwrap();
    let ExprKind::BinOp {
        op: BinOpKind::DotDot,
        lhs,
        ..
    } = ast.expr(new_rhs).kind
    else {
        panic!("expected range right-hand side");
    };
    assert!(matches!(ast.expr(lhs).kind, ExprKind::IntLit(1)));

    // the enum flag was demoted after elaboration
    let ExprKind::TypeInst { is_enum, .. } = ast.expr(ast.decl(e).ti).kind else {
        panic!("expected type-inst");
    };
    assert!(!is_enum);
    assert_eq!(ast.ty(ast.decl(e).ti).enum_id, 0);
    // ... but the declaration keeps its tag
    assert_ne!(ast.decl(e).ty.enum_id, 0);
}

// --- scenario 3: constructor enum ----------------------------------------

#[test]
fn constructor_enum_produces_overloads_and_assertion() {
    // set of int: H = 1..3; enum F = enumFromConstructors([{Z}, G(H)]);
    let mut m = ModelBuilder::new();
    let h_rhs = m.range(1, 3);
    let h = m.var_decl("H", Type::par_set_int(), Some(h_rhs));

    let z = m.ast.ident("Z");
    let part0 = m.ast.set_lit(vec![z]);
    let h_ref = m.ast.ident_for(h);
    let part1 = m.ast.call("G", vec![h_ref]);
    let parts = m.ast.array_lit(vec![part0, part1]);
    let rhs = m.ast.call("enumFromConstructors", vec![parts]);
    let f = m.enum_decl("F", Some(rhs));

    let (ast, model, _, result) = m.check();
    assert!(result.errors.is_empty(), "{:?}", result.errors);

    // six constructor overloads, six inverses
    assert_eq!(result.registry.overloads("G").len(), 6);
    assert_eq!(result.registry.overloads("G⁻¹").len(), 6);

    // G(1) would have enum type F: the scalar par overload returns F
    let f_enum = ast.decl(f).ty.enum_id;
    assert_ne!(f_enum, 0);
    let g_par = result.registry.overloads("G")[0];
    assert_eq!(ast.ty(ast.func(g_par).ti).enum_id, f_enum);

    // a contiguity assertion was emitted
    let has_assert = model.live_items().any(|item| {
        matches!(
            &item.kind,
            ItemKind::Constraint(e)
                if matches!(&ast.expr(*e).kind, ExprKind::Call { name, .. } if name == "assert")
        )
    });
    assert!(has_assert, "missing contiguity assertion");

    // F = 1 .. (1 + card(H)): upper bound is a sum ending in card
    let new_rhs = ast.decl(f).init.unwrap();
    let ExprKind::BinOp {
        op: BinOpKind::DotDot,
        rhs: upper,
        ..
    } = ast.expr(new_rhs).kind
    else {
        panic!("expected range right-hand side");
    };
    let ExprKind::BinOp {
        op: BinOpKind::Plus,
        rhs: card,
        ..
    } = ast.expr(upper).kind
    else {
        panic!("expected prev + card(H) upper bound");
    };
    assert!(matches!(
        &ast.expr(card).kind,
        ExprKind::Call { name, .. } if name == "card"
    ));

    // constructor round-trip structure: G adds the offset, G⁻¹ subtracts it
    let g_body = ast.func(g_par).body.unwrap();
    let ExprKind::Call { name, args, .. } = &ast.expr(g_body).kind else {
        panic!("expected to_enum body");
    };
    assert_eq!(name, "to_enum");
    assert!(matches!(
        ast.expr(args[1]).kind,
        ExprKind::BinOp {
            op: BinOpKind::Plus,
            ..
        }
    ));
    let ginv_par = result.registry.overloads("G⁻¹")[0];
    let ginv_body = ast.func(ginv_par).body.unwrap();
    let ExprKind::Call { name, args, .. } = &ast.expr(ginv_body).kind else {
        panic!("expected to_enum body");
    };
    assert_eq!(name, "to_enum");
    assert!(matches!(
        ast.expr(args[1]).kind,
        ExprKind::BinOp {
            op: BinOpKind::Minus,
            ..
        }
    ));

    // H needed a generic to-string
    assert!(result.registry.fn_exists("_toString_H"));
}

// --- scenario 4: circularity ----------------------------------------------

#[test]
fn circular_definition_is_fatal() {
    // int: x = y + 1; int: y = x + 1;
    let mut m = ModelBuilder::new();
    let one = m.ast.int_lit(1);
    let y_ref = m.ast.ident("y");
    let x_init = m.ast.binop(BinOpKind::Plus, y_ref, one);
    m.var_decl("x", Type::par_int(), Some(x_init));
    let one = m.ast.int_lit(1);
    let x_ref = m.ast.ident("x");
    let y_init = m.ast.binop(BinOpKind::Plus, x_ref, one);
    m.var_decl("y", Type::par_int(), Some(y_init));

    let err = typecheck(
        &mut m.ast,
        &mut m.model,
        &mut m.env,
        &TypecheckOptions::default(),
    )
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::CircularDefinition);
}

// --- scenario 5: shadowing warning ----------------------------------------

#[test]
fn let_shadowing_warns_and_binds_inner() {
    // int: x = 1; constraint let { int: x = 2 } in x = x;
    let mut m = ModelBuilder::new();
    let one = m.ast.int_lit(1);
    m.var_decl("x", Type::par_int(), Some(one));

    let two = m.ast.int_lit(2);
    let inner_ti = m.ast.type_inst(Type::par_int());
    let inner = m.ast.add_decl(
        VarDecl::new("x", inner_ti, Some(two), Span::new(0, 20, 30, 2)).non_toplevel(),
    );
    let lhs = m.ast.ident("x");
    let rhs = m.ast.ident("x");
    let eq = m.ast.binop(BinOpKind::Eq, lhs, rhs);
    let body = m
        .ast
        .let_in(vec![zinc_ast::LetItem::Decl(inner)], eq);
    m.constraint(body);

    let (ast, _, env, result) = m.check();
    assert!(result.errors.is_empty(), "{:?}", result.errors);
    assert_eq!(env.warnings.len(), 1);
    assert!(env.warnings[0].message.contains("shadows"));

    // both occurrences inside the let body bind to the inner declaration
    for id in [lhs, rhs] {
        let ExprKind::Id { decl, .. } = ast.expr(id).kind else {
            panic!("expected id");
        };
        assert_eq!(decl, Some(inner));
    }
}

// --- scenario 6: count rewrite ---------------------------------------------

#[test]
fn sum_comparison_rewrites_to_count() {
    // array[1..5] of var int: a; var int: n;
    // constraint sum(i in 1..5)(a[i] = 3) >= n;
    let mut m = ModelBuilder::new();
    let idx_set = m.range(1, 5);
    let range_ti = m.ast.type_inst_domain(Type::unknown(), idx_set);
    let arr_ti = m
        .ast
        .type_inst_ranges(Type::var_int().with_dim(1), vec![range_ti], None);
    let a = m
        .ast
        .add_decl(VarDecl::new("a", arr_ti, None, Span::new(0, 0, 1, 1)));
    m.model
        .push(ItemKind::VarDeclItem(a), Span::new(0, 0, 1, 1));
    let n = m.var_decl("n", Type::var_int(), None);

    let i_ti = m.ast.type_inst(Type::par_int());
    let i = m
        .ast
        .add_decl(VarDecl::new("i", i_ti, None, Span::introduced()).non_toplevel());
    let a_ref = m.ast.ident_for(a);
    let i_ref = m.ast.ident_for(i);
    let access = m.ast.array_access(a_ref, vec![i_ref]);
    let three = m.ast.int_lit(3);
    let eq = m.ast.binop(BinOpKind::Eq, access, three);
    let gen_in = m.range(1, 5);
    let comp = m.ast.comprehension(
        vec![Generator {
            decls: vec![i],
            in_expr: Some(gen_in),
            where_expr: None,
        }],
        eq,
        false,
    );
    let sum = m.ast.call("sum", vec![comp]);
    let n_ref = m.ast.ident_for(n);
    let cmp = m.ast.binop(BinOpKind::Geq, sum, n_ref);
    m.constraint(cmp);

    let (ast, _, _, result) = m.check();
    assert!(result.errors.is_empty(), "{:?}", result.errors);
    let ExprKind::Call { name, args, decl } = &ast.expr(cmp).kind else {
        panic!("expected rewritten call, got {:?}", ast.expr(cmp).kind);
    };
    assert_eq!(name, "count_geq");
    assert!(decl.is_some());
    assert_eq!(args.len(), 3);
    // the comprehension now yields the counted expression
    let ExprKind::Comprehension { body, .. } = &ast.expr(args[0]).kind else {
        panic!("expected comprehension argument");
    };
    assert!(matches!(
        ast.expr(*body).kind,
        ExprKind::ArrayAccess { .. }
    ));
    assert!(matches!(ast.expr(args[1]).kind, ExprKind::IntLit(3)));
}

// --- quantified properties --------------------------------------------------

#[test]
fn type_totality_and_identifier_binding() {
    let mut m = ModelBuilder::new();
    let a = m.ast.ident("A");
    let b = m.ast.ident("B");
    let rhs = m.ast.set_lit(vec![a, b]);
    m.enum_decl("E", Some(rhs));
    let one = m.ast.int_lit(1);
    let x = m.var_decl("x", Type::par_int(), Some(one));
    let x_ref = m.ast.ident_for(x);
    let two = m.ast.int_lit(2);
    let cmp = m.ast.binop(BinOpKind::Le, x_ref, two);
    m.constraint(cmp);

    let (ast, model, _, result) = m.check();
    assert!(result.errors.is_empty(), "{:?}", result.errors);
    for e in reachable_exprs(&ast, &model) {
        assert!(
            !ast.ty(e).is_unknown(),
            "untyped expression: {:?}",
            ast.expr(e).kind
        );
        if let ExprKind::Id { name, decl } = &ast.expr(e).kind {
            let d = decl.expect("unbound identifier");
            assert_eq!(&ast.decl(d).name, name);
        }
        if let ExprKind::Call { name, decl, .. } = &ast.expr(e).kind {
            assert!(decl.is_some(), "unbound call `{}'", name);
        }
    }
}

#[test]
fn topological_order_definition_before_use() {
    // int: x = y; int: y = 1;
    let mut m = ModelBuilder::new();
    let y_ref = m.ast.ident("y");
    let x = m.var_decl("x", Type::par_int(), Some(y_ref));
    let one = m.ast.int_lit(1);
    let y = m.var_decl("y", Type::par_int(), Some(one));

    let (ast, model, _, result) = m.check();
    assert!(result.errors.is_empty());
    let pos_x = result.decl_order.iter().position(|d| *d == x).unwrap();
    let pos_y = result.decl_order.iter().position(|d| *d == y).unwrap();
    assert!(pos_y < pos_x);

    // the item list was reordered accordingly
    let decls = model.decl_items();
    let item_x = decls.iter().position(|d| *d == x).unwrap();
    let item_y = decls.iter().position(|d| *d == y).unwrap();
    assert!(item_y < item_x);
}

#[test]
fn coercion_soundness() {
    // every inserted numeric coercion widens along the lattice
    let mut m = ModelBuilder::new();
    let b = m.var_decl("b", Type::var_bool(), None);
    let b_ref = m.ast.ident_for(b);
    m.var_decl("x", Type::var_int(), Some(b_ref));
    let i = m.var_decl("i", Type::par_int(), None);
    let i_ref = m.ast.ident_for(i);
    m.var_decl("f", Type::par_float(), Some(i_ref));

    let (ast, model, env, result) = m.check_options(TypecheckOptions {
        ignore_undefined_parameters: true,
        ..TypecheckOptions::default()
    });
    assert!(result.errors.is_empty(), "{:?}", result.errors);
    for e in reachable_exprs(&ast, &model) {
        if let ExprKind::Call { name, args, .. } = &ast.expr(e).kind {
            if matches!(name.as_str(), "bool2int" | "bool2float" | "int2float") {
                let arg_t = ast.ty(args[0]);
                let out_t = ast.ty(e);
                assert!(
                    env.is_subtype(arg_t, out_t, false),
                    "unsound coercion {} from {:?}",
                    name,
                    arg_t
                );
            }
        }
    }
}

#[test]
fn missing_parameter_reported_unless_ignored() {
    let mut m = ModelBuilder::new();
    m.var_decl("p", Type::par_int(), None);
    let (_, _, _, result) = m.check();
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].kind, ErrorKind::MissingParameter);

    let mut m = ModelBuilder::new();
    m.var_decl("p", Type::par_int(), None);
    let (_, _, _, result) = m.check_options(TypecheckOptions {
        ignore_undefined_parameters: true,
        ..TypecheckOptions::default()
    });
    assert!(result.errors.is_empty());
}

#[test]
fn opt_parameter_defaults_to_absent() {
    use zinc_ast::OptType;
    let mut m = ModelBuilder::new();
    let p = m.var_decl("p", Type::par_int().with_ot(OptType::Optional), None);
    let (ast, _, _, result) = m.check();
    assert!(result.errors.is_empty(), "{:?}", result.errors);
    let init = ast.decl(p).init.expect("absent default");
    assert!(matches!(ast.expr(init).kind, ExprKind::Absent));
    let has_marker = ast.decl(p).ann.iter().any(|&a| {
        matches!(&ast.expr(a).kind, ExprKind::Id { name, .. } if name == "mzn_was_undefined")
    });
    assert!(has_marker);
}

#[test]
fn objective_is_folded_into_declaration() {
    // var int: x; solve maximize x;
    let mut m = ModelBuilder::new();
    let x = m.var_decl("x", Type::var_int(), None);
    let x_ref = m.ast.ident_for(x);
    m.model.push(
        ItemKind::Solve {
            goal: SolveGoal::Maximize,
            expr: Some(x_ref),
            ann: Vec::new(),
        },
        Span::new(0, 0, 1, 1),
    );

    let (ast, model, _, result) = m.check();
    assert!(result.errors.is_empty(), "{:?}", result.errors);
    let obj = decl_named(&ast, &model, "_objective").expect("objective declaration");
    assert_eq!(ast.decl(obj).ty, Type::var_int());
    // the solve item now references the declaration
    let solve = model
        .live_items()
        .find_map(|i| match &i.kind {
            ItemKind::Solve { expr, .. } => *expr,
            _ => None,
        })
        .unwrap();
    let ExprKind::Id { decl, .. } = ast.expr(solve).kind else {
        panic!("expected objective reference");
    };
    assert_eq!(decl, Some(obj));
}

#[test]
fn multiple_solve_items_rejected() {
    let mut m = ModelBuilder::new();
    for _ in 0..2 {
        m.model.push(
            ItemKind::Solve {
                goal: SolveGoal::Satisfy,
                expr: None,
                ann: Vec::new(),
            },
            Span::new(0, 0, 1, 1),
        );
    }
    let (_, _, _, result) = m.check();
    assert!(result
        .errors
        .iter()
        .any(|e| e.message.contains("Only one solve item")));
}

#[test]
fn assignment_folds_into_declaration() {
    // int: p; p = 3;
    let mut m = ModelBuilder::new();
    let p = m.var_decl("p", Type::par_int(), None);
    let three = m.ast.int_lit(3);
    m.model.push(
        ItemKind::Assign {
            name: "p".to_string(),
            expr: three,
            decl: None,
        },
        Span::new(0, 0, 1, 1),
    );

    let (ast, _, _, result) = m.check();
    assert!(result.errors.is_empty(), "{:?}", result.errors);
    assert_eq!(ast.decl(p).init, Some(three));
    let has_marker = ast.decl(p).ann.iter().any(|&a| {
        matches!(&ast.expr(a).kind, ExprKind::Id { name, .. } if name == "rhs_from_assignment")
    });
    assert!(has_marker);
}

#[test]
fn second_assignment_is_an_error_unless_allowed() {
    let mut m = ModelBuilder::new();
    let one = m.ast.int_lit(1);
    m.var_decl("p", Type::par_int(), Some(one));
    let two = m.ast.int_lit(2);
    m.model.push(
        ItemKind::Assign {
            name: "p".to_string(),
            expr: two,
            decl: None,
        },
        Span::new(0, 0, 1, 1),
    );
    let (_, _, _, result) = m.check();
    assert!(result
        .errors
        .iter()
        .any(|e| e.message.contains("multiple assignment")));

    // with multi-assignment allowed, an equality constraint appears
    let mut m = ModelBuilder::new();
    let one = m.ast.int_lit(1);
    m.var_decl("p", Type::par_int(), Some(one));
    let two = m.ast.int_lit(2);
    m.model.push(
        ItemKind::Assign {
            name: "p".to_string(),
            expr: two,
            decl: None,
        },
        Span::new(0, 0, 1, 1),
    );
    let (ast, model, _, result) = m.check_options(TypecheckOptions {
        allow_multi_assignment: true,
        ..TypecheckOptions::default()
    });
    assert!(result.errors.is_empty(), "{:?}", result.errors);
    let has_eq = model.live_items().any(|i| {
        matches!(
            &i.kind,
            ItemKind::Constraint(e)
                if matches!(
                    ast.expr(*e).kind,
                    ExprKind::BinOp { op: BinOpKind::Eq, .. }
                )
        )
    });
    assert!(has_eq);
}

#[test]
fn bare_enum_completed_by_assignment() {
    // enum E; E = {A, B};
    let mut m = ModelBuilder::new();
    let e = m.enum_decl("E", None);
    let a = m.ast.ident("A");
    let b = m.ast.ident("B");
    let rhs = m.ast.set_lit(vec![a, b]);
    m.model.push(
        ItemKind::Assign {
            name: "E".to_string(),
            expr: rhs,
            decl: None,
        },
        Span::new(0, 0, 2, 1),
    );

    let (ast, model, env, result) = m.check();
    assert!(result.errors.is_empty(), "{:?}", result.errors);
    assert!(decl_named(&ast, &model, "A").is_some());
    assert!(decl_named(&ast, &model, "B").is_some());
    assert!(env.reverse_enum.contains_key("A"));
    // the folded right-hand side was rewritten to a range
    let new_rhs = ast.decl(e).init.unwrap();
    assert!(matches!(
        ast.expr(new_rhs).kind,
        ExprKind::BinOp {
            op: BinOpKind::DotDot,
            ..
        }
    ));
}

#[test]
fn output_sections_are_collected() {
    let mut m = ModelBuilder::new();
    let s = m.ast.str_lit("done");
    let text = m.ast.array_lit(vec![s]);
    let section = m.ast.str_lit("stats");
    let ann = m.ast.call("mzn_output_section", vec![section]);
    m.model.push(
        ItemKind::Output {
            expr: text,
            ann: vec![ann],
        },
        Span::new(0, 0, 1, 1),
    );
    let s2 = m.ast.str_lit("hello");
    let text2 = m.ast.array_lit(vec![s2]);
    m.model.push(
        ItemKind::Output {
            expr: text2,
            ann: Vec::new(),
        },
        Span::new(0, 0, 2, 1),
    );

    let (_, model, env, result) = m.check();
    assert!(result.errors.is_empty(), "{:?}", result.errors);
    assert!(env.output_sections.contains_key("stats"));
    assert!(env.output_sections.contains_key("default"));
    // collected output items are consumed
    assert!(!model
        .live_items()
        .any(|i| matches!(i.kind, ItemKind::Output { .. })));
}

#[test]
fn par_specialisation_clones_var_functions() {
    // function var int: double(var int: x) = x + x;
    let mut m = ModelBuilder::new();
    let ret_ti = m.ast.type_inst(Type::var_int());
    let x = m.ast.param("x", Type::var_int());
    let x1 = m.ast.ident_for(x);
    let x2 = m.ast.ident_for(x);
    let body = m.ast.binop(BinOpKind::Plus, x1, x2);
    let f = m.ast.add_func(zinc_ast::FunctionDecl::new(
        "double",
        ret_ti,
        vec![x],
        Some(body),
        Span::new(0, 0, 1, 1),
    ));
    m.model.push(ItemKind::Function(f), Span::new(0, 0, 1, 1));

    let (ast, _, _, result) = m.check();
    assert!(result.errors.is_empty(), "{:?}", result.errors);
    let overloads = result.registry.overloads("double");
    assert_eq!(overloads.len(), 2);
    let par_version = overloads
        .iter()
        .find(|&&g| {
            ast.func(g)
                .params
                .iter()
                .all(|&p| ast.decl(p).ty.is_par())
        })
        .expect("par specialisation missing");
    assert!(ast.ty(ast.func(*par_version).ti).is_par());
}

#[test]
fn par_specialisation_emits_no_enum_auxiliaries() {
    // an enum next to a specialisable function: the specialisation step
    // must not mint new enum helpers
    let mut m = ModelBuilder::new();
    let a = m.ast.ident("A");
    let rhs = m.ast.set_lit(vec![a]);
    m.enum_decl("E", Some(rhs));

    let ret_ti = m.ast.type_inst(Type::var_int());
    let x = m.ast.param("x", Type::var_int());
    let x1 = m.ast.ident_for(x);
    let one = m.ast.int_lit(1);
    let body = m.ast.binop(BinOpKind::Plus, x1, one);
    let f = m.ast.add_func(zinc_ast::FunctionDecl::new(
        "bump",
        ret_ti,
        vec![x],
        Some(body),
        Span::new(0, 0, 1, 1),
    ));
    m.model.push(ItemKind::Function(f), Span::new(0, 0, 1, 1));

    let (ast, model, _, result) = m.check();
    assert!(result.errors.is_empty(), "{:?}", result.errors);
    // exactly one spelling array and one scalar member constant for E
    let spelling_arrays = model
        .decl_items()
        .into_iter()
        .filter(|d| ast.decl(*d).name.starts_with("_enum_to_string_"))
        .count();
    assert_eq!(spelling_arrays, 1);
    // the scalar/array/set/array-of-set to-string family, nothing more
    assert_eq!(result.registry.overloads("_toString_E").len(), 4);
}

#[test]
fn deprecated_call_is_wrapped() {
    // function int: old(int: x) = x  ::mzn_deprecated("2.6", "new")
    let mut m = ModelBuilder::new();
    let ret_ti = m.ast.type_inst(Type::par_int());
    let x = m.ast.param("x", Type::par_int());
    let body = m.ast.ident_for(x);
    let mut fd =
        zinc_ast::FunctionDecl::new("old", ret_ti, vec![x], Some(body), Span::new(0, 0, 1, 1));
    let since = m.ast.str_lit("2.6");
    let repl = m.ast.str_lit("new");
    let dep = m.ast.call("mzn_deprecated", vec![since, repl]);
    fd.ann.push(dep);
    let f = m.ast.add_func(fd);
    m.model.push(ItemKind::Function(f), Span::new(0, 0, 1, 1));

    let three = m.ast.int_lit(3);
    let call = m.ast.call("old", vec![three]);
    let zero = m.ast.int_lit(0);
    let cmp = m.ast.binop(BinOpKind::Geq, call, zero);
    m.constraint(cmp);

    let (ast, _, _, result) = m.check();
    assert!(result.errors.is_empty(), "{:?}", result.errors);
    let ExprKind::Call { name, args, .. } = &ast.expr(call).kind else {
        panic!("expected call");
    };
    assert_eq!(name, "mzn_deprecate");
    assert_eq!(args.len(), 4);
}

#[test]
fn checker_variables_are_wired() {
    // main model: var int: x; checker requires var int: x
    let mut m = ModelBuilder::new();
    let x = m.var_decl("x", Type::var_int(), None);
    let check_ti = m.ast.type_inst(Type::var_int());
    let required = m
        .ast
        .add_decl(VarDecl::new("x", check_ti, None, Span::introduced()));
    m.ast.decl_mut(required).ty = Type::var_int();
    m.env.check_vars.push(required);

    let (ast, _, _, result) = m.check();
    assert!(result.errors.is_empty(), "{:?}", result.errors);
    let has_check = ast.decl(x).ann.iter().any(|&a| {
        matches!(&ast.expr(a).kind, ExprKind::Id { name, .. } if name == "mzn_check_var")
    });
    assert!(has_check);
}

#[test]
fn checker_type_mismatch_reported() {
    // main model: var bool: x; checker requires var int: x with a set
    // type that int cannot satisfy
    let mut m = ModelBuilder::new();
    m.var_decl("x", Type::var_bool(), None);
    let check_ti = m.ast.type_inst(Type::var_set_int());
    let required = m
        .ast
        .add_decl(VarDecl::new("x", check_ti, None, Span::introduced()));
    m.ast.decl_mut(required).ty = Type::var_set_int();
    m.env.check_vars.push(required);

    let (_, _, _, result) = m.check();
    assert!(result
        .errors
        .iter()
        .any(|e| e.kind == ErrorKind::CheckerMismatch));
}

#[test]
fn undefined_identifier_accumulates_with_hint() {
    let mut m = ModelBuilder::new();
    let one = m.ast.int_lit(1);
    m.var_decl("column", Type::par_int(), Some(one));
    let bad = m.ast.ident("colunm");
    let two = m.ast.int_lit(2);
    let cmp = m.ast.binop(BinOpKind::Le, bad, two);
    m.constraint(cmp);

    let (_, _, _, result) = m.check();
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].kind, ErrorKind::UndefinedIdentifier);
    assert!(result.errors[0].notes.iter().any(|n| n.contains("column")));
}
