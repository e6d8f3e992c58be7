//! The standard interface: builtin signatures and annotation declarations.
//!
//! Downstream stages and the analyser itself resolve against a fixed set
//! of names (`bool2int`, `to_enum`, `slice_<n>d`, `show`, the `mzn_*`
//! family, ...). In a full toolchain these come from the standard library
//! models; here they are registered programmatically before the driver
//! walks user items, as body-less signatures marked `from_stdlib`.
//!
//! Polymorphism follows the registry's conventions: a parameter declared
//! `var opt $T` binds the argument's element type wholesale (`any`),
//! while `opt $T` / explicit par/var spellings account for their own
//! flags. `$U` as the sole index range of a `dim == -1` parameter binds
//! the whole index vector.

use crate::registry::FunctionRegistry;
use zinc_ast::{
    Ast, DeclId, ExprId, FunId, FunctionDecl, Inst, Item, ItemKind, Model, OptType, SetType, Span,
    Type, VarDecl,
};

/// Handles to the builtin annotation declarations the driver attaches
/// itself (`rhs_from_assignment`, `mzn_was_undefined`, ...).
#[derive(Debug, Clone, Copy)]
pub struct Builtins {
    pub output_only: DeclId,
    pub rhs_from_assignment: DeclId,
    pub mzn_was_undefined: DeclId,
    pub mzn_check_var: DeclId,
    pub annotated_expression: DeclId,
    pub ctx_pos: DeclId,
    pub ctx_neg: DeclId,
    pub empty_annotation: DeclId,
}

struct Installer<'a> {
    ast: &'a mut Ast,
    registry: &'a mut FunctionRegistry,
    items: Vec<Item>,
}

/// The maximally permissive element type: accepts every argument and
/// binds its full element type (`any $T` semantics).
fn any_elem() -> Type {
    Type::top().with_inst(Inst::Var).with_ot(OptType::Optional)
}

impl Installer<'_> {
    fn add_fn(&mut self, name: &str, ret_ti: ExprId, params: Vec<DeclId>) -> FunId {
        let mut f = FunctionDecl::new(name, ret_ti, params, None, Span::introduced());
        f.from_stdlib = true;
        let id = self.ast.add_func(f);
        self.registry.register(self.ast, id);
        self.items
            .push(Item::new(ItemKind::Function(id), Span::introduced()));
        id
    }

    /// A monomorphic signature.
    fn simple(&mut self, name: &str, ret: Type, params: &[Type]) {
        let ti = self.ast.type_inst(ret);
        let ps = params
            .iter()
            .enumerate()
            .map(|(i, t)| self.ast.param(format!("x{}", i), *t))
            .collect();
        self.add_fn(name, ti, ps);
    }

    /// A parameter whose type-inst carries a `$T`-style domain variable.
    fn poly_param(&mut self, declared: Type, tiid: &str, is_enum: bool) -> DeclId {
        let d = self.ast.ti_id(tiid, is_enum);
        let ti = self.ast.type_inst_domain(declared, d);
        let mut vd = VarDecl::new("x", ti, None, Span::introduced());
        vd.toplevel = false;
        vd.ty = declared;
        self.ast.add_decl(vd)
    }

    /// `array[$U] of <elem as $T>` with polymorphic dimension.
    fn any_array_param(&mut self, elem: Type, elem_tiid: &str) -> DeclId {
        let u = self.ast.ti_id("U", false);
        let d = self.ast.ti_id(elem_tiid, false);
        let declared = elem.with_dim(-1);
        let ti = self.ast.type_inst_ranges(declared, vec![u], Some(d));
        let mut vd = VarDecl::new("x", ti, None, Span::introduced());
        vd.toplevel = false;
        vd.ty = declared;
        self.ast.add_decl(vd)
    }

    /// A return type-inst carrying a `$T`-style domain variable.
    fn poly_ret(&mut self, declared: Type, tiid: impl Into<String>, is_enum: bool) -> ExprId {
        let d = self.ast.ti_id(tiid.into(), is_enum);
        self.ast.type_inst_domain(declared, d)
    }

    /// `array[int] of <declared as $T>` return.
    fn array_ret(&mut self, declared: Type, tiid: &str, dim: i8) -> ExprId {
        let ranges = (0..dim)
            .map(|_| self.ast.type_inst(Type::par_int()))
            .collect();
        let d = self.ast.ti_id(tiid, false);
        self.ast
            .type_inst_ranges(declared.with_dim(dim), ranges, Some(d))
    }

    /// Annotation constant, e.g. `annotation output_only`.
    fn ann_const(&mut self, name: &str) -> DeclId {
        let ti = self.ast.type_inst(Type::ann());
        let mut vd = VarDecl::new(name, ti, None, Span::introduced());
        vd.ty = Type::ann();
        let d = self.ast.add_decl(vd);
        self.items
            .push(Item::new(ItemKind::VarDeclItem(d), Span::introduced()));
        d
    }

    fn numeric_operators(&mut self) {
        for op in ["'+'", "'-'", "'*'"] {
            self.simple(op, Type::par_int(), &[Type::par_int(), Type::par_int()]);
            self.simple(op, Type::var_int(), &[Type::var_int(), Type::var_int()]);
            self.simple(op, Type::par_float(), &[Type::par_float(), Type::par_float()]);
            self.simple(op, Type::var_float(), &[Type::var_float(), Type::var_float()]);
        }
        for op in ["'+'", "'-'"] {
            self.simple(op, Type::par_int(), &[Type::par_int()]);
            self.simple(op, Type::var_int(), &[Type::var_int()]);
            self.simple(op, Type::par_float(), &[Type::par_float()]);
            self.simple(op, Type::var_float(), &[Type::var_float()]);
        }
        self.simple("'div'", Type::par_int(), &[Type::par_int(), Type::par_int()]);
        self.simple("'div'", Type::var_int(), &[Type::var_int(), Type::var_int()]);
        self.simple("'mod'", Type::par_int(), &[Type::par_int(), Type::par_int()]);
        self.simple("'mod'", Type::var_int(), &[Type::var_int(), Type::var_int()]);
        self.simple("'/'", Type::par_float(), &[Type::par_float(), Type::par_float()]);
        self.simple("'/'", Type::var_float(), &[Type::var_float(), Type::var_float()]);
        self.simple("'^'", Type::par_int(), &[Type::par_int(), Type::par_int()]);
        self.simple("'^'", Type::par_float(), &[Type::par_float(), Type::par_float()]);
    }

    fn range_operator(&mut self) {
        // '..'($$E, $$E) -> set of $$E
        let a = self.poly_param(Type::par_int(), "E", true);
        let b = self.poly_param(Type::par_int(), "E", true);
        let ret = self.poly_ret(Type::par_set_int(), "E", true);
        self.add_fn("'..'", ret, vec![a, b]);
        self.simple(
            "'..'",
            Type::var_set_int(),
            &[Type::var_int(), Type::var_int()],
        );
    }

    fn comparison_operators(&mut self) {
        for op in ["'='", "'!='", "'<'", "'<='", "'>'", "'>='"] {
            let a = self.poly_param(Type::top(), "T", false);
            let b = self.poly_param(Type::top(), "T", false);
            let ret = self.ast.type_inst(Type::par_bool());
            self.add_fn(op, ret, vec![a, b]);

            let a = self.poly_param(Type::top().with_inst(Inst::Var), "T", false);
            let b = self.poly_param(Type::top().with_inst(Inst::Var), "T", false);
            let ret = self.ast.type_inst(Type::var_bool());
            self.add_fn(op, ret, vec![a, b]);

            let set_t = Type::top().with_st(SetType::Set);
            let a = self.poly_param(set_t, "T", false);
            let b = self.poly_param(set_t, "T", false);
            let ret = self.ast.type_inst(Type::par_bool());
            self.add_fn(op, ret, vec![a, b]);
        }
        self.simple(
            "'='",
            Type::var_bool(),
            &[Type::var_set_int(), Type::var_set_int()],
        );
    }

    fn logic_operators(&mut self) {
        for op in ["'/\\'", "'\\/'", "'->'", "'<-'", "'<->'", "'xor'"] {
            self.simple(op, Type::par_bool(), &[Type::par_bool(), Type::par_bool()]);
            self.simple(op, Type::var_bool(), &[Type::var_bool(), Type::var_bool()]);
        }
        self.simple("'not'", Type::par_bool(), &[Type::par_bool()]);
        self.simple("'not'", Type::var_bool(), &[Type::var_bool()]);
    }

    fn set_operators(&mut self) {
        for op in ["'union'", "'diff'", "'symdiff'", "'intersect'"] {
            let set_t = Type::top().with_st(SetType::Set);
            let a = self.poly_param(set_t, "T", false);
            let b = self.poly_param(set_t, "T", false);
            let ret = self.poly_ret(set_t, "T", false);
            self.add_fn(op, ret, vec![a, b]);
            self.simple(
                op,
                Type::var_set_int(),
                &[Type::var_set_int(), Type::var_set_int()],
            );
        }
        for op in ["'subset'", "'superset'"] {
            let set_t = Type::top().with_st(SetType::Set);
            let a = self.poly_param(set_t, "T", false);
            let b = self.poly_param(set_t, "T", false);
            let ret = self.ast.type_inst(Type::par_bool());
            self.add_fn(op, ret, vec![a, b]);
            self.simple(
                op,
                Type::var_bool(),
                &[Type::var_set_int(), Type::var_set_int()],
            );
        }
        // 'in'($T, set of $T)
        let a = self.poly_param(Type::top(), "T", false);
        let b = self.poly_param(Type::top().with_st(SetType::Set), "T", false);
        let ret = self.ast.type_inst(Type::par_bool());
        self.add_fn("'in'", ret, vec![a, b]);
        self.simple(
            "'in'",
            Type::var_bool(),
            &[Type::var_int(), Type::var_set_int()],
        );
    }

    fn string_operators(&mut self) {
        self.simple(
            "'++'",
            Type::par_string(),
            &[Type::par_string(), Type::par_string()],
        );
        // array concatenation
        let a = self.any_array_param(any_elem().with_dim(1), "T");
        let b = self.any_array_param(any_elem().with_dim(1), "T");
        let ret = self.array_ret(any_elem(), "T", 1);
        self.add_fn("'++'", ret, vec![a, b]);
    }

    fn coercions(&mut self) {
        self.simple("bool2int", Type::par_int(), &[Type::par_bool()]);
        self.simple("bool2int", Type::var_int(), &[Type::var_bool()]);
        self.simple("bool2float", Type::par_float(), &[Type::par_bool()]);
        self.simple("bool2float", Type::var_float(), &[Type::var_bool()]);
        self.simple("int2float", Type::par_float(), &[Type::par_int()]);
        self.simple("int2float", Type::var_float(), &[Type::var_int()]);
        // set2array(set of $$E) -> array[int] of $$E
        let p = self.poly_param(Type::par_set_int().with_bt(zinc_ast::BaseType::Top), "E", true);
        let ranges = vec![self.ast.type_inst(Type::par_int())];
        let d = self.ast.ti_id("E", true);
        let ret = self
            .ast
            .type_inst_ranges(Type::top().with_dim(1), ranges, Some(d));
        self.add_fn("set2array", ret, vec![p]);
    }

    fn array_builtins(&mut self) {
        // array1d(array[$U] of any $T) -> array[int] of any $T
        let p = self.any_array_param(any_elem(), "T");
        let ret = self.array_ret(any_elem(), "T", 1);
        self.add_fn("array1d", ret, vec![p]);

        // index_set(array[$$U] of any $T) -> set of $$U
        let p = self.any_array_param(any_elem(), "T");
        let ret = self.poly_ret(Type::par_set_int(), "U", true);
        self.add_fn("index_set", ret, vec![p]);

        // index_set_<i>of<n> up to 3 dimensions
        for n in 2..=3i8 {
            for i in 1..=n {
                let ranges: Vec<ExprId> = (0..n)
                    .map(|k| {
                        let d = self.ast.ti_id(format!("E{}", k), true);
                        self.ast.type_inst_domain(Type::par_int(), d)
                    })
                    .collect();
                let d = self.ast.ti_id("T", false);
                let declared = any_elem().with_dim(n);
                let ti = self.ast.type_inst_ranges(declared, ranges, Some(d));
                let mut vd = VarDecl::new("x", ti, None, Span::introduced());
                vd.toplevel = false;
                vd.ty = declared;
                let p = self.ast.add_decl(vd);
                let ret = self.poly_ret(Type::par_set_int(), format!("E{}", i - 1), true);
                self.add_fn(&format!("index_set_{}of{}", i, n), ret, vec![p]);
            }
        }

        // slice_<n>d(array[$U] of any $T, array[int] of set of int, set...)
        for n in 1..=3i8 {
            let arr = self.any_array_param(any_elem(), "T");
            let mut params = vec![arr, self.ast.param("s", Type::par_set_int().with_dim(1))];
            for k in 0..n {
                params.push(self.ast.param(format!("i{}", k), Type::par_set_int()));
            }
            let ret = self.array_ret(any_elem(), "T", n);
            self.add_fn(&format!("slice_{}d", n), ret, params);
        }
    }

    fn set_builtins(&mut self) {
        // card / min / max over sets, with enum passthrough on min/max
        let p = self.poly_param(Type::par_set_int().with_bt(zinc_ast::BaseType::Top), "E", true);
        let ret = self.ast.type_inst(Type::par_int());
        self.add_fn("card", ret, vec![p]);
        self.simple("card", Type::var_int(), &[Type::var_set_int()]);
        for name in ["min", "max"] {
            let p =
                self.poly_param(Type::par_set_int().with_bt(zinc_ast::BaseType::Top), "E", true);
            let ret = self.poly_ret(Type::par_int(), "E", true);
            self.add_fn(name, ret, vec![p]);
            self.simple(name, Type::var_int(), &[Type::var_set_int()]);
            self.simple(name, Type::par_int(), &[Type::par_int().with_dim(1)]);
        }
    }

    fn option_builtins(&mut self) {
        // deopt(opt $T) -> $T, par and var
        let p = self.poly_param(Type::top().with_ot(OptType::Optional), "T", false);
        let ret = self.poly_ret(Type::top(), "T", false);
        self.add_fn("deopt", ret, vec![p]);
        let p = self.poly_param(
            Type::top().with_inst(Inst::Var).with_ot(OptType::Optional),
            "T",
            false,
        );
        let ret = self.poly_ret(Type::top().with_inst(Inst::Var), "T", false);
        self.add_fn("deopt", ret, vec![p]);

        for name in ["occurs", "absent"] {
            let p = self.poly_param(Type::top().with_ot(OptType::Optional), "T", false);
            let ret = self.ast.type_inst(Type::par_bool());
            self.add_fn(name, ret, vec![p]);
            let p = self.poly_param(
                Type::top().with_inst(Inst::Var).with_ot(OptType::Optional),
                "T",
                false,
            );
            let ret = self.ast.type_inst(Type::var_bool());
            self.add_fn(name, ret, vec![p]);
        }
    }

    fn enum_builtins(&mut self) {
        // to_enum(set of $$E, int) -> $$E, in all opt/var combinations
        let combos = [
            (Type::par_int(), Type::par_int()),
            (Type::var_int(), Type::var_int()),
            (
                Type::par_int().with_ot(OptType::Optional),
                Type::par_int().with_ot(OptType::Optional),
            ),
            (
                Type::var_int().with_ot(OptType::Optional),
                Type::var_int().with_ot(OptType::Optional),
            ),
        ];
        for (arg, ret_t) in combos {
            let s = self.poly_param(
                Type::par_set_int().with_bt(zinc_ast::BaseType::Top),
                "E",
                true,
            );
            let x = self.ast.param("x", arg);
            let ret = self.poly_ret(ret_t, "E", true);
            self.add_fn("to_enum", ret, vec![s, x]);
        }
        self.simple("anon_enum", Type::par_set_int(), &[Type::par_int()]);
        self.simple("anon_enum_set", Type::par_set_int(), &[Type::par_set_int()]);
        // enumOf(any) -> set of int; rewritten to enumOfInternal when the
        // argument's enum is known
        self.simple("enumOf", Type::par_set_int(), &[any_elem()]);
        let p = self.any_array_param(any_elem(), "T");
        let ret = self.ast.type_inst(Type::par_set_int());
        self.add_fn("enumOf", ret, vec![p]);
        let s = self.poly_param(
            Type::par_set_int().with_bt(zinc_ast::BaseType::Top),
            "E",
            true,
        );
        let ret = self.poly_ret(Type::par_set_int(), "E", true);
        self.add_fn("enumOfInternal", ret, vec![s]);
    }

    fn show_builtins(&mut self) {
        for name in ["show", "showDzn", "showJSON"] {
            self.simple(name, Type::par_string(), &[any_elem()]);
            self.simple(
                name,
                Type::par_string(),
                &[any_elem().with_st(SetType::Set)],
            );
            let p = self.any_array_param(any_elem(), "T");
            let ret = self.ast.type_inst(Type::par_string());
            self.add_fn(name, ret, vec![p]);
            let p = self.any_array_param(any_elem().with_st(SetType::Set), "T");
            let ret = self.ast.type_inst(Type::par_string());
            self.add_fn(name, ret, vec![p]);
        }
        self.simple("format", Type::par_string(), &[any_elem()]);
        self.simple(
            "format",
            Type::par_string(),
            &[Type::par_int(), any_elem()],
        );
        self.simple("showDznId", Type::par_string(), &[Type::par_string()]);
        self.simple(
            "join",
            Type::par_string(),
            &[Type::par_string(), Type::par_string().with_dim(1)],
        );
    }

    fn aggregate_builtins(&mut self) {
        self.simple("sum", Type::par_int(), &[Type::par_int().with_dim(1)]);
        self.simple("sum", Type::var_int(), &[Type::var_int().with_dim(1)]);
        self.simple("sum", Type::par_float(), &[Type::par_float().with_dim(1)]);
        self.simple("sum", Type::var_float(), &[Type::var_float().with_dim(1)]);
        self.simple(
            "sum",
            Type::var_int(),
            &[Type::var_int().with_ot(OptType::Optional).with_dim(1)],
        );
        self.simple("sum", Type::par_int(), &[Type::par_bool().with_dim(1)]);
        self.simple("sum", Type::var_int(), &[Type::var_bool().with_dim(1)]);
        self.simple("count", Type::par_int(), &[Type::par_bool().with_dim(1)]);
        self.simple("count", Type::var_int(), &[Type::var_bool().with_dim(1)]);
        self.simple(
            "count",
            Type::par_int(),
            &[Type::par_int().with_dim(1), Type::par_int()],
        );
        self.simple(
            "count",
            Type::var_int(),
            &[Type::var_int().with_dim(1), Type::var_int()],
        );
        for name in [
            "count_eq", "count_neq", "count_leq", "count_lt", "count_geq", "count_gt",
        ] {
            self.simple(
                name,
                Type::par_bool(),
                &[Type::par_int().with_dim(1), Type::par_int(), Type::par_int()],
            );
            self.simple(
                name,
                Type::var_bool(),
                &[Type::var_int().with_dim(1), Type::var_int(), Type::var_int()],
            );
        }
    }

    fn constraint_builtins(&mut self) {
        self.simple(
            "assert",
            Type::par_bool(),
            &[Type::par_bool(), Type::par_string()],
        );
        for name in [
            "mzn_symmetry_breaking_constraint",
            "mzn_redundant_constraint",
            "symmetry_breaking_constraint",
            "redundant_constraint",
            "implied_constraint",
        ] {
            self.simple(name, Type::var_bool(), &[Type::var_bool()]);
        }
        self.simple(
            "objective_deopt_",
            Type::var_int(),
            &[Type::var_int().with_ot(OptType::Optional), Type::par_bool()],
        );
        // mzn_deprecate(name, since, replacement, original)
        let strings = [Type::par_string(); 3];
        let mut params: Vec<DeclId> = strings
            .iter()
            .enumerate()
            .map(|(i, t)| self.ast.param(format!("s{}", i), *t))
            .collect();
        params.push(self.poly_param(any_elem(), "T", false));
        let ret = self.poly_ret(any_elem(), "T", false);
        self.add_fn("mzn_deprecate", ret, params);
        let mut params: Vec<DeclId> = strings
            .iter()
            .enumerate()
            .map(|(i, t)| self.ast.param(format!("s{}", i), *t))
            .collect();
        params.push(self.any_array_param(any_elem(), "T"));
        let ret = self.array_ret(any_elem(), "T", 1);
        self.add_fn("mzn_deprecate", ret, params);
    }

    fn annotation_builtins(&mut self) {
        self.simple("mzn_output_section", Type::ann(), &[Type::par_string()]);
        self.simple(
            "mzn_check_enum_var",
            Type::ann(),
            &[Type::par_set_int().with_dim(1)],
        );
        self.simple("mzn_add_annotated_expression", Type::ann(), &[Type::par_int()]);
        self.simple(
            "mzn_deprecated",
            Type::ann(),
            &[Type::par_string(), Type::par_string()],
        );
    }
}

/// Install the standard interface into the model.
///
/// Prepends the builtin items so user code can reference the annotation
/// constants by name, registers every signature, and returns the handles
/// the driver needs.
pub fn install(ast: &mut Ast, model: &mut Model, registry: &mut FunctionRegistry) -> Builtins {
    let mut inst = Installer {
        ast,
        registry,
        items: Vec::new(),
    };

    inst.numeric_operators();
    inst.range_operator();
    inst.comparison_operators();
    inst.logic_operators();
    inst.set_operators();
    inst.string_operators();
    inst.coercions();
    inst.array_builtins();
    inst.set_builtins();
    inst.option_builtins();
    inst.enum_builtins();
    inst.show_builtins();
    inst.aggregate_builtins();
    inst.constraint_builtins();
    inst.annotation_builtins();

    let builtins = Builtins {
        output_only: inst.ann_const("output_only"),
        rhs_from_assignment: inst.ann_const("rhs_from_assignment"),
        mzn_was_undefined: inst.ann_const("mzn_was_undefined"),
        mzn_check_var: inst.ann_const("mzn_check_var"),
        annotated_expression: inst.ann_const("annotated_expression"),
        ctx_pos: inst.ann_const("ctx_pos"),
        ctx_neg: inst.ann_const("ctx_neg"),
        empty_annotation: inst.ann_const("empty_annotation"),
    };

    let user_items = std::mem::take(&mut model.items);
    model.items = inst.items;
    model.items.extend(user_items);
    builtins
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Env;

    fn installed() -> (Ast, Model, FunctionRegistry, Builtins) {
        let mut ast = Ast::new();
        let mut model = Model::new();
        let mut reg = FunctionRegistry::new();
        let b = install(&mut ast, &mut model, &mut reg);
        (ast, model, reg, b)
    }

    #[test]
    fn test_stable_interface_names_exist() {
        let (_, _, reg, _) = installed();
        for name in [
            "bool2int", "bool2float", "int2float", "to_enum", "deopt", "occurs", "absent",
            "show", "showDzn", "showJSON", "enumOf", "enumOfInternal", "card", "min", "max",
            "index_set", "index_set_1of2", "array1d", "slice_1d", "slice_2d", "set2array",
            "join", "assert", "mzn_deprecate", "mzn_symmetry_breaking_constraint",
            "mzn_redundant_constraint", "count_eq", "count_geq",
        ] {
            assert!(reg.fn_exists(name), "missing builtin {}", name);
        }
    }

    #[test]
    fn test_operator_overload_resolution() {
        let (ast, _, reg, _) = installed();
        let mut env = Env::new();
        let f = reg
            .match_fn(&ast, &env, "'+'", &[Type::par_int(), Type::par_int()], true)
            .unwrap();
        assert_eq!(reg.rtype(&ast, &mut env, f, &[Type::par_int(), Type::par_int()]), Type::par_int());
        let f = reg
            .match_fn(&ast, &env, "'+'", &[Type::var_int(), Type::par_int()], true)
            .unwrap();
        assert_eq!(
            reg.rtype(&ast, &mut env, f, &[Type::var_int(), Type::par_int()]),
            Type::var_int()
        );
    }

    #[test]
    fn test_equality_rejects_mixed_kinds() {
        let (ast, _, reg, _) = installed();
        let env = Env::new();
        assert!(reg
            .match_fn(&ast, &env, "'='", &[Type::par_int(), Type::par_string()], true)
            .is_none());
        assert!(reg
            .match_fn(&ast, &env, "'='", &[Type::par_int(), Type::par_int()], true)
            .is_some());
    }

    #[test]
    fn test_to_enum_returns_tagged_type() {
        let (mut ast, _, reg, _) = installed();
        let mut env = Env::new();
        let ti = ast.type_inst(Type::par_set_int());
        let d = ast.add_decl(VarDecl::new("E", ti, None, Span::introduced()));
        let e = env.register_enum(d);

        let args = [Type::par_set_enum(e), Type::par_int()];
        let f = reg.match_fn(&ast, &env, "to_enum", &args, true).unwrap();
        let rt = reg.rtype(&ast, &mut env, f, &args);
        assert_eq!(rt.enum_id, e);
        assert!(rt.is_int() || rt.enum_id != 0);
    }

    #[test]
    fn test_annotation_constants_prepended() {
        let (ast, model, _, b) = installed();
        assert_eq!(ast.decl(b.output_only).ty, Type::ann());
        let decls = model.decl_items();
        assert!(decls.contains(&b.rhs_from_assignment));
    }
}
