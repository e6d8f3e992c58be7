//! Bottom-up type assignment.
//!
//! A post-order pass over expressions, driven by an explicit work stack
//! rather than recursion so comprehension generators can be typed between
//! their `in` expressions and their bodies. Each node rule assigns the
//! node's type, may insert coercions around children, and may rewrite the
//! node in place (operator-to-`count_*` normalisation, `show` on par
//! enums, deprecation wrapping, macro inlining).
//!
//! The pass runs twice: the first run types declarations' type-insts and
//! function signatures only (`full == false`); the second runs over every
//! item with full variable-declaration handling.

use crate::coerce::add_coercion;
use crate::env::Env;
use crate::error::{ErrorKind, TypeError, TypeResult};
use crate::eval::eval_int;
use crate::registry::{reify_name, FunctionRegistry};
use std::collections::{HashMap, HashSet};
use zinc_ast::{
    Ast, BaseType, BinOpKind, DeclId, ExprId, ExprKind, Generator, Inst, LetItem, OptType,
    SetType, Type, INT_INFINITY, INT_NEG_INFINITY,
};

/// One unit of work on the traversal stack.
enum Frame {
    Enter(ExprId),
    Exit(ExprId),
    /// Assign generator declaration types once generator `i`'s source
    /// expression has been typed
    TypeGens(ExprId, usize),
    /// Run the variable-declaration rule once its type-inst (and, in the
    /// full pass, initialiser) have been typed
    ExitDecl(DeclId),
}

/// The bottom-up typer.
pub struct Typer<'a> {
    pub ast: &'a mut Ast,
    pub env: &'a mut Env,
    pub registry: &'a FunctionRegistry,
    pub errors: &'a mut Vec<TypeError>,
    /// Second pass: unify initialisers and apply call rewrites
    pub full: bool,
    /// The `empty_annotation` constant, for else-less conditionals of
    /// annotation type
    pub empty_annotation: Option<DeclId>,
}

impl<'a> Typer<'a> {
    /// Type an expression tree.
    pub fn run(&mut self, root: ExprId) -> TypeResult<()> {
        let mut stack = vec![Frame::Enter(root)];
        self.drain(&mut stack)
    }

    /// Type a declaration: its type-inst, initialiser (full pass) and
    /// annotations, then the declaration rule itself.
    pub fn run_var_decl(&mut self, decl: DeclId) -> TypeResult<()> {
        let mut stack = Vec::new();
        self.push_decl(&mut stack, decl);
        self.drain(&mut stack)
    }

    fn push_decl(&self, stack: &mut Vec<Frame>, decl: DeclId) {
        stack.push(Frame::ExitDecl(decl));
        for &a in self.ast.decl(decl).ann.iter().rev() {
            stack.push(Frame::Enter(a));
        }
        if self.full {
            if let Some(init) = self.ast.decl(decl).init {
                stack.push(Frame::Enter(init));
            }
        }
        stack.push(Frame::Enter(self.ast.decl(decl).ti));
    }

    fn drain(&mut self, stack: &mut Vec<Frame>) -> TypeResult<()> {
        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Enter(e) => self.enter(stack, e),
                Frame::Exit(e) => {
                    self.visit(e)?;
                    self.check_annotations(e)?;
                }
                Frame::TypeGens(e, i) => self.type_generator(e, i)?,
                Frame::ExitDecl(d) => self.visit_var_decl(d)?,
            }
        }
        Ok(())
    }

    /// Schedule a node: its exit after its annotations after its
    /// children, in evaluation order.
    fn enter(&mut self, stack: &mut Vec<Frame>, e: ExprId) {
        stack.push(Frame::Exit(e));
        for &a in self.ast.expr(e).ann.iter().rev() {
            stack.push(Frame::Enter(a));
        }
        match self.ast.expr(e).kind.clone() {
            ExprKind::Comprehension {
                generators, body, ..
            } => {
                stack.push(Frame::Enter(body));
                for (i, g) in generators.iter().enumerate().rev() {
                    if g.in_expr.is_some() {
                        if let Some(w) = g.where_expr {
                            stack.push(Frame::Enter(w));
                        }
                        stack.push(Frame::TypeGens(e, i));
                        stack.push(Frame::Enter(g.in_expr.unwrap()));
                    } else {
                        // assignment generator: the defining expression
                        // types the declaration
                        stack.push(Frame::TypeGens(e, i));
                        if let Some(w) = g.where_expr {
                            stack.push(Frame::Enter(w));
                        }
                    }
                }
            }
            ExprKind::Let { items, body } => {
                stack.push(Frame::Enter(body));
                for item in items.iter().rev() {
                    match *item {
                        LetItem::Decl(d) => self.push_decl(stack, d),
                        LetItem::Constraint(c) => stack.push(Frame::Enter(c)),
                    }
                }
            }
            _ => {
                for c in self.ast.children(e).into_iter().rev() {
                    stack.push(Frame::Enter(c));
                }
            }
        }
    }

    /// Annotations of a finished expression must be annotations.
    fn check_annotations(&mut self, e: ExprId) -> TypeResult<()> {
        for &a in &self.ast.expr(e).ann {
            let at = self.ast.ty(a);
            if !at.is_ann() {
                return Err(TypeError::new(
                    ErrorKind::TypeMismatch,
                    self.ast.span(a),
                    format!(
                        "expected annotation, got `{}'",
                        self.env.type_str(self.ast, at)
                    ),
                ));
            }
        }
        Ok(())
    }

    fn coerce(&mut self, e: ExprId, target: Type) -> TypeResult<ExprId> {
        add_coercion(self.ast, self.env, self.registry, e, target)
    }

    fn type_error(&self, e: ExprId, msg: impl Into<String>) -> TypeError {
        TypeError::new(ErrorKind::TypeMismatch, self.ast.span(e), msg)
    }

    // --- Node rules -------------------------------------------------------

    fn visit(&mut self, e: ExprId) -> TypeResult<()> {
        match self.ast.expr(e).kind.clone() {
            ExprKind::IntLit(_) => self.ast.set_ty(e, Type::par_int()),
            ExprKind::FloatLit(_) => self.ast.set_ty(e, Type::par_float()),
            ExprKind::BoolLit(_) => self.ast.set_ty(e, Type::par_bool()),
            ExprKind::StringLit(_) => self.ast.set_ty(e, Type::par_string()),
            ExprKind::Absent => self
                .ast
                .set_ty(e, Type::bot(0).with_ot(OptType::Optional)),
            ExprKind::Anon => {}
            ExprKind::TiId { .. } => self.ast.set_ty(e, Type::top()),
            ExprKind::Id { decl, .. } => self.visit_id(e, decl)?,
            ExprKind::SetLit(members) => self.visit_set_lit(e, members)?,
            ExprKind::ArrayLit { elems, dims } => self.visit_array_lit(e, elems, dims)?,
            ExprKind::ArrayAccess { array, idxs } => self.visit_array_access(e, array, idxs)?,
            ExprKind::Comprehension {
                generators,
                body,
                set,
            } => self.visit_comprehension(e, generators, body, set)?,
            ExprKind::IfThenElse {
                branches,
                else_expr,
            } => self.visit_ite(e, branches, else_expr)?,
            ExprKind::BinOp { op, lhs, rhs, .. } => self.visit_bin_op(e, op, lhs, rhs)?,
            ExprKind::UnOp { op, expr, .. } => self.visit_un_op(e, op, expr)?,
            ExprKind::Call { name, args, .. } => self.visit_call(e, name, args)?,
            ExprKind::Let { items, body } => self.visit_let(e, items, body)?,
            ExprKind::TypeInst { ranges, domain, .. } => {
                self.visit_type_inst(e, ranges, domain)?
            }
        }
        Ok(())
    }

    fn visit_id(&mut self, e: ExprId, decl: Option<DeclId>) -> TypeResult<()> {
        let Some(decl) = decl else {
            return Err(TypeError::new(
                ErrorKind::Internal,
                self.ast.span(e),
                "identifier without declaration after dependency analysis",
            ));
        };
        if self.ast.decl(decl).ty.is_unknown() {
            let ti_ty = self.ast.ty(self.ast.decl(decl).ti);
            self.ast.decl_mut(decl).ty = ti_ty;
        }
        let ty = self.ast.decl(decl).ty;
        self.ast.set_ty(e, ty);
        Ok(())
    }

    fn visit_set_lit(&mut self, e: ExprId, members: Vec<ExprId>) -> TypeResult<()> {
        let mut ty = Type::unknown().with_st(SetType::Set);
        let mut enum_id = members
            .first()
            .map(|m| self.ast.ty(*m).enum_id)
            .unwrap_or(0);
        for &m in &members {
            if matches!(self.ast.expr(m).kind, ExprKind::Absent) {
                continue;
            }
            let mt = self.ast.ty(m);
            if mt.dim > 0 {
                return Err(self.type_error(m, "set literals cannot contain arrays"));
            }
            if mt.is_set() {
                return Err(self.type_error(m, "set literals cannot contain sets"));
            }
            if mt.is_var() {
                ty.inst = Inst::Var;
            }
            if mt.cv {
                ty.cv = true;
            }
            if enum_id != mt.enum_id {
                enum_id = 0;
            }
            if !Type::bt_subtype(mt, ty, true) {
                if ty.bt == BaseType::Unknown || Type::bt_subtype(ty, mt, true) {
                    ty.bt = mt.bt;
                } else {
                    return Err(TypeError::new(
                        ErrorKind::NonUniformLiteral,
                        self.ast.span(e),
                        "non-uniform set literal",
                    ));
                }
            }
        }
        ty.enum_id = enum_id;
        if ty.bt == BaseType::Unknown {
            ty.bt = BaseType::Bot;
        } else {
            if ty.is_var() && ty.bt != BaseType::Int {
                if ty.bt == BaseType::Bool {
                    ty.bt = BaseType::Int;
                } else {
                    return Err(
                        self.type_error(e, "cannot coerce set literal element to var int")
                    );
                }
            }
            let mut new_members = members.clone();
            for m in new_members.iter_mut() {
                *m = self.coerce(*m, ty)?;
            }
            if let ExprKind::SetLit(slot) = &mut self.ast.expr_mut(e).kind {
                *slot = new_members;
            }
        }
        self.ast.set_ty(e, ty);
        Ok(())
    }

    fn visit_array_lit(&mut self, e: ExprId, elems: Vec<ExprId>, dims: u8) -> TypeResult<()> {
        let mut ty = Type::unknown().with_dim(dims as i8);
        let mut anons: Vec<ExprId> = Vec::new();
        let mut have_absents = false;
        let mut have_inferred = false;
        for &vi in &elems {
            let vit = self.ast.ty(vi);
            if vit.dim > 0 {
                return Err(self.type_error(vi, "arrays cannot be elements of arrays"));
            }
            if matches!(self.ast.expr(vi).kind, ExprKind::Absent) {
                have_absents = true;
            }
            let is_anon = matches!(self.ast.expr(vi).kind, ExprKind::Anon);
            if is_anon {
                ty.inst = Inst::Var;
                anons.push(vi);
            } else if vit.is_var() {
                ty.inst = Inst::Var;
            }
            if vit.cv {
                ty.cv = true;
            }
            if vit.is_opt() {
                ty.ot = OptType::Optional;
            }
            if ty.bt == BaseType::Unknown {
                if !is_anon {
                    if have_inferred {
                        if ty.st != vit.st && !vit.is_opt() {
                            return Err(TypeError::new(
                                ErrorKind::NonUniformLiteral,
                                self.ast.span(e),
                                "non-uniform array literal",
                            ));
                        }
                    } else {
                        have_inferred = true;
                        ty.st = vit.st;
                    }
                    if vit.bt != BaseType::Bot {
                        ty.bt = vit.bt;
                        ty.enum_id = vit.enum_id;
                    }
                }
            } else if !is_anon {
                if vit.bt == BaseType::Bot {
                    if vit.st != ty.st && !vit.is_opt() {
                        return Err(TypeError::new(
                            ErrorKind::NonUniformLiteral,
                            self.ast.span(e),
                            "non-uniform array literal",
                        ));
                    }
                    if vit.enum_id != 0 && ty.enum_id != vit.enum_id {
                        ty.enum_id = 0;
                    }
                } else {
                    let ty_enum_id = ty.enum_id;
                    ty.enum_id = vit.enum_id;
                    if Type::bt_subtype(ty, vit, true) {
                        ty.bt = vit.bt;
                    }
                    if ty_enum_id != vit.enum_id {
                        ty.enum_id = 0;
                    }
                    if !Type::bt_subtype(vit, ty, true) || ty.st != vit.st {
                        return Err(TypeError::new(
                            ErrorKind::NonUniformLiteral,
                            self.ast.span(e),
                            "non-uniform array literal",
                        ));
                    }
                }
            }
        }
        if ty.bt == BaseType::Unknown {
            ty.bt = BaseType::Bot;
            if !anons.is_empty() {
                return Err(self.type_error(
                    e,
                    "array literal must contain at least one non-anonymous variable",
                ));
            }
            if have_absents {
                return Err(
                    self.type_error(e, "array literal must contain at least one non-absent value")
                );
            }
        } else {
            let mut at = ty.with_dim(0);
            if at.is_var() && at.is_set() && at.bt != BaseType::Int {
                if at.bt == BaseType::Bool {
                    ty.bt = BaseType::Int;
                    at.bt = BaseType::Int;
                } else {
                    return Err(
                        self.type_error(e, "cannot coerce array element to var set of int")
                    );
                }
            }
            for anon in &anons {
                self.ast.set_ty(*anon, at);
            }
            let mut new_elems = elems.clone();
            for el in new_elems.iter_mut() {
                *el = self.coerce(*el, at)?;
            }
            if let ExprKind::ArrayLit { elems: slot, .. } = &mut self.ast.expr_mut(e).kind {
                *slot = new_elems;
            }
        }
        if ty.enum_id != 0 {
            let mut enum_ids = vec![0u32; ty.dim as usize];
            enum_ids.push(ty.enum_id);
            ty.enum_id = self.env.register_array_enum(&enum_ids);
        }
        self.ast.set_ty(e, ty);
        Ok(())
    }

    fn visit_array_access(
        &mut self,
        e: ExprId,
        mut array: ExprId,
        idxs: Vec<ExprId>,
    ) -> TypeResult<()> {
        let av_t = self.ast.ty(array);
        if av_t.dim == 0 {
            if av_t.is_set() {
                let tv = av_t.with_st(SetType::Plain).with_dim(1);
                array = self.coerce(array, tv)?;
            } else {
                return Err(self.type_error(
                    array,
                    format!(
                        "array access attempted on expression of type `{}'",
                        self.env.type_str(self.ast, av_t)
                    ),
                ));
            }
        } else if matches!(self.ast.expr(array).kind, ExprKind::ArrayAccess { .. }) {
            // collapse a nested slice before indexing into it
            let t = self.ast.ty(array);
            array = self.coerce(array, t)?;
        }
        if let ExprKind::ArrayAccess { array: slot, .. } = &mut self.ast.expr_mut(e).kind {
            *slot = array;
        }

        let arr_t = self.ast.ty(array);
        if arr_t.dim as usize != idxs.len() {
            return Err(self.type_error(
                array,
                format!(
                    "{}-dimensional array accessed with {} expression{}",
                    arr_t.dim,
                    idxs.len(),
                    if idxs.len() == 1 { "" } else { "s" }
                ),
            ));
        }

        let mut tt = arr_t;
        if tt.enum_id != 0 {
            let array_enum_ids = self.env.array_enum_ids(tt);
            let mut new_array_enum_ids: Vec<u32> = Vec::new();
            for (i, &aai) in idxs.iter().enumerate() {
                // open ranges adopt the enum of their closed endpoint,
                // full ranges the dimension's enum
                if let ExprKind::BinOp {
                    op: BinOpKind::DotDot,
                    lhs,
                    rhs,
                    ..
                } = self.ast.expr(aai).kind
                {
                    let mut t = self.ast.ty(aai);
                    let lhs_inf =
                        matches!(self.ast.expr(lhs).kind, ExprKind::IntLit(INT_NEG_INFINITY));
                    let rhs_inf = matches!(self.ast.expr(rhs).kind, ExprKind::IntLit(INT_INFINITY));
                    if lhs_inf && rhs_inf {
                        t.enum_id = array_enum_ids[i];
                    } else if lhs_inf {
                        t.enum_id = self.ast.ty(rhs).enum_id;
                    } else if rhs_inf {
                        t.enum_id = self.ast.ty(lhs).enum_id;
                    }
                    self.ast.set_ty(aai, t);
                }
                if self.ast.ty(aai).is_set() {
                    new_array_enum_ids.push(array_enum_ids[i]);
                }
                if array_enum_ids[i] != 0 && self.ast.ty(aai).enum_id != array_enum_ids[i] {
                    let index_pos = if idxs.len() > 1 {
                        format!("{} ", i + 1)
                    } else {
                        String::new()
                    };
                    let expected = self
                        .env
                        .get_enum(array_enum_ids[i])
                        .map(|d| self.ast.decl(d).name.clone())
                        .unwrap_or_else(|| "int".to_string());
                    return Err(self.type_error(
                        e,
                        format!(
                            "array index {}must be `{}', but is `{}'",
                            index_pos,
                            expected,
                            self.env.type_str(self.ast, self.ast.ty(aai))
                        ),
                    ));
                }
            }
            if new_array_enum_ids.is_empty() {
                tt.enum_id = *array_enum_ids.last().unwrap();
            } else {
                new_array_enum_ids.push(*array_enum_ids.last().unwrap());
                tt.enum_id = self.env.register_array_enum(&new_array_enum_ids);
            }
        }

        let mut n_dimensions: i8 = 0;
        let mut is_var_access = false;
        let mut is_slice = false;
        let mut new_idxs = idxs.clone();
        for aai in new_idxs.iter_mut() {
            if matches!(self.ast.expr(*aai).kind, ExprKind::Anon) {
                self.ast.set_ty(*aai, Type::var_int());
            }
            let it = self.ast.ty(*aai);
            if (it.bt != BaseType::Int && it.bt != BaseType::Bool) || it.dim != 0 {
                return Err(self.type_error(
                    e,
                    format!(
                        "array index must be `int' or `set of int', but is `{}'",
                        self.env.type_str(self.ast, it)
                    ),
                ));
            }
            if it.is_set() {
                if is_var_access || it.is_var() {
                    return Err(self.type_error(
                        e,
                        "array slicing with variable range or index not supported",
                    ));
                }
                is_slice = true;
                *aai = self.coerce(*aai, Type::var_set_int())?;
                n_dimensions += 1;
            } else {
                *aai = self.coerce(*aai, Type::var_int())?;
            }
            if it.is_opt() {
                tt.ot = OptType::Optional;
            }
            if it.is_var() {
                is_var_access = true;
                if is_slice {
                    return Err(self.type_error(
                        e,
                        "array slicing with variable range or index not supported",
                    ));
                }
                tt.inst = Inst::Var;
                if tt.bt == BaseType::Ann || tt.bt == BaseType::String {
                    return Err(self.type_error(
                        *aai,
                        format!(
                            "array access using a variable not supported for array of {}",
                            if tt.bt == BaseType::Ann { "ann" } else { "string" }
                        ),
                    ));
                }
            }
            if it.cv {
                tt.cv = true;
            }
        }
        tt.dim = n_dimensions;
        if let ExprKind::ArrayAccess { idxs: slot, .. } = &mut self.ast.expr_mut(e).kind {
            *slot = new_idxs;
        }
        self.ast.set_ty(e, tt);
        Ok(())
    }

    /// Assign generator declaration types for generator `i` of `e`.
    fn type_generator(&mut self, e: ExprId, i: usize) -> TypeResult<()> {
        let ExprKind::Comprehension { generators, .. } = self.ast.expr(e).kind.clone() else {
            return Ok(());
        };
        let g = &generators[i];
        match g.in_expr {
            None => {
                // assignment generator: i = expr
                let Some(w) = g.where_expr else {
                    return Ok(());
                };
                let ty = self.ast.ty(w);
                let d = g.decls[0];
                self.ast.decl_mut(d).ty = ty;
                let ti = self.ast.decl(d).ti;
                self.ast.set_ty(ti, ty);
            }
            Some(g_in) => {
                let ty_in = self.ast.ty(g_in);
                if !ty_in.shape_eq(Type::var_set_int())
                    && !ty_in.shape_eq(Type::par_set_int())
                    && ty_in.dim == 0
                    && !(ty_in.is_set() && ty_in.bt == BaseType::Bot)
                {
                    return Err(self.type_error(
                        g_in,
                        format!(
                            "generator expression must be (par or var) set of int or array, \
                             but is `{}'",
                            self.env.type_str(self.ast, ty_in)
                        ),
                    ));
                }
                let ty_id = if ty_in.dim == 0 {
                    Type::par_int().with_enum_id(ty_in.enum_id)
                } else {
                    let elem = self.env.elem_enum_id(ty_in);
                    ty_in.with_dim(0).with_enum_id(elem)
                };
                for &d in &g.decls {
                    self.ast.decl_mut(d).ty = ty_id;
                    let ti = self.ast.decl(d).ti;
                    self.ast.set_ty(ti, ty_id);
                }
            }
        }
        Ok(())
    }

    fn visit_comprehension(
        &mut self,
        e: ExprId,
        generators: Vec<Generator>,
        body: ExprId,
        set: bool,
    ) -> TypeResult<()> {
        let body_ty = self.ast.ty(body);
        let mut tt = body_ty;

        // declaration → (generator index, global declaration sequence)
        let mut generator_map: HashMap<DeclId, (usize, usize)> = HashMap::new();
        let mut decl_seq: Vec<DeclId> = Vec::new();
        for (i, g) in generators.iter().enumerate() {
            for &d in &g.decls {
                generator_map.insert(d, (i, decl_seq.len()));
                decl_seq.push(d);
            }
        }
        let mut where_map: HashMap<DeclId, Vec<ExprId>> = HashMap::new();

        for g in generators.iter() {
            let Some(g_in) = g.in_expr else {
                // assignment generator keeps its defining expression
                if let Some(w) = g.where_expr {
                    where_map.entry(g.decls[0]).or_default().push(w);
                }
                continue;
            };
            let ty_in = self.ast.ty(g_in);
            if ty_in.shape_eq(Type::var_set_int()) {
                if !set {
                    tt.ot = OptType::Optional;
                }
                tt.inst = Inst::Var;
                tt.cv = true;
            }
            if ty_in.cv {
                tt.cv = true;
            }
            if let Some(w) = g.where_expr {
                let wt = self.ast.ty(w);
                if wt.shape_eq(Type::var_bool()) {
                    if !set {
                        if body_ty.is_set() {
                            return Err(self.type_error(
                                w,
                                "variable where clause not allowed in set-valued comprehension",
                            ));
                        }
                        tt.ot = OptType::Optional;
                    }
                    tt.inst = Inst::Var;
                    tt.cv = true;
                } else if !wt.shape_eq(Type::par_bool()) {
                    return Err(self.type_error(
                        w,
                        format!(
                            "where clause must be bool, but is `{}'",
                            self.env.type_str(self.ast, wt)
                        ),
                    ));
                }
                if wt.cv {
                    tt.cv = true;
                }
                // split the clause on /\ and attach each conjunct to the
                // latest generator that binds one of its free variables
                let mut parts = Vec::new();
                let mut work = vec![w];
                while let Some(p) = work.pop() {
                    if let ExprKind::BinOp {
                        op: BinOpKind::And,
                        lhs,
                        rhs,
                        ..
                    } = self.ast.expr(p).kind
                    {
                        work.push(rhs);
                        work.push(lhs);
                    } else {
                        parts.push(p);
                    }
                }
                for wp in parts {
                    let mut latest: usize = 0;
                    self.ast.walk(wp, &mut |ast, sub| {
                        if let ExprKind::Id { decl: Some(d), .. } = ast.expr(sub).kind {
                            if let Some(&(gen, seq)) = generator_map.get(&d) {
                                let mut seq = seq;
                                let mut gen = gen;
                                // skip forward past assignment generators
                                while generators[gen].in_expr.is_none()
                                    && gen < generators.len() - 1
                                {
                                    gen += 1;
                                    seq += 1;
                                }
                                if seq > latest {
                                    latest = seq;
                                }
                            }
                        }
                    });
                    where_map.entry(decl_seq[latest]).or_default().push(wp);
                }
            }
        }

        // rebuild generators with migrated where clauses
        let mut new_generators: Vec<Generator> = Vec::new();
        for g in &generators {
            let c_in = match g.in_expr {
                Some(i_e) => {
                    let t = self.ast.ty(i_e);
                    Some(self.coerce(i_e, t)?)
                }
                None => None,
            };
            if g.in_expr.is_none() {
                // assignment generators keep their shape
                new_generators.push(g.clone());
                continue;
            }
            let mut decls_acc: Vec<DeclId> = Vec::new();
            let n = g.decls.len();
            for (j, &d) in g.decls.iter().enumerate() {
                decls_acc.push(d);
                let wheres = where_map.remove(&d).unwrap_or_default();
                if !wheres.is_empty() {
                    let mut where_expr = wheres[0];
                    for &wp in &wheres[1..] {
                        let lt = self.ast.ty(where_expr);
                        let wt = self.ast.ty(wp);
                        let bo = self.ast.binop(BinOpKind::And, where_expr, wp);
                        let mut bt = if lt.is_par() && wt.is_par() {
                            Type::par_bool()
                        } else {
                            Type::var_bool()
                        };
                        bt.cv = lt.cv || wt.cv;
                        self.ast.set_ty(bo, bt);
                        where_expr = bo;
                    }
                    new_generators.push(Generator {
                        decls: std::mem::take(&mut decls_acc),
                        in_expr: c_in,
                        where_expr: Some(where_expr),
                    });
                } else if j == n - 1 {
                    new_generators.push(Generator {
                        decls: std::mem::take(&mut decls_acc),
                        in_expr: c_in,
                        where_expr: None,
                    });
                }
            }
        }
        if let ExprKind::Comprehension {
            generators: slot, ..
        } = &mut self.ast.expr_mut(e).kind
        {
            *slot = new_generators;
        }

        if set {
            if body_ty.dim != 0 || body_ty.is_set() {
                return Err(self.type_error(
                    body,
                    format!(
                        "set comprehension expression must be scalar, but is `{}'",
                        self.env.type_str(self.ast, body_ty)
                    ),
                ));
            }
            tt.st = SetType::Set;
            if tt.is_var() {
                let coerced = self.coerce(body, Type::var_int())?;
                if let ExprKind::Comprehension { body: slot, .. } =
                    &mut self.ast.expr_mut(e).kind
                {
                    *slot = coerced;
                }
                tt.bt = BaseType::Int;
            }
        } else {
            if body_ty.dim != 0 {
                return Err(
                    self.type_error(body, "array comprehension expression cannot be an array")
                );
            }
            tt.dim = 1;
            if tt.enum_id != 0 {
                let enum_ids = vec![0, tt.enum_id];
                tt.enum_id = self.env.register_array_enum(&enum_ids);
            }
        }
        if tt.is_var()
            && (tt.bt == BaseType::Ann
                || tt.bt == BaseType::String
                || (tt.is_set() && tt.bt != BaseType::Int))
        {
            return Err(self.type_error(
                e,
                format!(
                    "invalid type for comprehension: `{}'",
                    self.env.type_str(self.ast, tt)
                ),
            ));
        }
        self.ast.set_ty(e, tt);
        Ok(())
    }

    fn visit_ite(
        &mut self,
        e: ExprId,
        branches: Vec<(ExprId, ExprId)>,
        else_expr: Option<ExprId>,
    ) -> TypeResult<()> {
        let mut tret = else_expr.map(|el| self.ast.ty(el)).unwrap_or_default();
        let mut anons: Vec<ExprId> = Vec::new();
        let mut allpar = !tret.is_var();
        if let Some(el) = else_expr {
            if tret.is_unknown() {
                if matches!(self.ast.expr(el).kind, ExprKind::Anon) {
                    allpar = false;
                    anons.push(el);
                } else {
                    return Err(self.type_error(
                        el,
                        "cannot infer type of expression in `else' branch of conditional",
                    ));
                }
            }
        }
        let mut allpresent = !tret.is_opt();
        let mut varcond = false;
        for &(eif, ethen) in &branches {
            let cond_t = self.ast.ty(eif);
            varcond = varcond || cond_t.shape_eq(Type::var_bool());
            if !cond_t.shape_eq(Type::par_bool()) && !cond_t.shape_eq(Type::var_bool()) {
                return Err(self.type_error(
                    eif,
                    format!(
                        "expected bool conditional expression, got `{}'",
                        self.env.type_str(self.ast, cond_t)
                    ),
                ));
            }
            if cond_t.cv {
                tret.cv = true;
            }
            let then_t = self.ast.ty(ethen);
            if then_t.is_unknown() {
                if matches!(self.ast.expr(ethen).kind, ExprKind::Anon) {
                    allpar = false;
                    anons.push(ethen);
                } else {
                    return Err(self.type_error(
                        ethen,
                        "cannot infer type of expression in `then' branch of conditional",
                    ));
                }
            } else {
                if tret.bt == BaseType::Bot {
                    tret.bt = then_t.bt;
                    tret.enum_id = then_t.enum_id;
                } else if tret.is_unknown() {
                    tret.bt = then_t.bt;
                    tret.dim = then_t.dim;
                }
                if (then_t.bt != BaseType::Bot
                    && !Type::bt_subtype(then_t, tret, true)
                    && !Type::bt_subtype(tret, then_t, true))
                    || then_t.st != tret.st
                    || then_t.dim != tret.dim
                {
                    return Err(self.type_error(
                        ethen,
                        format!(
                            "type mismatch in branches of conditional. `then' branch has type \
                             `{}', but `else' branch has type `{}'",
                            self.env.type_str(self.ast, then_t),
                            self.env.type_str(self.ast, tret)
                        ),
                    ));
                }
                if Type::bt_subtype(tret, then_t, true) {
                    tret.bt = then_t.bt;
                }
                if tret.enum_id != 0 && then_t.enum_id == 0 && then_t.bt != BaseType::Bot {
                    tret.enum_id = 0;
                }
                if then_t.is_var() {
                    allpar = false;
                }
                if then_t.is_opt() {
                    allpresent = false;
                }
                if then_t.cv {
                    tret.cv = true;
                }
            }
        }
        let else_expr = match else_expr {
            Some(el) => el,
            None => {
                // synthesize the unit-neutral else value
                let el = if tret.is_bool() {
                    let el = self.ast.bool_lit(true);
                    self.ast.set_ty(el, Type::par_bool());
                    el
                } else if tret.is_string() {
                    let el = self.ast.str_lit("");
                    self.ast.set_ty(el, Type::par_string());
                    el
                } else if tret.is_ann() {
                    let Some(empty) = self.empty_annotation else {
                        return Err(TypeError::new(
                            ErrorKind::Internal,
                            self.ast.span(e),
                            "missing builtin empty_annotation",
                        ));
                    };
                    self.ast.ident_for(empty)
                } else if tret.dim > 0 {
                    let el = self.ast.array_lit(vec![]);
                    self.ast.set_ty(el, tret);
                    el
                } else {
                    return Err(self.type_error(
                        e,
                        format!(
                            "conditional without `else' branch must have bool, string, ann, or \
                             array type, but `then' branch has type `{}'",
                            self.env.type_str(self.ast, tret)
                        ),
                    ));
                };
                if let ExprKind::IfThenElse { else_expr: slot, .. } =
                    &mut self.ast.expr_mut(e).kind
                {
                    *slot = Some(el);
                }
                el
            }
        };
        let tret_var = tret.with_inst(Inst::Var);
        for anon in &anons {
            self.ast.set_ty(*anon, tret_var);
        }
        let mut new_branches = branches.clone();
        for (_, ethen) in new_branches.iter_mut() {
            *ethen = self.coerce(*ethen, tret)?;
        }
        let new_else = self.coerce(else_expr, tret)?;
        if let ExprKind::IfThenElse {
            branches: slot,
            else_expr: else_slot,
        } = &mut self.ast.expr_mut(e).kind
        {
            *slot = new_branches;
            *else_slot = Some(new_else);
        }
        if varcond {
            if tret.dim > 0 {
                return Err(
                    self.type_error(e, "conditional with var condition cannot have array type")
                );
            }
            if tret.bt == BaseType::String {
                return Err(
                    self.type_error(e, "conditional with var condition cannot have string type")
                );
            }
            if tret.bt == BaseType::Ann {
                return Err(self.type_error(
                    e,
                    "conditional with var condition cannot have annotation type",
                ));
            }
            if tret.is_set() && tret.bt != BaseType::Int {
                return Err(self.type_error(
                    e,
                    format!(
                        "conditional with var condition cannot have type {}",
                        self.env.type_str(self.ast, tret)
                    ),
                ));
            }
        }
        if varcond || !allpar {
            tret.inst = Inst::Var;
        }
        if !allpresent {
            tret.ot = OptType::Optional;
        }
        self.ast.set_ty(e, tret);
        Ok(())
    }

    fn visit_bin_op(
        &mut self,
        e: ExprId,
        op: BinOpKind,
        lhs: ExprId,
        rhs: ExprId,
    ) -> TypeResult<()> {
        let arg_types = [self.ast.ty(lhs), self.ast.ty(rhs)];
        let Some(fi) = self
            .registry
            .match_fn(self.ast, self.env, op.op_name(), &arg_types, true)
        else {
            return Err(TypeError::new(
                ErrorKind::MissingFunction,
                self.ast.span(e),
                format!(
                    "type error in operator application for `{}'. No matching operator found \
                     with left-hand side type `{}' and right-hand side type `{}'",
                    op.op_name(),
                    self.env.type_str(self.ast, arg_types[0]),
                    self.env.type_str(self.ast, arg_types[1])
                ),
            ));
        };
        let t0 = self
            .registry
            .argtype(self.ast, self.env, fi, &arg_types, 0);
        let t1 = self
            .registry
            .argtype(self.ast, self.env, fi, &arg_types, 1);
        let lhs = self.coerce(lhs, t0)?;
        let rhs = self.coerce(rhs, t1)?;
        let new_args = [self.ast.ty(lhs), self.ast.ty(rhs)];
        let mut ty = self.registry.rtype(self.ast, self.env, fi, &new_args);
        ty.cv = new_args[0].cv || new_args[1].cv || ty.cv;
        let decl = self.ast.func(fi).body.is_some().then_some(fi);
        if let ExprKind::BinOp {
            lhs: l,
            rhs: r,
            decl: d,
            ..
        } = &mut self.ast.expr_mut(e).kind
        {
            *l = lhs;
            *r = rhs;
            *d = decl;
        }
        self.ast.set_ty(e, ty);

        if new_args[0].is_int() && new_args[1].is_int() && op.is_comparison() {
            self.try_count_rewrite(e, op, lhs, rhs)?;
        }
        Ok(())
    }

    /// Rewrite `count/sum-comprehension <cmp> rhs` into `count_<cmp>`,
    /// normalising the comparator orientation first.
    fn try_count_rewrite(
        &mut self,
        e: ExprId,
        op: BinOpKind,
        lhs: ExprId,
        rhs: ExprId,
    ) -> TypeResult<()> {
        let (call, other, bot) = if matches!(self.ast.expr(lhs).kind, ExprKind::Call { .. }) {
            (lhs, rhs, op)
        } else if matches!(self.ast.expr(rhs).kind, ExprKind::Call { .. }) {
            (rhs, lhs, op.swapped())
        } else {
            return Ok(());
        };
        let ExprKind::Call { name, args, .. } = self.ast.expr(call).kind.clone() else {
            return Ok(());
        };
        if (name != "count" && name != "sum") || !self.ast.ty(call).is_var() {
            return Ok(());
        }
        let cid = match bot {
            BinOpKind::Eq => "count_eq",
            BinOpKind::Neq => "count_neq",
            BinOpKind::Leq => "count_leq",
            BinOpKind::Le => "count_lt",
            BinOpKind::Geq => "count_geq",
            BinOpKind::Gr => "count_gt",
            _ => return Ok(()),
        };
        let new_args: Vec<ExprId>;
        if args.len() == 1
            && matches!(self.ast.expr(args[0]).kind, ExprKind::Comprehension { .. })
        {
            let comp = args[0];
            let ExprKind::Comprehension {
                generators, body, ..
            } = self.ast.expr(comp).kind.clone()
            else {
                return Ok(());
            };
            let ExprKind::BinOp {
                op: BinOpKind::Eq,
                lhs: inner_lhs,
                rhs: inner_rhs,
                ..
            } = self.ast.expr(body).kind
            else {
                return Ok(());
            };
            if !self.ast.ty(inner_lhs).is_int()
                || self.ast.ty(inner_lhs).is_opt()
                || self.ast.ty(inner_rhs).is_opt()
            {
                return Ok(());
            }
            let bound: HashSet<DeclId> = generators
                .iter()
                .flat_map(|g| g.decls.iter().copied())
                .collect();
            let mut generated = inner_lhs;
            let mut compared_to = Some(inner_rhs);
            if self.contains_bound_variable(inner_rhs, &bound) {
                if self.contains_bound_variable(inner_lhs, &bound) {
                    compared_to = None;
                } else {
                    generated = inner_rhs;
                    compared_to = Some(inner_lhs);
                }
            }
            let Some(compared_to) = compared_to else {
                return Ok(());
            };
            // the comprehension now yields the generated expression
            let gen_bt = self.ast.ty(generated).bt;
            let mut ct = self.ast.ty(comp);
            ct.bt = gen_bt;
            self.ast.set_ty(comp, ct);
            if let ExprKind::Comprehension { body: slot, .. } = &mut self.ast.expr_mut(comp).kind
            {
                *slot = generated;
            }
            new_args = vec![comp, compared_to, other];
        } else if args.len() == 2
            && self.ast.ty(args[0]).is_int_array()
            && self.ast.ty(args[1]).is_int()
        {
            new_args = vec![args[0], args[1], other];
        } else {
            return Ok(());
        }
        let tys: Vec<Type> = new_args.iter().map(|a| self.ast.ty(*a)).collect();
        let Some(decl) = self.registry.match_fn(self.ast, self.env, cid, &tys, true) else {
            return Err(TypeError::new(
                ErrorKind::Internal,
                self.ast.span(e),
                format!("could not replace binary operator by call to {}", cid),
            ));
        };
        self.ast.expr_mut(e).kind = ExprKind::Call {
            name: cid.to_string(),
            args: new_args,
            decl: Some(decl),
        };
        Ok(())
    }

    fn contains_bound_variable(&self, e: ExprId, bound: &HashSet<DeclId>) -> bool {
        let mut found = false;
        self.ast.walk(e, &mut |ast, sub| {
            if let ExprKind::Id { decl: Some(d), .. } = ast.expr(sub).kind {
                if bound.contains(&d) {
                    found = true;
                }
            }
        });
        found
    }

    fn visit_un_op(&mut self, e: ExprId, op: zinc_ast::UnOpKind, expr: ExprId) -> TypeResult<()> {
        let arg_types = [self.ast.ty(expr)];
        let Some(fi) = self
            .registry
            .match_fn(self.ast, self.env, op.op_name(), &arg_types, true)
        else {
            return Err(TypeError::new(
                ErrorKind::MissingFunction,
                self.ast.span(e),
                format!(
                    "type error in operator application for `{}'. No matching operator found \
                     with type `{}'",
                    op.op_name(),
                    self.env.type_str(self.ast, arg_types[0])
                ),
            ));
        };
        let t0 = self
            .registry
            .argtype(self.ast, self.env, fi, &arg_types, 0);
        let new_expr = self.coerce(expr, t0)?;
        let new_args = [self.ast.ty(new_expr)];
        let mut ty = self.registry.rtype(self.ast, self.env, fi, &new_args);
        ty.cv = new_args[0].cv || ty.cv;
        let decl = self.ast.func(fi).body.is_some().then_some(fi);
        if let ExprKind::UnOp {
            expr: slot, decl: d, ..
        } = &mut self.ast.expr_mut(e).kind
        {
            *slot = new_expr;
            *d = decl;
        }
        self.ast.set_ty(e, ty);
        Ok(())
    }

    fn visit_call(&mut self, e: ExprId, mut name: String, args: Vec<ExprId>) -> TypeResult<()> {
        let mut arg_types: Vec<Type> = args.iter().map(|a| self.ast.ty(*a)).collect();
        let missing = |this: &Self, name: &str, tys: &[Type]| {
            TypeError::new(
                ErrorKind::MissingFunction,
                this.ast.span(e),
                format!(
                    "no function or predicate with this signature found: `{}({})'",
                    name,
                    tys.iter()
                        .map(|t| this.env.type_str(this.ast, *t))
                        .collect::<Vec<_>>()
                        .join(",")
                ),
            )
        };
        let mut fi = self
            .registry
            .match_fn(self.ast, self.env, &name, &arg_types, true)
            .ok_or_else(|| missing(self, &name, &arg_types))?;

        // user-facing spellings of the structured constraint annotations
        let renamed = match self.ast.func(fi).name.as_str() {
            "symmetry_breaking_constraint" => Some("mzn_symmetry_breaking_constraint"),
            "redundant_constraint" | "implied_constraint" => Some("mzn_redundant_constraint"),
            _ => None,
        };
        if let Some(new_name) = renamed {
            if self.ast.func(fi).params.len() == 1 {
                name = new_name.to_string();
                fi = self
                    .registry
                    .match_fn(self.ast, self.env, &name, &arg_types, true)
                    .ok_or_else(|| missing(self, &name, &arg_types))?;
            }
        }

        // macro inlining: a body that is a single call to another
        // function with the same arguments, unless a reified variant
        // exists that flattening would prefer
        if let Some(inner) = self.macro_target(fi) {
            fi = inner;
            let inner_anns = self.ast.func(fi).ann.clone();
            self.ast.expr_mut(e).ann.extend(inner_anns);
        }

        // coerce arguments; comprehension arguments coerce their body so
        // the element type matches without materialising the array
        let mut new_args = args.clone();
        let mut cv = false;
        for (i, a) in new_args.iter_mut().enumerate() {
            if let ExprKind::Comprehension {
                body, set: false, ..
            } = self.ast.expr(*a).kind.clone()
            {
                let t_before = self.ast.ty(body);
                let mut t = self
                    .registry
                    .argtype(self.ast, self.env, fi, &arg_types, i);
                t.dim = 0;
                let new_body = self.coerce(body, t)?;
                if self.ast.ty(new_body) != t_before {
                    let new_bt = self.ast.ty(new_body).bt;
                    if let ExprKind::Comprehension { body: slot, .. } =
                        &mut self.ast.expr_mut(*a).kind
                    {
                        *slot = new_body;
                    }
                    let mut ct = self.ast.ty(*a);
                    ct.bt = new_bt;
                    self.ast.set_ty(*a, ct);
                }
            } else {
                let t = self
                    .registry
                    .argtype(self.ast, self.env, fi, &arg_types, i);
                *a = self.coerce(*a, t)?;
            }
            cv = cv || self.ast.ty(*a).cv;
        }
        arg_types = new_args.iter().map(|a| self.ast.ty(*a)).collect();

        // par enum arguments to the show family render through the
        // enum's synthesized to-string
        if matches!(name.as_str(), "show" | "showDzn" | "showJSON" | "format")
            && !new_args.is_empty()
        {
            let last = *new_args.last().unwrap();
            let lt = self.ast.ty(last);
            if lt.is_par() {
                let enum_id = self.env.elem_enum_id(lt);
                let elaborated = self
                    .env
                    .get_enum(enum_id)
                    .is_some_and(|d| self.ast.decl(d).init.is_some());
                if enum_id > 0 && elaborated {
                    let enum_decl = self.env.get_enum(enum_id).unwrap();
                    let enum_name = self.ast.decl(enum_decl).name.clone();
                    let mut subject = last;
                    if lt.dim > 1 {
                        let flat_t = lt.with_dim(1);
                        let call = self.ast.call("array1d", vec![subject]);
                        self.ast.set_ty(call, flat_t);
                        let flat_args = [lt];
                        if let Some(a1d) =
                            self.registry
                                .match_fn(self.ast, self.env, "array1d", &flat_args, false)
                        {
                            if let ExprKind::Call { decl, .. } = &mut self.ast.expr_mut(call).kind
                            {
                                *decl = Some(a1d);
                            }
                        }
                        subject = call;
                    }
                    let is_dzn = self.ast.bool_lit(name == "showDzn");
                    self.ast.set_ty(is_dzn, Type::par_bool());
                    let is_json = self.ast.bool_lit(name == "showJSON");
                    self.ast.set_ty(is_json, Type::par_bool());
                    name = crate::enums::to_string_name(&enum_name, "_toString_");
                    new_args = vec![subject, is_dzn, is_json];
                    arg_types = new_args.iter().map(|a| self.ast.ty(*a)).collect();
                    fi = self
                        .registry
                        .match_fn(self.ast, self.env, &name, &arg_types, false)
                        .ok_or_else(|| missing(self, &name, &arg_types))?;
                }
            }
        } else if name == "enumOf" && !new_args.is_empty() {
            let enum_id = self.env.elem_enum_id(self.ast.ty(new_args[0]));
            if enum_id != 0 {
                if let Some(enum_decl) = self.env.get_enum(enum_id) {
                    name = "enumOfInternal".to_string();
                    new_args = vec![self.ast.ident_for(enum_decl)];
                    arg_types = vec![self.ast.ty(new_args[0])];
                    fi = self
                        .registry
                        .match_fn(self.ast, self.env, &name, &arg_types, false)
                        .ok_or_else(|| missing(self, &name, &arg_types))?;
                }
            }
        }

        let mut ty = self.registry.rtype(self.ast, self.env, fi, &arg_types);
        ty.cv = cv || ty.cv;
        self.ast.set_ty(e, ty);

        // deprecated functions are wrapped in mzn_deprecate
        if let Some((since, replacement)) = self.deprecation_of(fi) {
            let orig = self.ast.alloc_typed(
                ExprKind::Call {
                    name: name.clone(),
                    args: new_args,
                    decl: Some(fi),
                },
                ty,
                self.ast.span(e),
            );
            let fn_name = self.ast.str_lit(self.ast.func(fi).name.clone());
            self.ast.set_ty(fn_name, Type::par_string());
            let dep_args = vec![fn_name, since, replacement, orig];
            let dep_types: Vec<Type> = dep_args.iter().map(|a| self.ast.ty(*a)).collect();
            let dep_fi = self
                .registry
                .match_fn(self.ast, self.env, "mzn_deprecate", &dep_types, false)
                .ok_or_else(|| {
                    TypeError::new(
                        ErrorKind::Internal,
                        self.ast.span(e),
                        "missing builtin mzn_deprecate",
                    )
                })?;
            self.ast.expr_mut(e).kind = ExprKind::Call {
                name: "mzn_deprecate".to_string(),
                args: dep_args,
                decl: Some(dep_fi),
            };
        } else {
            self.ast.expr_mut(e).kind = ExprKind::Call {
                name,
                args: new_args,
                decl: Some(fi),
            };
        }
        Ok(())
    }

    /// If `fi`'s body is a single call forwarding the parameters in
    /// order, return the inner declaration — unless a matching `_reif`
    /// overload exists.
    fn macro_target(&self, fi: zinc_ast::FunId) -> Option<zinc_ast::FunId> {
        let f = self.ast.func(fi);
        let body = f.body?;
        let ExprKind::Call {
            args: inner_args,
            decl: Some(inner_decl),
            ..
        } = &self.ast.expr(body).kind
        else {
            return None;
        };
        if inner_args.len() != f.params.len() {
            return None;
        }
        for (a, p) in inner_args.iter().zip(f.params.iter()) {
            let ExprKind::Id { decl: Some(d), .. } = self.ast.expr(*a).kind else {
                return None;
            };
            if d != *p {
                return None;
            }
        }
        // not a macro if a reified variant would be preferred
        let mut tt: Vec<Type> = f
            .params
            .iter()
            .map(|p| crate::registry::param_type(self.ast, *p))
            .collect();
        tt.push(Type::var_bool());
        let reif = reify_name(&f.name);
        if self
            .registry
            .match_fn(self.ast, self.env, &reif, &tt, true)
            .is_some()
        {
            return None;
        }
        Some(*inner_decl)
    }

    /// The `(since, replacement)` literals of a deprecated function.
    fn deprecation_of(&self, fi: zinc_ast::FunId) -> Option<(ExprId, ExprId)> {
        for &a in &self.ast.func(fi).ann {
            if let ExprKind::Call { name, args, .. } = &self.ast.expr(a).kind {
                if name == "mzn_deprecated" && args.len() == 2 {
                    return Some((args[0], args[1]));
                }
            }
        }
        None
    }

    fn visit_let(&mut self, e: ExprId, items: Vec<LetItem>, body: ExprId) -> TypeResult<()> {
        let mut cv = false;
        let mut is_var = false;
        for item in &items {
            match *item {
                LetItem::Decl(d) => {
                    let vd_ty = self.ast.decl(d).ty;
                    cv = cv || vd_ty.cv;
                    let has_domain = matches!(
                        self.ast.expr(self.ast.decl(d).ti).kind,
                        ExprKind::TypeInst {
                            domain: Some(_),
                            ..
                        }
                    );
                    if self.ast.decl(d).init.is_none()
                        && vd_ty.is_set()
                        && vd_ty.is_var()
                        && !has_domain
                    {
                        self.errors.push(TypeError::new(
                            ErrorKind::TypeMismatch,
                            self.ast.decl(d).span,
                            format!(
                                "set element type for `{}' is not finite",
                                self.ast.decl(d).name
                            ),
                        ));
                    }
                    if vd_ty.is_par() && self.ast.decl(d).init.is_none() {
                        return Err(TypeError::new(
                            ErrorKind::TypeMismatch,
                            self.ast.decl(d).span,
                            format!(
                                "let variable `{}' must be initialised",
                                self.ast.decl(d).name
                            ),
                        ));
                    }
                    if self.has_ti_variable(self.ast.decl(d).ti) {
                        self.errors.push(TypeError::new(
                            ErrorKind::TypeMismatch,
                            self.ast.decl(d).span,
                            format!(
                                "type-inst variables not allowed in type-inst for let variable \
                                 `{}'",
                                self.ast.decl(d).name
                            ),
                        ));
                    }
                    is_var = is_var || vd_ty.is_var();
                }
                LetItem::Constraint(c) => {
                    let ct = self.ast.ty(c);
                    cv = cv || ct.cv;
                    if !self.env.is_subtype(ct, Type::var_bool(), true) {
                        self.errors.push(TypeError::new(
                            ErrorKind::TypeMismatch,
                            self.ast.span(c),
                            format!(
                                "invalid type of constraint, expected `var bool', actual `{}'",
                                self.env.type_str(self.ast, ct)
                            ),
                        ));
                    }
                    is_var = is_var || ct.is_var();
                }
            }
        }
        let t = self.ast.ty(body);
        let new_body = self.coerce(body, t)?;
        if let ExprKind::Let { body: slot, .. } = &mut self.ast.expr_mut(e).kind {
            *slot = new_body;
        }
        let mut ty = self.ast.ty(new_body);
        ty.cv = cv || ty.cv;
        if is_var && ty.bt == BaseType::Bool && ty.dim == 0 {
            ty.inst = Inst::Var;
        }
        self.ast.set_ty(e, ty);
        Ok(())
    }

    /// Whether a type-inst mentions a type-inst variable anywhere.
    pub fn has_ti_variable(&self, ti: ExprId) -> bool {
        let mut found = false;
        self.ast.walk(ti, &mut |ast, sub| {
            if matches!(ast.expr(sub).kind, ExprKind::TiId { .. }) {
                found = true;
            }
        });
        found
    }

    /// The variable-declaration rule.
    ///
    /// In the first pass, only copies the resolved type-inst type onto
    /// the declaration. The full pass unifies the declared type with the
    /// initialiser, inserting coercions and adopting `_` index sets.
    pub fn visit_var_decl(&mut self, d: DeclId) -> TypeResult<()> {
        let ti = self.ast.decl(d).ti;
        let ti_ty = self.ast.ty(ti);
        self.ast.decl_mut(d).ty = ti_ty;
        if !self.full {
            return Ok(());
        }
        for &a in &self.ast.decl(d).ann {
            let at = self.ast.ty(a);
            if !at.is_ann() {
                return Err(TypeError::new(
                    ErrorKind::TypeMismatch,
                    self.ast.span(a),
                    format!(
                        "expected annotation, got `{}'",
                        self.env.type_str(self.ast, at)
                    ),
                ));
            }
        }
        let is_enum_ti = matches!(
            self.ast.expr(ti).kind,
            ExprKind::TypeInst { is_enum: true, .. }
        );
        if let Some(init) = self.ast.decl(d).init {
            let mut vdt = ti_ty;
            let mut vet = self.ast.ty(init);
            // index sets of array literals, comprehensions and their
            // concatenations coerce to any enum index set
            let literal_init = matches!(
                self.ast.expr(init).kind,
                ExprKind::ArrayLit { .. }
                    | ExprKind::Comprehension { .. }
                    | ExprKind::BinOp {
                        op: BinOpKind::PlusPlus,
                        ..
                    }
            );
            if !vdt.is_unknown() && vdt.enum_id != 0 && vdt.dim > 0 && literal_init {
                let enum_ids = self.env.array_enum_ids(vdt);
                let elem = *enum_ids.last().unwrap();
                if elem == 0 {
                    vdt.enum_id = 0;
                } else {
                    let mut relaxed = vec![0u32; enum_ids.len() - 1];
                    relaxed.push(elem);
                    vdt.enum_id = self.env.register_array_enum(&relaxed);
                }
            } else if is_enum_ti {
                if let ExprKind::Call { name, .. } = &self.ast.expr(init).kind {
                    if name == "anon_enum" {
                        vet.enum_id = vdt.enum_id;
                    }
                }
            }
            if ti_ty.is_unknown() {
                // `_`-typed declaration adopts the initialiser's type
                self.ast.set_ty(ti, vet);
                self.ast.decl_mut(d).ty = vet;
            } else if !self.env.is_subtype(vet, vdt, true) {
                let empty_array_lit = matches!(
                    &self.ast.expr(init).kind,
                    ExprKind::ArrayLit { elems, .. } if elems.is_empty()
                );
                if vet.shape_eq(Type::bot(1)) && empty_array_lit && vdt.dim != 0 {
                    // replace [] with an empty literal of the right shape
                    let empty = self.ast.array_lit(vec![]);
                    if let ExprKind::ArrayLit { dims, .. } = &mut self.ast.expr_mut(empty).kind {
                        *dims = vdt.dim as u8;
                    }
                    self.ast.set_ty(empty, self.ast.decl(d).ty);
                    self.ast.decl_mut(d).init = Some(empty);
                } else if is_enum_ti && vet.shape_eq(Type::par_set_int()) {
                    // a compiler-introduced enum right-hand side
                } else {
                    self.errors.push(TypeError::new(
                        ErrorKind::TypeMismatch,
                        self.ast.span(init),
                        format!(
                            "initialisation value for `{}' has invalid type-inst: expected \
                             `{}', actual `{}'",
                            self.ast.decl(d).name,
                            self.env.type_str(self.ast, vdt),
                            self.env.type_str(self.ast, vet)
                        ),
                    ));
                }
            }
            let init = self.ast.decl(d).init.unwrap();
            let target = self.ast.ty(ti);
            let coerced = self.coerce(init, target)?;
            self.ast.decl_mut(d).init = Some(coerced);
            self.adopt_anon_index_sets(d, vet)?;
        }
        self.check_annotated_expression_annotations(d)?;
        Ok(())
    }

    /// Resolve `_` placeholders in array index sets, copying enum
    /// information discovered from the initialiser.
    fn adopt_anon_index_sets(&mut self, d: DeclId, vet: Type) -> TypeResult<()> {
        let vd_ty = self.ast.decl(d).ty;
        if vd_ty.dim <= 0 {
            return Ok(());
        }
        let ti = self.ast.decl(d).ti;
        let ExprKind::TypeInst { ranges, .. } = self.ast.expr(ti).kind.clone() else {
            return Ok(());
        };
        if vet.enum_id != 0 {
            let enum_ids = self.env.array_enum_ids(vet);
            let mut vd_enum_ids = if vd_ty.enum_id != 0 {
                self.env.array_enum_ids(vd_ty)
            } else {
                vec![0; vd_ty.dim as usize + 1]
            };
            let mut had_anon = false;
            for (i, &r) in ranges.iter().enumerate() {
                let ExprKind::TypeInst {
                    domain: Some(dom), ..
                } = self.ast.expr(r).kind
                else {
                    continue;
                };
                if matches!(self.ast.expr(dom).kind, ExprKind::Anon) {
                    if enum_ids.get(i) != vd_enum_ids.get(i) {
                        vd_enum_ids[i] = enum_ids[i];
                        had_anon = true;
                    }
                    if let ExprKind::TypeInst { domain, .. } = &mut self.ast.expr_mut(r).kind {
                        *domain = None;
                    }
                }
            }
            if had_anon {
                let new_enum = self.env.register_array_enum(&vd_enum_ids);
                let t = vd_ty.with_enum_id(new_enum);
                self.ast.set_ty(ti, t);
                self.ast.decl_mut(d).ty = t;
            }
        } else {
            for &r in &ranges {
                let ExprKind::TypeInst {
                    domain: Some(dom), ..
                } = self.ast.expr(r).kind
                else {
                    continue;
                };
                if matches!(self.ast.expr(dom).kind, ExprKind::Anon) {
                    if let ExprKind::TypeInst { domain, .. } = &mut self.ast.expr_mut(r).kind {
                        *domain = None;
                    }
                }
            }
        }
        Ok(())
    }

    /// Annotations carrying `mzn_add_annotated_expression` must still
    /// type-check with the annotated declaration inserted.
    fn check_annotated_expression_annotations(&mut self, d: DeclId) -> TypeResult<()> {
        let anns = self.ast.decl(d).ann.clone();
        for a in anns {
            let mut add_ann_args: Vec<ExprId> = Vec::new();
            let mut add_ann_id = String::new();
            match self.ast.expr(a).kind.clone() {
                ExprKind::Id {
                    name,
                    decl: Some(ann_decl),
                } => {
                    if self.decl_has_add_annotated(ann_decl) {
                        add_ann_args = vec![self.ast.ident_for(d)];
                        add_ann_id = name;
                    }
                }
                ExprKind::Call {
                    name,
                    args,
                    decl: Some(call_decl),
                } => {
                    if let Some(idx) = self.fun_add_annotated_index(call_decl) {
                        let idx = idx as usize;
                        for (i, arg) in args.iter().enumerate() {
                            if i == idx {
                                add_ann_args.push(self.ast.ident_for(d));
                            }
                            add_ann_args.push(*arg);
                        }
                        if idx == args.len() {
                            add_ann_args.push(self.ast.ident_for(d));
                        }
                        add_ann_id = name;
                    }
                }
                _ => {}
            }
            if !add_ann_args.is_empty() {
                let tys: Vec<Type> = add_ann_args.iter().map(|x| self.ast.ty(*x)).collect();
                if self
                    .registry
                    .match_fn(self.ast, self.env, &add_ann_id, &tys, true)
                    .is_none()
                {
                    return Err(TypeError::new(
                        ErrorKind::MissingFunction,
                        self.ast.span(a),
                        format!(
                            "no function or predicate with this signature found: `{}'",
                            add_ann_id
                        ),
                    ));
                }
            }
        }
        Ok(())
    }

    fn decl_has_add_annotated(&self, d: DeclId) -> bool {
        self.ast.decl(d).ann.iter().any(|&a| {
            matches!(
                &self.ast.expr(a).kind,
                ExprKind::Call { name, .. } if name == "mzn_add_annotated_expression"
            )
        })
    }

    fn fun_add_annotated_index(&self, f: zinc_ast::FunId) -> Option<i64> {
        for &a in &self.ast.func(f).ann {
            if let ExprKind::Call { name, args, .. } = &self.ast.expr(a).kind {
                if name == "mzn_add_annotated_expression" && args.len() == 1 {
                    return eval_int(self.ast, args[0]);
                }
            }
        }
        None
    }

    fn visit_type_inst(
        &mut self,
        e: ExprId,
        ranges: Vec<ExprId>,
        domain: Option<ExprId>,
    ) -> TypeResult<()> {
        let mut tt = self.ast.ty(e);
        let mut found_enum = !ranges.is_empty()
            && domain.is_some_and(|d| self.ast.ty(d).enum_id != 0);
        if !ranges.is_empty() {
            let mut found_ti_id = false;
            for &ri in &ranges {
                let rt = self.ast.ty(ri);
                if rt.cv {
                    tt.cv = true;
                }
                if rt.enum_id != 0 {
                    found_enum = true;
                }
                // a `$U` index marks a polymorphic dimension, whether the
                // variable stands alone or as a range's domain
                let dim_variable = rt.shape_eq(Type::top())
                    || matches!(
                        &self.ast.expr(ri).kind,
                        ExprKind::TypeInst { domain: Some(d), .. }
                            if matches!(
                                self.ast.expr(*d).kind,
                                ExprKind::TiId { is_enum: false, .. }
                            )
                    );
                if dim_variable {
                    found_ti_id = true;
                } else if !rt.shape_eq(Type::par_int()) {
                    let has_domain = matches!(
                        self.ast.expr(ri).kind,
                        ExprKind::TypeInst {
                            domain: Some(_),
                            ..
                        }
                    );
                    if has_domain {
                        return Err(self.type_error(
                            ri,
                            format!(
                                "array index set expression has invalid type, expected \
                                 `set of int', actual `set of {}'",
                                self.env.type_str(self.ast, rt)
                            ),
                        ));
                    }
                    return Err(self.type_error(
                        ri,
                        format!(
                            "cannot use `{}' as array index set (did you mean `int'?)",
                            self.env.type_str(self.ast, rt)
                        ),
                    ));
                }
            }
            tt.dim = if found_ti_id { -1 } else { ranges.len() as i8 };
        }
        if let Some(dom) = domain {
            if self.ast.ty(dom).cv {
                tt.cv = true;
            }
            let dom_kind = self.ast.expr(dom).kind.clone();
            match dom_kind {
                ExprKind::TiId { is_enum, .. } => {
                    if is_enum {
                        tt.bt = BaseType::Int;
                    }
                }
                ExprKind::Anon => {
                    tt.bt = BaseType::Int;
                }
                _ => {
                    let dt = self.ast.ty(dom);
                    if !dt.is_par() || !dt.is_set() {
                        return Err(self.type_error(
                            dom,
                            format!(
                                "type-inst must be par set but is `{}'",
                                self.env.type_str(self.ast, dt)
                            ),
                        ));
                    }
                    if dt.dim != 0 {
                        return Err(self.type_error(dom, "type-inst cannot be an array"));
                    }
                    if tt.is_unknown() {
                        match dt.bt {
                            BaseType::Int | BaseType::Float => {}
                            BaseType::Bot => {
                                let fixed = dt.with_bt(BaseType::Int);
                                self.ast.set_ty(dom, fixed);
                            }
                            _ => {
                                return Err(
                                    self.type_error(dom, "type-inst must be int or float")
                                );
                            }
                        }
                        let dt = self.ast.ty(dom);
                        tt.bt = dt.bt;
                        tt.enum_id = dt.enum_id;
                    }
                }
            }
        }
        if found_enum {
            let mut enum_ids: Vec<u32> =
                ranges.iter().map(|r| self.ast.ty(*r).enum_id).collect();
            enum_ids.push(domain.map(|d| self.ast.ty(d).enum_id).unwrap_or(0));
            tt.enum_id = self.env.register_array_enum(&enum_ids);
        }
        if tt.is_set() && tt.is_var() && tt.bt != BaseType::Int && tt.bt != BaseType::Top {
            return Err(
                self.type_error(e, "var set element types other than `int' not allowed")
            );
        }
        if tt.is_var() && (tt.bt == BaseType::Ann || tt.bt == BaseType::String) {
            return Err(self.type_error(
                e,
                format!(
                    "invalid type of variable declaration: `{}'",
                    self.env.type_str(self.ast, tt)
                ),
            ));
        }
        self.ast.set_ty(e, tt);
        Ok(())
    }
}
