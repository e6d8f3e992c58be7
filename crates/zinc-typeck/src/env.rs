//! The typing environment.
//!
//! Owns everything that outlives a single pass: the enum registry, the
//! array-enum tuple interner, the reverse mapping from enum member names
//! to their declarations, collected output sections, accumulated warnings
//! and the checker-model variable list.
//!
//! The environment also hosts the registry-aware half of subtyping: array
//! types carry an interned *array-enum tuple* `(indexEnums..., elemEnum)`
//! behind their `enum_id`, and two array types are only compatible when
//! the tuples agree pointwise (a zero entry on the supertype side matches
//! anything).

use crate::error::TypeError;
use indexmap::IndexMap;
use std::collections::HashMap;
use zinc_ast::{Ast, BaseType, DeclId, ExprId, Inst, OptType, SetType, Type};

/// One entry in the enum registry.
#[derive(Debug, Clone)]
enum EnumDef {
    /// A user-declared enum, by its declaration
    Scalar(DeclId),
    /// An interned array-enum tuple `(indexEnums..., elemEnum)`
    ArrayTuple(Vec<u32>),
}

/// Typing environment shared by all passes.
#[derive(Debug, Default)]
pub struct Env {
    /// Enum registry; `enum_id` values are 1-based indices into this
    defs: Vec<EnumDef>,
    /// Interning table for array-enum tuples
    array_intern: IndexMap<Vec<u32>, u32>,
    /// Enum member / constructor name → declaring item
    pub reverse_enum: HashMap<String, DeclId>,
    /// Output item expressions grouped by section name
    pub output_sections: IndexMap<String, Vec<ExprId>>,
    /// Non-fatal warnings (shadowing and the like)
    pub warnings: Vec<TypeError>,
    /// Variables required by a solution checker model
    pub check_vars: Vec<DeclId>,
    /// Tooling mode: skip unresolvable identifiers in annotations
    pub ignore_unknown_ids: bool,
}

impl Env {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user enum declaration; returns its 1-based id.
    pub fn register_enum(&mut self, decl: DeclId) -> u32 {
        self.defs.push(EnumDef::Scalar(decl));
        self.defs.len() as u32
    }

    /// The declaration of a registered enum, if `id` names one.
    pub fn get_enum(&self, id: u32) -> Option<DeclId> {
        match self.defs.get(id.checked_sub(1)? as usize) {
            Some(EnumDef::Scalar(d)) => Some(*d),
            _ => None,
        }
    }

    /// Number of registered enums and array-enum tuples.
    pub fn enum_count(&self) -> usize {
        self.defs.len()
    }

    /// Intern an array-enum tuple `(indexEnums..., elemEnum)`.
    ///
    /// Uniqueness is keyed by the tuple contents; interning the same
    /// vector twice returns the same id.
    pub fn register_array_enum(&mut self, ids: &[u32]) -> u32 {
        if let Some(existing) = self.array_intern.get(ids) {
            return *existing;
        }
        self.defs.push(EnumDef::ArrayTuple(ids.to_vec()));
        let id = self.defs.len() as u32;
        self.array_intern.insert(ids.to_vec(), id);
        id
    }

    /// The interned tuple behind an array-enum id.
    pub fn get_array_enum(&self, id: u32) -> Option<&[u32]> {
        match self.defs.get(id.checked_sub(1)? as usize) {
            Some(EnumDef::ArrayTuple(ids)) => Some(ids),
            _ => None,
        }
    }

    /// The `(indexEnums..., elemEnum)` tuple of an array type.
    ///
    /// Untagged array types yield an all-zero tuple of the right arity.
    pub fn array_enum_ids(&self, t: Type) -> Vec<u32> {
        let dim = t.dim.max(0) as usize;
        if t.enum_id != 0 {
            if let Some(ids) = self.get_array_enum(t.enum_id) {
                return ids.to_vec();
            }
            // array tagged directly with a scalar enum: element tag only
            let mut ids = vec![0; dim + 1];
            ids[dim] = t.enum_id;
            return ids;
        }
        vec![0; dim + 1]
    }

    /// The element enum tag of a type (unwrapping array tuples).
    pub fn elem_enum_id(&self, t: Type) -> u32 {
        if t.dim != 0 && t.enum_id != 0 {
            if let Some(ids) = self.get_array_enum(t.enum_id) {
                return *ids.last().unwrap_or(&0);
            }
        }
        t.enum_id
    }

    /// Registry-aware subtyping (§ type lattice).
    ///
    /// Componentwise subtyping plus the array-enum tuple check: with
    /// `strict_enums`, array types must agree pointwise on their tuples,
    /// where zero entries on the supertype side match anything.
    pub fn is_subtype(&self, a: Type, b: Type, strict_enums: bool) -> bool {
        if !a.is_subtype_of(b, strict_enums) {
            return false;
        }
        if strict_enums && a.dim != 0 && a.enum_id != b.enum_id {
            if b.enum_id == 0 || a.bt == BaseType::Bot {
                return true;
            }
            let ea = self.array_enum_ids(a);
            let eb = self.array_enum_ids(b);
            if ea.len() != eb.len() {
                // only possible against polymorphic-dimension targets
                return b.dim == -1;
            }
            for (x, y) in ea.iter().zip(eb.iter()) {
                if *y != 0 && x != y {
                    return false;
                }
            }
        }
        true
    }

    /// Human-readable rendering of a type, resolving enum tags to their
    /// declared names. Used in diagnostics only.
    pub fn type_str(&self, ast: &Ast, t: Type) -> String {
        let mut out = String::new();
        let elem_enum;
        if t.dim != 0 {
            let ids = self.array_enum_ids(t);
            let index_names: Vec<String> = if t.dim == -1 {
                vec!["$_".to_string()]
            } else {
                (0..t.dim as usize)
                    .map(|i| self.enum_name(ast, ids.get(i).copied().unwrap_or(0)))
                    .collect()
            };
            out.push_str(&format!("array[{}] of ", index_names.join(",")));
            elem_enum = *ids.last().unwrap_or(&0);
        } else {
            elem_enum = t.enum_id;
        }
        if t.inst == Inst::Var {
            out.push_str("var ");
        }
        if t.ot == OptType::Optional {
            out.push_str("opt ");
        }
        if t.st == SetType::Set {
            out.push_str("set of ");
        }
        let base = match t.bt {
            BaseType::Unknown => "?".to_string(),
            BaseType::Bot => "bot".to_string(),
            BaseType::Top => "$T".to_string(),
            BaseType::Bool => "bool".to_string(),
            BaseType::Int => self.enum_name(ast, elem_enum),
            BaseType::Float => "float".to_string(),
            BaseType::String => "string".to_string(),
            BaseType::Ann => "ann".to_string(),
        };
        out.push_str(&base);
        out
    }

    fn enum_name(&self, ast: &Ast, enum_id: u32) -> String {
        match self.get_enum(enum_id) {
            Some(decl) => ast.decl(decl).name.clone(),
            None => "int".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zinc_ast::{Span, VarDecl};

    fn env_with_enum(ast: &mut Ast, name: &str) -> (Env, u32) {
        let ti = ast.type_inst(Type::par_set_int());
        let d = ast.add_decl(VarDecl::new(name, ti, None, Span::introduced()));
        let mut env = Env::new();
        let id = env.register_enum(d);
        (env, id)
    }

    #[test]
    fn test_enum_registration() {
        let mut ast = Ast::new();
        let (env, id) = env_with_enum(&mut ast, "Color");
        assert_eq!(id, 1);
        assert!(env.get_enum(id).is_some());
        assert!(env.get_enum(0).is_none());
        assert!(env.get_enum(99).is_none());
    }

    #[test]
    fn test_array_enum_interning() {
        let mut env = Env::new();
        let a = env.register_array_enum(&[1, 0, 2]);
        let b = env.register_array_enum(&[1, 0, 2]);
        let c = env.register_array_enum(&[0, 0, 2]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(env.get_array_enum(a), Some(&[1, 0, 2][..]));
    }

    #[test]
    fn test_array_subtype_pointwise() {
        let mut ast = Ast::new();
        let (mut env, e) = env_with_enum(&mut ast, "E");
        let tagged = env.register_array_enum(&[e, e]);
        let untag_elem = env.register_array_enum(&[0, e]);

        let a = Type::par_int().with_dim(1).with_enum_id(tagged);
        let b = Type::par_int().with_dim(1).with_enum_id(untag_elem);
        let plain = Type::par_int().with_dim(1);

        // zero entries on the supertype side match anything
        assert!(env.is_subtype(a, b, true));
        assert!(env.is_subtype(a, plain, true));
        // but a tagged index cannot be satisfied by an untagged one
        assert!(!env.is_subtype(b, a, true));
    }

    #[test]
    fn test_elem_enum_unwraps_tuple() {
        let mut ast = Ast::new();
        let (mut env, e) = env_with_enum(&mut ast, "E");
        let tup = env.register_array_enum(&[0, e]);
        let arr = Type::par_int().with_dim(1).with_enum_id(tup);
        assert_eq!(env.elem_enum_id(arr), e);
        assert_eq!(env.elem_enum_id(Type::par_enum(e)), e);
    }

    #[test]
    fn test_type_str_uses_enum_names() {
        let mut ast = Ast::new();
        let (env, e) = env_with_enum(&mut ast, "Color");
        let t = Type::par_enum(e).with_st(SetType::Set);
        assert_eq!(env.type_str(&ast, t), "set of Color");
        assert_eq!(env.type_str(&ast, Type::var_int()), "var int");
    }
}
