//! The type lattice.
//!
//! A [`Type`] is a small `Copy` value combining base kind, instantiation
//! (par/var), set and optionality flags, array dimension, an enum tag and
//! the "contains var" bit. Subtyping is the product of the pointwise
//! component orders:
//!
//! ```text
//! bot ≤ bool ≤ int ≤ float      bot ≤ string     bot ≤ ann     X ≤ top
//! par ≤ var                     present ≤ optional
//! ```
//!
//! Arrays are invariant in setness and optionality but promotable on base
//! kind. `dim == -1` marks a polymorphic array of unknown dimension, used
//! by builtin signatures such as `array1d`.
//!
//! Enum tags are plain `u32` indices into the enum registry (0 = untagged).
//! For arrays, the tag indexes an *array-enum tuple* interned by the
//! environment; the registry-aware half of subtyping therefore lives with
//! the environment, while everything registry-free is here.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Base kind of a type.
///
/// `Bot` is the element type of empty collection literals; `Top` is the
/// wildcard used by polymorphic builtins. `Unknown` only appears before
/// type checking completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BaseType {
    Unknown,
    Bot,
    Top,
    Bool,
    Int,
    Float,
    String,
    Ann,
}

/// Instantiation: fixed at compile time (par) or solver-decided (var).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Inst {
    Par,
    Var,
}

/// Plain value or set-of value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SetType {
    Plain,
    Set,
}

/// Whether a value may be absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptType {
    Present,
    Optional,
}

/// A type: the product of all lattice components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Type {
    pub bt: BaseType,
    pub inst: Inst,
    pub st: SetType,
    pub ot: OptType,
    /// 0 for scalars, 1..N for arrays, -1 for polymorphic dimension
    pub dim: i8,
    /// Enum registry tag, 0 = none. For arrays this indexes an interned
    /// array-enum tuple.
    pub enum_id: u32,
    /// Transitively contains var data (a par value computed from vars)
    pub cv: bool,
}

impl Default for Type {
    fn default() -> Self {
        Type::unknown()
    }
}

impl Type {
    pub const fn unknown() -> Self {
        Type {
            bt: BaseType::Unknown,
            inst: Inst::Par,
            st: SetType::Plain,
            ot: OptType::Present,
            dim: 0,
            enum_id: 0,
            cv: false,
        }
    }

    const fn base(bt: BaseType, inst: Inst) -> Self {
        Type {
            bt,
            inst,
            st: SetType::Plain,
            ot: OptType::Present,
            dim: 0,
            enum_id: 0,
            cv: false,
        }
    }

    pub const fn par_bool() -> Self {
        Self::base(BaseType::Bool, Inst::Par)
    }

    pub const fn var_bool() -> Self {
        Self::base(BaseType::Bool, Inst::Var)
    }

    pub const fn par_int() -> Self {
        Self::base(BaseType::Int, Inst::Par)
    }

    pub const fn var_int() -> Self {
        Self::base(BaseType::Int, Inst::Var)
    }

    pub const fn par_float() -> Self {
        Self::base(BaseType::Float, Inst::Par)
    }

    pub const fn var_float() -> Self {
        Self::base(BaseType::Float, Inst::Var)
    }

    pub const fn par_string() -> Self {
        Self::base(BaseType::String, Inst::Par)
    }

    pub const fn ann() -> Self {
        Self::base(BaseType::Ann, Inst::Par)
    }

    pub const fn top() -> Self {
        Self::base(BaseType::Top, Inst::Par)
    }

    pub fn bot(dim: i8) -> Self {
        Self::base(BaseType::Bot, Inst::Par).with_dim(dim)
    }

    pub fn par_set_int() -> Self {
        Self::par_int().with_st(SetType::Set)
    }

    pub fn var_set_int() -> Self {
        Self::var_int().with_st(SetType::Set)
    }

    pub fn par_enum(enum_id: u32) -> Self {
        let mut t = Self::par_int();
        t.enum_id = enum_id;
        t
    }

    pub fn par_set_enum(enum_id: u32) -> Self {
        let mut t = Self::par_set_int();
        t.enum_id = enum_id;
        t
    }

    // Field-update helpers, used pervasively when deriving one type from
    // another.

    pub fn with_bt(mut self, bt: BaseType) -> Self {
        self.bt = bt;
        self
    }

    pub fn with_inst(mut self, inst: Inst) -> Self {
        self.inst = inst;
        self
    }

    pub fn with_st(mut self, st: SetType) -> Self {
        self.st = st;
        self
    }

    pub fn with_ot(mut self, ot: OptType) -> Self {
        self.ot = ot;
        self
    }

    pub fn with_dim(mut self, dim: i8) -> Self {
        self.dim = dim;
        self
    }

    pub fn with_enum_id(mut self, enum_id: u32) -> Self {
        self.enum_id = enum_id;
        self
    }

    pub fn with_cv(mut self, cv: bool) -> Self {
        self.cv = cv;
        self
    }

    pub fn is_unknown(&self) -> bool {
        self.bt == BaseType::Unknown
    }

    pub fn is_bot(&self) -> bool {
        self.bt == BaseType::Bot
    }

    pub fn is_par(&self) -> bool {
        self.inst == Inst::Par
    }

    pub fn is_var(&self) -> bool {
        self.inst == Inst::Var
    }

    pub fn is_set(&self) -> bool {
        self.st == SetType::Set
    }

    pub fn is_opt(&self) -> bool {
        self.ot == OptType::Optional
    }

    /// Scalar (non-set, non-array) of the given base kind.
    fn is_scalar(&self, bt: BaseType) -> bool {
        self.bt == bt && self.st == SetType::Plain && self.dim == 0
    }

    pub fn is_int(&self) -> bool {
        self.is_scalar(BaseType::Int)
    }

    pub fn is_bool(&self) -> bool {
        self.is_scalar(BaseType::Bool)
    }

    pub fn is_float(&self) -> bool {
        self.is_scalar(BaseType::Float)
    }

    pub fn is_string(&self) -> bool {
        self.is_scalar(BaseType::String)
    }

    pub fn is_ann(&self) -> bool {
        self.bt == BaseType::Ann && self.st == SetType::Plain && self.dim == 0
    }

    pub fn is_int_set(&self) -> bool {
        self.bt == BaseType::Int && self.st == SetType::Set && self.dim == 0
    }

    pub fn is_int_array(&self) -> bool {
        self.bt == BaseType::Int && self.st == SetType::Plain && self.dim != 0
    }

    /// Structural equality ignoring enum tags and the contains-var bit.
    ///
    /// This is the comparison the typer's rules use for checks like
    /// "is this a var set of int": a generator over an enum set is still
    /// a set-of-int generator.
    pub fn shape_eq(&self, other: Type) -> bool {
        self.bt == other.bt
            && self.inst == other.inst
            && self.st == other.st
            && self.ot == other.ot
            && self.dim == other.dim
    }

    /// Base-kind subtyping.
    ///
    /// With `strict_enums`, scalar types with mismatched enum tags are not
    /// subtypes (unless the supertype is untagged); without it, the tags
    /// are ignored, which is the relaxation used when matching array
    /// literals with `bot` element types against enum-indexed signatures.
    pub fn bt_subtype(a: Type, b: Type, strict_enums: bool) -> bool {
        if a.bt == b.bt
            && (!strict_enums
                || a.dim != 0
                || (a.st == SetType::Set && b.st == SetType::Plain)
                || a.enum_id == b.enum_id
                || b.enum_id == 0)
        {
            return true;
        }
        match (a.bt, b.bt) {
            (BaseType::Bot, _) => true,
            (_, BaseType::Top) => true,
            (BaseType::Bool, BaseType::Int) | (BaseType::Bool, BaseType::Float) => true,
            (BaseType::Int, BaseType::Float) => true,
            _ => false,
        }
    }

    /// Componentwise subtyping, without array-enum tuple awareness.
    ///
    /// The environment wraps this with the array-enum element check; use
    /// that entry point whenever an environment is available.
    pub fn is_subtype_of(&self, other: Type, strict_enums: bool) -> bool {
        // dimensions: equal, or target polymorphic and source is an array
        if !(self.dim == other.dim || (other.dim == -1 && self.dim != 0)) {
            return false;
        }
        if self.st != other.st {
            return false;
        }
        // par ≤ var, present ≤ optional; the contains-var bit propagates
        // through results but never orders types
        if self.inst == Inst::Var && other.inst == Inst::Par {
            return false;
        }
        if self.ot == OptType::Optional && other.ot == OptType::Present {
            return false;
        }
        Self::bt_subtype(*self, other, strict_enums)
    }

    /// Least upper bound of the base kinds, if it exists.
    fn bt_join(a: BaseType, b: BaseType) -> Option<BaseType> {
        use BaseType::*;
        if a == b {
            return Some(a);
        }
        match (a, b) {
            (Bot, x) | (x, Bot) => Some(x),
            (Unknown, x) | (x, Unknown) => Some(x),
            (Bool, Int) | (Int, Bool) => Some(Int),
            (Bool, Float) | (Float, Bool) => Some(Float),
            (Int, Float) | (Float, Int) => Some(Float),
            (Top, _) | (_, Top) => Some(Top),
            _ => None,
        }
    }

    /// Least upper bound in the lattice.
    ///
    /// `var` wins over `par`, `optional` over `present`, `cv` is sticky.
    /// The enum tag survives only when both sides agree. Returns `None`
    /// for incomparable base kinds or mismatched setness/dimension.
    pub fn join(a: Type, b: Type) -> Option<Type> {
        if a.st != b.st || a.dim != b.dim {
            return None;
        }
        let bt = Self::bt_join(a.bt, b.bt)?;
        Some(Type {
            bt,
            inst: if a.inst == Inst::Var || b.inst == Inst::Var {
                Inst::Var
            } else {
                Inst::Par
            },
            st: a.st,
            ot: if a.ot == OptType::Optional || b.ot == OptType::Optional {
                OptType::Optional
            } else {
                OptType::Present
            },
            dim: a.dim,
            enum_id: if a.enum_id == b.enum_id { a.enum_id } else { 0 },
            cv: a.cv || b.cv,
        })
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dim == -1 {
            write!(f, "array[$_] of ")?;
        } else if self.dim > 0 {
            write!(f, "array[{}] of ", vec!["int"; self.dim as usize].join(","))?;
        }
        if self.inst == Inst::Var {
            write!(f, "var ")?;
        }
        if self.ot == OptType::Optional {
            write!(f, "opt ")?;
        }
        if self.st == SetType::Set {
            write!(f, "set of ")?;
        }
        match self.bt {
            BaseType::Unknown => write!(f, "?"),
            BaseType::Bot => write!(f, "bot"),
            BaseType::Top => write!(f, "$T"),
            BaseType::Bool => write!(f, "bool"),
            BaseType::Int => {
                if self.enum_id != 0 {
                    write!(f, "enum#{}", self.enum_id)
                } else {
                    write!(f, "int")
                }
            }
            BaseType::Float => write!(f, "float"),
            BaseType::String => write!(f, "string"),
            BaseType::Ann => write!(f, "ann"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_kind_chain() {
        assert!(Type::bt_subtype(Type::par_bool(), Type::par_int(), true));
        assert!(Type::bt_subtype(Type::par_bool(), Type::par_float(), true));
        assert!(Type::bt_subtype(Type::par_int(), Type::par_float(), true));
        assert!(!Type::bt_subtype(Type::par_float(), Type::par_int(), true));
        assert!(!Type::bt_subtype(Type::par_string(), Type::par_int(), true));
    }

    #[test]
    fn test_bot_and_top() {
        assert!(Type::bt_subtype(Type::bot(0), Type::par_string(), true));
        assert!(Type::bt_subtype(Type::par_string(), Type::top(), true));
        assert!(Type::bt_subtype(Type::ann(), Type::top(), true));
    }

    #[test]
    fn test_par_var_order() {
        assert!(Type::par_int().is_subtype_of(Type::var_int(), true));
        assert!(!Type::var_int().is_subtype_of(Type::par_int(), true));
    }

    #[test]
    fn test_opt_order() {
        let opt_int = Type::par_int().with_ot(OptType::Optional);
        assert!(Type::par_int().is_subtype_of(opt_int, true));
        assert!(!opt_int.is_subtype_of(Type::par_int(), true));
    }

    #[test]
    fn test_set_invariance() {
        assert!(!Type::par_set_int().is_subtype_of(Type::par_int(), true));
        assert!(!Type::par_int().is_subtype_of(Type::par_set_int(), true));
    }

    #[test]
    fn test_polymorphic_dim() {
        let arr2 = Type::par_int().with_dim(2);
        let poly = Type::par_int().with_dim(-1);
        assert!(arr2.is_subtype_of(poly, true));
        assert!(!Type::par_int().is_subtype_of(poly, true));
    }

    #[test]
    fn test_enum_strictness() {
        let e = Type::par_enum(3);
        assert!(e.is_subtype_of(Type::par_int(), true));
        assert!(!Type::par_int().is_subtype_of(e, true));
        assert!(Type::par_int().is_subtype_of(e, false));
    }

    #[test]
    fn test_join() {
        let j = Type::join(Type::par_bool(), Type::var_int()).unwrap();
        assert_eq!(j.bt, BaseType::Int);
        assert_eq!(j.inst, Inst::Var);

        let j = Type::join(Type::par_enum(2), Type::par_enum(2)).unwrap();
        assert_eq!(j.enum_id, 2);
        let j = Type::join(Type::par_enum(2), Type::par_enum(5)).unwrap();
        assert_eq!(j.enum_id, 0);

        assert!(Type::join(Type::par_string(), Type::par_int()).is_none());
    }

    #[test]
    fn test_cv_sticky_in_join_not_subtyping() {
        let cv = Type::par_int().with_cv(true);
        let j = Type::join(cv, Type::par_int()).unwrap();
        assert!(j.cv);
        // subtyping is the product of the other component orders; the
        // contains-var bit does not participate
        assert!(cv.is_subtype_of(Type::par_int(), true));
        assert!(cv.is_subtype_of(Type::var_int(), true));
        assert!(Type::par_int().is_subtype_of(cv, true));
    }
}
