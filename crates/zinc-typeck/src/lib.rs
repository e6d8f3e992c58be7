//! Semantic analysis for the zinc constraint-modelling frontend.
//!
//! Takes a parsed [`Model`](zinc_ast::Model) and produces a typed,
//! scoped, dependency-ordered version of the same graph together with an
//! enriched [`Env`]:
//!
//! ```text
//! Parse → TYPECHECK → Flatten
//!            ^^^^
//!   scopes · enum elaboration · dependency sort · type inference
//! ```
//!
//! # Passes
//!
//! - [`scopes`] — nested lexical scopes with toplevel/function/inner
//!   lookup rules and "did you mean ...?" suggestions
//! - [`enums`] — lowers user enums to integer ranges plus their
//!   synthesized constant, constructor and to-string families
//! - [`toposort`] — orders declarations by definition-use dependency,
//!   detecting circular definitions
//! - [`coerce`] — type-directed conversion insertion (bool→int,
//!   int→float, set→array, access→slice)
//! - [`typer`] — bottom-up type assignment with overload resolution
//! - [`pipeline`] — the driver sequencing everything, including
//!   assignment folding and par-specialisation
//!
//! The entry point is [`typecheck`]; recoverable diagnostics come back
//! in [`Typechecked::errors`], warnings on the environment, and fatal
//! failures (circular definitions, scope conflicts) as `Err`.

pub mod builtins;
pub mod coerce;
pub mod enums;
pub mod env;
pub mod error;
pub mod eval;
pub mod pipeline;
pub mod registry;
pub mod scopes;
pub mod toposort;
pub mod typer;

pub use env::Env;
pub use error::{ErrorKind, Severity, TypeError, TypeResult};
pub use pipeline::{typecheck, typecheck_assignment, TypecheckOptions, Typechecked};
pub use registry::FunctionRegistry;
