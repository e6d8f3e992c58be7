//! Contract-level constant extraction.
//!
//! The analyser only ever evaluates the literals it needs for its own
//! decisions: the section name of an output item and the parameter index
//! of an `mzn_add_annotated_expression` annotation. Full constant
//! evaluation belongs to the downstream evaluator.

use zinc_ast::{Ast, ExprId, ExprKind};

/// The integer value of a literal expression.
pub fn eval_int(ast: &Ast, e: ExprId) -> Option<i64> {
    match ast.expr(e).kind {
        ExprKind::IntLit(v) => Some(v),
        _ => None,
    }
}

/// The string value of a literal expression.
pub fn eval_string(ast: &Ast, e: ExprId) -> Option<String> {
    match &ast.expr(e).kind {
        ExprKind::StringLit(s) => Some(s.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_extraction() {
        let mut ast = Ast::new();
        let i = ast.int_lit(7);
        let s = ast.str_lit("sec");
        assert_eq!(eval_int(&ast, i), Some(7));
        assert_eq!(eval_string(&ast, s), Some("sec".to_string()));
        assert_eq!(eval_int(&ast, s), None);
    }
}
