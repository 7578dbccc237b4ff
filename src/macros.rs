//! Macro-expansion hook
//!
//! Macro expansion is an AST-to-AST pass that runs before optimization. Its
//! internals live with the front end; the compiler only needs a seam to
//! invoke it through. The default expander is the identity.

use crate::ast::Stmt;

/// An AST-to-AST expansion pass invoked on every entry-point body before
/// the optimizer runs
///
/// Implementations must produce output using only the AST vocabulary in
/// [`crate::ast`]; the compiler re-checks nothing the expander emits beyond
/// its normal semantic rules.
pub trait MacroExpander {
    /// Expand macros in a statement list
    fn expand(&self, stmts: Vec<Stmt>) -> Vec<Stmt>;
}

/// The identity expander, used when no front end macro pass is attached
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopExpander;

impl MacroExpander for NoopExpander {
    fn expand(&self, stmts: Vec<Stmt>) -> Vec<Stmt> {
        stmts
    }
}
