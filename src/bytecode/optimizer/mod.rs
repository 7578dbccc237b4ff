//! AST optimizer
//!
//! A pure AST-to-AST pre-pass over entry-point bodies, run by the compiler
//! before emission. Input nodes are never mutated; every pass rebuilds.
//!
//! # Levels
//!
//! | Level | Transforms |
//! |-------|-----------|
//! | `None` | nothing (required for tests that exercise runtime branching) |
//! | `Basic` | constant folding, dead code after `return`, literal-branch pruning, empty-block elision |
//! | `Aggressive` | `Basic` plus strength reduction, assign/reassign coalescing, single-expression inlining |
//!
//! # Example
//!
//! ```
//! use glyphcore::ast::{BinaryOp, Expr, Literal, Stmt};
//! use glyphcore::bytecode::optimizer::{Optimizer, OptLevel};
//!
//! let body = vec![Stmt::Return(Expr::Binary {
//!     op: BinaryOp::Add,
//!     lhs: Box::new(Expr::Literal(Literal::Int(40))),
//!     rhs: Box::new(Expr::Literal(Literal::Int(2))),
//! })];
//!
//! let mut optimizer = Optimizer::new(OptLevel::Basic);
//! let optimized = optimizer.optimize_statements(&body);
//! assert_eq!(optimized, vec![Stmt::Return(Expr::Literal(Literal::Int(42)))]);
//! ```

mod dce;
mod folding;
mod reduce;
mod types;


pub use types::{OptLevel, OptimizationStats};

use std::collections::HashMap;

use tracing::debug;

use crate::ast::{FunctionDecl, Stmt};

/// The AST optimizer
///
/// Holds the configured level, the module's function table (consulted by
/// the inliner), and accumulated statistics.
#[derive(Debug, Default)]
pub struct Optimizer {
    level: OptLevel,
    functions: HashMap<String, FunctionDecl>,
    stats: OptimizationStats,
}

impl Optimizer {
    /// Create an optimizer at the given level
    pub fn new(level: OptLevel) -> Self {
        Self {
            level,
            functions: HashMap::new(),
            stats: OptimizationStats::new(),
        }
    }

    /// Supply the module's user functions for the inlining pass
    pub fn with_functions(mut self, functions: impl IntoIterator<Item = FunctionDecl>) -> Self {
        self.functions = functions
            .into_iter()
            .map(|f| (f.name.clone(), f))
            .collect();
        self
    }

    /// The configured level
    #[inline]
    pub fn level(&self) -> OptLevel {
        self.level
    }

    /// Statistics accumulated across all `optimize_statements` calls
    #[inline]
    pub fn stats(&self) -> &OptimizationStats {
        &self.stats
    }

    /// Optimize a statement list, returning new nodes
    ///
    /// The input is left untouched; at `OptLevel::None` the output is a
    /// plain clone of it.
    pub fn optimize_statements(&mut self, stmts: &[Stmt]) -> Vec<Stmt> {
        if self.level == OptLevel::None {
            return stmts.to_vec();
        }

        let mut out = folding::fold_statements(stmts, &mut self.stats);
        if self.level == OptLevel::Aggressive {
            out = reduce::reduce_statements(out, &self.functions, &mut self.stats);
            // Inlined bodies expose fresh literal operands
            out = folding::fold_statements(&out, &mut self.stats);
        }
        out = dce::eliminate_dead_code(out, &mut self.stats);

        if self.stats.total() > 0 {
            debug!(
                target: "glyphcore::optimizer",
                level = ?self.level,
                transforms = self.stats.total(),
                "optimized statement list"
            );
        }
        out
    }
}
