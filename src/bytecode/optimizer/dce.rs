//! Dead-code elimination.
//!
//! Three statement-level transforms, applied recursively:
//!
//! - Everything after an unconditional `return` in a block is unreachable
//!   and removed.
//! - `if`/`while` with a literal condition keep only the live branch
//!   (the loop body is dropped entirely when the condition is a literal
//!   false).
//! - Statements whose blocks are all empty and whose condition is pure are
//!   elided outright.
//!
//! Branch pruning never hoists a block's statements into the enclosing
//! block: a block is its own scope, and flattening would change what
//! redeclaration means there.

use crate::ast::{Expr, Literal, Stmt, SwitchCase};

use super::types::OptimizationStats;

/// Eliminate dead code in a statement list
pub(super) fn eliminate_dead_code(stmts: Vec<Stmt>, stats: &mut OptimizationStats) -> Vec<Stmt> {
    let mut out = Vec::with_capacity(stmts.len());
    let total = stmts.len();
    let mut seen = 0usize;

    for stmt in stmts {
        seen += 1;
        let is_return = matches!(stmt, Stmt::Return(_));
        if let Some(live) = prune_stmt(stmt, stats) {
            out.push(live);
        }
        if is_return {
            stats.dead_statements_removed += total - seen;
            break;
        }
    }
    out
}

/// Prune one statement; `None` when the whole statement is elided
fn prune_stmt(stmt: Stmt, stats: &mut OptimizationStats) -> Option<Stmt> {
    match stmt {
        Stmt::If {
            condition,
            then_block,
            else_block,
        } => {
            let then_block = eliminate_dead_code(then_block, stats);
            let else_block = else_block.map(|b| eliminate_dead_code(b, stats));

            if let Expr::Literal(lit) = &condition {
                stats.branches_resolved += 1;
                // Keep only the live branch, preserving block structure
                return if lit.to_value().is_truthy() {
                    (!then_block.is_empty()).then_some(Stmt::If {
                        condition: Expr::Literal(Literal::Bool(true)),
                        then_block,
                        else_block: None,
                    })
                } else {
                    else_block
                        .filter(|block| !block.is_empty())
                        .map(|block| Stmt::If {
                            condition: Expr::Literal(Literal::Bool(true)),
                            then_block: block,
                            else_block: None,
                        })
                };
            }

            let else_is_empty = else_block.as_ref().map_or(true, |b| b.is_empty());
            if then_block.is_empty() && else_is_empty && expr_is_pure(&condition) {
                stats.empty_blocks_elided += 1;
                return None;
            }
            Some(Stmt::If {
                condition,
                then_block,
                else_block,
            })
        }
        Stmt::While { condition, body } => {
            let body = eliminate_dead_code(body, stats);
            if let Expr::Literal(lit) = &condition {
                if !lit.to_value().is_truthy() {
                    stats.branches_resolved += 1;
                    return None;
                }
            }
            Some(Stmt::While { condition, body })
        }
        Stmt::For {
            key,
            value,
            iterable,
            body,
        } => Some(Stmt::For {
            key,
            value,
            iterable,
            body: eliminate_dead_code(body, stats),
        }),
        Stmt::Switch {
            scrutinee,
            cases,
            default,
        } => {
            let cases: Vec<SwitchCase> = cases
                .into_iter()
                .map(|case| SwitchCase {
                    value: case.value,
                    body: eliminate_dead_code(case.body, stats),
                })
                .collect();
            let default = default.map(|b| eliminate_dead_code(b, stats));
            if cases.is_empty() && default.is_none() && expr_is_pure(&scrutinee) {
                stats.empty_blocks_elided += 1;
                return None;
            }
            Some(Stmt::Switch {
                scrutinee,
                cases,
                default,
            })
        }
        other => Some(other),
    }
}

/// Whether evaluating an expression can have no observable effect
///
/// Conservative: calls, awaits, async blocks, and match arms may reach host
/// functions or fail at runtime, so they are treated as effectful.
pub(super) fn expr_is_pure(expr: &Expr) -> bool {
    match expr {
        Expr::Literal(_) | Expr::Variable(_) => true,
        Expr::Unary { operand, .. } => expr_is_pure(operand),
        Expr::Binary { lhs, rhs, .. } => expr_is_pure(lhs) && expr_is_pure(rhs),
        Expr::Array(items) => items.iter().all(expr_is_pure),
        Expr::Object(fields) => fields.iter().all(|(_, v)| expr_is_pure(v)),
        Expr::FieldAccess { object, .. } => expr_is_pure(object),
        Expr::Index { .. }
        | Expr::Call { .. }
        | Expr::Match { .. }
        | Expr::Async(_)
        | Expr::Await(_)
        | Expr::Lambda { .. } => false,
    }
}
