//! Aggressive-level transforms: strength reduction, adjacent
//! assign/reassign coalescing, and limited function inlining.
//!
//! | Pattern | Replacement |
//! |---------|-------------|
//! | `x * 2^n` (positive power of two) | `x << n` |
//! | `x / 2^n` (positive power of two) | `x >> n` |
//! | `$ x = pure; x = e` (`e` not using `x`) | `$ x = e` |
//! | `x = pure; x = e` (`e` not using `x`) | `x = e` |
//! | call to a single-expression function | the substituted body |
//!
//! Inlining qualifies a call when the callee body is exactly one `return`,
//! the argument count matches, and every argument is a literal or a
//! variable (so substitution cannot duplicate work or reorder effects).
//! Recursive callees never qualify.

use std::collections::HashMap;

use itertools::Itertools;

use crate::ast::{BinaryOp, Expr, FunctionDecl, Literal, MatchArm, Stmt, SwitchCase};

use super::types::OptimizationStats;

/// Apply the aggressive statement transforms
pub(super) fn reduce_statements(
    stmts: Vec<Stmt>,
    functions: &HashMap<String, FunctionDecl>,
    stats: &mut OptimizationStats,
) -> Vec<Stmt> {
    let reduced: Vec<Stmt> = stmts
        .into_iter()
        .map(|s| reduce_stmt(s, functions, stats))
        .collect();
    coalesce_assignments(reduced, stats)
}

fn reduce_block(
    stmts: Vec<Stmt>,
    functions: &HashMap<String, FunctionDecl>,
    stats: &mut OptimizationStats,
) -> Vec<Stmt> {
    reduce_statements(stmts, functions, stats)
}

fn reduce_stmt(
    stmt: Stmt,
    functions: &HashMap<String, FunctionDecl>,
    stats: &mut OptimizationStats,
) -> Stmt {
    match stmt {
        Stmt::Assign { name, value } => Stmt::Assign {
            name,
            value: reduce_expr(value, functions, stats),
        },
        Stmt::Reassign { name, value } => Stmt::Reassign {
            name,
            value: reduce_expr(value, functions, stats),
        },
        Stmt::Return(value) => Stmt::Return(reduce_expr(value, functions, stats)),
        Stmt::If {
            condition,
            then_block,
            else_block,
        } => Stmt::If {
            condition: reduce_expr(condition, functions, stats),
            then_block: reduce_block(then_block, functions, stats),
            else_block: else_block.map(|b| reduce_block(b, functions, stats)),
        },
        Stmt::While { condition, body } => Stmt::While {
            condition: reduce_expr(condition, functions, stats),
            body: reduce_block(body, functions, stats),
        },
        Stmt::For {
            key,
            value,
            iterable,
            body,
        } => Stmt::For {
            key,
            value,
            iterable: reduce_expr(iterable, functions, stats),
            body: reduce_block(body, functions, stats),
        },
        Stmt::Switch {
            scrutinee,
            cases,
            default,
        } => Stmt::Switch {
            scrutinee: reduce_expr(scrutinee, functions, stats),
            cases: cases
                .into_iter()
                .map(|case| SwitchCase {
                    value: reduce_expr(case.value, functions, stats),
                    body: reduce_block(case.body, functions, stats),
                })
                .collect(),
            default: default.map(|b| reduce_block(b, functions, stats)),
        },
        Stmt::Expression(expr) => Stmt::Expression(reduce_expr(expr, functions, stats)),
        Stmt::Break | Stmt::Continue | Stmt::Validation { .. } => stmt,
    }
}

fn reduce_expr(
    expr: Expr,
    functions: &HashMap<String, FunctionDecl>,
    stats: &mut OptimizationStats,
) -> Expr {
    match expr {
        Expr::Binary { op, lhs, rhs } => {
            let lhs = reduce_expr(*lhs, functions, stats);
            let rhs = reduce_expr(*rhs, functions, stats);
            if let Some(reduced) = reduce_strength(op, &lhs, &rhs) {
                stats.strength_reductions += 1;
                return reduced;
            }
            Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            }
        }
        Expr::Unary { op, operand } => Expr::Unary {
            op,
            operand: Box::new(reduce_expr(*operand, functions, stats)),
        },
        Expr::Array(items) => Expr::Array(
            items
                .into_iter()
                .map(|e| reduce_expr(e, functions, stats))
                .collect(),
        ),
        Expr::Object(fields) => Expr::Object(
            fields
                .into_iter()
                .map(|(k, v)| (k, reduce_expr(v, functions, stats)))
                .collect(),
        ),
        Expr::FieldAccess { object, field } => Expr::FieldAccess {
            object: Box::new(reduce_expr(*object, functions, stats)),
            field,
        },
        Expr::Index { collection, index } => Expr::Index {
            collection: Box::new(reduce_expr(*collection, functions, stats)),
            index: Box::new(reduce_expr(*index, functions, stats)),
        },
        Expr::Call { name, args } => {
            let args: Vec<Expr> = args
                .into_iter()
                .map(|e| reduce_expr(e, functions, stats))
                .collect();
            if let Some(inlined) = try_inline(&name, &args, functions) {
                stats.calls_inlined += 1;
                return inlined;
            }
            Expr::Call { name, args }
        }
        Expr::Match { scrutinee, arms } => Expr::Match {
            scrutinee: Box::new(reduce_expr(*scrutinee, functions, stats)),
            arms: arms
                .into_iter()
                .map(|arm| MatchArm {
                    pattern: arm.pattern,
                    guard: arm.guard.map(|g| reduce_expr(g, functions, stats)),
                    body: reduce_expr(arm.body, functions, stats),
                })
                .collect(),
        },
        Expr::Async(body) => Expr::Async(reduce_block(body, functions, stats)),
        Expr::Await(inner) => Expr::Await(Box::new(reduce_expr(*inner, functions, stats))),
        Expr::Literal(_) | Expr::Variable(_) | Expr::Lambda { .. } => expr,
    }
}

/// Rewrite multiplication/division by a positive power of two into a shift
fn reduce_strength(op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Option<Expr> {
    let shift = |value: &Expr, op: BinaryOp, amount: u32| Expr::Binary {
        op,
        lhs: Box::new(value.clone()),
        rhs: Box::new(Expr::Literal(Literal::Int(amount as i64))),
    };
    match op {
        BinaryOp::Mul => {
            if let Some(n) = power_of_two(rhs) {
                return Some(shift(lhs, BinaryOp::Shl, n));
            }
            if let Some(n) = power_of_two(lhs) {
                return Some(shift(rhs, BinaryOp::Shl, n));
            }
            None
        }
        BinaryOp::Div => power_of_two(rhs).map(|n| shift(lhs, BinaryOp::Shr, n)),
        _ => None,
    }
}

/// `Some(log2(n))` when the expression is a positive power-of-two Int
/// literal greater than one
fn power_of_two(expr: &Expr) -> Option<u32> {
    match expr {
        Expr::Literal(Literal::Int(n)) if *n > 1 && n.count_ones() == 1 => {
            Some(n.trailing_zeros())
        }
        _ => None,
    }
}

/// Coalesce adjacent writes to the same name when the first is pure and the
/// second does not read it
fn coalesce_assignments(stmts: Vec<Stmt>, stats: &mut OptimizationStats) -> Vec<Stmt> {
    let before = stmts.len();
    let out: Vec<Stmt> = stmts
        .into_iter()
        .coalesce(|first, second| match (&first, &second) {
            (Stmt::Assign { name, value }, Stmt::Reassign { name: n2, value: v2 })
                if name == n2 && super::dce::expr_is_pure(value) && !uses_variable(v2, name) =>
            {
                Ok(Stmt::Assign {
                    name: name.clone(),
                    value: v2.clone(),
                })
            }
            (Stmt::Reassign { name, value }, Stmt::Reassign { name: n2, value: v2 })
                if name == n2 && super::dce::expr_is_pure(value) && !uses_variable(v2, name) =>
            {
                Ok(Stmt::Reassign {
                    name: name.clone(),
                    value: v2.clone(),
                })
            }
            _ => Err((first, second)),
        })
        .collect();
    stats.assigns_coalesced += before - out.len();
    out
}

/// Dead-variable analysis: whether an expression reads `name`
///
/// Descends through variable references, unary and binary operations,
/// indexing, and function-call argument lists. Every other expression kind
/// is conservatively treated as a use.
pub(super) fn uses_variable(expr: &Expr, name: &str) -> bool {
    match expr {
        Expr::Literal(_) => false,
        Expr::Variable(var) => var == name,
        Expr::Unary { operand, .. } => uses_variable(operand, name),
        Expr::Binary { lhs, rhs, .. } => uses_variable(lhs, name) || uses_variable(rhs, name),
        Expr::Index { collection, index } => {
            uses_variable(collection, name) || uses_variable(index, name)
        }
        Expr::Call { args, .. } => args.iter().any(|a| uses_variable(a, name)),
        // Untracked kinds: assume the variable is used
        _ => true,
    }
}

/// Inline a call to a qualifying single-expression function
fn try_inline(
    name: &str,
    args: &[Expr],
    functions: &HashMap<String, FunctionDecl>,
) -> Option<Expr> {
    let function = functions.get(name)?;
    if function.params.len() != args.len() {
        return None;
    }
    let [Stmt::Return(body)] = function.body.as_slice() else {
        return None;
    };
    // Substituting anything effectful could duplicate or reorder work
    if !args
        .iter()
        .all(|a| matches!(a, Expr::Literal(_) | Expr::Variable(_)))
    {
        return None;
    }
    if calls_function(body, name) {
        return None;
    }
    let substitutions: HashMap<&str, &Expr> = function
        .params
        .iter()
        .map(String::as_str)
        .zip(args.iter())
        .collect();
    substitute(body, &substitutions)
}

/// Whether an expression contains a call to `name`
fn calls_function(expr: &Expr, name: &str) -> bool {
    match expr {
        Expr::Call { name: callee, args } => {
            callee == name || args.iter().any(|a| calls_function(a, name))
        }
        Expr::Binary { lhs, rhs, .. } => calls_function(lhs, name) || calls_function(rhs, name),
        Expr::Unary { operand, .. } => calls_function(operand, name),
        Expr::Array(items) => items.iter().any(|e| calls_function(e, name)),
        Expr::Object(fields) => fields.iter().any(|(_, v)| calls_function(v, name)),
        Expr::FieldAccess { object, .. } => calls_function(object, name),
        Expr::Index { collection, index } => {
            calls_function(collection, name) || calls_function(index, name)
        }
        Expr::Await(inner) => calls_function(inner, name),
        _ => false,
    }
}

/// Replace parameter references with argument expressions
///
/// Bails (returns `None`) on expression kinds that introduce their own
/// bindings, where naive substitution could capture.
fn substitute(expr: &Expr, map: &HashMap<&str, &Expr>) -> Option<Expr> {
    match expr {
        Expr::Literal(_) => Some(expr.clone()),
        Expr::Variable(name) => Some(match map.get(name.as_str()) {
            Some(replacement) => (*replacement).clone(),
            None => expr.clone(),
        }),
        Expr::Binary { op, lhs, rhs } => Some(Expr::Binary {
            op: *op,
            lhs: Box::new(substitute(lhs, map)?),
            rhs: Box::new(substitute(rhs, map)?),
        }),
        Expr::Unary { op, operand } => Some(Expr::Unary {
            op: *op,
            operand: Box::new(substitute(operand, map)?),
        }),
        Expr::Array(items) => Some(Expr::Array(
            items
                .iter()
                .map(|e| substitute(e, map))
                .collect::<Option<Vec<_>>>()?,
        )),
        Expr::Object(fields) => Some(Expr::Object(
            fields
                .iter()
                .map(|(k, v)| Some((k.clone(), substitute(v, map)?)))
                .collect::<Option<Vec<_>>>()?,
        )),
        Expr::FieldAccess { object, field } => Some(Expr::FieldAccess {
            object: Box::new(substitute(object, map)?),
            field: field.clone(),
        }),
        Expr::Index { collection, index } => Some(Expr::Index {
            collection: Box::new(substitute(collection, map)?),
            index: Box::new(substitute(index, map)?),
        }),
        Expr::Call { name, args } => Some(Expr::Call {
            name: name.clone(),
            args: args
                .iter()
                .map(|e| substitute(e, map))
                .collect::<Option<Vec<_>>>()?,
        }),
        Expr::Await(inner) => Some(Expr::Await(Box::new(substitute(inner, map)?))),
        // Binding forms: substitution could capture, so the call does not
        // qualify for inlining
        Expr::Match { .. } | Expr::Async(_) | Expr::Lambda { .. } => None,
    }
}
