//! Constant folding over literal operands.
//!
//! Folds arithmetic, comparison, and logical operators whose operands are
//! literals, applying the same numeric-promotion and truthiness rules the VM
//! applies at runtime. Anything that would fail at runtime (type mismatch,
//! division by zero) is left unfolded so the error still surfaces there.

use crate::ast::{BinaryOp, Expr, Literal, MatchArm, Stmt, SwitchCase, UnaryOp};

use super::types::OptimizationStats;

/// Fold constants in every expression position of a statement list
pub(super) fn fold_statements(stmts: &[Stmt], stats: &mut OptimizationStats) -> Vec<Stmt> {
    stmts.iter().map(|s| fold_stmt(s, stats)).collect()
}

fn fold_block(stmts: &[Stmt], stats: &mut OptimizationStats) -> Vec<Stmt> {
    fold_statements(stmts, stats)
}

fn fold_stmt(stmt: &Stmt, stats: &mut OptimizationStats) -> Stmt {
    match stmt {
        Stmt::Assign { name, value } => Stmt::Assign {
            name: name.clone(),
            value: fold_expr(value, stats),
        },
        Stmt::Reassign { name, value } => Stmt::Reassign {
            name: name.clone(),
            value: fold_expr(value, stats),
        },
        Stmt::Return(value) => Stmt::Return(fold_expr(value, stats)),
        Stmt::If {
            condition,
            then_block,
            else_block,
        } => Stmt::If {
            condition: fold_expr(condition, stats),
            then_block: fold_block(then_block, stats),
            else_block: else_block.as_ref().map(|b| fold_block(b, stats)),
        },
        Stmt::While { condition, body } => Stmt::While {
            condition: fold_expr(condition, stats),
            body: fold_block(body, stats),
        },
        Stmt::For {
            key,
            value,
            iterable,
            body,
        } => Stmt::For {
            key: key.clone(),
            value: value.clone(),
            iterable: fold_expr(iterable, stats),
            body: fold_block(body, stats),
        },
        Stmt::Switch {
            scrutinee,
            cases,
            default,
        } => Stmt::Switch {
            scrutinee: fold_expr(scrutinee, stats),
            cases: cases
                .iter()
                .map(|case| SwitchCase {
                    value: fold_expr(&case.value, stats),
                    body: fold_block(&case.body, stats),
                })
                .collect(),
            default: default.as_ref().map(|b| fold_block(b, stats)),
        },
        Stmt::Expression(expr) => Stmt::Expression(fold_expr(expr, stats)),
        Stmt::Break | Stmt::Continue | Stmt::Validation { .. } => stmt.clone(),
    }
}

/// Fold one expression bottom-up
pub(super) fn fold_expr(expr: &Expr, stats: &mut OptimizationStats) -> Expr {
    match expr {
        Expr::Binary { op, lhs, rhs } => {
            let lhs = fold_expr(lhs, stats);
            let rhs = fold_expr(rhs, stats);
            if let (Expr::Literal(a), Expr::Literal(b)) = (&lhs, &rhs) {
                if let Some(folded) = fold_binary(*op, a, b) {
                    stats.constants_folded += 1;
                    return Expr::Literal(folded);
                }
            }
            Expr::Binary {
                op: *op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            }
        }
        Expr::Unary { op, operand } => {
            let operand = fold_expr(operand, stats);
            if let Expr::Literal(lit) = &operand {
                if let Some(folded) = fold_unary(*op, lit) {
                    stats.constants_folded += 1;
                    return Expr::Literal(folded);
                }
            }
            Expr::Unary {
                op: *op,
                operand: Box::new(operand),
            }
        }
        Expr::Array(items) => Expr::Array(items.iter().map(|e| fold_expr(e, stats)).collect()),
        Expr::Object(fields) => Expr::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), fold_expr(v, stats)))
                .collect(),
        ),
        Expr::FieldAccess { object, field } => Expr::FieldAccess {
            object: Box::new(fold_expr(object, stats)),
            field: field.clone(),
        },
        Expr::Index { collection, index } => Expr::Index {
            collection: Box::new(fold_expr(collection, stats)),
            index: Box::new(fold_expr(index, stats)),
        },
        Expr::Call { name, args } => Expr::Call {
            name: name.clone(),
            args: args.iter().map(|e| fold_expr(e, stats)).collect(),
        },
        Expr::Match { scrutinee, arms } => Expr::Match {
            scrutinee: Box::new(fold_expr(scrutinee, stats)),
            arms: arms
                .iter()
                .map(|arm| MatchArm {
                    pattern: arm.pattern.clone(),
                    guard: arm.guard.as_ref().map(|g| fold_expr(g, stats)),
                    body: fold_expr(&arm.body, stats),
                })
                .collect(),
        },
        Expr::Async(body) => Expr::Async(fold_block(body, stats)),
        Expr::Await(inner) => Expr::Await(Box::new(fold_expr(inner, stats))),
        Expr::Literal(_) | Expr::Variable(_) | Expr::Lambda { .. } => expr.clone(),
    }
}

/// Fold a binary operator over two literals, `None` when the operation is
/// not foldable (or would fail at runtime)
fn fold_binary(op: BinaryOp, lhs: &Literal, rhs: &Literal) -> Option<Literal> {
    use Literal::*;
    match op {
        BinaryOp::Add => match (lhs, rhs) {
            (Int(a), Int(b)) => a.checked_add(*b).map(Int),
            (Float(a), Float(b)) => Some(Float(a + b)),
            (Int(a), Float(b)) => Some(Float(*a as f64 + b)),
            (Float(a), Int(b)) => Some(Float(a + *b as f64)),
            (String(a), String(b)) => Some(String(format!("{}{}", a, b))),
            _ => None,
        },
        BinaryOp::Sub => match (lhs, rhs) {
            (Int(a), Int(b)) => a.checked_sub(*b).map(Int),
            (Float(a), Float(b)) => Some(Float(a - b)),
            (Int(a), Float(b)) => Some(Float(*a as f64 - b)),
            (Float(a), Int(b)) => Some(Float(a - *b as f64)),
            _ => None,
        },
        BinaryOp::Mul => match (lhs, rhs) {
            (Int(a), Int(b)) => a.checked_mul(*b).map(Int),
            (Float(a), Float(b)) => Some(Float(a * b)),
            (Int(a), Float(b)) => Some(Float(*a as f64 * b)),
            (Float(a), Int(b)) => Some(Float(a * *b as f64)),
            _ => None,
        },
        BinaryOp::Div => match (lhs, rhs) {
            // Division by a zero divisor is a runtime error; leave it alone
            (_, Int(0)) => None,
            (_, Float(z)) if *z == 0.0 => None,
            (Int(a), Int(b)) => a.checked_div(*b).map(Int),
            (Float(a), Float(b)) => Some(Float(a / b)),
            (Int(a), Float(b)) => Some(Float(*a as f64 / b)),
            (Float(a), Int(b)) => Some(Float(a / *b as f64)),
            _ => None,
        },
        BinaryOp::Shl => match (lhs, rhs) {
            (Int(a), Int(b)) if (0..64).contains(b) => Some(Int(a.wrapping_shl(*b as u32))),
            _ => None,
        },
        BinaryOp::Shr => match (lhs, rhs) {
            (Int(a), Int(b)) if (0..64).contains(b) => Some(Int(a.wrapping_shr(*b as u32))),
            _ => None,
        },
        BinaryOp::Eq => Some(Bool(lhs.to_value() == rhs.to_value())),
        BinaryOp::Ne => Some(Bool(lhs.to_value() != rhs.to_value())),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = compare_literals(lhs, rhs)?;
            Some(Bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
        BinaryOp::And => Some(Bool(
            lhs.to_value().is_truthy() && rhs.to_value().is_truthy(),
        )),
        BinaryOp::Or => Some(Bool(
            lhs.to_value().is_truthy() || rhs.to_value().is_truthy(),
        )),
    }
}

/// Ordering between two literals, defined only on numerics and strings
fn compare_literals(lhs: &Literal, rhs: &Literal) -> Option<std::cmp::Ordering> {
    use Literal::*;
    match (lhs, rhs) {
        (Int(a), Int(b)) => Some(a.cmp(b)),
        (Float(a), Float(b)) => a.partial_cmp(b),
        (Int(a), Float(b)) => (*a as f64).partial_cmp(b),
        (Float(a), Int(b)) => a.partial_cmp(&(*b as f64)),
        (String(a), String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn fold_unary(op: UnaryOp, lit: &Literal) -> Option<Literal> {
    match op {
        UnaryOp::Neg => match lit {
            Literal::Int(n) => n.checked_neg().map(Literal::Int),
            Literal::Float(f) => Some(Literal::Float(-f)),
            _ => None,
        },
        UnaryOp::Not => Some(Literal::Bool(!lit.to_value().is_truthy())),
    }
}
