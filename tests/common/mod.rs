//! Shared helpers for integration tests: terse AST constructors and
//! tracing initialization.

#![allow(dead_code)]

use std::sync::Once;

use glyphcore::ast::{BinaryOp, Expr, Literal, Route, Stmt, UnaryOp};

static INIT: Once = Once::new();

/// Initialize tracing once per test binary; `RUST_LOG` controls verbosity
pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn int(n: i64) -> Expr {
    Expr::Literal(Literal::Int(n))
}

pub fn float(f: f64) -> Expr {
    Expr::Literal(Literal::Float(f))
}

pub fn string(s: &str) -> Expr {
    Expr::Literal(Literal::String(s.to_string()))
}

pub fn boolean(b: bool) -> Expr {
    Expr::Literal(Literal::Bool(b))
}

pub fn null() -> Expr {
    Expr::Literal(Literal::Null)
}

pub fn var(name: &str) -> Expr {
    Expr::Variable(name.to_string())
}

pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

pub fn unary(op: UnaryOp, operand: Expr) -> Expr {
    Expr::Unary {
        op,
        operand: Box::new(operand),
    }
}

pub fn array(items: Vec<Expr>) -> Expr {
    Expr::Array(items)
}

pub fn index(collection: Expr, idx: Expr) -> Expr {
    Expr::Index {
        collection: Box::new(collection),
        index: Box::new(idx),
    }
}

pub fn field(object: Expr, name: &str) -> Expr {
    Expr::FieldAccess {
        object: Box::new(object),
        field: name.to_string(),
    }
}

pub fn call(name: &str, args: Vec<Expr>) -> Expr {
    Expr::Call {
        name: name.to_string(),
        args,
    }
}

pub fn assign(name: &str, value: Expr) -> Stmt {
    Stmt::Assign {
        name: name.to_string(),
        value,
    }
}

pub fn reassign(name: &str, value: Expr) -> Stmt {
    Stmt::Reassign {
        name: name.to_string(),
        value,
    }
}

pub fn ret(value: Expr) -> Stmt {
    Stmt::Return(value)
}

/// A GET route at `/test` with no injections
pub fn test_route(body: Vec<Stmt>) -> Route {
    Route {
        method: "GET".to_string(),
        path: "/test".to_string(),
        injections: vec![],
        auth: None,
        body,
    }
}

/// A GET route at `/test` with the given injections
pub fn test_route_with(injections: &[&str], body: Vec<Stmt>) -> Route {
    Route {
        method: "GET".to_string(),
        path: "/test".to_string(),
        injections: injections.iter().map(|s| s.to_string()).collect(),
        auth: None,
        body,
    }
}
