//! Bytecode compilation and execution
//!
//! This module is the compilation and execution core of the language: a
//! bytecode compiler and a stack-based virtual machine, plus everything
//! between them.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                  Parsed module (AST)                      │
//! └───────────────────────────────────────────────────────────┘
//!                             │
//!                             ▼
//! ┌───────────────────────────────────────────────────────────┐
//! │          Macro expansion (host pass, AST → AST)           │
//! └───────────────────────────────────────────────────────────┘
//!                             │
//!                             ▼
//! ┌───────────────────────────────────────────────────────────┐
//! │        Optimizer (None / Basic / Aggressive)              │
//! └───────────────────────────────────────────────────────────┘
//!                             │
//!                             ▼
//! ┌───────────────────────────────────────────────────────────┐
//! │   Compiler: symbol table · loop frames · jump patching    │
//! │          AST → BytecodeProgram (GLYP container)           │
//! └───────────────────────────────────────────────────────────┘
//!                             │
//!                             ▼
//! ┌───────────────────────────────────────────────────────────┐
//! │   VM: operand stack · locals frame · iterator table       │
//! │        host functions · WebSocket dispatch                │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`opcodes`]: instruction set
//! - [`program`]: container format, builder, disassembler
//! - [`symbols`]: lexically scoped symbol table
//! - [`optimizer`]: AST-to-AST pre-pass
//! - [`compiler`]: entry-point compilation
//! - [`patterns`]: `match` lowering
//! - [`websocket`]: `ws.*` intrinsic table
//! - [`vm`]: execution engine
//! - [`host`]: host-function registry and WebSocket host trait
//! - [`shims`]: entry-point locals pre-population
//! - [`cache`]: compiled-program LRU cache
//!
//! # Example
//!
//! ```
//! use glyphcore::ast::{Expr, Literal, Route, Stmt};
//! use glyphcore::bytecode::compiler::Compiler;
//! use glyphcore::bytecode::vm::Vm;
//! use glyphcore::value::Value;
//!
//! let route = Route {
//!     method: "GET".to_string(),
//!     path: "/answer".to_string(),
//!     injections: vec![],
//!     auth: None,
//!     body: vec![Stmt::Return(Expr::Literal(Literal::Int(42)))],
//! };
//!
//! let mut compiler = Compiler::new();
//! let program = compiler.compile_route(&route).unwrap();
//! let mut vm = Vm::new(program);
//! assert_eq!(vm.execute().unwrap(), Value::Int(42));
//! ```

pub mod cache;
pub mod compiler;
pub mod host;
pub mod opcodes;
pub mod optimizer;
pub mod patterns;
pub mod program;
pub mod shims;
pub mod symbols;
pub mod vm;
pub mod websocket;
