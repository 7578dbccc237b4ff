//! GlyphCore - compilation and execution core of the Glyph language
//!
//! Glyph is a small declarative language for HTTP routes, WebSocket routes,
//! CLI commands, scheduled tasks, event handlers, and queue workers. This
//! crate takes a pre-parsed module and turns each entry point into a compact
//! binary bytecode program, then executes programs on a stack-based virtual
//! machine, one result value per entry point.
//!
//! # Pipeline
//!
//! 1. **AST in** ([`ast`]) - the parser is an external collaborator.
//! 2. **Macro expansion** ([`macros`]) - a host-provided AST-to-AST pass.
//! 3. **Optimization** ([`bytecode::optimizer`]) - pure AST rewriting at a
//!    configurable level (`None`, `Basic`, `Aggressive`).
//! 4. **Compilation** ([`bytecode::compiler`]) - emission into the `GLYP`
//!    container with a deduplicated constant pool and absolute jump offsets.
//! 5. **Execution** ([`bytecode::vm`]) - synchronous, single-threaded
//!    dispatch; host functions and the WebSocket room registry sit behind
//!    registries the host supplies ([`bytecode::host`]).
//!
//! The compiled [`bytecode::program::BytecodeProgram`] is immutable and can
//! be shared across concurrent invocations; each invocation gets its own
//! [`bytecode::vm::Vm`].
//!
//! # Example
//!
//! ```
//! use glyphcore::ast::{BinaryOp, Expr, Literal, Route, Stmt};
//! use glyphcore::{Compiler, Value, Vm};
//!
//! // return 40 + 2
//! let route = Route {
//!     method: "GET".to_string(),
//!     path: "/answer".to_string(),
//!     injections: vec![],
//!     auth: None,
//!     body: vec![Stmt::Return(Expr::Binary {
//!         op: BinaryOp::Add,
//!         lhs: Box::new(Expr::Literal(Literal::Int(40))),
//!         rhs: Box::new(Expr::Literal(Literal::Int(2))),
//!     })],
//! };
//!
//! let mut compiler = Compiler::new();
//! let program = compiler.compile_route(&route).unwrap();
//!
//! let mut vm = Vm::new(program);
//! assert_eq!(vm.execute().unwrap(), Value::Int(42));
//! ```

pub mod ast;
pub mod bytecode;
pub mod macros;
pub mod value;

pub use bytecode::compiler::{
    CompileResult, CompiledModule, Compiler, SemanticError, WebSocketHandlers,
};
pub use bytecode::host::{HostError, HostRegistry, WebSocketHost};
pub use bytecode::opcodes::Opcode;
pub use bytecode::optimizer::{OptLevel, Optimizer};
pub use bytecode::program::{BytecodeProgram, ContainerError, ProgramBuilder};
pub use bytecode::vm::{Vm, VmConfig, VmError, VmResult};
pub use macros::{MacroExpander, NoopExpander};
pub use value::Value;
