//! Bytecode compiler for Glyph entry points
//!
//! Walks an optimized AST and emits opcodes into a [`ProgramBuilder`],
//! interning every literal and identifier name through the constant pool.
//! Each entry point (route, command, cron task, event handler, queue worker,
//! WebSocket event) compiles to its own self-contained program.
//!
//! # Entry-point shape
//!
//! Every entry compile resets the compiler state, enters a fresh
//! `Route`-level scope, pre-defines the names the host will inject, runs the
//! macro expander and the optimizer over the body, walks it, and appends a
//! trailing `Halt` unless the body already ends in `return`. The configured
//! optimizer level survives the reset.
//!
//! # Loop frames
//!
//! `break`/`continue` are tracked with an explicit stack of loop frames,
//! each carrying the `continue` target offset and the pending `break`
//! placeholders. Emitting either outside a loop is a compile error.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;
use tracing::debug;

use crate::ast::{
    BinaryOp, Command, CronTask, EventHandler, Expr, FunctionDecl, Module, QueueWorker, Route,
    Stmt, SwitchCase, TypeDef, UnaryOp, WebSocketRoute,
};
use crate::macros::{MacroExpander, NoopExpander};
use crate::value::Value;

use super::cache;
use super::opcodes::Opcode;
use super::optimizer::{OptLevel, Optimizer};
use super::patterns;
use super::program::{BytecodeProgram, JumpLabel, ProgramBuilder};
use super::shims::extract_path_params;
use super::symbols::{ScopeKind, SymbolTable};
use super::websocket;

/// Compile-time (semantic) errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SemanticError {
    /// A referenced variable is not in scope
    UndefinedVariable(String),
    /// Declaration of a name already bound in the same scope
    CannotRedeclare(String),
    /// Reassignment of a name that was never declared
    CannotAssignUndeclared(String),
    /// `break`/`continue` outside any loop
    NotInLoop(&'static str),
    /// AST expression kind the compiler does not lower
    UnsupportedExpression(&'static str),
    /// AST statement kind the compiler does not lower
    UnsupportedStatement(&'static str),
    /// Reserved operator value reached lowering
    UnsupportedOperator(String),
    /// Wrong argument count for a WebSocket intrinsic
    ArityMismatch {
        function: String,
        expected: &'static str,
        got: usize,
    },
    /// `Compile` over a module that declares nothing
    EmptyModule,
}

impl fmt::Display for SemanticError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UndefinedVariable(name) => write!(f, "undefined variable '{}'", name),
            Self::CannotRedeclare(name) => {
                write!(f, "cannot redeclare variable '{}' in the same scope", name)
            }
            Self::CannotAssignUndeclared(name) => {
                write!(f, "cannot assign to undeclared variable '{}'", name)
            }
            Self::NotInLoop(kind) => write!(f, "'{}' outside of a loop", kind),
            Self::UnsupportedExpression(kind) => {
                write!(f, "unsupported expression type: {}", kind)
            }
            Self::UnsupportedStatement(kind) => {
                write!(f, "unsupported statement type: {}", kind)
            }
            Self::UnsupportedOperator(op) => write!(f, "unsupported operator: {}", op),
            Self::ArityMismatch {
                function,
                expected,
                got,
            } => write!(
                f,
                "{} expects {} argument(s), got {}",
                function, expected, got
            ),
            Self::EmptyModule => write!(f, "cannot compile an empty module"),
        }
    }
}

impl std::error::Error for SemanticError {}

/// Result type for compilation
pub type CompileResult<T> = Result<T, SemanticError>;

/// Compiler-side bookkeeping for one enclosing loop
#[derive(Debug)]
struct LoopFrame {
    /// Block-relative offset `continue` jumps to
    continue_target: usize,
    /// Pending `break` placeholders, patched when the loop closes
    breaks: SmallVec<[JumpLabel; 4]>,
}

/// The four compiled handlers of a WebSocket route
#[derive(Debug, Clone, Default)]
pub struct WebSocketHandlers {
    pub connect: Option<Arc<BytecodeProgram>>,
    pub message: Option<Arc<BytecodeProgram>>,
    pub disconnect: Option<Arc<BytecodeProgram>>,
    pub error: Option<Arc<BytecodeProgram>>,
}

/// Output of [`Compiler::compile_module`]
#[derive(Debug, Clone, Default)]
pub struct CompiledModule {
    /// `"METHOD /path"` to program
    pub routes: HashMap<String, Arc<BytecodeProgram>>,
    /// WebSocket path to its four handlers
    pub websockets: HashMap<String, WebSocketHandlers>,
    /// Command name to program
    pub commands: HashMap<String, Arc<BytecodeProgram>>,
    /// Cron task name to program
    pub cron_tasks: HashMap<String, Arc<BytecodeProgram>>,
    /// Event name to program
    pub event_handlers: HashMap<String, Arc<BytecodeProgram>>,
    /// Queue name to program
    pub queue_workers: HashMap<String, Arc<BytecodeProgram>>,
    /// Type name to declaration
    pub types: HashMap<String, TypeDef>,
}

/// The bytecode compiler
pub struct Compiler {
    pub(crate) builder: ProgramBuilder,
    pub(crate) symbols: SymbolTable,
    loops: Vec<LoopFrame>,
    level: OptLevel,
    functions: HashMap<String, FunctionDecl>,
    expander: Box<dyn MacroExpander>,
    synth_counter: u32,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    /// Create a compiler at the default optimization level
    pub fn new() -> Self {
        Self::with_optimization(OptLevel::default())
    }

    /// Create a compiler at an explicit optimization level
    pub fn with_optimization(level: OptLevel) -> Self {
        Self {
            builder: ProgramBuilder::new(),
            symbols: SymbolTable::new(),
            loops: Vec::new(),
            level,
            functions: HashMap::new(),
            expander: Box::new(NoopExpander),
            synth_counter: 0,
        }
    }

    /// The configured optimization level
    #[inline]
    pub fn optimization_level(&self) -> OptLevel {
        self.level
    }

    /// Attach a macro-expansion pass, run on every body before optimization
    pub fn set_macro_expander(&mut self, expander: Box<dyn MacroExpander>) {
        self.expander = expander;
    }

    /// Compile a module's first route, or a halt-only program when the
    /// module declares no routes; errors when the module declares nothing
    pub fn compile(&mut self, module: &Module) -> CompileResult<Arc<BytecodeProgram>> {
        if module.is_empty() {
            return Err(SemanticError::EmptyModule);
        }
        self.load_functions(module);
        if let Some(route) = module.routes.first() {
            return self.compile_route(route);
        }
        // Type-definition-only (and routeless) modules still produce a
        // runnable image
        self.reset();
        self.builder.emit(Opcode::Halt);
        Ok(std::mem::take(&mut self.builder).build_arc())
    }

    /// Compile an HTTP route
    pub fn compile_route(&mut self, route: &Route) -> CompileResult<Arc<BytecodeProgram>> {
        debug!(
            target: "glyphcore::compiler",
            method = %route.method,
            path = %route.path,
            "compiling route"
        );
        let mut names = extract_path_params(&route.path);
        names.extend(route.injections.iter().cloned());
        names.extend(["query".to_string(), "input".to_string(), "ws".to_string()]);
        if route.auth.is_some() {
            names.push("auth".to_string());
        }
        self.compile_entry(&names, &route.body)
    }

    /// Compile a CLI command
    pub fn compile_command(&mut self, command: &Command) -> CompileResult<Arc<BytecodeProgram>> {
        debug!(target: "glyphcore::compiler", name = %command.name, "compiling command");
        self.compile_entry(&command.params, &command.body)
    }

    /// Compile a scheduled task
    pub fn compile_cron_task(&mut self, task: &CronTask) -> CompileResult<Arc<BytecodeProgram>> {
        debug!(target: "glyphcore::compiler", name = %task.name, "compiling cron task");
        self.compile_entry(&task.injections, &task.body)
    }

    /// Compile an event handler
    pub fn compile_event_handler(
        &mut self,
        handler: &EventHandler,
    ) -> CompileResult<Arc<BytecodeProgram>> {
        debug!(target: "glyphcore::compiler", event = %handler.event, "compiling event handler");
        let mut names = vec!["event".to_string(), "input".to_string()];
        names.extend(handler.injections.iter().cloned());
        self.compile_entry(&names, &handler.body)
    }

    /// Compile a queue worker
    pub fn compile_queue_worker(
        &mut self,
        worker: &QueueWorker,
    ) -> CompileResult<Arc<BytecodeProgram>> {
        debug!(target: "glyphcore::compiler", queue = %worker.queue, "compiling queue worker");
        let mut names = vec!["message".to_string(), "input".to_string()];
        names.extend(worker.injections.iter().cloned());
        self.compile_entry(&names, &worker.body)
    }

    /// Compile a WebSocket route into its four-handler record
    pub fn compile_websocket_route(
        &mut self,
        route: &WebSocketRoute,
    ) -> CompileResult<WebSocketHandlers> {
        debug!(target: "glyphcore::compiler", path = %route.path, "compiling websocket route");
        let mut names = vec!["ws".to_string(), "input".to_string(), "client".to_string()];
        names.extend(extract_path_params(&route.path));
        names.extend(route.injections.iter().cloned());

        let mut handlers = WebSocketHandlers::default();
        if let Some(body) = &route.connect {
            handlers.connect = Some(self.compile_entry(&names, body)?);
        }
        if let Some(body) = &route.message {
            handlers.message = Some(self.compile_entry(&names, body)?);
        }
        if let Some(body) = &route.disconnect {
            handlers.disconnect = Some(self.compile_entry(&names, body)?);
        }
        if let Some(body) = &route.error {
            handlers.error = Some(self.compile_entry(&names, body)?);
        }
        Ok(handlers)
    }

    /// Compile every entry point of a module
    ///
    /// Route and command programs are served from the compiled-program cache
    /// when an identical entry was compiled before at the same level
    /// (compilation is deterministic, so cached images are byte-identical to
    /// fresh ones).
    pub fn compile_module(&mut self, module: &Module) -> CompileResult<CompiledModule> {
        if module.is_empty() {
            return Err(SemanticError::EmptyModule);
        }
        self.load_functions(module);

        let mut compiled = CompiledModule::default();
        for route in &module.routes {
            let key = format!("{} {}", route.method, route.path);
            let program = self.cached(route, |c, r| c.compile_route(r))?;
            compiled.routes.insert(key, program);
        }
        for ws in &module.websockets {
            compiled
                .websockets
                .insert(ws.path.clone(), self.compile_websocket_route(ws)?);
        }
        for command in &module.commands {
            let program = self.cached(command, |c, x| c.compile_command(x))?;
            compiled.commands.insert(command.name.clone(), program);
        }
        for task in &module.cron_tasks {
            let program = self.cached(task, |c, x| c.compile_cron_task(x))?;
            compiled.cron_tasks.insert(task.name.clone(), program);
        }
        for handler in &module.event_handlers {
            let program = self.cached(handler, |c, x| c.compile_event_handler(x))?;
            compiled.event_handlers.insert(handler.event.clone(), program);
        }
        for worker in &module.queue_workers {
            let program = self.cached(worker, |c, x| c.compile_queue_worker(x))?;
            compiled.queue_workers.insert(worker.queue.clone(), program);
        }
        for ty in &module.types {
            compiled.types.insert(ty.name.clone(), ty.clone());
        }
        Ok(compiled)
    }

    fn cached<T: std::hash::Hash>(
        &mut self,
        entry: &T,
        compile: impl FnOnce(&mut Self, &T) -> CompileResult<Arc<BytecodeProgram>>,
    ) -> CompileResult<Arc<BytecodeProgram>> {
        // The function table participates in the key: inlining makes the
        // emitted bytecode depend on it, not just on the entry's own AST
        let mut functions: Vec<(&String, &FunctionDecl)> = self.functions.iter().collect();
        functions.sort_by(|a, b| a.0.cmp(b.0));
        let key = cache::fingerprint(&(self.level, functions, entry));
        if let Some(program) = cache::lookup(key) {
            return Ok(program);
        }
        let program = compile(self, entry)?;
        cache::insert(key, program.clone());
        Ok(program)
    }

    fn load_functions(&mut self, module: &Module) {
        self.functions = module
            .functions
            .iter()
            .map(|f| (f.name.clone(), f.clone()))
            .collect();
    }

    /// Reset per-entry state; the optimizer level, function table, and
    /// macro expander survive
    fn reset(&mut self) {
        self.builder = ProgramBuilder::new();
        self.symbols = SymbolTable::new();
        self.loops.clear();
        self.synth_counter = 0;
    }

    /// Shared shape of every entry-point compile
    fn compile_entry(
        &mut self,
        predefined: &[String],
        body: &[Stmt],
    ) -> CompileResult<Arc<BytecodeProgram>> {
        self.reset();
        self.symbols.enter_scope(ScopeKind::Route);
        for name in predefined {
            self.predefine(name);
        }

        let body = self.expander.expand(body.to_vec());
        let mut optimizer =
            Optimizer::new(self.level).with_functions(self.functions.values().cloned());
        let body = optimizer.optimize_statements(&body);

        let depth = self.symbols.depth();
        self.compile_statements(&body)?;
        debug_assert_eq!(self.symbols.depth(), depth, "scope leak in entry body");

        if !matches!(body.last(), Some(Stmt::Return(_))) {
            self.builder.emit(Opcode::Halt);
        }
        self.symbols.exit_scope();
        Ok(std::mem::take(&mut self.builder).build_arc())
    }

    /// Declare a host-injected name without emitting a store
    fn predefine(&mut self, name: &str) {
        let index = self.builder.add_constant(Value::string(name));
        self.symbols.define(name, index);
    }

    /// Bind `name` in the active scope, reusing an existing same-scope
    /// binding's slot if present
    pub(crate) fn define_local(&mut self, name: &str) -> u32 {
        if let Some(symbol) = self.symbols.resolve_local(name) {
            return symbol.constant_index;
        }
        let index = self.builder.add_constant(Value::string(name));
        self.symbols.define(name, index);
        index
    }

    /// Create a fresh synthetic local, store the stack top into it, and
    /// return its slot
    pub(crate) fn define_synthetic(&mut self, prefix: &str) -> u32 {
        let name = format!("__{}_{}", prefix, self.synth_counter);
        self.synth_counter += 1;
        let index = self.builder.add_constant(Value::string(&name));
        self.symbols.define(&name, index);
        self.builder.emit_with(Opcode::StoreVar, index);
        index
    }

    fn compile_statements(&mut self, stmts: &[Stmt]) -> CompileResult<()> {
        for stmt in stmts {
            self.compile_stmt(stmt)?;
        }
        Ok(())
    }

    /// Compile a nested block in its own scope
    fn compile_block(&mut self, stmts: &[Stmt]) -> CompileResult<()> {
        self.symbols.enter_scope(ScopeKind::Block);
        let result = self.compile_statements(stmts);
        self.symbols.exit_scope();
        result
    }

    fn compile_stmt(&mut self, stmt: &Stmt) -> CompileResult<()> {
        match stmt {
            Stmt::Assign { name, value } => {
                if self.symbols.resolve_local(name).is_some() {
                    return Err(SemanticError::CannotRedeclare(name.clone()));
                }
                self.compile_expr(value)?;
                let index = self.builder.add_constant(Value::string(name));
                self.builder.emit_with(Opcode::StoreVar, index);
                self.symbols.define(name, index);
                Ok(())
            }
            Stmt::Reassign { name, value } => {
                let Some(symbol) = self.symbols.resolve(name).cloned() else {
                    return Err(SemanticError::CannotAssignUndeclared(name.clone()));
                };
                self.compile_expr(value)?;
                self.builder
                    .emit_with(Opcode::StoreVar, symbol.constant_index);
                Ok(())
            }
            Stmt::Return(value) => {
                self.compile_expr(value)?;
                self.builder.emit(Opcode::Return);
                Ok(())
            }
            Stmt::If {
                condition,
                then_block,
                else_block,
            } => {
                self.compile_expr(condition)?;
                let else_jump = self.builder.emit_jump(Opcode::JumpIfFalse);
                self.compile_block(then_block)?;
                let end_jump = self.builder.emit_jump(Opcode::Jump);
                self.builder.patch_jump(else_jump);
                if let Some(block) = else_block {
                    self.compile_block(block)?;
                }
                self.builder.patch_jump(end_jump);
                Ok(())
            }
            Stmt::While { condition, body } => {
                let top = self.builder.current_offset();
                self.compile_expr(condition)?;
                let after = self.builder.emit_jump(Opcode::JumpIfFalse);

                self.loops.push(LoopFrame {
                    continue_target: top,
                    breaks: SmallVec::new(),
                });
                let result = self.compile_block(body);
                let frame = self.loops.pop().expect("loop frame pushed above");
                result?;

                self.builder.emit_jump_to(Opcode::Jump, top);
                self.builder.patch_jump(after);
                for label in frame.breaks {
                    self.builder.patch_jump(label);
                }
                Ok(())
            }
            Stmt::For {
                key,
                value,
                iterable,
                body,
            } => self.compile_for(key.as_deref(), value, iterable, body),
            Stmt::Switch {
                scrutinee,
                cases,
                default,
            } => {
                self.symbols.enter_scope(ScopeKind::Block);
                let result = self.compile_switch(scrutinee, cases, default.as_deref());
                self.symbols.exit_scope();
                result
            }
            Stmt::Break => {
                if self.loops.is_empty() {
                    return Err(SemanticError::NotInLoop("break"));
                }
                let label = self.builder.emit_jump(Opcode::Jump);
                self.loops
                    .last_mut()
                    .expect("loop stack checked above")
                    .breaks
                    .push(label);
                Ok(())
            }
            Stmt::Continue => {
                let Some(frame) = self.loops.last() else {
                    return Err(SemanticError::NotInLoop("continue"));
                };
                let target = frame.continue_target;
                self.builder.emit_jump_to(Opcode::Jump, target);
                Ok(())
            }
            Stmt::Expression(expr) => {
                self.compile_expr(expr)?;
                self.builder.emit(Opcode::Pop);
                Ok(())
            }
            // Enforced before entry; nothing to execute here
            Stmt::Validation { .. } => Ok(()),
        }
    }

    fn compile_for(
        &mut self,
        key: Option<&str>,
        value: &str,
        iterable: &Expr,
        body: &[Stmt],
    ) -> CompileResult<()> {
        self.compile_expr(iterable)?;
        self.builder.emit(Opcode::GetIter);
        let iter_slot = self.define_synthetic("iter");

        let top = self.builder.current_offset();
        self.builder.emit_with(Opcode::LoadVar, iter_slot);
        self.builder.emit(Opcode::IterHasNext);
        let after = self.builder.emit_jump(Opcode::JumpIfFalse);

        self.builder.emit_with(Opcode::LoadVar, iter_slot);
        self.builder
            .emit_with(Opcode::IterNext, if key.is_some() { 1 } else { 0 });

        // Loop variables live in the loop's own scope
        self.symbols.enter_scope(ScopeKind::Block);
        let value_slot = self.define_local(value);
        self.builder.emit_with(Opcode::StoreVar, value_slot);
        if let Some(key_name) = key {
            let key_slot = self.define_local(key_name);
            self.builder.emit_with(Opcode::StoreVar, key_slot);
        }

        self.loops.push(LoopFrame {
            continue_target: top,
            breaks: SmallVec::new(),
        });
        let result = self.compile_statements(body);
        let frame = self.loops.pop().expect("loop frame pushed above");
        self.symbols.exit_scope();
        result?;

        self.builder.emit_jump_to(Opcode::Jump, top);
        self.builder.patch_jump(after);
        for label in frame.breaks {
            self.builder.patch_jump(label);
        }
        Ok(())
    }

    fn compile_switch(
        &mut self,
        scrutinee: &Expr,
        cases: &[SwitchCase],
        default: Option<&[Stmt]>,
    ) -> CompileResult<()> {
        self.compile_expr(scrutinee)?;
        let scrutinee_slot = self.define_synthetic("switch");

        let mut end_jumps: SmallVec<[JumpLabel; 4]> = SmallVec::new();
        for case in cases {
            self.builder.emit_with(Opcode::LoadVar, scrutinee_slot);
            self.compile_expr(&case.value)?;
            self.builder.emit(Opcode::Eq);
            let next = self.builder.emit_jump(Opcode::JumpIfFalse);
            self.compile_block(&case.body)?;
            end_jumps.push(self.builder.emit_jump(Opcode::Jump));
            self.builder.patch_jump(next);
        }
        if let Some(block) = default {
            self.compile_block(block)?;
        }
        for label in end_jumps {
            self.builder.patch_jump(label);
        }
        Ok(())
    }

    pub(crate) fn compile_expr(&mut self, expr: &Expr) -> CompileResult<()> {
        match expr {
            Expr::Literal(lit) => {
                self.builder.emit_constant(lit.to_value());
                Ok(())
            }
            Expr::Variable(name) => {
                let Some(symbol) = self.symbols.resolve(name) else {
                    return Err(SemanticError::UndefinedVariable(name.clone()));
                };
                if let (true, Some(value_index)) =
                    (symbol.is_constant, symbol.constant_value_index)
                {
                    self.builder.emit_with(Opcode::Push, value_index);
                } else {
                    let index = symbol.constant_index;
                    self.builder.emit_with(Opcode::LoadVar, index);
                }
                Ok(())
            }
            Expr::Binary { op, lhs, rhs } => {
                self.compile_expr(lhs)?;
                self.compile_expr(rhs)?;
                self.builder.emit(binary_opcode(*op));
                Ok(())
            }
            Expr::Unary { op, operand } => {
                self.compile_expr(operand)?;
                self.builder.emit(match op {
                    UnaryOp::Neg => Opcode::Neg,
                    UnaryOp::Not => Opcode::Not,
                });
                Ok(())
            }
            Expr::Array(items) => {
                for item in items {
                    self.compile_expr(item)?;
                }
                self.builder.emit_with(Opcode::BuildArray, items.len() as u32);
                Ok(())
            }
            Expr::Object(fields) => {
                for (field, value) in fields {
                    self.builder.emit_constant(Value::string(field));
                    self.compile_expr(value)?;
                }
                self.builder
                    .emit_with(Opcode::BuildObject, fields.len() as u32);
                Ok(())
            }
            Expr::FieldAccess { object, field } => {
                self.compile_expr(object)?;
                self.builder.emit_constant(Value::string(field));
                self.builder.emit(Opcode::GetField);
                Ok(())
            }
            Expr::Index { collection, index } => {
                self.compile_expr(collection)?;
                self.compile_expr(index)?;
                self.builder.emit(Opcode::GetIndex);
                Ok(())
            }
            Expr::Call { name, args } => {
                if name.starts_with("ws.") && websocket::compile_ws_call(self, name, args)? {
                    return Ok(());
                }
                self.builder.emit_constant(Value::string(name));
                for arg in args {
                    self.compile_expr(arg)?;
                }
                self.builder.emit_with(Opcode::Call, args.len() as u32);
                Ok(())
            }
            Expr::Match { scrutinee, arms } => patterns::compile_match(self, scrutinee, arms),
            Expr::Async(body) => self.compile_async_block(body),
            Expr::Await(inner) => {
                self.compile_expr(inner)?;
                self.builder.emit(Opcode::Await);
                Ok(())
            }
            Expr::Lambda { .. } => Err(SemanticError::UnsupportedExpression("lambda")),
        }
    }

    /// `async { ... }` compiles inline: the block's last expression is its
    /// value, and the host wraps the result at the VM boundary
    fn compile_async_block(&mut self, body: &[Stmt]) -> CompileResult<()> {
        self.symbols.enter_scope(ScopeKind::Block);
        let result: CompileResult<()> = (|| {
            match body.split_last() {
                Some((Stmt::Expression(last), rest)) => {
                    self.compile_statements(rest)?;
                    self.compile_expr(last)?;
                }
                Some((last, rest)) => {
                    self.compile_statements(rest)?;
                    self.compile_stmt(last)?;
                    self.builder.emit_constant(Value::Null);
                }
                None => {
                    self.builder.emit_constant(Value::Null);
                }
            }
            Ok(())
        })();
        self.symbols.exit_scope();
        result
    }
}

/// Opcode for a binary operator
fn binary_opcode(op: BinaryOp) -> Opcode {
    match op {
        BinaryOp::Add => Opcode::Add,
        BinaryOp::Sub => Opcode::Sub,
        BinaryOp::Mul => Opcode::Mul,
        BinaryOp::Div => Opcode::Div,
        BinaryOp::Eq => Opcode::Eq,
        BinaryOp::Ne => Opcode::Ne,
        BinaryOp::Lt => Opcode::Lt,
        BinaryOp::Le => Opcode::Le,
        BinaryOp::Gt => Opcode::Gt,
        BinaryOp::Ge => Opcode::Ge,
        BinaryOp::And => Opcode::And,
        BinaryOp::Or => Opcode::Or,
        BinaryOp::Shl => Opcode::Shl,
        BinaryOp::Shr => Opcode::Shr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Literal;

    fn int(n: i64) -> Expr {
        Expr::Literal(Literal::Int(n))
    }

    fn var(name: &str) -> Expr {
        Expr::Variable(name.to_string())
    }

    fn route(body: Vec<Stmt>) -> Route {
        Route {
            method: "GET".to_string(),
            path: "/test".to_string(),
            injections: vec![],
            auth: None,
            body,
        }
    }

    #[test]
    fn test_redeclaration_rejected() {
        let mut compiler = Compiler::with_optimization(OptLevel::None);
        let err = compiler
            .compile_route(&route(vec![
                Stmt::Assign {
                    name: "x".to_string(),
                    value: int(1),
                },
                Stmt::Assign {
                    name: "x".to_string(),
                    value: int(2),
                },
            ]))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot redeclare variable 'x' in the same scope"
        );
    }

    #[test]
    fn test_shadowing_in_block_allowed() {
        let mut compiler = Compiler::with_optimization(OptLevel::None);
        let result = compiler.compile_route(&route(vec![
            Stmt::Assign {
                name: "x".to_string(),
                value: int(1),
            },
            Stmt::If {
                condition: var("x"),
                then_block: vec![Stmt::Assign {
                    name: "x".to_string(),
                    value: int(2),
                }],
                else_block: None,
            },
            Stmt::Return(var("x")),
        ]));
        assert!(result.is_ok());
    }

    #[test]
    fn test_reassign_before_declare_rejected() {
        let mut compiler = Compiler::with_optimization(OptLevel::None);
        let err = compiler
            .compile_route(&route(vec![Stmt::Reassign {
                name: "y".to_string(),
                value: int(1),
            }]))
            .unwrap_err();
        assert_eq!(err.to_string(), "cannot assign to undeclared variable 'y'");
    }

    #[test]
    fn test_undefined_variable_rejected() {
        let mut compiler = Compiler::with_optimization(OptLevel::None);
        let err = compiler
            .compile_route(&route(vec![Stmt::Return(var("ghost"))]))
            .unwrap_err();
        assert_eq!(err, SemanticError::UndefinedVariable("ghost".to_string()));
    }

    #[test]
    fn test_break_outside_loop_rejected() {
        let mut compiler = Compiler::with_optimization(OptLevel::None);
        let err = compiler
            .compile_route(&route(vec![Stmt::Break]))
            .unwrap_err();
        assert_eq!(err, SemanticError::NotInLoop("break"));

        let err = compiler
            .compile_route(&route(vec![Stmt::Continue]))
            .unwrap_err();
        assert_eq!(err, SemanticError::NotInLoop("continue"));
    }

    #[test]
    fn test_lambda_unsupported() {
        let mut compiler = Compiler::with_optimization(OptLevel::None);
        let err = compiler
            .compile_route(&route(vec![Stmt::Return(Expr::Call {
                name: "map".to_string(),
                args: vec![Expr::Lambda {
                    params: vec!["x".to_string()],
                    body: Box::new(var("x")),
                }],
            })]))
            .unwrap_err();
        assert!(err.to_string().starts_with("unsupported expression type"));
    }

    #[test]
    fn test_empty_module_rejected() {
        let mut compiler = Compiler::new();
        let err = compiler.compile(&Module::default()).unwrap_err();
        assert!(err.to_string().contains("empty module"));
    }

    #[test]
    fn test_type_only_module_compiles_to_halt() {
        let mut compiler = Compiler::new();
        let module = Module {
            types: vec![TypeDef {
                name: "User".to_string(),
                fields: vec![("name".to_string(), "string".to_string())],
            }],
            ..Module::default()
        };
        let program = compiler.compile(&module).unwrap();
        assert_eq!(program.code(), &[Opcode::Halt.to_byte()]);
    }

    #[test]
    fn test_trailing_halt_only_without_return() {
        let mut compiler = Compiler::with_optimization(OptLevel::None);
        let program = compiler
            .compile_route(&route(vec![Stmt::Expression(int(1))]))
            .unwrap();
        assert_eq!(program.code().last(), Some(&Opcode::Halt.to_byte()));

        let program = compiler
            .compile_route(&route(vec![Stmt::Return(int(1))]))
            .unwrap();
        assert_eq!(program.code().last(), Some(&Opcode::Return.to_byte()));
    }

    #[test]
    fn test_determinism() {
        let body = vec![
            Stmt::Assign {
                name: "x".to_string(),
                value: int(1),
            },
            Stmt::While {
                condition: Expr::Binary {
                    op: BinaryOp::Lt,
                    lhs: Box::new(var("x")),
                    rhs: Box::new(int(10)),
                },
                body: vec![Stmt::Reassign {
                    name: "x".to_string(),
                    value: Expr::Binary {
                        op: BinaryOp::Add,
                        lhs: Box::new(var("x")),
                        rhs: Box::new(int(1)),
                    },
                }],
            },
            Stmt::Return(var("x")),
        ];
        let mut a = Compiler::with_optimization(OptLevel::Basic);
        let mut b = Compiler::with_optimization(OptLevel::Basic);
        let pa = a.compile_route(&route(body.clone())).unwrap();
        let pb = b.compile_route(&route(body)).unwrap();
        assert_eq!(pa.as_bytes(), pb.as_bytes());
    }

    #[test]
    fn test_constant_pool_shared_across_calls() {
        // Two calls to the same function with different variables must not
        // duplicate the function name constant
        let mut compiler = Compiler::with_optimization(OptLevel::None);
        let program = compiler
            .compile_route(&route(vec![
                Stmt::Assign {
                    name: "a".to_string(),
                    value: Expr::Call {
                        name: "map".to_string(),
                        args: vec![var("input")],
                    },
                },
                Stmt::Assign {
                    name: "b".to_string(),
                    value: Expr::Call {
                        name: "map".to_string(),
                        args: vec![var("input")],
                    },
                },
                Stmt::Return(var("b")),
            ]))
            .unwrap();
        let map_slots = program
            .constants()
            .iter()
            .filter(|c| matches!(c, Value::String(s) if s == "map"))
            .count();
        assert_eq!(map_slots, 1);
    }

    #[test]
    fn test_ws_arity_enforced_at_compile_time() {
        let mut compiler = Compiler::with_optimization(OptLevel::None);
        let err = compiler
            .compile_route(&route(vec![Stmt::Expression(Expr::Call {
                name: "ws.send".to_string(),
                args: vec![],
            })]))
            .unwrap_err();
        assert!(matches!(err, SemanticError::ArityMismatch { .. }));
    }

    #[test]
    fn test_validation_compiles_to_nothing() {
        let mut compiler = Compiler::with_optimization(OptLevel::None);
        let with_validation = compiler
            .compile_route(&route(vec![
                Stmt::Validation {
                    field: "email".to_string(),
                    rule: "required".to_string(),
                },
                Stmt::Return(int(1)),
            ]))
            .unwrap();
        let without = compiler
            .compile_route(&route(vec![Stmt::Return(int(1))]))
            .unwrap();
        assert_eq!(with_validation.as_bytes(), without.as_bytes());
    }

    #[test]
    fn test_macro_expander_runs_before_compilation() {
        /// Expands the placeholder `answer()` call into a literal
        struct AnswerExpander;

        impl crate::macros::MacroExpander for AnswerExpander {
            fn expand(&self, stmts: Vec<Stmt>) -> Vec<Stmt> {
                stmts
                    .into_iter()
                    .map(|stmt| match stmt {
                        Stmt::Return(Expr::Call { ref name, .. }) if name == "answer" => {
                            Stmt::Return(int(42))
                        }
                        other => other,
                    })
                    .collect()
            }
        }

        let mut compiler = Compiler::with_optimization(OptLevel::None);
        compiler.set_macro_expander(Box::new(AnswerExpander));
        let program = compiler
            .compile_route(&route(vec![Stmt::Return(Expr::Call {
                name: "answer".to_string(),
                args: vec![],
            })]))
            .unwrap();
        // The call never reaches emission; the pool has no "answer" constant
        assert!(program.constant_index_of_str("answer").is_none());
    }

    #[test]
    fn test_scope_depth_restored_after_entry() {
        let mut compiler = Compiler::with_optimization(OptLevel::None);
        let body = vec![Stmt::If {
            condition: var("input"),
            then_block: vec![Stmt::Assign {
                name: "t".to_string(),
                value: int(1),
            }],
            else_block: Some(vec![]),
        }];
        compiler.compile_route(&route(body)).unwrap();
        assert_eq!(compiler.symbols.depth(), 1);
    }
}
