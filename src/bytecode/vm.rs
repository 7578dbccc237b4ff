//! Stack-based virtual machine
//!
//! Executes one compiled entry point: a single operand stack of values, a
//! locals frame keyed by constant-pool slot, an instruction pointer that is
//! an absolute byte index into the program image, and a side table of live
//! iterators. Dispatch reads one opcode byte and, when the opcode carries
//! one, a four-byte little-endian operand.
//!
//! Execution is single-threaded and synchronous; it advances
//! deterministically until `Return` or `Halt`, or fails with a typed
//! [`VmError`]. Errors are never recovered inside the VM. Every invocation
//! owns its VM; the program itself is immutable and shared.

use std::collections::HashMap;
use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;

use tracing::trace;

use crate::value::Value;

use super::host::{HostError, HostRegistry, WebSocketHost};
use super::opcodes::Opcode;
use super::program::BytecodeProgram;

/// Result of VM execution
pub type VmResult<T> = Result<T, VmError>;

/// Errors that can occur during VM execution
#[derive(Debug, Clone, PartialEq)]
pub enum VmError {
    /// `LoadVar` of a name with no binding
    UndefinedVariable(String),
    /// `Call` of a name the host registry does not know
    UndefinedFunction(String),
    /// Array index outside `0..len`
    IndexOutOfBounds { index: i64, len: usize },
    /// Missing object field, in strict-fields mode
    FieldMissing(String),
    /// Operand types an opcode cannot work with
    TypeMismatch {
        op: &'static str,
        lhs: &'static str,
        rhs: &'static str,
    },
    /// Zero divisor
    DivisionByZero,
    /// `IterNext` on a spent iterator
    IteratorExhausted,
    /// `GetIter` on a non-collection
    NotIterable(&'static str),
    /// An opcode needed more stack than was there
    StackUnderflow,
    /// Unassigned opcode byte
    InvalidOpcode(u8),
    /// Constant-pool index outside the pool
    InvalidConstant(u32),
    /// Failure inside a host function
    Host(HostError),
    /// Anything else, with a message
    Runtime(String),
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UndefinedVariable(name) => write!(f, "undefined variable '{}'", name),
            Self::UndefinedFunction(name) => write!(f, "undefined function '{}'", name),
            Self::IndexOutOfBounds { index, len } => {
                write!(f, "index {} out of bounds for length {}", index, len)
            }
            Self::FieldMissing(key) => write!(f, "missing field '{}'", key),
            Self::TypeMismatch { op, lhs, rhs } => {
                write!(f, "type mismatch: cannot apply '{}' to {} and {}", op, lhs, rhs)
            }
            Self::DivisionByZero => write!(f, "division by zero"),
            Self::IteratorExhausted => write!(f, "iterator exhausted"),
            Self::NotIterable(kind) => write!(f, "value of type {} is not iterable", kind),
            Self::StackUnderflow => write!(f, "stack underflow"),
            Self::InvalidOpcode(byte) => write!(f, "invalid opcode: 0x{:02x}", byte),
            Self::InvalidConstant(index) => write!(f, "invalid constant index: {}", index),
            Self::Host(err) => write!(f, "{}", err),
            Self::Runtime(msg) => write!(f, "runtime error: {}", msg),
        }
    }
}

impl std::error::Error for VmError {}

impl From<HostError> for VmError {
    fn from(err: HostError) -> Self {
        VmError::Host(err)
    }
}

/// VM configuration
#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Emit a `tracing` event per executed instruction
    pub trace: bool,
    /// Fail with [`VmError::FieldMissing`] on missing object fields instead
    /// of yielding null
    pub strict_fields: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            trace: false,
            strict_fields: false,
        }
    }
}

/// Live iterator state, held in a VM-side table and referenced from the
/// operand stack by a small integer handle
#[derive(Debug, Clone)]
enum IterState {
    Array { items: Vec<Value>, cursor: usize },
    Object {
        entries: Vec<(String, Value)>,
        cursor: usize,
    },
}

impl IterState {
    fn has_next(&self) -> bool {
        match self {
            Self::Array { items, cursor } => *cursor < items.len(),
            Self::Object { entries, cursor } => *cursor < entries.len(),
        }
    }

    /// Advance, returning `(key, value)`; array keys are indices
    fn next(&mut self) -> Option<(Value, Value)> {
        match self {
            Self::Array { items, cursor } => {
                let item = items.get(*cursor)?.clone();
                let key = Value::Int(*cursor as i64);
                *cursor += 1;
                Some((key, item))
            }
            Self::Object { entries, cursor } => {
                let (key, value) = entries.get(*cursor)?.clone();
                *cursor += 1;
                Some((Value::String(key), value))
            }
        }
    }
}

/// The Glyph virtual machine
pub struct Vm {
    program: Arc<BytecodeProgram>,
    stack: Vec<Value>,
    /// Locals keyed by the constant-pool slot of the variable's name
    locals: HashMap<u32, Value>,
    iterators: Vec<IterState>,
    ip: usize,
    functions: HostRegistry,
    websocket: Option<Box<dyn WebSocketHost>>,
    config: VmConfig,
}

impl fmt::Debug for Vm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vm")
            .field("ip", &self.ip)
            .field("stack", &self.stack)
            .field("locals", &self.locals)
            .field("iterators", &self.iterators.len())
            .finish()
    }
}

impl Vm {
    /// Create a VM over a program with default configuration and the
    /// default host registry
    pub fn new(program: Arc<BytecodeProgram>) -> Self {
        Self::with_config(program, VmConfig::default())
    }

    /// Create a VM with custom configuration
    pub fn with_config(program: Arc<BytecodeProgram>, config: VmConfig) -> Self {
        let ip = program.code_start();
        Self {
            program,
            stack: Vec::with_capacity(64),
            locals: HashMap::new(),
            iterators: Vec::new(),
            ip,
            functions: HostRegistry::with_defaults(),
            websocket: None,
            config,
        }
    }

    /// Replace the host-function registry
    pub fn set_host_functions(&mut self, registry: HostRegistry) {
        self.functions = registry;
    }

    /// Attach the WebSocket manager the `Ws*` opcodes dispatch to
    pub fn set_websocket_host(&mut self, host: Box<dyn WebSocketHost>) {
        self.websocket = Some(host);
    }

    /// Pre-populate a local before execution
    ///
    /// Returns false when the program never references `name` (its name
    /// string is not in the pool); the binding is dropped in that case.
    pub fn set_local(&mut self, name: &str, value: Value) -> bool {
        match self.program.constant_index_of_str(name) {
            Some(slot) => {
                self.locals.insert(slot, value);
                true
            }
            None => false,
        }
    }

    /// Run to completion, returning the entry point's result
    pub fn execute(&mut self) -> VmResult<Value> {
        self.ip = self.program.code_start();
        self.stack.clear();
        self.iterators.clear();
        loop {
            match self.step()? {
                ControlFlow::Continue(()) => continue,
                ControlFlow::Break(result) => return Ok(result),
            }
        }
    }

    /// Execute a single instruction
    fn step(&mut self) -> VmResult<ControlFlow<Value>> {
        if self.ip >= self.program.len() {
            // Ran off the end of the image: implicit halt
            return Ok(ControlFlow::Break(self.stack.pop().unwrap_or(Value::Null)));
        }

        let byte = self.program.read_byte(self.ip).unwrap_or(0);
        let opcode = Opcode::from_byte(byte).ok_or(VmError::InvalidOpcode(byte))?;

        if self.config.trace {
            let (disasm, _) = self.program.disassemble_instruction(self.ip);
            trace!(
                target: "glyphcore::vm",
                ip = self.ip,
                stack = self.stack.len(),
                "{}", disasm
            );
        }

        self.ip += 1;

        match opcode {
            Opcode::Pop => {
                self.pop()?;
            }
            Opcode::Push => {
                let index = self.read_operand()?;
                let value = self
                    .program
                    .get_constant(index)
                    .ok_or(VmError::InvalidConstant(index))?
                    .clone();
                self.push(value);
            }
            Opcode::LoadVar => self.op_load_var()?,
            Opcode::StoreVar => {
                let slot = self.read_operand()?;
                let value = self.pop()?;
                self.locals.insert(slot, value);
            }

            Opcode::Add => self.op_add()?,
            Opcode::Sub => self.op_numeric("-", i64::wrapping_sub, |a, b| a - b)?,
            Opcode::Mul => self.op_numeric("*", i64::wrapping_mul, |a, b| a * b)?,
            Opcode::Div => self.op_div()?,
            Opcode::Neg => self.op_neg()?,
            Opcode::Shl => self.op_shift("<<", i64::wrapping_shl)?,
            Opcode::Shr => self.op_shift(">>", i64::wrapping_shr)?,

            Opcode::Eq => {
                let (lhs, rhs) = self.pop_pair()?;
                self.push(Value::Bool(lhs == rhs));
            }
            Opcode::Ne => {
                let (lhs, rhs) = self.pop_pair()?;
                self.push(Value::Bool(lhs != rhs));
            }
            Opcode::Lt => self.op_compare("<", |o| o.is_lt())?,
            Opcode::Le => self.op_compare("<=", |o| o.is_le())?,
            Opcode::Gt => self.op_compare(">", |o| o.is_gt())?,
            Opcode::Ge => self.op_compare(">=", |o| o.is_ge())?,

            Opcode::And => {
                let (lhs, rhs) = self.pop_pair()?;
                self.push(Value::Bool(lhs.is_truthy() && rhs.is_truthy()));
            }
            Opcode::Or => {
                let (lhs, rhs) = self.pop_pair()?;
                self.push(Value::Bool(lhs.is_truthy() || rhs.is_truthy()));
            }
            Opcode::Not => {
                let value = self.pop()?;
                self.push(Value::Bool(!value.is_truthy()));
            }

            Opcode::Jump => {
                let target = self.read_operand()?;
                self.ip = target as usize;
            }
            Opcode::JumpIfFalse => {
                let target = self.read_operand()?;
                if !self.pop()?.is_truthy() {
                    self.ip = target as usize;
                }
            }
            Opcode::JumpIfTrue => {
                let target = self.read_operand()?;
                if self.pop()?.is_truthy() {
                    self.ip = target as usize;
                }
            }

            Opcode::BuildArray => self.op_build_array()?,
            Opcode::BuildObject => self.op_build_object()?,
            Opcode::GetField => self.op_get_field()?,
            Opcode::GetIndex => self.op_get_index()?,
            Opcode::GetIter => self.op_get_iter()?,
            Opcode::IterHasNext => self.op_iter_has_next()?,
            Opcode::IterNext => self.op_iter_next()?,

            Opcode::Call => self.op_call()?,
            Opcode::Return => {
                let result = self.pop()?;
                debug_assert!(self.stack.is_empty(), "operand stack not empty at return");
                return Ok(ControlFlow::Break(result));
            }
            Opcode::Halt => {
                return Ok(ControlFlow::Break(self.stack.pop().unwrap_or(Value::Null)));
            }
            // Identity in a synchronous host; a concurrent host intercepts
            // this as its suspension point
            Opcode::Await => {}

            Opcode::WsSend => {
                let message = self.pop()?;
                self.ws_host()?.send(&message)?;
                self.push(Value::Null);
            }
            Opcode::WsBroadcast => {
                let message = self.pop()?;
                self.ws_host()?.broadcast(&message)?;
                self.push(Value::Null);
            }
            Opcode::WsBroadcastRoom => {
                let message = self.pop()?;
                let room = self.pop_room()?;
                self.ws_host()?.broadcast_to_room(&room, &message)?;
                self.push(Value::Null);
            }
            Opcode::WsJoinRoom => {
                let room = self.pop_room()?;
                self.ws_host()?.join_room(&room)?;
                self.push(Value::Null);
            }
            Opcode::WsLeaveRoom => {
                let room = self.pop_room()?;
                self.ws_host()?.leave_room(&room)?;
                self.push(Value::Null);
            }
            Opcode::WsClose => {
                let reason = match self.pop()? {
                    Value::String(s) => s,
                    other => {
                        return Err(VmError::Runtime(format!(
                            "close reason must be a string, got {}",
                            other.type_name()
                        )))
                    }
                };
                self.ws_host()?.close(&reason)?;
                self.push(Value::Null);
            }
            Opcode::WsGetRooms => {
                let rooms = self.ws_host()?.rooms();
                self.push(Value::array(rooms.into_iter().map(Value::String)));
            }
            Opcode::WsGetClients => {
                let room = self.pop_room()?;
                let clients = self.ws_host()?.room_clients(&room);
                self.push(Value::array(clients.into_iter().map(Value::String)));
            }
            Opcode::WsGetConnCount => {
                let count = self.ws_host()?.connection_count();
                self.push(Value::Int(count));
            }
            Opcode::WsGetUptime => {
                let uptime = self.ws_host()?.uptime_seconds();
                self.push(Value::Float(uptime));
            }
        }

        Ok(ControlFlow::Continue(()))
    }

    // === Stack primitives ===

    #[inline]
    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    #[inline]
    fn pop(&mut self) -> VmResult<Value> {
        self.stack.pop().ok_or(VmError::StackUnderflow)
    }

    /// Pop two operands, returning them in evaluation order (lhs, rhs)
    #[inline]
    fn pop_pair(&mut self) -> VmResult<(Value, Value)> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        Ok((lhs, rhs))
    }

    #[inline]
    fn read_operand(&mut self) -> VmResult<u32> {
        let operand = self
            .program
            .read_u32(self.ip)
            .ok_or_else(|| VmError::Runtime("truncated operand".to_string()))?;
        self.ip += 4;
        Ok(operand)
    }

    /// Render a pool slot's name for diagnostics
    fn slot_name(&self, slot: u32) -> String {
        match self.program.get_constant(slot) {
            Some(Value::String(name)) => name.clone(),
            _ => format!("#{}", slot),
        }
    }

    fn ws_host(&mut self) -> VmResult<&mut Box<dyn WebSocketHost>> {
        self.websocket
            .as_mut()
            .ok_or_else(|| VmError::Runtime("no websocket host attached".to_string()))
    }

    fn pop_room(&mut self) -> VmResult<String> {
        match self.pop()? {
            Value::String(room) => Ok(room),
            other => Err(VmError::Runtime(format!(
                "room name must be a string, got {}",
                other.type_name()
            ))),
        }
    }

    // === Opcode implementations ===

    fn op_load_var(&mut self) -> VmResult<()> {
        let slot = self.read_operand()?;
        let Some(value) = self.locals.get(&slot) else {
            return Err(VmError::UndefinedVariable(self.slot_name(slot)));
        };
        let value = value.clone();
        self.push(value);
        Ok(())
    }

    fn op_add(&mut self) -> VmResult<()> {
        let (lhs, rhs) = self.pop_pair()?;
        let result = match (&lhs, &rhs) {
            (Value::Int(a), Value::Int(b)) => Value::Int(a.wrapping_add(*b)),
            (Value::Float(a), Value::Float(b)) => Value::Float(a + b),
            (Value::Int(a), Value::Float(b)) => Value::Float(*a as f64 + b),
            (Value::Float(a), Value::Int(b)) => Value::Float(a + *b as f64),
            (Value::String(a), Value::String(b)) => Value::String(format!("{}{}", a, b)),
            (Value::Array(a), Value::Array(b)) => {
                let mut items = a.clone();
                items.extend(b.iter().cloned());
                Value::Array(items)
            }
            _ => {
                return Err(VmError::TypeMismatch {
                    op: "+",
                    lhs: lhs.type_name(),
                    rhs: rhs.type_name(),
                })
            }
        };
        self.push(result);
        Ok(())
    }

    fn op_numeric(
        &mut self,
        op: &'static str,
        int_op: fn(i64, i64) -> i64,
        float_op: fn(f64, f64) -> f64,
    ) -> VmResult<()> {
        let (lhs, rhs) = self.pop_pair()?;
        let result = match (&lhs, &rhs) {
            (Value::Int(a), Value::Int(b)) => Value::Int(int_op(*a, *b)),
            (Value::Float(a), Value::Float(b)) => Value::Float(float_op(*a, *b)),
            (Value::Int(a), Value::Float(b)) => Value::Float(float_op(*a as f64, *b)),
            (Value::Float(a), Value::Int(b)) => Value::Float(float_op(*a, *b as f64)),
            _ => {
                return Err(VmError::TypeMismatch {
                    op,
                    lhs: lhs.type_name(),
                    rhs: rhs.type_name(),
                })
            }
        };
        self.push(result);
        Ok(())
    }

    fn op_div(&mut self) -> VmResult<()> {
        let (lhs, rhs) = self.pop_pair()?;
        match &rhs {
            Value::Int(0) => return Err(VmError::DivisionByZero),
            Value::Float(z) if *z == 0.0 => return Err(VmError::DivisionByZero),
            _ => {}
        }
        let result = match (&lhs, &rhs) {
            (Value::Int(a), Value::Int(b)) => Value::Int(a.wrapping_div(*b)),
            (Value::Float(a), Value::Float(b)) => Value::Float(a / b),
            (Value::Int(a), Value::Float(b)) => Value::Float(*a as f64 / b),
            (Value::Float(a), Value::Int(b)) => Value::Float(a / *b as f64),
            _ => {
                return Err(VmError::TypeMismatch {
                    op: "/",
                    lhs: lhs.type_name(),
                    rhs: rhs.type_name(),
                })
            }
        };
        self.push(result);
        Ok(())
    }

    fn op_neg(&mut self) -> VmResult<()> {
        let value = self.pop()?;
        let result = match &value {
            Value::Int(n) => Value::Int(n.wrapping_neg()),
            Value::Float(f) => Value::Float(-f),
            other => {
                return Err(VmError::TypeMismatch {
                    op: "-",
                    lhs: other.type_name(),
                    rhs: other.type_name(),
                })
            }
        };
        self.push(result);
        Ok(())
    }

    fn op_shift(&mut self, op: &'static str, shift: fn(i64, u32) -> i64) -> VmResult<()> {
        let (lhs, rhs) = self.pop_pair()?;
        match (&lhs, &rhs) {
            (Value::Int(a), Value::Int(b)) => {
                // Shift amounts wrap mod 64, like the underlying machine op
                self.push(Value::Int(shift(*a, *b as u32)));
                Ok(())
            }
            _ => Err(VmError::TypeMismatch {
                op,
                lhs: lhs.type_name(),
                rhs: rhs.type_name(),
            }),
        }
    }

    fn op_compare(
        &mut self,
        op: &'static str,
        test: fn(std::cmp::Ordering) -> bool,
    ) -> VmResult<()> {
        let (lhs, rhs) = self.pop_pair()?;
        let ordering = match (&lhs, &rhs) {
            (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::String(a), Value::String(b)) => a.partial_cmp(b),
            _ => {
                return Err(VmError::TypeMismatch {
                    op,
                    lhs: lhs.type_name(),
                    rhs: rhs.type_name(),
                })
            }
        };
        // NaN comparisons are all false
        self.push(Value::Bool(ordering.is_some_and(test)));
        Ok(())
    }

    fn op_build_array(&mut self) -> VmResult<()> {
        let count = self.read_operand()? as usize;
        if count > self.stack.len() {
            return Err(VmError::StackUnderflow);
        }
        let items: Vec<Value> = self.stack.drain(self.stack.len() - count..).collect();
        self.push(Value::Array(items));
        Ok(())
    }

    fn op_build_object(&mut self) -> VmResult<()> {
        let count = self.read_operand()? as usize;
        if count * 2 > self.stack.len() {
            return Err(VmError::StackUnderflow);
        }
        let mut pairs = self.stack.drain(self.stack.len() - count * 2..);
        let mut fields = std::collections::BTreeMap::new();
        while let (Some(key), Some(value)) = (pairs.next(), pairs.next()) {
            match key {
                Value::String(key) => {
                    fields.insert(key, value);
                }
                other => {
                    return Err(VmError::Runtime(format!(
                        "object key must be a string, got {}",
                        other.type_name()
                    )))
                }
            }
        }
        drop(pairs);
        self.push(Value::Object(fields));
        Ok(())
    }

    fn op_get_field(&mut self) -> VmResult<()> {
        let (object, key) = self.pop_pair()?;
        let key = match key {
            Value::String(key) => key,
            other => {
                return Err(VmError::TypeMismatch {
                    op: "field access",
                    lhs: object.type_name(),
                    rhs: other.type_name(),
                })
            }
        };
        let fields = match object {
            Value::Object(fields) => fields,
            other => {
                return Err(VmError::TypeMismatch {
                    op: "field access",
                    lhs: other.type_name(),
                    rhs: "string",
                })
            }
        };
        match fields.get(&key) {
            Some(value) => self.push(value.clone()),
            None if self.config.strict_fields => return Err(VmError::FieldMissing(key)),
            None => self.push(Value::Null),
        }
        Ok(())
    }

    fn op_get_index(&mut self) -> VmResult<()> {
        let (collection, index) = self.pop_pair()?;
        match (collection, index) {
            (Value::Array(items), Value::Int(i)) => {
                if i < 0 || i as usize >= items.len() {
                    return Err(VmError::IndexOutOfBounds {
                        index: i,
                        len: items.len(),
                    });
                }
                self.push(items[i as usize].clone());
                Ok(())
            }
            (Value::Object(fields), Value::String(key)) => {
                match fields.get(&key) {
                    Some(value) => self.push(value.clone()),
                    None if self.config.strict_fields => {
                        return Err(VmError::FieldMissing(key))
                    }
                    None => self.push(Value::Null),
                }
                Ok(())
            }
            (collection, index) => Err(VmError::TypeMismatch {
                op: "index",
                lhs: collection.type_name(),
                rhs: index.type_name(),
            }),
        }
    }

    fn op_get_iter(&mut self) -> VmResult<()> {
        let collection = self.pop()?;
        let state = match collection {
            Value::Array(items) => IterState::Array { items, cursor: 0 },
            Value::Object(fields) => IterState::Object {
                entries: fields.into_iter().collect(),
                cursor: 0,
            },
            other => return Err(VmError::NotIterable(other.type_name())),
        };
        let handle = self.iterators.len() as i64;
        self.iterators.push(state);
        self.push(Value::Int(handle));
        Ok(())
    }

    fn pop_iterator_handle(&mut self) -> VmResult<usize> {
        match self.pop()? {
            Value::Int(id) if id >= 0 && (id as usize) < self.iterators.len() => Ok(id as usize),
            other => Err(VmError::Runtime(format!(
                "invalid iterator handle: {}",
                other
            ))),
        }
    }

    fn op_iter_has_next(&mut self) -> VmResult<()> {
        let handle = self.pop_iterator_handle()?;
        let has_next = self.iterators[handle].has_next();
        self.push(Value::Bool(has_next));
        Ok(())
    }

    fn op_iter_next(&mut self) -> VmResult<()> {
        let keyed = self.read_operand()? == 1;
        let handle = self.pop_iterator_handle()?;
        let Some((key, value)) = self.iterators[handle].next() else {
            return Err(VmError::IteratorExhausted);
        };
        if keyed {
            self.push(key);
        }
        self.push(value);
        Ok(())
    }

    fn op_call(&mut self) -> VmResult<()> {
        let argc = self.read_operand()? as usize;
        if argc + 1 > self.stack.len() {
            return Err(VmError::StackUnderflow);
        }
        let args: Vec<Value> = self.stack.drain(self.stack.len() - argc..).collect();
        let name = match self.pop()? {
            Value::String(name) => name,
            other => {
                return Err(VmError::Runtime(format!(
                    "call target must be a string, got {}",
                    other.type_name()
                )))
            }
        };
        let Some(function) = self.functions.get(&name) else {
            return Err(VmError::UndefinedFunction(name));
        };
        let result = function(&args)?;
        self.push(result);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::program::ProgramBuilder;

    /// Recording WebSocket host for opcode tests
    #[derive(Default)]
    struct RecordingWs {
        sent: Vec<Value>,
        broadcast: Vec<Value>,
        joined: Vec<String>,
        left: Vec<String>,
        closed: Vec<String>,
    }

    impl WebSocketHost for RecordingWs {
        fn send(&mut self, message: &Value) -> Result<(), HostError> {
            self.sent.push(message.clone());
            Ok(())
        }
        fn broadcast(&mut self, message: &Value) -> Result<(), HostError> {
            self.broadcast.push(message.clone());
            Ok(())
        }
        fn broadcast_to_room(&mut self, _room: &str, message: &Value) -> Result<(), HostError> {
            self.broadcast.push(message.clone());
            Ok(())
        }
        fn join_room(&mut self, room: &str) -> Result<(), HostError> {
            self.joined.push(room.to_string());
            Ok(())
        }
        fn leave_room(&mut self, room: &str) -> Result<(), HostError> {
            self.left.push(room.to_string());
            Ok(())
        }
        fn close(&mut self, reason: &str) -> Result<(), HostError> {
            self.closed.push(reason.to_string());
            Ok(())
        }
        fn rooms(&self) -> Vec<String> {
            vec!["lobby".to_string(), "game".to_string()]
        }
        fn room_clients(&self, _room: &str) -> Vec<String> {
            vec!["c1".to_string()]
        }
        fn connection_count(&self) -> i64 {
            7
        }
        fn uptime_seconds(&self) -> f64 {
            12.5
        }
    }

    fn run(build: impl FnOnce(&mut ProgramBuilder)) -> VmResult<Value> {
        let mut builder = ProgramBuilder::new();
        build(&mut builder);
        let mut vm = Vm::new(builder.build_arc());
        vm.execute()
    }

    #[test]
    fn test_arithmetic_promotion() {
        let result = run(|b| {
            b.emit_constant(Value::Int(40));
            b.emit_constant(Value::Int(2));
            b.emit(Opcode::Add);
            b.emit(Opcode::Return);
        });
        assert_eq!(result, Ok(Value::Int(42)));

        let result = run(|b| {
            b.emit_constant(Value::Int(1));
            b.emit_constant(Value::Float(0.5));
            b.emit(Opcode::Add);
            b.emit(Opcode::Return);
        });
        assert_eq!(result, Ok(Value::Float(1.5)));
    }

    #[test]
    fn test_string_and_array_concat() {
        let result = run(|b| {
            b.emit_constant(Value::string("foo"));
            b.emit_constant(Value::string("bar"));
            b.emit(Opcode::Add);
            b.emit(Opcode::Return);
        });
        assert_eq!(result, Ok(Value::string("foobar")));

        let result = run(|b| {
            b.emit_constant(Value::Int(1));
            b.emit_with(Opcode::BuildArray, 1);
            b.emit_constant(Value::Int(2));
            b.emit_with(Opcode::BuildArray, 1);
            b.emit(Opcode::Add);
            b.emit(Opcode::Return);
        });
        assert_eq!(result, Ok(Value::array([Value::Int(1), Value::Int(2)])));
    }

    #[test]
    fn test_type_mismatch() {
        let result = run(|b| {
            b.emit_constant(Value::Int(1));
            b.emit_constant(Value::string("x"));
            b.emit(Opcode::Add);
            b.emit(Opcode::Return);
        });
        assert_eq!(
            result,
            Err(VmError::TypeMismatch {
                op: "+",
                lhs: "int",
                rhs: "string",
            })
        );
    }

    #[test]
    fn test_division() {
        let result = run(|b| {
            b.emit_constant(Value::Int(7));
            b.emit_constant(Value::Int(2));
            b.emit(Opcode::Div);
            b.emit(Opcode::Return);
        });
        assert_eq!(result, Ok(Value::Int(3)));

        let result = run(|b| {
            b.emit_constant(Value::Int(1));
            b.emit_constant(Value::Int(0));
            b.emit(Opcode::Div);
            b.emit(Opcode::Return);
        });
        assert_eq!(result, Err(VmError::DivisionByZero));
    }

    #[test]
    fn test_mixed_equality_is_strict() {
        let result = run(|b| {
            b.emit_constant(Value::Int(1));
            b.emit_constant(Value::Float(1.0));
            b.emit(Opcode::Eq);
            b.emit(Opcode::Return);
        });
        assert_eq!(result, Ok(Value::Bool(false)));

        // Ordering comparisons promote
        let result = run(|b| {
            b.emit_constant(Value::Int(1));
            b.emit_constant(Value::Float(1.0));
            b.emit(Opcode::Le);
            b.emit(Opcode::Return);
        });
        assert_eq!(result, Ok(Value::Bool(true)));
    }

    #[test]
    fn test_index_out_of_bounds_message_contains_index() {
        let result = run(|b| {
            b.emit_constant(Value::Int(1));
            b.emit_with(Opcode::BuildArray, 1);
            b.emit_constant(Value::Int(10));
            b.emit(Opcode::GetIndex);
            b.emit(Opcode::Return);
        });
        let err = result.unwrap_err();
        assert!(err.to_string().contains("10"));

        let result = run(|b| {
            b.emit_constant(Value::Int(1));
            b.emit_with(Opcode::BuildArray, 1);
            b.emit_constant(Value::Int(-1));
            b.emit(Opcode::GetIndex);
            b.emit(Opcode::Return);
        });
        assert!(result.unwrap_err().to_string().contains("-1"));
    }

    #[test]
    fn test_missing_field_defaults_to_null() {
        let result = run(|b| {
            b.emit_constant(Value::string("a"));
            b.emit_constant(Value::Int(1));
            b.emit_with(Opcode::BuildObject, 1);
            b.emit_constant(Value::string("missing"));
            b.emit(Opcode::GetField);
            b.emit(Opcode::Return);
        });
        assert_eq!(result, Ok(Value::Null));
    }

    #[test]
    fn test_missing_field_strict_mode() {
        let mut builder = ProgramBuilder::new();
        builder.emit_constant(Value::string("a"));
        builder.emit_constant(Value::Int(1));
        builder.emit_with(Opcode::BuildObject, 1);
        builder.emit_constant(Value::string("missing"));
        builder.emit(Opcode::GetField);
        builder.emit(Opcode::Return);

        let config = VmConfig {
            strict_fields: true,
            ..VmConfig::default()
        };
        let mut vm = Vm::with_config(builder.build_arc(), config);
        assert_eq!(
            vm.execute(),
            Err(VmError::FieldMissing("missing".to_string()))
        );
    }

    #[test]
    fn test_undefined_variable_names_the_variable() {
        let mut builder = ProgramBuilder::new();
        let slot = builder.add_constant(Value::string("ghost"));
        builder.emit_with(Opcode::LoadVar, slot);
        builder.emit(Opcode::Return);
        let mut vm = Vm::new(builder.build_arc());
        assert_eq!(
            vm.execute(),
            Err(VmError::UndefinedVariable("ghost".to_string()))
        );
    }

    #[test]
    fn test_set_local_and_load() {
        let mut builder = ProgramBuilder::new();
        let slot = builder.add_constant(Value::string("input"));
        builder.emit_with(Opcode::LoadVar, slot);
        builder.emit(Opcode::Return);
        let mut vm = Vm::new(builder.build_arc());
        assert!(vm.set_local("input", Value::Int(9)));
        assert!(!vm.set_local("unreferenced", Value::Null));
        assert_eq!(vm.execute(), Ok(Value::Int(9)));
    }

    #[test]
    fn test_iteration_over_array() {
        // sum = 0; for x in [1,2,3]: sum += x; return sum
        let mut builder = ProgramBuilder::new();
        let sum = builder.add_constant(Value::string("sum"));
        let iter = builder.add_constant(Value::string("it"));
        let x = builder.add_constant(Value::string("x"));
        builder.emit_constant(Value::Int(0));
        builder.emit_with(Opcode::StoreVar, sum);
        builder.emit_constant(Value::Int(1));
        builder.emit_constant(Value::Int(2));
        builder.emit_constant(Value::Int(3));
        builder.emit_with(Opcode::BuildArray, 3);
        builder.emit(Opcode::GetIter);
        builder.emit_with(Opcode::StoreVar, iter);
        let top = builder.current_offset();
        builder.emit_with(Opcode::LoadVar, iter);
        builder.emit(Opcode::IterHasNext);
        let after = builder.emit_jump(Opcode::JumpIfFalse);
        builder.emit_with(Opcode::LoadVar, iter);
        builder.emit_with(Opcode::IterNext, 0);
        builder.emit_with(Opcode::StoreVar, x);
        builder.emit_with(Opcode::LoadVar, sum);
        builder.emit_with(Opcode::LoadVar, x);
        builder.emit(Opcode::Add);
        builder.emit_with(Opcode::StoreVar, sum);
        builder.emit_jump_to(Opcode::Jump, top);
        builder.patch_jump(after);
        builder.emit_with(Opcode::LoadVar, sum);
        builder.emit(Opcode::Return);

        let mut vm = Vm::new(builder.build_arc());
        assert_eq!(vm.execute(), Ok(Value::Int(6)));
    }

    #[test]
    fn test_object_iteration_is_keyed_and_sorted() {
        let mut builder = ProgramBuilder::new();
        builder.emit_constant(Value::string("b"));
        builder.emit_constant(Value::Int(2));
        builder.emit_constant(Value::string("a"));
        builder.emit_constant(Value::Int(1));
        builder.emit_with(Opcode::BuildObject, 2);
        builder.emit(Opcode::GetIter);
        builder.emit_with(Opcode::IterNext, 1);
        // Stack now: key value; drop the value, return the key
        builder.emit(Opcode::Pop);
        builder.emit(Opcode::Return);

        let mut vm = Vm::new(builder.build_arc());
        assert_eq!(vm.execute(), Ok(Value::string("a")));
    }

    #[test]
    fn test_iterator_exhaustion() {
        let result = run(|b| {
            b.emit_with(Opcode::BuildArray, 0);
            b.emit(Opcode::GetIter);
            b.emit_with(Opcode::IterNext, 0);
            b.emit(Opcode::Return);
        });
        assert_eq!(result, Err(VmError::IteratorExhausted));
    }

    #[test]
    fn test_not_iterable() {
        let result = run(|b| {
            b.emit_constant(Value::Int(5));
            b.emit(Opcode::GetIter);
            b.emit(Opcode::Return);
        });
        assert_eq!(result, Err(VmError::NotIterable("int")));
    }

    #[test]
    fn test_call_dispatches_to_registry() {
        let result = run(|b| {
            b.emit_constant(Value::string("length"));
            b.emit_constant(Value::string("hello"));
            b.emit_with(Opcode::Call, 1);
            b.emit(Opcode::Return);
        });
        assert_eq!(result, Ok(Value::Int(5)));
    }

    #[test]
    fn test_unknown_function() {
        let result = run(|b| {
            b.emit_constant(Value::string("nope"));
            b.emit_with(Opcode::Call, 0);
            b.emit(Opcode::Return);
        });
        assert_eq!(result, Err(VmError::UndefinedFunction("nope".to_string())));
    }

    #[test]
    fn test_await_is_identity() {
        let result = run(|b| {
            b.emit_constant(Value::Int(3));
            b.emit(Opcode::Await);
            b.emit(Opcode::Return);
        });
        assert_eq!(result, Ok(Value::Int(3)));
    }

    #[test]
    fn test_halt_with_empty_stack_yields_null() {
        let result = run(|b| {
            b.emit(Opcode::Halt);
        });
        assert_eq!(result, Ok(Value::Null));
    }

    #[test]
    fn test_websocket_ops() {
        let mut builder = ProgramBuilder::new();
        builder.emit_constant(Value::string("hi"));
        builder.emit(Opcode::WsSend);
        builder.emit(Opcode::Pop);
        builder.emit_constant(Value::string("lobby"));
        builder.emit(Opcode::WsJoinRoom);
        builder.emit(Opcode::Pop);
        builder.emit(Opcode::WsGetRooms);
        builder.emit(Opcode::Return);

        let mut vm = Vm::new(builder.build_arc());
        vm.set_websocket_host(Box::new(RecordingWs::default()));
        assert_eq!(
            vm.execute(),
            Ok(Value::array([
                Value::string("lobby"),
                Value::string("game")
            ]))
        );
    }

    #[test]
    fn test_websocket_without_host_fails() {
        let result = run(|b| {
            b.emit_constant(Value::string("hi"));
            b.emit(Opcode::WsSend);
            b.emit(Opcode::Return);
        });
        assert!(matches!(result, Err(VmError::Runtime(_))));
    }

    #[test]
    fn test_ws_counts() {
        let mut builder = ProgramBuilder::new();
        builder.emit(Opcode::WsGetConnCount);
        builder.emit(Opcode::Return);
        let mut vm = Vm::new(builder.build_arc());
        vm.set_websocket_host(Box::new(RecordingWs::default()));
        assert_eq!(vm.execute(), Ok(Value::Int(7)));
    }
}
