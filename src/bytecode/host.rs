//! Host-function registry and WebSocket host seam
//!
//! The VM owns no standard library. `Call` dispatches by name into a
//! [`HostRegistry`] the host populates, and the `Ws*` opcodes delegate to a
//! [`WebSocketHost`] implementation that owns the room registry. Both seams
//! treat results as plain [`Value`]s.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::value::Value;

/// Error type for host-function calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    /// Wrong number of arguments
    ArityMismatch { expected: usize, got: usize },
    /// Type error in arguments
    TypeError {
        expected: &'static str,
        got: String,
    },
    /// Runtime failure inside the host function
    Runtime(String),
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ArityMismatch { expected, got } => {
                write!(f, "arity mismatch: expected {}, got {}", expected, got)
            }
            Self::TypeError { expected, got } => {
                write!(f, "type error: expected {}, got {}", expected, got)
            }
            Self::Runtime(msg) => write!(f, "runtime error: {}", msg),
        }
    }
}

impl std::error::Error for HostError {}

/// Result type for host-function calls
pub type HostResult = Result<Value, HostError>;

/// Type alias for the host-function signature
pub type HostFn = Arc<dyn Fn(&[Value]) -> HostResult + Send + Sync>;

/// Registry of host functions callable from bytecode by name
///
/// Registration is last-write-wins; the compiler interns call names without
/// consulting the registry, so unknown names surface at run time.
#[derive(Clone, Default)]
pub struct HostRegistry {
    functions: HashMap<String, HostFn>,
}

impl fmt::Debug for HostRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("HostRegistry")
            .field("functions", &names)
            .finish()
    }
}

impl HostRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-ins the compiler's own lowerings rely on
    ///
    /// `length` is required by the `ws.get_room_count` family; everything
    /// else the host adds itself.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("length", |args| {
            let [value] = args else {
                return Err(HostError::ArityMismatch {
                    expected: 1,
                    got: args.len(),
                });
            };
            match value {
                Value::String(s) => Ok(Value::Int(s.chars().count() as i64)),
                Value::Array(items) => Ok(Value::Int(items.len() as i64)),
                Value::Object(fields) => Ok(Value::Int(fields.len() as i64)),
                other => Err(HostError::TypeError {
                    expected: "string, array, or object",
                    got: other.type_name().to_string(),
                }),
            }
        });
        registry
    }

    /// Register a function under a name
    pub fn register(
        &mut self,
        name: impl Into<String>,
        function: impl Fn(&[Value]) -> HostResult + Send + Sync + 'static,
    ) {
        self.functions.insert(name.into(), Arc::new(function));
    }

    /// Look up a function by name
    pub fn get(&self, name: &str) -> Option<&HostFn> {
        self.functions.get(name)
    }

    /// Whether a name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }
}

/// The host's WebSocket manager, driven by the `Ws*` opcodes
///
/// One implementation exists per connection context; the room registry
/// behind it is shared host state with its own concurrency contract. Every
/// method is an atomic step from the VM's perspective.
pub trait WebSocketHost {
    /// Send a message to the current connection
    fn send(&mut self, message: &Value) -> Result<(), HostError>;
    /// Broadcast a message to every connection
    fn broadcast(&mut self, message: &Value) -> Result<(), HostError>;
    /// Broadcast a message to one room
    fn broadcast_to_room(&mut self, room: &str, message: &Value) -> Result<(), HostError>;
    /// Join the current connection to a room
    fn join_room(&mut self, room: &str) -> Result<(), HostError>;
    /// Remove the current connection from a room
    fn leave_room(&mut self, room: &str) -> Result<(), HostError>;
    /// Close the current connection
    fn close(&mut self, reason: &str) -> Result<(), HostError>;
    /// All room names
    fn rooms(&self) -> Vec<String>;
    /// Client ids joined to a room
    fn room_clients(&self, room: &str) -> Vec<String>;
    /// Number of live connections
    fn connection_count(&self) -> i64;
    /// Seconds since the WebSocket server started
    fn uptime_seconds(&self) -> f64;
}
