//! Entry-point shims
//!
//! Before execution the host pre-populates the locals the compiler
//! pre-defined for the entry-point kind. The invocation structs here carry
//! that data and apply it with [`Vm::set_local`]; a pre-defined local the
//! host omits surfaces as `UndefinedVariable` at its first `LoadVar`.

use std::collections::HashMap;

use crate::value::Value;

use super::vm::Vm;

/// Extract path-parameter names from a declared route path
///
/// Parameters are segments of the form `:name`, terminated by `/` or the
/// end of the path.
pub fn extract_path_params(path: &str) -> Vec<String> {
    path.split('/')
        .filter_map(|segment| segment.strip_prefix(':'))
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// Host-side data for one HTTP route invocation
#[derive(Debug, Clone, Default)]
pub struct RouteInvocation {
    /// Values for the path parameters, by name
    pub params: HashMap<String, Value>,
    /// The parsed query string
    pub query: Value,
    /// The request body
    pub input: Value,
    /// Injected names (database handles and the like)
    pub injections: HashMap<String, Value>,
    /// Authenticated principal, when the route declares auth middleware
    pub auth: Option<Value>,
    /// WebSocket context object
    pub ws: Value,
}

impl RouteInvocation {
    /// Apply this invocation's locals to a VM
    pub fn apply(&self, vm: &mut Vm) {
        for (name, value) in &self.params {
            vm.set_local(name, value.clone());
        }
        for (name, value) in &self.injections {
            vm.set_local(name, value.clone());
        }
        vm.set_local("query", self.query.clone());
        vm.set_local("input", self.input.clone());
        vm.set_local("ws", self.ws.clone());
        if let Some(auth) = &self.auth {
            vm.set_local("auth", auth.clone());
        }
    }
}

/// Host-side data for one CLI command invocation
#[derive(Debug, Clone, Default)]
pub struct CommandInvocation {
    /// Parsed argument values, by declared parameter name
    pub args: HashMap<String, Value>,
}

impl CommandInvocation {
    pub fn apply(&self, vm: &mut Vm) {
        for (name, value) in &self.args {
            vm.set_local(name, value.clone());
        }
    }
}

/// Host-side data for one cron-task invocation
#[derive(Debug, Clone, Default)]
pub struct CronInvocation {
    pub injections: HashMap<String, Value>,
}

impl CronInvocation {
    pub fn apply(&self, vm: &mut Vm) {
        for (name, value) in &self.injections {
            vm.set_local(name, value.clone());
        }
    }
}

/// Host-side data for one event-handler invocation
#[derive(Debug, Clone, Default)]
pub struct EventInvocation {
    /// The event object
    pub event: Value,
    /// The event payload
    pub input: Value,
    pub injections: HashMap<String, Value>,
}

impl EventInvocation {
    pub fn apply(&self, vm: &mut Vm) {
        vm.set_local("event", self.event.clone());
        vm.set_local("input", self.input.clone());
        for (name, value) in &self.injections {
            vm.set_local(name, value.clone());
        }
    }
}

/// Host-side data for one queue-worker invocation
#[derive(Debug, Clone, Default)]
pub struct QueueInvocation {
    /// The dequeued message
    pub message: Value,
    /// The message payload
    pub input: Value,
    pub injections: HashMap<String, Value>,
}

impl QueueInvocation {
    pub fn apply(&self, vm: &mut Vm) {
        vm.set_local("message", self.message.clone());
        vm.set_local("input", self.input.clone());
        for (name, value) in &self.injections {
            vm.set_local(name, value.clone());
        }
    }
}

/// Host-side data for one WebSocket event invocation
#[derive(Debug, Clone, Default)]
pub struct WebSocketInvocation {
    /// Connection context object
    pub ws: Value,
    /// The incoming frame (message handlers) or connection payload
    pub input: Value,
    /// Client identifier
    pub client: Value,
    /// Values for the route's path parameters
    pub params: HashMap<String, Value>,
    pub injections: HashMap<String, Value>,
}

impl WebSocketInvocation {
    pub fn apply(&self, vm: &mut Vm) {
        vm.set_local("ws", self.ws.clone());
        vm.set_local("input", self.input.clone());
        vm.set_local("client", self.client.clone());
        for (name, value) in &self.params {
            vm.set_local(name, value.clone());
        }
        for (name, value) in &self.injections {
            vm.set_local(name, value.clone());
        }
    }
}
