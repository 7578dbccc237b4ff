//! Lexically scoped symbol table
//!
//! Tracks name bindings while the compiler walks an entry point. Scopes form
//! a stack; resolution walks outward from the innermost scope, while
//! [`SymbolTable::resolve_local`] checks only the active scope. The
//! no-redeclaration policy is enforced by the compiler front end before it
//! calls [`SymbolTable::define`], so `define` itself overwrites.

use std::collections::HashMap;

/// The kind of a scope, outermost to innermost
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Global,
    /// Entry-point body scope (routes, commands, handlers, ...)
    Route,
    Function,
    Block,
}

/// A name binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    /// The bound name
    pub name: String,
    /// Depth of the scope that owns the binding (global = 0)
    pub scope_level: u32,
    /// Constant-pool slot holding the name string; doubles as the VM's
    /// local-binding key
    pub constant_index: u32,
    /// Whether this binding is a named constant
    pub is_constant: bool,
    /// Pool slot of the constant's value, when `is_constant`
    pub constant_value_index: Option<u32>,
}

#[derive(Debug)]
struct Scope {
    kind: ScopeKind,
    symbols: HashMap<String, Symbol>,
}

/// Scope-stack symbol table
#[derive(Debug)]
pub struct SymbolTable {
    scopes: Vec<Scope>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    /// Create a table with a single global scope
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope {
                kind: ScopeKind::Global,
                symbols: HashMap::new(),
            }],
        }
    }

    /// Push a child scope of the given kind
    pub fn enter_scope(&mut self, kind: ScopeKind) {
        self.scopes.push(Scope {
            kind,
            symbols: HashMap::new(),
        });
    }

    /// Pop the active scope, destroying its bindings
    ///
    /// The global scope is never popped.
    pub fn exit_scope(&mut self) {
        debug_assert!(self.scopes.len() > 1, "cannot exit the global scope");
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    /// Kind of the active scope
    #[inline]
    pub fn scope_kind(&self) -> ScopeKind {
        self.scopes.last().map(|s| s.kind).unwrap_or(ScopeKind::Global)
    }

    /// Current scope depth; the global scope alone is depth 1
    #[inline]
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Bind `name` in the active scope
    ///
    /// `name_index` is the constant-pool slot of the name string.
    pub fn define(&mut self, name: &str, name_index: u32) -> Symbol {
        let level = (self.scopes.len() - 1) as u32;
        let symbol = Symbol {
            name: name.to_string(),
            scope_level: level,
            constant_index: name_index,
            is_constant: false,
            constant_value_index: None,
        };
        self.scopes
            .last_mut()
            .expect("scope stack is never empty")
            .symbols
            .insert(name.to_string(), symbol.clone());
        symbol
    }

    /// Bind `name` in the active scope as a named constant whose value lives
    /// at `value_index` in the pool
    pub fn define_constant(&mut self, name: &str, name_index: u32, value_index: u32) -> Symbol {
        let level = (self.scopes.len() - 1) as u32;
        let symbol = Symbol {
            name: name.to_string(),
            scope_level: level,
            constant_index: name_index,
            is_constant: true,
            constant_value_index: Some(value_index),
        };
        self.scopes
            .last_mut()
            .expect("scope stack is never empty")
            .symbols
            .insert(name.to_string(), symbol.clone());
        symbol
    }

    /// Resolve `name`, walking from the active scope outward
    pub fn resolve(&self, name: &str) -> Option<&Symbol> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.symbols.get(name))
    }

    /// Resolve `name` in the active scope only
    pub fn resolve_local(&self, name: &str) -> Option<&Symbol> {
        self.scopes
            .last()
            .and_then(|scope| scope.symbols.get(name))
    }
}
