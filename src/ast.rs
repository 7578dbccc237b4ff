//! Abstract syntax tree consumed by the bytecode compiler
//!
//! The parser is an external collaborator; it hands the compiler a fully
//! parsed [`Module`]. Every statement and expression kind is a variant of a
//! sum type, so the compiler and the optimizer are total pattern matches
//! with no runtime type queries.

use crate::value::Value;

/// A literal value as written in source
///
/// Literals are exactly the shapes that may enter the constant pool;
/// array and object displays are expressions, not literals.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    String(String),
}

impl std::hash::Hash for Literal {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        core::mem::discriminant(self).hash(state);
        match self {
            Literal::Null => {}
            Literal::Int(n) => n.hash(state),
            // Floats hash by bit pattern; fingerprinting only needs
            // determinism, not NaN unification
            Literal::Float(f) => f.to_bits().hash(state),
            Literal::Bool(b) => b.hash(state),
            Literal::String(s) => s.hash(state),
        }
    }
}

impl Literal {
    /// The runtime value this literal denotes
    pub fn to_value(&self) -> Value {
        match self {
            Literal::Null => Value::Null,
            Literal::Int(n) => Value::Int(*n),
            Literal::Float(f) => Value::Float(*f),
            Literal::Bool(b) => Value::Bool(*b),
            Literal::String(s) => Value::String(s.clone()),
        }
    }
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    /// Left shift; produced by the optimizer's strength reduction
    Shl,
    /// Right shift; produced by the optimizer's strength reduction
    Shr,
}

impl BinaryOp {
    /// Operator spelling used in error messages
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
        }
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// Numeric negation
    Neg,
    /// Logical not over truthiness
    Not,
}

/// An expression
#[derive(Debug, Clone, PartialEq, Hash)]
pub enum Expr {
    Literal(Literal),
    /// Variable reference
    Variable(String),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    /// Array display `[a, b, c]`
    Array(Vec<Expr>),
    /// Object display `{k: v, ...}` in declaration order
    Object(Vec<(String, Expr)>),
    FieldAccess {
        object: Box<Expr>,
        field: String,
    },
    Index {
        collection: Box<Expr>,
        index: Box<Expr>,
    },
    /// Call by name; callees are resolved by name at call time, never
    /// materialized as values
    Call {
        name: String,
        args: Vec<Expr>,
    },
    Match {
        scrutinee: Box<Expr>,
        arms: Vec<MatchArm>,
    },
    /// `async { body }`; compiled inline as a block yielding its last
    /// expression, reified at the VM boundary by the host
    Async(Vec<Stmt>),
    /// `await expr`
    Await(Box<Expr>),
    /// Lambda expressions are parsed but have no compiled form
    Lambda {
        params: Vec<String>,
        body: Box<Expr>,
    },
}

impl Expr {
    /// Short kind name for diagnostics
    pub fn kind_name(&self) -> &'static str {
        match self {
            Expr::Literal(_) => "literal",
            Expr::Variable(_) => "variable",
            Expr::Binary { .. } => "binary operation",
            Expr::Unary { .. } => "unary operation",
            Expr::Array(_) => "array literal",
            Expr::Object(_) => "object literal",
            Expr::FieldAccess { .. } => "field access",
            Expr::Index { .. } => "index",
            Expr::Call { .. } => "function call",
            Expr::Match { .. } => "match",
            Expr::Async(_) => "async block",
            Expr::Await(_) => "await",
            Expr::Lambda { .. } => "lambda",
        }
    }
}

/// One arm of a `match` expression
#[derive(Debug, Clone, PartialEq, Hash)]
pub struct MatchArm {
    pub pattern: Pattern,
    pub guard: Option<Expr>,
    pub body: Expr,
}

/// A pattern in a `match` arm
#[derive(Debug, Clone, PartialEq, Hash)]
pub enum Pattern {
    /// Matches when the scrutinee equals the literal
    Literal(Literal),
    /// Always matches; binds the scrutinee to the name
    Variable(String),
    /// Always matches; binds nothing
    Wildcard,
    /// Destructures object fields; a field without a subpattern binds the
    /// field value to a variable named after the key
    Object(Vec<FieldPattern>),
    /// Destructures array elements by index; `rest` binds the tail
    Array {
        elements: Vec<Pattern>,
        rest: Option<String>,
    },
}

/// A single field inside an object pattern
#[derive(Debug, Clone, PartialEq, Hash)]
pub struct FieldPattern {
    pub key: String,
    pub pattern: Option<Pattern>,
}

/// One `case` of a `switch` statement
#[derive(Debug, Clone, PartialEq, Hash)]
pub struct SwitchCase {
    pub value: Expr,
    pub body: Vec<Stmt>,
}

/// A statement
#[derive(Debug, Clone, PartialEq, Hash)]
pub enum Stmt {
    /// First-time declaration: `$ name = value`
    Assign { name: String, value: Expr },
    /// Reassignment of an already declared name: `name = value`
    Reassign { name: String, value: Expr },
    Return(Expr),
    If {
        condition: Expr,
        then_block: Vec<Stmt>,
        else_block: Option<Vec<Stmt>>,
    },
    While {
        condition: Expr,
        body: Vec<Stmt>,
    },
    /// `for [key,] value in iterable`
    For {
        key: Option<String>,
        value: String,
        iterable: Expr,
        body: Vec<Stmt>,
    },
    Switch {
        scrutinee: Expr,
        cases: Vec<SwitchCase>,
        default: Option<Vec<Stmt>>,
    },
    Break,
    Continue,
    /// Expression evaluated for its effect; the result is discarded
    Expression(Expr),
    /// Declarative validation rule; enforcement happens before entry, so
    /// this compiles to nothing
    Validation { field: String, rule: String },
}

impl Stmt {
    /// Short kind name for diagnostics
    pub fn kind_name(&self) -> &'static str {
        match self {
            Stmt::Assign { .. } => "assignment",
            Stmt::Reassign { .. } => "reassignment",
            Stmt::Return(_) => "return",
            Stmt::If { .. } => "if",
            Stmt::While { .. } => "while",
            Stmt::For { .. } => "for",
            Stmt::Switch { .. } => "switch",
            Stmt::Break => "break",
            Stmt::Continue => "continue",
            Stmt::Expression(_) => "expression",
            Stmt::Validation { .. } => "validation",
        }
    }
}

/// An HTTP route entry point
#[derive(Debug, Clone, PartialEq, Hash)]
pub struct Route {
    /// HTTP method, upper-case (`GET`, `POST`, ...)
    pub method: String,
    /// Declared path; `:name` segments become path parameters
    pub path: String,
    /// Names the host injects before execution
    pub injections: Vec<String>,
    /// Auth middleware name, when the route declares one
    pub auth: Option<String>,
    pub body: Vec<Stmt>,
}

/// A WebSocket route with up to four event handlers
#[derive(Debug, Clone, PartialEq, Hash, Default)]
pub struct WebSocketRoute {
    pub path: String,
    pub injections: Vec<String>,
    pub connect: Option<Vec<Stmt>>,
    pub message: Option<Vec<Stmt>>,
    pub disconnect: Option<Vec<Stmt>>,
    pub error: Option<Vec<Stmt>>,
}

/// A CLI command entry point
#[derive(Debug, Clone, PartialEq, Hash)]
pub struct Command {
    pub name: String,
    /// Declared parameter names, pre-populated by the CLI front end
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
}

/// A scheduled task entry point
#[derive(Debug, Clone, PartialEq, Hash)]
pub struct CronTask {
    pub name: String,
    /// Schedule expression; interpreted by the host scheduler
    pub schedule: String,
    pub injections: Vec<String>,
    pub body: Vec<Stmt>,
}

/// An event handler entry point
#[derive(Debug, Clone, PartialEq, Hash)]
pub struct EventHandler {
    pub event: String,
    pub injections: Vec<String>,
    pub body: Vec<Stmt>,
}

/// A queue worker entry point
#[derive(Debug, Clone, PartialEq, Hash)]
pub struct QueueWorker {
    pub queue: String,
    pub injections: Vec<String>,
    pub body: Vec<Stmt>,
}

/// A user-defined function
///
/// Function values are never materialized; calls are dispatched by name at
/// runtime. The optimizer may inline qualifying single-expression bodies.
#[derive(Debug, Clone, PartialEq, Hash)]
pub struct FunctionDecl {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
}

/// A named record type declaration
#[derive(Debug, Clone, PartialEq, Hash)]
pub struct TypeDef {
    pub name: String,
    /// Field name to type name, in declaration order
    pub fields: Vec<(String, String)>,
}

/// A parsed module: the unit of compilation
#[derive(Debug, Clone, PartialEq, Hash, Default)]
pub struct Module {
    pub routes: Vec<Route>,
    pub websockets: Vec<WebSocketRoute>,
    pub commands: Vec<Command>,
    pub cron_tasks: Vec<CronTask>,
    pub event_handlers: Vec<EventHandler>,
    pub queue_workers: Vec<QueueWorker>,
    pub functions: Vec<FunctionDecl>,
    pub types: Vec<TypeDef>,
}

impl Module {
    /// True when the module declares nothing at all
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
            && self.websockets.is_empty()
            && self.commands.is_empty()
            && self.cron_tasks.is_empty()
            && self.event_handlers.is_empty()
            && self.queue_workers.is_empty()
            && self.functions.is_empty()
            && self.types.is_empty()
    }
}
