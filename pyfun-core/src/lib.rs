//! pyfun Core - a small Python-subset language for view functions.
//!
//! This crate parses and runs the single-function source texts that design
//! documents carry for map, reduce, update, show, filter and validation
//! handlers. It has no I/O of its own: the host converts JSON documents into
//! [`Value`]s, calls the loaded function and converts the result back.
//!
//! # Main Components
//!
//! - **Lexer**: Tokenizes source text, including indentation
//! - **Parser**: Builds a [`Module`] AST from the token stream
//! - **Interpreter**: Runs a module and calls the function it defines
//!
//! # Example
//!
//! ```rust
//! use pyfun_core::{Interpreter, Value};
//! use serde_json::json;
//!
//! let interpreter = Interpreter::new();
//! let program = interpreter
//!     .load("def fun(doc): yield doc['_id'], len(doc['tags'])")
//!     .unwrap();
//!
//! let doc = Value::from_json(&json!({"_id": "a", "tags": ["x", "y"]}));
//! let rows = interpreter.call(&program, vec![doc]).unwrap();
//! assert_eq!(rows.to_json().unwrap(), json!([["a", 2]]));
//! ```

pub mod ast;
pub mod error;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod value;

// Re-export main types for convenience
pub use ast::{Expr, FunctionDef, Module, Stmt, StmtKind};
pub use error::{PyfunError, PyfunResult};
pub use interpreter::{Interpreter, Program, DEFAULT_RECURSION_LIMIT};
pub use lexer::{Lexer, Token};
pub use parser::{parse, Parser};
pub use value::{Dict, Value};
