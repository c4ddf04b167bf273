//! Expression language used inside templates.
//!
//! Attribute values, buffered code, interpolations, conditions, loop
//! subjects and mixin arguments are all small expressions.  They are parsed
//! once at compile time into [`Expr`] trees and evaluated by the renderer
//! through the [`EvalContext`] trait.
//!
//! ```rust
//! use pug::script::{eval_str, EvalContext, Value};
//! use std::collections::HashMap;
//!
//! #[derive(Default)]
//! struct Vars(HashMap<String, Value>);
//!
//! impl EvalContext for Vars {
//!     fn get_var(&self, name: &str) -> Option<Value> { self.0.get(name).cloned() }
//!     fn set_var(&mut self, name: &str, v: Value) { self.0.insert(name.into(), v); }
//!     fn declare_var(&mut self, name: &str, v: Value) { self.0.insert(name.into(), v); }
//! }
//!
//! let mut vars = Vars::default();
//! assert_eq!(eval_str("6 * 7 + 'px'", &mut vars).unwrap(), Value::from("42px"));
//! ```

pub mod builtins;
pub mod expr;
pub mod value;

// Re-exports for convenience.
pub use expr::{
    eval_constant, eval_expr, eval_list, eval_str, exec_statements, is_expression, parse_args,
    parse_expr, parse_params, parse_statements, EvalContext, Expr, Stmt,
};
pub use value::{Object, Value};
