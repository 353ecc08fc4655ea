//! The build-script language: a brace-delimited statement language whose
//! comment syntax leaves `#|` front-matter untouched.

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod transform;

pub use ast::{Program, Stmt, StmtKind};
pub use parser::{parse_expression, parse_program};
pub use transform::transform;
