//! Query pipeline: lexer, parser, semantic validation, planning, execution.

pub mod ast;
pub mod exec;
pub mod lexer;
pub mod parser;
pub mod plan;
pub mod validate;


pub use ast::Query;
pub use exec::{AggregateResult, AggregateSpec, AggregateValue, QueryOptions, QueryResult};
pub use parser::parse;
pub use plan::{Plan, SeedStrategy};
