//! Ingestion wire protocol: `name:value|type` lines.

pub mod parser;

pub use parser::parse_line;
