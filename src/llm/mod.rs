//! Model integration: the backend seam and the response parser.
//!
//! Transport to model servers lives outside this crate behind
//! [`ModelBackend`]; everything here is provider-agnostic.

pub mod parser;
pub mod provider;

pub use parser::{ParsedResponse, ResponseKind, parse_generation, parse_response};
pub use provider::*;
