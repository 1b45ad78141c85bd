mod parser;
mod types;

pub use parser::{parse_collections, parse_collections_str};
pub use types::{Collection, DataType, Properties, Property, DERIVED_KEYS};
