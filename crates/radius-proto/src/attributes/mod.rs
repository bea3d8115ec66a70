mod attribute;
mod types;

pub use attribute::{parse_attributes, Attribute};
pub use types::{AttributeType, ValueFormat};
