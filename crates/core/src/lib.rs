pub mod attributes;
pub mod clock;
pub mod error;
pub mod field_value;
pub mod ids;
pub mod methods;
pub mod path;

pub use attributes::{Attributes, Choice, FieldKind, FieldSchemaNode};
pub use clock::{Clock, SystemClock};
pub use error::CoreError;
pub use field_value::FieldValue;
pub use ids::*;
pub use methods::{Methods, Verb};
pub use path::{FieldPath, Segment};
