mod column_definition;
pub mod prepared;
pub mod query;
pub mod utility;

pub use column_definition::{Column, ColumnDefinitionTail};
#[cfg(test)]
pub(crate) use column_definition::encode_column_definition;
pub use prepared::{Param, PrepareOk};
pub use query::{QueryEvent, ResponseMachine, write_query};
