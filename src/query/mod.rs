//! Query module
//!
//! Fluent construction of DSIS OData queries

pub mod builder;
mod encode;

pub use builder::{EntityTarget, IntoFieldList, QueryBuilder, SchemaRef, DEFAULT_DATA_FIELD};
pub(crate) use encode::{encode_key, encode_segment};
