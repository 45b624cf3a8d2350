//! Model module
//!
//! Typed casting of raw OData records through a model registry

pub mod record;
pub mod registry;

pub use record::{NativeUid, Record, TypedRecord, NATIVE_UID_FIELD};
pub use registry::{CastPolicy, Domain, ModelRef, ModelRegistry, StaticRegistry, ValidationError};
