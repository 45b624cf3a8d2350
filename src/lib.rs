//! DSIS client library
//!
//! Client SDK for the DSIS OData API behind the Equinor API gateway.
//! Builds OData queries, walks paginated results as lazy streams, casts
//! records to typed models and retrieves binary bulk data.

pub mod auth;
pub mod config;
pub mod error;
pub mod models;
pub mod odata;
pub mod query;

pub use auth::{Authenticator, DsisAuth};
pub use config::{Config, DsisConfig, Environment};
pub use error::DsisError;
pub use models::{CastPolicy, Domain, ModelRef, NativeUid, Record, StaticRegistry};
pub use odata::{DsisClient, ExecuteOptions, HttpTransport, Transport};
pub use query::QueryBuilder;
