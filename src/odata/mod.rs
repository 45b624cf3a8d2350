//! OData module
//!
//! Transport boundary, query execution with pagination, and bulk data
//! retrieval for the DSIS API

pub mod bulk;
pub mod client;
pub mod transport;

pub use bulk::{media_link_of, DEFAULT_BULK_ACCEPT, DEFAULT_CHUNK_SIZE};
pub use client::{DsisClient, ExecuteOptions, ODataPage, QueryStream};
pub use transport::{HttpTransport, StreamingResponse, Transport, TransportError, TransportResponse};
