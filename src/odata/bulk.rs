//! Bulk data retrieval
//!
//! Binary fields (horizon grids, surfaces, log curves) are read from a single
//! entity, either through its data field, `Schema('{id}')/data`, or through a
//! media link taken from an earlier metadata response. Which of the two a
//! schema supports is not known up front, so the caller picks one on the
//! query.

use super::client::DsisClient;
use crate::error::DsisError;
use crate::query::QueryBuilder;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use reqwest::StatusCode;
use serde_json::Value;

/// Default size of streamed chunks (10 MiB)
pub const DEFAULT_CHUNK_SIZE: usize = 10 * 1024 * 1024;

/// Accept header used when none is given
pub const DEFAULT_BULK_ACCEPT: &str = "application/json";

const MEDIA_LINK_KEYS: [&str; 3] = [
    "@odata.mediaReadLink",
    "odata.mediaReadLink",
    "@odata.mediaEditLink",
];

/// Media link of a metadata record, if it carries one
///
/// The field-specific link (`{field}@odata.mediaReadLink`) wins over the
/// entity-wide one.
pub fn media_link_of(record: &Value, data_field: &str) -> Option<String> {
    let record = record.as_object()?;
    let field_keys = [
        format!("{}@odata.mediaReadLink", data_field),
        format!("{}@odata.mediaEditLink", data_field),
    ];

    let link = field_keys
        .iter()
        .map(String::as_str)
        .chain(MEDIA_LINK_KEYS)
        .filter_map(|key| record.get(key)?.as_str())
        .find(|link| !link.trim().is_empty())
        .map(String::from);
    link
}

fn require_entity(query: &QueryBuilder) -> Result<(), DsisError> {
    if query.entity_target().is_none() {
        return Err(DsisError::configuration(
            "bulk data needs an entity target, call entity() or media_link() first",
        ));
    }
    Ok(())
}

impl DsisClient {
    /// Fetch an entity's binary data into memory
    ///
    /// Returns `None` when the entity has no data (404 or empty body). The
    /// whole payload is buffered, so prefer [`DsisClient::get_bulk_data_stream`]
    /// for anything past a few hundred MB.
    pub async fn get_bulk_data(
        &self,
        query: &QueryBuilder,
        accept: &str,
    ) -> Result<Option<Bytes>, DsisError> {
        require_entity(query)?;
        let url = self.endpoint_for(query)?;
        tracing::info!("Fetching bulk data from {}", url);

        let response = self.send(&url, accept).await?;
        if response.status == StatusCode::NOT_FOUND {
            tracing::info!("No bulk data at {}", url);
            return Ok(None);
        }
        if !response.status.is_success() {
            let body = response.text();
            tracing::error!("Bulk data request failed ({}): {}", response.status, body);
            return Err(DsisError::Api {
                status: response.status.as_u16(),
                body,
            });
        }

        if response.body.is_empty() {
            tracing::info!("Bulk data at {} is empty", url);
            return Ok(None);
        }
        tracing::info!("Received {} bytes of bulk data", response.body.len());
        Ok(Some(response.body))
    }

    /// Stream an entity's binary data in chunks of at most `chunk_size` bytes
    ///
    /// The request is sent before this returns, so status errors surface
    /// here; the body is read as the stream is polled. Every chunk except
    /// the last is exactly `chunk_size` bytes. A 404 gives an empty stream.
    pub async fn get_bulk_data_stream(
        &self,
        query: &QueryBuilder,
        chunk_size: usize,
        accept: &str,
    ) -> Result<BoxStream<'static, Result<Bytes, DsisError>>, DsisError> {
        if chunk_size == 0 {
            return Err(DsisError::configuration("chunk size must be greater than 0"));
        }
        require_entity(query)?;
        let url = self.endpoint_for(query)?;
        tracing::info!("Streaming bulk data from {} in {} byte chunks", url, chunk_size);

        let response = self.send_stream(&url, accept).await?;
        if response.status == StatusCode::NOT_FOUND {
            tracing::info!("No bulk data at {}", url);
            return Ok(stream::empty().boxed());
        }
        if !response.status.is_success() {
            let status = response.status.as_u16();
            let body = response.into_buffered().await?.text();
            tracing::error!("Bulk data request failed ({}): {}", status, body);
            return Err(DsisError::Api { status, body });
        }

        let body = response.body.map_err(DsisError::from).boxed();
        Ok(rechunk(body, chunk_size))
    }
}

/// Re-cut a byte stream into `chunk_size` pieces
pub(crate) fn rechunk(
    body: BoxStream<'static, Result<Bytes, DsisError>>,
    chunk_size: usize,
) -> BoxStream<'static, Result<Bytes, DsisError>> {
    let state = (body, BytesMut::new(), false);
    stream::try_unfold(state, move |(mut body, mut buf, mut done)| async move {
        loop {
            if buf.len() >= chunk_size {
                let chunk = buf.split_to(chunk_size).freeze();
                return Ok(Some((chunk, (body, buf, done))));
            }
            if done {
                if buf.is_empty() {
                    return Ok::<_, DsisError>(None);
                }
                let chunk = buf.split().freeze();
                return Ok(Some((chunk, (body, buf, done))));
            }
            match body.try_next().await? {
                Some(bytes) => buf.extend_from_slice(&bytes),
                None => done = true,
            }
        }
    })
    .boxed()
}
