mod common;

use bytes::Bytes;
use common::{client, FakeAuth, FakeTransport, Reply};
use dsis_client::odata::{media_link_of, DEFAULT_BULK_ACCEPT, DEFAULT_CHUNK_SIZE};
use dsis_client::{DsisError, QueryBuilder};
use futures::TryStreamExt;
use reqwest::StatusCode;
use serde_json::json;

const MIB: usize = 1024 * 1024;

fn horizon() -> QueryBuilder {
    QueryBuilder::new("OW_SV4TSTA", "SNORRE").schema("HorizonData3D")
}

#[tokio::test]
async fn test_stream_rechunks_large_buffer() {
    let payload: Vec<u8> = (0..25 * MIB).map(|i| (i % 251) as u8).collect();
    let transport = FakeTransport::new(vec![Reply::Chunks(
        StatusCode::OK,
        vec![Bytes::from(payload.clone())],
    )]);
    let auth = FakeAuth::new();
    let client = client(&transport, &auth);

    let query = horizon().entity("46075").unwrap();
    let chunks: Vec<Bytes> = client
        .get_bulk_data_stream(&query, DEFAULT_CHUNK_SIZE, DEFAULT_BULK_ACCEPT)
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();

    let sizes: Vec<usize> = chunks.iter().map(Bytes::len).collect();
    assert_eq!(sizes, vec![10 * MIB, 10 * MIB, 5 * MIB]);
    assert_eq!(chunks.concat(), payload);
    assert_eq!(
        transport.calls()[0],
        "https://gateway.test/dsdata/v1/OpenWorksCommonModel/5000107/OW_SV4TSTA/SNORRE/HorizonData3D('46075')/data"
    );
}

#[tokio::test]
async fn test_stream_merges_small_server_chunks() {
    let parts = vec![Bytes::from_static(b"abc"); 5];
    let transport = FakeTransport::new(vec![Reply::Chunks(StatusCode::OK, parts)]);
    let auth = FakeAuth::new();
    let client = client(&transport, &auth);

    let query = horizon().entity("1").unwrap();
    let chunks: Vec<Bytes> = client
        .get_bulk_data_stream(&query, 4, "application/octet-stream")
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();

    let sizes: Vec<usize> = chunks.iter().map(Bytes::len).collect();
    assert_eq!(sizes, vec![4, 4, 4, 3]);
    assert_eq!(transport.accepts(), vec!["application/octet-stream"]);
}

#[tokio::test]
async fn test_stream_not_found_is_empty() {
    let transport = FakeTransport::new(vec![Reply::status(404, "no data")]);
    let auth = FakeAuth::new();
    let client = client(&transport, &auth);

    let query = horizon().entity("1").unwrap();
    let chunks: Vec<Bytes> = client
        .get_bulk_data_stream(&query, DEFAULT_CHUNK_SIZE, DEFAULT_BULK_ACCEPT)
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert!(chunks.is_empty());
}

#[tokio::test]
async fn test_stream_retries_after_refresh() {
    let transport = FakeTransport::new(vec![
        Reply::status(401, ""),
        Reply::Chunks(StatusCode::OK, vec![Bytes::from_static(b"grid")]),
    ]);
    let auth = FakeAuth::new();
    let client = client(&transport, &auth);

    let query = horizon().entity("1").unwrap();
    let chunks: Vec<Bytes> = client
        .get_bulk_data_stream(&query, DEFAULT_CHUNK_SIZE, DEFAULT_BULK_ACCEPT)
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(chunks, vec![Bytes::from_static(b"grid")]);
    assert_eq!(auth.refresh_count(), 1);
}

#[tokio::test]
async fn test_zero_chunk_size_is_rejected() {
    let transport = FakeTransport::new(vec![]);
    let auth = FakeAuth::new();
    let client = client(&transport, &auth);

    let query = horizon().entity("1").unwrap();
    let err = client
        .get_bulk_data_stream(&query, 0, DEFAULT_BULK_ACCEPT)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, DsisError::Configuration(_)));
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn test_bulk_needs_entity_target() {
    let transport = FakeTransport::new(vec![]);
    let auth = FakeAuth::new();
    let client = client(&transport, &auth);

    let err = client
        .get_bulk_data(&horizon(), DEFAULT_BULK_ACCEPT)
        .await
        .unwrap_err();
    assert!(matches!(err, DsisError::Configuration(_)));
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn test_get_bulk_data() {
    let transport = FakeTransport::new(vec![
        Reply::Full(StatusCode::OK, Bytes::from_static(b"\x00\x01\x02")),
        Reply::status(404, "not found"),
        Reply::Full(StatusCode::NO_CONTENT, Bytes::new()),
        Reply::status(500, "boom"),
    ]);
    let auth = FakeAuth::new();
    let client = client(&transport, &auth);

    let record = json!({"native_uid": "46075", "horizon_name": "Top Brent"});
    let query = horizon()
        .entity_with_field(&record, "$value")
        .unwrap()
        .format("json");

    let data = client.get_bulk_data(&query, DEFAULT_BULK_ACCEPT).await.unwrap();
    assert_eq!(data.as_deref(), Some(&b"\x00\x01\x02"[..]));
    assert!(transport.calls()[0].ends_with("HorizonData3D('46075')/$value?$format=json"));

    assert_eq!(client.get_bulk_data(&query, DEFAULT_BULK_ACCEPT).await.unwrap(), None);
    assert_eq!(client.get_bulk_data(&query, DEFAULT_BULK_ACCEPT).await.unwrap(), None);

    let err = client
        .get_bulk_data(&query, DEFAULT_BULK_ACCEPT)
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(500));
}

#[tokio::test]
async fn test_bulk_through_media_link() {
    let transport = FakeTransport::new(vec![Reply::Full(
        StatusCode::OK,
        Bytes::from_static(b"surface"),
    )]);
    let auth = FakeAuth::new();
    let client = client(&transport, &auth);

    let metadata = json!({
        "native_uid": "9",
        "data@odata.mediaReadLink": "SurfaceGrid('9')/data/$value"
    });
    let link = media_link_of(&metadata, "data").unwrap();
    let query = QueryBuilder::new("OW_SV4TSTA", "SNORRE")
        .schema("SurfaceGrid")
        .media_link(link)
        .unwrap();

    let data = client.get_bulk_data(&query, DEFAULT_BULK_ACCEPT).await.unwrap();
    assert_eq!(data, Some(Bytes::from_static(b"surface")));
    assert_eq!(
        transport.calls()[0],
        "https://gateway.test/dsdata/v1/OpenWorksCommonModel/5000107/OW_SV4TSTA/SNORRE/SurfaceGrid('9')/data/$value"
    );
}

#[tokio::test]
async fn test_stream_second_auth_failure_is_fatal() {
    let transport = FakeTransport::new(vec![
        Reply::status(401, "expired"),
        Reply::status(403, "denied"),
    ]);
    let auth = FakeAuth::new();
    let client = client(&transport, &auth);

    let query = horizon().entity("1").unwrap();
    let err = client
        .get_bulk_data_stream(&query, DEFAULT_CHUNK_SIZE, DEFAULT_BULK_ACCEPT)
        .await
        .err()
        .unwrap();

    assert!(matches!(err, DsisError::Authentication(_)));
    assert_eq!(err.status(), Some(403));
    assert!(err.to_string().contains("denied"));
    assert_eq!(auth.refresh_count(), 1);
    assert_eq!(transport.call_count(), 2);
}

#[tokio::test]
async fn test_stream_api_error_carries_body() {
    let transport = FakeTransport::new(vec![Reply::Chunks(
        StatusCode::INTERNAL_SERVER_ERROR,
        vec![Bytes::from_static(b"bo"), Bytes::from_static(b"om")],
    )]);
    let auth = FakeAuth::new();
    let client = client(&transport, &auth);

    let query = horizon().entity("1").unwrap();
    let err = client
        .get_bulk_data_stream(&query, DEFAULT_CHUNK_SIZE, DEFAULT_BULK_ACCEPT)
        .await
        .err()
        .unwrap();

    match err {
        DsisError::Api { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "boom");
        }
        other => panic!("expected API error, got {:?}", other),
    }
    assert_eq!(auth.refresh_count(), 0);
}
