//! Test doubles for the transport and auth collaborators

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use dsis_client::auth::{AuthError, Authenticator};
use dsis_client::config::{Credentials, DsisConfig, Environment};
use dsis_client::odata::{StreamingResponse, Transport, TransportError, TransportResponse};
use dsis_client::DsisClient;
use futures::stream::{self, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const BASE_URL: &str = "https://gateway.test";

pub fn credentials() -> Credentials {
    Credentials {
        tenant_id: "tenant".to_string(),
        client_id: "client".to_string(),
        client_secret: "secret".to_string(),
        access_app_id: "app".to_string(),
        dsis_username: "user".to_string(),
        dsis_password: "password".to_string(),
        subscription_key_dsauth: "auth-key".to_string(),
        subscription_key_dsdata: "data-key".to_string(),
    }
}

pub fn config() -> DsisConfig {
    DsisConfig::for_common_model(Environment::Dev, credentials())
        .unwrap()
        .with_base_url(BASE_URL)
}

/// Canned reply for one transport call
pub enum Reply {
    Full(StatusCode, Bytes),
    Chunks(StatusCode, Vec<Bytes>),
}

impl Reply {
    pub fn json(value: Value) -> Self {
        Reply::Full(StatusCode::OK, Bytes::from(value.to_string()))
    }

    pub fn status(status: u16, body: &str) -> Self {
        Reply::Full(
            StatusCode::from_u16(status).unwrap(),
            Bytes::from(body.to_string()),
        )
    }
}

/// Transport that plays back replies in order and records each URL
#[derive(Default)]
pub struct FakeTransport {
    replies: Mutex<VecDeque<Reply>>,
    calls: Mutex<Vec<String>>,
    accepts: Mutex<Vec<String>>,
}

impl FakeTransport {
    pub fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            ..Self::default()
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn accepts(&self) -> Vec<String> {
        self.accepts.lock().unwrap().clone()
    }

    fn next(&self, url: &str, headers: &HeaderMap) -> Result<Reply, TransportError> {
        self.calls.lock().unwrap().push(url.to_string());
        if let Some(accept) = headers.get("accept").and_then(|v| v.to_str().ok()) {
            self.accepts.lock().unwrap().push(accept.to_string());
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| TransportError::Other(format!("no reply scripted for {}", url)))
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn get(
        &self,
        url: &str,
        headers: HeaderMap,
    ) -> Result<TransportResponse, TransportError> {
        match self.next(url, &headers)? {
            Reply::Full(status, body) => Ok(TransportResponse::new(status, body)),
            Reply::Chunks(status, chunks) => Ok(TransportResponse::new(status, chunks.concat())),
        }
    }

    async fn get_stream(
        &self,
        url: &str,
        headers: HeaderMap,
    ) -> Result<StreamingResponse, TransportError> {
        let (status, chunks) = match self.next(url, &headers)? {
            Reply::Full(status, body) => (status, vec![body]),
            Reply::Chunks(status, chunks) => (status, chunks),
        };
        Ok(StreamingResponse {
            status,
            headers: HeaderMap::new(),
            body: stream::iter(chunks.into_iter().map(Ok)).boxed(),
        })
    }
}

/// Authenticator that counts refreshes
#[derive(Default)]
pub struct FakeAuth {
    refreshes: AtomicUsize,
}

impl FakeAuth {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Authenticator for FakeAuth {
    async fn auth_headers(&self) -> Result<HeaderMap, AuthError> {
        let generation = self.refreshes.load(Ordering::SeqCst);
        let mut headers = HeaderMap::new();
        headers.insert(
            "dsis-token",
            HeaderValue::from_str(&format!("token-{}", generation))
                .map_err(|_| AuthError::InvalidHeader("dsis-token"))?,
        );
        Ok(headers)
    }

    async fn refresh(&self) -> Result<(), AuthError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn client(transport: &Arc<FakeTransport>, auth: &Arc<FakeAuth>) -> DsisClient {
    DsisClient::new(config(), transport.clone(), auth.clone())
}

/// A page of `n` records numbered from `start`, with an optional next link
pub fn page(start: usize, n: usize, next: Option<&str>) -> Reply {
    let records: Vec<Value> = (start..start + n)
        .map(|i| json!({"native_uid": i.to_string(), "name": format!("Well-{}", i)}))
        .collect();
    let mut body = json!({"@odata.context": "$metadata#Well", "value": records});
    if let Some(link) = next {
        body["@odata.nextLink"] = json!(link);
    }
    Reply::json(body)
}
