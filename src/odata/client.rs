//! DSIS OData client
//!
//! `DsisClient` is the execution context: it owns the transport, the
//! authenticator and the optional model registry, and every query operation
//! goes through it. Queries are walked page by page as lazy streams that
//! follow `@odata.nextLink` until the server stops returning one.

use super::transport::{HttpTransport, StreamingResponse, Transport, TransportResponse};
use crate::auth::{AuthError, Authenticator, DsisAuth};
use crate::config::DsisConfig;
use crate::error::DsisError;
use crate::models::{
    CastPolicy, Domain, ModelRef, ModelRegistry, Record, TypedRecord, ValidationError,
};
use crate::query::{encode_key, encode_segment, EntityTarget, QueryBuilder};
use futures::stream::{self, BoxStream, Stream, StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

const JSON_ACCEPT: &str = "application/json";

/// One page of an OData collection response
///
/// Both OData v4 (`@odata.nextLink`) and v3 (`odata.nextLink`) annotations
/// are accepted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ODataPage {
    #[serde(rename = "@odata.context", alias = "odata.context", default)]
    pub context: Option<String>,

    #[serde(rename = "@odata.nextLink", alias = "odata.nextLink", default)]
    pub next_link: Option<String>,

    #[serde(
        rename = "@odata.count",
        alias = "odata.count",
        default,
        deserialize_with = "count_from_number_or_string"
    )]
    pub count: Option<i64>,

    #[serde(default)]
    pub value: Vec<Value>,
}

impl ODataPage {
    pub fn has_next(&self) -> bool {
        self.next_link.is_some()
    }
}

// OData v3 services send the count as a string
fn count_from_number_or_string<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_i64()),
        Some(Value::String(s)) => s
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid count '{}'", s))),
        Some(other) => Err(serde::de::Error::custom(format!("invalid count {}", other))),
    }
}

/// Options for [`DsisClient::execute_query`]
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecuteOptions {
    /// Cast records to the query's typed model
    ///
    /// Has no effect when the schema was given as a plain name: records are
    /// then returned raw.
    pub cast: bool,
    /// Upper bound on page fetches; `None` walks every page
    pub max_pages: Option<usize>,
    /// What a failed cast does to the stream
    pub cast_policy: CastPolicy,
}

impl ExecuteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cast(mut self, cast: bool) -> Self {
        self.cast = cast;
        self
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = Some(max_pages);
        self
    }

    pub fn with_cast_policy(mut self, policy: CastPolicy) -> Self {
        self.cast_policy = policy;
        self
    }
}

/// Lazy stream of query records
///
/// Each call to `execute_query` owns its own page cursor; the stream cannot
/// be restarted. It ends after the first error.
pub struct QueryStream {
    inner: BoxStream<'static, Result<Record, DsisError>>,
    skipped: Arc<AtomicUsize>,
}

impl QueryStream {
    /// Records dropped so far by a lenient cast
    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::Relaxed)
    }
}

impl Stream for QueryStream {
    type Item = Result<Record, DsisError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().inner.poll_next_unpin(cx)
    }
}

impl fmt::Debug for QueryStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryStream")
            .field("skipped", &self.skipped())
            .finish_non_exhaustive()
    }
}

/// Client for the DSIS OData API
#[derive(Clone)]
pub struct DsisClient {
    config: DsisConfig,
    transport: Arc<dyn Transport>,
    auth: Arc<dyn Authenticator>,
    registry: Option<Arc<dyn ModelRegistry>>,
}

impl DsisClient {
    /// Create a client from explicit collaborators
    pub fn new(
        config: DsisConfig,
        transport: Arc<dyn Transport>,
        auth: Arc<dyn Authenticator>,
    ) -> Self {
        tracing::info!(
            "DSIS client for {} ({} {})",
            config.environment,
            config.model_name,
            config.model_version
        );
        Self {
            config,
            transport,
            auth,
            registry: None,
        }
    }

    /// Create a client that talks HTTP and authenticates with [`DsisAuth`]
    pub fn from_config(config: DsisConfig) -> Result<Self, DsisError> {
        config.validate()?;
        let transport = HttpTransport::new(config.timeout)?;
        let auth = DsisAuth::with_client(config.clone(), transport.client().clone());
        Ok(Self::new(config, Arc::new(transport), Arc::new(auth)))
    }

    /// Attach a model registry
    pub fn with_registry(mut self, registry: Arc<dyn ModelRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn config(&self) -> &DsisConfig {
        &self.config
    }

    /// Dataset root: `{data_endpoint}/{model}/{version}/{district}/{project}`
    fn dataset_url(&self, query: &QueryBuilder) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            self.config.data_endpoint(),
            self.config.model_name,
            self.config.model_version,
            encode_segment(query.district_id()),
            encode_segment(query.project())
        )
    }

    /// Full URL a query is sent to
    ///
    /// District and project are required; an empty one is a configuration
    /// error.
    pub fn endpoint_for(&self, query: &QueryBuilder) -> Result<String, DsisError> {
        if query.district_id().trim().is_empty() {
            return Err(DsisError::configuration("district_id must be set before execution"));
        }
        if query.project().trim().is_empty() {
            return Err(DsisError::configuration("project must be set before execution"));
        }

        if let Some(EntityTarget::MediaLink(link)) = query.entity_target() {
            if link.starts_with("http://") || link.starts_with("https://") {
                let params = query.query_string();
                let sep = if link.contains('?') { '&' } else { '?' };
                return Ok(if params.is_empty() {
                    link.clone()
                } else {
                    format!("{}{}{}", link, sep, params)
                });
            }
        }

        Ok(format!("{}/{}", self.dataset_url(query), query.render()?))
    }

    async fn request_headers(&self, accept: &str) -> Result<HeaderMap, DsisError> {
        let mut headers = self.auth.auth_headers().await?;
        let value = HeaderValue::from_str(accept).map_err(|_| {
            DsisError::configuration(format!("invalid Accept header '{}'", accept))
        })?;
        headers.insert(ACCEPT, value);
        Ok(headers)
    }

    /// GET with a single refresh-and-retry on 401/403
    pub(super) async fn send(
        &self,
        url: &str,
        accept: &str,
    ) -> Result<TransportResponse, DsisError> {
        let response = self
            .transport
            .get(url, self.request_headers(accept).await?)
            .await?;
        if !response.is_auth_failure() {
            return Ok(response);
        }

        tracing::warn!(
            "Request unauthorized ({}), refreshing tokens and retrying",
            response.status
        );
        self.auth.refresh().await?;

        let response = self
            .transport
            .get(url, self.request_headers(accept).await?)
            .await?;
        if response.is_auth_failure() {
            tracing::error!("Still unauthorized after token refresh: {}", response.status);
            return Err(AuthError::Unauthorized {
                status: response.status.as_u16(),
                body: response.text(),
            }
            .into());
        }
        Ok(response)
    }

    /// Streaming GET with the same auth retry as [`DsisClient::send`]
    pub(super) async fn send_stream(
        &self,
        url: &str,
        accept: &str,
    ) -> Result<StreamingResponse, DsisError> {
        let response = self
            .transport
            .get_stream(url, self.request_headers(accept).await?)
            .await?;
        if !response.is_auth_failure() {
            return Ok(response);
        }

        tracing::warn!(
            "Stream request unauthorized ({}), refreshing tokens and retrying",
            response.status
        );
        drop(response);
        self.auth.refresh().await?;

        let response = self
            .transport
            .get_stream(url, self.request_headers(accept).await?)
            .await?;
        if response.is_auth_failure() {
            let status = response.status.as_u16();
            let body = response.into_buffered().await?.text();
            tracing::error!("Still unauthorized after token refresh: {}", status);
            return Err(AuthError::Unauthorized { status, body }.into());
        }
        Ok(response)
    }

    /// Fetch one page from a URL; relative next links are resolved against it
    async fn fetch_url(&self, url: &str) -> Result<ODataPage, DsisError> {
        tracing::debug!("Fetching: {}", url);
        let response = self.send(url, JSON_ACCEPT).await?;

        if !response.status.is_success() {
            let body = response.text();
            tracing::error!("API error ({}) for {}: {}", response.status, url, body);
            return Err(DsisError::Api {
                status: response.status.as_u16(),
                body,
            });
        }

        let mut page: ODataPage = if response.body.is_empty() {
            ODataPage::default()
        } else {
            serde_json::from_slice(&response.body)
                .map_err(|e| DsisError::Parse(format!("Failed to parse OData page: {}", e)))?
        };

        page.next_link = match page.next_link.take() {
            Some(link) if !link.trim().is_empty() => Some(resolve_link(url, &link)?),
            _ => None,
        };

        tracing::debug!(
            "Page has {} records, next link: {}",
            page.value.len(),
            page.next_link.is_some()
        );
        Ok(page)
    }

    /// Fetch a single page: the query's first page, or the page at `next_link`
    pub async fn fetch_page(
        &self,
        query: &QueryBuilder,
        next_link: Option<&str>,
    ) -> Result<ODataPage, DsisError> {
        let first = self.endpoint_for(query)?;
        match next_link.filter(|link| !link.trim().is_empty()) {
            Some(link) => self.fetch_url(&resolve_link(&first, link)?).await,
            None => self.fetch_url(&first).await,
        }
    }

    /// Direct GET on `{model}/{version}[/{district}][/{project}][/{table}]`
    ///
    /// Every path segment is optional, so the model root and district level
    /// can be read too. When a district or project is given without a table,
    /// the configured model name is used as the table. `params` are appended
    /// in order. With `validate_model` set and a registry attached, an
    /// explicit table unknown to the registry is a configuration error.
    pub async fn get_odata(
        &self,
        district: Option<&str>,
        project: Option<&str>,
        table: Option<&str>,
        params: &[(&str, &str)],
        validate_model: bool,
    ) -> Result<Value, DsisError> {
        if validate_model {
            if let Some(table) = table {
                let known = self.is_valid_model(table, Domain::Common)
                    || self.is_valid_model(table, Domain::Native);
                if !known {
                    return Err(DsisError::configuration(format!(
                        "unknown model '{}', see list_models()",
                        table
                    )));
                }
            }
        }

        let table = match table {
            Some(table) => Some(table),
            None if district.is_some() || project.is_some() => {
                tracing::debug!("Using model {} as table", self.config.model_name);
                Some(self.config.model_name.as_str())
            }
            None => None,
        };

        let mut url = format!(
            "{}/{}/{}",
            self.config.data_endpoint(),
            self.config.model_name,
            self.config.model_version
        );
        for segment in [district, project, table].into_iter().flatten() {
            if segment.trim().is_empty() {
                return Err(DsisError::configuration("path segments must not be empty"));
            }
            url.push('/');
            url.push_str(&encode_segment(segment));
        }
        if !params.is_empty() {
            let query = params
                .iter()
                .map(|(key, value)| format!("{}={}", encode_key(key), encode_segment(value)))
                .collect::<Vec<_>>()
                .join("&");
            url.push('?');
            url.push_str(&query);
        }

        tracing::debug!("Fetching: {}", url);
        let response = self.send(&url, JSON_ACCEPT).await?;
        if !response.status.is_success() {
            let body = response.text();
            tracing::error!("API error ({}) for {}: {}", response.status, url, body);
            return Err(DsisError::Api {
                status: response.status.as_u16(),
                body,
            });
        }
        if response.body.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&response.body)
            .map_err(|e| DsisError::Parse(format!("Failed to parse response: {}", e)))
    }

    /// Run a query as a lazy record stream
    ///
    /// The URL is built before this returns, so configuration errors surface
    /// here. Transport, API and authentication errors end the stream where
    /// they happen; records already yielded stay valid.
    ///
    /// With `cast` set and a typed schema, each record is cast to the model.
    /// A plain schema name has no model, so records come back raw.
    pub fn execute_query(
        &self,
        query: &QueryBuilder,
        options: ExecuteOptions,
    ) -> Result<QueryStream, DsisError> {
        let url = self.endpoint_for(query)?;

        let model = match (options.cast, query.model()) {
            (true, Some(model)) => Some(model.clone()),
            (true, None) => {
                tracing::debug!(
                    "Cast requested for schema {:?} without a model, returning raw records",
                    query.schema_name()
                );
                None
            }
            (false, _) => None,
        };

        tracing::info!("Executing query: {}", url);
        let skipped = Arc::new(AtomicUsize::new(0));
        let cursor = PageCursor {
            client: self.clone(),
            next_url: Some(url),
            pages_fetched: 0,
            max_pages: options.max_pages,
            buffer: VecDeque::new(),
            model,
            policy: options.cast_policy,
            index: 0,
            skipped: Arc::clone(&skipped),
        };

        Ok(QueryStream {
            inner: stream::try_unfold(cursor, PageCursor::advance).boxed(),
            skipped,
        })
    }

    /// Run a query and deserialize every record into `T`
    ///
    /// A record that does not match `T` ends the stream with a validation
    /// error.
    pub fn execute_query_as<T>(
        &self,
        query: &QueryBuilder,
        max_pages: Option<usize>,
    ) -> Result<BoxStream<'static, Result<T, DsisError>>, DsisError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let options = ExecuteOptions {
            max_pages,
            ..ExecuteOptions::default()
        };
        let records = self.execute_query(query, options)?;
        let model = query.schema_name().unwrap_or_default().to_string();

        let typed = stream::try_unfold((records, 0usize), move |(mut records, index)| {
            let model = model.clone();
            async move {
                let Some(record) = records.try_next().await? else {
                    return Ok::<_, DsisError>(None);
                };
                let value = serde_json::from_value::<T>(record.into_raw()).map_err(|e| {
                    ValidationError {
                        model,
                        index,
                        message: e.to_string(),
                    }
                })?;
                Ok(Some((value, (records, index + 1))))
            }
        });
        Ok(typed.boxed())
    }

    /// Run a query to completion and collect every record
    pub async fn collect_all(
        &self,
        query: &QueryBuilder,
        options: ExecuteOptions,
    ) -> Result<Vec<Record>, DsisError> {
        self.execute_query(query, options)?.try_collect().await
    }

    /// Look up a model in the registry
    pub fn get_model_by_name(&self, name: &str, domain: Domain) -> Option<ModelRef> {
        self.registry.as_ref()?.resolve(name, domain)
    }

    /// Check a model name; without a registry every name is accepted
    pub fn is_valid_model(&self, name: &str, domain: Domain) -> bool {
        match self.registry {
            Some(ref registry) => registry.resolve(name, domain).is_some(),
            None => true,
        }
    }

    /// Registered model names in a domain
    pub fn list_models(&self, domain: Domain) -> Vec<String> {
        self.registry
            .as_ref()
            .map(|registry| registry.names(domain))
            .unwrap_or_default()
    }

    /// Cast raw records to a model, failing on the first mismatch
    pub fn cast_results(
        &self,
        records: &[Value],
        model: &ModelRef,
    ) -> Result<Vec<TypedRecord>, DsisError> {
        records
            .iter()
            .enumerate()
            .map(|(index, raw)| self.cast_one(raw.clone(), model, index))
            .collect::<Result<Vec<_>, _>>()
            .map_err(DsisError::from)
    }

    fn cast_one(
        &self,
        raw: Value,
        model: &ModelRef,
        index: usize,
    ) -> Result<TypedRecord, ValidationError> {
        match self.registry {
            Some(ref registry) => registry.cast(raw, model, index),
            None => model.cast(raw, index),
        }
    }

    /// Check that the data endpoint is reachable with the current credentials
    ///
    /// 200 and 404 both count as reachable. Failures are logged, not returned.
    pub async fn test_connection(&self) -> bool {
        let url = self.config.data_endpoint();
        match self.send(&url, JSON_ACCEPT).await {
            Ok(response) => {
                let reachable =
                    response.status == StatusCode::OK || response.status == StatusCode::NOT_FOUND;
                if reachable {
                    tracing::info!("Connection test succeeded ({})", response.status);
                } else {
                    tracing::error!(
                        "Connection test failed ({}): {}",
                        response.status,
                        response.text()
                    );
                }
                reachable
            }
            Err(e) => {
                tracing::error!("Connection test failed: {}", e);
                false
            }
        }
    }

    /// Force re-acquisition of both tokens
    pub async fn refresh_authentication(&self) -> Result<(), DsisError> {
        self.auth.refresh().await.map_err(DsisError::from)
    }
}

impl fmt::Debug for DsisClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DsisClient")
            .field("config", &self.config)
            .field("registry", &self.registry.is_some())
            .finish_non_exhaustive()
    }
}

/// Resolve a continuation link against the URL of the page that returned it
///
/// Requests carry the DSIS tokens and subscription key, so links that leave
/// the origin of the base URL are refused.
fn resolve_link(base: &str, link: &str) -> Result<String, DsisError> {
    let base = Url::parse(base)
        .map_err(|e| DsisError::Parse(format!("Invalid request URL '{}': {}", base, e)))?;
    let resolved = base
        .join(link)
        .map_err(|e| DsisError::Parse(format!("Invalid next link '{}': {}", link, e)))?;

    if resolved.origin() != base.origin() {
        let origin = base.origin().ascii_serialization();
        tracing::error!("Next link {} leaves {}", resolved, origin);
        return Err(DsisError::Parse(format!(
            "Next link '{}' points outside {}",
            link, origin
        )));
    }
    Ok(resolved.into())
}

/// Page-walking state behind a [`QueryStream`]
struct PageCursor {
    client: DsisClient,
    next_url: Option<String>,
    pages_fetched: usize,
    max_pages: Option<usize>,
    buffer: VecDeque<Value>,
    model: Option<ModelRef>,
    policy: CastPolicy,
    index: usize,
    skipped: Arc<AtomicUsize>,
}

impl PageCursor {
    async fn advance(mut self) -> Result<Option<(Record, Self)>, DsisError> {
        loop {
            if let Some(raw) = self.buffer.pop_front() {
                let index = self.index;
                self.index += 1;

                let Some(ref model) = self.model else {
                    return Ok(Some((Record::Raw(raw), self)));
                };
                match self.client.cast_one(raw, model, index) {
                    Ok(typed) => return Ok(Some((Record::Typed(typed), self))),
                    Err(e) if self.policy == CastPolicy::Lenient => {
                        tracing::warn!("Skipping record: {}", e);
                        self.skipped.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            if self.max_pages.is_some_and(|max| self.pages_fetched >= max) {
                tracing::info!("Reached page limit of {}", self.pages_fetched);
                return Ok(None);
            }
            let Some(url) = self.next_url.take() else {
                return Ok(None);
            };

            let page = self.client.fetch_url(&url).await?;
            self.pages_fetched += 1;
            tracing::info!(
                "Fetched page {} with {} records",
                self.pages_fetched,
                page.value.len()
            );
            self.buffer = page.value.into();
            self.next_url = page.next_link;
        }
    }
}
