//! The Receptionist gateway: cached outbound requests and callback recording.
//!
//! A request resolves its route, consults the cache store, and only on a
//! miss (or a forced refresh) goes to the network. Fetched responses are
//! decoded, handed to observers (the request log among them) and persisted
//! before being returned. Identical concurrent fetches are coalesced.

pub mod decode;
pub mod flight;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use http::Method;
use receptionist_core::{
    ApiDefinition, Body, CallbackEntry, ClockSource, FormatParams, HeaderSet, RequestEntry,
    Response, RouteTable, SystemClock,
};
use tracing::{debug, field, info, info_span, warn, Instrument, Span};

use crate::error::{GatewayError, StorageError};
use crate::log::{CallbackLog, RequestLog, DEFAULT_LOG_CAPACITY};
use crate::observer::{CompositeObserver, GatewayObserver};
use crate::storage::{BackendKind, CacheStore};
use crate::transport::{HttpTransport, OutboundRequest};

pub use decode::decode_payload;
pub use flight::InFlight;

/// Gateway identity and mode switches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceptionistConfig {
    /// Name used in log fields.
    pub name: String,
    /// When `false`, [`Receptionist::callback`] logs a warning and records nothing.
    pub callback_enabled: bool,
    /// Entries kept by each of the request and callback logs.
    pub max_log_entries: usize,
}

impl Default for ReceptionistConfig {
    fn default() -> Self {
        Self {
            name: "receptionist".to_string(),
            callback_enabled: false,
            max_log_entries: DEFAULT_LOG_CAPACITY,
        }
    }
}

/// Per-call options for [`Receptionist::request`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    /// Literal suffix appended after route resolution and substitution.
    pub append: String,
    /// Values for `{name}` placeholders in the route path.
    pub format: Option<FormatParams>,
    /// Skip the cache lookup and always fetch.
    pub force_refresh: bool,
    pub body: Option<Body>,
    pub query: Vec<(String, String)>,
    /// Extra headers, replacing same-named (case-insensitive) configured ones.
    pub headers: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn append(mut self, suffix: impl Into<String>) -> Self {
        self.append = suffix.into();
        self
    }

    /// Adds one format parameter.
    #[must_use]
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.format
            .get_or_insert_with(FormatParams::new)
            .insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn format(mut self, params: FormatParams) -> Self {
        self.format = Some(params);
        self
    }

    #[must_use]
    pub fn force_refresh(mut self) -> Self {
        self.force_refresh = true;
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    #[must_use]
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Per-call options for [`Receptionist::callback`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackOptions {
    pub source: Option<String>,
    pub status: u16,
    pub method: String,
    pub url: String,
}

impl Default for CallbackOptions {
    fn default() -> Self {
        Self {
            source: None,
            status: 200,
            method: "callback".to_string(),
            url: "callback/internal".to_string(),
        }
    }
}

impl CallbackOptions {
    #[must_use]
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    #[must_use]
    pub fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

/// Outbound-request caching gateway bound to one API definition and one
/// cache store.
pub struct Receptionist {
    config: ReceptionistConfig,
    routes: RouteTable,
    headers: HeaderSet,
    store: Arc<dyn CacheStore>,
    transport: Arc<dyn HttpTransport>,
    clock: Arc<dyn ClockSource>,
    request_log: Arc<RequestLog>,
    callback_log: Arc<CallbackLog>,
    observers: CompositeObserver,
    in_flight: InFlight<Response>,
}

impl Receptionist {
    /// Creates a gateway. The request and callback logs are registered as
    /// the first observers.
    #[must_use]
    pub fn new(
        config: ReceptionistConfig,
        api: ApiDefinition,
        store: Arc<dyn CacheStore>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        let request_log = Arc::new(RequestLog::with_capacity(config.max_log_entries));
        let callback_log = Arc::new(CallbackLog::with_capacity(config.max_log_entries));
        let observers = CompositeObserver::new(vec![
            Arc::clone(&request_log) as Arc<dyn GatewayObserver>,
            Arc::clone(&callback_log) as Arc<dyn GatewayObserver>,
        ]);
        info!(
            gateway = %config.name,
            backend = store.kind().as_str(),
            routes = api.routes.routes().len(),
            callbacks = config.callback_enabled,
            "gateway ready"
        );
        Self {
            config,
            routes: api.routes,
            headers: api.headers,
            store,
            transport,
            clock: Arc::new(SystemClock),
            request_log,
            callback_log,
            observers,
            in_flight: InFlight::new(),
        }
    }

    /// Replaces the clock used for entry timestamps.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn ClockSource>) -> Self {
        self.clock = clock;
        self
    }

    /// Registers an additional observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn GatewayObserver>) -> Self {
        self.observers.add(observer);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    #[must_use]
    pub fn callback_enabled(&self) -> bool {
        self.config.callback_enabled
    }

    #[must_use]
    pub fn backend(&self) -> BackendKind {
        self.store.kind()
    }

    #[must_use]
    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderSet {
        &self.headers
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    #[must_use]
    pub fn request_log(&self) -> &RequestLog {
        &self.request_log
    }

    #[must_use]
    pub fn callback_log(&self) -> &CallbackLog {
        &self.callback_log
    }

    /// Resolves `route` to the URL a request with `options` would use.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Route`] on a missing parameter or malformed
    /// template.
    pub fn resolve(&self, route: &str, options: &RequestOptions) -> Result<String, GatewayError> {
        Ok(self
            .routes
            .resolve_with(route, options.format.as_ref(), &options.append)?)
    }

    /// Performs a request through the cache.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Route`] if the route cannot be formatted,
    /// [`GatewayError::Storage`] if the cache store fails and
    /// [`GatewayError::Transport`] if the upstream cannot be reached.
    /// Non-2xx upstream statuses are not errors.
    pub async fn request(
        &self,
        method: Method,
        route: &str,
        options: RequestOptions,
    ) -> Result<Response, GatewayError> {
        let url = self.resolve(route, &options)?;
        let span = info_span!(
            "request",
            gateway = %self.config.name,
            method = %method,
            url = %url,
            cache = field::Empty,
            status = field::Empty,
            duration_ms = field::Empty,
            outcome = field::Empty,
        );
        self.execute(method, url, options).instrument(span).await
    }

    /// # Errors
    ///
    /// See [`Receptionist::request`].
    pub async fn get(
        &self,
        route: &str,
        options: RequestOptions,
    ) -> Result<Response, GatewayError> {
        self.request(Method::GET, route, options).await
    }

    /// # Errors
    ///
    /// See [`Receptionist::request`].
    pub async fn post(
        &self,
        route: &str,
        options: RequestOptions,
    ) -> Result<Response, GatewayError> {
        self.request(Method::POST, route, options).await
    }

    /// # Errors
    ///
    /// See [`Receptionist::request`].
    pub async fn put(
        &self,
        route: &str,
        options: RequestOptions,
    ) -> Result<Response, GatewayError> {
        self.request(Method::PUT, route, options).await
    }

    /// # Errors
    ///
    /// See [`Receptionist::request`].
    pub async fn delete(
        &self,
        route: &str,
        options: RequestOptions,
    ) -> Result<Response, GatewayError> {
        self.request(Method::DELETE, route, options).await
    }

    /// # Errors
    ///
    /// See [`Receptionist::request`].
    pub async fn patch(
        &self,
        route: &str,
        options: RequestOptions,
    ) -> Result<Response, GatewayError> {
        self.request(Method::PATCH, route, options).await
    }

    /// # Errors
    ///
    /// See [`Receptionist::request`].
    pub async fn head(
        &self,
        route: &str,
        options: RequestOptions,
    ) -> Result<Response, GatewayError> {
        self.request(Method::HEAD, route, options).await
    }

    /// Records an externally delivered event in the callback table/bucket.
    ///
    /// The entry carries the gateway's headers, and `payload` as both body
    /// and response. With callback mode disabled nothing is written and a
    /// warning is logged.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the callback cannot be persisted.
    pub async fn callback(
        &self,
        event: &str,
        payload: impl Into<Body>,
        options: CallbackOptions,
    ) -> Result<(), StorageError> {
        if !self.config.callback_enabled {
            warn!(
                gateway = %self.config.name,
                event,
                "callback mode is disabled; event not recorded"
            );
            return Ok(());
        }

        let payload = payload.into();
        let entry = CallbackEntry {
            entry: RequestEntry {
                status: options.status,
                method: options.method,
                headers: Some(self.headers.entries().clone()),
                url: options.url,
                body: Some(payload.clone()),
                response: payload,
                timestamp: self.clock.now(),
            },
            event: event.to_owned(),
            source: options.source,
        };

        self.store.write_callback(&entry).await?;
        self.observers.on_callback(&entry);
        Ok(())
    }

    /// Closes the underlying cache store.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the store fails to shut down cleanly.
    pub async fn close(&self) -> Result<(), StorageError> {
        self.store.close().await
    }

    async fn execute(
        &self,
        method: Method,
        url: String,
        options: RequestOptions,
    ) -> Result<Response, GatewayError> {
        let start = Instant::now();
        let result = self.lookup_or_fetch(&method, &url, &options).await;

        #[allow(clippy::cast_possible_truncation)]
        let duration_ms = start.elapsed().as_millis() as u64;
        let span = Span::current();
        span.record("duration_ms", duration_ms);
        match &result {
            Ok(response) => {
                span.record("cache", if response.from_cache { "hit" } else { "miss" });
                span.record("status", response.status);
                span.record("outcome", "ok");
                debug!(duration_ms, status = response.status, "request complete");
            }
            Err(err) => {
                span.record("outcome", "error");
                warn!(duration_ms, error = %err, "request failed");
            }
        }
        result
    }

    async fn lookup_or_fetch(
        &self,
        method: &Method,
        url: &str,
        options: &RequestOptions,
    ) -> Result<Response, GatewayError> {
        if !options.force_refresh {
            if let Some(entry) = self.store.read(url).await? {
                debug!("served from cache");
                self.observers.on_cache_hit(&entry);
                return Ok(Response::from_entry(&entry));
            }
        }

        let key = flight_key(method, url, options.body.as_ref());
        let (response, led) = self
            .in_flight
            .run(&key, || self.fetch(method, url, options))
            .await?;
        if !led {
            debug!("joined an in-flight fetch");
        }
        Ok(response)
    }

    async fn fetch(
        &self,
        method: &Method,
        url: &str,
        options: &RequestOptions,
    ) -> Result<Response, GatewayError> {
        let headers = self.outbound_headers(&options.headers);
        let request = OutboundRequest {
            method: method.clone(),
            url: url.to_owned(),
            headers: headers.clone(),
            query: options.query.clone(),
            body: options.body.clone(),
            timeout: options.timeout,
        };

        let raw = self.transport.send(request).await?;
        let body = decode_payload(raw.content_type(), &raw.body);
        let received_at = self.clock.now();

        let entry = RequestEntry {
            status: raw.status,
            method: method.as_str().to_owned(),
            headers: Some(headers),
            url: url.to_owned(),
            body: options.body.clone(),
            response: body.clone(),
            timestamp: received_at,
        };
        self.observers.on_fetch(&entry);
        self.store.write(&entry).await?;

        Ok(Response {
            status: raw.status,
            headers: raw.headers,
            body,
            received_at,
            from_cache: false,
        })
    }

    fn outbound_headers(&self, extra: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut headers = self.headers.entries().clone();
        headers.retain(|name, _| !extra.keys().any(|other| other.eq_ignore_ascii_case(name)));
        headers.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        headers
    }
}

/// Identity of a fetch for coalescing: method, URL and outgoing body.
fn flight_key(method: &Method, url: &str, body: Option<&Body>) -> String {
    match body {
        None => format!("{method} {url}"),
        Some(Body::Json(value)) => format!("{method} {url}\njson:{value}"),
        Some(Body::Text(text)) => format!("{method} {url}\ntext:{text}"),
    }
}
