// Request execution
// Turns descriptors into HTTP exchanges: context routing, auth headers,
// range headers, observation and error classification. Never retries.

use std::sync::Arc;
use std::time::Instant;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use reqwest::blocking::{Body, Request};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE, RANGE};
use serde::de::DeserializeOwned;
use url::Url;
use uuid::Uuid;

use crate::auth::{SessionManager, TargetContext};
use crate::error::{classify_status, remote_message, ClientError, Result};
use crate::models::{Page, Resource};
use crate::observer::{ListenerRegistry, RequestEvent};
use crate::request::{AuthMode, RequestBody, RequestDescriptor, ORG_GUID, SPACE_GUID};
use crate::transport::{HttpResponse, Transport};

/// Successful (2xx) response of an executed descriptor
#[derive(Debug, Clone)]
pub struct ApiResponse {
    operation: String,
    response: HttpResponse,
}

impl ApiResponse {
    pub fn status(&self) -> u16 {
        self.response.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.response.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.response.header(name)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.response.body
    }

    pub fn text(&self) -> String {
        self.response.text()
    }

    /// Decode the body; failures become [`ClientError::Decode`]
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.response.body).map_err(|e| ClientError::Decode {
            operation: self.operation.clone(),
            message: e.to_string(),
        })
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }
}

/// A descriptor with placeholders filled and the range validated
#[derive(Debug)]
pub(crate) struct ResolvedRequest {
    url: Url,
    range: Option<String>,
}

/// Sends prepared requests through the transport and reports them to listeners
///
/// Knows nothing about sessions; the executor and the session manager add
/// credentials on top.
pub(crate) struct Dispatcher {
    base_url: String,
    transport: Arc<dyn Transport>,
    listeners: Arc<ListenerRegistry>,
}

impl Dispatcher {
    pub(crate) fn new(
        base_url: &str,
        transport: Arc<dyn Transport>,
        listeners: Arc<ListenerRegistry>,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            transport,
            listeners,
        }
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Validate the range and fill context placeholders. No I/O.
    pub(crate) fn resolve(
        &self,
        descriptor: &RequestDescriptor,
        target: &TargetContext,
    ) -> Result<ResolvedRequest> {
        let range = descriptor.byte_range()?.map(|r| r.header_value());

        let mut route = descriptor.route().to_string();
        if descriptor.needs_space() {
            let space = target.space_guid().ok_or_else(|| {
                ClientError::Configuration(format!(
                    "No target space set for {}; call target() or set_target_context() first",
                    descriptor.operation()
                ))
            })?;
            route = route.replace(SPACE_GUID, space);
        }
        if descriptor.needs_organization() {
            let org = target.organization_guid().ok_or_else(|| {
                ClientError::Configuration(format!(
                    "No target organization set for {}; call target() or set_target_context() first",
                    descriptor.operation()
                ))
            })?;
            route = route.replace(ORG_GUID, org);
        }

        let raw = if descriptor.is_absolute() {
            route
        } else {
            format!("{}{}", self.base_url, route)
        };
        let mut url = Url::parse(&raw)
            .map_err(|e| ClientError::Validation(format!("Invalid request URL {}: {}", raw, e)))?;

        if !descriptor.query_pairs().is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in descriptor.query_pairs() {
                pairs.append_pair(name, value);
            }
        }

        Ok(ResolvedRequest { url, range })
    }

    /// Build the HTTP request, send it once and classify the outcome
    pub(crate) fn send(
        &self,
        descriptor: &RequestDescriptor,
        resolved: ResolvedRequest,
        bearer: Option<&str>,
    ) -> Result<ApiResponse> {
        let operation = descriptor.operation();
        let path = resolved.url.path().to_string();
        let request = build_request(descriptor, resolved, bearer)?;

        let request_id = Uuid::new_v4();
        let timestamp = Utc::now();
        tracing::debug!(
            request_id = %request_id,
            method = %descriptor.method(),
            url = %request.url(),
            "Sending HTTP request"
        );

        let started = Instant::now();
        let outcome = self.transport.send(request);
        let latency = started.elapsed();

        let mut event = RequestEvent {
            request_id,
            timestamp,
            method: descriptor.method().to_string(),
            route: descriptor.route().to_string(),
            path,
            status: None,
            latency,
            error: None,
        };

        let result = match outcome {
            Ok(response) if response.is_success() => {
                event.status = Some(response.status);
                tracing::debug!(
                    request_id = %request_id,
                    status = response.status,
                    "Received HTTP response"
                );
                Ok(ApiResponse {
                    operation,
                    response,
                })
            }
            Ok(response) => {
                let body = response.text();
                event.status = Some(response.status);
                event.error = Some(remote_message(&body));
                tracing::warn!(
                    request_id = %request_id,
                    status = response.status,
                    operation = %operation,
                    "Received error response"
                );
                Err(classify_status(&operation, response.status, &body))
            }
            Err(failure) => {
                event.error = Some(failure.to_string());
                tracing::warn!(
                    request_id = %request_id,
                    error_kind = %failure.kind,
                    error = %failure.message,
                    operation = %operation,
                    "HTTP request error"
                );
                Err(failure.into_error(&operation))
            }
        };

        self.listeners.notify(&event);
        result
    }
}

fn build_request(
    descriptor: &RequestDescriptor,
    resolved: ResolvedRequest,
    bearer: Option<&str>,
) -> Result<Request> {
    let mut request = Request::new(descriptor.method().clone(), resolved.url);
    let headers = request.headers_mut();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

    for (name, value) in descriptor.headers() {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ClientError::Validation(format!("Invalid header name {}: {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| ClientError::Validation(format!("Invalid value for header {}: {}", name, e)))?;
        headers.insert(name, value);
    }

    let authorization = match descriptor.auth() {
        AuthMode::Bearer => bearer.map(|token| format!("Bearer {}", token)),
        AuthMode::Basic { username, password } => Some(format!(
            "Basic {}",
            STANDARD.encode(format!("{}:{}", username, password))
        )),
        AuthMode::Anonymous => None,
    };
    if let Some(authorization) = authorization {
        let mut value = HeaderValue::from_str(&authorization)
            .map_err(|_| ClientError::Validation("Credential contains invalid header characters".to_string()))?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }

    if let Some(range) = resolved.range {
        let value = HeaderValue::from_str(&range)
            .map_err(|e| ClientError::Validation(format!("Invalid range {}: {}", range, e)))?;
        headers.insert(RANGE, value);
    }

    let body = match descriptor.body() {
        RequestBody::Empty => None,
        RequestBody::Json(value) => {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            let bytes = serde_json::to_vec(value)
                .map_err(|e| ClientError::Internal(anyhow::Error::new(e).context("Failed to encode JSON body")))?;
            Some(bytes)
        }
        RequestBody::Form(fields) => {
            headers.insert(
                CONTENT_TYPE,
                HeaderValue::from_static("application/x-www-form-urlencoded"),
            );
            let encoded = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(fields.iter().map(|(k, v)| (k.as_str(), v.as_str())))
                .finish();
            Some(encoded.into_bytes())
        }
    };
    if let Some(body) = body {
        *request.body_mut() = Some(Body::from(body));
    }

    Ok(request)
}

/// Executes descriptors on behalf of the session: target context, bearer token
pub struct RequestExecutor {
    dispatcher: Arc<Dispatcher>,
    session: Arc<SessionManager>,
}

impl RequestExecutor {
    pub(crate) fn new(dispatcher: Arc<Dispatcher>, session: Arc<SessionManager>) -> Self {
        Self {
            dispatcher,
            session,
        }
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Execute one descriptor against the current target context
    ///
    /// Range and placeholders are checked before the credential, so a bad
    /// descriptor never triggers a token refresh.
    pub fn execute(&self, descriptor: &RequestDescriptor) -> Result<ApiResponse> {
        let target = self.session.target_context();
        let resolved = self.dispatcher.resolve(descriptor, &target)?;

        let credential = match descriptor.auth() {
            AuthMode::Bearer => Some(self.session.bearer_credential(&descriptor.operation())?),
            _ => None,
        };

        self.dispatcher.send(
            descriptor,
            resolved,
            credential.as_ref().map(|c| c.access_token.as_str()),
        )
    }

    pub fn execute_json<T: DeserializeOwned>(&self, descriptor: &RequestDescriptor) -> Result<T> {
        self.execute(descriptor)?.json()
    }

    /// Follow `next_url` through every page of a v2 listing
    pub fn fetch_all<T: DeserializeOwned>(&self, descriptor: &RequestDescriptor) -> Result<Vec<Resource<T>>> {
        let mut page: Page<T> = self.execute_json(descriptor)?;
        let mut resources = std::mem::take(&mut page.resources);

        while let Some(next) = page.next_url.take() {
            page = self.execute_json(&next_page(&next))?;
            resources.append(&mut page.resources);
        }

        Ok(resources)
    }
}

/// Descriptor for a `next_url` such as `/v2/organizations?page=2`
///
/// The query goes into the descriptor's pairs so every page reports the same route.
fn next_page(next_url: &str) -> RequestDescriptor {
    let (path, query) = next_url.split_once('?').unwrap_or((next_url, ""));
    url::form_urlencoded::parse(query.as_bytes())
        .fold(RequestDescriptor::get(path), |descriptor, (name, value)| {
            descriptor.query(name, value)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CloudOrganization, CloudSpace};
    use crate::transport::TransportFailure;
    use parking_lot::Mutex;

    /// Records requests and answers with a canned response
    struct Recording {
        response: Mutex<Option<std::result::Result<HttpResponse, TransportFailure>>>,
        seen: Mutex<Vec<Request>>,
    }

    impl Recording {
        fn answering(response: std::result::Result<HttpResponse, TransportFailure>) -> Arc<Self> {
            Arc::new(Self {
                response: Mutex::new(Some(response)),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl Transport for Recording {
        fn send(&self, request: Request) -> std::result::Result<HttpResponse, TransportFailure> {
            self.seen.lock().push(request);
            self.response
                .lock()
                .take()
                .unwrap_or_else(|| Ok(HttpResponse::new(200, "{}")))
        }
    }

    fn dispatcher(transport: Arc<Recording>) -> Dispatcher {
        Dispatcher::new("https://api.example.com/", transport, Arc::new(ListenerRegistry::new()))
    }

    fn target() -> TargetContext {
        TargetContext::for_space(
            CloudSpace::new("space-1", "dev").in_organization(CloudOrganization::new("org-1", "acme")),
        )
    }

    #[test]
    fn test_resolve_fills_placeholders_and_query() {
        let dispatcher = dispatcher(Recording::answering(Ok(HttpResponse::new(200, "{}"))));
        let descriptor = RequestDescriptor::get("/v2/spaces/{space_guid}/apps").query("q", "name:web app");

        let resolved = dispatcher.resolve(&descriptor, &target()).unwrap();
        assert_eq!(resolved.url.path(), "/v2/spaces/space-1/apps");
        assert_eq!(resolved.url.query(), Some("q=name%3Aweb+app"));
        assert!(resolved.range.is_none());
    }

    #[test]
    fn test_resolve_without_space_is_configuration_error() {
        let dispatcher = dispatcher(Recording::answering(Ok(HttpResponse::new(200, "{}"))));
        let descriptor = RequestDescriptor::get("/v2/spaces/{space_guid}/apps");

        let err = dispatcher.resolve(&descriptor, &TargetContext::default()).unwrap_err();
        assert!(matches!(err, ClientError::Configuration(_)));
    }

    #[test]
    fn test_resolve_rejects_bad_range_first() {
        let dispatcher = dispatcher(Recording::answering(Ok(HttpResponse::new(200, "{}"))));
        let descriptor = RequestDescriptor::get("/v2/spaces/{space_guid}/apps").range(5, 5);

        let err = dispatcher.resolve(&descriptor, &TargetContext::default()).unwrap_err();
        assert!(matches!(err, ClientError::Validation(_)));
    }

    #[test]
    fn test_send_sets_headers() {
        let transport = Recording::answering(Ok(HttpResponse::new(206, "tail")));
        let dispatcher = dispatcher(transport.clone());
        let descriptor = RequestDescriptor::get("/v2/apps/a/instances/0/files/logs/x").tail(10);

        let resolved = dispatcher.resolve(&descriptor, &TargetContext::default()).unwrap();
        let response = dispatcher.send(&descriptor, resolved, Some("tok")).unwrap();
        assert_eq!(response.status(), 206);
        assert_eq!(response.text(), "tail");

        let seen = transport.seen.lock();
        let headers = seen[0].headers();
        assert_eq!(headers.get(RANGE).unwrap(), "bytes=-10");
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer tok");
        assert_eq!(headers.get(ACCEPT).unwrap(), "application/json");
    }

    #[test]
    fn test_send_basic_auth_and_form() {
        let transport = Recording::answering(Ok(HttpResponse::new(200, "{}")));
        let dispatcher = dispatcher(transport.clone());
        let descriptor = RequestDescriptor::absolute(reqwest::Method::POST, "https://login.example.com/oauth/token")
            .basic_auth("cf", "")
            .form([("grant_type", "password"), ("username", "a@b.c")]);

        let resolved = dispatcher.resolve(&descriptor, &TargetContext::default()).unwrap();
        dispatcher.send(&descriptor, resolved, Some("ignored")).unwrap();

        let seen = transport.seen.lock();
        let request = &seen[0];
        assert_eq!(request.url().as_str(), "https://login.example.com/oauth/token");
        assert_eq!(request.headers().get(AUTHORIZATION).unwrap(), "Basic Y2Y6");
        assert_eq!(
            request.headers().get(CONTENT_TYPE).unwrap(),
            "application/x-www-form-urlencoded"
        );
        let body = request.body().and_then(|b| b.as_bytes()).unwrap();
        assert_eq!(body, b"grant_type=password&username=a%40b.c");
    }

    #[test]
    fn test_send_classifies_statuses() {
        for (status, check) in [
            (401u16, ClientError::is_authentication as fn(&ClientError) -> bool),
            (404, ClientError::is_not_found),
            (502, ClientError::is_retryable),
        ] {
            let dispatcher = dispatcher(Recording::answering(Ok(HttpResponse::new(status, ""))));
            let descriptor = RequestDescriptor::get("/v2/apps");
            let resolved = dispatcher.resolve(&descriptor, &TargetContext::default()).unwrap();
            let err = dispatcher.send(&descriptor, resolved, None).unwrap_err();
            assert!(check(&err), "status {} gave {:?}", status, err);
        }
    }

    #[test]
    fn test_send_reports_event() {
        let listeners = Arc::new(ListenerRegistry::new());
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        listeners.register(Arc::new(move |e: &RequestEvent| sink.lock().push(e.clone())));

        let dispatcher = Dispatcher::new(
            "https://api.example.com",
            Recording::answering(Ok(HttpResponse::new(422, r#"{"description":"bad name"}"#))),
            listeners,
        );
        let descriptor = RequestDescriptor::get("/v2/spaces/{space_guid}/apps");
        let resolved = dispatcher.resolve(&descriptor, &target()).unwrap();
        let err = dispatcher.send(&descriptor, resolved, None).unwrap_err();
        assert!(matches!(err, ClientError::Remote { status: 422, .. }));

        let events = events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].route, "/v2/spaces/{space_guid}/apps");
        assert_eq!(events[0].path, "/v2/spaces/space-1/apps");
        assert_eq!(events[0].status, Some(422));
        assert_eq!(events[0].error.as_deref(), Some("bad name"));
    }

    #[test]
    fn test_next_page_keeps_route_stable() {
        let descriptor = next_page("/v2/organizations?order-direction=asc&page=2");
        assert_eq!(descriptor.route(), "/v2/organizations");
        assert_eq!(
            descriptor.query_pairs(),
            &[
                ("order-direction".to_string(), "asc".to_string()),
                ("page".to_string(), "2".to_string())
            ]
        );

        let descriptor = next_page("/v2/spaces/s-1/apps");
        assert_eq!(descriptor.route(), "/v2/spaces/s-1/apps");
        assert!(descriptor.query_pairs().is_empty());
    }

    #[test]
    fn test_decode_error() {
        let response = ApiResponse {
            operation: "GET /v2/info".to_string(),
            response: HttpResponse::new(200, "not json"),
        };
        let err = response.json::<serde_json::Value>().unwrap_err();
        assert!(matches!(err, ClientError::Decode { .. }));
    }
}
