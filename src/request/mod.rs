// Request descriptors
// What the executor sends: method, target, body, auth mode, optional range

pub mod builders;
pub mod range;

pub use range::{ByteRange, FileQuery, UNSPECIFIED};

use reqwest::Method;
use serde::Serialize;

use crate::error::{ClientError, Result};

/// Placeholder filled with the target space guid at execution time
pub const SPACE_GUID: &str = "{space_guid}";

/// Placeholder filled with the target organization guid at execution time
pub const ORG_GUID: &str = "{org_guid}";

/// How the request authenticates
#[derive(Clone, PartialEq)]
pub enum AuthMode {
    /// `Authorization: Bearer <token>` from the session credential
    Bearer,
    /// HTTP Basic, used for OAuth client authentication at the token endpoint
    Basic { username: String, password: String },
    /// No credentials (controller info)
    Anonymous,
}

impl std::fmt::Debug for AuthMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthMode::Bearer => f.write_str("Bearer"),
            AuthMode::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .finish_non_exhaustive(),
            AuthMode::Anonymous => f.write_str("Anonymous"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Json(serde_json::Value),
    /// `application/x-www-form-urlencoded`
    Form(Vec<(String, String)>),
}

/// Raw offsets, validated only when the request is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RangeOffsets {
    start: i64,
    end: Option<i64>,
    tail_length: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    /// Relative to the controller URL, may contain placeholders
    Path(String),
    /// Absolute URL (token endpoint, UAA, staging logs)
    Url(String),
}

/// A single REST call
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    method: Method,
    target: Target,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    body: RequestBody,
    auth: AuthMode,
    range: Option<RangeOffsets>,
}

impl RequestDescriptor {
    /// Bearer-authenticated call to a controller path
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            target: Target::Path(path.into()),
            query: Vec::new(),
            headers: Vec::new(),
            body: RequestBody::Empty,
            auth: AuthMode::Bearer,
            range: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Call to an absolute URL outside the controller
    pub fn absolute(method: Method, url: impl Into<String>) -> Self {
        Self {
            target: Target::Url(url.into()),
            ..Self::new(method, String::new())
        }
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn json<T: Serialize>(mut self, body: &T) -> Result<Self> {
        let value = serde_json::to_value(body).map_err(|e| {
            ClientError::Validation(format!("Request body is not serializable: {}", e))
        })?;
        self.body = RequestBody::Json(value);
        Ok(self)
    }

    pub fn json_value(mut self, body: serde_json::Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn form<K: Into<String>, V: Into<String>>(
        mut self,
        fields: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        self.body = RequestBody::Form(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    pub fn anonymous(mut self) -> Self {
        self.auth = AuthMode::Anonymous;
        self
    }

    pub fn basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth = AuthMode::Basic {
            username: username.into(),
            password: password.into(),
        };
        self
    }

    /// Bytes `start..end`, end exclusive
    pub fn range(self, start: i64, end: i64) -> Self {
        self.range_offsets(start, Some(end), None)
    }

    /// The last `length` bytes
    pub fn tail(self, length: i64) -> Self {
        self.range_offsets(UNSPECIFIED, None, Some(length))
    }

    /// Raw offsets, `UNSPECIFIED` start with no end or tail means no range
    pub fn range_offsets(mut self, start: i64, end: Option<i64>, tail_length: Option<i64>) -> Self {
        self.range = Some(RangeOffsets {
            start,
            end,
            tail_length,
        });
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Path or URL before placeholder substitution
    pub fn route(&self) -> &str {
        match &self.target {
            Target::Path(path) | Target::Url(path) => path,
        }
    }

    pub fn is_absolute(&self) -> bool {
        matches!(self.target, Target::Url(_))
    }

    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    pub fn auth(&self) -> &AuthMode {
        &self.auth
    }

    /// `"GET /v2/apps"`, used in errors and events
    pub fn operation(&self) -> String {
        format!("{} {}", self.method, self.route())
    }

    pub fn needs_space(&self) -> bool {
        self.route().contains(SPACE_GUID)
    }

    pub fn needs_organization(&self) -> bool {
        self.route().contains(ORG_GUID)
    }

    /// Validate the range offsets; `None` when no range applies
    pub fn byte_range(&self) -> Result<Option<ByteRange>> {
        match self.range {
            None => Ok(None),
            Some(r) => ByteRange::from_offsets(r.start, r.end, r.tail_length),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_bearer_get() {
        let descriptor = RequestDescriptor::get("/v2/apps");
        assert_eq!(descriptor.method(), &Method::GET);
        assert_eq!(descriptor.auth(), &AuthMode::Bearer);
        assert_eq!(descriptor.body(), &RequestBody::Empty);
        assert_eq!(descriptor.operation(), "GET /v2/apps");
        assert!(!descriptor.is_absolute());
    }

    #[test]
    fn test_placeholders_detected() {
        assert!(RequestDescriptor::get("/v2/spaces/{space_guid}/apps").needs_space());
        assert!(RequestDescriptor::get("/v2/organizations/{org_guid}/spaces").needs_organization());
        assert!(!RequestDescriptor::get("/v2/info").needs_space());
    }

    #[test]
    fn test_range_is_validated_lazily() {
        let descriptor = RequestDescriptor::get("/v2/apps/a/instances/0/files/logs").range(5, 3);
        assert!(matches!(descriptor.byte_range(), Err(ClientError::Validation(_))));

        let descriptor = RequestDescriptor::get("/f").range(5, 10);
        assert_eq!(
            descriptor.byte_range().unwrap(),
            Some(ByteRange::Between { first: 5, last: 9 })
        );

        assert_eq!(RequestDescriptor::get("/f").byte_range().unwrap(), None);
    }

    #[test]
    fn test_basic_auth_debug_hides_password() {
        let descriptor = RequestDescriptor::absolute(Method::POST, "https://login/oauth/token")
            .basic_auth("cf", "s3cret");
        assert!(descriptor.is_absolute());
        let debug = format!("{:?}", descriptor.auth());
        assert!(debug.contains("cf"));
        assert!(!debug.contains("s3cret"));
    }

    #[test]
    fn test_json_body() {
        let descriptor = RequestDescriptor::put("/v2/apps/x")
            .json(&serde_json::json!({"state": "STARTED"}))
            .unwrap();
        assert_eq!(
            descriptor.body(),
            &RequestBody::Json(serde_json::json!({"state": "STARTED"}))
        );
    }
}
