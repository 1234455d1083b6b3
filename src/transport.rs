use super::*;

/// Handle of an issued request, unique per runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub(crate) u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Post,
    Head,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Post => f.write_str("POST"),
            Self::Head => f.write_str("HEAD"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub id: RequestId,
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn ok(body: &str) -> Self {
        Self {
            status: 200,
            body: body.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Network-level failure: no response was received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl StdError for TransportError {}

/// Completes requests when the runtime settles them.
pub trait Transport {
    fn send(&mut self, request: &HttpRequest) -> std::result::Result<HttpResponse, TransportError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum MockReply {
    Respond(HttpResponse),
    Fail(String),
}

/// Canned replies keyed by URL. Unknown URLs fail like an unreachable host.
#[derive(Debug, Default)]
pub struct MockTransport {
    replies: HashMap<String, MockReply>,
    calls: Vec<String>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&mut self, url: &str, status: u16, body: &str) {
        self.replies.insert(
            url.to_string(),
            MockReply::Respond(HttpResponse {
                status,
                body: body.to_string(),
            }),
        );
    }

    pub fn fail(&mut self, url: &str, message: &str) {
        self.replies
            .insert(url.to_string(), MockReply::Fail(message.to_string()));
    }

    pub fn clear(&mut self) {
        self.replies.clear();
    }

    /// `METHOD url` for every request sent so far.
    pub fn take_calls(&mut self) -> Vec<String> {
        std::mem::take(&mut self.calls)
    }
}

impl Transport for MockTransport {
    fn send(&mut self, request: &HttpRequest) -> std::result::Result<HttpResponse, TransportError> {
        self.calls.push(format!("{} {}", request.method, request.url));
        match self.replies.get(&request.url) {
            Some(MockReply::Respond(response)) => Ok(response.clone()),
            Some(MockReply::Fail(message)) => Err(TransportError::new(message.clone())),
            None => Err(TransportError::new(format!(
                "no mock registered for {}",
                request.url
            ))),
        }
    }
}
