// http_probe.rs - HTTP probe with a fixed header set
// Purpose: GET/HEAD a candidate URL with negotiated Accept headers and, for
//          storage calls, the x-ms-* request headers. Non-2xx is a failure.

use crate::candidates::Candidate;
use crate::config::ProbeConfig;
use crate::errors::{ProbeError, SetupError};
use crate::prober::Probe;
use chrono::Utc;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue};
use reqwest::{Client, Method};

const ACCEPT_PAGE: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
const ACCEPT_STORAGE: &str = "application/xml";

/// What kind of endpoint the probe talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestProfile {
    /// A regular web page
    Page,
    /// The blob storage REST surface
    Storage,
}

/// A successful (2xx) response
#[derive(Debug, Clone, Default)]
pub struct HttpPayload {
    pub url: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpPayload {
    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Clone)]
pub struct HttpProbe {
    client: Client,
    method: Method,
    profile: RequestProfile,
    api_version: String,
}

impl HttpProbe {
    pub fn new(config: &ProbeConfig, profile: RequestProfile) -> Result<Self, SetupError> {
        let mut headers = HeaderMap::new();
        let accept = match profile {
            RequestProfile::Page => ACCEPT_PAGE,
            RequestProfile::Storage => ACCEPT_STORAGE,
        };
        headers.insert(ACCEPT, HeaderValue::from_static(accept));
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_str(&config.accept_language)
                .map_err(|e| SetupError::InvalidConfig(format!("accept-language: {}", e)))?,
        );

        let client = Client::builder()
            .timeout(config.http_timeout())
            .danger_accept_invalid_certs(true)
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .build()
            .map_err(|e| SetupError::InvalidConfig(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            method: Method::GET,
            profile,
            api_version: config.storage_api_version.clone(),
        })
    }

    /// Existence checks only need the status line
    pub fn head(mut self) -> Self {
        self.method = Method::HEAD;
        self
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let mut req = self.client.request(self.method.clone(), url);
        if self.profile == RequestProfile::Storage {
            for (name, value) in storage_headers(&self.api_version) {
                req = req.header(name, value);
            }
        }
        req
    }

    /// Fetch a URL as text. Non-2xx responses are reported as `Status`.
    pub async fn fetch(&self, url: &str) -> Result<HttpPayload, ProbeError> {
        let resp = self.request(url).send().await.map_err(map_reqwest_error)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ProbeError::Status(status.as_u16()));
        }

        let headers = resp
            .headers()
            .iter()
            .map(|(k, v)| (k.as_str().to_string(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
            .collect();
        let final_url = resp.url().to_string();
        let body = if self.method == Method::HEAD {
            String::new()
        } else {
            resp.text().await.map_err(map_reqwest_error)?
        };

        Ok(HttpPayload {
            url: final_url,
            status: status.as_u16(),
            headers,
            body,
        })
    }

    /// Fetch a URL as raw bytes
    pub async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, ProbeError> {
        let resp = self.request(url).send().await.map_err(map_reqwest_error)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ProbeError::Status(status.as_u16()));
        }
        let bytes = resp.bytes().await.map_err(map_reqwest_error)?;
        Ok(bytes.to_vec())
    }
}

impl Probe for HttpProbe {
    type Payload = HttpPayload;

    async fn probe(&self, candidate: &Candidate) -> Result<HttpPayload, ProbeError> {
        self.fetch(&candidate.name).await
    }
}

/// Per-request storage headers: a fresh date and client request id every call
pub fn storage_headers(api_version: &str) -> Vec<(&'static str, String)> {
    vec![
        ("x-ms-version", api_version.to_string()),
        ("x-ms-date", rfc1123_now()),
        ("x-ms-client-request-id", uuid::Uuid::new_v4().to_string()),
    ]
}

fn rfc1123_now() -> String {
    Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn map_reqwest_error(e: reqwest::Error) -> ProbeError {
    if e.is_timeout() {
        ProbeError::Timeout
    } else {
        ProbeError::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_headers_fresh_per_call() {
        let a = storage_headers("2019-12-12");
        let b = storage_headers("2019-12-12");
        assert_eq!(a[0], ("x-ms-version", "2019-12-12".to_string()));
        assert!(a[1].1.ends_with(" GMT"));
        assert_ne!(a[2].1, b[2].1);
    }

    #[tokio::test]
    async fn test_head_probe_status_mapping() {
        use wiremock::matchers::{header_exists, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/cont1"))
            .and(header_exists("x-ms-client-request-id"))
            .respond_with(ResponseTemplate::new(200).insert_header("x-ms-blob-type", "BlockBlob"))
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let probe = HttpProbe::new(&ProbeConfig::default(), RequestProfile::Storage)
            .unwrap()
            .head();
        let ok = probe
            .probe(&Candidate::new("acct1", format!("{}/cont1", server.uri()), 0))
            .await
            .unwrap();
        assert_eq!(ok.status, 200);
        assert_eq!(ok.header("x-ms-blob-type"), Some("BlockBlob"));
        assert!(ok.body.is_empty());

        let missing = probe
            .probe(&Candidate::new("acct1", format!("{}/missing", server.uri()), 1))
            .await
            .unwrap_err();
        assert_eq!(missing, ProbeError::Status(404));
    }

    #[test]
    fn test_header_lookup_case_insensitive() {
        let payload = HttpPayload {
            headers: vec![("server".into(), "Windows-Azure-Blob/1.0".into())],
            ..HttpPayload::default()
        };
        assert_eq!(payload.header("Server"), Some("Windows-Azure-Blob/1.0"));
        assert_eq!(payload.header("x-ms-blob-type"), None);
    }
}
