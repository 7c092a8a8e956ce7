use std::fmt;
use std::io::Write;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::LOCATION;
use reqwest::redirect::Policy;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::error::{Result, SpecError};

const COLAB_GITHUB_PREFIX: &str = "https://colab.research.google.com/github/";
const GITHUB_PREFIX: &str = "https://github.com/";

/// Response metadata of a HEAD request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeadResponse {
    pub status: u16,
    pub reason: String,
    pub location: Option<String>,
}

#[derive(Debug, Error)]
pub enum TransportError {
    /// The request could not be formed at all (bad URL, unsupported scheme).
    #[error("{0}")]
    Invalid(String),
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Requests that cannot be formed are unreachable; the rest are transport failures.
    pub fn into_spec_error(self, url: &str) -> SpecError {
        match self {
            TransportError::Invalid(reason) => SpecError::NetworkUnreachable {
                url: url.to_string(),
                reason,
            },
            TransportError::Other(reason) => SpecError::Transport {
                url: url.to_string(),
                reason,
            },
        }
    }
}

/// Blocking HTTP client seam. Requests carry no timeout.
pub trait HttpTransport: Send + Sync {
    /// Issue a HEAD request without following redirects.
    fn head(&self, url: &str) -> Result<HeadResponse, TransportError>;

    /// Stream the body of a GET request (redirects followed) into `sink`.
    fn download(&self, url: &str, sink: &mut dyn Write) -> Result<u64, TransportError>;
}

pub struct ReqwestTransport {
    head_client: Client,
    fetch_client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let head_client = Client::builder()
            .redirect(Policy::none())
            .timeout(None::<Duration>)
            .build()
            .map_err(|err| SpecError::Transport {
                url: String::new(),
                reason: err.to_string(),
            })?;
        let fetch_client = Client::builder()
            .timeout(None::<Duration>)
            .build()
            .map_err(|err| SpecError::Transport {
                url: String::new(),
                reason: err.to_string(),
            })?;
        Ok(Self {
            head_client,
            fetch_client,
        })
    }
}

impl fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReqwestTransport").finish_non_exhaustive()
    }
}

fn parse_http_url(url: &str) -> Result<Url, TransportError> {
    let parsed = Url::parse(url).map_err(|err| TransportError::Invalid(err.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(TransportError::Invalid(format!(
            "unsupported URL scheme `{other}`"
        ))),
    }
}

fn classify(err: reqwest::Error) -> TransportError {
    if err.is_builder() || err.is_redirect() || err.is_decode() {
        TransportError::Invalid(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}

impl HttpTransport for ReqwestTransport {
    fn head(&self, url: &str) -> Result<HeadResponse, TransportError> {
        let parsed = parse_http_url(url)?;
        let response = self.head_client.head(parsed).send().map_err(classify)?;
        let status = response.status();
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        Ok(HeadResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            location,
        })
    }

    fn download(&self, url: &str, sink: &mut dyn Write) -> Result<u64, TransportError> {
        let parsed = parse_http_url(url)?;
        let mut response = self.fetch_client.get(parsed).send().map_err(classify)?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Other(format!(
                "{}: {} {url}",
                status.as_u16(),
                status.canonical_reason().unwrap_or_default()
            )));
        }
        response.copy_to(sink).map_err(classify)
    }
}

/// Verdict of a reachability check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reachability {
    Ok,
    Warning(String),
    Fails(String),
}

/// Check that `url` points at something, without downloading it.
///
/// | outcome of HEAD             | verdict |
/// |-----------------------------|---------|
/// | malformed request           | fails   |
/// | other transport error       | warning |
/// | 200, 302                    | ok      |
/// | 301, 308                    | warning |
/// | 405                         | warning |
/// | anything else               | fails   |
pub fn check_url(transport: &dyn HttpTransport, url: &str) -> Reachability {
    // colab answers HEAD with 405; check the notebook on github instead
    let target = match url.strip_prefix(COLAB_GITHUB_PREFIX) {
        Some(rest) => format!("{GITHUB_PREFIX}{rest}"),
        None => url.to_string(),
    };

    let response = match transport.head(&target) {
        Ok(response) => response,
        Err(TransportError::Invalid(err)) => {
            return Reachability::Fails(format!("Invalid URL '{url}': {err}"));
        }
        Err(TransportError::Other(err)) => {
            return Reachability::Warning(format!("Failed to validate URL '{url}': {err}"));
        }
    };
    debug!(url, status = response.status, "checked url");

    match response.status {
        200 | 302 => Reachability::Ok,
        301 | 308 => Reachability::Warning(format!(
            "URL redirected ({}): consider updating {url} with new location: {}",
            response.status,
            response.location.as_deref().unwrap_or("unknown")
        )),
        405 => Reachability::Warning(format!(
            "{}: {} {url}",
            response.status, response.reason
        )),
        status => Reachability::Fails(format!("{status}: {} {url}", response.reason)),
    }
}


#[cfg(test)]
mod tests {
    use super::fake::FakeTransport;
    use super::*;

    #[test]
    fn status_policy() {
        let mut transport = FakeTransport::default()
            .with_status("https://a.org/ok", 200, "OK")
            .with_status("https://a.org/found", 302, "Found")
            .with_status("https://a.org/gone", 404, "Not Found")
            .with_status("https://a.org/forbidden", 403, "Forbidden")
            .with_status("https://a.org/nohead", 405, "Method Not Allowed");
        transport.heads.insert(
            "https://a.org/moved".into(),
            HeadResponse {
                status: 301,
                reason: "Moved Permanently".into(),
                location: Some("https://b.org/new".into()),
            },
        );

        assert_eq!(check_url(&transport, "https://a.org/ok"), Reachability::Ok);
        assert_eq!(check_url(&transport, "https://a.org/found"), Reachability::Ok);
        assert_eq!(
            check_url(&transport, "https://a.org/gone"),
            Reachability::Fails("404: Not Found https://a.org/gone".into())
        );
        assert!(matches!(
            check_url(&transport, "https://a.org/forbidden"),
            Reachability::Fails(_)
        ));
        assert_eq!(
            check_url(&transport, "https://a.org/nohead"),
            Reachability::Warning("405: Method Not Allowed https://a.org/nohead".into())
        );
        match check_url(&transport, "https://a.org/moved") {
            Reachability::Warning(msg) => assert!(msg.contains("https://b.org/new"), "{msg}"),
            other => panic!("expected warning, got {other:?}"),
        }
    }

    #[test]
    fn transport_failures_split_into_invalid_and_soft() {
        let transport = FakeTransport::default();
        match check_url(&transport, "example.com/model.onnx") {
            Reachability::Fails(msg) => assert!(msg.starts_with("Invalid URL"), "{msg}"),
            other => panic!("expected failure, got {other:?}"),
        }
        match check_url(&transport, "https://unreachable.example/x") {
            Reachability::Warning(msg) => assert!(msg.starts_with("Failed to validate URL")),
            other => panic!("expected warning, got {other:?}"),
        }
    }

    #[test]
    fn colab_links_are_checked_on_github() {
        let transport = FakeTransport::default().with_status("https://github.com/org/repo/nb.ipynb", 200, "OK");
        assert_eq!(
            check_url(&transport, "https://colab.research.google.com/github/org/repo/nb.ipynb"),
            Reachability::Ok
        );
        assert_eq!(
            transport.requests(),
            vec!["HEAD https://github.com/org/repo/nb.ipynb".to_string()]
        );
    }

    #[test]
    fn malformed_requests_become_unreachable_errors() {
        let err = TransportError::Invalid("relative URL without a base".into()).into_spec_error("x.org/a");
        assert_eq!(err.to_string(), "Invalid URL 'x.org/a': relative URL without a base");
        let err = TransportError::Other("connection refused".into()).into_spec_error("https://x.org/a");
        assert!(matches!(err, SpecError::Transport { .. }));
    }

    #[test]
    fn real_transport_rejects_unsupported_scheme() {
        let transport = ReqwestTransport::new().unwrap();
        assert!(matches!(
            transport.head("ftp://example.com/file"),
            Err(TransportError::Invalid(_))
        ));
    }
}
