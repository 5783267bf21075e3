//! Routing destinations encoded in the request path.
//!
//! A routed path looks like `/<port>/<resource...>`. Anything whose first
//! segment does not parse as a positive integer is not routed; of those, the
//! paths under [`GATEWAY_PATH`] belong to the gateway itself.

use thiserror::Error;
use url::Url;

pub const GATEWAY_PATH: &str = "/_portgate";

#[derive(Debug, Error)]
pub enum RefererError {
    #[error("malformed referer: {0}")]
    Parse(#[from] url::ParseError),
}

/// Where a request should be sent, derived from its path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    /// Port on the target host. `None` when the path did not encode one.
    pub port: Option<i64>,
    /// Clean absolute path to request from the target.
    pub resource_path: String,
    /// True when the request addressed the gateway namespace.
    pub is_gateway_path: bool,
}

impl Destination {
    pub fn resolve(raw_path: &str) -> Self {
        let path = clean_path(raw_path);

        let rest = &path[1..];
        let (identifier, remainder) = match rest.find('/') {
            Some(end) => (&rest[..end], &rest[end..]),
            None => (rest, ""),
        };

        match identifier.parse::<i64>() {
            Ok(port) if port > 0 => Self {
                port: Some(port),
                resource_path: clean_path(remainder),
                is_gateway_path: false,
            },
            _ => Self {
                port: None,
                is_gateway_path: is_gateway_path(&path),
                resource_path: path,
            },
        }
    }

    /// Recovers the port from the page that linked to this request.
    ///
    /// The resource path stays the one of `self`: the browser asked for the
    /// right resource, only the port segment was lost.
    pub fn recover_from_referer(&self, referer: &str) -> Result<Self, RefererError> {
        let referer = Url::parse(referer)?;
        let candidate = Self::resolve(referer.path());

        Ok(Self {
            port: candidate.port,
            resource_path: self.resource_path.clone(),
            is_gateway_path: false,
        })
    }

    /// The gateway path the browser should have requested, e.g. `/8080/app`.
    pub fn gateway_url(&self) -> Option<String> {
        self.port.map(|port| format!("/{port}{}", self.resource_path))
    }
}

/// Lexically cleans `raw` into a rooted path: repeated separators collapse,
/// `.` segments vanish and `..` removes the previous segment (never going
/// above the root). The result has no trailing slash unless it is `/`.
pub fn clean_path(raw: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in raw.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    if segments.is_empty() {
        return "/".to_string();
    }

    let mut cleaned = String::with_capacity(raw.len() + 1);
    for segment in segments {
        cleaned.push('/');
        cleaned.push_str(segment);
    }
    cleaned
}

fn is_gateway_path(path: &str) -> bool {
    path == GATEWAY_PATH
        || path
            .strip_prefix(GATEWAY_PATH)
            .is_some_and(|rest| rest.starts_with('/'))
}
