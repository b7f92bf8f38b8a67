//! Route classifier.
//!
//! Decides from path, query and `Range` header whether a request names one of
//! our objects or belongs to the proxied origin. Resolution failures discovered
//! later are folded back into the same decision through
//! [`StreamError::falls_back`](crate::services::stream_service::StreamError::falls_back).

use crate::{
    models::{object::ObjectReference, range::RangeSpec},
    services::stream_service::StreamError,
};
use axum::http::HeaderValue;
use regex::Regex;
use std::sync::LazyLock;

/// Fingerprint immediately followed by the object id, e.g. `AgADxy1234`.
static FINGERPRINT_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([a-zA-Z0-9_-]{6})(\d+)$").expect("valid fingerprint pattern"));

/// First run of digits anywhere in the path, e.g. `1234/movie.mkv` or `dl/1234`.
static ID_ONLY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)(?:/\S+)?").expect("valid id pattern"));

const WATCH_PREFIX: &str = "watch";

/// The pieces of a request the classifier looks at.
#[derive(Clone, Copy, Debug, Default)]
pub struct RouteRequest<'a> {
    /// Request path, with or without its leading `/`.
    pub path: &'a str,
    /// Raw query string without the `?`.
    pub query: Option<&'a str>,
    /// Raw `Range` header value.
    pub range: Option<&'a HeaderValue>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RouteOutcome {
    Status,
    RenderWatchPage(ObjectReference),
    StreamMedia {
        reference: ObjectReference,
        range: Option<RangeSpec>,
    },
    ProxyFallback {
        target_path: String,
    },
}

/// Classify a request.
///
/// # Errors
/// - `StreamError::InvalidWatchPath` for a `watch` path that names no object
/// - `StreamError::MalformedRange` for a stream path with an unparseable `Range`
pub fn classify(request: RouteRequest<'_>) -> Result<RouteOutcome, StreamError> {
    let path = request.path.trim_start_matches('/');
    if path.is_empty() {
        return Ok(RouteOutcome::Status);
    }

    if let Some(rest) = watch_target(path) {
        return parse_reference(rest, request.query)
            .map(RouteOutcome::RenderWatchPage)
            .ok_or_else(|| StreamError::InvalidWatchPath(path.to_string()));
    }

    match parse_reference(path, request.query) {
        Some(reference) => {
            let range = request.range.map(RangeSpec::from_header).transpose()?;
            Ok(RouteOutcome::StreamMedia { reference, range })
        }
        None => Ok(RouteOutcome::ProxyFallback {
            target_path: fallback_target(request),
        }),
    }
}

/// The part after `watch/`, for `watch` itself and anything below it.
fn watch_target(path: &str) -> Option<&str> {
    let rest = path.strip_prefix(WATCH_PREFIX)?;
    if rest.is_empty() {
        return Some(rest);
    }
    rest.strip_prefix('/')
}

/// Origin-relative target for a proxied request, keeping its query string.
pub fn fallback_target(request: RouteRequest<'_>) -> String {
    let path = request.path.trim_start_matches('/');
    match request.query {
        Some(query) if !query.is_empty() => format!("{path}?{query}"),
        _ => path.to_string(),
    }
}

/// Extract an object reference from a path segment.
///
/// The id-only form takes its fingerprint from the `hash` query parameter.
pub fn parse_reference(path: &str, query: Option<&str>) -> Option<ObjectReference> {
    if let Some(caps) = FINGERPRINT_ID.captures(path) {
        let object_id = caps[2].parse().ok()?;
        return Some(ObjectReference::new(object_id, &caps[1]));
    }

    let caps = ID_ONLY.captures(path)?;
    let object_id = caps[1].parse().ok()?;
    let fingerprint = query.and_then(hash_param)?;
    Some(ObjectReference::new(object_id, fingerprint))
}

fn hash_param(query: &str) -> Option<String> {
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "hash")
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}
