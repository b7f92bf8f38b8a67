//! HTTP handlers for object streaming, watch pages and the proxy fallback.
//! Bodies are streamed chunk by chunk from the backend; routing decisions are
//! delegated to the classifier and resolution to `StreamService`.

use crate::{
    errors::AppError,
    handlers::{status_handlers::status_report, watch_page},
    models::{
        object::{ObjectMetadata, ObjectReference},
        range::{ByteInterval, RangeSpec},
    },
    services::{
        classifier::{self, RouteOutcome, RouteRequest},
        proxy::ProxyRequest,
        stream_service::{StreamError, StreamService},
    },
};
use axum::{
    Json,
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header},
    response::{Html, IntoResponse, Response},
};
use tracing::{info, warn};
use uuid::Uuid;

const OCTET_STREAM: &str = "application/octet-stream";

/// `GET|HEAD /` and `/{*path}`: status, watch page, object stream, or proxy.
///
/// Every request is classified from the raw request path, so `/watch/X` and
/// `/X` always agree on what `X` names.
pub async fn stream_or_proxy(
    State(service): State<StreamService>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let request = RouteRequest {
        path: uri.path(),
        query: uri.query(),
        range: headers.get(header::RANGE),
    };

    let outcome = classifier::classify(request).map_err(|err| {
        warn!(path = request.path, error = %err, "rejecting request");
        AppError::from(err)
    })?;

    match outcome {
        RouteOutcome::Status => Ok(Json(status_report(&service)).into_response()),
        RouteOutcome::RenderWatchPage(reference) => watch_response(&service, &reference).await,
        RouteOutcome::ProxyFallback { .. } => {
            info!(path = request.path, "path does not name an object, proxying");
            proxy_fallback(&service, method, request, &headers).await
        }
        RouteOutcome::StreamMedia { reference, range } => {
            match media_streamer(&service, &method, &reference, range).await {
                Err(err) if err.falls_back() => {
                    info!(
                        path = request.path,
                        object_id = reference.object_id,
                        error = %err,
                        "stream resolution failed, proxying"
                    );
                    proxy_fallback(&service, method, request, &headers).await
                }
                Err(err) => {
                    warn!(
                        path = request.path,
                        object_id = reference.object_id,
                        fingerprint = %reference.fingerprint,
                        error = %err,
                        "stream request rejected"
                    );
                    Err(err.into())
                }
                Ok(response) => Ok(response),
            }
        }
    }
}

/// Player or download page for `reference`. Never proxied.
async fn watch_response(
    service: &StreamService,
    reference: &ObjectReference,
) -> Result<Response, AppError> {
    let resolved = service.open(reference).await.map_err(|err| {
        warn!(
            object_id = reference.object_id,
            fingerprint = %reference.fingerprint,
            error = %err,
            "watch page resolution failed"
        );
        AppError::from(err)
    })?;

    let html = watch_page::render(&resolved.meta, &service.stream_url(reference));
    Ok(Html(html).into_response())
}

/// Resolve `reference` and build the streaming response.
///
/// Errors are returned before any header is committed, so the caller can
/// still choose between an error status and the proxy fallback.
async fn media_streamer(
    service: &StreamService,
    method: &Method,
    reference: &ObjectReference,
    range: Option<RangeSpec>,
) -> Result<Response, StreamError> {
    let resolved = service.open(reference).await?;
    let size = resolved.meta.size_bytes;

    let interval = match range {
        Some(spec) => Some(spec.to_interval(size)?),
        None => ByteInterval::full(size),
    };
    let status = if range.is_some() {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };

    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    set_media_headers(response.headers_mut(), &resolved.meta, interval, size);

    info!(
        object_id = reference.object_id,
        connection = resolved.connection(),
        status = status.as_u16(),
        range = ?interval.map(|i| (i.from, i.until)),
        size,
        "serving object"
    );

    // HEAD and empty objects never pull; dropping `resolved` releases the connection.
    if let Some(interval) = interval.filter(|_| *method != Method::HEAD) {
        *response.body_mut() = Body::from_stream(resolved.into_body(interval));
    }
    Ok(response)
}

async fn proxy_fallback(
    service: &StreamService,
    method: Method,
    request: RouteRequest<'_>,
    headers: &HeaderMap,
) -> Result<Response, AppError> {
    let target_path = classifier::fallback_target(request);
    let proxied = service
        .fallback
        .proxy(ProxyRequest {
            method,
            target_path: target_path.clone(),
            headers: headers.clone(),
        })
        .await;

    proxied.map_err(|err| {
        warn!(%target_path, error = %err, "proxy fallback failed");
        AppError::from(err)
    })
}

fn set_media_headers(
    headers: &mut HeaderMap,
    meta: &ObjectMetadata,
    interval: Option<ByteInterval>,
    size: u64,
) {
    let (content_type, file_name) = content_type_and_name(meta);
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .unwrap_or_else(|_| HeaderValue::from_static(OCTET_STREAM)),
    );

    let disposition = if content_type.starts_with("video/") || content_type.starts_with("audio/")
    {
        "inline"
    } else {
        "attachment"
    };
    let disposition = format!(r#"{disposition}; filename="{}""#, header_safe(&file_name));
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));

    let length = interval.map(|i| i.len()).unwrap_or(0);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));

    if let Some(interval) = interval {
        let content_range = format!("bytes {}-{}/{}", interval.from, interval.until, size);
        if let Ok(value) = HeaderValue::from_str(&content_range) {
            headers.insert(header::CONTENT_RANGE, value);
        }
    }
}

/// Content type from metadata, else guessed from the file name; a missing file
/// name is synthesised from the content type.
fn content_type_and_name(meta: &ObjectMetadata) -> (String, String) {
    let random = || Uuid::new_v4().simple().to_string()[..8].to_string();

    match (&meta.mime_type, &meta.file_name) {
        (Some(mime), Some(name)) => (mime.clone(), name.clone()),
        (Some(mime), None) => {
            let extension = mime
                .split_once('/')
                .map(|(_, sub)| sub)
                .filter(|sub| !sub.is_empty())
                .unwrap_or("unknown");
            (mime.clone(), format!("{}.{extension}", random()))
        }
        (None, Some(name)) => {
            let guessed = mime_guess::from_path(name)
                .first_raw()
                .unwrap_or(OCTET_STREAM);
            (guessed.to_string(), name.clone())
        }
        (None, None) => (OCTET_STREAM.to_string(), format!("{}.unknown", random())),
    }
}

/// Keep a file name usable inside a quoted header parameter.
fn header_safe(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(mime: Option<&str>, name: Option<&str>) -> ObjectMetadata {
        ObjectMetadata {
            size_bytes: 1_000_000,
            mime_type: mime.map(Into::into),
            file_name: name.map(Into::into),
            fingerprint: "AgADxyZ9".into(),
        }
    }

    #[test]
    fn content_type_guessed_from_name() {
        let (ct, name) = content_type_and_name(&meta(None, Some("song.mp3")));
        assert_eq!(ct, "audio/mpeg");
        assert_eq!(name, "song.mp3");
    }

    #[test]
    fn name_synthesised_from_subtype() {
        let (ct, name) = content_type_and_name(&meta(Some("video/mp4"), None));
        assert_eq!(ct, "video/mp4");
        assert!(name.ends_with(".mp4"));
        assert_eq!(name.len(), 12);

        let (ct, name) = content_type_and_name(&meta(None, None));
        assert_eq!(ct, OCTET_STREAM);
        assert!(name.ends_with(".unknown"));
    }

    #[test]
    fn media_headers_describe_the_interval() {
        let mut headers = HeaderMap::new();
        let interval = ByteInterval {
            from: 300_000,
            until: 399_999,
        };
        set_media_headers(
            &mut headers,
            &meta(Some("video/mp4"), Some("clip \"1\".mp4")),
            Some(interval),
            1_000_000,
        );
        assert_eq!(headers[header::CONTENT_LENGTH], "100000");
        assert_eq!(headers[header::CONTENT_RANGE], "bytes 300000-399999/1000000");
        assert_eq!(headers[header::ACCEPT_RANGES], "bytes");
        assert_eq!(
            headers[header::CONTENT_DISPOSITION],
            r#"inline; filename="clip _1_.mp4""#
        );
    }

    #[test]
    fn documents_are_attachments() {
        let mut headers = HeaderMap::new();
        set_media_headers(
            &mut headers,
            &meta(Some("application/pdf"), Some("report.pdf")),
            ByteInterval::full(10),
            10,
        );
        assert_eq!(
            headers[header::CONTENT_DISPOSITION],
            r#"attachment; filename="report.pdf""#
        );
    }
}
