//! HTML rendering for `/watch/{path}`.
//!
//! Audio and video get an embedded player; everything else gets a download page.

use crate::models::object::ObjectMetadata;

/// Render the watch page for an object served at `stream_url`.
pub fn render(meta: &ObjectMetadata, stream_url: &str) -> String {
    let name = meta.file_name.as_deref().unwrap_or("file");
    let mime = meta.mime_type.as_deref().unwrap_or("application/octet-stream");
    let media_tag = match mime.split('/').next().map(str::trim) {
        Some("video") => Some("video"),
        Some("audio") => Some("audio"),
        _ => None,
    };

    let (heading, content) = match media_tag {
        Some(tag) => (
            format!("Watch {name}"),
            format!(
                r#"<{tag} src="{src}" controls preload="metadata" style="width:100%"></{tag}>"#,
                src = html_escape(stream_url),
            ),
        ),
        None => (
            format!("Download {name}"),
            format!(
                r#"<p>{size}</p><a class="button" href="{src}" download>Download</a>"#,
                size = human_bytes(meta.size_bytes),
                src = html_escape(stream_url),
            ),
        ),
    };

    format!(
        concat!(
            "<!DOCTYPE html>",
            r#"<html lang="en"><head><meta charset="utf-8">"#,
            r#"<meta name="viewport" content="width=device-width, initial-scale=1">"#,
            "<title>{heading}</title></head>",
            "<body><main><h1>{name}</h1>{content}</main></body></html>"
        ),
        heading = html_escape(&heading),
        name = html_escape(name),
        content = content,
    )
}

/// Size with a binary unit, e.g. `1.50 MiB`.
pub fn human_bytes(size: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    if size < 1024 {
        return format!("{size} B");
    }
    let mut value = size as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}

fn html_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
