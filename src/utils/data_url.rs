use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::path::Path;

pub fn mime_for(file_name: &str) -> &'static str {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "application/octet-stream",
    }
}

/// `data:` URL for an uploaded file, so it can travel alongside remote
/// reference URLs in a synthesis request.
pub fn encode(file_name: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime_for(file_name), STANDARD.encode(bytes))
}

/// Splits a base64 `data:` URL into its MIME type and payload.
pub fn parse(url: &str) -> Option<(&str, &str)> {
    url.strip_prefix("data:")?.split_once(";base64,")
}
