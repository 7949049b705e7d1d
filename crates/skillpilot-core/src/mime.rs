//! MIME type inference for delivered files.
//!
//! A fixed override table keeps the common office/document types stable
//! across platforms; everything else defers to extension-based guessing.

/// Guess the MIME type for an output filename.
pub fn guess_mime_type(filename: &str) -> String {
    let name = filename.trim().to_lowercase();
    let ext = name.rsplit_once('.').map(|(_, e)| e).unwrap_or("");
    let overridden = match ext {
        "xlsx" => Some("application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
        "xls" => Some("application/vnd.ms-excel"),
        "csv" => Some("text/csv"),
        "json" => Some("application/json"),
        "txt" => Some("text/plain"),
        "md" => Some("text/markdown"),
        "html" | "htm" => Some("text/html"),
        "pdf" => Some("application/pdf"),
        "zip" => Some("application/zip"),
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "svg" => Some("image/svg+xml"),
        "docx" => Some("application/vnd.openxmlformats-officedocument.wordprocessingml.document"),
        "doc" => Some("application/msword"),
        "pptx" => Some("application/vnd.openxmlformats-officedocument.presentationml.presentation"),
        "ppt" => Some("application/vnd.ms-powerpoint"),
        "yaml" | "yml" => Some("application/yaml"),
        _ => None,
    };
    if let Some(mime) = overridden {
        return mime.to_string();
    }
    mime_guess::from_path(&name)
        .first_raw()
        .unwrap_or("application/octet-stream")
        .to_string()
}
