pub mod enumerate;
pub mod fetch;
pub mod preupload;
pub mod remove;
pub mod root;
pub mod upload;

use axum::http::{HeaderMap, header};

/// Builds the absolute upload URL echoed in upload/preupload responses.
/// The listener is plain TCP, so the scheme is always `http`.
pub(crate) fn upload_url(headers: &HeaderMap) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost:3179");
    format!("http://{host}/camli/upload")
}

/// Yields the blobref values of `blob1`, `blob2`, ... form fields,
/// ignoring `camliversion` and anything else.
pub(crate) fn blob_fields(fields: &[(String, String)]) -> impl Iterator<Item = &str> {
    fields.iter().filter_map(|(key, value)| {
        let rest = key.strip_prefix("blob")?;
        rest.chars()
            .all(|c| c.is_ascii_digit())
            .then_some(value.as_str())
    })
}
