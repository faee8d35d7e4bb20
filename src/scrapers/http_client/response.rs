//! Turning a reqwest response into a [`FetchedPage`].

use chrono::Utc;
use reqwest::{header::CONTENT_TYPE, Response};

use crate::scrapers::{FetchError, FetchedPage};
use crate::utils::detect_mime;

/// Read the body of a successful response.
pub async fn into_page(url: &str, response: Response) -> Result<FetchedPage, FetchError> {
    let status = response.status().as_u16();
    let final_url = response.url().to_string();
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let bytes = response
        .bytes()
        .await
        .map_err(|e| FetchError::transient(url, e))?
        .to_vec();

    Ok(page_from_parts(url, &final_url, status, content_type, bytes, false))
}

/// Build a page, resolving its effective MIME type.
pub fn page_from_parts(
    url: &str,
    final_url: &str,
    status: u16,
    content_type: Option<String>,
    bytes: Vec<u8>,
    rendered: bool,
) -> FetchedPage {
    let mime = detect_mime(final_url, content_type.as_deref(), &bytes);
    FetchedPage {
        url: url.to_string(),
        final_url: final_url.to_string(),
        status,
        mime,
        content_type,
        bytes,
        rendered,
        fetched_at: Utc::now(),
    }
}
