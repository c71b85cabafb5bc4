//! Outbound on/off command to the remote device.
//!
//! Not part of the ingestion pipeline; it shares only the HTTP client seam.

use reqwest::header::{CONTENT_TYPE, HeaderValue};
use reqwest::{Method, StatusCode, Url};
use tracing::{info, warn};

use crate::error::ControlError;
use crate::fetch::HttpClient;

/// Sends `<field>=1` (on) or `<field>=0` (off) as a form POST to `endpoint`.
///
/// Anything other than `200 OK` is returned with the response body verbatim.
#[tracing::instrument(skip(client))]
pub async fn send_switch<C: HttpClient>(
    client: &C,
    endpoint: &str,
    field: &str,
    on: bool,
) -> Result<(), ControlError> {
    let url = Url::parse(endpoint)
        .map_err(|e| ControlError::InvalidEndpoint(format!("{endpoint}: {e}")))?;

    let value = if on { "1" } else { "0" };
    let body = form_body(&url, field, value);

    let mut req = reqwest::Request::new(Method::POST, url);
    req.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/x-www-form-urlencoded"),
    );
    *req.body_mut() = Some(body.into());

    let resp = client.execute(req).await?;
    let status = resp.status();
    if status != StatusCode::OK {
        let body = resp.text().await.unwrap_or_default();
        warn!(status = status.as_u16(), body = %body, "Control call rejected");
        return Err(ControlError::Status {
            status_code: status.as_u16(),
            body,
        });
    }

    info!(field, on, "Control command accepted");
    Ok(())
}

/// `application/x-www-form-urlencoded` body for a single pair. Reuses the
/// URL query serializer, which speaks the same encoding.
fn form_body(url: &Url, field: &str, value: &str) -> String {
    let mut scratch = url.clone();
    scratch.set_query(None);
    scratch.query_pairs_mut().append_pair(field, value);
    scratch.query().unwrap_or_default().to_string()
}
