//! Feed client: one HTTP round trip per call, no retries.

mod basic;
mod client;
pub mod auth;

pub use basic::BasicClient;
pub use client::HttpClient;

use reqwest::{StatusCode, Url};
use serde::Deserialize;
use tracing::debug;

use crate::error::TransportError;
use crate::model::RawRecord;

/// Body of `GET <endpoint>?results=N`. Only `feeds` is used; channel
/// metadata is ignored.
#[derive(Debug, Deserialize)]
struct FeedResponse {
    #[serde(default)]
    feeds: Vec<RawRecord>,
}

/// Builds `<endpoint>?results=<max_results>`, keeping any query the endpoint already has.
pub fn feed_url(endpoint: &str, max_results: usize) -> Result<Url, TransportError> {
    let mut url = Url::parse(endpoint)
        .map_err(|e| TransportError::InvalidEndpoint(format!("{endpoint}: {e}")))?;
    url.query_pairs_mut()
        .append_pair("results", &max_results.to_string());
    Ok(url)
}

/// Fetches at most `max_results` of the most recent raw records.
///
/// An empty `feeds` array is a valid "no data yet" result. Any status other
/// than `200 OK` is a [`TransportError::Status`].
#[tracing::instrument(skip(client))]
pub async fn fetch_feed<C: HttpClient>(
    client: &C,
    endpoint: &str,
    max_results: usize,
) -> Result<Vec<RawRecord>, TransportError> {
    let req = reqwest::Request::new(reqwest::Method::GET, feed_url(endpoint, max_results)?);

    let resp = client.execute(req).await?;
    let status = resp.status();
    if status != StatusCode::OK {
        return Err(TransportError::Status {
            status_code: status.as_u16(),
        });
    }

    let bytes = resp.bytes().await?;
    let body: FeedResponse =
        serde_json::from_slice(&bytes).map_err(|e| TransportError::Decode(e.to_string()))?;

    debug!(records = body.feeds.len(), "Feed records received");
    Ok(body.feeds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;

    struct Fixed {
        status: u16,
        body: &'static str,
    }

    #[async_trait]
    impl HttpClient for Fixed {
        async fn execute(&self, _req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
            let resp = http::Response::builder()
                .status(self.status)
                .body(self.body)
                .unwrap();
            Ok(resp.into())
        }
    }

    #[test]
    fn test_feed_url_appends_results() {
        let url = feed_url("https://api.thingspeak.com/channels/1/feeds.json", 10).unwrap();
        assert_eq!(url.as_str(), "https://api.thingspeak.com/channels/1/feeds.json?results=10");
    }

    #[test]
    fn test_feed_url_rejects_garbage() {
        assert!(matches!(
            feed_url("not a url", 10),
            Err(TransportError::InvalidEndpoint(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_returns_records() {
        let client = Fixed {
            status: 200,
            body: r#"{"channel":{"id":1},"feeds":[{"created_at":"2024-01-01T00:00:00Z","field1":"3"}]}"#,
        };

        let records = fetch_feed(&client, "https://example.com/feeds.json", 10)
            .await
            .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].slot(1), Some(&serde_json::json!("3")));
    }

    #[tokio::test]
    async fn test_empty_feed_is_not_an_error() {
        let client = Fixed {
            status: 200,
            body: r#"{"channel":{"id":1},"feeds":[]}"#,
        };

        let records = fetch_feed(&client, "https://example.com/feeds.json", 10)
            .await
            .unwrap();

        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_non_200_is_transport_error() {
        let client = Fixed {
            status: 404,
            body: "-1",
        };

        let err = fetch_feed(&client, "https://example.com/feeds.json", 10)
            .await
            .unwrap_err();

        assert_eq!(err, TransportError::Status { status_code: 404 });
        assert_eq!(err.status_code(), Some(404));
    }

    #[tokio::test]
    async fn test_undecodable_body() {
        let client = Fixed {
            status: 200,
            body: "-1",
        };

        let err = fetch_feed(&client, "https://example.com/feeds.json", 10)
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::Decode(_)));
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            // accept, then never answer
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let client = BasicClient::with_timeout(Duration::from_millis(200)).unwrap();
        let err = fetch_feed(&client, &format!("http://{addr}/feeds.json"), 10)
            .await
            .unwrap_err();

        assert_eq!(err, TransportError::Timeout);
        assert_eq!(err.status_code(), None);
        server.abort();
    }
}
