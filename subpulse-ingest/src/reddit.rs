use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::{FeedError, FeedItem, FeedPage, FeedSource};

/// Listings never return more than this many items per page.
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone)]
pub struct RedditFeedConfig {
    pub base_url: String,
    pub subreddit: String,
    pub user_agent: String,
    pub timeout_seconds: u64,
}

#[derive(Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<ListingChild>,
    #[serde(default)]
    after: Option<String>,
}

#[derive(Deserialize)]
struct ListingChild {
    data: FeedItem,
}

/// Client for the public `/r/{subreddit}/new.json` listing.
pub struct RedditFeedClient {
    client: reqwest::Client,
    listing_url: String,
}

impl RedditFeedClient {
    pub fn new(config: RedditFeedConfig) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        let listing_url = format!(
            "{}/r/{}/new.json",
            config.base_url.trim_end_matches('/'),
            config.subreddit
        );

        Ok(Self { client, listing_url })
    }
}

#[async_trait]
impl FeedSource for RedditFeedClient {
    async fn fetch_page(&self, after: Option<&str>, limit: u32) -> Result<FeedPage, FeedError> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE).to_string();
        let mut params = vec![("limit", limit.as_str()), ("raw_json", "1")];
        if let Some(cursor) = after {
            params.push(("after", cursor));
        }

        let response = self
            .client
            .get(&self.listing_url)
            .header("Accept", "application/json")
            .query(&params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body: String = body.chars().take(200).collect();
            tracing::warn!(status = status.as_u16(), "Feed request failed");
            return Err(FeedError::Status {
                code: status.as_u16(),
                body,
            });
        }

        let text = response.text().await?;
        let listing: Listing =
            serde_json::from_str(&text).map_err(|e| FeedError::Decode(e.to_string()))?;

        let items: Vec<FeedItem> = listing.data.children.into_iter().map(|c| c.data).collect();
        tracing::debug!(count = items.len(), after = ?listing.data.after, "Fetched feed page");

        Ok(FeedPage {
            items,
            after: listing.data.after.filter(|a| !a.is_empty()),
        })
    }

    fn name(&self) -> &str {
        "reddit"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> RedditFeedClient {
        RedditFeedClient::new(RedditFeedConfig {
            base_url: server.uri(),
            subreddit: "copilotstudio".to_string(),
            user_agent: "subpulse-test/0.1".to_string(),
            timeout_seconds: 5,
        })
        .unwrap()
    }

    fn item(id: &str) -> serde_json::Value {
        json!({
            "kind": "t3",
            "data": {
                "id": id,
                "title": format!("Post {}", id),
                "selftext": "body",
                "author": "someone",
                "score": 4,
                "num_comments": 2,
                "permalink": format!("/r/copilotstudio/comments/{}/post/", id),
                "created_utc": 1709546400.0,
                "thumbnail": "self",
                "link_flair_text": null
            }
        })
    }

    #[tokio::test]
    async fn test_fetch_page_parses_listing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/r/copilotstudio/new.json"))
            .and(query_param("limit", "100"))
            .and(header("user-agent", "subpulse-test/0.1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "kind": "Listing",
                "data": { "children": [item("a1"), item("a2")], "after": "t3_a2" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let page = client(&server).fetch_page(None, 100).await.unwrap();

        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].id, "a1");
        assert_eq!(page.items[0].score, 4);
        assert_eq!(page.items[0].thumbnail_url(), None);
        assert_eq!(page.items[0].created_at().unwrap().timestamp(), 1709546400);
        assert_eq!(page.after.as_deref(), Some("t3_a2"));
    }

    #[tokio::test]
    async fn test_fetch_page_sends_cursor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/r/copilotstudio/new.json"))
            .and(query_param("after", "t3_a2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "children": [], "after": null }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let page = client(&server).fetch_page(Some("t3_a2"), 25).await.unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.after, None);
    }

    #[tokio::test]
    async fn test_non_success_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).set_body_string("Too Many Requests"))
            .mount(&server)
            .await;

        let err = client(&server).fetch_page(None, 100).await.unwrap_err();
        match err {
            FeedError::Status { code, body } => {
                assert_eq!(code, 429);
                assert_eq!(body, "Too Many Requests");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unexpected_shape_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "error": 403 })))
            .mount(&server)
            .await;

        let err = client(&server).fetch_page(None, 100).await.unwrap_err();
        assert!(matches!(err, FeedError::Decode(_)));
    }

    #[test]
    fn test_thumbnail_and_flair_filters() {
        let mut item: FeedItem = serde_json::from_value(item("x")["data"].clone()).unwrap();
        assert_eq!(item.thumbnail_url(), None);
        item.thumbnail = Some("https://b.thumbs.example/x.jpg".into());
        assert_eq!(item.thumbnail_url(), Some("https://b.thumbs.example/x.jpg"));
        assert_eq!(item.flair(), None);
        item.link_flair_text = Some("Question".into());
        assert_eq!(item.flair(), Some("Question"));
    }
}
