//! Blogger v3 REST client

use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{BlogPostBody, BloggerApi, PublishError, RemotePage, ResourceKind, TokenProvider};
use crate::ZonecastError;
use crate::config::PublishingConfig;
use crate::models::RemotePost;

impl ResourceKind {
    fn collection(self) -> &'static str {
        match self {
            ResourceKind::Post => "posts",
            ResourceKind::Page => "pages",
        }
    }

    fn api_kind(self) -> &'static str {
        match self {
            ResourceKind::Post => "blogger#post",
            ResourceKind::Page => "blogger#page",
        }
    }
}

#[derive(Debug, Serialize)]
struct BlogRef<'a> {
    id: &'a str,
}

#[derive(Debug, Serialize)]
struct WireBody<'a> {
    kind: &'static str,
    blog: BlogRef<'a>,
    title: &'a str,
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    labels: Option<&'a [String]>,
}

#[derive(Debug, Deserialize)]
struct WireResource {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
}

impl From<WireResource> for RemotePost {
    fn from(r: WireResource) -> Self {
        RemotePost {
            remote_id: r.id,
            title: r.title,
            url: r.url,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireList {
    #[serde(default)]
    items: Vec<WireResource>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Blogger client authenticated through a [`TokenProvider`]
pub struct BloggerClient<T> {
    client: Client,
    base_url: String,
    blog_id: String,
    tokens: T,
}

impl<T: TokenProvider> BloggerClient<T> {
    pub fn new(config: &PublishingConfig, tokens: T) -> Result<Self, ZonecastError> {
        let blog_id = config
            .blog_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| ZonecastError::config("BLOG_ID is not set"))?;

        Ok(Self {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            blog_id,
            tokens,
        })
    }

    fn url(&self, kind: ResourceKind, suffix: &str) -> String {
        format!(
            "{}/blogs/{}/{}{suffix}",
            self.base_url,
            urlencoding::encode(&self.blog_id),
            kind.collection()
        )
    }

    async fn send<R: DeserializeOwned>(&self, request: RequestBuilder) -> Result<R, PublishError> {
        let token = self.tokens.access_token().await?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| PublishError::Transport {
                message: e.to_string(),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| PublishError::Transport {
            message: e.to_string(),
        })?;

        if status == StatusCode::UNAUTHORIZED {
            return Err(PublishError::authentication("Blogger rejected the access token"));
        }
        if !status.is_success() {
            let message = serde_json::from_str::<ApiErrorBody>(&body)
                .map(|b| b.error.message)
                .unwrap_or_else(|_| body.chars().take(200).collect());
            return Err(PublishError::Api {
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_str(&body).map_err(|e| PublishError::Malformed {
            message: e.to_string(),
        })
    }

    fn wire_body<'a>(&'a self, kind: ResourceKind, body: &'a BlogPostBody) -> WireBody<'a> {
        WireBody {
            kind: kind.api_kind(),
            blog: BlogRef { id: &self.blog_id },
            title: &body.title,
            content: &body.content,
            labels: match kind {
                ResourceKind::Post if !body.labels.is_empty() => Some(&body.labels),
                _ => None,
            },
        }
    }
}

impl<T: TokenProvider> BloggerApi for BloggerClient<T> {
    async fn authenticate(&self) -> Result<(), PublishError> {
        self.tokens.access_token().await.map(|_| ())
    }

    #[tracing::instrument(skip(self))]
    async fn list(
        &self,
        kind: ResourceKind,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<RemotePage, PublishError> {
        let mut url = self.url(kind, &format!("?maxResults={page_size}&fetchBodies=false"));
        // drafts only show up in the admin view
        if kind == ResourceKind::Post {
            url.push_str("&view=ADMIN&status=live&status=draft&status=scheduled");
        }
        if let Some(token) = page_token {
            url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
        }
        debug!(url = %url, "Listing remote resources");

        let list: WireList = self.send(self.client.request(Method::GET, &url)).await?;
        Ok(RemotePage {
            items: list.items.into_iter().map(RemotePost::from).collect(),
            next_page_token: list.next_page_token,
        })
    }

    #[tracing::instrument(skip(self, body), fields(title = %body.title))]
    async fn insert(
        &self,
        kind: ResourceKind,
        body: &BlogPostBody,
        is_draft: bool,
    ) -> Result<RemotePost, PublishError> {
        let url = self.url(kind, &format!("?isDraft={is_draft}"));
        let request = self.client.post(&url).json(&self.wire_body(kind, body));
        let created: WireResource = self.send(request).await?;
        Ok(created.into())
    }

    #[tracing::instrument(skip(self, body), fields(title = %body.title))]
    async fn update(
        &self,
        kind: ResourceKind,
        remote_id: &str,
        body: &BlogPostBody,
    ) -> Result<RemotePost, PublishError> {
        let url = self.url(kind, &format!("/{}", urlencoding::encode(remote_id)));
        let request = self.client.put(&url).json(&self.wire_body(kind, body));
        let updated: WireResource = self.send(request).await?;
        Ok(updated.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct StaticToken(&'static str);

    impl TokenProvider for StaticToken {
        async fn access_token(&self) -> Result<String, PublishError> {
            Ok(self.0.to_string())
        }
    }

    fn client_for(server: &MockServer) -> BloggerClient<StaticToken> {
        let config = PublishingConfig {
            blog_id: Some("4242".to_string()),
            base_url: server.uri(),
            ..PublishingConfig::default()
        };
        BloggerClient::new(&config, StaticToken("tok")).unwrap()
    }

    fn body() -> BlogPostBody {
        BlogPostBody {
            title: "Cold Snap Ahead".to_string(),
            content: "<p>x</p>".to_string(),
            labels: vec!["Eastern Zone".to_string()],
        }
    }

    #[test]
    fn test_blog_id_is_required() {
        let err = BloggerClient::new(&PublishingConfig::default(), StaticToken("t"))
            .err()
            .unwrap();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_list_posts_with_paging() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/blogs/4242/posts"))
            .and(query_param("maxResults", "50"))
            .and(query_param("fetchBodies", "false"))
            .and(query_param("pageToken", "next-1"))
            .and(query_param("view", "ADMIN"))
            .and(query_param("status", "draft"))
            .and(query_param("status", "live"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{"id": "1", "title": "Cold Snap Ahead", "url": "https://b/1.html"}],
                "nextPageToken": "next-2"
            })))
            .mount(&server)
            .await;

        let page = client_for(&server)
            .list(ResourceKind::Post, 50, Some("next-1"))
            .await
            .unwrap();
        assert_eq!(page.items[0].remote_id, "1");
        assert_eq!(page.next_page_token.as_deref(), Some("next-2"));
    }

    #[tokio::test]
    async fn test_empty_listing_has_no_items_field() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/blogs/4242/pages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"kind": "blogger#pageList"})))
            .mount(&server)
            .await;

        let page = client_for(&server).list(ResourceKind::Page, 10, None).await.unwrap();
        assert!(page.items.is_empty());
        assert!(page.next_page_token.is_none());

        let requests = server.received_requests().await.unwrap();
        assert!(!requests[0].url.query().unwrap_or_default().contains("view=ADMIN"));
    }

    #[tokio::test]
    async fn test_insert_post_sends_labels_and_draft_flag() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/blogs/4242/posts"))
            .and(query_param("isDraft", "true"))
            .and(body_partial_json(json!({
                "kind": "blogger#post",
                "blog": {"id": "4242"},
                "title": "Cold Snap Ahead",
                "labels": ["Eastern Zone"]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "99", "title": "Cold Snap Ahead", "url": "https://b/99.html"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let created = client_for(&server)
            .insert(ResourceKind::Post, &body(), true)
            .await
            .unwrap();
        assert_eq!(created.remote_id, "99");
        assert_eq!(created.url, "https://b/99.html");
    }

    #[tokio::test]
    async fn test_update_page() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/blogs/4242/pages/7"))
            .and(body_partial_json(json!({"kind": "blogger#page"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "7", "title": "Weather Blog Archive", "url": "https://b/p/archive.html"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let updated = client_for(&server)
            .update(ResourceKind::Page, "7", &body())
            .await
            .unwrap();
        assert_eq!(updated.url, "https://b/p/archive.html");
    }

    #[tokio::test]
    async fn test_error_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/blogs/4242/posts"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/blogs/4242/posts"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"code": 400, "message": "Invalid value for content"}
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client.list(ResourceKind::Post, 50, None).await.unwrap_err();
        assert!(matches!(err, PublishError::Authentication { .. }));

        let err = client.insert(ResourceKind::Post, &body(), false).await.unwrap_err();
        assert_eq!(
            err,
            PublishError::Api {
                status: 400,
                message: "Invalid value for content".to_string()
            }
        );
    }
}
