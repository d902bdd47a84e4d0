//! Idempotent publishing to Blogger
//!
//! A publish is an upsert keyed by normalized title: the first matching
//! post (or page) found within the search window is updated in place,
//! otherwise a new one is inserted. Re-running a zone with an unchanged
//! title therefore never creates a duplicate.

pub mod auth;
pub mod blogger;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::PublishingConfig;
use crate::models::RemotePost;

pub use auth::{OAuthTokenProvider, StoredToken, TokenProvider};
pub use blogger::BloggerClient;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PublishError {
    #[error("authentication failed: {message}")]
    Authentication { message: String },

    #[error("Blogger API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("transport error: {message}")]
    Transport { message: String },

    #[error("malformed Blogger response: {message}")]
    Malformed { message: String },
}

impl PublishError {
    pub fn authentication<S: Into<String>>(message: S) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }
}

/// Blogger resource family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Post,
    Page,
}

/// Title, HTML and labels sent on insert and update
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlogPostBody {
    pub title: String,
    pub content: String,
    pub labels: Vec<String>,
}

/// One page of a remote listing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemotePage {
    pub items: Vec<RemotePost>,
    pub next_page_token: Option<String>,
}

/// Remote blog operations used by the publisher
pub trait BloggerApi {
    /// Make sure a usable bearer token is available
    async fn authenticate(&self) -> Result<(), PublishError>;

    async fn list(
        &self,
        kind: ResourceKind,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<RemotePage, PublishError>;

    async fn insert(
        &self,
        kind: ResourceKind,
        body: &BlogPostBody,
        is_draft: bool,
    ) -> Result<RemotePost, PublishError>;

    async fn update(
        &self,
        kind: ResourceKind,
        remote_id: &str,
        body: &BlogPostBody,
    ) -> Result<RemotePost, PublishError>;
}

/// Publish state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishState {
    Start,
    Authenticating,
    Searching,
    FoundExisting,
    NotFound,
    Updating,
    Inserting,
    Done,
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishAction {
    Inserted,
    Updated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishReceipt {
    pub remote: RemotePost,
    pub action: PublishAction,
}

/// Case and whitespace insensitive title key
#[must_use]
pub fn normalize_title(title: &str) -> String {
    title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Upserts posts and pages through a [`BloggerApi`]
pub struct Publisher<B> {
    api: B,
    search_page_size: u32,
    search_pages: u32,
    as_draft: bool,
}

impl<B: BloggerApi> Publisher<B> {
    pub fn new(api: B, config: &PublishingConfig) -> Self {
        Self {
            api,
            search_page_size: config.search_page_size.max(1),
            search_pages: config.search_pages.max(1),
            as_draft: config.as_draft,
        }
    }

    #[must_use]
    pub fn api(&self) -> &B {
        &self.api
    }

    fn advance(&self, kind: ResourceKind, state: &mut PublishState, next: PublishState) {
        debug!(kind = ?kind, from = ?*state, to = ?next, "Publish transition");
        *state = next;
    }

    /// Insert or update `body`, matched by normalized title
    #[tracing::instrument(skip(self, body), fields(title = %body.title))]
    pub async fn publish(
        &self,
        kind: ResourceKind,
        body: &BlogPostBody,
    ) -> Result<PublishReceipt, PublishError> {
        let mut state = PublishState::Start;
        let result = self.run(kind, body, &mut state).await;

        match &result {
            Ok(receipt) => {
                self.advance(kind, &mut state, PublishState::Done);
                info!(kind = ?kind, action = ?receipt.action, url = %receipt.remote.url, "Published");
            }
            Err(e) => {
                warn!(kind = ?kind, state = ?state, error = %e, "Publish aborted");
                self.advance(kind, &mut state, PublishState::Abort);
            }
        }
        result
    }

    async fn run(
        &self,
        kind: ResourceKind,
        body: &BlogPostBody,
        state: &mut PublishState,
    ) -> Result<PublishReceipt, PublishError> {
        self.advance(kind, state, PublishState::Authenticating);
        self.api.authenticate().await?;

        self.advance(kind, state, PublishState::Searching);
        match self.find_existing(kind, &body.title).await? {
            Some(existing) => {
                self.advance(kind, state, PublishState::FoundExisting);
                self.advance(kind, state, PublishState::Updating);
                let remote = self.api.update(kind, &existing.remote_id, body).await?;
                Ok(PublishReceipt {
                    remote,
                    action: PublishAction::Updated,
                })
            }
            None => {
                self.advance(kind, state, PublishState::NotFound);
                self.advance(kind, state, PublishState::Inserting);
                let remote = self.api.insert(kind, body, self.as_draft).await?;
                Ok(PublishReceipt {
                    remote,
                    action: PublishAction::Inserted,
                })
            }
        }
    }

    /// First remote item whose normalized title matches, within the search window
    async fn find_existing(
        &self,
        kind: ResourceKind,
        title: &str,
    ) -> Result<Option<RemotePost>, PublishError> {
        let wanted = normalize_title(title);
        let mut page_token: Option<String> = None;

        for _ in 0..self.search_pages {
            let page = self
                .api
                .list(kind, self.search_page_size, page_token.as_deref())
                .await?;

            if let Some(found) = page
                .items
                .into_iter()
                .find(|p| normalize_title(&p.title) == wanted)
            {
                return Ok(Some(found));
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(None)
    }
}
