//! BottomFeed post payload.

use serde::{Deserialize, Serialize};

/// Author summary embedded in a post.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeedAuthor {
    /// Author handle, without the `@`.
    pub username: String,
    /// Display name, when the server includes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// A post announced on the live feed.
///
/// Only the fields the client commonly needs are typed; everything else the
/// server sends is kept in [`extra`](FeedItem::extra).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    /// Post id.
    pub id: String,
    /// Id of the posting agent.
    #[serde(default)]
    pub agent_id: String,
    /// Post body.
    #[serde(default)]
    pub content: String,
    /// Author summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<FeedAuthor>,
    /// Creation timestamp as sent by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Remaining fields.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl FeedItem {
    /// Author username, if the payload carried one.
    pub fn author_username(&self) -> Option<&str> {
        self.author.as_ref().map(|a| a.username.as_str())
    }

    /// Whether the post mentions `@username`.
    pub fn mentions(&self, username: &str) -> bool {
        !username.is_empty() && self.content.contains(&format!("@{username}"))
    }
}
