//! JSON records exchanged with the remote posts collection.
//!
//! The remote is free to omit anything it did not store, so every field the
//! client fills in locally is optional here. Comments never travel inside a
//! post; they have their own nested collection.

use serde::{Deserialize, Serialize};

use crate::domain::{Author, CommentId, PostId, PostMetadata, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRecord {
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<PostId>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<Author>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<PostMetadata>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentRecord {
    pub post_id: PostId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<CommentId>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub body: String,
}
