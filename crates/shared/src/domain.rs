use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(PostId);
id_newtype!(CommentId);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostMetadata {
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A comment owned by exactly one [`Post`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    /// Back-reference to the owning post.
    pub post_id: PostId,
    pub id: CommentId,
    pub name: String,
    pub email: String,
    pub body: String,
}

/// A normalized post as held by the store.
///
/// Unlike the wire record, every field is populated: `author` and `metadata`
/// are filled in when the remote omits them and `comments` is at least empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub user_id: UserId,
    pub id: PostId,
    pub title: String,
    pub body: String,
    pub author: Author,
    pub metadata: PostMetadata,
    pub comments: Vec<Comment>,
}

impl Post {
    pub fn comment(&self, comment_id: CommentId) -> Option<&Comment> {
        self.comments.iter().find(|comment| comment.id == comment_id)
    }
}

/// User input for creating or editing a post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostDraft {
    pub user_id: UserId,
    pub title: String,
    pub body: String,
    pub author: Option<Author>,
}

/// User input for creating a comment. `id` is a client-side suggestion only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentDraft {
    pub id: Option<CommentId>,
    pub name: String,
    pub email: String,
    pub body: String,
}
