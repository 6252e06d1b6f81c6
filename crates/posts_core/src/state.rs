//! Root state of the posts feature and the structural edits applied to it.
//!
//! The list helpers never mutate their input; each returns a freshly built
//! list so that snapshots already handed out stay untouched.

use std::{collections::HashSet, sync::Arc};

use shared::domain::{Comment, CommentId, Post, PostId};

use crate::store::Merge;

pub type PostList = Arc<[Post]>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreState {
    pub posts: PostList,
    pub is_loading: bool,
    pub error: Option<String>,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            posts: Arc::from(Vec::new()),
            is_loading: false,
            error: None,
        }
    }
}

impl StoreState {
    pub fn post(&self, id: PostId) -> Option<&Post> {
        self.posts.iter().find(|post| post.id == id)
    }

    pub fn contains(&self, id: PostId) -> bool {
        self.post(id).is_some()
    }
}

/// Partial [`StoreState`]; `None` leaves the field as it is.
///
/// `error: Some(None)` clears the error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatePatch {
    pub posts: Option<PostList>,
    pub is_loading: Option<bool>,
    pub error: Option<Option<String>>,
}

impl StatePatch {
    /// Enter `Loading`: raise the flag and clear the previous error.
    pub fn loading() -> Self {
        Self {
            posts: None,
            is_loading: Some(true),
            error: Some(None),
        }
    }

    pub fn posts(posts: impl Into<PostList>) -> Self {
        Self {
            posts: Some(posts.into()),
            ..Self::default()
        }
    }

    pub fn with_posts(mut self, posts: impl Into<PostList>) -> Self {
        self.posts = Some(posts.into());
        self
    }

    pub fn with_loading(mut self, is_loading: bool) -> Self {
        self.is_loading = Some(is_loading);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(Some(error.into()));
        self
    }
}

impl Merge for StoreState {
    type Partial = StatePatch;

    fn merge(&self, partial: StatePatch) -> Self {
        Self {
            posts: partial.posts.unwrap_or_else(|| Arc::clone(&self.posts)),
            is_loading: partial.is_loading.unwrap_or(self.is_loading),
            error: partial.error.unwrap_or_else(|| self.error.clone()),
        }
    }
}

pub(crate) fn prepend_post(posts: &[Post], post: Post) -> Vec<Post> {
    let mut next = Vec::with_capacity(posts.len() + 1);
    next.push(post);
    next.extend(posts.iter().cloned());
    next
}

/// Replace the post with `id` in place. `None` when no post matches.
pub(crate) fn replace_post(
    posts: &[Post],
    id: PostId,
    edit: impl FnOnce(&Post) -> Post,
) -> Option<Vec<Post>> {
    let index = posts.iter().position(|post| post.id == id)?;
    let mut next = posts.to_vec();
    next[index] = edit(&posts[index]);
    Some(next)
}

pub(crate) fn remove_post(posts: &[Post], id: PostId) -> Option<Vec<Post>> {
    let index = posts.iter().position(|post| post.id == id)?;
    let mut next = posts.to_vec();
    next.remove(index);
    Some(next)
}

pub(crate) fn replace_comment(comments: &[Comment], comment: Comment) -> Option<Vec<Comment>> {
    let index = comments
        .iter()
        .position(|existing| existing.id == comment.id)?;
    let mut next = comments.to_vec();
    next[index] = comment;
    Some(next)
}

pub(crate) fn remove_comment(comments: &[Comment], id: CommentId) -> Option<Vec<Comment>> {
    let index = comments.iter().position(|comment| comment.id == id)?;
    let mut next = comments.to_vec();
    next.remove(index);
    Some(next)
}

/// Allocates ids that are not in `taken`.
///
/// Hands out `max + 1`; once that would overflow `i64`, the smallest free
/// positive id instead.
#[derive(Debug, Default)]
pub(crate) struct IdAllocator {
    taken: HashSet<i64>,
    max: Option<i64>,
}

impl IdAllocator {
    pub(crate) fn new(taken: impl IntoIterator<Item = i64>) -> Self {
        let mut allocator = Self::default();
        for id in taken {
            allocator.reserve(id);
        }
        allocator
    }

    pub(crate) fn is_free(&self, id: i64) -> bool {
        !self.taken.contains(&id)
    }

    pub(crate) fn reserve(&mut self, id: i64) {
        self.taken.insert(id);
        self.max = Some(self.max.map_or(id, |max| max.max(id)));
    }

    pub(crate) fn allocate(&mut self) -> i64 {
        let id = match self.max.unwrap_or(0).checked_add(1) {
            Some(next) => next,
            None => (1..=i64::MAX)
                .find(|candidate| self.is_free(*candidate))
                .unwrap_or(i64::MIN),
        };
        self.reserve(id);
        id
    }
}

pub(crate) fn next_post_id(posts: &[Post]) -> PostId {
    PostId(IdAllocator::new(posts.iter().map(|post| post.id.0)).allocate())
}

pub(crate) fn next_comment_id(comments: &[Comment]) -> CommentId {
    CommentId(IdAllocator::new(comments.iter().map(|comment| comment.id.0)).allocate())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::domain::{Author, PostMetadata, UserId};

    fn post(id: i64) -> Post {
        Post {
            user_id: UserId(1),
            id: PostId(id),
            title: format!("post {id}"),
            body: String::new(),
            author: Author {
                name: "Jane Smith".into(),
                email: "js@test.com".into(),
            },
            metadata: PostMetadata::default(),
            comments: Vec::new(),
        }
    }

    #[test]
    fn loading_patch_clears_error_and_keeps_posts() {
        let state = StoreState {
            posts: Arc::from(vec![post(1)]),
            is_loading: false,
            error: Some("boom".into()),
        };
        let next = state.merge(StatePatch::loading());
        assert!(next.is_loading);
        assert_eq!(next.error, None);
        assert_eq!(next.posts.len(), 1);
        assert!(Arc::ptr_eq(&state.posts, &next.posts));
    }

    #[test]
    fn replace_keeps_position() {
        let posts = vec![post(1), post(2), post(3)];
        let next = replace_post(&posts, PostId(2), |old| Post {
            title: "edited".into(),
            ..old.clone()
        })
        .expect("present");
        let ids: Vec<i64> = next.iter().map(|post| post.id.0).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(next[1].title, "edited");
        assert!(replace_post(&posts, PostId(9), Clone::clone).is_none());
    }

    #[test]
    fn synthesized_ids_follow_the_largest_existing_id() {
        assert_eq!(next_post_id(&[]), PostId(1));
        assert_eq!(next_post_id(&[post(7), post(3)]), PostId(8));
    }

    #[test]
    fn allocation_past_the_largest_id_falls_back_to_the_smallest_gap() {
        assert_eq!(next_post_id(&[post(i64::MAX), post(1), post(3)]), PostId(2));

        let mut ids = IdAllocator::new([i64::MAX, 1]);
        assert_eq!(ids.allocate(), 2);
        assert_eq!(ids.allocate(), 3);
        assert!(!ids.is_free(3));
    }
}
