use std::{
    collections::HashSet,
    fmt,
    str::FromStr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use chrono::{DateTime, Utc};
use shared::{
    domain::{Comment, CommentDraft, CommentId, Post, PostDraft, PostId, PostMetadata},
    protocol::{CommentRecord, PostRecord},
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::state::IdAllocator;

pub mod error;
pub mod fixtures;
pub mod state;
pub mod store;
pub mod transport;

pub use error::TransportError;
pub use fixtures::{Clock, FixtureSource, RandomFixtures, SystemClock};
pub use state::{PostList, StatePatch, StoreState};
pub use store::{Derived, Merge, Snapshot, Store, StoreClosed};
pub use transport::{HttpTransport, MissingTransport, PostsTransport};

pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Which settling request is allowed to write `is_loading` and `error`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestOrdering {
    /// Every settlement writes the lifecycle flags; the last one to settle
    /// wins even if a newer request is still in flight.
    #[default]
    LastSettledWins,
    /// Only the most recently issued request writes the lifecycle flags, and
    /// a stale `load_posts` result is discarded.
    LatestIssuedWins,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown request ordering `{0}` (expected `last-settled` or `latest-issued`)")]
pub struct UnknownOrdering(pub String);

impl FromStr for RequestOrdering {
    type Err = UnknownOrdering;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "last-settled" | "last-settled-wins" => Ok(Self::LastSettledWins),
            "latest-issued" | "latest-issued-wins" | "sequenced" => Ok(Self::LatestIssuedWins),
            other => Err(UnknownOrdering(other.to_string())),
        }
    }
}

impl fmt::Display for RequestOrdering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LastSettledWins => f.write_str("last-settled"),
            Self::LatestIssuedWins => f.write_str("latest-issued"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerConfig {
    /// How many posts `load_posts` keeps from the remote list.
    pub page_size: usize,
    pub ordering: RequestOrdering,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            ordering: RequestOrdering::default(),
        }
    }
}

/// Outcome of a use case. Failures are also recorded in `StoreState::error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Applied,
    /// The record the use case targets is not (or no longer) in the store.
    NoOp,
    Failed(TransportError),
    /// A newer request was issued before this one settled; its result was
    /// dropped. Only produced with [`RequestOrdering::LatestIssuedWins`].
    Superseded,
}

impl Settlement {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Posts-with-comments use cases on top of a [`Store`] of [`StoreState`].
///
/// Async use cases patch the store when their transport call settles; the
/// local comment edits patch it synchronously. Store locks are never held
/// across an `.await`.
pub struct PostsController {
    store: Arc<Store<StoreState>>,
    transport: Arc<dyn PostsTransport>,
    clock: Arc<dyn Clock>,
    fixtures: Arc<dyn FixtureSource>,
    config: ControllerConfig,
    latest_request: AtomicU64,
    posts: Derived<StoreState, PostList>,
    is_loading: Derived<StoreState, bool>,
    error: Derived<StoreState, Option<String>>,
}

impl PostsController {
    pub fn new(transport: Arc<dyn PostsTransport>) -> Arc<Self> {
        Self::new_with_dependencies(
            Arc::new(Store::new(StoreState::default())),
            transport,
            Arc::new(SystemClock),
            Arc::new(RandomFixtures::new()),
            ControllerConfig::default(),
        )
    }

    pub fn new_with_dependencies(
        store: Arc<Store<StoreState>>,
        transport: Arc<dyn PostsTransport>,
        clock: Arc<dyn Clock>,
        fixtures: Arc<dyn FixtureSource>,
        config: ControllerConfig,
    ) -> Arc<Self> {
        let posts = store.derive(|state| Arc::clone(&state.posts));
        let is_loading = store.select(|state| state.is_loading, |is_loading| *is_loading);
        let error = store.select(|state| state.error.clone(), Clone::clone);
        Arc::new(Self {
            store,
            transport,
            clock,
            fixtures,
            config,
            latest_request: AtomicU64::new(0),
            posts,
            is_loading,
            error,
        })
    }

    pub fn store(&self) -> &Arc<Store<StoreState>> {
        &self.store
    }

    pub fn config(&self) -> ControllerConfig {
        self.config
    }

    pub fn snapshot(&self) -> Arc<StoreState> {
        self.store.read()
    }

    pub fn posts(&self) -> Derived<StoreState, PostList> {
        self.posts.clone()
    }

    pub fn is_loading(&self) -> Derived<StoreState, bool> {
        self.is_loading.clone()
    }

    pub fn error(&self) -> Derived<StoreState, Option<String>> {
        self.error.clone()
    }

    pub fn post(&self, id: PostId) -> Option<Post> {
        self.store.read().post(id).cloned()
    }

    pub fn post_count(&self) -> usize {
        self.store.read().posts.len()
    }

    /// Comments of post `id`, empty while the post is absent. Recomputed only
    /// when that post's comments change.
    pub fn comments_for(&self, id: PostId) -> Derived<StoreState, Vec<Comment>> {
        self.store.select(
            move |state| {
                state
                    .post(id)
                    .map(|post| post.comments.clone())
                    .unwrap_or_default()
            },
            Clone::clone,
        )
    }

    pub async fn load_posts(&self) -> Settlement {
        let request = self.begin("load", StatePatch::loading().with_posts(Vec::<Post>::new()));
        match self.transport.list_posts().await {
            Ok(records) => {
                let received = records.len();
                let posts = self.normalize_page(records, self.clock.now());
                let count = posts.len();
                let published = self.store.try_update(|_| {
                    self.owns_lifecycle(request)
                        .then(|| StatePatch::posts(posts).with_loading(false))
                });
                if !published {
                    warn!(request, "posts: load superseded by a newer request");
                    return Settlement::Superseded;
                }
                info!(request, received, count, "posts: loaded");
                Settlement::Applied
            }
            Err(err) => self.fail(request, "load", err),
        }
    }

    /// Re-fetch one post, keeping its local comments.
    pub async fn refresh_post(&self, id: PostId) -> Settlement {
        if !self.store.read().contains(id) {
            debug!(post_id = id.0, "posts: refresh skipped, post absent");
            return Settlement::NoOp;
        }
        let request = self.begin("refresh", StatePatch::loading());
        match self.transport.get_post(id).await {
            Ok(record) => {
                let settlement = self.settle(request, |current| {
                    state::replace_post(&current.posts, id, |existing| {
                        merge_into(existing, record)
                    })
                });
                info!(request, post_id = id.0, ?settlement, "posts: refreshed");
                settlement
            }
            Err(err) => self.fail(request, "refresh", err),
        }
    }

    pub async fn add_post(&self, draft: PostDraft) -> Settlement {
        let now = self.clock.now();
        let author = draft.author.unwrap_or_else(|| self.fixtures.author());
        let record = PostRecord {
            user_id: draft.user_id,
            id: None,
            title: draft.title,
            body: draft.body,
            author: Some(author),
            metadata: Some(PostMetadata {
                created_at: Some(now),
                updated_at: Some(now),
            }),
        };
        let request = self.begin("add", StatePatch::loading());
        match self.transport.create_post(&record).await {
            Ok(created) => {
                let created = fill_from(&record, created);
                let returned_id = created.id;
                let mut assigned = None;
                let settlement = self.settle(request, |current| {
                    let id = match returned_id {
                        Some(id) if !current.contains(id) => id,
                        _ => state::next_post_id(&current.posts),
                    };
                    assigned = Some(id);
                    let post = self.normalize_post(created, id, now);
                    Some(state::prepend_post(&current.posts, post))
                });
                if let Some(id) = assigned {
                    if returned_id != Some(id) {
                        debug!(
                            post_id = id.0,
                            returned = ?returned_id,
                            "posts: synthesized id for created post"
                        );
                    }
                    info!(request, post_id = id.0, "posts: post added");
                }
                settlement
            }
            Err(err) => self.fail(request, "add", err),
        }
    }

    pub async fn update_post(&self, id: PostId, draft: PostDraft) -> Settlement {
        let Some(current) = self.post(id) else {
            debug!(post_id = id.0, "posts: update skipped, post absent");
            return Settlement::NoOp;
        };
        let record = PostRecord {
            user_id: draft.user_id,
            id: Some(id),
            title: draft.title,
            body: draft.body,
            author: Some(draft.author.unwrap_or(current.author)),
            metadata: Some(PostMetadata {
                created_at: current.metadata.created_at,
                updated_at: Some(self.clock.now()),
            }),
        };
        let request = self.begin("update", StatePatch::loading());
        match self.transport.replace_post(id, &record).await {
            Ok(replaced) => {
                let replaced = fill_from(&record, replaced);
                let settlement = self.settle(request, |current| {
                    state::replace_post(&current.posts, id, |existing| {
                        merge_into(existing, replaced)
                    })
                });
                info!(request, post_id = id.0, ?settlement, "posts: post updated");
                settlement
            }
            Err(err) => self.fail(request, "update", err),
        }
    }

    pub async fn remove_post(&self, id: PostId) -> Settlement {
        if !self.store.read().contains(id) {
            debug!(post_id = id.0, "posts: remove skipped, post absent");
            return Settlement::NoOp;
        }
        let request = self.begin("remove", StatePatch::loading());
        match self.transport.delete_post(id).await {
            Ok(()) => {
                let settlement =
                    self.settle(request, |current| state::remove_post(&current.posts, id));
                info!(request, post_id = id.0, ?settlement, "posts: post removed");
                settlement
            }
            Err(err) => self.fail(request, "remove", err),
        }
    }

    /// Replace the comments of post `id` with the remote list.
    pub async fn load_comments_for_post(&self, id: PostId) -> Settlement {
        if !self.store.read().contains(id) {
            debug!(post_id = id.0, "posts: comments load skipped, post absent");
            return Settlement::NoOp;
        }
        let request = self.begin("load comments", StatePatch::loading());
        match self.transport.list_comments(id).await {
            Ok(records) => {
                let comments = normalize_comments(id, records);
                let count = comments.len();
                let settlement = self.settle(request, |current| {
                    state::replace_post(&current.posts, id, |post| Post {
                        comments,
                        ..post.clone()
                    })
                });
                info!(request, post_id = id.0, count, "posts: comments loaded");
                settlement
            }
            Err(err) => self.fail(request, "load comments", err),
        }
    }

    /// Append a comment to post `id`.
    ///
    /// The comment keeps the id the remote returned unless another comment
    /// of the post already has it; then the draft's id is tried, then the
    /// next free one.
    pub async fn add_comment_to_post(&self, id: PostId, draft: CommentDraft) -> Settlement {
        if !self.store.read().contains(id) {
            debug!(post_id = id.0, "posts: comment add skipped, post absent");
            return Settlement::NoOp;
        }
        let suggested = draft.id;
        let record = CommentRecord {
            post_id: id,
            id: draft.id,
            name: draft.name,
            email: draft.email,
            body: draft.body,
        };
        let request = self.begin("add comment", StatePatch::loading());
        match self.transport.create_comment(id, &record).await {
            Ok(created) => {
                let settlement = self.settle(request, |current| {
                    state::replace_post(&current.posts, id, |post| {
                        let comment_id = resolve_comment_id(&post.comments, created.id, suggested);
                        let mut comments = post.comments.clone();
                        comments.push(Comment {
                            post_id: id,
                            id: comment_id,
                            name: created.name,
                            email: created.email,
                            body: created.body,
                        });
                        Post {
                            comments,
                            ..post.clone()
                        }
                    })
                });
                info!(request, post_id = id.0, ?settlement, "posts: comment added");
                settlement
            }
            Err(err) => self.fail(request, "add comment", err),
        }
    }

    /// Replace the comment with `comment.id` inside post `id`. Local only.
    pub fn update_comment_for_post(&self, id: PostId, comment: Comment) -> Settlement {
        let comment_id = comment.id;
        let applied = self.store.try_update(|current| {
            let post = current.post(id)?;
            let comments = state::replace_comment(
                &post.comments,
                Comment {
                    post_id: id,
                    ..comment
                },
            )?;
            state::replace_post(&current.posts, id, |post| Post {
                comments,
                ..post.clone()
            })
            .map(StatePatch::posts)
        });
        debug!(post_id = id.0, comment_id = comment_id.0, applied, "posts: comment updated");
        local_settlement(applied)
    }

    /// Drop comment `comment_id` from post `id`. Local only.
    pub fn remove_comment_from_post(&self, id: PostId, comment_id: CommentId) -> Settlement {
        let applied = self.store.try_update(|current| {
            let post = current.post(id)?;
            let comments = state::remove_comment(&post.comments, comment_id)?;
            state::replace_post(&current.posts, id, |post| Post {
                comments,
                ..post.clone()
            })
            .map(StatePatch::posts)
        });
        debug!(post_id = id.0, comment_id = comment_id.0, applied, "posts: comment removed");
        local_settlement(applied)
    }

    fn begin(&self, operation: &'static str, patch: StatePatch) -> u64 {
        let request = self.latest_request.fetch_add(1, Ordering::SeqCst) + 1;
        self.store.set(patch);
        debug!(request, "posts: {operation} started");
        request
    }

    fn owns_lifecycle(&self, request: u64) -> bool {
        match self.config.ordering {
            RequestOrdering::LastSettledWins => true,
            RequestOrdering::LatestIssuedWins => {
                self.latest_request.load(Ordering::SeqCst) == request
            }
        }
    }

    /// Apply a successful result. `edit` returns `None` when the record it
    /// targets has disappeared since the request was issued.
    fn settle(
        &self,
        request: u64,
        edit: impl FnOnce(&StoreState) -> Option<Vec<Post>>,
    ) -> Settlement {
        let mut applied = false;
        self.store.try_update(|current| {
            let posts = edit(current);
            applied = posts.is_some();
            let owns_lifecycle = self.owns_lifecycle(request);
            if posts.is_none() && !owns_lifecycle {
                return None;
            }
            let mut patch = StatePatch::default();
            if let Some(posts) = posts {
                patch = patch.with_posts(posts);
            }
            if owns_lifecycle {
                patch = patch.with_loading(false);
            }
            Some(patch)
        });
        local_settlement(applied)
    }

    fn fail(&self, request: u64, operation: &'static str, err: TransportError) -> Settlement {
        warn!(request, status = ?err.status, "posts: {operation} failed: {err}");
        self.store.try_update(|_| {
            self.owns_lifecycle(request).then(|| {
                StatePatch::default()
                    .with_loading(false)
                    .with_error(err.message.clone())
            })
        });
        Settlement::Failed(err)
    }

    /// First page of `records`: duplicate ids dropped (first wins), missing
    /// ids synthesized after the largest id on the page, or in the lowest gap
    /// when that id is `i64::MAX`.
    fn normalize_page(&self, records: Vec<PostRecord>, now: DateTime<Utc>) -> Vec<Post> {
        let mut seen = HashSet::new();
        let page: Vec<PostRecord> = records
            .into_iter()
            .filter(|record| record.id.map_or(true, |id| seen.insert(id)))
            .take(self.config.page_size)
            .collect();
        let mut ids = IdAllocator::new(page.iter().filter_map(|record| record.id).map(|id| id.0));
        page.into_iter()
            .map(|record| {
                let id = record.id.unwrap_or_else(|| PostId(ids.allocate()));
                self.normalize_post(record, id, now)
            })
            .collect()
    }

    fn normalize_post(&self, record: PostRecord, id: PostId, now: DateTime<Utc>) -> Post {
        let metadata = record.metadata.unwrap_or_default();
        Post {
            user_id: record.user_id,
            id,
            title: record.title,
            body: record.body,
            author: record.author.unwrap_or_else(|| self.fixtures.author()),
            metadata: PostMetadata {
                created_at: Some(
                    metadata
                        .created_at
                        .unwrap_or_else(|| self.fixtures.created_at(now)),
                ),
                updated_at: metadata.updated_at,
            },
            comments: Vec::new(),
        }
    }
}

impl fmt::Debug for PostsController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostsController")
            .field("store", &self.store)
            .field("config", &self.config)
            .field("latest_request", &self.latest_request)
            .finish()
    }
}

fn local_settlement(applied: bool) -> Settlement {
    if applied {
        Settlement::Applied
    } else {
        Settlement::NoOp
    }
}

/// The remote may echo a subset of what was sent.
fn fill_from(sent: &PostRecord, received: PostRecord) -> PostRecord {
    PostRecord {
        author: received.author.or_else(|| sent.author.clone()),
        metadata: received.metadata.or_else(|| sent.metadata.clone()),
        ..received
    }
}

/// Remote fields over a stored post. Id and comments stay local.
fn merge_into(existing: &Post, record: PostRecord) -> Post {
    let metadata = record.metadata.unwrap_or_default();
    Post {
        user_id: record.user_id,
        id: existing.id,
        title: record.title,
        body: record.body,
        author: record.author.unwrap_or_else(|| existing.author.clone()),
        metadata: PostMetadata {
            created_at: metadata.created_at.or(existing.metadata.created_at),
            updated_at: metadata.updated_at.or(existing.metadata.updated_at),
        },
        comments: existing.comments.clone(),
    }
}

fn normalize_comments(post_id: PostId, records: Vec<CommentRecord>) -> Vec<Comment> {
    let mut seen = HashSet::new();
    let records: Vec<CommentRecord> = records
        .into_iter()
        .filter(|record| record.id.map_or(true, |id| seen.insert(id)))
        .collect();
    let mut ids = IdAllocator::new(records.iter().filter_map(|record| record.id).map(|id| id.0));
    records
        .into_iter()
        .map(|record| Comment {
            post_id,
            id: record.id.unwrap_or_else(|| CommentId(ids.allocate())),
            name: record.name,
            email: record.email,
            body: record.body,
        })
        .collect()
}

fn resolve_comment_id(
    comments: &[Comment],
    returned: Option<CommentId>,
    suggested: Option<CommentId>,
) -> CommentId {
    [returned, suggested]
        .into_iter()
        .flatten()
        .find(|candidate| comments.iter().all(|comment| comment.id != *candidate))
        .unwrap_or_else(|| state::next_comment_id(comments))
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
