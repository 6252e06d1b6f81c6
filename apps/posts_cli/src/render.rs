//! Plain-text rendering of posts and comments for the terminal.

use shared::domain::{Comment, Post};

/// Comment bodies longer than this many characters are cut and end in `...`.
pub const COMMENT_BODY_LIMIT: usize = 30;

const BOX_WIDTH: usize = 41;
const TITLE_WIDTH: usize = 40;

pub fn format_posts(posts: &[Post]) -> String {
    if posts.is_empty() {
        return "No Posts".to_string();
    }
    let mut lines = vec![format!(
        "{:>4}  {:<title$}  {:<24}  {:<10}  {}",
        "ID",
        "TITLE",
        "AUTHOR",
        "CREATED",
        "COMMENTS",
        title = TITLE_WIDTH
    )];
    lines.extend(posts.iter().map(format_post_row));
    lines.join("\n")
}

pub fn format_post_row(post: &Post) -> String {
    let created = post
        .metadata
        .created_at
        .map(|at| at.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "-".into());
    format!(
        "{:>4}  {:<title$}  {:<24}  {:<10}  {}",
        post.id.0,
        clip(&post.title, TITLE_WIDTH),
        clip(&post.author.name, 24),
        created,
        post.comments.len(),
        title = TITLE_WIDTH
    )
}

pub fn format_post(post: &Post) -> String {
    let stamp = |at: Option<chrono::DateTime<chrono::Utc>>| {
        at.map(|at| at.to_rfc3339()).unwrap_or_else(|| "-".into())
    };
    format!(
        "#{id} {title}\nby {name} <{email}> (user {user})\ncreated {created}, updated {updated}\n\n{body}\n\n{comments}",
        id = post.id,
        title = post.title,
        name = post.author.name,
        email = post.author.email,
        user = post.user_id,
        created = stamp(post.metadata.created_at),
        updated = stamp(post.metadata.updated_at),
        body = post.body,
        comments = format_comments(&post.comments, COMMENT_BODY_LIMIT),
    )
}

/// One box per comment, numbered from 1; `No Comments` when empty.
pub fn format_comments(comments: &[Comment], max_len: usize) -> String {
    if comments.is_empty() {
        return "No Comments".to_string();
    }
    let rule = "═".repeat(BOX_WIDTH);
    comments
        .iter()
        .enumerate()
        .map(|(index, comment)| {
            let body = truncate_body(&comment.body, max_len)
                .lines()
                .map(|line| format!("║ {line}"))
                .collect::<Vec<_>>()
                .join("\n");
            format!(
                "╔{rule}╗\n║ Comment {number}:\n║ Name: {name}\n║ Email: {email}\n║ Body:\n{body}\n╚{rule}╝",
                number = index + 1,
                name = comment.name,
                email = comment.email,
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn truncate_body(body: &str, max_len: usize) -> String {
    match body.char_indices().nth(max_len) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}

fn clip(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let kept: String = text.chars().take(width.saturating_sub(1)).collect();
    format!("{kept}…")
}
