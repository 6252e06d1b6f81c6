use std::{path::PathBuf, sync::Arc};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use posts_core::{
    ControllerConfig, FixtureSource, HttpTransport, PostsController, RandomFixtures,
    RequestOrdering, Settlement, Store, StoreState, SystemClock,
};
use shared::domain::{Author, CommentDraft, PostDraft, PostId, UserId};
use tracing::warn;
use tracing_subscriber::EnvFilter;

mod config;
mod render;

use config::load_settings;
use render::{format_comments, format_post, format_posts, COMMENT_BODY_LIMIT};

#[derive(Parser, Debug)]
#[command(name = "posts", about = "Browse and edit posts on a JSONPlaceholder-style API")]
struct Cli {
    /// Config file; defaults to ./posts.toml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    api_url: Option<String>,
    #[arg(long, global = true)]
    page_size: Option<usize>,
    /// `last-settled` or `latest-issued`.
    #[arg(long, global = true)]
    ordering: Option<RequestOrdering>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    List,
    Show {
        id: i64,
    },
    /// Missing title or body is filled with random words.
    Add {
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        body: Option<String>,
        #[arg(long, default_value_t = 1)]
        user_id: i64,
        #[arg(long, requires = "author_email")]
        author_name: Option<String>,
        #[arg(long, requires = "author_name")]
        author_email: Option<String>,
    },
    Update {
        id: i64,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        body: Option<String>,
    },
    Delete {
        id: i64,
    },
    Comments {
        post_id: i64,
    },
    Comment {
        post_id: i64,
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        body: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (mut settings, ignored) = load_settings(cli.config.as_deref())?;
    if let Some(api_url) = cli.api_url {
        settings.api_url = api_url;
    }
    if let Some(page_size) = cli.page_size.filter(|size| *size > 0) {
        settings.page_size = page_size;
    }
    if let Some(ordering) = cli.ordering {
        settings.ordering = ordering;
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.log_filter))
        .with_context(|| format!("invalid log filter '{}'", settings.log_filter))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();
    for entry in ignored {
        warn!("config: ignored invalid setting {entry}");
    }

    let transport = HttpTransport::with_timeout(&settings.api_url, settings.timeout())
        .with_context(|| format!("failed to build transport for '{}'", settings.api_url))?;
    let fixtures = Arc::new(RandomFixtures::new());
    let controller = PostsController::new_with_dependencies(
        Arc::new(Store::new(StoreState::default())),
        Arc::new(transport),
        Arc::new(SystemClock),
        Arc::clone(&fixtures) as Arc<dyn FixtureSource>,
        ControllerConfig {
            page_size: settings.page_size,
            ordering: settings.ordering,
        },
    );

    expect_applied(controller.load_posts().await, "load posts")?;
    run(&controller, fixtures.as_ref(), cli.command).await
}

const GENERATED_TITLE_WORDS: usize = 4;
const GENERATED_BODY_WORDS: usize = 12;

async fn run(
    controller: &PostsController,
    fixtures: &dyn FixtureSource,
    command: Command,
) -> Result<()> {
    match command {
        Command::List => {
            println!("{}", format_posts(&controller.snapshot().posts));
        }
        Command::Show { id } => {
            let id = PostId(id);
            expect_found(controller.refresh_post(id).await, "refresh post", id)?;
            expect_found(
                controller.load_comments_for_post(id).await,
                "load comments",
                id,
            )?;
            let post = controller
                .post(id)
                .ok_or_else(|| anyhow!("post {id} disappeared"))?;
            println!("{}", format_post(&post));
        }
        Command::Add {
            title,
            body,
            user_id,
            author_name,
            author_email,
        } => {
            let author = author_name
                .zip(author_email)
                .map(|(name, email)| Author { name, email });
            let draft = PostDraft {
                user_id: UserId(user_id),
                title: title.unwrap_or_else(|| fixtures.sentence(GENERATED_TITLE_WORDS)),
                body: body.unwrap_or_else(|| fixtures.sentence(GENERATED_BODY_WORDS)),
                author,
            };
            expect_applied(controller.add_post(draft).await, "add post")?;
            println!("{}", format_posts(&controller.snapshot().posts));
        }
        Command::Update { id, title, body } => {
            let id = PostId(id);
            let current = controller
                .post(id)
                .ok_or_else(|| anyhow!("post {id} not found"))?;
            let draft = PostDraft {
                user_id: current.user_id,
                title: title.unwrap_or(current.title),
                body: body.unwrap_or(current.body),
                author: Some(current.author),
            };
            expect_found(controller.update_post(id, draft).await, "update post", id)?;
            println!("{}", format_posts(&controller.snapshot().posts));
        }
        Command::Delete { id } => {
            let id = PostId(id);
            expect_found(controller.remove_post(id).await, "delete post", id)?;
            println!("{}", format_posts(&controller.snapshot().posts));
        }
        Command::Comments { post_id } => {
            let id = PostId(post_id);
            expect_found(
                controller.load_comments_for_post(id).await,
                "load comments",
                id,
            )?;
            println!(
                "{}",
                format_comments(&controller.comments_for(id).get(), COMMENT_BODY_LIMIT)
            );
        }
        Command::Comment {
            post_id,
            name,
            email,
            body,
        } => {
            let id = PostId(post_id);
            expect_found(
                controller.load_comments_for_post(id).await,
                "load comments",
                id,
            )?;
            let draft = CommentDraft {
                id: None,
                name,
                email,
                body,
            };
            expect_found(
                controller.add_comment_to_post(id, draft).await,
                "add comment",
                id,
            )?;
            println!(
                "{}",
                format_comments(&controller.comments_for(id).get(), COMMENT_BODY_LIMIT)
            );
        }
    }
    Ok(())
}

fn expect_applied(settlement: Settlement, operation: &str) -> Result<()> {
    match settlement {
        Settlement::Applied | Settlement::NoOp => Ok(()),
        Settlement::Failed(err) => Err(anyhow!(err).context(format!("failed to {operation}"))),
        Settlement::Superseded => bail!("{operation} was superseded by a newer request"),
    }
}

fn expect_found(settlement: Settlement, operation: &str, id: PostId) -> Result<()> {
    if settlement == Settlement::NoOp {
        bail!("cannot {operation}: post {id} not found");
    }
    expect_applied(settlement, operation)
}
