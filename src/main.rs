use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use newsreel::api::{NewsApiClient, Selector};
use newsreel::config::Config;
use newsreel::controller::{LoadState, RefreshController};
use newsreel::render::{render_card, render_snapshot, CardStyle};
use newsreel::repository::NewsRepository;
use newsreel::storage::{ArticleFilter, Category, Database, DatabaseError, SortKey};

/// Get the config directory path (~/.config/newsreel/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    let config_dir = PathBuf::from(home).join(".config").join("newsreel");
    Ok(config_dir)
}

/// Create the config directory if needed and restrict it to the current user.
fn prepare_config_dir(config_dir: &Path) -> Result<()> {
    if !config_dir.exists() {
        std::fs::create_dir_all(config_dir).context("Failed to create config directory")?;
        eprintln!("Created config directory: {}", config_dir.display());
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match std::fs::metadata(config_dir) {
            Ok(metadata) => {
                let mut perms = metadata.permissions();
                perms.set_mode(0o700);
                if let Err(e) = std::fs::set_permissions(config_dir, perms) {
                    tracing::warn!(
                        path = %config_dir.display(),
                        error = %e,
                        "Failed to set config directory permissions to 0700"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    path = %config_dir.display(),
                    error = %e,
                    "Failed to read config directory metadata"
                );
            }
        }
    }
    Ok(())
}

#[derive(Parser, Debug)]
#[command(
    name = "newsreel",
    about = "Search news by keyword or browse headlines by category, cached locally"
)]
struct Args {
    /// Reset the article cache (delete and recreate)
    #[arg(long)]
    reset_db: bool,

    /// Config file to use instead of ~/.config/newsreel/config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Search articles by keyword (replaces earlier search results)
    Search {
        keyword: String,
        /// Number of pages to fetch
        #[arg(long, default_value_t = 1)]
        pages: u32,
    },
    /// Show top headlines for a category (last used, or the default, if omitted)
    Category {
        name: Option<Category>,
        /// Number of pages to fetch
        #[arg(long, default_value_t = 1)]
        pages: u32,
    },
    /// Re-fetch the first page, retrying interrupted attempts
    Refresh {
        #[arg(long, conflicts_with = "search")]
        category: Option<Category>,
        #[arg(long, value_name = "KEYWORD")]
        search: Option<String>,
    },
    /// Print cached articles without touching the network
    Cached {
        #[arg(long, conflicts_with = "search")]
        category: Option<Category>,
        /// Only articles from keyword searches
        #[arg(long)]
        search: bool,
        /// Order by publish time, newest first
        #[arg(long)]
        newest: bool,
    },
    /// List the available categories
    Categories,
}

fn terminal_width() -> usize {
    std::env::var("COLUMNS")
        .ok()
        .and_then(|c| c.parse().ok())
        .filter(|w| *w >= 20)
        .unwrap_or(80)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so they never mix with printed articles
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let command = args.command.unwrap_or(Command::Category {
        name: None,
        pages: 1,
    });

    if let Command::Categories = command {
        for category in Category::ALL {
            println!("{:<15}{}", category.as_str(), category.display_name());
        }
        return Ok(());
    }

    let config_dir = get_config_dir()?;
    prepare_config_dir(&config_dir)?;

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?
        .with_env();

    let db_path = config_dir.join("cache.db");
    if args.reset_db && db_path.exists() {
        std::fs::remove_file(&db_path).context("Failed to delete article cache")?;
        println!("Article cache reset.");
    }

    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!(
                "Error: Another instance of newsreel appears to be running. Please close it and try again."
            );
            std::process::exit(1);
        }
        Err(e) => {
            return Err(anyhow::anyhow!("Failed to open article cache: {}", e));
        }
    };

    let style = CardStyle {
        width: terminal_width(),
        description_budget: config.description_budget,
        content_budget: config.content_budget,
    };

    if let Command::Cached {
        category,
        search,
        newest,
    } = command
    {
        return print_cached(&db, category, search, newest, &style).await;
    }

    let client = NewsApiClient::new(config.client_options()).context("Failed to create news client")?;
    let settings = config.controller_settings();

    let controller = match command {
        Command::Search { keyword, pages } => {
            let selector = search_selector(&keyword)?;
            let repo = NewsRepository::new(client, db, settings.page_size);
            let controller = RefreshController::new(repo, settings, config.default_search());
            controller.select_selector(selector).await;
            load_pages(&controller, pages).await;
            controller
        }
        Command::Category { name, pages } => {
            let repo = NewsRepository::new(client, db, settings.page_size);
            let controller = RefreshController::new(repo, settings, config.default_headlines());
            match name {
                Some(category) => controller.select_category(category).await,
                None => controller.restore(config.default_headlines()).await,
            }
            load_pages(&controller, pages).await;
            controller
        }
        Command::Refresh { category, search } => {
            let selector = match (category, search) {
                (Some(category), _) => Selector::Category(category),
                (None, Some(keyword)) => search_selector(&keyword)?,
                (None, None) => last_category(&db)
                    .await
                    .map(Selector::Category)
                    .unwrap_or_else(|| config.default_headlines()),
            };
            let repo = NewsRepository::new(client, db, settings.page_size);
            let controller = RefreshController::new(repo, settings, selector);
            controller
                .refresh()
                .await
                .context("Refresh task failed")?;
            controller
        }
        Command::Cached { .. } | Command::Categories => unreachable!("handled above"),
    };

    let snapshot = controller.snapshot();
    print!("{}", render_snapshot(&snapshot, &style, chrono::Utc::now()));

    if let LoadState::Error(message) = &snapshot.state {
        eprintln!("Error: {}", newsreel::util::strip_control_chars(message));
        std::process::exit(1);
    }
    Ok(())
}

/// A search selector for `keyword`. Blank keywords are refused: searching
/// for nothing would still clear every cached search result.
fn search_selector(keyword: &str) -> Result<Selector> {
    let keyword = keyword.trim();
    if keyword.is_empty() {
        anyhow::bail!("Search keyword must not be blank");
    }
    Ok(Selector::Search(keyword.to_string()))
}

/// Fetch up to `pages` pages in total, stopping early at the end of results.
async fn load_pages<S: newsreel::api::NewsSource + 'static>(
    controller: &RefreshController<S>,
    pages: u32,
) {
    for _ in 1..pages {
        if !controller.has_more_pages() {
            break;
        }
        controller.load_more().await;
        if controller.snapshot().error.is_some() {
            break;
        }
    }
}

async fn last_category(db: &Database) -> Option<Category> {
    match db.newest_article(&ArticleFilter::AnyCategory).await {
        Ok(article) => article.and_then(|a| a.category()),
        Err(e) => {
            tracing::warn!(error = %e, "Could not read last category");
            None
        }
    }
}

async fn print_cached(
    db: &Database,
    category: Option<Category>,
    search: bool,
    newest: bool,
    style: &CardStyle,
) -> Result<()> {
    let filter = match (category, search) {
        (Some(category), _) => ArticleFilter::Category(category),
        (None, true) => ArticleFilter::AnySearch,
        (None, false) => ArticleFilter::All,
    };
    let articles = if newest {
        db.query_articles_sorted(&filter, SortKey::PublishedAt, false)
            .await
    } else {
        db.query_articles(&filter).await
    }
    .context("Failed to read article cache")?;

    if articles.is_empty() {
        println!("No cached articles");
        return Ok(());
    }

    let now = chrono::Utc::now();
    for (i, article) in articles.iter().enumerate() {
        print!("{}", render_card(i, article, style, now));
        println!();
    }
    Ok(())
}
