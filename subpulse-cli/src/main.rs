//! subpulse-cli: terminal client for the Subpulse HTTP API
//!
//! # Subcommands
//! - `health`: server and database health
//! - `status`: scraper state and schedule
//! - `trigger`: start a background scrape
//! - `summary`: analytics totals
//! - `categories`: category tree with post counts
//! - `posts [--category] [--search] [-n] [--page]`: browse classified posts
//! - `request-category <name> [--description]`: suggest a new category

use clap::{Parser, Subcommand};
use serde::Deserialize;

const DEFAULT_SERVER: &str = "http://127.0.0.1:3001";
const DEFAULT_LIMIT: u32 = 20;
const TITLE_WIDTH: usize = 80;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "subpulse-cli", version, about = "Browse classified subreddit posts from a Subpulse server")]
struct Cli {
    /// Subpulse HTTP server URL (overrides SUBPULSE_HTTP_URL env var)
    #[arg(long, env = "SUBPULSE_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show server and database health
    Health,

    /// Show scraper state and schedule
    Status,

    /// Start a scrape in the background
    Trigger,

    /// Show analytics totals
    Summary,

    /// Show the category tree with post counts
    Categories,

    /// List posts, newest first
    Posts {
        /// Category or parent category name
        #[arg(long)]
        category: Option<String>,

        /// Case-insensitive text search over title and body
        #[arg(long)]
        search: Option<String>,

        /// Sort column: created_at, score, num_comments or title
        #[arg(long, default_value = "created_at")]
        sort_by: String,

        #[arg(long, default_value_t = 1)]
        page: u32,

        #[arg(short = 'n', long, default_value_t = DEFAULT_LIMIT)]
        limit: u32,

        /// Print the raw JSON response
        #[arg(long)]
        json: bool,
    },

    /// Suggest a new category
    RequestCategory {
        name: String,

        #[arg(long)]
        description: Option<String>,
    },
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CategoryRef {
    pub name: String,
    pub parent_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PostCategory {
    pub confidence: f64,
    pub categories: CategoryRef,
}

#[derive(Debug, Deserialize)]
pub struct PostRow {
    pub title: String,
    pub author: String,
    pub score: i64,
    pub num_comments: i64,
    pub permalink: String,
    pub created_at: String,
    pub ai_summary: Option<String>,
    #[serde(default)]
    pub post_categories: Vec<PostCategory>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub total: i64,
    pub total_pages: i64,
}

#[derive(Debug, Deserialize)]
pub struct PostsResponse {
    pub data: Vec<PostRow>,
    pub pagination: Pagination,
}

#[derive(Debug, Deserialize)]
pub struct CategoryNode {
    pub name: String,
    pub post_count: i64,
    pub subcategories: Option<Vec<CategoryNode>>,
}

#[derive(Debug, Deserialize)]
pub struct CategoriesResponse {
    pub data: Vec<CategoryNode>,
}

// ============================================================================
// Rendering
// ============================================================================

/// "Parent > Child (85%)" for each assignment, comma separated.
pub fn format_categories(categories: &[PostCategory]) -> String {
    categories
        .iter()
        .map(|c| {
            let name = match &c.categories.parent_name {
                Some(parent) => format!("{} > {}", parent, c.categories.name),
                None => c.categories.name.clone(),
            };
            format!("{} ({:.0}%)", name, c.confidence * 100.0)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn format_post(post: &PostRow) -> Vec<String> {
    let title: String = post.title.chars().take(TITLE_WIDTH).collect();
    let date = post.created_at.get(..10).unwrap_or(&post.created_at);

    let mut lines = vec![
        title,
        format!(
            "  {} · u/{} · ▲{} · 💬{}",
            date, post.author, post.score, post.num_comments
        ),
    ];
    if !post.post_categories.is_empty() {
        lines.push(format!("  {}", format_categories(&post.post_categories)));
    }
    if let Some(summary) = post.ai_summary.as_deref().filter(|s| !s.is_empty()) {
        lines.push(format!("  {}", summary));
    }
    lines.push(format!("  {}", post.permalink));
    lines
}

/// Parents followed by their indented subcategories.
pub fn format_tree(nodes: &[CategoryNode]) -> Vec<String> {
    let mut lines = Vec::new();
    for node in nodes {
        lines.push(format!("{:<40} {:>6}", node.name, node.post_count));
        for child in node.subcategories.iter().flatten() {
            lines.push(format!("  {:<38} {:>6}", child.name, child.post_count));
        }
    }
    lines
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

fn client() -> anyhow::Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()?)
}

/// Send a request and decode the JSON body, exiting on transport or HTTP errors.
fn fetch(request: reqwest::blocking::RequestBuilder, url: &str) -> anyhow::Result<serde_json::Value> {
    let resp = match request.send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("subpulse-cli: cannot reach {}: {}", url, e);
            std::process::exit(1);
        }
    };

    let status = resp.status();
    let body: serde_json::Value = resp.json().unwrap_or_default();
    if !status.is_success() {
        let message = body["error"].as_str().unwrap_or("unknown error");
        eprintln!("subpulse-cli: server returned {}: {}", status, message);
        std::process::exit(1);
    }
    Ok(body)
}

fn do_health(server: &str) -> anyhow::Result<()> {
    let url = format!("{}/health", server);
    let health = fetch(client()?.get(&url), &url)?;
    println!("Server:        {}", health["status"].as_str().unwrap_or("unknown"));
    println!("Database:      {}", health["database"].as_str().unwrap_or("?"));
    println!("Backend:       {}", health["backend"].as_str().unwrap_or("?"));
    println!("Version:       {}", health["version"].as_str().unwrap_or("?"));
    Ok(())
}

fn do_status(server: &str) -> anyhow::Result<()> {
    let url = format!("{}/scraper/status", server);
    let status = fetch(client()?.get(&url), &url)?;
    println!("Scraper:       {}", status["status"].as_str().unwrap_or("?"));
    println!("Total posts:   {}", status["totalPosts"]);
    println!("Last scraped:  {}", status["lastScraped"].as_str().unwrap_or("never"));
    println!("Schedule:      {}", status["schedule"].as_str().unwrap_or("?"));
    if let Some(next) = status["nextScheduled"].as_str() {
        println!("Next run:      {}", next);
    }
    if let Some(error) = status["lastRun"]["error"].as_str() {
        println!("Last error:    {}", error);
    }
    Ok(())
}

fn do_trigger(server: &str) -> anyhow::Result<()> {
    let url = format!("{}/scraper/trigger", server);
    let body = fetch(client()?.post(&url), &url)?;
    println!("{}", body["message"].as_str().unwrap_or("Scrape requested"));
    Ok(())
}

fn do_summary(server: &str) -> anyhow::Result<()> {
    let url = format!("{}/analytics/summary", server);
    let body = fetch(client()?.get(&url), &url)?;
    println!("Total posts:      {}", body["totalPosts"]);
    println!("Categories:       {}", body["totalCategories"]);
    println!("Last 7 days:      {}", body["recentPosts"]);
    println!("Average score:    {}", body["avgScore"]);
    Ok(())
}

fn do_categories(server: &str) -> anyhow::Result<()> {
    let url = format!("{}/categories", server);
    let body = fetch(client()?.get(&url), &url)?;
    let resp: CategoriesResponse = serde_json::from_value(body)?;
    for line in format_tree(&resp.data) {
        println!("{}", line);
    }
    Ok(())
}

fn do_posts(
    server: &str,
    category: Option<&str>,
    search: Option<&str>,
    sort_by: &str,
    page: u32,
    limit: u32,
    json_output: bool,
) -> anyhow::Result<()> {
    let url = format!("{}/posts", server);
    let mut params = vec![
        ("page", page.to_string()),
        ("limit", limit.to_string()),
        ("sortBy", sort_by.to_string()),
    ];
    if let Some(c) = category {
        params.push(("category", c.to_string()));
    }
    if let Some(s) = search {
        params.push(("search", s.to_string()));
    }

    let body = fetch(client()?.get(&url).query(&params), &url)?;
    if json_output {
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    let resp: PostsResponse = serde_json::from_value(body)?;
    if resp.data.is_empty() {
        eprintln!("No posts found");
        return Ok(());
    }
    for post in &resp.data {
        for line in format_post(post) {
            println!("{}", line);
        }
        println!();
    }
    println!(
        "Page {} of {} ({} posts)",
        resp.pagination.page,
        resp.pagination.total_pages.max(1),
        resp.pagination.total
    );
    Ok(())
}

fn do_request(server: &str, name: &str, description: Option<&str>) -> anyhow::Result<()> {
    let url = format!("{}/category-requests", server);
    let payload = serde_json::json!({ "name": name, "description": description });
    let body = fetch(client()?.post(&url).json(&payload), &url)?;
    println!(
        "Submitted \"{}\" ({})",
        body["data"]["name"].as_str().unwrap_or(name),
        body["data"]["status"].as_str().unwrap_or("pending")
    );
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();

    let result = match cli.command {
        Commands::Health => do_health(&server),
        Commands::Status => do_status(&server),
        Commands::Trigger => do_trigger(&server),
        Commands::Summary => do_summary(&server),
        Commands::Categories => do_categories(&server),
        Commands::Posts {
            category,
            search,
            sort_by,
            page,
            limit,
            json,
        } => do_posts(
            &server,
            category.as_deref(),
            search.as_deref(),
            &sort_by,
            page,
            limit,
            json,
        ),
        Commands::RequestCategory { name, description } => do_request(&server, &name, description.as_deref()),
    };

    if let Err(e) = result {
        eprintln!("subpulse-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================
