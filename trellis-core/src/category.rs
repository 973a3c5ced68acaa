//! Fixed category buckets and the classification heuristic

use serde::{Deserialize, Serialize};
use std::fmt;

/// A repository category. Every repository files under exactly one bucket;
/// `Default` is the catch-all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Trading,
    Script,
    Crawler,
    Default,
}

/// Keyword buckets checked in priority order by [`Category::classify`].
/// First match wins, so ties within a bucket are impossible.
const TRADING_KEYWORDS: &[&str] = &["trade", "trading", "crypto", "finance", "market", "stock"];
const SCRIPT_KEYWORDS: &[&str] = &["script", "automation", "tool", "utility", "auto"];
const CRAWLER_KEYWORDS: &[&str] = &["crawler", "scrape", "spider", "crawl", "scraping"];

impl Category {
    /// All categories, in the order their documents are regenerated.
    pub const ALL: [Category; 4] = [
        Category::Default,
        Category::Crawler,
        Category::Script,
        Category::Trading,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Trading => "Trading",
            Category::Script => "Script",
            Category::Crawler => "Crawler",
            Category::Default => "Default",
        }
    }

    /// Human description used when seeding a category document.
    pub fn description(&self) -> &'static str {
        match self {
            Category::Trading => "Trading and financial projects",
            Category::Script => "Automation scripts and tools",
            Category::Crawler => "Web scraping and crawling projects",
            Category::Default => "Default projects",
        }
    }

    /// Parse a category name (case-insensitive). Returns None for unknown names.
    pub fn parse(s: &str) -> Option<Category> {
        match s.trim().to_lowercase().as_str() {
            "trading" => Some(Category::Trading),
            "script" => Some(Category::Script),
            "crawler" => Some(Category::Crawler),
            "default" => Some(Category::Default),
            _ => None,
        }
    }

    /// Whether a repository name is one of the per-category index repositories
    /// themselves. Those never become candidates for indexing.
    pub fn is_reserved_name(name: &str) -> bool {
        Category::ALL.iter().any(|c| c.as_str() == name)
    }

    /// Assign a category from a repository name and description.
    ///
    /// Deterministic case-insensitive substring match, first matching bucket
    /// wins: Trading, then Script, then Crawler, else Default.
    pub fn classify(name: &str, description: &str) -> Category {
        let name = name.to_lowercase();
        let description = description.to_lowercase();
        let matches =
            |keywords: &[&str]| keywords.iter().any(|k| name.contains(k) || description.contains(k));

        if matches(TRADING_KEYWORDS) {
            Category::Trading
        } else if matches(SCRIPT_KEYWORDS) {
            Category::Script
        } else if matches(CRAWLER_KEYWORDS) {
            Category::Crawler
        } else {
            Category::Default
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
