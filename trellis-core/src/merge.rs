//! Content-preserving document merge
//!
//! Regenerates the marker-delimited auto-generated region of a category
//! document while leaving everything outside the markers byte-identical.
//! Pure functions only; callers do the reading and writing.

use crate::category::Category;
use crate::store::RepoRecord;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::OffsetDateTime;

pub const BEGIN_MARKER: &str = "<!-- AUTO-GENERATED-CONTENT:START -->";
pub const END_MARKER: &str = "<!-- AUTO-GENERATED-CONTENT:END -->";

const EMPTY_REGION: &str = "<!-- no indexed projects yet -->";

/// Replace the auto-generated region of a document with `region`.
///
/// Only the bytes strictly between the first begin marker and the first end
/// marker after it are replaced; the markers themselves and all surrounding
/// content are preserved verbatim. When either marker is absent the wrapped
/// region is appended instead, so a future merge will find the markers.
pub fn merge(existing: &str, region: &str) -> String {
    match locate_region(existing) {
        Some((before, after)) => {
            format!("{before}{BEGIN_MARKER}\n{region}\n{END_MARKER}{after}")
        }
        None => format!("{existing}\n\n{BEGIN_MARKER}\n{region}\n{END_MARKER}"),
    }
}

/// Split a document around its marker span: (text before the begin marker,
/// text after the end marker). None when either marker is missing.
///
/// Literal first-match only; marker-like substrings elsewhere in the
/// document are plain content.
fn locate_region(doc: &str) -> Option<(&str, &str)> {
    let begin = doc.find(BEGIN_MARKER)?;
    let search_from = begin + BEGIN_MARKER.len();
    let end = doc[search_from..].find(END_MARKER)? + search_from;
    Some((&doc[..begin], &doc[end + END_MARKER.len()..]))
}

/// Render the region content for one category's indexed repositories.
pub fn render_region(repos: &[RepoRecord]) -> String {
    if repos.is_empty() {
        return EMPTY_REGION.to_string();
    }

    let mut lines = Vec::new();
    for repo in repos {
        if repo.description.is_empty() {
            lines.push(format!("- **[{}]({})**", repo.name, repo.url));
        } else {
            lines.push(format!(
                "- **[{}]({})** - {}",
                repo.name, repo.url, repo.description
            ));
        }
        if !repo.created_at.is_empty() {
            lines.push(format!("  - Created: {}", format_created(&repo.created_at)));
        }
    }
    lines.join("\n")
}

/// Date-only rendering of an ISO-8601 timestamp. Unparseable input is
/// returned unmodified rather than failing the merge.
fn format_created(raw: &str) -> String {
    let date_only = format_description!("[year]-[month]-[day]");
    OffsetDateTime::parse(raw, &Rfc3339)
        .ok()
        .and_then(|dt| dt.format(&date_only).ok())
        .unwrap_or_else(|| raw.to_string())
}

/// Initial document for a freshly created category directory, already
/// carrying the markers the merger owns.
pub fn seed_document(category: Category) -> String {
    format!(
        "# {} Projects\n\n{}\n\n## Project List\n\n{}\n{}\n{}\n",
        category.as_str(),
        category.description(),
        BEGIN_MARKER,
        EMPTY_REGION,
        END_MARKER,
    )
}
