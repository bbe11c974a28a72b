//! Turning ranked results into pages for display.
//!
//! The first page holds the top results; each later page holds `per_page`
//! of the remaining ones.

use serde::Serialize;

use crate::dataset::DocumentRecord;
use crate::semantic::ScoredResult;

const LINK_DISPLAY_MAX: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLayout {
    pub top_results: usize,
    pub per_page: usize,
}

impl Default for PageLayout {
    fn default() -> Self {
        Self {
            top_results: 10,
            per_page: 10,
        }
    }
}

impl PageLayout {
    /// Number of pages for `total` results. Always at least one.
    pub fn total_pages(&self, total: usize) -> usize {
        if total <= self.top_results {
            return 1;
        }
        1 + (total - self.top_results).div_ceil(self.per_page)
    }

    /// Range of result positions shown on a 1-based `page`.
    /// Pages past the end, including ones too large to address, are empty.
    pub fn bounds(&self, page: usize, total: usize) -> std::ops::Range<usize> {
        let (start, len) = match page {
            0 => (0, 0),
            1 => (0, self.top_results),
            n => {
                let start = (n - 2)
                    .checked_mul(self.per_page)
                    .and_then(|skipped| skipped.checked_add(self.top_results));
                match start {
                    Some(start) => (start, self.per_page),
                    None => (total, 0),
                }
            }
        };
        let start = start.min(total);
        start..start.saturating_add(len).min(total)
    }
}

/// One result prepared for display.
#[derive(Debug, Clone, Serialize)]
pub struct ResultView {
    /// 1-based position in the full ranking
    pub rank: usize,
    pub index: usize,
    pub similarity: f32,
    pub title: String,
    pub author: String,
    pub link: String,
    pub short_link: String,
    /// Remaining non-empty fields as (name, value)
    pub details: Vec<(String, String)>,
}

impl ResultView {
    pub fn new(rank: usize, result: &ScoredResult, document: &DocumentRecord) -> Self {
        let link = document
            .link
            .clone()
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| "#".to_string());

        Self {
            rank,
            index: result.index,
            similarity: result.similarity,
            title: non_empty(&document.title).unwrap_or("No Title Available").to_string(),
            author: non_empty(&document.creator).unwrap_or("Unknown Author").to_string(),
            short_link: shorten_link(&link),
            link,
            details: details(document),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultPage {
    pub query: String,
    pub page: usize,
    pub total_pages: usize,
    pub total: usize,
    pub results: Vec<ResultView>,
}

/// Slice `results` to `page` and attach document metadata.
pub fn paginate(
    query: &str,
    results: &[ScoredResult],
    documents: &[DocumentRecord],
    layout: PageLayout,
    page: usize,
) -> ResultPage {
    let bounds = layout.bounds(page, results.len());
    let offset = bounds.start;

    let views = results[bounds]
        .iter()
        .enumerate()
        .filter_map(|(i, result)| {
            documents
                .get(result.index)
                .map(|doc| ResultView::new(offset + i + 1, result, doc))
        })
        .collect();

    ResultPage {
        query: query.to_string(),
        page,
        total_pages: layout.total_pages(results.len()),
        total: results.len(),
        results: views,
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

fn shorten_link(link: &str) -> String {
    if link.chars().count() <= LINK_DISPLAY_MAX {
        return link.to_string();
    }
    let head: String = link.chars().take(LINK_DISPLAY_MAX - 3).collect();
    format!("{head}...")
}

fn details(document: &DocumentRecord) -> Vec<(String, String)> {
    let mut details = vec![];

    if let Some(keywords) = document.keywords.as_ref().filter(|k| !k.is_empty()) {
        details.push(("Keywords".to_string(), keywords.join(", ")));
    }
    if let Some(content) = non_empty(&document.content) {
        details.push(("Content".to_string(), content.to_string()));
    }
    if let Some(description) = non_empty(&document.description) {
        details.push(("Description".to_string(), description.to_string()));
    }

    for (key, value) in &document.extra {
        let value = match value {
            serde_json::Value::Null => continue,
            serde_json::Value::String(s) if s.is_empty() => continue,
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        details.push((capitalize(key), value));
    }

    details
}

fn capitalize(key: &str) -> String {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
