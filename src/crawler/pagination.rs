//! Pagination advance logic for the three modes in `PaginationConfig` (§4.8).

use scraper::{Html, Selector};

use crate::config::types::{PaginationConfig, PaginationMode};

/// What the site crawler should do after extracting the current page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageAdvance {
    Next(String),
    Done,
}

/// Builds the URL for `numbered_pages` mode by appending `param_name=page`.
pub fn numbered_page_url(category_url: &str, param_name: &str, page: u32) -> String {
    let separator = if category_url.contains('?') { '&' } else { '?' };
    format!("{category_url}{separator}{param_name}={page}")
}

/// `true` once `page` has gone past whichever configured ceiling applies.
pub fn numbered_pages_exhausted(pagination: &PaginationConfig, page: u32) -> bool {
    if let Some(end) = pagination.end_page
        && page > end
    {
        return true;
    }
    if let Some(max) = pagination.max_pages
        && page > max
    {
        return true;
    }
    false
}

/// Resolves the `next_button_selector` href from the current page's HTML,
/// returning `None` once the button is absent (§4.8: "stop when absent").
pub fn next_button_href(html: &str, selector: &str, base_url: &str) -> Option<String> {
    let parsed = Selector::parse(selector).ok()?;
    let document = Html::parse_document(html);
    let href = document.select(&parsed).next()?.value().attr("href")?;
    crate::normalize::canonicalize(href, base_url, &[]).ok()
}

pub fn start_page(pagination: &PaginationConfig, resume_last_page: Option<u32>) -> u32 {
    let configured_start = pagination.start_page.unwrap_or(1);
    match resume_last_page {
        Some(last) => configured_start.max(last),
        None => configured_start,
    }
}

pub fn is_infinite_scroll(pagination: &PaginationConfig) -> bool {
    pagination.mode == PaginationMode::InfiniteScroll
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbered_page_url_appends_query_param() {
        assert_eq!(numbered_page_url("https://x/cat", "page", 3), "https://x/cat?page=3");
        assert_eq!(numbered_page_url("https://x/cat?sort=asc", "page", 3), "https://x/cat?sort=asc&page=3");
    }

    #[test]
    fn start_page_resumes_from_last_page_when_present() {
        let pagination = PaginationConfig {
            mode: PaginationMode::NumberedPages,
            param_name: Some("page".to_string()),
            max_pages: None,
            start_page: Some(1),
            end_page: None,
            scroll_min_depth: None,
            scroll_max_depth: None,
        };
        assert_eq!(start_page(&pagination, Some(3)), 3);
        assert_eq!(start_page(&pagination, None), 1);
    }

    #[test]
    fn next_button_href_returns_none_when_absent() {
        let html = "<html><body><div class=\"pagination\"></div></body></html>";
        assert_eq!(next_button_href(html, "a.next", "https://x/"), None);
    }

    #[test]
    fn next_button_href_resolves_relative_link() {
        let html = r#"<html><body><a class="next" href="/cat?page=2">Next</a></body></html>"#;
        assert_eq!(
            next_button_href(html, "a.next", "https://x.ru/"),
            Some("https://x.ru/cat?page=2".to_string())
        );
    }
}
