//! Product content + main-image extraction (C6, §4.6).

use std::sync::Arc;

use scraper::{Html, Selector};

use crate::config::types::NormalizedSelectors;
use crate::engine::{BehaviorContext, EngineRequest, FetchEngine};
use crate::error::CrawlError;

/// Cleaned product content plus the chosen main-image URL.
#[derive(Debug, Clone)]
pub struct ProductContent {
    pub text: String,
    pub image_url: Option<String>,
    pub name_en: Option<String>,
    pub name_ru: Option<String>,
    pub price_without_discount: Option<String>,
    pub price_with_discount: Option<String>,
}

/// Fetches a product page through the given engine and extracts content.
pub async fn fetch_product_content(
    engine: &Arc<dyn FetchEngine>,
    url: &str,
    selectors: &NormalizedSelectors,
    behavior_context: Option<BehaviorContext>,
) -> Result<ProductContent, CrawlError> {
    let mut request = EngineRequest::new(url);
    request.behavior_context = behavior_context;
    let result = engine.fetch(request).await?;
    extract(&result.html, selectors, url)
}

fn extract(html: &str, selectors: &NormalizedSelectors, url: &str) -> Result<ProductContent, CrawlError> {
    let document = Html::parse_document(html);

    let text = extract_cleaned_text(&document, &selectors.content_drop_after);
    if text.trim().is_empty() {
        return Err(CrawlError::ExtractionEmpty { url: url.to_string() });
    }

    Ok(ProductContent {
        text,
        image_url: extract_image_url(&document),
        name_en: first_non_empty(&document, &selectors.name_en),
        name_ru: first_non_empty(&document, &selectors.name_ru),
        price_without_discount: first_non_empty(&document, &selectors.price_without_discount),
        price_with_discount: first_non_empty(&document, &selectors.price_with_discount),
    })
}

/// Removes script/style/noscript and renders the remaining text with
/// whitespace normalized, truncating at the first `content_drop_after` match
/// (inclusive of that element and everything after it in document order).
fn extract_cleaned_text(document: &Html, drop_after: &[String]) -> String {
    let drop_selectors: Vec<Selector> = drop_after
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .collect();

    let mut earliest_drop_id: Option<ego_tree::NodeId> = None;
    for selector in &drop_selectors {
        if let Some(el) = document.select(selector).next() {
            let id = el.id();
            earliest_drop_id = Some(match earliest_drop_id {
                Some(current) if document_order_before(document, id, current) => id,
                Some(current) => current,
                None => id,
            });
        }
    }

    let noise = Selector::parse("script, style, noscript").expect("static selector is valid");
    let mut parts: Vec<String> = Vec::new();
    let mut dropping = false;

    for node in document.root_element().descendants() {
        if let Some(drop_id) = earliest_drop_id
            && node.id() == drop_id
        {
            dropping = true;
        }
        if dropping {
            continue;
        }
        if let Some(element) = scraper::ElementRef::wrap(node) {
            if noise.matches(&element) {
                continue;
            }
        }
        if let Some(text_node) = node.value().as_text() {
            let trimmed = text_node.trim();
            if !trimmed.is_empty() {
                parts.push(trimmed.to_string());
            }
        }
    }

    parts.join(" ")
}

fn document_order_before(document: &Html, a: ego_tree::NodeId, b: ego_tree::NodeId) -> bool {
    for node in document.root_element().descendants() {
        if node.id() == a {
            return true;
        }
        if node.id() == b {
            return false;
        }
    }
    false
}

/// `og:image` -> highest-width `srcset` candidate -> first `<img src>`.
fn extract_image_url(document: &Html) -> Option<String> {
    if let Ok(selector) = Selector::parse(r#"meta[property="og:image"]"#)
        && let Some(el) = document.select(&selector).next()
        && let Some(content) = el.value().attr("content")
    {
        return Some(content.to_string());
    }

    if let Ok(selector) = Selector::parse("img[srcset]")
        && let Some(el) = document.select(&selector).next()
        && let Some(srcset) = el.value().attr("srcset")
        && let Some(best) = best_srcset_candidate(srcset)
    {
        return Some(best);
    }

    if let Ok(selector) = Selector::parse("img[src]")
        && let Some(el) = document.select(&selector).next()
        && let Some(src) = el.value().attr("src")
    {
        return Some(src.to_string());
    }

    None
}

fn best_srcset_candidate(srcset: &str) -> Option<String> {
    srcset
        .split(',')
        .filter_map(|candidate| {
            let candidate = candidate.trim();
            let mut parts = candidate.split_whitespace();
            let url = parts.next()?;
            let width = parts
                .next()
                .and_then(|w| w.trim_end_matches('w').parse::<u32>().ok())
                .unwrap_or(0);
            Some((width, url.to_string()))
        })
        .max_by_key(|(width, _)| *width)
        .map(|(_, url)| url)
}

/// List-fallback selector evaluation: the first selector yielding non-empty
/// text wins (§4.6).
fn first_non_empty(document: &Html, selectors: &[String]) -> Option<String> {
    for raw in selectors {
        let Ok(selector) = Selector::parse(raw) else { continue };
        if let Some(el) = document.select(&selector).next() {
            let text: String = el.text().collect::<Vec<_>>().join(" ").trim().to_string();
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_content_at_drop_after_selector_inclusive() {
        let html = r#"<html><body><p>keep me</p><div class="related">drop me</div><p>also dropped</p></body></html>"#;
        let document = Html::parse_document(html);
        let text = extract_cleaned_text(&document, &vec![".related".to_string()]);
        assert!(text.contains("keep me"));
        assert!(!text.contains("drop me"));
        assert!(!text.contains("also dropped"));
    }

    #[test]
    fn image_selection_prefers_og_image() {
        let html = r#"<html><head><meta property="og:image" content="https://x/og.jpg"></head>
            <body><img srcset="a.jpg 200w, b.jpg 800w"><img src="c.jpg"></body></html>"#;
        let document = Html::parse_document(html);
        assert_eq!(extract_image_url(&document), Some("https://x/og.jpg".to_string()));
    }

    #[test]
    fn image_selection_falls_back_to_highest_width_srcset() {
        let html = r#"<html><body><img srcset="a.jpg 200w, b.jpg 800w"><img src="c.jpg"></body></html>"#;
        let document = Html::parse_document(html);
        assert_eq!(extract_image_url(&document), Some("b.jpg".to_string()));
    }

    #[test]
    fn image_selection_falls_back_to_first_img_src() {
        let html = r#"<html><body><img src="c.jpg"></body></html>"#;
        let document = Html::parse_document(html);
        assert_eq!(extract_image_url(&document), Some("c.jpg".to_string()));
    }

    #[test]
    fn name_selector_list_uses_first_non_empty() {
        let html = r#"<html><body><h1 class="a"></h1><h1 class="b">Widget</h1></body></html>"#;
        let document = Html::parse_document(html);
        let selectors = vec![".a".to_string(), ".b".to_string()];
        assert_eq!(first_non_empty(&document, &selectors), Some("Widget".to_string()));
    }
}
