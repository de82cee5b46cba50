//! Downloads and atomically saves the chosen product image (C7, §4.7).

use std::path::{Path, PathBuf};

use deunicode::deunicode;

use crate::engine::http::HttpEngine;
use crate::error::CrawlError;

/// Saves `image_url` under `dir`, naming the file from a transliterated,
/// ASCII-safe, lowercase, hyphenated product name, with a short-hash suffix
/// added only when that name would otherwise collide with an existing file.
pub async fn save_image(
    http_engine: &HttpEngine,
    image_url: &str,
    product_name: &str,
    dir: &Path,
) -> Result<PathBuf, CrawlError> {
    let (bytes, content_type) = http_engine
        .fetch_bytes(image_url)
        .await
        .map_err(|e| CrawlError::ImageSaveError { url: image_url.to_string(), source: e.into() })?;

    let extension = extension_for_content_type(content_type.as_deref());
    let slug = slugify(product_name);

    std::fs::create_dir_all(dir).map_err(|e| CrawlError::ImageSaveError {
        url: image_url.to_string(),
        source: e.into(),
    })?;

    let final_path = unique_path(dir, &slug, extension, image_url);

    let mut tmp_name = final_path
        .file_name()
        .unwrap_or_else(|| std::ffi::OsStr::new("product-image.bin"))
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = dir.join(tmp_name);
    std::fs::write(&tmp_path, &bytes).map_err(|e| CrawlError::ImageSaveError {
        url: image_url.to_string(),
        source: e.into(),
    })?;
    std::fs::rename(&tmp_path, &final_path).map_err(|e| CrawlError::ImageSaveError {
        url: image_url.to_string(),
        source: e.into(),
    })?;

    Ok(final_path)
}

fn extension_for_content_type(content_type: Option<&str>) -> &'static str {
    match content_type.map(|ct| ct.split(';').next().unwrap_or(ct).trim()) {
        Some("image/jpeg") => ".jpg",
        Some("image/png") => ".png",
        Some("image/webp") => ".webp",
        Some("image/avif") => ".avif",
        _ => ".bin",
    }
}

fn slugify(name: &str) -> String {
    let ascii = deunicode(name);
    let mut slug = String::with_capacity(ascii.len());
    let mut last_was_hyphen = true; // suppress leading hyphen
    for ch in ascii.to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch);
            last_was_hyphen = false;
        } else if !last_was_hyphen {
            slug.push('-');
            last_was_hyphen = true;
        }
    }
    let trimmed = slug.trim_end_matches('-').to_string();
    if trimmed.is_empty() {
        "product".to_string()
    } else {
        trimmed
    }
}

fn unique_path(dir: &Path, slug: &str, extension: &str, disambiguator: &str) -> PathBuf {
    let candidate = dir.join(format!("{slug}{extension}"));
    if !candidate.exists() {
        return candidate;
    }
    let short_hash = &crate::normalize::fingerprint(disambiguator)[..8];
    dir.join(format!("{slug}-{short_hash}{extension}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_matches_known_content_types() {
        assert_eq!(extension_for_content_type(Some("image/jpeg")), ".jpg");
        assert_eq!(extension_for_content_type(Some("image/png")), ".png");
        assert_eq!(extension_for_content_type(Some("image/webp")), ".webp");
        assert_eq!(extension_for_content_type(Some("image/avif")), ".avif");
        assert_eq!(extension_for_content_type(Some("text/html")), ".bin");
        assert_eq!(extension_for_content_type(None), ".bin");
    }

    #[test]
    fn slugify_transliterates_and_hyphenates() {
        assert_eq!(slugify("Кроссовки Nike Air"), "krossovki-nike-air");
        assert_eq!(slugify("  Multi   Space!! "), "multi-space");
    }

    #[test]
    fn unique_path_adds_hash_suffix_on_collision() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("widget.jpg");
        std::fs::write(&existing, b"x").unwrap();

        let path = unique_path(dir.path(), "widget", ".jpg", "https://x/a");
        assert_ne!(path, existing);
        assert!(path.file_name().unwrap().to_str().unwrap().starts_with("widget-"));
    }
}
