//! URL canonicalization and fingerprinting (C1, §4.1).
//!
//! Pure functions, no I/O: lowercase scheme/host, strip default ports, drop the
//! fragment, sort query parameters, drop blacklisted params (literal or `*`
//! suffix globs), collapse duplicate path slashes, and resolve relative links
//! against the category's `base_url`. The fingerprint is an MD5 digest of the
//! canonical URL.

use md5::{Digest, Md5};
use url::Url;

/// Canonicalizes `raw` (resolved against `base_url` if relative), dropping any
/// query parameter whose name matches a pattern in `param_blacklist`.
pub fn canonicalize(raw: &str, base_url: &str, param_blacklist: &[String]) -> Result<String, url::ParseError> {
    let mut url = match Url::parse(raw) {
        Ok(u) => u,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let base = Url::parse(base_url)?;
            base.join(raw)?
        }
        Err(e) => return Err(e),
    };

    let scheme = url.scheme().to_lowercase();
    let _ = url.set_scheme(&scheme);

    if let Some(host) = url.host_str() {
        let lowered = host.to_lowercase();
        let _ = url.set_host(Some(&lowered));
    }

    strip_default_port(&mut url);
    url.set_fragment(None);

    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .filter(|(k, _)| !is_blacklisted(k, param_blacklist))
        .collect();
    params.sort();

    if params.is_empty() {
        url.set_query(None);
    } else {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (k, v) in &params {
            serializer.append_pair(k, v);
        }
        url.set_query(Some(&serializer.finish()));
    }

    let collapsed_path = collapse_slashes(url.path());
    url.set_path(&collapsed_path);

    Ok(url.to_string())
}

fn strip_default_port(url: &mut Url) {
    let is_default = matches!(
        (url.scheme(), url.port()),
        ("http", Some(80)) | ("https", Some(443))
    );
    if is_default {
        let _ = url.set_port(None);
    }
}

fn is_blacklisted(param: &str, blacklist: &[String]) -> bool {
    blacklist.iter().any(|pattern| {
        if let Some(prefix) = pattern.strip_suffix('*') {
            param.starts_with(prefix)
        } else {
            param == pattern
        }
    })
}

fn collapse_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut prev_slash = false;
    for c in path.chars() {
        if c == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        out.push(c);
    }
    out
}

/// MD5 of the canonicalized URL, lowercase hex (§3 invariant: a pure function of
/// the canonical URL, so equal canonical URLs produce equal hashes).
pub fn fingerprint(canonical_url: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(canonical_url.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_blacklisted_params_and_sorts_remaining() {
        let blacklist = vec!["utm_*".to_string()];
        let a = canonicalize("https://x.ru/a?utm_source=fb", "https://x.ru/", &blacklist).unwrap();
        let b = canonicalize("https://x.ru/a", "https://x.ru/", &blacklist).unwrap();
        assert_eq!(a, b);
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn equal_canonical_urls_produce_equal_hashes() {
        let blacklist = vec![];
        let a = canonicalize("HTTPS://X.RU:443/a/", "https://x.ru/", &blacklist).unwrap();
        let b = canonicalize("https://x.ru/a/", "https://x.ru/", &blacklist).unwrap();
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn normalize_is_idempotent() {
        let blacklist = vec!["utm_*".to_string()];
        let once = canonicalize("https://X.ru//a//b?z=1&utm_source=fb&a=2", "https://x.ru/", &blacklist).unwrap();
        let twice = canonicalize(&once, "https://x.ru/", &blacklist).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn resolves_relative_links_against_base() {
        let blacklist = vec![];
        let resolved = canonicalize("/products/123", "https://x.ru/catalog/", &blacklist).unwrap();
        assert_eq!(resolved, "https://x.ru/products/123");
    }

    #[test]
    fn collapses_duplicate_slashes_in_path() {
        let blacklist = vec![];
        let resolved = canonicalize("https://x.ru/a//b///c", "https://x.ru/", &blacklist).unwrap();
        assert_eq!(resolved, "https://x.ru/a/b/c");
    }

    #[test]
    fn strips_default_port_and_fragment() {
        let blacklist = vec![];
        let resolved = canonicalize("https://x.ru:443/a#section", "https://x.ru/", &blacklist).unwrap();
        assert_eq!(resolved, "https://x.ru/a");
    }
}
