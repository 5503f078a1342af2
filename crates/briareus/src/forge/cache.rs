//! The per-URL conditional-GET cache described in SPEC_FULL.md §4.1.
//!
//! This is deliberately *not* the generic `Cache-Control`-driven caching that
//! `http-cache-reqwest` gives you out of the box (GitHub and GitLab don't
//! send cache-control headers that line up with our 95 s grace period) — it
//! reimplements the two-phase algorithm from the original implementation's
//! `RemoteGit__Info._get_cached_url` directly: a short grace period during
//! which a cached entry is returned with no network traffic at all, then a
//! conditional revalidation that can still avoid paying for the response
//! body on a 304.

use std::time::{Duration, Instant};

use http_cache_reqwest::MokaCache;
use reqwest::header::{ETAG, HeaderMap, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED, LINK};
use reqwest::{Response, StatusCode};
use reqwest_middleware::ClientWithMiddleware;
use serde_json::Value;

use super::ForgeError;

/// SPEC_FULL.md §4.1: "now − fetched_at < LocalCachePeriod (95 s)".
pub(crate) const LOCAL_CACHE_PERIOD: Duration = Duration::from_secs(95);

#[derive(Clone, Debug)]
pub(crate) enum CachedBody {
    Json(Value),
    /// A 404 the caller explicitly tolerated (e.g. a `.gitmodules` probe).
    /// Distinct from "nothing cached yet".
    NotFound,
}

#[derive(Clone, Debug)]
struct CacheEntry {
    body: CachedBody,
    fetched_at: Instant,
    etag: Option<String>,
    last_modified: Option<String>,
}

/// A per-repo-actor cache of forge API responses, keyed by fully-qualified
/// URL. SPEC_FULL.md §5: "per-repo-actor (not shared)", so each `RepoActor`
/// owns one `UrlCache`, never sharing it across actors.
pub(crate) struct UrlCache {
    entries: MokaCache<String, CacheEntry>,
}

impl UrlCache {
    pub(crate) fn new() -> Self {
        Self {
            entries: MokaCache::new(256),
        }
    }

    /// Fetches `url`, consulting and updating the cache per SPEC_FULL.md
    /// §4.1. When `allow_404` is set, a 404 response is treated as a
    /// successful (cacheable) result rather than an error — used for
    /// optional probes like `.gitmodules` and submodule file contents.
    pub(crate) async fn get_json(
        &self,
        client: &ClientWithMiddleware,
        url: &str,
        allow_404: bool,
    ) -> Result<Option<CachedBody>, ForgeError> {
        if let Some(entry) = self.entries.get(url).await
            && entry.fetched_at.elapsed() < LOCAL_CACHE_PERIOD
        {
            tracing::debug!(url, "cache hit (within grace period)");
            return Ok(Some(entry.body.clone()));
        }

        let prior = self.entries.get(url).await;

        let mut req = client.get(url);
        if let Some(entry) = &prior {
            if let Some(etag) = &entry.etag {
                req = req.header(IF_NONE_MATCH, etag);
            }
            if let Some(last_modified) = &entry.last_modified {
                req = req.header(IF_MODIFIED_SINCE, last_modified);
            }
        }

        let resp = req.send().await?;

        match resp.status() {
            StatusCode::NOT_MODIFIED => {
                tracing::debug!(url, "304 not modified, refreshing timestamp only");
                if let Some(mut entry) = prior {
                    entry.fetched_at = Instant::now();
                    let body = entry.body.clone();
                    self.entries.insert(url.to_string(), entry).await;
                    Ok(Some(body))
                } else {
                    // A 304 with nothing cached is a forge-side anomaly; treat
                    // it as a cache miss rather than fabricating a body.
                    Ok(None)
                }
            }
            StatusCode::NOT_FOUND if allow_404 => {
                tracing::debug!(url, "404, caching as sentinel");
                self.store(url, resp, CachedBody::NotFound).await;
                Ok(Some(CachedBody::NotFound))
            }
            status if status.is_success() => {
                let (etag, last_modified) = validators(resp.headers());
                let next = resp
                    .headers()
                    .get(LINK)
                    .and_then(|v| v.to_str().ok())
                    .and_then(next_link);
                let body: Value = resp.json().await?;
                let body = follow_pagination(client, body, next).await?;
                let entry = CacheEntry {
                    body: CachedBody::Json(body.clone()),
                    fetched_at: Instant::now(),
                    etag,
                    last_modified,
                };
                self.entries.insert(url.to_string(), entry).await;
                Ok(Some(CachedBody::Json(body)))
            }
            status => Err(ForgeError::UnexpectedStatus {
                url: url.to_string(),
                status: status.as_u16(),
            }),
        }
    }

    async fn store(&self, url: &str, resp: Response, fallback: CachedBody) {
        let (etag, last_modified) = validators(resp.headers());
        self.entries
            .insert(
                url.to_string(),
                CacheEntry {
                    body: fallback,
                    fetched_at: Instant::now(),
                    etag,
                    last_modified,
                },
            )
            .await;
    }
}

impl Default for UrlCache {
    fn default() -> Self {
        Self::new()
    }
}

fn validators(headers: &HeaderMap) -> (Option<String>, Option<String>) {
    let etag = headers
        .get(ETAG)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let last_modified = headers
        .get(LAST_MODIFIED)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    (etag, last_modified)
}

/// Follows a `Link: <...>; rel="next"` chain, concatenating JSON arrays or
/// merging JSON objects across pages. Order is preserved for arrays to keep
/// the pipeline's determinism guarantee (SPEC_FULL.md §5).
async fn follow_pagination(
    client: &ClientWithMiddleware,
    mut body: Value,
    mut next_url: Option<String>,
) -> Result<Value, ForgeError> {
    // Pagination is driven purely by the `Link` header on each page's
    // response, so we re-issue requests directly here rather than through
    // `get_json` (which would otherwise treat each page as independently
    // cacheable under its own URL, which is correct, but we want one
    // merged value back to the caller of the *first* page's URL).
    loop {
        let Some(url) = next_url.take() else { break };
        let resp = client.get(&url).send().await?;
        if !resp.status().is_success() {
            break;
        }
        let link = resp
            .headers()
            .get(LINK)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let page: Value = resp.json().await?;
        body = merge(body, page);
        next_url = link.as_deref().and_then(next_link);
    }

    Ok(body)
}

fn merge(a: Value, b: Value) -> Value {
    match (a, b) {
        (Value::Array(mut a), Value::Array(b)) => {
            a.extend(b);
            Value::Array(a)
        }
        (Value::Object(mut a), Value::Object(b)) => {
            a.extend(b);
            Value::Object(a)
        }
        (a, _) => {
            tracing::error!("mismatched pagination payload types, keeping first page only");
            a
        }
    }
}

/// Parses a `Link` header for a `rel="next"` target, per RFC 8288.
fn next_link(link_header: &str) -> Option<String> {
    link_header.split(',').find_map(|part| {
        let mut segments = part.split(';').map(str::trim);
        let url_part = segments.next()?;
        let is_next = segments.any(|seg| seg == r#"rel="next""#);
        if !is_next {
            return None;
        }
        url_part
            .strip_prefix('<')
            .and_then(|s| s.strip_suffix('>'))
            .map(str::to_string)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_link_extracts_next_rel() {
        let header = r#"<https://api.example.com/items?page=2>; rel="next", <https://api.example.com/items?page=5>; rel="last""#;
        assert_eq!(
            next_link(header),
            Some("https://api.example.com/items?page=2".to_string())
        );
    }

    #[test]
    fn next_link_absent_returns_none() {
        let header = r#"<https://api.example.com/items?page=1>; rel="last""#;
        assert_eq!(next_link(header), None);
    }

    #[test]
    fn merge_concatenates_arrays_in_order() {
        let a = serde_json::json!([1, 2]);
        let b = serde_json::json!([3, 4]);
        assert_eq!(merge(a, b), serde_json::json!([1, 2, 3, 4]));
    }
}
