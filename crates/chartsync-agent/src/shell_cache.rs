//! Versioned navigation-shell precache
//!
//! On first activation the agent caches the minimal navigation shell (the
//! root route and the offline fallback page) under a generation directory
//! named after the application version, e.g. `chartsync-shell-v0.1.0`.
//! Activating a new version removes the generations left behind by its
//! predecessors, so an upgrade never serves a previous version's shell.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

/// Prefix shared by every cache generation directory
pub const GENERATION_PREFIX: &str = "chartsync-shell-v";

/// Routes precached on activation
pub const SHELL_ROUTES: [&str; 2] = ["/", "/offline"];

/// Built-in fallback page, used when the first activation has no network
pub const OFFLINE_PAGE: &str = "<!DOCTYPE html>\n\
<html lang=\"en\">\n\
<head>\n\
  <meta charset=\"utf-8\">\n\
  <title>ChartSync - offline</title>\n\
</head>\n\
<body>\n\
  <h1>You are offline</h1>\n\
  <p>ChartSync cannot reach the records server right now. Your queued\n\
  changes are safe and will sync automatically when the connection\n\
  returns.</p>\n\
</body>\n\
</html>\n";

const DEFAULT_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// A response body recovered from the shell cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub content_type: String,
    pub body: Vec<u8>,
}

/// Filesystem cache holding one generation of the navigation shell
///
/// Each cached path is stored as two files under the generation
/// directory: `<key>.body` with the response bytes and `<key>.meta` with
/// its content type.
pub struct ShellCache {
    cache_dir: PathBuf,
    generation: String,
    generation_dir: PathBuf,
}

impl ShellCache {
    /// Creates a handle for the running application version's generation
    pub fn new(cache_dir: &Path) -> Self {
        let generation = format!("{GENERATION_PREFIX}{}", env!("CARGO_PKG_VERSION"));
        let generation_dir = cache_dir.join(&generation);
        Self {
            cache_dir: cache_dir.to_path_buf(),
            generation,
            generation_dir,
        }
    }

    /// Name of the generation directory this handle reads and writes
    pub fn generation(&self) -> &str {
        &self.generation
    }

    /// Precaches the navigation shell and removes stale generations
    ///
    /// The upstream fetch is skipped when this generation is already
    /// populated. A fresh install that starts offline still ends up with
    /// the built-in offline page, so the facade always has a fallback.
    pub async fn activate(&self, upstream_url: &str, client: &reqwest::Client) -> Result<()> {
        tokio::fs::create_dir_all(&self.generation_dir)
            .await
            .with_context(|| {
                format!(
                    "Failed to create cache generation {}",
                    self.generation_dir.display()
                )
            })?;

        self.remove_stale_generations().await;

        if self.lookup("/offline").await.is_some() {
            debug!(generation = %self.generation, "Shell cache already populated");
            return Ok(());
        }

        info!(
            generation = %self.generation,
            upstream = upstream_url,
            "Precaching navigation shell"
        );

        let base = upstream_url.trim_end_matches('/');
        for route in SHELL_ROUTES {
            match client.get(format!("{base}{route}")).send().await {
                Ok(response) if response.status().is_success() => {
                    let content_type = response
                        .headers()
                        .get(reqwest::header::CONTENT_TYPE)
                        .and_then(|value| value.to_str().ok())
                        .unwrap_or(DEFAULT_CONTENT_TYPE)
                        .to_string();
                    match response.bytes().await {
                        Ok(body) => {
                            if let Err(e) = self.store(route, &content_type, &body).await {
                                warn!(route, error = %e, "Failed to cache shell route");
                            }
                        }
                        Err(e) => warn!(route, error = %e, "Failed to read shell route body"),
                    }
                }
                Ok(response) => {
                    warn!(route, status = %response.status(), "Upstream refused shell route");
                }
                Err(e) => {
                    warn!(route, error = %e, "Could not fetch shell route from upstream");
                }
            }
        }

        // The facade relies on this page existing even when the first
        // activation could not reach the upstream.
        if self.lookup("/offline").await.is_none() {
            self.store("/offline", DEFAULT_CONTENT_TYPE, OFFLINE_PAGE.as_bytes())
                .await
                .context("Failed to write the built-in offline page")?;
        }

        Ok(())
    }

    /// Deletes generation directories belonging to other versions
    async fn remove_stale_generations(&self) {
        let mut entries = match tokio::fs::read_dir(&self.cache_dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Could not scan the cache directory for stale generations");
                return;
            }
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with(GENERATION_PREFIX) && name != self.generation {
                info!(generation = name, "Removing stale shell cache generation");
                if let Err(e) = tokio::fs::remove_dir_all(entry.path()).await {
                    warn!(generation = name, error = %e, "Failed to remove stale generation");
                }
            }
        }
    }

    /// Stores one response body under its request path
    pub async fn store(&self, path: &str, content_type: &str, body: &[u8]) -> Result<()> {
        let key = cache_key(path);
        tokio::fs::create_dir_all(&self.generation_dir)
            .await
            .with_context(|| {
                format!(
                    "Failed to create cache generation {}",
                    self.generation_dir.display()
                )
            })?;
        tokio::fs::write(self.generation_dir.join(format!("{key}.body")), body)
            .await
            .with_context(|| format!("Failed to write cache body for {path}"))?;
        tokio::fs::write(self.generation_dir.join(format!("{key}.meta")), content_type)
            .await
            .with_context(|| format!("Failed to write cache metadata for {path}"))?;
        debug!(path, bytes = body.len(), "Cached response body");
        Ok(())
    }

    /// Looks up a cached response for a request path
    pub async fn lookup(&self, path: &str) -> Option<CachedResponse> {
        let key = cache_key(path);
        let body = tokio::fs::read(self.generation_dir.join(format!("{key}.body")))
            .await
            .ok()?;
        let content_type =
            tokio::fs::read_to_string(self.generation_dir.join(format!("{key}.meta")))
                .await
                .unwrap_or_else(|_| DEFAULT_CONTENT_TYPE.to_string());
        Some(CachedResponse { content_type, body })
    }

    /// Returns the offline fallback page, preferring the cached copy
    pub async fn offline_page(&self) -> CachedResponse {
        match self.lookup("/offline").await {
            Some(cached) => cached,
            None => CachedResponse {
                content_type: DEFAULT_CONTENT_TYPE.to_string(),
                body: OFFLINE_PAGE.as_bytes().to_vec(),
            },
        }
    }
}

/// Maps a request path to a filesystem-safe cache key
fn cache_key(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return "root".to_string();
    }
    trimmed
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .unwrap()
    }

    #[test]
    fn test_cache_key_sanitizes_paths() {
        assert_eq!(cache_key("/"), "root");
        assert_eq!(cache_key(""), "root");
        assert_eq!(cache_key("/offline"), "offline");
        assert_eq!(cache_key("/api/patients"), "api_patients");
        assert_eq!(cache_key("/styles/app.css"), "styles_app.css");
    }

    #[tokio::test]
    async fn test_store_then_lookup_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ShellCache::new(dir.path());

        cache
            .store("/", "text/html", b"<html>shell</html>")
            .await
            .unwrap();

        let hit = cache.lookup("/").await.unwrap();
        assert_eq!(hit.content_type, "text/html");
        assert_eq!(hit.body, b"<html>shell</html>");
    }

    #[tokio::test]
    async fn test_lookup_miss_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ShellCache::new(dir.path());

        assert!(cache.lookup("/never-cached").await.is_none());
    }

    #[tokio::test]
    async fn test_offline_page_falls_back_to_builtin() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ShellCache::new(dir.path());

        let page = cache.offline_page().await;
        assert!(String::from_utf8_lossy(&page.body).contains("You are offline"));
    }

    #[tokio::test]
    async fn test_activate_fetches_the_shell_from_upstream() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<html>live shell</html>")
                    .insert_header("content-type", "text/html; charset=utf-8"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/offline"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>offline</html>"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cache = ShellCache::new(dir.path());
        cache.activate(&server.uri(), &client()).await.unwrap();

        let shell = cache.lookup("/").await.unwrap();
        assert_eq!(shell.body, b"<html>live shell</html>");
        assert_eq!(
            cache.lookup("/offline").await.unwrap().body,
            b"<html>offline</html>"
        );
    }

    #[tokio::test]
    async fn test_activate_without_network_writes_the_builtin_offline_page() {
        let server = MockServer::start().await;
        let dead_upstream = server.uri();
        drop(server);

        let dir = tempfile::tempdir().unwrap();
        let cache = ShellCache::new(dir.path());
        cache.activate(&dead_upstream, &client()).await.unwrap();

        let page = cache.lookup("/offline").await.unwrap();
        assert!(String::from_utf8_lossy(&page.body).contains("You are offline"));
        // The root route stays uncached until the upstream is reachable
        assert!(cache.lookup("/").await.is_none());
    }

    #[tokio::test]
    async fn test_activate_removes_stale_generations() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join(format!("{GENERATION_PREFIX}0.0.1"));
        let unrelated = dir.path().join("not-a-generation");
        tokio::fs::create_dir_all(&stale).await.unwrap();
        tokio::fs::create_dir_all(&unrelated).await.unwrap();

        let server = MockServer::start().await;
        let dead_upstream = server.uri();
        drop(server);

        let cache = ShellCache::new(dir.path());
        cache.activate(&dead_upstream, &client()).await.unwrap();

        assert!(!stale.exists());
        assert!(unrelated.exists());
        assert!(dir.path().join(cache.generation()).exists());
    }

    #[tokio::test]
    async fn test_activate_skips_refetch_when_already_populated() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("fresh"))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cache = ShellCache::new(dir.path());
        cache
            .store("/offline", DEFAULT_CONTENT_TYPE, b"cached page")
            .await
            .unwrap();

        cache.activate(&server.uri(), &client()).await.unwrap();

        assert_eq!(cache.lookup("/offline").await.unwrap().body, b"cached page");
    }
}
