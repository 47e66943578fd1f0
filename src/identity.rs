use crate::models::Identity;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

/// User agent presented when no pool was configured.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Fallback pool when no user agent file is present.
pub const DEFAULT_USER_AGENTS: &[&str] = &[
    DEFAULT_USER_AGENT,
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:109.0) Gecko/20100101 Firefox/119.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15",
];

/// Round-robin rotation over independent proxy and user agent pools.
///
/// Pools are fixed at construction. The cursors are atomics so concurrent
/// enrichments can share one rotator; fairness between callers is not
/// guaranteed, only that every entry comes around eventually.
#[derive(Debug, Default)]
pub struct IdentityRotator {
    proxies: Vec<String>,
    user_agents: Vec<String>,
    proxy_cursor: AtomicUsize,
    ua_cursor: AtomicUsize,
}

impl IdentityRotator {
    pub fn new(proxies: Vec<String>, user_agents: Vec<String>) -> Self {
        Self {
            proxies,
            user_agents,
            proxy_cursor: AtomicUsize::new(0),
            ua_cursor: AtomicUsize::new(0),
        }
    }

    /// Loads both pools from line-oriented files. Missing or unreadable files
    /// yield empty pools; an empty user agent pool falls back to the built-in list.
    pub fn from_files(proxy_path: impl AsRef<Path>, user_agent_path: impl AsRef<Path>) -> Self {
        let proxies = usable_proxies(load_lines(proxy_path.as_ref()));
        let mut user_agents = load_lines(user_agent_path.as_ref());
        if user_agents.is_empty() {
            user_agents = DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect();
        }
        tracing::info!(
            "Identity pools loaded: {} proxies, {} user agents",
            proxies.len(),
            user_agents.len()
        );
        Self::new(proxies, user_agents)
    }

    /// Next (proxy, user agent) pair. Never fails: empty pools yield a direct
    /// connection with the default user agent.
    pub fn next(&self) -> Identity {
        let proxy = pick(&self.proxies, &self.proxy_cursor).map(str::to_string);
        let user_agent = pick(&self.user_agents, &self.ua_cursor)
            .unwrap_or(DEFAULT_USER_AGENT)
            .to_string();
        Identity { proxy, user_agent }
    }

    pub fn proxy_count(&self) -> usize {
        self.proxies.len()
    }

    pub fn user_agent_count(&self) -> usize {
        self.user_agents.len()
    }
}

fn pick<'a>(pool: &'a [String], cursor: &AtomicUsize) -> Option<&'a str> {
    if pool.is_empty() {
        return None;
    }
    let index = cursor.fetch_add(1, Ordering::Relaxed) % pool.len();
    Some(pool[index].as_str())
}

/// Keeps the proxy lines that parse as a URL with a host. Anything else is
/// dropped with a warning; the credentials part is never logged.
pub fn usable_proxies(lines: Vec<String>) -> Vec<String> {
    lines
        .into_iter()
        .enumerate()
        .filter_map(|(index, line)| match url::Url::parse(&line) {
            Ok(parsed) if parsed.host_str().is_some_and(|h| !h.is_empty()) => Some(line),
            Ok(_) | Err(_) => {
                tracing::warn!("Ignoring malformed proxy entry on line {}", index + 1);
                None
            }
        })
        .collect()
}

/// Non-empty, trimmed lines of a text file; empty when the file is unreadable.
pub fn load_lines(path: &Path) -> Vec<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect(),
        Err(e) => {
            tracing::debug!("Could not read {}: {}", path.display(), e);
            Vec::new()
        }
    }
}
