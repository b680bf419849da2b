use std::collections::HashSet;

use url::Url;

use trolley_core::config::BrowserConfig;

/// Outcome of checking one request URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Forward,
    Abort { reason: String },
}

/// Request containment for shopping runs. Blocked path prefixes are checked
/// before the host allowlist; anything that cannot be parsed is aborted.
#[derive(Debug, Clone)]
pub struct NetworkPolicy {
    allow_hosts: HashSet<String>,
    blocked_path_prefixes: Vec<String>,
}

impl NetworkPolicy {
    pub fn from_config(config: &BrowserConfig) -> Self {
        Self {
            allow_hosts: config.allow_hosts.iter().cloned().collect(),
            blocked_path_prefixes: config.blocked_path_prefixes.clone(),
        }
    }

    pub fn verdict(&self, raw_url: &str) -> Verdict {
        let parsed = match Url::parse(raw_url) {
            Ok(url) => url,
            Err(_) => {
                return Verdict::Abort {
                    reason: format!("unparseable url: {raw_url}"),
                }
            }
        };

        let path = parsed.path();
        if let Some(prefix) = self
            .blocked_path_prefixes
            .iter()
            .find(|p| path.starts_with(p.as_str()))
        {
            return Verdict::Abort {
                reason: format!("blocked path prefix {prefix}"),
            };
        }

        let host = parsed.host_str().unwrap_or("");
        if !self.allow_hosts.contains(host) {
            return Verdict::Abort {
                reason: format!("host not allowed: {host}"),
            };
        }

        Verdict::Forward
    }

    /// Checks a navigation target the agent asked for. Same rules as request
    /// interception; kept separate so callers can reject before navigating.
    pub fn allows_navigation(&self, raw_url: &str) -> bool {
        matches!(self.verdict(raw_url), Verdict::Forward)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> NetworkPolicy {
        NetworkPolicy::from_config(&BrowserConfig::default())
    }

    #[test]
    fn test_allowed_host_is_forwarded() {
        assert_eq!(
            policy().verdict("https://www.metro.ca/en/online-grocery/search?filter=milk"),
            Verdict::Forward
        );
        assert_eq!(
            policy().verdict("https://product-images.metro.ca/images/p1.png"),
            Verdict::Forward
        );
    }

    #[test]
    fn test_unknown_host_is_aborted() {
        assert!(matches!(
            policy().verdict("https://evil.example/"),
            Verdict::Abort { .. }
        ));
    }

    #[test]
    fn test_blocked_path_wins_over_allowed_host() {
        assert!(matches!(
            policy().verdict("https://www.metro.ca/checkout"),
            Verdict::Abort { .. }
        ));
        assert!(matches!(
            policy().verdict("https://www.metro.ca/password-reset?step=2"),
            Verdict::Abort { .. }
        ));
    }

    #[test]
    fn test_unparseable_url_fails_closed() {
        assert!(matches!(
            policy().verdict("not a url"),
            Verdict::Abort { .. }
        ));
    }

    #[test]
    fn test_path_prefix_requires_match_from_root() {
        // "/en/checkout-guide" does not start with "/checkout"
        assert_eq!(
            policy().verdict("https://www.metro.ca/en/checkout-guide"),
            Verdict::Forward
        );
    }
}
