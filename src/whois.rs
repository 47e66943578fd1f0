use crate::config::ConfidencePriors;
use crate::errors::AppError;
use crate::models::{normalize_address, Deliverability, EmailCandidate, EmailMethod};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Returns the raw registration record for a domain.
#[async_trait]
pub trait WhoisQuery: Send + Sync {
    async fn query(&self, domain: &str) -> Result<String, AppError>;
}

/// Markers of privacy proxies and redacted registrant data.
const PRIVACY_MARKERS: &[&str] = &[
    "privacy",
    "protected",
    "redacted",
    "proxy",
    "whoisguard",
    "domainsbyproxy",
    "contactprivacy",
    "withheldforprivacy",
    "anonymize",
    "gdpr-masked",
];

static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")
        .expect("Email regex is hardcoded and valid")
});

/// Registrant-email fallback source.
pub struct WhoisLookup {
    client: Arc<dyn WhoisQuery>,
    timeout: Duration,
    priors: ConfidencePriors,
}

impl WhoisLookup {
    pub fn new(client: Arc<dyn WhoisQuery>, timeout: Duration, priors: ConfidencePriors) -> Self {
        Self {
            client,
            timeout,
            priors,
        }
    }

    /// Registrant addresses for `domain`. Missing, redacted or unreachable
    /// data all yield an empty list.
    pub async fn lookup(&self, domain: &str) -> Vec<EmailCandidate> {
        let raw = match tokio::time::timeout(self.timeout, self.client.query(domain)).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                tracing::debug!(domain = %domain, "WHOIS query failed: {}", e);
                return Vec::new();
            }
            Err(_) => {
                tracing::debug!(domain = %domain, "WHOIS query timed out");
                return Vec::new();
            }
        };

        registrant_emails(&raw)
            .into_iter()
            .map(|address| {
                EmailCandidate::scored(
                    &address,
                    EmailMethod::Whois,
                    Deliverability::Unknown,
                    None,
                    &self.priors,
                )
            })
            .collect()
    }
}

/// Usable contact addresses from a raw WHOIS record.
///
/// Registrant lines are preferred; other contact lines are used only when no
/// registrant address is published. Abuse contacts belong to the registrar
/// and are never returned.
pub fn registrant_emails(raw: &str) -> Vec<String> {
    let mut registrant = Vec::new();
    let mut other = Vec::new();

    for line in raw.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_lowercase();
        if !key.contains("email") || key.contains("abuse") {
            continue;
        }
        for m in EMAIL_PATTERN.find_iter(value) {
            let address = normalize_address(m.as_str());
            if is_privacy_masked(&address) {
                continue;
            }
            let bucket = if key.contains("registrant") {
                &mut registrant
            } else {
                &mut other
            };
            if !bucket.contains(&address) {
                bucket.push(address);
            }
        }
    }

    if registrant.is_empty() {
        other
    } else {
        registrant
    }
}

fn is_privacy_masked(address: &str) -> bool {
    let compact: String = address.chars().filter(|c| *c != '.' && *c != '_').collect();
    PRIVACY_MARKERS.iter().any(|marker| compact.contains(marker))
}

/// [`WhoisQuery`] over TCP port 43.
///
/// Starts at the configured root server and follows at most one
/// `refer:`/`whois:` referral to the registry or registrar server.
#[derive(Debug, Clone)]
pub struct TcpWhoisClient {
    root_server: String,
    timeout: Duration,
}

impl TcpWhoisClient {
    pub fn new(root_server: impl Into<String>, timeout: Duration) -> Self {
        Self {
            root_server: root_server.into(),
            timeout,
        }
    }

    async fn ask(&self, server: &str, domain: &str) -> Result<String, AppError> {
        let exchange = async {
            let mut stream = TcpStream::connect((server, 43)).await?;
            stream.write_all(format!("{}\r\n", domain).as_bytes()).await?;
            let mut response = Vec::new();
            stream.read_to_end(&mut response).await?;
            Ok::<_, std::io::Error>(String::from_utf8_lossy(&response).into_owned())
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(AppError::TransientFetch(format!("WHOIS {}: {}", server, e))),
            Err(_) => Err(AppError::VerificationTimeout(format!("WHOIS {}", server))),
        }
    }
}

#[async_trait]
impl WhoisQuery for TcpWhoisClient {
    async fn query(&self, domain: &str) -> Result<String, AppError> {
        let root = self.ask(&self.root_server, domain).await?;
        match referral_server(&root) {
            Some(server) if !server.eq_ignore_ascii_case(&self.root_server) => {
                tracing::debug!(domain = %domain, "Following WHOIS referral to {}", server);
                self.ask(&server, domain).await
            }
            _ => Ok(root),
        }
    }
}

/// Referral target named by a root WHOIS answer.
pub fn referral_server(raw: &str) -> Option<String> {
    raw.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        let key = key.trim().to_lowercase();
        let value = value.trim();
        if (key == "refer" || key == "whois" || key == "registrar whois server") && !value.is_empty() {
            Some(value.trim_start_matches("whois://").to_string())
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CannedWhois(&'static str);

    #[async_trait]
    impl WhoisQuery for CannedWhois {
        async fn query(&self, _domain: &str) -> Result<String, AppError> {
            Ok(self.0.to_string())
        }
    }

    struct DownWhois;

    #[async_trait]
    impl WhoisQuery for DownWhois {
        async fn query(&self, domain: &str) -> Result<String, AppError> {
            Err(AppError::TransientFetch(domain.to_string()))
        }
    }

    #[test]
    fn test_registrant_email_preferred_over_admin() {
        let raw = "Domain Name: ACME.COM\n\
                   Registrar Abuse Contact Email: abuse@registrar.com\n\
                   Registrant Email: Owner@Acme.com\n\
                   Admin Email: admin@acme.com\n";
        assert_eq!(registrant_emails(raw), vec!["owner@acme.com".to_string()]);
    }

    #[test]
    fn test_privacy_proxies_are_filtered() {
        let raw = "Registrant Email: 5f3a@domainsbyproxy.com\n\
                   Registrant Email: REDACTED FOR PRIVACY\n\
                   Admin Email: abc123@whoisguard.com\n\
                   Tech Email: contact@privacy-protect.org\n";
        assert!(registrant_emails(raw).is_empty());
    }

    #[test]
    fn test_falls_back_to_other_contacts() {
        let raw = "Registrant Email: Please query the RDDS service\nTech Email: ops@acme.com\n";
        assert_eq!(registrant_emails(raw), vec!["ops@acme.com".to_string()]);
    }

    #[test]
    fn test_referral_server_parsing() {
        assert_eq!(
            referral_server("domain: COM\nrefer: whois.verisign-grs.com\n").as_deref(),
            Some("whois.verisign-grs.com")
        );
        assert_eq!(referral_server("nothing here"), None);
    }

    #[tokio::test]
    async fn test_lookup_scores_whois_prior() {
        let lookup = WhoisLookup::new(
            Arc::new(CannedWhois("Registrant Email: owner@acme.com\n")),
            Duration::from_secs(1),
            ConfidencePriors::default(),
        );
        let found = lookup.lookup("acme.com").await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].confidence(), 40);
        assert_eq!(found[0].method(), EmailMethod::Whois);
    }

    #[tokio::test]
    async fn test_lookup_failure_is_empty() {
        let lookup = WhoisLookup::new(Arc::new(DownWhois), Duration::from_secs(1), ConfidencePriors::default());
        assert!(lookup.lookup("acme.com").await.is_empty());
    }
}
