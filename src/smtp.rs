use crate::config::ConfidencePriors;
use crate::errors::AppError;
use crate::models::Deliverability;
use async_trait::async_trait;
use moka::future::Cache;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::error::ResolveErrorKind;
use trust_dns_resolver::TokioAsyncResolver;

/// Resolves the mail exchangers of a domain, best preference first.
/// `Ok` with an empty list means the domain has no MX records.
#[async_trait]
pub trait MxResolver: Send + Sync {
    async fn resolve_mx(&self, domain: &str) -> Result<Vec<String>, AppError>;
}

/// What a mail host said about one recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeVerdict {
    Accepted,
    Rejected,
    /// Temporary failure, catch-all domain or a reply we could not classify.
    Ambiguous,
}

/// Runs the mailbox-acceptance handshake for `address` against `host`
/// without ever sending message content.
#[async_trait]
pub trait MailHandshake: Send + Sync {
    async fn probe(
        &self,
        host: &str,
        address: &str,
        timeout: Duration,
    ) -> Result<HandshakeVerdict, AppError>;
}

/// Outcome of verifying one address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verification {
    pub deliverable: Deliverability,
    pub confidence: u8,
}

/// Per-address deliverability probe.
///
/// Never fails: resolution errors, timeouts and connection problems are
/// classified as unknown.
#[derive(Clone)]
pub struct SmtpVerifier {
    resolver: Arc<dyn MxResolver>,
    handshake: Arc<dyn MailHandshake>,
    timeout: Duration,
    priors: ConfidencePriors,
}

impl SmtpVerifier {
    pub fn new(
        resolver: Arc<dyn MxResolver>,
        handshake: Arc<dyn MailHandshake>,
        timeout: Duration,
        priors: ConfidencePriors,
    ) -> Self {
        Self {
            resolver,
            handshake,
            timeout,
            priors,
        }
    }

    pub async fn verify(&self, email: &str) -> Verification {
        let Some((_, domain)) = email.rsplit_once('@').filter(|(local, d)| !local.is_empty() && !d.is_empty())
        else {
            tracing::debug!("Not an address, skipping SMTP check: {}", email);
            return self.verdict(Deliverability::Undeliverable);
        };

        let hosts = match tokio::time::timeout(self.timeout, self.resolver.resolve_mx(domain)).await {
            Ok(Ok(hosts)) => hosts,
            Ok(Err(e)) => {
                tracing::warn!(domain = %domain, "MX resolution failed: {}", e);
                return self.verdict(Deliverability::Unknown);
            }
            Err(_) => {
                tracing::warn!(domain = %domain, "MX resolution timed out");
                return self.verdict(Deliverability::Unknown);
            }
        };

        let Some(host) = hosts.first() else {
            tracing::debug!(domain = %domain, "No MX records, {} is undeliverable", email);
            return self.verdict(Deliverability::Undeliverable);
        };

        let probe = self.handshake.probe(host, email, self.timeout);
        let deliverable = match tokio::time::timeout(self.timeout, probe).await {
            Ok(Ok(HandshakeVerdict::Accepted)) => Deliverability::Deliverable,
            Ok(Ok(HandshakeVerdict::Rejected)) => Deliverability::Undeliverable,
            Ok(Ok(HandshakeVerdict::Ambiguous)) => Deliverability::Unknown,
            Ok(Err(e)) => {
                tracing::debug!("Handshake with {} for {} failed: {}", host, email, e);
                Deliverability::Unknown
            }
            Err(_) => {
                tracing::debug!("Handshake with {} for {} timed out", host, email);
                Deliverability::Unknown
            }
        };
        self.verdict(deliverable)
    }

    fn verdict(&self, deliverable: Deliverability) -> Verification {
        let confidence = match deliverable {
            Deliverability::Deliverable => self.priors.pattern_smtp,
            Deliverability::Undeliverable => 0,
            Deliverability::Unknown => self.priors.unknown,
        };
        Verification {
            deliverable,
            confidence,
        }
    }
}

// ============ DNS ============

/// [`MxResolver`] backed by the system-independent trust-dns resolver.
/// Lookups are cached per domain for an hour.
pub struct DnsMxResolver {
    resolver: TokioAsyncResolver,
    cache: Cache<String, Vec<String>>,
}

impl DnsMxResolver {
    pub fn new() -> Self {
        Self {
            resolver: TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default()),
            cache: Cache::builder()
                .time_to_live(Duration::from_secs(3600))
                .max_capacity(10_000)
                .build(),
        }
    }
}

impl Default for DnsMxResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MxResolver for DnsMxResolver {
    async fn resolve_mx(&self, domain: &str) -> Result<Vec<String>, AppError> {
        let domain = domain.trim().trim_end_matches('.').to_lowercase();
        if let Some(hosts) = self.cache.get(&domain).await {
            return Ok(hosts);
        }

        let hosts = match self.resolver.mx_lookup(domain.as_str()).await {
            Ok(lookup) => {
                let mut records: Vec<(u16, String)> = lookup
                    .iter()
                    .map(|mx| {
                        let host = mx.exchange().to_utf8();
                        (mx.preference(), host.trim_end_matches('.').to_string())
                    })
                    .filter(|(_, host)| !host.is_empty())
                    .collect();
                records.sort();
                records.into_iter().map(|(_, host)| host).collect()
            }
            Err(e) if matches!(e.kind(), ResolveErrorKind::NoRecordsFound { .. }) => Vec::new(),
            Err(e) => {
                return Err(AppError::VerificationTimeout(format!(
                    "MX lookup for {} failed: {}",
                    domain, e
                )))
            }
        };

        tracing::debug!(domain = %domain, "Resolved {} MX host(s)", hosts.len());
        self.cache.insert(domain, hosts.clone()).await;
        Ok(hosts)
    }
}

// ============ SMTP ============

/// [`MailHandshake`] speaking plain SMTP on port 25:
/// greeting, EHLO, MAIL FROM, RCPT TO, QUIT.
///
/// When the target is accepted a random mailbox is tried in the same session;
/// if that is accepted too the domain is catch-all and the verdict is ambiguous.
#[derive(Debug, Clone)]
pub struct SmtpHandshake {
    helo_name: String,
    sender: String,
    port: u16,
}

impl SmtpHandshake {
    pub fn new(helo_name: impl Into<String>, sender: impl Into<String>) -> Self {
        Self {
            helo_name: helo_name.into(),
            sender: sender.into(),
            port: 25,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    async fn run(&self, host: &str, address: &str) -> Result<HandshakeVerdict, AppError> {
        let stream = TcpStream::connect((host, self.port))
            .await
            .map_err(|e| AppError::TransientFetch(format!("connect to {}: {}", host, e)))?;
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        if !is_positive(read_reply(&mut reader).await?) {
            return Ok(HandshakeVerdict::Ambiguous);
        }

        let ehlo = send_command(&mut writer, &mut reader, &format!("EHLO {}", self.helo_name)).await?;
        if !is_positive(ehlo) {
            return Ok(HandshakeVerdict::Ambiguous);
        }

        let mail_from =
            send_command(&mut writer, &mut reader, &format!("MAIL FROM:<{}>", self.sender)).await?;
        if !is_positive(mail_from) {
            return Ok(HandshakeVerdict::Ambiguous);
        }

        let rcpt = send_command(&mut writer, &mut reader, &format!("RCPT TO:<{}>", address)).await?;
        let mut verdict = classify_rcpt(rcpt);

        if verdict == HandshakeVerdict::Accepted {
            if let Some((_, domain)) = address.rsplit_once('@') {
                let probe = format!("{}@{}", random_local_part(), domain);
                let catch_all =
                    send_command(&mut writer, &mut reader, &format!("RCPT TO:<{}>", probe)).await?;
                if is_positive(catch_all) {
                    tracing::debug!("{} accepts any recipient (catch-all)", domain);
                    verdict = HandshakeVerdict::Ambiguous;
                }
            }
        }

        let _ = writer.write_all(b"QUIT\r\n").await;
        Ok(verdict)
    }
}

#[async_trait]
impl MailHandshake for SmtpHandshake {
    async fn probe(
        &self,
        host: &str,
        address: &str,
        timeout: Duration,
    ) -> Result<HandshakeVerdict, AppError> {
        tokio::time::timeout(timeout, self.run(host, address))
            .await
            .map_err(|_| AppError::VerificationTimeout(format!("SMTP session with {}", host)))?
    }
}

/// 2xx accepted, 5xx rejected, anything else ambiguous.
pub fn classify_rcpt(code: u16) -> HandshakeVerdict {
    match code {
        200..=299 => HandshakeVerdict::Accepted,
        500..=599 => HandshakeVerdict::Rejected,
        _ => HandshakeVerdict::Ambiguous,
    }
}

fn is_positive(code: u16) -> bool {
    (200..400).contains(&code)
}

fn random_local_part() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}

async fn send_command<W, R>(writer: &mut W, reader: &mut R, command: &str) -> Result<u16, AppError>
where
    W: AsyncWriteExt + Unpin,
    R: AsyncBufReadExt + Unpin,
{
    writer
        .write_all(format!("{}\r\n", command).as_bytes())
        .await
        .map_err(|e| AppError::TransientFetch(format!("SMTP write failed: {}", e)))?;
    read_reply(reader).await
}

/// Reads one (possibly multi-line) reply and returns its status code.
async fn read_reply<R>(reader: &mut R) -> Result<u16, AppError>
where
    R: AsyncBufReadExt + Unpin,
{
    loop {
        let mut line = String::new();
        let read = reader
            .read_line(&mut line)
            .await
            .map_err(|e| AppError::TransientFetch(format!("SMTP read failed: {}", e)))?;
        if read == 0 {
            return Err(AppError::TransientFetch("SMTP connection closed".to_string()));
        }
        let code = line
            .get(..3)
            .and_then(|c| c.parse::<u16>().ok())
            .ok_or_else(|| AppError::InvalidInput(format!("Malformed SMTP reply: {}", line.trim())))?;
        // "250-" continues, "250 " ends the reply
        if line.as_bytes().get(3) != Some(&b'-') {
            return Ok(code);
        }
    }
}
