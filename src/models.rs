use crate::config::ConfidencePriors;
use crate::enrichment::normalize_phone;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============ Identity ============

/// Keys used to decide whether two records describe the same business.
///
/// The listing URL wins when present; the normalized phone is only used for
/// records discovered without one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityKeys {
    /// Source listing URL.
    pub primary_key: Option<String>,
    /// Normalized phone number (E.164 when parseable, digits otherwise).
    pub fallback_key: Option<String>,
}

impl IdentityKeys {
    /// The single key the storage layer enforces uniqueness on.
    pub fn storage_key(&self) -> Option<String> {
        if let Some(url) = self.primary_key.as_deref().filter(|u| !u.trim().is_empty()) {
            return Some(format!("url:{}", url.trim()));
        }
        self.fallback_key
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(|p| format!("phone:{}", p))
    }
}

/// A (proxy, user agent) pair presented to the source for one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Proxy URL, or `None` for a direct connection.
    pub proxy: Option<String>,
    pub user_agent: String,
}

/// Raw response from a page fetch.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: String,
    pub status: u16,
    pub text: String,
}

impl FetchedPage {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

// ============ Business records ============

/// Fields pulled from a listing detail page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetailFields {
    pub phone: Option<String>,
    pub website: Option<String>,
    pub hours: Option<String>,
    pub category: Option<String>,
    pub location: Option<String>,
    pub rating: Option<f64>,
    pub review_count: Option<u32>,
}

impl DetailFields {
    /// Whether the extraction found anything worth persisting.
    pub fn is_populated(&self) -> bool {
        non_empty(&self.phone).is_some()
            || non_empty(&self.website).is_some()
            || non_empty(&self.hours).is_some()
            || non_empty(&self.category).is_some()
            || non_empty(&self.location).is_some()
            || self.rating.is_some()
            || self.review_count.is_some()
    }
}

/// Presence flags derived from a record's contact fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletenessFlags {
    pub has_phone: bool,
    pub has_website: bool,
    pub has_email: bool,
    pub has_hours: bool,
    pub has_rating: bool,
    pub has_reviews: bool,
}

impl CompletenessFlags {
    /// Complete means both phone and website are usable.
    pub fn is_complete(&self) -> bool {
        self.has_phone && self.has_website
    }
}

/// A business harvested from the map search, possibly enriched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BusinessRecord {
    pub name: String,
    pub listing_url: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub hours: Option<String>,
    pub category: Option<String>,
    pub location: Option<String>,
    pub rating: Option<f64>,
    pub review_count: Option<u32>,
    pub emails: Option<EnrichedEmailSet>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl BusinessRecord {
    pub fn new(name: impl Into<String>, listing_url: Option<String>) -> Self {
        Self {
            name: name.into(),
            listing_url,
            ..Default::default()
        }
    }

    /// Identity keys for this record, normalizing the phone against `default_region`.
    pub fn identity_keys(&self, default_region: &str) -> IdentityKeys {
        IdentityKeys {
            primary_key: non_empty(&self.listing_url).map(str::to_string),
            fallback_key: non_empty(&self.phone).and_then(|p| normalize_phone(p, default_region)),
        }
    }

    pub fn completeness(&self) -> CompletenessFlags {
        CompletenessFlags {
            has_phone: non_empty(&self.phone).is_some_and(|p| p.len() >= 6),
            has_website: non_empty(&self.website).is_some_and(|w| w.starts_with("http")),
            has_email: self.emails.as_ref().is_some_and(|set| !set.is_empty()),
            has_hours: non_empty(&self.hours).is_some(),
            has_rating: self.rating.is_some(),
            has_reviews: self.review_count.is_some_and(|n| n > 0),
        }
    }

    /// Applies freshly extracted detail fields. Non-empty values override,
    /// empty ones never erase what is already known.
    pub fn apply_detail(&mut self, detail: &DetailFields) {
        merge_text(&mut self.phone, &detail.phone);
        merge_text(&mut self.website, &detail.website);
        merge_text(&mut self.hours, &detail.hours);
        merge_text(&mut self.category, &detail.category);
        merge_text(&mut self.location, &detail.location);
        if detail.rating.is_some() {
            self.rating = detail.rating;
        }
        if detail.review_count.is_some() {
            self.review_count = detail.review_count;
        }
    }

    /// Folds `incoming` into this stored record.
    ///
    /// Contact fields follow the non-destructive rule of [`apply_detail`];
    /// the email set is replaced wholesale when the incoming record carries one.
    /// `created_at` is kept from the stored record.
    ///
    /// [`apply_detail`]: BusinessRecord::apply_detail
    pub fn merge_from(&mut self, incoming: &BusinessRecord) {
        if !incoming.name.trim().is_empty() {
            self.name = incoming.name.clone();
        }
        merge_text(&mut self.listing_url, &incoming.listing_url);
        self.apply_detail(&DetailFields {
            phone: incoming.phone.clone(),
            website: incoming.website.clone(),
            hours: incoming.hours.clone(),
            category: incoming.category.clone(),
            location: incoming.location.clone(),
            rating: incoming.rating,
            review_count: incoming.review_count,
        });
        if incoming.emails.is_some() {
            self.emails = incoming.emails.clone();
        }
        if self.created_at.is_none() {
            self.created_at = incoming.created_at;
        }
        self.updated_at = incoming.updated_at.or(self.updated_at);
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn merge_text(target: &mut Option<String>, incoming: &Option<String>) {
    if let Some(value) = non_empty(incoming) {
        *target = Some(value.to_string());
    }
}

// ============ Email discovery ============

/// How a candidate address was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailMethod {
    PatternSmtp,
    Scraped,
    Whois,
}

impl EmailMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmailMethod::PatternSmtp => "pattern_smtp",
            EmailMethod::Scraped => "scraped",
            EmailMethod::Whois => "whois",
        }
    }

    /// Tie-break rank when two sources report the same confidence.
    /// Higher wins: scraped > pattern_smtp > whois.
    pub fn precedence(&self) -> u8 {
        match self {
            EmailMethod::Scraped => 3,
            EmailMethod::PatternSmtp => 2,
            EmailMethod::Whois => 1,
        }
    }
}

/// SMTP verdict for one address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Deliverability {
    Deliverable,
    Undeliverable,
    Unknown,
}

impl ConfidencePriors {
    /// Confidence for a candidate, derived only from how it was found and
    /// what verification said about it.
    pub fn score(&self, method: EmailMethod, deliverability: Deliverability) -> u8 {
        let raw = match method {
            EmailMethod::Scraped => self.scraped,
            EmailMethod::Whois => self.whois,
            EmailMethod::PatternSmtp => match deliverability {
                Deliverability::Deliverable => self.pattern_smtp,
                Deliverability::Undeliverable => 0,
                Deliverability::Unknown => self.unknown,
            },
        };
        raw.min(100)
    }
}

/// Lowercased, trimmed form used for deduplication.
pub fn normalize_address(address: &str) -> String {
    address.trim().to_lowercase()
}

/// One candidate address. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailCandidate {
    address: String,
    method: EmailMethod,
    verified: bool,
    confidence: u8,
    pattern: Option<String>,
}

impl EmailCandidate {
    pub fn scored(
        address: &str,
        method: EmailMethod,
        deliverability: Deliverability,
        pattern: Option<String>,
        priors: &ConfidencePriors,
    ) -> Self {
        Self {
            address: normalize_address(address),
            method,
            verified: deliverability == Deliverability::Deliverable,
            confidence: priors.score(method, deliverability),
            pattern,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn method(&self) -> EmailMethod {
        self.method
    }

    pub fn verified(&self) -> bool {
        self.verified
    }

    pub fn confidence(&self) -> u8 {
        self.confidence
    }

    pub fn pattern(&self) -> Option<&str> {
        self.pattern.as_deref()
    }
}

/// Deduplicated, ranked candidates for one business. Replaced wholesale on every run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedEmailSet {
    emails: Vec<EmailCandidate>,
    email_enriched_at: DateTime<Utc>,
    enrichment_methods: Vec<EmailMethod>,
}

impl EnrichedEmailSet {
    pub(crate) fn from_ranked(
        emails: Vec<EmailCandidate>,
        enrichment_methods: Vec<EmailMethod>,
        email_enriched_at: DateTime<Utc>,
    ) -> Self {
        Self {
            emails,
            email_enriched_at,
            enrichment_methods,
        }
    }

    pub fn emails(&self) -> &[EmailCandidate] {
        &self.emails
    }

    pub fn email_enriched_at(&self) -> DateTime<Utc> {
        self.email_enriched_at
    }

    pub fn enrichment_methods(&self) -> &[EmailMethod] {
        &self.enrichment_methods
    }

    pub fn len(&self) -> usize {
        self.emails.len()
    }

    pub fn is_empty(&self) -> bool {
        self.emails.is_empty()
    }

    /// Highest-ranked address, if any.
    pub fn best(&self) -> Option<&EmailCandidate> {
        self.emails.first()
    }

    pub fn verified_count(&self) -> usize {
        self.emails.iter().filter(|e| e.verified()).count()
    }
}

/// Result of a single-document upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// The same document was already stored under this identity.
    Unchanged,
}
