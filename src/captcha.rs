use once_cell::sync::Lazy;
use scraper::{Html, Selector};

/// Phrases that only appear on challenge / interstitial pages.
const CHALLENGE_PHRASES: &[&str] = &[
    "unusual traffic",
    "our systems have detected",
    "automated requests",
    "verify you're not a robot",
    "verify you are not a robot",
    "verify you are human",
    "verify you're human",
    "please complete the captcha",
    "not a robot",
];

static CHALLENGE_WIDGET: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(
        "iframe[src*='recaptcha'], iframe[src*='captcha'], iframe[src*='hcaptcha'], \
         iframe[src*='challenges.cloudflare.com'], div.g-recaptcha, div.h-captcha, \
         div#captcha, div.cf-turnstile",
    )
    .expect("challenge widget selector is hardcoded and valid")
});

static CHALLENGE_FORM: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(
        "form[action*='CaptchaRedirect'], form[action*='captcha'], form#captcha-form, \
         input[name='captcha']",
    )
    .expect("challenge form selector is hardcoded and valid")
});

/// Stateless classifier: does this rendered page demand proof of humanity?
///
/// Checks run in order (challenge iframe or widget, challenge form, known
/// phrases) and the first hit wins. A miss only costs a retry later, so the
/// phrase list is kept narrow to hold false positives down.
#[derive(Debug, Clone, Copy, Default)]
pub struct CaptchaSignal;

impl CaptchaSignal {
    pub fn new() -> Self {
        Self
    }

    /// Returns true when the page is a challenge instead of content.
    pub fn is_blocked(&self, page: &str) -> bool {
        self.detect(page).is_some()
    }

    /// Like [`is_blocked`](Self::is_blocked) but names the indicator that matched.
    pub fn detect(&self, page: &str) -> Option<&'static str> {
        let document = Html::parse_document(page);

        if document.select(&CHALLENGE_WIDGET).next().is_some() {
            return Some("challenge widget");
        }
        if document.select(&CHALLENGE_FORM).next().is_some() {
            return Some("challenge form");
        }

        let lowered = page.to_lowercase();
        CHALLENGE_PHRASES
            .iter()
            .find(|phrase| lowered.contains(*phrase))
            .copied()
    }
}
