use crate::models::BusinessRecord;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

/// Search endpoint used when no base URL is configured.
pub const DEFAULT_SEARCH_BASE_URL: &str = "https://www.google.com/maps";

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("search page selector is hardcoded and valid")
}

// Tried in order; the first selector with any match defines the cards.
static CARDS: Lazy<Vec<Selector>> = Lazy::new(|| {
    vec![
        selector("div.Nv2PK"),
        selector("div[role='article']"),
        selector("div.section-result"),
        selector("a.hfpxzc"),
    ]
});

static NAME: Lazy<Vec<Selector>> = Lazy::new(|| {
    vec![
        selector("div.qBF1Pd"),
        selector("div.fontHeadlineSmall"),
        selector("span.OSrXXb"),
    ]
});

static NAMED_LINK: Lazy<Selector> = Lazy::new(|| selector("a[aria-label]"));
static LISTING_LINK: Lazy<Selector> = Lazy::new(|| selector("a[href*='/maps/place/']"));
static RATING: Lazy<Selector> =
    Lazy::new(|| selector("span.MW4etd, span[role='img'][aria-label*='stars']"));
static REVIEWS: Lazy<Selector> = Lazy::new(|| selector("span.UY7F9, span[aria-label*='reviews']"));
static PHONE: Lazy<Selector> = Lazy::new(|| selector("span.UsdlK, [data-item-id*='phone']"));
static DETAIL_LINES: Lazy<Selector> = Lazy::new(|| selector("div.W4Efsd > span"));

static RATING_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+(?:[.,]\d+)?").expect("rating regex is hardcoded and valid"));
static REVIEW_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d[\d,.]*)\s*reviews?").expect("review regex is hardcoded and valid")
});

/// Search page URL for `query` in `location` under `base_url`.
///
/// Both terms are form-encoded, so spaces become `+`.
pub fn search_url(base_url: &str, query: &str, location: &str) -> String {
    let encode =
        |term: &str| url::form_urlencoded::byte_serialize(term.trim().as_bytes()).collect::<String>();
    format!(
        "{}/search/{}+in+{}/",
        base_url.trim_end_matches('/'),
        encode(query),
        encode(location)
    )
}

/// Businesses listed on a search results page.
///
/// Relative listing links are resolved against `page_url`. Cards without
/// a name and without a listing link are skipped.
pub fn parse_cards(page: &str, page_url: &str) -> Vec<BusinessRecord> {
    let document = Html::parse_document(page);
    let base = url::Url::parse(page_url).ok();

    let Some(cards) = CARDS
        .iter()
        .map(|sel| document.select(sel).collect::<Vec<_>>())
        .find(|found| !found.is_empty())
    else {
        return Vec::new();
    };

    cards
        .into_iter()
        .filter_map(|card| parse_card(card, base.as_ref()))
        .collect()
}

fn parse_card(card: ElementRef<'_>, base: Option<&url::Url>) -> Option<BusinessRecord> {
    let name = NAME
        .iter()
        .flat_map(|sel| card.select(sel))
        .map(|el| element_text(&el))
        .find(|text| !text.is_empty())
        .or_else(|| named_link(card));

    let listing_url = listing_href(card).and_then(|href| absolute(href, base));

    if name.is_none() && listing_url.is_none() {
        return None;
    }

    let phone = card
        .select(&PHONE)
        .map(|el| element_text(&el))
        .find(|text| !text.is_empty());

    let rating = card
        .select(&RATING)
        .filter_map(|el| {
            let text = element_text(&el);
            let source = if text.is_empty() {
                el.value().attr("aria-label").unwrap_or_default().to_string()
            } else {
                text
            };
            RATING_NUMBER
                .find(&source)
                .and_then(|m| m.as_str().replace(',', ".").parse::<f64>().ok())
        })
        .find(|r| (0.0..=5.0).contains(r));

    let review_count = card.select(&REVIEWS).find_map(|el| {
        let text = element_text(&el);
        let source = if text.is_empty() {
            // "4.2 stars 18 reviews": only the number before "reviews" counts.
            let label = el.value().attr("aria-label").unwrap_or_default();
            REVIEW_LABEL.captures(label)?.get(1)?.as_str().to_string()
        } else {
            text
        };
        let digits: String = source.chars().filter(|c| c.is_ascii_digit()).collect();
        digits.parse::<u32>().ok()
    });

    // Detail lines read "category", then "address"; the phone can share them.
    let lines: Vec<String> = card
        .select(&DETAIL_LINES)
        .map(|el| {
            element_text(&el)
                .trim_matches(|c: char| c == '·' || c.is_whitespace())
                .to_string()
        })
        .filter(|line| !line.is_empty() && Some(line) != phone.as_ref())
        .collect();
    let category = lines.first().cloned();
    let location = lines.get(1).cloned();

    let mut record = BusinessRecord::new(name.unwrap_or_default(), listing_url);
    record.phone = phone;
    record.rating = rating;
    record.review_count = review_count;
    record.category = category;
    record.location = location;
    Some(record)
}

fn named_link(card: ElementRef<'_>) -> Option<String> {
    let own = card
        .value()
        .attr("aria-label")
        .filter(|_| card.value().name() == "a");
    own.or_else(|| {
        card.select(&NAMED_LINK)
            .next()
            .and_then(|el| el.value().attr("aria-label"))
    })
    .map(|label| label.trim().to_string())
    .filter(|label| !label.is_empty())
}

fn listing_href(card: ElementRef<'_>) -> Option<&str> {
    // A card may itself be the listing anchor.
    let own = card
        .value()
        .attr("href")
        .filter(|href| card.value().name() == "a" && href.contains("/maps/place/"));
    own.or_else(|| {
        card.select(&LISTING_LINK)
            .next()
            .and_then(|el| el.value().attr("href"))
    })
}

fn absolute(href: &str, base: Option<&url::Url>) -> Option<String> {
    let href = href.trim();
    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(href.to_string());
    }
    base.and_then(|b| b.join(href).ok()).map(|u| u.to_string())
}

fn element_text(el: &ElementRef<'_>) -> String {
    el.text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
