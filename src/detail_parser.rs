use crate::errors::AppError;
use crate::models::DetailFields;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

/// Turns a fetched listing page into detail fields.
///
/// Extraction is pure CPU work on an already fetched page, so it is sync.
pub trait DetailExtractor: Send + Sync {
    fn extract(&self, page: &str) -> Result<DetailFields, AppError>;
}

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("detail page selector is hardcoded and valid")
}

static WEBSITE: Lazy<Vec<Selector>> = Lazy::new(|| {
    vec![
        selector("a[data-item-id='authority']"),
        selector("a[href^='http'][aria-label*='Website']"),
        selector("a.CsEnBe[href^='http']"),
    ]
});

static PHONE: Lazy<Vec<Selector>> = Lazy::new(|| {
    vec![
        selector("button[data-item-id*='phone']"),
        selector("a[href^='tel:']"),
    ]
});

static HOURS: Lazy<Selector> = Lazy::new(|| selector("div[aria-label*='Hours'], table.eK4R0e"));
static CATEGORY: Lazy<Selector> = Lazy::new(|| selector("button[jsaction*='category'], span.DkEaL"));
static ADDRESS: Lazy<Selector> = Lazy::new(|| selector("button[data-item-id='address']"));
static RATING: Lazy<Selector> = Lazy::new(|| selector("div.F7nice span[aria-hidden='true'], span.MW4etd"));
static REVIEWS: Lazy<Selector> = Lazy::new(|| selector("span[aria-label*='review'], span.UY7F9"));

static DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\d,.]+").expect("digit regex is hardcoded and valid"));

/// Default extractor for map listing detail pages.
#[derive(Debug, Clone, Copy, Default)]
pub struct MapsDetailParser;

impl MapsDetailParser {
    pub fn new() -> Self {
        Self
    }
}

impl DetailExtractor for MapsDetailParser {
    fn extract(&self, page: &str) -> Result<DetailFields, AppError> {
        let document = Html::parse_document(page);

        let website = WEBSITE
            .iter()
            .flat_map(|sel| document.select(sel))
            .filter_map(|el| el.value().attr("href"))
            .find(|href| !href.contains("google.com"))
            .map(str::to_string);

        let phone = PHONE
            .iter()
            .flat_map(|sel| document.select(sel))
            .find_map(|el| {
                let text = element_text(&el);
                if text.is_empty() {
                    el.value()
                        .attr("href")
                        .and_then(|h| h.strip_prefix("tel:"))
                        .map(str::to_string)
                } else {
                    Some(text)
                }
            });

        let rating = document
            .select(&RATING)
            .next()
            .map(|el| element_text(&el).replace(',', "."))
            .and_then(|text| text.parse::<f64>().ok())
            .filter(|r| (0.0..=5.0).contains(r));

        let review_count = document
            .select(&REVIEWS)
            .next()
            .map(|el| {
                el.value()
                    .attr("aria-label")
                    .map(str::to_string)
                    .unwrap_or_else(|| element_text(&el))
            })
            .and_then(|text| parse_count(&text));

        Ok(DetailFields {
            phone,
            website,
            hours: first_text(&document, &HOURS),
            category: first_text(&document, &CATEGORY),
            location: first_text(&document, &ADDRESS),
            rating,
            review_count,
        })
    }
}

fn element_text(el: &ElementRef<'_>) -> String {
    el.text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn first_text(document: &Html, sel: &Selector) -> Option<String> {
    document
        .select(sel)
        .next()
        .map(|el| {
            el.value()
                .attr("aria-label")
                .map(str::to_string)
                .unwrap_or_else(|| element_text(&el))
        })
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn parse_count(text: &str) -> Option<u32> {
    let raw = DIGITS.find(text)?.as_str();
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}
