//! Best-effort rate extraction from the bank's HTML.
//!
//! The page has no published contract. Extraction runs three passes and
//! keeps the first hit per currency: inline scripts, visible body text,
//! then form inputs tagged with the currency. Every value must fall in the
//! currency's plausible range.

use crate::core::rate::{Currency, RatePair};
use regex::Regex;
use rust_decimal::Decimal;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::LazyLock;

static SCRIPT: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("script").expect("valid selector"));

static TITLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("valid selector"));

static TAGGED_INPUT: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("input[id], input[class]").expect("valid selector"));

/// Elements whose text never reaches the reader.
const HIDDEN: [&str; 4] = ["script", "style", "noscript", "template"];

struct CurrencyPatterns {
    pair: Regex,
    single: Regex,
}

static PATTERNS: LazyLock<Vec<(Currency, CurrencyPatterns)>> = LazyLock::new(|| {
    Currency::ALL
        .iter()
        .map(|currency| {
            let code = currency.code();
            let number = r"(\d{1,2}\.\d{1,4})";
            let gap = r"[^0-9]{0,120}?";
            let patterns = CurrencyPatterns {
                pair: Regex::new(&format!(r"(?i)\b{code}\b{gap}{number}{gap}{number}"))
                    .expect("valid regex"),
                single: Regex::new(&format!(r"(?i)\b{code}\b{gap}{number}"))
                    .expect("valid regex"),
            };
            (*currency, patterns)
        })
        .collect()
});

pub type RateTable = HashMap<Currency, RatePair>;

pub fn extract_rates(html: &str) -> RateTable {
    let document = Html::parse_document(html);
    let mut rates = RateTable::new();

    for script in document.select(&SCRIPT) {
        let source: String = script.text().collect();
        scan_text(&source, &mut rates, false);
    }

    let text = element_text(document.root_element());
    scan_text(&text, &mut rates, true);

    scan_inputs(&document, &mut rates);
    rates
}

fn parse_rate(raw: &str) -> Option<Decimal> {
    Decimal::from_str(raw).ok()
}

fn scan_text(text: &str, rates: &mut RateTable, allow_single: bool) {
    for (currency, patterns) in PATTERNS.iter() {
        if rates.contains_key(currency) {
            continue;
        }
        let pair = patterns.pair.captures_iter(text).find_map(|caps| {
            let a = parse_rate(&caps[1])?;
            let b = parse_rate(&caps[2])?;
            (currency.is_plausible(a) && currency.is_plausible(b))
                .then(|| RatePair::from_unordered(a, b))
        });
        let pair = pair.or_else(|| {
            if !allow_single {
                return None;
            }
            patterns.single.captures_iter(text).find_map(|caps| {
                let rate = parse_rate(&caps[1])?;
                currency
                    .is_plausible(rate)
                    .then(|| RatePair::new(rate, rate))
            })
        });
        if let Some(pair) = pair {
            rates.insert(*currency, pair);
        }
    }
}

/// Currency an input's `id`/`class` names, if any.
fn tagged_currency(marker: &str, rate: Decimal) -> Option<Currency> {
    Currency::ALL.into_iter().find(|currency| {
        let code = currency.code().to_ascii_lowercase();
        let tagged =
            marker.contains(&code) || (*currency == Currency::Usd && marker.contains("dollar"));
        tagged && currency.is_plausible(rate)
    })
}

fn scan_inputs(document: &Html, rates: &mut RateTable) {
    for input in document.select(&TAGGED_INPUT) {
        let element = input.value();
        let Some(rate) = element.attr("value").and_then(numeric_value) else {
            continue;
        };
        let marker = [element.attr("id"), element.attr("class")]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ")
            .to_ascii_lowercase();
        // One input carries one rate, so it tags at most one currency.
        let Some(currency) = tagged_currency(&marker, rate) else {
            continue;
        };
        if !rates.contains_key(&currency) {
            // A lone input only shows one side; assume the usual 2% spread.
            let sell = (rate * Decimal::new(102, 2)).round_dp(4);
            rates.insert(currency, RatePair::new(rate, sell));
        }
    }
}

fn numeric_value(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    Decimal::from_str(&cleaned).ok()
}

/// Text under `root`, skipping hidden elements, whitespace collapsed.
fn element_text(root: ElementRef<'_>) -> String {
    let mut words = Vec::new();
    for node in root.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|parent| {
            parent
                .value()
                .as_element()
                .is_some_and(|el| HIDDEN.contains(&el.name()))
        });
        if !hidden {
            words.extend(text.split_whitespace());
        }
    }
    words.join(" ")
}

/// Page text with markup, scripts and styles removed and whitespace
/// collapsed.
pub fn visible_text(html: &str) -> String {
    element_text(Html::parse_document(html).root_element())
}

/// Text content of an HTML fragment.
pub fn strip_tags(s: &str) -> String {
    element_text(Html::parse_fragment(s).root_element())
}

pub fn page_title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    document
        .select(&TITLE)
        .next()
        .map(element_text)
        .filter(|title| !title.is_empty())
}
