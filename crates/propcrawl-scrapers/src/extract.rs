//! Declarative field extraction for detail pages.
//!
//! Each field owns a [`PriorityChain`] of extractors tried in declared order;
//! the first non-empty value wins. Nothing in here fails a page: a missing
//! element or a malformed payload simply leaves the field empty.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use propcrawl_core::{
    CharacteristicsRule, CrawlError, Decode, Field, Keywords, ListingSource, PropertyRecord,
    Result, Strategy,
};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;
use tracing::{debug, warn};
use url::Url;

pub(crate) fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| CrawlError::Selector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}

/// Collapse runs of whitespace and drop literal `<br>` markup left in attributes.
pub(crate) fn clean_text(text: &str) -> String {
    text.replace("<br />", " ")
        .replace("<br/>", " ")
        .replace("<br>", " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub(crate) fn element_text(element: ElementRef) -> String {
    clean_text(&element.text().collect::<String>())
}

fn match_keywords(haystack: &str, keywords: &Keywords) -> Option<String> {
    let haystack = haystack.to_lowercase();
    keywords
        .iter()
        .find(|(keyword, _)| haystack.contains(&keyword.to_lowercase()))
        .map(|(_, value)| value.clone())
}

fn first_capture(pattern: &Regex, haystack: &str) -> Option<String> {
    let captures = pattern.captures(haystack)?;
    captures
        .get(1)
        .or_else(|| captures.get(0))
        .map(|m| m.as_str().to_string())
}

/// What an extractor can see while resolving one field.
pub struct Page<'a> {
    pub document: &'a Html,
    pub url: &'a Url,
    /// Fields resolved so far, in evaluation order.
    pub resolved: &'a PropertyRecord,
}

pub trait Extract {
    fn extract(&self, page: &Page<'_>) -> Option<String>;
}

/// Ordered fallbacks for one field: the first non-empty result wins.
pub struct PriorityChain<E> {
    steps: Vec<E>,
}

impl<E: Extract> PriorityChain<E> {
    pub fn new(steps: Vec<E>) -> Self {
        Self { steps }
    }

    pub fn resolve(&self, page: &Page<'_>) -> Option<String> {
        self.steps.iter().enumerate().find_map(|(index, step)| {
            let value = step.extract(page).map(|raw| clean_text(&raw))?;
            if value.is_empty() {
                return None;
            }
            debug!("Strategy #{} matched on {}", index + 1, page.url);
            Some(value)
        })
    }
}

/// A compiled [`Strategy`].
#[derive(Debug)]
pub enum Extractor {
    Css { selector: Selector, attr: Option<String> },
    Regex { selector: Option<Selector>, pattern: Regex },
    UrlKeyword { keywords: Keywords },
    FieldKeyword { field: Field, keywords: Keywords },
    TextKeyword { selector: Selector, keywords: Keywords },
    Script { scripts: Selector, pattern: Regex, decode: Decode },
    Json { selector: Selector, pointer: String },
    Constant { value: String },
}

impl Extractor {
    pub fn compile(strategy: &Strategy) -> Result<Self> {
        Ok(match strategy {
            Strategy::Css { selector, attr } => Extractor::Css {
                selector: parse_selector(selector)?,
                attr: attr.clone(),
            },
            Strategy::Regex { selector, pattern } => Extractor::Regex {
                selector: selector.as_deref().map(parse_selector).transpose()?,
                pattern: Regex::new(pattern)?,
            },
            Strategy::UrlKeyword { keywords } => Extractor::UrlKeyword {
                keywords: keywords.clone(),
            },
            Strategy::FieldKeyword { field, keywords } => Extractor::FieldKeyword {
                field: *field,
                keywords: keywords.clone(),
            },
            Strategy::TextKeyword { selector, keywords } => Extractor::TextKeyword {
                selector: parse_selector(selector)?,
                keywords: keywords.clone(),
            },
            Strategy::Script { pattern, decode } => Extractor::Script {
                scripts: parse_selector("script")?,
                pattern: Regex::new(pattern)?,
                decode: *decode,
            },
            Strategy::Json { selector, pointer } => Extractor::Json {
                selector: parse_selector(selector)?,
                pointer: pointer.clone(),
            },
            Strategy::Constant { value } => Extractor::Constant {
                value: value.clone(),
            },
        })
    }
}

impl Extract for Extractor {
    fn extract(&self, page: &Page<'_>) -> Option<String> {
        match self {
            Extractor::Css { selector, attr } => page
                .document
                .select(selector)
                .filter_map(|element| match attr {
                    Some(attr) => element.value().attr(attr).map(clean_text),
                    None => Some(element_text(element)),
                })
                .find(|value| !value.is_empty()),
            Extractor::Regex { selector, pattern } => {
                let haystack = match selector {
                    Some(selector) => element_text(page.document.select(selector).next()?),
                    None => element_text(page.document.root_element()),
                };
                first_capture(pattern, &haystack)
            }
            Extractor::UrlKeyword { keywords } => match_keywords(page.url.as_str(), keywords),
            Extractor::FieldKeyword { field, keywords } => {
                match_keywords(&page.resolved.get(*field)?, keywords)
            }
            Extractor::TextKeyword { selector, keywords } => {
                let element = page.document.select(selector).next()?;
                match_keywords(&element_text(element), keywords)
            }
            Extractor::Script {
                scripts,
                pattern,
                decode,
            } => {
                let captured = page
                    .document
                    .select(scripts)
                    .find_map(|script| first_capture(pattern, &script.text().collect::<String>()))?;
                match decode {
                    Decode::None => Some(captured),
                    Decode::Base64 => decode_base64(&captured, page.url),
                }
            }
            Extractor::Json { selector, pointer } => {
                let element = page.document.select(selector).next()?;
                json_value(&element.text().collect::<String>(), pointer, page.url)
            }
            Extractor::Constant { value } => Some(value.clone()),
        }
    }
}

fn decode_base64(encoded: &str, url: &Url) -> Option<String> {
    let bytes = match BASE64.decode(encoded.trim()) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Malformed base64 payload '{}' on {}: {}", encoded, url, e);
            return None;
        }
    };
    match String::from_utf8(bytes) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!("Decoded payload on {} is not UTF-8: {}", url, e);
            None
        }
    }
}

fn json_value(payload: &str, pointer: &str, url: &Url) -> Option<String> {
    let document: serde_json::Value = match serde_json::from_str(payload.trim()) {
        Ok(value) => value,
        Err(e) => {
            warn!("Malformed inline JSON on {}: {}", url, e);
            return None;
        }
    };
    match document.pointer(pointer)? {
        serde_json::Value::Null => None,
        serde_json::Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

/// Collects a page's feature list into label/value pairs.
#[derive(Debug)]
pub struct CharacteristicsExtractor {
    item: Selector,
    label: Option<Selector>,
    label_attr: Option<String>,
    strip_prefix: Option<String>,
    separator: String,
}

impl CharacteristicsExtractor {
    pub fn compile(rule: &CharacteristicsRule) -> Result<Self> {
        Ok(Self {
            item: parse_selector(&rule.item)?,
            label: rule.label_selector.as_deref().map(parse_selector).transpose()?,
            label_attr: rule.label_attr.clone(),
            strip_prefix: rule.strip_prefix.clone(),
            separator: rule.separator.clone().unwrap_or_else(|| ":".to_string()),
        })
    }

    fn label_for(&self, item: ElementRef) -> Option<String> {
        let element = item.select(self.label.as_ref()?).next()?;
        let raw = match &self.label_attr {
            // Class-like attributes carry several tokens; the first one names the feature.
            Some(attr) => element.value().attr(attr)?.split_whitespace().next()?.to_string(),
            None => element_text(element),
        };
        let label = match &self.strip_prefix {
            Some(prefix) => raw.strip_prefix(prefix.as_str()).unwrap_or(raw.as_str()).to_string(),
            None => raw,
        };
        (!label.is_empty()).then_some(label)
    }

    pub fn extract(&self, document: &Html) -> BTreeMap<String, String> {
        let mut characteristics = BTreeMap::new();
        for item in document.select(&self.item) {
            let text = element_text(item);
            if let Some(label) = self.label_for(item) {
                characteristics.insert(label, text);
            } else if let Some((label, value)) = text.split_once(self.separator.as_str()) {
                characteristics.insert(label.trim().to_string(), value.trim().to_string());
            } else if !text.is_empty() {
                characteristics.insert(text, String::new());
            }
        }
        characteristics
    }
}

/// Turns one detail page into a [`PropertyRecord`] using a source's rules.
pub struct FieldExtractor {
    standard: Vec<(Field, PriorityChain<Extractor>)>,
    extras: Vec<(String, PriorityChain<Extractor>)>,
    characteristics: Option<CharacteristicsExtractor>,
}

fn compile_chain(strategies: &[Strategy]) -> Result<PriorityChain<Extractor>> {
    let steps = strategies
        .iter()
        .map(Extractor::compile)
        .collect::<Result<Vec<_>>>()?;
    Ok(PriorityChain::new(steps))
}

impl FieldExtractor {
    pub fn compile(source: &ListingSource) -> Result<Self> {
        let (standard_rules, extra_rules) = source.ordered_rules();

        let standard = standard_rules
            .into_iter()
            .map(|(field, strategies)| Ok((field, compile_chain(strategies)?)))
            .collect::<Result<Vec<_>>>()?;
        let extras = extra_rules
            .into_iter()
            .map(|(name, strategies)| Ok((name.to_string(), compile_chain(strategies)?)))
            .collect::<Result<Vec<_>>>()?;
        let characteristics = source
            .characteristics
            .as_ref()
            .map(CharacteristicsExtractor::compile)
            .transpose()?;

        Ok(Self {
            standard,
            extras,
            characteristics,
        })
    }

    pub fn extract(&self, html: &str, url: &Url) -> PropertyRecord {
        let document = Html::parse_document(html);
        let mut record = PropertyRecord::new(url.clone());

        for (field, chain) in &self.standard {
            let value = chain.resolve(&Page {
                document: &document,
                url,
                resolved: &record,
            });
            match value {
                Some(value) => {
                    record.set(*field, value);
                }
                None => debug!("No value for {} on {}", field, url),
            }
        }

        for (name, chain) in &self.extras {
            let value = chain.resolve(&Page {
                document: &document,
                url,
                resolved: &record,
            });
            if let Some(value) = value {
                record.extras.insert(name.clone(), value);
            }
        }

        if let Some(characteristics) = &self.characteristics {
            record.characteristics = characteristics.extract(&document);
        }

        record
    }
}
