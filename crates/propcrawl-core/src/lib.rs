use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::OnceLock;
use tracing::warn;
use url::Url;

pub mod config;
mod display;
mod export;
mod report;

pub use config::{
    CharacteristicsRule, Config, Decode, FetchConfig, GeocodeConfig, HeaderProfile, Keywords,
    ListingSelectors, ListingSource, Pagination, PaginationKind, Strategy,
};
pub use display::{create_report_table, create_source_table, format_record};
pub use export::{output_file_name, TabularExporter};
pub use report::{RunReport, WalkEnd};

pub type Result<T> = std::result::Result<T, CrawlError>;

#[derive(Debug, thiserror::Error)]
pub enum CrawlError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid selector '{selector}': {reason}")]
    Selector { selector: String, reason: String },
    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("Unknown source: {0}")]
    UnknownSource(String),
    #[error("Unknown header profile: {0}")]
    UnknownProfile(String),
    #[error("Scraping error: {0}")]
    Scraping(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

/// The standard columns every record carries, in evaluation and export order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Name,
    Description,
    Address,
    Price,
    Area,
    PropertyType,
    TransactionType,
    Latitude,
    Longitude,
}

impl Field {
    pub const ALL: [Field; 9] = [
        Field::Name,
        Field::Description,
        Field::Address,
        Field::Price,
        Field::Area,
        Field::PropertyType,
        Field::TransactionType,
        Field::Latitude,
        Field::Longitude,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Name => "name",
            Field::Description => "description",
            Field::Address => "address",
            Field::Price => "price",
            Field::Area => "area",
            Field::PropertyType => "property_type",
            Field::TransactionType => "transaction_type",
            Field::Latitude => "latitude",
            Field::Longitude => "longitude",
        }
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Field {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Field::ALL
            .iter()
            .find(|field| field.as_str() == s)
            .copied()
            .ok_or_else(|| format!("Unknown field: {}", s))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Buy,
    Sale,
    Rent,
    Unknown,
}

impl TransactionType {
    /// Classify free text scraped from a page. Keywords only count as whole
    /// words; anything without one is `Unknown`.
    pub fn classify(text: &str) -> Self {
        if let Ok(exact) = text.parse() {
            return exact;
        }

        transaction_keywords()
            .iter()
            .find(|(_, pattern)| pattern.is_match(text))
            .map(|(kind, _)| *kind)
            .unwrap_or(TransactionType::Unknown)
    }
}

/// Keyword patterns in priority order. Rent comes first: "for rent or sale"
/// style labels list the rental offer first.
fn transaction_keywords() -> &'static [(TransactionType, Regex)] {
    static KEYWORDS: OnceLock<Vec<(TransactionType, Regex)>> = OnceLock::new();
    KEYWORDS.get_or_init(|| {
        [
            (
                TransactionType::Rent,
                r"(?i)\b(?:alquiler(?:es)?|alquila|rent|rental|rentals|to let|kiray\w*|arriendo)\b",
            ),
            (
                TransactionType::Sale,
                r"(?i)\b(?:ventas?|vende|sale|sales|sell|vente|satış|satılır)\b",
            ),
            (TransactionType::Buy, r"(?i)\b(?:compra|buy|achat|purchase)\b"),
        ]
        .into_iter()
        .map(|(kind, pattern)| (kind, Regex::new(pattern).expect("static pattern compiles")))
        .collect()
    })
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionType::Buy => write!(f, "buy"),
            TransactionType::Sale => write!(f, "sale"),
            TransactionType::Rent => write!(f, "rent"),
            TransactionType::Unknown => write!(f, "unknown"),
        }
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "buy" | "compra" | "purchase" => Ok(TransactionType::Buy),
            "sale" | "sell" | "venta" | "vente" => Ok(TransactionType::Sale),
            "rent" | "rental" | "alquiler" => Ok(TransactionType::Rent),
            "unknown" => Ok(TransactionType::Unknown),
            _ => Err(format!(
                "Invalid transaction type: {}. Valid options are: buy, sale, rent, unknown",
                s
            )),
        }
    }
}

/// One scraped listing. Every standard field is always present; absence is `None`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PropertyRecord {
    pub url: Url,
    pub name: Option<String>,
    pub description: Option<String>,
    pub address: Option<String>,
    pub price: Option<String>,
    pub area: Option<String>,
    pub property_type: Option<String>,
    pub transaction_type: Option<TransactionType>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub characteristics: BTreeMap<String, String>,
    pub extras: BTreeMap<String, String>,
}

impl PropertyRecord {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            name: None,
            description: None,
            address: None,
            price: None,
            area: None,
            property_type: None,
            transaction_type: None,
            latitude: None,
            longitude: None,
            characteristics: BTreeMap::new(),
            extras: BTreeMap::new(),
        }
    }

    /// Store a raw extracted value. Coordinates that do not parse are dropped
    /// with a warning; returns whether the value was kept.
    pub fn set(&mut self, field: Field, value: String) -> bool {
        match field {
            Field::Name => self.name = Some(value),
            Field::Description => self.description = Some(value),
            Field::Address => self.address = Some(value),
            Field::Price => self.price = Some(value),
            Field::Area => self.area = Some(value),
            Field::PropertyType => self.property_type = Some(value),
            Field::TransactionType => {
                self.transaction_type = Some(TransactionType::classify(&value))
            }
            Field::Latitude | Field::Longitude => match value.trim().parse::<f64>() {
                Ok(coordinate) if coordinate.is_finite() => {
                    if field == Field::Latitude {
                        self.latitude = Some(coordinate);
                    } else {
                        self.longitude = Some(coordinate);
                    }
                }
                _ => {
                    warn!("Discarding unparsable {} '{}' for {}", field, value, self.url);
                    return false;
                }
            },
        }
        true
    }

    pub fn get(&self, field: Field) -> Option<String> {
        match field {
            Field::Name => self.name.clone(),
            Field::Description => self.description.clone(),
            Field::Address => self.address.clone(),
            Field::Price => self.price.clone(),
            Field::Area => self.area.clone(),
            Field::PropertyType => self.property_type.clone(),
            Field::TransactionType => self.transaction_type.map(|t| t.to_string()),
            Field::Latitude => self.latitude.map(|v| v.to_string()),
            Field::Longitude => self.longitude.map(|v| v.to_string()),
        }
    }

    pub fn has_coordinates(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some()
    }
}
