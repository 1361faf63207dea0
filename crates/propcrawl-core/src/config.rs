//! TOML configuration: sources, header profiles, fetch and geocoder settings.
//!
//! Secrets such as session cookies are never stored in the file itself;
//! a profile names the environment variable that holds them.

use crate::export::CHARACTERISTIC_PREFIX;
use crate::{CrawlError, Field, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use url::Url;

pub const DEFAULT_CONFIG_PATH: &str = "propcrawl.toml";

/// Ordered `(keyword, value)` pairs; the first keyword found wins.
pub type Keywords = Vec<(String, String)>;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub geocode: GeocodeConfig,
    #[serde(default)]
    pub profiles: BTreeMap<String, HeaderProfile>,
    #[serde(default)]
    pub sources: Vec<ListingSource>,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub backoff_cap_ms: u64,
    /// Courtesy pause between consecutive requests
    pub request_delay_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 3,
            backoff_ms: 500,
            backoff_cap_ms: 8_000,
            request_delay_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeocodeConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub user_agent: String,
    pub timeout_secs: u64,
    pub retry_delay_ms: u64,
    pub min_interval_ms: u64,
}

impl Default for GeocodeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "https://nominatim.openstreetmap.org/search".to_string(),
            user_agent: format!("propcrawl/{}", env!("CARGO_PKG_VERSION")),
            timeout_secs: 10,
            retry_delay_ms: 2_000,
            min_interval_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HeaderProfile {
    pub headers: BTreeMap<String, String>,
    /// Literal cookie header. Prefer `cookie_env` for anything session-bound.
    pub cookie: Option<String>,
    /// Name of the environment variable holding the cookie header.
    pub cookie_env: Option<String>,
}

impl HeaderProfile {
    pub fn resolve_cookie(&self) -> Result<Option<String>> {
        if let Some(var) = &self.cookie_env {
            return match std::env::var(var) {
                Ok(value) if !value.trim().is_empty() => Ok(Some(value)),
                _ => Err(CrawlError::Config(format!(
                    "cookie environment variable {} is not set",
                    var
                ))),
            };
        }
        Ok(self.cookie.clone())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListingSource {
    pub name: String,
    pub start_url: Url,
    /// Base for joining relative links; defaults to `start_url`.
    #[serde(default)]
    pub origin: Option<Url>,
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub geocode: bool,
    #[serde(default)]
    pub pagination: Pagination,
    pub listing: ListingSelectors,
    #[serde(default)]
    pub fields: BTreeMap<String, Vec<Strategy>>,
    #[serde(default)]
    pub characteristics: Option<CharacteristicsRule>,
}

impl ListingSource {
    pub fn base_url(&self) -> &Url {
        self.origin.as_ref().unwrap_or(&self.start_url)
    }

    /// Standard field rules in evaluation order, followed by extras sorted by name.
    pub fn ordered_rules(&self) -> (Vec<(Field, &[Strategy])>, Vec<(&str, &[Strategy])>) {
        let standard = Field::ALL
            .iter()
            .filter_map(|field| {
                self.fields
                    .get(field.as_str())
                    .map(|rules| (*field, rules.as_slice()))
            })
            .collect();
        let extras = self
            .fields
            .iter()
            .filter(|(name, _)| Field::from_str(name).is_err())
            .map(|(name, rules)| (name.as_str(), rules.as_slice()))
            .collect();
        (standard, extras)
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaginationKind {
    #[default]
    QueryParam,
    Template,
    NextLink,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Pagination {
    pub style: PaginationKind,
    /// Query parameter carrying the page number (`query_param`).
    pub param: String,
    /// URL with a `{page}` placeholder (`template`).
    pub template: Option<String>,
    /// Selector of the next-page link (`next_link`).
    pub next_selector: Option<String>,
    pub next_attr: String,
    /// Fetch the bare start URL for the first page instead of numbering it.
    pub first_page_bare: bool,
    pub start_page: u32,
    pub end_page: Option<u32>,
    pub max_consecutive_empty: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            style: PaginationKind::QueryParam,
            param: "page".to_string(),
            template: None,
            next_selector: None,
            next_attr: "href".to_string(),
            first_page_bare: false,
            start_page: 1,
            end_page: None,
            max_consecutive_empty: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListingSelectors {
    /// One element per listing card.
    pub card: String,
    /// Link inside the card; the card itself when absent.
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default = "default_href")]
    pub attr: String,
}

fn default_href() -> String {
    "href".to_string()
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Decode {
    #[default]
    None,
    Base64,
}

/// One way of obtaining a field value from a detail page.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Strategy {
    Css {
        selector: String,
        #[serde(default)]
        attr: Option<String>,
    },
    Regex {
        #[serde(default)]
        selector: Option<String>,
        pattern: String,
    },
    UrlKeyword {
        keywords: Keywords,
    },
    FieldKeyword {
        field: Field,
        keywords: Keywords,
    },
    TextKeyword {
        selector: String,
        keywords: Keywords,
    },
    Script {
        pattern: String,
        #[serde(default)]
        decode: Decode,
    },
    Json {
        selector: String,
        pointer: String,
    },
    Constant {
        value: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct CharacteristicsRule {
    pub item: String,
    #[serde(default)]
    pub label_selector: Option<String>,
    #[serde(default)]
    pub label_attr: Option<String>,
    #[serde(default)]
    pub strip_prefix: Option<String>,
    #[serde(default)]
    pub separator: Option<String>,
}

impl FromStr for Config {
    type Err = CrawlError;

    fn from_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            CrawlError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        content.parse()
    }

    fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for source in &self.sources {
            if !names.insert(source.name.as_str()) {
                return Err(CrawlError::Config(format!(
                    "duplicate source name: {}",
                    source.name
                )));
            }
            if let Some(reserved) = source
                .fields
                .keys()
                .find(|name| *name == "url" || name.starts_with(CHARACTERISTIC_PREFIX))
            {
                return Err(CrawlError::Config(format!(
                    "source {}: field name {} is reserved for export columns",
                    source.name, reserved
                )));
            }
            if let Some(profile) = &source.profile {
                if !self.profiles.contains_key(profile) {
                    return Err(CrawlError::UnknownProfile(profile.clone()));
                }
            }
            let pagination = &source.pagination;
            match pagination.style {
                PaginationKind::Template => {
                    let template = pagination.template.as_deref().unwrap_or_default();
                    if !template.contains("{page}") {
                        return Err(CrawlError::Config(format!(
                            "source {}: template pagination needs a template containing {{page}}",
                            source.name
                        )));
                    }
                }
                PaginationKind::NextLink if pagination.next_selector.is_none() => {
                    return Err(CrawlError::Config(format!(
                        "source {}: next_link pagination needs next_selector",
                        source.name
                    )));
                }
                _ => {}
            }
            if pagination.max_consecutive_empty == 0 {
                return Err(CrawlError::Config(format!(
                    "source {}: max_consecutive_empty must be at least 1",
                    source.name
                )));
            }
        }
        Ok(())
    }

    pub fn source(&self, name: &str) -> Result<&ListingSource> {
        self.sources
            .iter()
            .find(|source| source.name == name)
            .ok_or_else(|| CrawlError::UnknownSource(name.to_string()))
    }

    pub fn profile_for(&self, source: &ListingSource) -> Result<HeaderProfile> {
        match &source.profile {
            Some(name) => self
                .profiles
                .get(name)
                .cloned()
                .ok_or_else(|| CrawlError::UnknownProfile(name.clone())),
            None => Ok(HeaderProfile::default()),
        }
    }
}
