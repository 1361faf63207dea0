use crate::extract::parse_selector;
use crate::fetch::Fetch;
use propcrawl_core::{CrawlError, ListingSource, PaginationKind, Result, WalkEnd};
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug)]
enum PageStyle {
    QueryParam { param: String },
    Template { template: String },
    NextLink { selector: Selector, attr: String },
}

/// Compiled listing-index rules of one source.
#[derive(Debug)]
pub struct ListingPlan {
    start_url: Url,
    base: Url,
    card: Selector,
    link: Option<Selector>,
    attr: String,
    style: PageStyle,
    first_page_bare: bool,
    start_page: u32,
    end_page: Option<u32>,
    max_consecutive_empty: u32,
}

/// What a listing page contained, independent of what was seen before.
#[derive(Debug, Default)]
struct ParsedListing {
    cards: usize,
    links: Vec<Url>,
    next: Option<Url>,
}

impl ListingPlan {
    pub fn compile(source: &ListingSource) -> Result<Self> {
        let pagination = &source.pagination;
        let style = match pagination.style {
            PaginationKind::QueryParam => PageStyle::QueryParam {
                param: pagination.param.clone(),
            },
            PaginationKind::Template => PageStyle::Template {
                template: pagination.template.clone().unwrap_or_default(),
            },
            PaginationKind::NextLink => {
                let selector = pagination.next_selector.as_deref().ok_or_else(|| {
                    CrawlError::Config(format!("source {}: missing next_selector", source.name))
                })?;
                PageStyle::NextLink {
                    selector: parse_selector(selector)?,
                    attr: pagination.next_attr.clone(),
                }
            }
        };

        let plan = Self {
            start_url: source.start_url.clone(),
            base: source.base_url().clone(),
            card: parse_selector(&source.listing.card)?,
            link: source.listing.link.as_deref().map(parse_selector).transpose()?,
            attr: source.listing.attr.clone(),
            style,
            first_page_bare: pagination.first_page_bare,
            start_page: pagination.start_page,
            end_page: pagination.end_page,
            max_consecutive_empty: pagination.max_consecutive_empty.max(1),
        };

        // Surface a template that cannot produce a URL before any request goes out.
        if !matches!(plan.style, PageStyle::NextLink { .. }) {
            plan.page_url(plan.start_page.saturating_add(1))?;
        }
        Ok(plan)
    }

    /// URL of a numbered page. Not used for next-link pagination past the first page.
    pub fn page_url(&self, page: u32) -> Result<Url> {
        if page == self.start_page && self.first_page_bare {
            return Ok(self.start_url.clone());
        }
        match &self.style {
            PageStyle::QueryParam { param } => {
                let mut url = self.start_url.clone();
                let retained: Vec<(String, String)> = url
                    .query_pairs()
                    .filter(|(key, _)| key != param)
                    .map(|(key, value)| (key.into_owned(), value.into_owned()))
                    .collect();
                url.query_pairs_mut()
                    .clear()
                    .extend_pairs(retained)
                    .append_pair(param, &page.to_string());
                Ok(url)
            }
            PageStyle::Template { template } => {
                let rendered = template.replace("{page}", &page.to_string());
                Ok(self.base.join(&rendered)?)
            }
            PageStyle::NextLink { .. } => Ok(self.start_url.clone()),
        }
    }

    fn resolve_link(&self, href: &str) -> Option<Url> {
        let href = href.trim();
        if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
            return None;
        }
        let mut url = self.base.join(href).ok()?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return None;
        }
        url.set_fragment(None);
        Some(url)
    }

    fn parse(&self, body: &str) -> ParsedListing {
        let document = Html::parse_document(body);
        let mut parsed = ParsedListing::default();

        for card in document.select(&self.card) {
            parsed.cards += 1;
            let target = match &self.link {
                Some(link) => card.select(link).next(),
                None => Some(card),
            };
            let href = target.and_then(|element| element.value().attr(&self.attr));
            match href.and_then(|href| self.resolve_link(href)) {
                Some(url) => parsed.links.push(url),
                None => debug!("Listing card without a usable link"),
            }
        }

        if let PageStyle::NextLink { selector, attr } = &self.style {
            parsed.next = document
                .select(selector)
                .find_map(|element| element.value().attr(attr))
                .and_then(|href| self.resolve_link(href));
        }

        parsed
    }
}

/// One fetched listing page and the detail URLs first seen on it.
#[derive(Debug, Clone)]
pub struct ListingPage {
    pub number: u32,
    pub url: Url,
    pub cards: usize,
    pub detail_urls: Vec<Url>,
}

/// Walks a source's listing index one page at a time.
///
/// The walk is lazy and single-use: once it ends, `next_page` keeps
/// returning `None` and `end` says why it stopped.
pub struct PaginationWalker<'a> {
    fetcher: &'a dyn Fetch,
    plan: &'a ListingPlan,
    page: u32,
    pending: Option<Url>,
    visited: HashSet<Url>,
    seen: HashSet<Url>,
    empty_streak: u32,
    delay: Duration,
    end: Option<WalkEnd>,
}

impl<'a> PaginationWalker<'a> {
    pub fn new(fetcher: &'a dyn Fetch, plan: &'a ListingPlan) -> Self {
        Self {
            fetcher,
            plan,
            page: plan.start_page,
            pending: Some(plan.start_url.clone()),
            visited: HashSet::new(),
            seen: HashSet::new(),
            empty_streak: 0,
            delay: Duration::ZERO,
            end: None,
        }
    }

    /// Pause between listing page requests.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn end(&self) -> Option<&WalkEnd> {
        self.end.as_ref()
    }

    /// Number of distinct detail URLs yielded so far.
    pub fn discovered(&self) -> usize {
        self.seen.len()
    }

    fn finish(&mut self, end: WalkEnd) {
        info!("Pagination finished: {}", end);
        self.end = Some(end);
    }

    fn current_url(&mut self, number: u32) -> std::result::Result<Url, String> {
        match self.plan.style {
            PageStyle::NextLink { .. } => self
                .pending
                .take()
                .ok_or_else(|| "no page left to visit".to_string()),
            _ => self.plan.page_url(number).map_err(|e| e.to_string()),
        }
    }

    pub async fn next_page(&mut self) -> Option<ListingPage> {
        if self.end.is_some() {
            return None;
        }
        let number = self.page;

        let url = match self.current_url(number) {
            Ok(url) => url,
            Err(reason) => {
                self.finish(WalkEnd::FetchFailed { page: number, reason });
                return None;
            }
        };

        if !self.visited.is_empty() && !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.visited.insert(url.clone());

        info!("Scraping page {}: {}", number, url);
        let body = match self.fetcher.fetch(&url).await {
            Ok(body) => body,
            Err(e) => {
                warn!("Stopping pagination: {}", e);
                self.finish(WalkEnd::FetchFailed {
                    page: number,
                    reason: e.to_string(),
                });
                return None;
            }
        };

        let parsed = self.plan.parse(&body);
        let detail_urls: Vec<Url> = parsed
            .links
            .into_iter()
            .filter(|link| self.seen.insert(link.clone()))
            .collect();
        info!(
            "Page {}: {} cards, {} new listing URLs",
            number,
            parsed.cards,
            detail_urls.len()
        );

        if detail_urls.is_empty() {
            self.empty_streak += 1;
        } else {
            self.empty_streak = 0;
        }

        if parsed.cards == 0 {
            self.finish(WalkEnd::EmptyPage { page: number });
        } else if self.empty_streak >= self.plan.max_consecutive_empty {
            self.finish(WalkEnd::ConsecutiveEmpty {
                page: number,
                count: self.empty_streak,
            });
        } else if self.plan.end_page.is_some_and(|end| number >= end) {
            self.finish(WalkEnd::PageLimit { page: number });
        } else if let PageStyle::NextLink { .. } = self.plan.style {
            match parsed.next {
                Some(next) if !self.visited.contains(&next) => self.pending = Some(next),
                _ => self.finish(WalkEnd::NoNextLink { page: number }),
            }
        }

        self.page = number.saturating_add(1);
        Some(ListingPage {
            number,
            url,
            cards: parsed.cards,
            detail_urls,
        })
    }
}
