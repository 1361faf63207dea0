use crate::extract::FieldExtractor;
use crate::fetch::Fetch;
use crate::geocode::{GeocodeEnricher, NominatimLookup};
use crate::pagination::{ListingPlan, PaginationWalker};
use propcrawl_core::{
    Config, CrawlError, ListingSource, PropertyRecord, Result, RunReport, TabularExporter,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Everything compiled from one source's configuration.
pub struct SourceRules {
    pub name: String,
    pub start_url: Url,
    pub geocode: bool,
    pub plan: ListingPlan,
    pub extractor: FieldExtractor,
}

impl SourceRules {
    pub fn compile(source: &ListingSource) -> Result<Self> {
        Ok(Self {
            name: source.name.clone(),
            start_url: source.start_url.clone(),
            geocode: source.geocode,
            plan: ListingPlan::compile(source)?,
            extractor: FieldExtractor::compile(source)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Start,
    WalkPages,
    ExtractDetails,
    Export,
    Done,
}

/// Runs sources one at a time: walk pages, extract each listing, export.
pub struct Crawler {
    exporter: TabularExporter,
    geocoder: Option<GeocodeEnricher>,
    request_delay: Duration,
}

impl Crawler {
    pub fn new(exporter: TabularExporter) -> Self {
        Self {
            exporter,
            geocoder: None,
            request_delay: Duration::ZERO,
        }
    }

    /// Build a crawler from configuration. Geocoding is wired in only when
    /// enabled in the file and not switched off by the caller.
    pub fn from_config(
        config: &Config,
        output_dir: Option<PathBuf>,
        geocode: bool,
    ) -> Result<Self> {
        let output_dir = output_dir.unwrap_or_else(|| config.output_dir.clone());
        let exporter = TabularExporter::new(output_dir);
        let mut crawler = Self::new(exporter)
            .with_request_delay(Duration::from_millis(config.fetch.request_delay_ms));

        if geocode && config.geocode.enabled {
            let lookup = NominatimLookup::new(&config.geocode)?;
            let geocoder = GeocodeEnricher::new(Box::new(lookup), &config.geocode);
            crawler = crawler.with_geocoder(geocoder);
        }
        Ok(crawler)
    }

    pub fn with_geocoder(mut self, geocoder: GeocodeEnricher) -> Self {
        self.geocoder = Some(geocoder);
        self
    }

    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }

    pub fn exporter(&self) -> &TabularExporter {
        &self.exporter
    }

    async fn pause(&self) {
        if !self.request_delay.is_zero() {
            tokio::time::sleep(self.request_delay).await;
        }
    }

    pub async fn run_source(
        &mut self,
        rules: &SourceRules,
        fetcher: &dyn Fetch,
    ) -> Result<RunReport> {
        let mut report = RunReport::new(rules.name.clone());
        let mut walker = PaginationWalker::new(fetcher, &rules.plan).with_delay(self.request_delay);
        let mut pending: Vec<Url> = Vec::new();
        let mut records: Vec<PropertyRecord> = Vec::new();
        let mut state = RunState::Start;

        while state != RunState::Done {
            debug!("Source {} entering {:?}", rules.name, state);
            state = match state {
                RunState::Start => {
                    info!("Crawling {} from {}", rules.name, rules.start_url);
                    RunState::WalkPages
                }
                RunState::WalkPages => match walker.next_page().await {
                    Some(page) => {
                        debug!("Page {} ({}) had {} cards", page.number, page.url, page.cards);
                        report.pages += 1;
                        pending = page.detail_urls;
                        RunState::ExtractDetails
                    }
                    None => RunState::Export,
                },
                RunState::ExtractDetails => {
                    for url in std::mem::take(&mut pending) {
                        self.pause().await;
                        match fetcher.fetch(&url).await {
                            Ok(body) => {
                                let mut record = rules.extractor.extract(&body, &url);
                                if rules.geocode {
                                    if let Some(geocoder) = self.geocoder.as_mut() {
                                        if geocoder.enrich(&mut record).await {
                                            report.geocoded += 1;
                                        }
                                    }
                                }
                                debug!("Extracted {:?} from {}", record.name, url);
                                records.push(record);
                            }
                            Err(e) => {
                                warn!("Skipping listing: {}", e);
                                report.failed_details += 1;
                            }
                        }
                    }
                    if walker.end().is_some() {
                        RunState::Export
                    } else {
                        RunState::WalkPages
                    }
                }
                RunState::Export => {
                    report.discovered = walker.discovered();
                    report.walk_end = walker.end().cloned();
                    report.records = records.len();
                    report.output = Some(self.exporter.export(&rules.start_url, &records)?);
                    RunState::Done
                }
                RunState::Done => RunState::Done,
            };
        }

        report.finish();
        info!(
            "Finished {}: {} records from {} pages ({} failed) in {}s",
            report.source,
            report.records,
            report.pages,
            report.failed_details,
            report.elapsed_secs()
        );
        Ok(report)
    }
}

/// Fetch and extract a single detail page.
pub async fn extract_detail(
    rules: &SourceRules,
    fetcher: &dyn Fetch,
    url: &Url,
) -> Result<PropertyRecord> {
    let body = fetcher
        .fetch(url)
        .await
        .map_err(|e| CrawlError::Scraping(e.to_string()))?;
    Ok(rules.extractor.extract(&body, url))
}
