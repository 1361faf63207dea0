use async_trait::async_trait;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use propcrawl_core::{Config, TabularExporter};
use propcrawl_scrapers::{Fetch, FetchError, FieldExtractor, ListingPlan, PaginationWalker};
use std::collections::HashMap;
use std::time::Duration;
use tokio::runtime::Runtime;
use url::Url;

const RULES: &str = r#"
[[sources]]
name = "bench"
start_url = "https://listings.example.com/search"

[sources.listing]
card = "div.card"
link = "a"

[sources.fields]
name = [{ kind = "css", selector = "meta[property='og:title']", attr = "content" }]
address = [{ kind = "css", selector = "div.location h4" }]
price = [
    { kind = "css", selector = "span.missing" },
    { kind = "css", selector = "div.price-value span" },
]
area = [{ kind = "regex", selector = "h2.title-type", pattern = '(\d+)\s?m²' }]
transaction_type = [
    { kind = "url_keyword", keywords = [["alquiler", "rent"], ["venta", "sale"]] },
    { kind = "field_keyword", field = "name", keywords = [["alquiler", "rent"], ["venta", "sale"]] },
    { kind = "constant", value = "unknown" },
]
latitude = [{ kind = "script", pattern = 'mapLatOf = "([^"]+)"', decode = "base64" }]
longitude = [{ kind = "script", pattern = 'mapLngOf = "([^"]+)"', decode = "base64" }]

[sources.characteristics]
item = "li.feature"
label_selector = "i"
label_attr = "class"
strip_prefix = "icon-"
"#;

fn detail_page(features: usize) -> String {
    let items: String = (0..features)
        .map(|i| format!(r#"<li class="feature"><i class="icon-f{}"></i> {} m²</li>"#, i, i * 10))
        .collect();
    format!(
        r#"<html><head>
            <meta property="og:title" content="Departamento en Venta en Palermo">
            <script>const mapLatOf = "LTM0LjU4ODk="; const mapLngOf = "LTU4LjQyMw==";</script>
        </head><body>
            <h2 class="title-type">Departamento · 52 m² · 2 amb.</h2>
            <div class="price-value"><span>USD 45.000</span></div>
            <div class="location"><h4>Av. Santa Fe 3200, Palermo</h4></div>
            <ul>{}</ul>
        </body></html>"#,
        items
    )
}

struct MemoryFetcher {
    pages: HashMap<String, String>,
}

#[async_trait]
impl Fetch for MemoryFetcher {
    async fn fetch(&self, url: &Url) -> Result<String, FetchError> {
        self.pages.get(url.as_str()).cloned().ok_or_else(|| FetchError::Terminal {
            url: url.to_string(),
            reason: "HTTP 404 Not Found".to_string(),
        })
    }
}

fn listing_site(pages: u32, cards_per_page: u32) -> MemoryFetcher {
    let mut site = HashMap::new();
    for page in 1..=pages {
        let cards: String = (0..cards_per_page)
            .map(|card| format!(r#"<div class="card"><a href="/p/{}-{}">x</a></div>"#, page, card))
            .collect();
        site.insert(
            format!("https://listings.example.com/search?page={}", page),
            format!("<html><body>{}</body></html>", cards),
        );
    }
    site.insert(
        format!("https://listings.example.com/search?page={}", pages + 1),
        "<html><body></body></html>".to_string(),
    );
    MemoryFetcher { pages: site }
}

fn bench_extraction(c: &mut Criterion) {
    let config: Config = RULES.parse().unwrap();
    let extractor = FieldExtractor::compile(config.source("bench").unwrap()).unwrap();
    let url = Url::parse("https://listings.example.com/venta/p/1").unwrap();

    let mut group = c.benchmark_group("extraction");
    for features in [0, 10, 100].iter() {
        let html = detail_page(*features);
        group.bench_with_input(BenchmarkId::new("detail_page", features), &html, |b, html| {
            b.iter(|| black_box(extractor.extract(html, &url)));
        });
    }
    group.finish();
}

fn bench_pagination(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let config: Config = RULES.parse().unwrap();
    let plan = ListingPlan::compile(config.source("bench").unwrap()).unwrap();

    let mut group = c.benchmark_group("pagination");
    group.sample_size(20);
    group.measurement_time(Duration::from_secs(10));

    for pages in [10, 50].iter() {
        let site = listing_site(*pages, 20);
        group.bench_with_input(BenchmarkId::new("walk", pages), &site, |b, site| {
            b.to_async(&rt).iter(|| async {
                let mut walker = PaginationWalker::new(site, &plan);
                let mut urls = 0;
                while let Some(page) = walker.next_page().await {
                    urls += page.detail_urls.len();
                }
                black_box(urls)
            });
        });
    }
    group.finish();
}

fn bench_export(c: &mut Criterion) {
    let config: Config = RULES.parse().unwrap();
    let extractor = FieldExtractor::compile(config.source("bench").unwrap()).unwrap();
    let html = detail_page(10);
    let start_url = Url::parse("https://listings.example.com/search").unwrap();
    let dir = tempfile::tempdir().unwrap();
    let exporter = TabularExporter::new(dir.path());

    let mut group = c.benchmark_group("export");
    group.sample_size(20);
    for size in [10, 1000].iter() {
        let records: Vec<_> = (0..*size)
            .map(|i| {
                let url = format!("https://listings.example.com/venta/p/{}", i);
                let url = Url::parse(&url).unwrap();
                extractor.extract(&html, &url)
            })
            .collect();
        group.bench_with_input(BenchmarkId::new("csv", size), &records, |b, records| {
            b.iter(|| black_box(exporter.export(&start_url, records).unwrap()));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_extraction, bench_pagination, bench_export);
criterion_main!(benches);
