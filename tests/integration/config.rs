use propcrawl_core::{Config, CrawlError, PaginationKind, Strategy};
use propcrawl_scrapers::SourceRules;
use std::io::Write;
use tempfile::NamedTempFile;

const EXAMPLE: &str = include_str!("../../propcrawl.example.toml");

#[test]
fn test_example_configuration_compiles() {
    let config: Config = EXAMPLE.parse().unwrap();
    assert_eq!(config.sources.len(), 2);
    assert!(config.geocode.enabled);

    for source in &config.sources {
        SourceRules::compile(source).unwrap();
    }

    let zonaprop = config.source("zonaprop-departamentos").unwrap();
    assert_eq!(zonaprop.pagination.style, PaginationKind::NextLink);
    assert_eq!(zonaprop.fields["transaction_type"].len(), 5);
    assert_eq!(
        zonaprop.fields["transaction_type"].last(),
        Some(&Strategy::Constant {
            value: "unknown".to_string()
        })
    );

    // Session cookies live in the environment, not in the file.
    let profile = config.profile_for(zonaprop).unwrap();
    assert!(profile.cookie.is_none());
    assert_eq!(profile.cookie_env.as_deref(), Some("PROPCRAWL_ZONAPROP_COOKIE"));
}

#[test]
fn test_load_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(EXAMPLE.as_bytes()).unwrap();

    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.output_dir.to_str(), Some("output"));
    assert_eq!(config.fetch.request_delay_ms, 1500);
}

#[test]
fn test_missing_file_is_a_config_error() {
    let result = Config::load("/nonexistent/propcrawl.toml");
    assert!(matches!(result, Err(CrawlError::Config(_))));
}

#[test]
fn test_invalid_regex_fails_before_crawling() {
    let config: Config = r#"
        [[sources]]
        name = "broken"
        start_url = "https://listings.example.com/"

        [sources.listing]
        card = "div.card"

        [sources.fields]
        area = [{ kind = "regex", pattern = '(\d+ m²' }]
    "#
    .parse()
    .unwrap();

    let result = SourceRules::compile(config.source("broken").unwrap());
    assert!(matches!(result, Err(CrawlError::Pattern(_))));
}

#[test]
fn test_unknown_source_name() {
    let config: Config = EXAMPLE.parse().unwrap();
    assert!(matches!(
        config.source("missing"),
        Err(CrawlError::UnknownSource(name)) if name == "missing"
    ));
}
