use crate::{config, detail_page, listing_page, serve, NO_RESULTS};
use propcrawl_core::{output_file_name, CrawlError, HeaderProfile, WalkEnd};
use propcrawl_scrapers::{Crawler, HttpFetcher, SourceRules};
use std::path::Path;
use tempfile::tempdir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn read_csv(path: &Path) -> (Vec<String>, Vec<Vec<String>>) {
    let mut reader = csv::Reader::from_path(path).unwrap();
    let headers = reader.headers().unwrap().iter().map(str::to_string).collect();
    let rows = reader
        .records()
        .map(|row| row.unwrap().iter().map(str::to_string).collect())
        .collect();
    (headers, rows)
}

fn column(headers: &[String], name: &str) -> usize {
    headers.iter().position(|h| h == name).unwrap()
}

#[tokio::test]
async fn test_crawl_exports_every_listing() {
    let server = MockServer::start().await;
    serve(
        &server,
        "/venta/departamentos",
        listing_page(&["/venta/propiedad-1.html", "/venta/propiedad-2.html"]),
    )
    .await;
    serve(
        &server,
        "/venta/departamentos-pagina-2.html",
        listing_page(&["/venta/propiedad-2.html", "/venta/propiedad-3.html"]),
    )
    .await;
    serve(&server, "/venta/departamentos-pagina-3.html", NO_RESULTS.to_string()).await;
    serve(
        &server,
        "/venta/propiedad-1.html",
        detail_page(
            "Departamento en Palermo",
            "Av. Santa Fe 3200",
            Some(("LTM0LjU4ODk=", "LTU4LjQyMw==")),
        ),
    )
    .await;
    serve(
        &server,
        "/venta/propiedad-2.html",
        detail_page("Departamento en Belgrano", "Cabildo 2000", None),
    )
    .await;
    serve(
        &server,
        "/venta/propiedad-3.html",
        detail_page(
            "Departamento en Caballito",
            "Rivadavia 5000",
            Some(("not base64!", "LTU4LjQyMw==")),
        ),
    )
    .await;

    let config = config(&server, "");
    let source = config.source("demo").unwrap();
    let rules = SourceRules::compile(source).unwrap();
    let fetcher = HttpFetcher::new(&config.fetch, &config.profile_for(source).unwrap()).unwrap();
    let dir = tempdir().unwrap();
    let mut crawler = Crawler::from_config(&config, Some(dir.path().to_path_buf()), true).unwrap();

    let report = crawler.run_source(&rules, &fetcher).await.unwrap();

    assert_eq!(report.pages, 3);
    assert_eq!(report.discovered, 3);
    assert_eq!(report.records, 3);
    assert_eq!(report.failed_details, 0);
    assert_eq!(report.walk_end, Some(WalkEnd::EmptyPage { page: 3 }));

    let output = report.output.unwrap();
    assert_eq!(output, dir.path().join(output_file_name(&source.start_url)));

    let (headers, rows) = read_csv(&output);
    assert_eq!(
        &headers[..10],
        &[
            "url",
            "name",
            "description",
            "address",
            "price",
            "area",
            "property_type",
            "transaction_type",
            "latitude",
            "longitude"
        ]
    );
    assert_eq!(&headers[10..], &["characteristic:Ambientes", "characteristic:Cochera"]);
    assert_eq!(rows.len(), 3);

    let first = &rows[0];
    assert_eq!(first[column(&headers, "url")], format!("{}/venta/propiedad-1.html", server.uri()));
    assert_eq!(first[column(&headers, "name")], "Departamento en Palermo");
    assert_eq!(first[column(&headers, "description")], "");
    assert_eq!(first[column(&headers, "price")], "USD 42.000");
    assert_eq!(first[column(&headers, "area")], "48");
    assert_eq!(first[column(&headers, "transaction_type")], "sale");
    assert_eq!(first[column(&headers, "latitude")], "-34.5889");
    assert_eq!(first[column(&headers, "longitude")], "-58.423");
    assert_eq!(first[column(&headers, "characteristic:Ambientes")], "2");
    assert_eq!(first[column(&headers, "characteristic:Cochera")], "");

    // Malformed coordinates do not cost the rest of the record.
    let third = &rows[2];
    assert_eq!(third[column(&headers, "name")], "Departamento en Caballito");
    assert_eq!(third[column(&headers, "latitude")], "");
    assert_eq!(third[column(&headers, "longitude")], "-58.423");
}

#[tokio::test]
async fn test_listing_failure_still_exports_partial_results() {
    let server = MockServer::start().await;
    serve(
        &server,
        "/venta/departamentos",
        listing_page(&["/venta/propiedad-1.html", "/venta/propiedad-gone.html"]),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/venta/departamentos-pagina-2.html"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;
    serve(
        &server,
        "/venta/propiedad-1.html",
        detail_page("Departamento en Palermo", "Av. Santa Fe 3200", None),
    )
    .await;

    let config = config(&server, "");
    let source = config.source("demo").unwrap();
    let rules = SourceRules::compile(source).unwrap();
    let fetcher = HttpFetcher::new(&config.fetch, &config.profile_for(source).unwrap()).unwrap();
    let dir = tempdir().unwrap();
    let mut crawler = Crawler::from_config(&config, Some(dir.path().to_path_buf()), true).unwrap();

    let report = crawler.run_source(&rules, &fetcher).await.unwrap();

    assert_eq!(report.pages, 1);
    assert_eq!(report.records, 1);
    assert_eq!(report.failed_details, 1);
    let end = report.walk_end.as_ref().unwrap();
    assert!(!end.is_normal());
    assert!(matches!(end, WalkEnd::FetchFailed { page: 2, reason } if reason.contains("500")));

    let (_, rows) = read_csv(&report.output.unwrap());
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][1], "Departamento en Palermo");
}

#[tokio::test]
async fn test_profile_sends_headers_and_cookie_from_environment() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/venta/departamentos"))
        .and(header("accept-language", "es-AR"))
        .and(header("cookie", "sessionId=integration"))
        .respond_with(ResponseTemplate::new(200).set_body_string(NO_RESULTS))
        .expect(1)
        .mount(&server)
        .await;

    std::env::set_var("PROPCRAWL_INTEGRATION_COOKIE", "sessionId=integration");
    let config = config(
        &server,
        r#"
        [profiles.browser]
        cookie_env = "PROPCRAWL_INTEGRATION_COOKIE"
        headers = { accept-language = "es-AR" }
        "#,
    );
    let mut source = config.source("demo").unwrap().clone();
    source.profile = Some("browser".to_string());

    let rules = SourceRules::compile(&source).unwrap();
    let fetcher = HttpFetcher::new(&config.fetch, &config.profile_for(&source).unwrap()).unwrap();
    let dir = tempdir().unwrap();
    let mut crawler = Crawler::from_config(&config, Some(dir.path().to_path_buf()), false).unwrap();

    let report = crawler.run_source(&rules, &fetcher).await.unwrap();
    assert_eq!(report.walk_end, Some(WalkEnd::EmptyPage { page: 1 }));
    assert_eq!(report.records, 0);
}

#[test]
fn test_missing_cookie_variable_fails_before_any_request() {
    let profile = HeaderProfile {
        cookie_env: Some("PROPCRAWL_INTEGRATION_UNSET_COOKIE".to_string()),
        ..HeaderProfile::default()
    };
    let result = HttpFetcher::new(&Default::default(), &profile);
    assert!(matches!(result, Err(CrawlError::Config(_))));
}

#[tokio::test]
async fn test_geocodes_listings_without_coordinates() {
    let server = MockServer::start().await;
    serve(
        &server,
        "/venta/departamentos",
        listing_page(&["/venta/propiedad-1.html", "/venta/propiedad-2.html"]),
    )
    .await;
    serve(&server, "/venta/departamentos-pagina-2.html", NO_RESULTS.to_string()).await;
    serve(
        &server,
        "/venta/propiedad-1.html",
        detail_page("Con mapa", "Av. Santa Fe 3200", Some(("LTM0LjU4ODk=", "LTU4LjQyMw=="))),
    )
    .await;
    serve(
        &server,
        "/venta/propiedad-2.html",
        detail_page("Sin mapa", "Cabildo 2000, Belgrano", None),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!([{"lat": "-34.5627", "lon": "-58.4566"}])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let extra = format!(
        r#"
        [geocode]
        enabled = true
        endpoint = "{}/search"
        timeout_secs = 2
        retry_delay_ms = 1
        min_interval_ms = 0
        "#,
        server.uri()
    );
    let mut config = config(&server, &extra);
    config.sources[0].geocode = true;
    let source = config.source("demo").unwrap();
    let rules = SourceRules::compile(source).unwrap();
    let fetcher = HttpFetcher::new(&config.fetch, &config.profile_for(source).unwrap()).unwrap();
    let dir = tempdir().unwrap();
    let mut crawler = Crawler::from_config(&config, Some(dir.path().to_path_buf()), true).unwrap();

    let report = crawler.run_source(&rules, &fetcher).await.unwrap();
    assert_eq!(report.records, 2);
    assert_eq!(report.geocoded, 1);

    let (headers, rows) = read_csv(&report.output.unwrap());
    let lat = column(&headers, "latitude");
    assert_eq!(rows[0][lat], "-34.5889");
    assert_eq!(rows[1][lat], "-34.5627");
}
