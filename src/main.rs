use clap::{Args, Parser, Subcommand};
use propcrawl_core::config::DEFAULT_CONFIG_PATH;
use propcrawl_core::{
    create_report_table, create_source_table, format_record, Config, CrawlError, Result,
};
use propcrawl_scrapers::{extract_detail, Crawler, HttpFetcher, SourceRules};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use url::Url;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file (-c, --config)
    #[arg(short = 'c', long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise (-v, --verbose)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl listing sources and export one CSV per source
    #[command(long_about = "Walk the listing pages of every configured source (or only the named ones), extract each listing and write one CSV file per source.")]
    Crawl(CrawlCommand),

    /// Extract a single detail page and print the record
    #[command(long_about = "Fetch one listing detail page with a source's headers and rules, and print the extracted record.")]
    Extract(ExtractCommand),

    /// List configured sources
    Sources,
}

#[derive(Args)]
struct CrawlCommand {
    /// Only crawl these sources (-s, --source). Can be specified multiple times.
    #[arg(short = 's', long = "source", num_args = 1.., value_delimiter = ',')]
    sources: Vec<String>,

    /// Output directory, overrides the configured one (-o, --output-dir)
    #[arg(short = 'o', long)]
    output_dir: Option<PathBuf>,

    /// Skip geocoding even where a source enables it
    #[arg(long)]
    no_geocode: bool,
}

#[derive(Args)]
struct ExtractCommand {
    /// Source whose rules apply to the page (-s, --source)
    #[arg(short = 's', long)]
    source: String,

    /// Print the record as JSON
    #[arg(long)]
    json: bool,

    /// Detail page URL
    url: Url,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = Config::load(&cli.config)?;

    match cli.command {
        Commands::Crawl(cmd) => crawl(&config, cmd).await,
        Commands::Extract(cmd) => {
            let source = config.source(&cmd.source)?;
            let rules = SourceRules::compile(source)?;
            let fetcher = HttpFetcher::new(&config.fetch, &config.profile_for(source)?)?;

            let record = extract_detail(&rules, &fetcher, &cmd.url).await?;
            if cmd.json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                print!("{}", format_record(&record));
            }
            Ok(())
        }
        Commands::Sources => {
            println!("{}", create_source_table(&config.sources));
            Ok(())
        }
    }
}

async fn crawl(config: &Config, cmd: CrawlCommand) -> Result<()> {
    let selected = if cmd.sources.is_empty() {
        config.sources.iter().collect::<Vec<_>>()
    } else {
        cmd.sources
            .iter()
            .map(|name| config.source(name))
            .collect::<Result<Vec<_>>>()?
    };
    if selected.is_empty() {
        return Err(CrawlError::Config("no sources configured".to_string()));
    }

    // Compile every rule and build every client before the first request.
    let mut jobs = Vec::with_capacity(selected.len());
    for source in selected {
        let rules = SourceRules::compile(source)?;
        let fetcher = HttpFetcher::new(&config.fetch, &config.profile_for(source)?)?;
        jobs.push((rules, fetcher));
    }

    let mut crawler = Crawler::from_config(config, cmd.output_dir, !cmd.no_geocode)?;
    info!(
        "Crawling {} source(s) into {}",
        jobs.len(),
        crawler.exporter().output_dir().display()
    );

    let mut reports = Vec::new();
    let mut failures = 0;
    for (rules, fetcher) in &jobs {
        match crawler.run_source(rules, fetcher).await {
            Ok(report) => reports.push(report),
            Err(e) => {
                error!("Source {} failed: {}", rules.name, e);
                failures += 1;
            }
        }
    }

    println!("{}", create_report_table(&reports));
    if failures > 0 {
        return Err(CrawlError::Scraping(format!("{} source(s) failed", failures)));
    }
    Ok(())
}
