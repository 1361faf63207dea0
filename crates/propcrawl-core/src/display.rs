use crate::{Field, ListingSource, PropertyRecord, RunReport};
use colored::Colorize;
use tabled::settings::{object::Columns, Modify, Style, Width};
use tabled::{Table, Tabled};

#[derive(Tabled)]
pub struct ReportTableRow {
    #[tabled(rename = "Source")]
    pub source: String,
    #[tabled(rename = "Pages", display_with = "display_right_5")]
    pub pages: String,
    #[tabled(rename = "Listings", display_with = "display_right_8")]
    pub discovered: String,
    #[tabled(rename = "Records", display_with = "display_right_8")]
    pub records: String,
    #[tabled(rename = "Failed", display_with = "display_right_5")]
    pub failed: String,
    #[tabled(rename = "Geocoded", display_with = "display_right_8")]
    pub geocoded: String,
    #[tabled(rename = "Ended")]
    pub ended: String,
    #[tabled(rename = "Output")]
    pub output: String,
}

#[derive(Tabled)]
pub struct SourceTableRow {
    #[tabled(rename = "Name")]
    pub name: String,
    #[tabled(rename = "Start URL")]
    pub start_url: String,
    #[tabled(rename = "Pagination")]
    pub pagination: String,
    #[tabled(rename = "Fields", display_with = "display_right_5")]
    pub fields: String,
    #[tabled(rename = "Geocode")]
    pub geocode: String,
}

fn display_right_5(s: &str) -> String {
    format!("{:>5}", s)
}

fn display_right_8(s: &str) -> String {
    format!("{:>8}", s)
}

impl ReportTableRow {
    pub fn from_report(report: &RunReport) -> Self {
        Self {
            source: report.source.clone(),
            pages: report.pages.to_string(),
            discovered: report.discovered.to_string(),
            records: report.records.to_string(),
            failed: report.failed_details.to_string(),
            geocoded: report.geocoded.to_string(),
            ended: report
                .walk_end
                .as_ref()
                .map(|end| end.to_string())
                .unwrap_or_else(|| "N/A".to_string()),
            output: report
                .output
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "not written".to_string()),
        }
    }
}

impl SourceTableRow {
    pub fn from_source(source: &ListingSource) -> Self {
        let pagination = &source.pagination;
        let range = match pagination.end_page {
            Some(end) => format!("{}..={}", pagination.start_page, end),
            None => format!("{}..", pagination.start_page),
        };
        Self {
            name: source.name.clone(),
            start_url: source.start_url.to_string(),
            pagination: format!("{:?} {}", pagination.style, range),
            fields: source.fields.len().to_string(),
            geocode: if source.geocode { "yes" } else { "no" }.to_string(),
        }
    }
}

pub fn create_report_table(reports: &[RunReport]) -> String {
    let rows: Vec<ReportTableRow> = reports.iter().map(ReportTableRow::from_report).collect();

    let mut table = Table::new(&rows);
    table
        .with(Style::modern())
        .with(Modify::new(Columns::single(0)).with(Width::truncate(24)))
        .with(Modify::new(Columns::single(6)).with(Width::wrap(32)))
        .with(Modify::new(Columns::single(7)).with(Width::wrap(48)));

    table.to_string()
}

pub fn create_source_table(sources: &[ListingSource]) -> String {
    let rows: Vec<SourceTableRow> = sources.iter().map(SourceTableRow::from_source).collect();

    let mut table = Table::new(&rows);
    table
        .with(Style::modern())
        .with(Modify::new(Columns::single(1)).with(Width::wrap(60)));

    table.to_string()
}

/// Human readable rendering of one record for the terminal.
pub fn format_record(record: &PropertyRecord) -> String {
    let mut result = String::new();

    result.push_str(&format!(
        "{}\n{}\n",
        record.name.as_deref().unwrap_or("(no name)").bold(),
        record.url.as_str().dimmed()
    ));

    for field in Field::ALL.iter().skip(1) {
        let value = record
            .get(*field)
            .unwrap_or_else(|| "N/A".to_string());
        result.push_str(&format!("  {:<17} {}\n", field.as_str().cyan(), value));
    }

    for (name, value) in &record.extras {
        result.push_str(&format!("  {:<17} {}\n", name.cyan(), value));
    }

    if !record.characteristics.is_empty() {
        result.push_str(&format!("{}\n", "Characteristics:".bold()));
        for (label, value) in &record.characteristics {
            result.push_str(&format!("  - {}: {}\n", label, value));
        }
    }

    result
}
