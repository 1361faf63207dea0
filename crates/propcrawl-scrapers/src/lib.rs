pub mod crawler;
pub mod extract;
pub mod fetch;
pub mod geocode;
pub mod pagination;

pub use crawler::{extract_detail, Crawler, SourceRules};
pub use extract::{Extract, Extractor, FieldExtractor, Page, PriorityChain};
pub use fetch::{Fetch, FetchError, HttpFetcher, RetryPolicy};
pub use geocode::{GeocodeEnricher, GeocodeError, GeocodeLookup, NominatimLookup};
pub use pagination::{ListingPage, ListingPlan, PaginationWalker};
