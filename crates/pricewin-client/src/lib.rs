pub mod config;
pub mod fetcher;
pub mod text;

pub use config::{DEFAULT_ENDPOINT, FetchConfig};
pub use fetcher::{HttpFetcherFactory, HttpRangeFetcher};
pub use text::HtmlTextExtractor;
