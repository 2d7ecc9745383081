use std::time::Duration;

use pricewin_core::{AppError, FetchError};
use url::Url;

/// Public Common Crawl bucket, served over HTTPS.
pub const DEFAULT_ENDPOINT: &str = "https://data.commoncrawl.org/";

pub const DEFAULT_USER_AGENT: &str = concat!("pricewin/", env!("CARGO_PKG_VERSION"));

/// Settings for the HTTP range fetcher.
///
/// There is no timeout unless one is set with [`with_timeout`](Self::with_timeout).
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Bucket namespace; object keys are appended to it. Always ends in `/`.
    pub endpoint: Url,
    pub timeout: Option<Duration>,
    pub user_agent: String,
}

impl FetchConfig {
    pub fn new(endpoint: &str) -> Result<Self, AppError> {
        let mut url = Url::parse(endpoint.trim())
            .map_err(|e| AppError::ConfigError(format!("Invalid endpoint '{endpoint}': {e}")))?;

        match url.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(AppError::ConfigError(format!(
                    "Endpoint scheme '{scheme}' is not supported (only http/https)"
                )));
            }
        }
        if url.query().is_some() || url.fragment().is_some() {
            return Err(AppError::ConfigError(format!(
                "Endpoint '{endpoint}' must not carry a query or fragment"
            )));
        }

        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }

        Ok(Self {
            endpoint: url,
            timeout: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// URL of `object_key` under the endpoint. One leading `/` is ignored.
    ///
    /// Every other character of the key stays in the path: `?`, `#` and `%`
    /// are percent-encoded. Keys with `.` or `..` segments are rejected.
    pub fn object_url(&self, object_key: &str) -> Result<Url, FetchError> {
        let key = object_key.strip_prefix('/').unwrap_or(object_key);
        let invalid = |reason: &str| {
            FetchError::HttpError(format!("Invalid object key '{object_key}': {reason}"))
        };

        if key.split('/').any(|segment| matches!(segment, "." | "..")) {
            return Err(invalid("dot segments cannot be addressed"));
        }

        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|()| invalid("endpoint cannot hold a path"))?
            .pop_if_empty()
            .extend(key.split('/'));
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_endpoint() {
        let config = FetchConfig::new(DEFAULT_ENDPOINT).unwrap();
        assert_eq!(config.endpoint.as_str(), "https://data.commoncrawl.org/");
        assert!(config.timeout.is_none());
        assert!(config.user_agent.starts_with("pricewin/"));
    }

    #[test]
    fn test_trailing_slash_added() {
        let config = FetchConfig::new("http://127.0.0.1:9000/bucket").unwrap();
        assert_eq!(config.endpoint.as_str(), "http://127.0.0.1:9000/bucket/");
    }

    #[test]
    fn test_object_url_appends_key() {
        let config = FetchConfig::new(DEFAULT_ENDPOINT).unwrap();
        let key = "crawl-data/CC-MAIN-2019-04/segments/1547583657097.39/warc/a.warc.gz";
        assert_eq!(
            config.object_url(key).unwrap().as_str(),
            format!("https://data.commoncrawl.org/{key}")
        );
        assert_eq!(
            config.object_url(&format!("/{key}")).unwrap(),
            config.object_url(key).unwrap()
        );
    }

    #[test]
    fn test_object_url_keeps_reserved_characters_in_path() {
        let config = FetchConfig::new("http://127.0.0.1:9000/bucket").unwrap();
        let url = config.object_url("crawl/a?b#c%d.warc.gz").unwrap();
        assert_eq!(url.path(), "/bucket/crawl/a%3Fb%23c%25d.warc.gz");
        assert!(url.query().is_none());
        assert!(url.fragment().is_none());

        let url = config.object_url("crawl//a.warc.gz").unwrap();
        assert_eq!(url.path(), "/bucket/crawl//a.warc.gz");
    }

    #[test]
    fn test_object_url_rejects_dot_segments() {
        let config = FetchConfig::new(DEFAULT_ENDPOINT).unwrap();
        for key in ["crawl/../secret", "./a.warc.gz", "crawl/."] {
            assert!(
                matches!(config.object_url(key), Err(FetchError::HttpError(_))),
                "{key}"
            );
        }
        assert!(config.object_url("crawl/..a.warc.gz").is_ok());
    }

    #[test]
    fn test_invalid_endpoints() {
        assert!(matches!(
            FetchConfig::new("not a url"),
            Err(AppError::ConfigError(_))
        ));
        assert!(matches!(
            FetchConfig::new("s3://commoncrawl/"),
            Err(AppError::ConfigError(_))
        ));
        assert!(matches!(
            FetchConfig::new("https://host/?x=1"),
            Err(AppError::ConfigError(_))
        ));
    }

    #[test]
    fn test_builders() {
        let config = FetchConfig::new(DEFAULT_ENDPOINT)
            .unwrap()
            .with_timeout(Duration::from_secs(5))
            .with_user_agent("test-agent");
        assert_eq!(config.timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.user_agent, "test-agent");
    }
}
