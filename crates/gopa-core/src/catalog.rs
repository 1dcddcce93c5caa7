//! Remote catalog of published toolchain releases

use crate::config::GopaConfig;
use crate::errors::{GopaError, GopaResult};
use crate::version::{sort_descending, CatalogPattern, VersionTag};
use async_trait::async_trait;
use regex::Regex;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Anything that can produce the list of published releases
#[async_trait]
pub trait VersionSource: Send + Sync {
    async fn fetch_catalog(&self, cancel: &CancellationToken) -> GopaResult<Vec<VersionTag>>;
}

/// HTTP client for the distribution site
#[derive(Debug, Clone)]
pub struct CatalogClient {
    client: reqwest::Client,
    base_url: String,
    toolchain_name: String,
    request_timeout: Duration,
    page: CatalogPage,
}

impl CatalogClient {
    pub fn new(config: &GopaConfig) -> GopaResult<Self> {
        // Downloads share this client, so only connecting has a client-wide deadline.
        let request_timeout = Duration::from_secs(config.http_timeout_secs);
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(request_timeout)
            .build()
            .map_err(|e| GopaError::Config {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url().to_string(),
            toolchain_name: config.toolchain_name.clone(),
            request_timeout,
            page: CatalogPage::new(&config.toolchain_name)?,
        })
    }

    /// Shared HTTP client, reused for archive downloads
    pub fn http(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch the newest stable release from `{base}/VERSION?m=text`
    pub async fn fetch_latest(&self, cancel: &CancellationToken) -> GopaResult<VersionTag> {
        let url = format!("{}/VERSION?m=text", self.base_url);
        let body = self.get_text(&url, cancel).await?;

        let first = body.lines().next().unwrap_or("").trim();
        if first.is_empty() {
            return Err(GopaError::Parse {
                message: format!("empty version response from {}", url),
            });
        }

        let latest = VersionTag::parse(&self.toolchain_name, first).map_err(|_| GopaError::Parse {
            message: format!("'{}' from {} is not a version tag", first, url),
        })?;

        log::debug!("Latest published release is {}", latest);
        Ok(latest)
    }

    /// Fetch every listed release from the download page, newest first
    pub async fn fetch_catalog(&self, cancel: &CancellationToken) -> GopaResult<Vec<VersionTag>> {
        let url = format!("{}/dl/", self.base_url);
        let html = self.get_text(&url, cancel).await?;
        let versions = self.page.parse(&html);

        log::info!("Fetched {} releases from {}", versions.len(), url);
        Ok(versions)
    }

    async fn get_text(&self, url: &str, cancel: &CancellationToken) -> GopaResult<String> {
        log::debug!("GET {}", url);

        let request = self.client.get(url).timeout(self.request_timeout);
        let response = until_cancelled(cancel, request.send())
            .await?
            .map_err(|e| GopaError::network(format!("requesting {}", url), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GopaError::UnexpectedStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        until_cancelled(cancel, response.text())
            .await?
            .map_err(|e| GopaError::network(format!("reading response from {}", url), e))
    }
}

#[async_trait]
impl VersionSource for CatalogClient {
    async fn fetch_catalog(&self, cancel: &CancellationToken) -> GopaResult<Vec<VersionTag>> {
        CatalogClient::fetch_catalog(self, cancel).await
    }
}

const LABEL_CLASS: &str = "toggleButton";

/// Reads release labels out of the download page markup.
///
/// A label is the text of the first `<span>` directly inside an element whose
/// class list contains `toggleButton`. Labels that do not match the catalog
/// pattern are ignored.
#[derive(Debug, Clone)]
pub struct CatalogPage {
    label: Regex,
    pattern: CatalogPattern,
}

impl CatalogPage {
    pub fn new(toolchain_name: &str) -> GopaResult<Self> {
        let label = Regex::new(
            r#"(?s)class\s*=\s*"([^"]*)"[^>]*>\s*<span[^>]*>(.*?)</span>"#,
        )
        .map_err(|e| GopaError::Parse {
            message: format!("invalid label pattern: {}", e),
        })?;

        Ok(Self {
            label,
            pattern: CatalogPattern::new(toolchain_name)?,
        })
    }

    /// Listed releases, deduplicated and newest first
    pub fn parse(&self, html: &str) -> Vec<VersionTag> {
        let tags = self
            .label
            .captures_iter(html)
            .filter(|caps| {
                caps.get(1)
                    .is_some_and(|classes| classes.as_str().split_whitespace().any(|c| c == LABEL_CLASS))
            })
            .filter_map(|caps| caps.get(2))
            .filter_map(|label| self.pattern.matches(label.as_str()))
            .collect();

        sort_descending(tags)
    }
}

/// Resolve a future unless the token is cancelled first
pub(crate) async fn until_cancelled<F: Future>(
    cancel: &CancellationToken,
    future: F,
) -> GopaResult<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(GopaError::Cancelled),
        output = future => Ok(output),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOWNLOAD_PAGE: &str = r#"
<div class="toggleVisible" id="go1.22.3">
  <div class="expanded">
    <h2 class="toggleButton" title="Click to hide downloads for this version">
      <span>go1.22.3</span>
      <img class="toggleButton-img" src="/images/icons/arrow-down.svg">
    </h2>
  </div>
</div>
<div class="toggle" id="go1.21.10">
  <h3 class="toggleButton" title="Click to show downloads"><span>go1.21.10</span></h3>
</div>
<div class="toggle" id="go1.21.9">
  <h3 class="toggleButton"><span>go1.21.9</span></h3>
</div>
<div class="toggle" id="go1.22rc1">
  <h3 class="toggleButton"><span>go1.22rc1</span></h3>
</div>
<div class="toggle" id="go1.15.15">
  <h3 class="toggleButton"><span>go1.15.15</span></h3>
</div>
<div class="toggle" id="go1.22.3-dup">
  <h3 class="toggleButton"><span>go1.22.3</span></h3>
</div>
<h3 class="other"><span>go1.23.0</span></h3>
"#;

    fn client_for(base_url: &str) -> CatalogClient {
        let mut config = GopaConfig::with_home("/tmp/gopa-test");
        config.base_url = base_url.to_string();
        CatalogClient::new(&config).unwrap()
    }

    #[test]
    fn test_parse_catalog_filters_and_sorts() {
        let page = CatalogPage::new("go").unwrap();
        let tags = page.parse(DOWNLOAD_PAGE);
        let raw: Vec<&str> = tags.iter().map(|t| t.as_str()).collect();
        assert_eq!(raw, vec!["go1.22.3", "go1.21.10", "go1.21.9"]);
    }

    #[test]
    fn test_parse_catalog_matches_whole_class_token() {
        let page = CatalogPage::new("go").unwrap();
        let html = r#"
<div class="toggleButton-img"><span>go1.24.0</span></div>
<div class="xtoggleButton"><span>go1.23.1</span></div>
<h3 class="big toggleButton"><span>go1.20.14</span></h3>
"#;
        let raw: Vec<String> = page.parse(html).iter().map(|t| t.to_string()).collect();
        assert_eq!(raw, vec!["go1.20.14"]);
    }

    #[test]
    fn test_parse_catalog_empty_page() {
        let page = CatalogPage::new("go").unwrap();
        assert!(page.parse("<html><body>maintenance</body></html>").is_empty());
    }

    #[tokio::test]
    async fn test_fetch_latest_takes_first_line() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/VERSION?m=text")
            .with_status(200)
            .with_body("go1.22.3\ntime 2024-05-07T18:13:03Z\n")
            .expect(1)
            .create_async()
            .await;

        let client = client_for(&server.url());
        let latest = client.fetch_latest(&CancellationToken::new()).await.unwrap();
        assert_eq!(latest.as_str(), "go1.22.3");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_latest_empty_body_is_parse_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/VERSION?m=text")
            .with_status(200)
            .with_body("")
            .create_async()
            .await;

        let client = client_for(&server.url());
        let result = client.fetch_latest(&CancellationToken::new()).await;
        assert!(matches!(result, Err(GopaError::Parse { .. })));
    }

    #[tokio::test]
    async fn test_non_200_is_unexpected_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/dl/")
            .with_status(503)
            .create_async()
            .await;

        let client = client_for(&server.url());
        match client.fetch_catalog(&CancellationToken::new()).await {
            Err(GopaError::UnexpectedStatus { status, .. }) => assert_eq!(status, 503),
            other => panic!("expected UnexpectedStatus, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_catalog() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/dl/")
            .with_status(200)
            .with_body(DOWNLOAD_PAGE)
            .create_async()
            .await;

        let client = client_for(&format!("{}/", server.url()));
        let tags = client.fetch_catalog(&CancellationToken::new()).await.unwrap();
        assert_eq!(tags.len(), 3);
        assert_eq!(tags[0].as_str(), "go1.22.3");
    }

    #[tokio::test]
    async fn test_cancelled_request() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        // Unroutable per RFC 5737; the token wins before any connect attempt.
        let client = client_for("http://192.0.2.1:9");
        let result = client.fetch_latest(&cancel).await;
        assert!(matches!(result, Err(GopaError::Cancelled)));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        let client = client_for("http://127.0.0.1:1");
        let result = client.fetch_catalog(&CancellationToken::new()).await;
        assert!(result.unwrap_err().is_network());
    }
}
