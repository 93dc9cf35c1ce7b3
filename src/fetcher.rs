use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode, Url};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::aggregator::{AggregateError, Aggregator, EntrySender};
use crate::config::Config;
use crate::feed::{parse_feed, Entry, FeedError};
use crate::rank::rank;

/// Why a single feed contributed nothing.
///
/// Only [`FetchError::Transport`] and [`FetchError::TimedOut`] are expected noise (hosts come and go); every other
/// variant is worth a diagnostic.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The URL could not be turned into a request
    #[error("error creating request: {0}")]
    Request(#[source] reqwest::Error),
    /// DNS, connect, TLS or timeout failure before a response arrived
    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),
    /// Any status other than 200 OK
    #[error("non-OK status code: {0}")]
    HttpStatus(StatusCode),
    /// The whole fetch, waiting for a host slot included, outlived the timeout
    #[error("request timed out after {0:?}")]
    TimedOut(Duration),
    #[error("error reading feed body: {0}")]
    Body(#[source] reqwest::Error),
    #[error("error gathering feed entries: {0}")]
    Parse(#[from] FeedError),
}

impl FetchError {
    pub fn is_silent(&self) -> bool {
        matches!(self, FetchError::Transport(_) | FetchError::TimedOut(_))
    }
}

/// Outcome of one feed: the number of entries it produced, or why it was skipped.
#[derive(Debug)]
pub struct FetchReport {
    pub url: String,
    pub result: Result<usize, FetchError>,
}

/// Everything one run produced: the ranked entries and a report per feed, in
/// completion order.
#[derive(Debug)]
pub struct Harvest {
    pub entries: Vec<Entry>,
    pub reports: Vec<FetchReport>,
}

#[derive(Clone)]
pub struct Fetcher {
    client: Client,
    limiter: Arc<HostLimiter>,
    timeout: Duration,
}

impl Fetcher {
    pub fn new(config: &Config) -> reqwest::Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            limiter: Arc::new(HostLimiter::new(config.conns_per_host)),
            timeout,
        })
    }

    /// Fetches and parses one feed.
    ///
    /// The timeout bounds the wait for a host slot as well as the request itself.
    pub async fn fetch(&self, url: &str) -> Result<Vec<Entry>, FetchError> {
        let body = tokio::time::timeout(self.timeout, self.download(url))
            .await
            .map_err(|_| FetchError::TimedOut(self.timeout))??;

        Ok(parse_feed(&body)?)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let permit = self.limiter.acquire(url).await;

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_builder() {
                FetchError::Request(e)
            } else {
                FetchError::Transport(e)
            }
        })?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::HttpStatus(status));
        }

        let body = response.bytes().await.map_err(FetchError::Body)?;
        drop(permit);

        Ok(body.to_vec())
    }

    /// Fetches every feed concurrently and returns the deduplicated, ranked entries.
    ///
    /// One task is spawned per URL with no pool limit; only the per-host connection cap
    /// throttles them. A failing feed is reported and skipped, it never fails the run.
    pub async fn harvest(
        &self,
        urls: Vec<String>,
        max_entries: usize,
    ) -> Result<Harvest, AggregateError> {
        info!(feeds = urls.len(), "Fetching feeds");

        let aggregator = Aggregator::spawn();
        let mut producers = JoinSet::new();
        for url in urls {
            let fetcher = self.clone();
            let tx = aggregator.sender();
            producers.spawn(async move { fetcher.produce(url, tx).await });
        }

        // All producers must be done before the aggregator closes the channel.
        let mut reports = Vec::with_capacity(producers.len());
        while let Some(joined) = producers.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(e) => warn!(error = %e, "Feed task failed"),
            }
        }

        let unique = aggregator.finish().await?;
        let entries = rank(unique.into_values(), max_entries);

        let failed = reports.iter().filter(|r| r.result.is_err()).count();
        info!(
            succeeded = reports.len() - failed,
            failed = failed,
            entries = entries.len(),
            "Feed harvest complete"
        );

        Ok(Harvest { entries, reports })
    }

    async fn produce(&self, url: String, tx: EntrySender) -> FetchReport {
        let result = match self.fetch(&url).await {
            Ok(entries) => {
                let count = entries.len();
                debug!(url = %url, entries = count, "Fetched feed");
                if tx.send(entries).is_err() {
                    warn!(url = %url, "Entry consumer stopped before feed was delivered");
                }
                Ok(count)
            }
            // Unreachable hosts are routine and would drown out everything else.
            Err(e) if e.is_silent() => Err(e),
            Err(e) => {
                warn!(url = %url, error = %e, "Skipping feed");
                Err(e)
            }
        };

        FetchReport { url, result }
    }
}

/// Caps concurrent connections per `host:port`.
///
/// A permit is held from sending the request until its body has been read.
struct HostLimiter {
    permits: usize,
    hosts: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl HostLimiter {
    fn new(permits: usize) -> Self {
        Self {
            permits,
            hosts: Mutex::new(HashMap::new()),
        }
    }

    /// Waits for a slot on the URL's host. URLs without a host get no permit and are
    /// left for the client to reject.
    async fn acquire(&self, url: &str) -> Option<OwnedSemaphorePermit> {
        let key = host_key(url)?;
        let semaphore = {
            let mut hosts = self.hosts.lock().await;
            hosts
                .entry(key)
                .or_insert_with(|| Arc::new(Semaphore::new(self.permits)))
                .clone()
        };
        semaphore.acquire_owned().await.ok()
    }
}

fn host_key(url: &str) -> Option<String> {
    let url = Url::parse(url).ok()?;
    let host = url.host_str()?;
    Some(match url.port_or_known_default() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VALID_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <item><title>Test</title><link>https://example.com/1</link><pubDate>Tue, 10 Jun 2003 04:00:00 GMT</pubDate></item>
</channel></rss>"#;

    fn fetcher() -> Fetcher {
        Fetcher::new(&Config::default()).unwrap()
    }

    mod host_key_tests {
        use super::*;

        #[test]
        fn test_default_ports() {
            assert_eq!(
                host_key("https://example.com/feed"),
                Some("example.com:443".to_string())
            );
            assert_eq!(
                host_key("http://example.com/feed"),
                Some("example.com:80".to_string())
            );
        }

        #[test]
        fn test_explicit_port() {
            assert_eq!(
                host_key("http://127.0.0.1:8080/rss"),
                Some("127.0.0.1:8080".to_string())
            );
        }

        #[test]
        fn test_same_host_different_paths_share_key() {
            assert_eq!(
                host_key("https://pods.example.com/a.xml"),
                host_key("https://pods.example.com/b/c.xml")
            );
        }

        #[test]
        fn test_invalid_url() {
            assert_eq!(host_key("not a url"), None);
            assert_eq!(host_key(""), None);
        }
    }

    mod host_limiter_tests {
        use super::*;

        #[tokio::test]
        async fn test_caps_permits_per_host() {
            let limiter = HostLimiter::new(2);
            let _a = limiter.acquire("https://busy.example.com/1").await.unwrap();
            let _b = limiter.acquire("https://busy.example.com/2").await.unwrap();

            let third = tokio::time::timeout(
                Duration::from_millis(50),
                limiter.acquire("https://busy.example.com/3"),
            )
            .await;
            assert!(third.is_err(), "third permit should wait");

            let other = tokio::time::timeout(
                Duration::from_millis(50),
                limiter.acquire("https://quiet.example.com/1"),
            )
            .await;
            assert!(matches!(other, Ok(Some(_))));
        }

        #[tokio::test]
        async fn test_released_permit_is_reused() {
            let limiter = HostLimiter::new(1);
            let first = limiter.acquire("https://example.com/1").await;
            drop(first);
            let second = tokio::time::timeout(
                Duration::from_millis(50),
                limiter.acquire("https://example.com/2"),
            )
            .await;
            assert!(matches!(second, Ok(Some(_))));
        }
    }

    mod fetch_tests {
        use super::*;

        #[tokio::test]
        async fn test_fetch_success_sends_user_agent() {
            let mock_server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/feed"))
                .and(header(
                    "User-Agent",
                    "eris (https://github.com/admacleod/eris)",
                ))
                .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
                .expect(1)
                .mount(&mock_server)
                .await;

            let entries = fetcher()
                .fetch(&format!("{}/feed", mock_server.uri()))
                .await
                .unwrap();
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].link, "https://example.com/1");
        }

        #[tokio::test]
        async fn test_fetch_non_ok_status() {
            let mock_server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(404))
                .mount(&mock_server)
                .await;

            let result = fetcher()
                .fetch(&format!("{}/feed", mock_server.uri()))
                .await;
            let err = result.unwrap_err();
            assert!(
                matches!(err, FetchError::HttpStatus(status) if status == StatusCode::NOT_FOUND),
                "Expected HttpStatus(404), got {:?}",
                err
            );
            assert!(!err.is_silent());
        }

        #[tokio::test]
        async fn test_fetch_other_success_codes_are_rejected() {
            let mock_server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(203).set_body_string(VALID_RSS))
                .mount(&mock_server)
                .await;

            let result = fetcher()
                .fetch(&format!("{}/feed", mock_server.uri()))
                .await;
            assert!(matches!(result, Err(FetchError::HttpStatus(_))));
        }

        #[tokio::test]
        async fn test_fetch_parse_error() {
            let mock_server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
                .mount(&mock_server)
                .await;

            let result = fetcher()
                .fetch(&format!("{}/feed", mock_server.uri()))
                .await;
            match result {
                Err(e @ FetchError::Parse(FeedError::UnknownDialect(_))) => {
                    assert!(!e.is_silent())
                }
                other => panic!("Expected Parse error, got {:?}", other),
            }
        }

        #[tokio::test]
        async fn test_fetch_connection_refused_is_silent() {
            // Nothing listens on port 1.
            let result = fetcher().fetch("http://127.0.0.1:1/feed").await;
            match result {
                Err(e @ FetchError::Transport(_)) => assert!(e.is_silent()),
                other => panic!("Expected Transport error, got {:?}", other),
            }
        }

        #[tokio::test]
        async fn test_fetch_timeout_is_silent() {
            let mock_server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_string(VALID_RSS)
                        .set_delay(Duration::from_secs(3)),
                )
                .mount(&mock_server)
                .await;

            let config = Config {
                timeout_secs: 1,
                ..Config::default()
            };
            let result = Fetcher::new(&config)
                .unwrap()
                .fetch(&format!("{}/feed", mock_server.uri()))
                .await;
            match result {
                Err(e @ (FetchError::Transport(_) | FetchError::TimedOut(_))) => {
                    assert!(e.is_silent())
                }
                other => panic!("Expected a silent timeout, got {:?}", other),
            }
        }

        #[tokio::test]
        async fn test_waiting_for_host_slot_counts_against_timeout() {
            let mock_server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_string(VALID_RSS)
                        .set_delay(Duration::from_millis(700)),
                )
                .mount(&mock_server)
                .await;

            let config = Config {
                timeout_secs: 1,
                conns_per_host: 1,
                ..Config::default()
            };
            let fetcher = Fetcher::new(&config).unwrap();
            let urls: Vec<_> = (0..3)
                .map(|i| format!("{}/feed/{i}", mock_server.uri()))
                .collect();

            let started = std::time::Instant::now();
            let (a, b, c) = tokio::join!(
                fetcher.fetch(&urls[0]),
                fetcher.fetch(&urls[1]),
                fetcher.fetch(&urls[2]),
            );
            let elapsed = started.elapsed();

            // One slot: the first request fits, the queued ones run out of time.
            assert!(elapsed < Duration::from_millis(1800), "took {elapsed:?}");
            let results = [a, b, c];
            assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
            assert!(results
                .iter()
                .filter(|r| r.is_err())
                .all(|r| matches!(r, Err(FetchError::TimedOut(_)))));
        }

        #[tokio::test]
        async fn test_fetch_invalid_url_is_logged() {
            let result = fetcher().fetch("not a url").await;
            match result {
                Err(e @ FetchError::Request(_)) => assert!(!e.is_silent()),
                other => panic!("Expected Request error, got {:?}", other),
            }
        }
    }

    mod harvest_tests {
        use super::*;

        fn rss_with(links: &[(&str, &str)]) -> String {
            let items: String = links
                .iter()
                .map(|(link, date)| {
                    format!("<item><title>{link}</title><link>{link}</link><pubDate>{date}</pubDate></item>")
                })
                .collect();
            format!("<rss><channel>{items}</channel></rss>")
        }

        #[tokio::test]
        async fn test_harvest_dedups_across_feeds() {
            let mock_server = MockServer::start().await;
            Mock::given(path("/a"))
                .respond_with(ResponseTemplate::new(200).set_body_string(rss_with(&[
                    ("https://x/shared", "2024-01-01"),
                    ("https://x/a", "2024-01-02"),
                ])))
                .mount(&mock_server)
                .await;
            Mock::given(path("/b"))
                .respond_with(ResponseTemplate::new(200).set_body_string(rss_with(&[
                    ("https://x/shared", "2024-01-01"),
                    ("https://x/b", "2024-01-03"),
                ])))
                .mount(&mock_server)
                .await;

            let urls = vec![
                format!("{}/a", mock_server.uri()),
                format!("{}/b", mock_server.uri()),
            ];
            let harvest = fetcher().harvest(urls, 250).await.unwrap();

            let links: Vec<_> = harvest.entries.iter().map(|e| e.link.as_str()).collect();
            assert_eq!(links, vec!["https://x/b", "https://x/a", "https://x/shared"]);
            assert_eq!(harvest.reports.len(), 2);
            assert!(harvest.reports.iter().all(|r| r.result.is_ok()));
        }

        #[tokio::test]
        async fn test_harvest_applies_cap() {
            let mock_server = MockServer::start().await;
            Mock::given(path("/a"))
                .respond_with(ResponseTemplate::new(200).set_body_string(rss_with(&[
                    ("https://x/1", "2024-01-01"),
                    ("https://x/2", "2024-01-02"),
                    ("https://x/3", "2024-01-03"),
                ])))
                .mount(&mock_server)
                .await;

            let harvest = fetcher()
                .harvest(vec![format!("{}/a", mock_server.uri())], 2)
                .await
                .unwrap();
            let links: Vec<_> = harvest.entries.iter().map(|e| e.link.as_str()).collect();
            assert_eq!(links, vec!["https://x/3", "https://x/2"]);
        }

        #[tokio::test]
        async fn test_harvest_with_no_feeds() {
            let harvest = fetcher().harvest(Vec::new(), 250).await.unwrap();
            assert!(harvest.entries.is_empty());
            assert!(harvest.reports.is_empty());
        }

        #[tokio::test]
        async fn test_harvest_all_failing() {
            let mock_server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(503))
                .mount(&mock_server)
                .await;

            let urls = vec![
                format!("{}/a", mock_server.uri()),
                "http://127.0.0.1:1/down".to_string(),
            ];
            let harvest = fetcher().harvest(urls, 250).await.unwrap();
            assert!(harvest.entries.is_empty());
            assert_eq!(harvest.reports.len(), 2);
            assert!(harvest.reports.iter().all(|r| r.result.is_err()));
        }
    }
}
