//! Bounded download of photos referenced by absolute URL.
//!
//! ## Probe first
//!
//! A metadata probe (`HEAD`) runs before any body is requested. Wrong
//! content-type or an oversized declared length ends the fetch there, so a
//! report never pulls a 200 MB video someone attached by mistake. The body
//! transfer then re-checks the size while streaming, because servers lie
//! about (or omit) `Content-Length`.
//!
//! The network sits behind [`AssetTransport`] so the policy can be tested
//! without sockets.

use crate::config::FetchPolicy;
use crate::error::SkipReason;
use crate::pipeline::janitor::ResourceJanitor;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::fmt::Display;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Headers of interest from the metadata probe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
}

/// The two network operations the fetcher needs.
#[async_trait]
pub trait AssetTransport: Send + Sync {
    /// Metadata only, no body.
    async fn probe(&self, url: &str, timeout: Duration) -> Result<ProbeResponse, SkipReason>;

    /// The body, aborting once more than `limit` bytes have arrived.
    async fn fetch_body(&self, url: &str, limit: u64, timeout: Duration)
        -> Result<Vec<u8>, SkipReason>;
}

/// [`AssetTransport`] over `reqwest`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn map_reqwest_error(e: reqwest::Error, timeout: Duration) -> SkipReason {
    if e.is_timeout() {
        SkipReason::Timeout(timeout.as_secs())
    } else {
        SkipReason::Network(e.to_string())
    }
}

#[async_trait]
impl AssetTransport for ReqwestTransport {
    async fn probe(&self, url: &str, timeout: Duration) -> Result<ProbeResponse, SkipReason> {
        let response = self
            .client
            .head(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, timeout))?;

        let headers = response.headers();
        let content_type = headers
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_length = headers
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());

        Ok(ProbeResponse {
            status: response.status().as_u16(),
            content_type,
            content_length,
        })
    }

    async fn fetch_body(
        &self,
        url: &str,
        limit: u64,
        timeout: Duration,
    ) -> Result<Vec<u8>, SkipReason> {
        let transfer = async {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| map_reqwest_error(e, timeout))?;
            if !response.status().is_success() {
                return Err(SkipReason::HttpStatus(response.status().as_u16()));
            }
            collect_capped(response.bytes_stream(), limit).await
        };

        tokio::time::timeout(timeout, transfer)
            .await
            .map_err(|_| SkipReason::Timeout(timeout.as_secs()))?
    }
}

/// Gather a byte stream into memory, failing as soon as it passes `limit`.
pub(crate) async fn collect_capped<S, B, E>(stream: S, limit: u64) -> Result<Vec<u8>, SkipReason>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    futures::pin_mut!(stream);
    let mut body = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| SkipReason::Network(e.to_string()))?;
        let chunk = chunk.as_ref();
        let received = body.len() as u64 + chunk.len() as u64;
        if received > limit {
            return Err(SkipReason::TooLarge {
                declared: received,
                limit,
            });
        }
        body.extend_from_slice(chunk);
    }
    Ok(body)
}

/// Applies [`FetchPolicy`] to remote photo references.
#[derive(Clone)]
pub struct RemoteAssetFetcher {
    transport: Arc<dyn AssetTransport>,
    policy: FetchPolicy,
}

impl RemoteAssetFetcher {
    pub fn new(transport: Arc<dyn AssetTransport>, policy: FetchPolicy) -> Self {
        Self { transport, policy }
    }

    /// Fetcher over a default `reqwest` client.
    pub fn with_reqwest(policy: FetchPolicy) -> Self {
        Self::new(Arc::new(ReqwestTransport::new()), policy)
    }

    pub fn policy(&self) -> &FetchPolicy {
        &self.policy
    }

    /// Same fetcher with the remote opt-in overridden for one request.
    pub fn with_enabled(&self, enabled: bool) -> Self {
        let mut policy = self.policy.clone();
        policy.enabled = enabled;
        Self {
            transport: Arc::clone(&self.transport),
            policy,
        }
    }

    /// Download `url` into a janitor-owned temp file.
    pub async fn fetch(&self, url: &str, janitor: &ResourceJanitor) -> Result<PathBuf, SkipReason> {
        if !self.policy.enabled {
            return Err(SkipReason::RemoteDisabled);
        }
        let parsed = reqwest::Url::parse(url).map_err(|_| SkipReason::BadUrl(url.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(SkipReason::BadUrl(url.to_string()));
        }

        let probe_timeout = Duration::from_secs(self.policy.probe_timeout_secs);
        let probe = self.transport.probe(url, probe_timeout).await?;
        check_probe(&probe, self.policy.max_bytes)?;

        let transfer_timeout = Duration::from_secs(self.policy.transfer_timeout_secs);
        let body = self
            .transport
            .fetch_body(url, self.policy.max_bytes, transfer_timeout)
            .await?;
        if body.is_empty() {
            return Err(SkipReason::DecodeFailed("empty body".to_string()));
        }

        let ext = extension_for(probe.content_type.as_deref());
        let path = janitor
            .create("photo", ext)
            .map_err(|e| SkipReason::Io(e.to_string()))?;
        tokio::fs::write(&path, &body)
            .await
            .map_err(|e| SkipReason::Io(e.to_string()))?;

        debug!("fetched {} ({} bytes) → {}", url, body.len(), path.display());
        Ok(path)
    }
}

fn check_probe(probe: &ProbeResponse, max_bytes: u64) -> Result<(), SkipReason> {
    if !(200..300).contains(&probe.status) {
        return Err(SkipReason::HttpStatus(probe.status));
    }
    let is_image = probe
        .content_type
        .as_deref()
        .map(|ct| ct.trim().to_ascii_lowercase().starts_with("image/"))
        .unwrap_or(false);
    if !is_image {
        warn!("remote photo has content-type {:?}", probe.content_type);
        return Err(SkipReason::BadContentType(probe.content_type.clone()));
    }
    if let Some(len) = probe.content_length {
        if len > max_bytes {
            return Err(SkipReason::TooLarge {
                declared: len,
                limit: max_bytes,
            });
        }
    }
    Ok(())
}

fn extension_for(content_type: Option<&str>) -> &'static str {
    let ct = content_type.unwrap_or("").to_ascii_lowercase();
    let mime = ct.split(';').next().unwrap_or("").trim();
    match mime {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" | "image/pjpeg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/bmp" => "bmp",
        _ => "img",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeTransport {
        probe: ProbeResponse,
        body: Vec<u8>,
        probes: AtomicUsize,
        bodies: AtomicUsize,
    }

    impl FakeTransport {
        fn new(content_type: Option<&str>, content_length: Option<u64>) -> Arc<Self> {
            Arc::new(Self {
                probe: ProbeResponse {
                    status: 200,
                    content_type: content_type.map(str::to_string),
                    content_length,
                },
                body: b"\xFF\xD8\xFFfake-jpeg".to_vec(),
                probes: AtomicUsize::new(0),
                bodies: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl AssetTransport for FakeTransport {
        async fn probe(&self, _url: &str, _t: Duration) -> Result<ProbeResponse, SkipReason> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            Ok(self.probe.clone())
        }

        async fn fetch_body(
            &self,
            _url: &str,
            _limit: u64,
            _t: Duration,
        ) -> Result<Vec<u8>, SkipReason> {
            self.bodies.fetch_add(1, Ordering::SeqCst);
            Ok(self.body.clone())
        }
    }

    fn enabled() -> FetchPolicy {
        FetchPolicy {
            enabled: true,
            ..FetchPolicy::default()
        }
    }

    const URL: &str = "https://cdn.example.com/site/photo.jpg";

    #[tokio::test]
    async fn html_is_rejected_without_downloading() {
        let dir = tempfile::tempdir().unwrap();
        let janitor = ResourceJanitor::new(dir.path());
        let transport = FakeTransport::new(Some("text/html; charset=utf-8"), Some(512));
        let fetcher = RemoteAssetFetcher::new(transport.clone(), enabled());

        let err = fetcher.fetch(URL, &janitor).await.unwrap_err();
        assert_eq!(err.code(), "bad_content_type");
        assert_eq!(transport.probes.load(Ordering::SeqCst), 1);
        assert_eq!(transport.bodies.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn oversized_declaration_is_rejected_without_downloading() {
        let dir = tempfile::tempdir().unwrap();
        let janitor = ResourceJanitor::new(dir.path());
        let transport = FakeTransport::new(Some("image/jpeg"), Some(6 * 1024 * 1024));
        let fetcher = RemoteAssetFetcher::new(transport.clone(), enabled());

        let err = fetcher.fetch(URL, &janitor).await.unwrap_err();
        assert!(matches!(err, SkipReason::TooLarge { declared, limit }
            if declared == 6 * 1024 * 1024 && limit == 5 * 1024 * 1024));
        assert_eq!(transport.bodies.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_content_type_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let janitor = ResourceJanitor::new(dir.path());
        let transport = FakeTransport::new(None, None);
        let fetcher = RemoteAssetFetcher::new(transport.clone(), enabled());
        let err = fetcher.fetch(URL, &janitor).await.unwrap_err();
        assert_eq!(err, SkipReason::BadContentType(None));
        assert_eq!(transport.bodies.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn disabled_policy_never_touches_the_network() {
        let dir = tempfile::tempdir().unwrap();
        let janitor = ResourceJanitor::new(dir.path());
        let transport = FakeTransport::new(Some("image/jpeg"), None);
        let fetcher = RemoteAssetFetcher::new(transport.clone(), FetchPolicy::default());
        assert_eq!(
            fetcher.fetch(URL, &janitor).await.unwrap_err(),
            SkipReason::RemoteDisabled
        );
        assert_eq!(transport.probes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn non_http_scheme_is_a_bad_url() {
        let dir = tempfile::tempdir().unwrap();
        let janitor = ResourceJanitor::new(dir.path());
        let fetcher = RemoteAssetFetcher::new(FakeTransport::new(Some("image/png"), None), enabled());
        let err = fetcher.fetch("file:///etc/passwd", &janitor).await.unwrap_err();
        assert_eq!(err.code(), "bad_url");
    }

    #[tokio::test]
    async fn accepted_body_lands_in_a_janitor_file() {
        let dir = tempfile::tempdir().unwrap();
        let janitor = ResourceJanitor::new(dir.path());
        let transport = FakeTransport::new(Some("image/jpeg"), Some(14));
        let fetcher = RemoteAssetFetcher::new(transport.clone(), enabled());

        let path = fetcher.fetch(URL, &janitor).await.unwrap();
        assert_eq!(path.extension().unwrap(), "jpg");
        assert_eq!(std::fs::read(&path).unwrap(), transport.body);
        assert_eq!(janitor.tracked(), 1);
        janitor.cleanup();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn streaming_cap_aborts_mid_body() {
        let chunks: Vec<Result<Vec<u8>, String>> = vec![Ok(vec![0; 600]), Ok(vec![0; 600])];
        let err = collect_capped(futures::stream::iter(chunks), 1000).await.unwrap_err();
        assert!(matches!(err, SkipReason::TooLarge { declared: 1200, limit: 1000 }));

        let ok: Vec<Result<Vec<u8>, String>> = vec![Ok(vec![1; 10]), Ok(vec![2; 5])];
        assert_eq!(collect_capped(futures::stream::iter(ok), 1000).await.unwrap().len(), 15);
    }

    #[test]
    fn probe_rejects_non_2xx() {
        let probe = ProbeResponse {
            status: 404,
            content_type: Some("image/png".into()),
            content_length: None,
        };
        assert_eq!(check_probe(&probe, 10), Err(SkipReason::HttpStatus(404)));
    }

    #[test]
    fn extensions_follow_content_type() {
        assert_eq!(extension_for(Some("image/png")), "png");
        assert_eq!(extension_for(Some("IMAGE/JPEG; q=1")), "jpg");
        assert_eq!(extension_for(None), "img");
    }
}
