//! Remote implementation of the `Storage` contract over the blob-server
//! HTTP protocol.
//!
//! Connections are pooled with a per-host cap and an idle timeout;
//! credentials are attached per request and never logged.

use std::fmt;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::StatusCode;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use url::Url;

use attic_core::protocol::{EnumerateResponse, RemoveResponse, UploadResponse};
use attic_core::{
    BlobRef, ByteStream, Capabilities, Partition, RefStream, SizedBlobRef, StoreError, StoreResult,
    Storage,
};

/// Page size used when driving a remote enumeration.
const ENUMERATE_PAGE_SIZE: u64 = 1000;

/// Capacity of the channel between the page fetcher and the consumer.
const ENUMERATE_CHANNEL_CAPACITY: usize = 100;

#[derive(Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ClientAuth {
    UserPass { user: String, password: String },
    Token { token: String },
}

impl fmt::Debug for ClientAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // credentials stay out of logs
        match self {
            Self::UserPass { user, .. } => f
                .debug_struct("ClientAuth::UserPass")
                .field("user", user)
                .finish_non_exhaustive(),
            Self::Token { .. } => f.write_str("ClientAuth::Token(..)"),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct HttpStoreConfig {
    pub base_url: String,
    #[serde(default)]
    pub auth: Option<ClientAuth>,
    #[serde(default = "default_pool_max_idle")]
    pub pool_max_idle_per_host: usize,
    #[serde(default = "default_pool_idle_timeout_secs")]
    pub pool_idle_timeout_secs: u64,
}

fn default_pool_max_idle() -> usize {
    8
}

fn default_pool_idle_timeout_secs() -> u64 {
    90
}

impl HttpStoreConfig {
    pub fn new(base_url: impl Into<String>, auth: Option<ClientAuth>) -> Self {
        Self {
            base_url: base_url.into(),
            auth,
            pool_max_idle_per_host: default_pool_max_idle(),
            pool_idle_timeout_secs: default_pool_idle_timeout_secs(),
        }
    }
}

/// Remote blob store speaking the wire protocol of the attic server.
#[derive(Clone)]
pub struct HttpStore {
    http: reqwest::Client,
    base: Url,
    auth: Option<ClientAuth>,
}

impl fmt::Debug for HttpStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpStore")
            .field("base", &self.base.as_str())
            .finish_non_exhaustive()
    }
}

impl HttpStore {
    pub fn create(config: HttpStoreConfig) -> StoreResult<Self> {
        let base = Url::parse(&config.base_url)
            .map_err(|err| StoreError::bad_request(format!("invalid base url: {err}")))?;
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(config.pool_idle_timeout_secs))
            .build()
            .map_err(http_err)?;
        Ok(Self {
            http,
            base,
            auth: config.auth,
        })
    }

    fn url(&self, path: &str) -> StoreResult<Url> {
        self.base
            .join(path)
            .map_err(|err| StoreError::bad_request(format!("invalid url path {path:?}: {err}")))
    }

    fn with_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth {
            Some(ClientAuth::UserPass { user, password }) => req.basic_auth(user, Some(password)),
            Some(ClientAuth::Token { token }) => {
                req.header(reqwest::header::AUTHORIZATION, format!("Token {token}"))
            }
            None => req,
        }
    }

    async fn enumerate_page(
        &self,
        partition: &Partition,
        after: Option<&BlobRef>,
        limit: u64,
    ) -> StoreResult<EnumerateResponse> {
        let mut url = self.url("/camli/enumerate-blobs")?;
        {
            let mut query = url.query_pairs_mut();
            if !partition.is_default() {
                query.append_pair("partition", partition.name());
            }
            if let Some(after) = after {
                query.append_pair("after", after.as_str());
            }
            query.append_pair("limit", &limit.to_string());
        }
        let resp = self
            .with_auth(self.http.get(url))
            .send()
            .await
            .map_err(http_err)?;
        let resp = check_status(resp)?;
        let body = resp.bytes().await.map_err(http_err)?;
        serde_json::from_slice(&body)
            .map_err(|err| StoreError::other(format!("bad enumerate response: {err}")))
    }
}

#[async_trait]
impl Storage for HttpStore {
    fn capabilities(&self) -> Capabilities {
        Capabilities::full()
    }

    async fn receive(&self, expected: &BlobRef, stream: ByteStream) -> StoreResult<SizedBlobRef> {
        if !expected.is_supported() {
            return Err(StoreError::UnsupportedHash(expected.hash_name().to_owned()));
        }
        let part = reqwest::multipart::Part::stream(reqwest::Body::wrap_stream(stream))
            .file_name("blob")
            .mime_str("application/octet-stream")
            .map_err(http_err)?;
        let form = reqwest::multipart::Form::new().part(expected.to_string(), part);

        let resp = self
            .with_auth(self.http.post(self.url("/camli/upload")?))
            .multipart(form)
            .send()
            .await
            .map_err(http_err)?;
        let resp = check_status(resp)?;
        let body = resp.bytes().await.map_err(http_err)?;
        let parsed: UploadResponse = serde_json::from_slice(&body)
            .map_err(|err| StoreError::other(format!("bad upload response: {err}")))?;

        if let Some(sized) = parsed
            .received
            .into_iter()
            .find(|s| s.blob_ref == *expected)
        {
            return Ok(sized);
        }
        Err(StoreError::bad_request(format!(
            "server did not accept {expected}: {}",
            parsed.error_text.unwrap_or_else(|| "no reason given".to_owned())
        )))
    }

    async fn open_read(
        &self,
        blob_ref: &BlobRef,
        offset: u64,
        max_len: Option<u64>,
    ) -> StoreResult<ByteStream> {
        if !blob_ref.is_supported() {
            return Err(StoreError::UnsupportedHash(blob_ref.hash_name().to_owned()));
        }
        if max_len == Some(0) {
            return Ok(empty_stream());
        }
        let mut req = self.with_auth(self.http.get(self.url(&format!("/camli/{blob_ref}"))?));
        if offset > 0 || max_len.is_some() {
            let range = match max_len {
                Some(len) => format!("bytes={offset}-{}", offset + len - 1),
                None => format!("bytes={offset}-"),
            };
            req = req.header(reqwest::header::RANGE, range);
        }
        let resp = req.send().await.map_err(http_err)?;
        match resp.status() {
            StatusCode::OK | StatusCode::PARTIAL_CONTENT => {
                let stream = resp.bytes_stream().map(|item| item.map_err(io::Error::other));
                Ok(Box::new(Box::pin(stream)))
            }
            // reads past the end behave like the local store: empty
            StatusCode::RANGE_NOT_SATISFIABLE => Ok(empty_stream()),
            status => Err(status_error(status)),
        }
    }

    async fn stat(&self, blob_ref: &BlobRef) -> StoreResult<u64> {
        if !blob_ref.is_supported() {
            return Err(StoreError::UnsupportedHash(blob_ref.hash_name().to_owned()));
        }
        let resp = self
            .with_auth(self.http.head(self.url(&format!("/camli/{blob_ref}"))?))
            .send()
            .await
            .map_err(http_err)?;
        let resp = check_status(resp)?;
        resp.headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| StoreError::other("stat response lacks Content-Length"))
    }

    async fn enumerate(
        &self,
        partition: &Partition,
        after: Option<BlobRef>,
        limit: u64,
        cancel: CancellationToken,
    ) -> StoreResult<RefStream> {
        let (tx, rx) = mpsc::channel(ENUMERATE_CHANNEL_CAPACITY);
        let client = self.clone();
        let partition = partition.clone();
        tokio::spawn(async move {
            let mut cursor = after;
            let mut remaining = limit;
            while remaining > 0 {
                if cancel.is_cancelled() {
                    let _ = tx.send(Err(StoreError::Cancelled)).await;
                    return;
                }
                let page_size = remaining.min(ENUMERATE_PAGE_SIZE);
                let page = match client
                    .enumerate_page(&partition, cursor.as_ref(), page_size)
                    .await
                {
                    Ok(page) => page,
                    Err(err) => {
                        let _ = tx.send(Err(err)).await;
                        return;
                    }
                };
                let next = page.after;
                for sized in page.blobs {
                    remaining = remaining.saturating_sub(1);
                    if tx.send(Ok(sized)).await.is_err() {
                        return;
                    }
                }
                match next {
                    Some(next) => cursor = Some(next),
                    None => return,
                }
            }
        });
        Ok(Box::new(ReceiverStream::new(rx)))
    }

    async fn remove(&self, partition: &Partition, refs: &[BlobRef]) -> StoreResult<()> {
        if !partition.is_default() {
            // the wire protocol only exposes removal from the default
            // partition; queue drains must run next to the store
            return Err(StoreError::bad_request(
                "remote removal is limited to the default partition",
            ));
        }
        if refs.is_empty() {
            return Ok(());
        }
        let form: Vec<(String, String)> = refs
            .iter()
            .enumerate()
            .map(|(i, r)| (format!("blob{}", i + 1), r.to_string()))
            .collect();
        let resp = self
            .with_auth(self.http.post(self.url("/camli/remove")?))
            .form(&form)
            .send()
            .await
            .map_err(http_err)?;
        let resp = check_status(resp)?;
        let body = resp.bytes().await.map_err(http_err)?;
        let parsed: RemoveResponse = serde_json::from_slice(&body)
            .map_err(|err| StoreError::other(format!("bad remove response: {err}")))?;
        match parsed.error {
            None => Ok(()),
            Some(msg) => Err(StoreError::other(format!("remove failed: {msg}"))),
        }
    }
}

fn empty_stream() -> ByteStream {
    Box::new(futures::stream::empty())
}

fn http_err(err: reqwest::Error) -> StoreError {
    StoreError::Io(io::Error::other(err.to_string()))
}

fn status_error(status: StatusCode) -> StoreError {
    match status {
        StatusCode::NOT_FOUND => StoreError::NotFound,
        StatusCode::UNAUTHORIZED => StoreError::Unauthorized,
        StatusCode::BAD_REQUEST => StoreError::bad_request("server rejected the request"),
        status => StoreError::other(format!("unexpected response status {status}")),
    }
}

fn check_status(resp: reqwest::Response) -> StoreResult<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else {
        Err(status_error(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_fill_in() {
        let cfg: HttpStoreConfig =
            serde_json::from_str(r#"{"base_url":"http://localhost:3179"}"#).unwrap();
        assert_eq!(cfg.pool_max_idle_per_host, 8);
        assert_eq!(cfg.pool_idle_timeout_secs, 90);
        assert!(cfg.auth.is_none());
    }

    #[test]
    fn debug_never_shows_credentials() {
        let auth = ClientAuth::UserPass {
            user: "alice".into(),
            password: "hunter2".into(),
        };
        let rendered = format!("{auth:?}");
        assert!(!rendered.contains("hunter2"));

        let auth = ClientAuth::Token {
            token: "tok-secret".into(),
        };
        assert!(!format!("{auth:?}").contains("tok-secret"));
    }

    #[test]
    fn queue_partition_removal_refused() {
        let store = HttpStore::create(HttpStoreConfig::new("http://localhost:3179", None)).unwrap();
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let idx = Partition::parse("idx").unwrap();
        let err = rt.block_on(store.remove(&idx, &[])).unwrap_err();
        assert!(matches!(err, StoreError::BadRequest(_)));
    }
}
