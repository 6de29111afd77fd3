use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use attic_client::{ClientAuth, HttpStore, HttpStoreConfig};
use attic_core::protocol::{EnumerateResponse, PreuploadResponse, UploadResponse};
use attic_core::store::{bytes_stream, collect_bytes};
use attic_core::{BlobRef, Partition, StoreError, Storage};
use attic_server::auth::Auth;
use attic_server::config::ServerConfig;
use attic_server::{AppState, server};
use attic_store_local::{LocalStore, LocalStoreConfig};

const USER: &str = "tester";
const PASS: &str = "sekrit";

const HELLO_REF: &str = "sha1-2aae6c35c94fcfb415dbe95f408b9ce91ee846ed";

struct TestServer {
    base: String,
    shutdown: CancellationToken,
    _dir: TempDir,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn start_server(queues: &[&str]) -> TestServer {
    let dir = TempDir::new().unwrap();
    let store = LocalStore::create(LocalStoreConfig {
        base_path: dir.path().to_string_lossy().into_owned(),
        queue_partitions: queues
            .iter()
            .map(|q| Partition::parse(q).unwrap())
            .collect(),
    })
    .unwrap();
    let state = AppState::new(
        Arc::new(store),
        Auth::parse(&format!("userpass:{USER}:{PASS}")).unwrap(),
        ServerConfig::default(),
    );
    let shutdown = state.shutdown.clone();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server::serve(state, listener));
    TestServer {
        base: format!("http://{addr}"),
        shutdown,
        _dir: dir,
    }
}

async fn upload(srv: &TestServer, name: &str, body: Vec<u8>) -> UploadResponse {
    let part = Part::bytes(body)
        .file_name("blob")
        .mime_str("application/octet-stream")
        .unwrap();
    let form = Form::new().part(name.to_owned(), part);
    let resp = reqwest::Client::new()
        .post(format!("{}/camli/upload", srv.base))
        .basic_auth(USER, Some(PASS))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let text = resp.text().await.unwrap();
    serde_json::from_str(&text).unwrap()
}

async fn upload_bytes(srv: &TestServer, body: &[u8]) -> BlobRef {
    let r = BlobRef::from_bytes(body);
    let resp = upload(srv, r.as_str(), body.to_vec()).await;
    assert_eq!(resp.received.len(), 1, "upload failed: {:?}", resp.error_text);
    r
}

#[tokio::test]
async fn upload_then_fetch_roundtrip() {
    let srv = start_server(&[]).await;

    let part = Part::bytes(b"hello world".as_slice())
        .file_name("blob")
        .mime_str("application/octet-stream")
        .unwrap();
    let form = Form::new().part(HELLO_REF.to_owned(), part);
    let resp = reqwest::Client::new()
        .post(format!("{}/camli/upload", srv.base))
        .basic_auth(USER, Some(PASS))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let text = resp.text().await.unwrap();
    // responses are pretty-printed with two-space indentation
    assert!(text.starts_with("{\n  \""), "not pretty-printed: {text:?}");
    let parsed: UploadResponse = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed.received.len(), 1);
    assert_eq!(parsed.received[0].blob_ref.as_str(), HELLO_REF);
    assert_eq!(parsed.received[0].size, 11);
    assert!(parsed.error_text.is_none());
    assert!(parsed.upload_url.ends_with("/camli/upload"));

    let resp = reqwest::Client::new()
        .get(format!("{}/camli/{HELLO_REF}", srv.base))
        .basic_auth(USER, Some(PASS))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get("content-length").unwrap().to_str().unwrap(),
        "11"
    );
    assert_eq!(resp.text().await.unwrap(), "hello world");
}

#[tokio::test]
async fn digest_mismatch_is_a_per_part_error() {
    let srv = start_server(&[]).await;
    let bogus = "sha1-0000000000000000000000000000000000000000";

    let resp = upload(&srv, bogus, b"hello world".to_vec()).await;
    assert!(resp.received.is_empty());
    let error_text = resp.error_text.unwrap();
    assert!(error_text.contains("corrupt blob"), "got: {error_text}");

    let resp = reqwest::Client::new()
        .get(format!("{}/camli/{bogus}", srv.base))
        .basic_auth(USER, Some(PASS))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn mixed_batch_reports_each_part() {
    let srv = start_server(&[]).await;
    let good = BlobRef::from_bytes(b"the good part");
    let bad = "sha1-1111111111111111111111111111111111111111";

    let form = Form::new()
        .part(
            good.as_str().to_owned(),
            Part::bytes(b"the good part".as_slice())
                .file_name("blob")
                .mime_str("application/octet-stream")
                .unwrap(),
        )
        .part(
            bad.to_owned(),
            Part::bytes(b"does not match".as_slice())
                .file_name("blob")
                .mime_str("application/octet-stream")
                .unwrap(),
        );
    let resp = reqwest::Client::new()
        .post(format!("{}/camli/upload", srv.base))
        .basic_auth(USER, Some(PASS))
        .multipart(form)
        .send()
        .await
        .unwrap();
    let parsed: UploadResponse = serde_json::from_str(&resp.text().await.unwrap()).unwrap();
    assert_eq!(parsed.received.len(), 1);
    assert_eq!(parsed.received[0].blob_ref, good);
    assert!(parsed.error_text.unwrap().contains(bad));
}

#[tokio::test]
async fn range_reads_return_partial_content() {
    let srv = start_server(&[]).await;
    upload_bytes(&srv, b"hello world").await;

    let resp = reqwest::Client::new()
        .get(format!("{}/camli/{HELLO_REF}", srv.base))
        .basic_auth(USER, Some(PASS))
        .header("Range", "bytes=6-10")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        resp.headers().get("content-range").unwrap().to_str().unwrap(),
        "bytes 6-10/11"
    );
    assert_eq!(resp.text().await.unwrap(), "world");

    let resp = reqwest::Client::new()
        .get(format!("{}/camli/{HELLO_REF}", srv.base))
        .basic_auth(USER, Some(PASS))
        .header("Range", "bytes=100-200")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::RANGE_NOT_SATISFIABLE);
}

#[tokio::test]
async fn head_reports_size_and_mtime() {
    let srv = start_server(&[]).await;
    upload_bytes(&srv, b"hello world").await;

    let resp = reqwest::Client::new()
        .head(format!("{}/camli/{HELLO_REF}", srv.base))
        .basic_auth(USER, Some(PASS))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get("content-length").unwrap().to_str().unwrap(),
        "11"
    );
    let last_modified = resp.headers().get("last-modified").unwrap().to_str().unwrap();
    assert!(last_modified.ends_with(" GMT"), "got {last_modified:?}");
}

#[tokio::test]
async fn enumerate_paginates_with_cursor() {
    let srv = start_server(&[]).await;
    let mut refs: Vec<BlobRef> = Vec::new();
    for body in [
        b"page one".as_slice(),
        b"page two",
        b"page three",
        b"page four",
        b"page five",
    ] {
        refs.push(upload_bytes(&srv, body).await);
    }
    refs.sort();

    let client = reqwest::Client::new();
    let mut seen: Vec<BlobRef> = Vec::new();
    let mut after: Option<BlobRef> = None;
    let mut pages = 0;
    loop {
        let mut url = format!("{}/camli/enumerate-blobs?limit=2", srv.base);
        if let Some(a) = &after {
            url.push_str(&format!("&after={a}"));
        }
        let resp = client
            .get(url)
            .basic_auth(USER, Some(PASS))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let page: EnumerateResponse =
            serde_json::from_str(&resp.text().await.unwrap()).unwrap();
        assert!(page.blobs.len() <= 2);
        seen.extend(page.blobs.iter().map(|s| s.blob_ref.clone()));
        pages += 1;
        match page.after {
            Some(a) => after = Some(a),
            None => break,
        }
    }
    assert_eq!(pages, 3);
    assert_eq!(seen, refs);
}

#[tokio::test]
async fn owner_routes_challenge_anonymous_callers() {
    let srv = start_server(&[]).await;

    let resp = reqwest::Client::new()
        .get(format!("{}/camli/enumerate-blobs", srv.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let challenge = resp
        .headers()
        .get("www-authenticate")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(challenge.starts_with("Basic realm="), "got {challenge:?}");

    let resp = reqwest::Client::new()
        .get(format!("{}/camli/enumerate-blobs", srv.base))
        .basic_auth(USER, Some("wrong"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn anonymous_fetch_needs_a_valid_share_chain() {
    let srv = start_server(&[]).await;
    let target = upload_bytes(&srv, b"the shared secret").await;
    let share_body =
        format!(r#"{{"camliType":"share","target":"{target}","authType":"haveref"}}"#);
    let share = upload_bytes(&srv, share_body.as_bytes()).await;

    // valid chain: anonymous read succeeds
    let resp = reqwest::Client::new()
        .get(format!("{}/camli/{target}?via={share}", srv.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.text().await.unwrap(), "the shared secret");

    // no chain at all: slow 401
    let started = Instant::now();
    let resp = reqwest::Client::new()
        .get(format!("{}/camli/{target}", srv.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert!(started.elapsed().as_millis() >= 200, "401 answered too fast");

    // chain naming the wrong target: 401
    let other = upload_bytes(&srv, b"unrelated blob").await;
    let resp = reqwest::Client::new()
        .get(format!("{}/camli/{other}?via={share}", srv.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn preupload_reports_known_blobs() {
    let srv = start_server(&[]).await;
    let known = upload_bytes(&srv, b"already here").await;
    let unknown = BlobRef::from_bytes(b"not yet uploaded");

    let resp = reqwest::Client::new()
        .post(format!("{}/camli/preupload", srv.base))
        .basic_auth(USER, Some(PASS))
        .form(&[
            ("camliversion", "1"),
            ("blob1", known.as_str()),
            ("blob2", unknown.as_str()),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let parsed: PreuploadResponse = serde_json::from_str(&resp.text().await.unwrap()).unwrap();
    assert_eq!(parsed.already_have.len(), 1);
    assert_eq!(parsed.already_have[0].blob_ref, known);
    assert_eq!(parsed.already_have[0].size, 12);
}

#[tokio::test]
async fn remove_deletes_blobs() {
    let srv = start_server(&[]).await;
    let doomed = upload_bytes(&srv, b"short-lived").await;
    let ghost = BlobRef::from_bytes(b"never existed");

    let resp = reqwest::Client::new()
        .post(format!("{}/camli/remove", srv.base))
        .basic_auth(USER, Some(PASS))
        .form(&[("blob1", doomed.as_str()), ("blob2", ghost.as_str())])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let text = resp.text().await.unwrap();
    assert!(!text.contains("error"), "got: {text}");

    let resp = reqwest::Client::new()
        .get(format!("{}/camli/{doomed}", srv.base))
        .basic_auth(USER, Some(PASS))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn malformed_blobref_in_url_is_bad_request() {
    let srv = start_server(&[]).await;
    let resp = reqwest::Client::new()
        .get(format!("{}/camli/not-a-REF", srv.base))
        .basic_auth(USER, Some(PASS))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn remote_store_speaks_the_wire_protocol() {
    let srv = start_server(&[]).await;
    let remote = HttpStore::create(HttpStoreConfig::new(
        srv.base.clone(),
        Some(ClientAuth::UserPass {
            user: USER.to_owned(),
            password: PASS.to_owned(),
        }),
    ))
    .unwrap();

    // receive through the client, then read it back
    let data = Bytes::from_static(b"pushed through the remote store");
    let r = BlobRef::from_bytes(&data);
    let sized = remote.receive(&r, bytes_stream(data.clone())).await.unwrap();
    assert_eq!(sized.size, data.len() as u64);
    assert_eq!(remote.stat(&r).await.unwrap(), data.len() as u64);

    let slice = remote.open_read(&r, 7, Some(7)).await.unwrap();
    let got = collect_bytes(slice, u64::MAX).await.unwrap();
    assert_eq!(&got[..], b"through");

    // enumeration pages transparently
    use futures::StreamExt;
    let mut stream = remote
        .enumerate(
            &Partition::default_partition(),
            None,
            u64::MAX,
            CancellationToken::new(),
        )
        .await
        .unwrap();
    let mut listed = Vec::new();
    while let Some(item) = stream.next().await {
        listed.push(item.unwrap());
    }
    assert_eq!(listed, vec![sized]);

    // stat of a missing blob maps back to NotFound
    let ghost = BlobRef::from_bytes(b"ghost");
    assert!(matches!(remote.stat(&ghost).await, Err(StoreError::NotFound)));

    remote
        .remove(&Partition::default_partition(), &[r.clone()])
        .await
        .unwrap();
    assert!(matches!(remote.stat(&r).await, Err(StoreError::NotFound)));
}
