//! Shared test utilities for batchmail integration tests.
//!
//! This module provides:
//! - `MockHttpServer`, a local HTTP responder standing in for the token
//!   endpoint and the Gmail API
//! - `TestEnv`, temp-dir backed settings and stores

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use batchmail::storage::{EncryptedKvStore, PendingCredentialStore, TokenStore};
use batchmail::{Settings, TokenEncryptor};

pub const TEST_KEY: &str = "MDAwMDAwMDAwMDAwMDAwMDAwMDAwMDAwMDAwMDAwMDA=";
pub const OTHER_KEY: &str = "MTExMTExMTExMTExMTExMTExMTExMTExMTExMTExMTE=";

/// One request as received by [`MockHttpServer`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Decodes an `application/x-www-form-urlencoded` body.
    pub fn form(&self) -> Vec<(String, String)> {
        reqwest::Url::parse(&format!("http://form.invalid/?{}", self.body))
            .map(|url| url.query_pairs().into_owned().collect())
            .unwrap_or_default()
    }

    pub fn form_value(&self, name: &str) -> Option<String> {
        self.form()
            .into_iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }
}

/// Answers each incoming connection with the next canned response, in order.
///
/// Every response carries `Connection: close`, so each request arrives on a
/// fresh connection. Once the responses run out, further connections get 500.
pub struct MockHttpServer {
    pub base_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    handle: JoinHandle<()>,
}

impl MockHttpServer {
    pub async fn start(responses: Vec<(u16, String)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock server");
        let addr = listener.local_addr().expect("Mock server has no address");
        let requests = Arc::new(Mutex::new(Vec::new()));

        let recorded = Arc::clone(&requests);
        let handle = tokio::spawn(async move {
            let mut responses = responses.into_iter();
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let (status, body) = responses
                    .next()
                    .unwrap_or((500, r#"{"error":"no more responses"}"#.to_string()));
                if let Some(request) = serve(stream, status, &body).await {
                    recorded.lock().unwrap().push(request);
                }
            }
        });

        Self {
            base_url: format!("http://{}", addr),
            requests,
            handle,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for MockHttpServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(mut stream: TcpStream, status: u16, body: &str) -> Option<RecordedRequest> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        if let Some(pos) = find_subslice(&buffer, b"\r\n\r\n") {
            break pos;
        }
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buffer.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(n, v)| (n.trim().to_string(), v.trim().to_string()))
        .collect();

    let content_length = headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);

    let mut body_bytes = buffer[header_end + 4..].to_vec();
    while body_bytes.len() < content_length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        body_bytes.extend_from_slice(&chunk[..n]);
    }

    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason(status),
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;

    Some(RecordedRequest {
        method,
        path,
        headers,
        body: String::from_utf8_lossy(&body_bytes).to_string(),
    })
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        _ => "Internal Server Error",
    }
}

/// Temp directory plus settings pointing all storage into it.
pub struct TestEnv {
    pub temp_dir: TempDir,
    pub settings: Settings,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_extra("")
    }

    /// `extra` is spliced into the settings JSON, e.g. `"google_client_id": "x",`.
    pub fn with_extra(extra: &str) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let token_path = temp_dir.path().join("data").join("token_store.json");
        let pending_path = temp_dir.path().join("data").join("pending_credentials.json");

        let json = format!(
            r#"{{
                {extra}
                "secret_key": "test-cookie-secret",
                "encryption_key": "{key}",
                "token_storage_path": {token},
                "pending_storage_path": {pending}
            }}"#,
            extra = extra,
            key = TEST_KEY,
            token = serde_json::to_string(&token_path).unwrap(),
            pending = serde_json::to_string(&pending_path).unwrap(),
        );
        let settings = Settings::from_json_str(&json).expect("Test settings are valid");

        Self { temp_dir, settings }
    }

    pub fn token_store(&self) -> TokenStore {
        let encryptor = Arc::new(TokenEncryptor::from_base64_key(TEST_KEY).unwrap());
        TokenStore::new(
            EncryptedKvStore::open(&self.settings.token_storage_path, encryptor).unwrap(),
        )
    }

    pub fn pending_store(&self) -> PendingCredentialStore {
        let encryptor = Arc::new(TokenEncryptor::from_base64_key(TEST_KEY).unwrap());
        PendingCredentialStore::new(
            EncryptedKvStore::open(&self.settings.pending_storage_path, encryptor).unwrap(),
        )
    }
}

/// A token endpoint success body.
pub fn token_json(access_token: &str, refresh_token: Option<&str>, expires_in: u64) -> String {
    let mut body = serde_json::json!({
        "access_token": access_token,
        "token_type": "Bearer",
        "expires_in": expires_in,
        "scope": "https://www.googleapis.com/auth/gmail.send",
    });
    if let Some(refresh_token) = refresh_token {
        body["refresh_token"] = serde_json::json!(refresh_token);
    }
    body.to_string()
}

pub const RECIPIENTS_CSV: &str = "title,first_name,last_name,email\n\
Dr.,Ada,Lovelace,ada@example.com\n\
Mr.,Alan,Turing,alan@example.com\n\
Rear Admiral,Grace,Hopper,grace@example.com\n";
