use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use reqwest::cookie::Jar;
use reqwest::{Client, ClientBuilder};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::error::{RepoError, Result};
use crate::metadata::RemoteRecord;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// C5 — stateless HTTP client against the companion catalog service.
///
/// Mirrors the teacher's `http::ApiClient`: a fixed-timeout `reqwest`
/// client, typed status-to-error mapping, and streamed downloads that
/// only become visible via an atomic rename (`sync::download_to_tmp`'s
/// pattern).
#[derive(Clone)]
pub struct RemoteCatalogClient {
    http: Client,
    cookies: Arc<Jar>,
    catalog_url: String,
    upload_url: String,
}

impl RemoteCatalogClient {
    pub fn new(catalog_url: &str, upload_url: &str, proxy: Option<&str>) -> Result<Self> {
        let cookies = Arc::new(Jar::default());
        let mut builder = ClientBuilder::new()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(READ_TIMEOUT)
            .cookie_provider(cookies.clone())
            .user_agent("scriptrepo-rs/0.1");

        builder = match proxy {
            Some(p) if !p.is_empty() => builder
                .proxy(reqwest::Proxy::all(p).map_err(|e| RepoError::Network {
                    detail: e.to_string(),
                })?),
            _ => builder.no_proxy(),
        };

        let http = builder.build().map_err(|e| RepoError::Network {
            detail: e.to_string(),
        })?;

        Ok(Self {
            http,
            cookies,
            catalog_url: catalog_url.trim_end_matches('/').to_string(),
            upload_url: upload_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn catalog_url(&self) -> &str {
        &self.catalog_url
    }

    pub fn set_catalog_url(&mut self, url: String) {
        self.catalog_url = url.trim_end_matches('/').to_string();
    }

    /// GET the catalog document. Idempotent; no retry at this layer.
    ///
    /// A key carrying a trailing `/` names a directory (§8 scenario 1's
    /// `"inel/"`); it's collapsed onto its slash-free form here so it
    /// doesn't coexist with the directory `merge` synthesizes from that
    /// directory's own descendants.
    pub async fn fetch_catalog(&self) -> Result<HashMap<String, RemoteRecord>> {
        let resp = self
            .http
            .get(&self.catalog_url)
            .send()
            .await
            .map_err(map_transport)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(RepoError::Http {
                status: status.as_u16(),
                detail: resp.text().await.unwrap_or_default(),
            });
        }
        let raw = resp
            .json::<HashMap<String, RemoteRecord>>()
            .await
            .map_err(|e| RepoError::MalformedCatalog {
                detail: e.to_string(),
            })?;
        Ok(normalize_directory_keys(raw))
    }

    /// GET `catalog_url + '/' + path`, streaming to a temp file and
    /// renaming into place only once the whole body is received. Partial
    /// downloads never become visible.
    pub async fn download_file(&self, path: &str, dest: &Path) -> Result<()> {
        let url = format!("{}/{}", self.catalog_url, path);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(map_transport)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(RepoError::Http {
                status: status.as_u16(),
                detail: resp.text().await.unwrap_or_default(),
            });
        }

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = dest.with_file_name(format!(
            ".{}.tmp-{}-{}",
            dest.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "download".to_string()),
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        ));

        let write_result = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            let mut stream = resp.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(map_transport)?;
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            Ok::<(), RepoError>(())
        }
        .await;

        if let Err(err) = write_result {
            let _ = std::fs::remove_file(&tmp);
            return Err(err);
        }

        tokio::fs::rename(&tmp, dest).await.map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            RepoError::Io {
                detail: e.to_string(),
            }
        })
    }

    /// Two-phase upload: GET the upload endpoint to collect any
    /// anti-forgery cookie, then POST a multipart form carrying it.
    /// Returns the server's canonical publication timestamp.
    pub async fn upload(
        &self,
        path: &str,
        body: Vec<u8>,
        comment: &str,
        author: &str,
        email: &str,
    ) -> Result<DateTime<Utc>> {
        let csrf_token = self.prime_csrf_token().await?;

        let mut form = reqwest::multipart::Form::new()
            .text("comment", comment.to_string())
            .text("author", author.to_string())
            .text("email", email.to_string())
            .part(
                "script",
                reqwest::multipart::Part::bytes(body)
                    .file_name(path.to_string()),
            );
        if let Some(token) = csrf_token {
            form = form.text("csrfmiddlewaretoken", token);
        }

        let resp = self
            .http
            .post(&self.upload_url)
            .multipart(form)
            .send()
            .await
            .map_err(map_transport)?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(RepoError::RemoteDenied { message });
        }

        let parsed: UploadResponse = resp.json().await.map_err(|e| RepoError::RemoteDenied {
            message: format!("malformed upload response: {e}"),
        })?;
        Ok(parsed.pub_date)
    }

    /// POST to `<upload_url>/delete`. The server enforces authorization;
    /// any non-2xx becomes `RemoteDenied` carrying the server message.
    pub async fn delete_remote(
        &self,
        path: &str,
        comment: &str,
        author: &str,
        email: &str,
    ) -> Result<()> {
        let csrf_token = self.prime_csrf_token().await?;
        let url = format!("{}/delete", self.upload_url);

        let mut form = reqwest::multipart::Form::new()
            .text("path", path.to_string())
            .text("comment", comment.to_string())
            .text("author", author.to_string())
            .text("email", email.to_string());
        if let Some(token) = csrf_token {
            form = form.text("csrfmiddlewaretoken", token);
        }

        let resp = self
            .http
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(map_transport)?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(RepoError::RemoteDenied { message });
        }
        Ok(())
    }

    async fn prime_csrf_token(&self) -> Result<Option<String>> {
        let resp = self
            .http
            .get(&self.upload_url)
            .send()
            .await
            .map_err(map_transport)?;
        let _ = resp.status();
        let url = self
            .upload_url
            .parse::<reqwest::Url>()
            .map_err(|e| RepoError::Network {
                detail: e.to_string(),
            })?;
        Ok(self
            .cookies
            .cookies(&url)
            .and_then(|header| extract_cookie(header.to_str().ok()?, "csrfmiddlewaretoken")))
    }
}

fn normalize_directory_keys(raw: HashMap<String, RemoteRecord>) -> HashMap<String, RemoteRecord> {
    let mut out = HashMap::with_capacity(raw.len());
    for (key, mut rec) in raw {
        if let Some(stripped) = key.strip_suffix('/') {
            rec.directory = true;
            out.insert(stripped.to_string(), rec);
        } else {
            out.insert(key, rec);
        }
    }
    out
}

fn extract_cookie(header: &str, name: &str) -> Option<String> {
    header.split(';').find_map(|kv| {
        let kv = kv.trim();
        let (k, v) = kv.split_once('=')?;
        if k == name {
            Some(v.to_string())
        } else {
            None
        }
    })
}

fn map_transport(err: reqwest::Error) -> RepoError {
    if let Some(status) = err.status() {
        RepoError::Http {
            status: status.as_u16(),
            detail: err.to_string(),
        }
    } else {
        RepoError::Network {
            detail: err.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    pub_date: DateTime<Utc>,
    #[allow(dead_code)]
    #[serde(default)]
    message: String,
}

#[derive(Debug, Serialize)]
#[allow(dead_code)]
struct DeleteRequest<'a> {
    path: &'a str,
    comment: &'a str,
    author: &'a str,
    email: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::{SocketAddr, TcpListener};

    /// Serves exactly one HTTP request with a fixed raw response, then
    /// closes. Good enough to exercise `fetch_catalog`'s status/JSON
    /// handling without adding an HTTP server dependency to the crate.
    fn spawn_one_shot(response: &'static str) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf);
                let _ = stream.write_all(response.as_bytes());
            }
        });
        addr
    }

    #[tokio::test]
    async fn fetch_catalog_parses_repository_shaped_json() {
        let body = r#"{"README":{"directory":false,"pub_date":"2020-01-01T00:00:00Z","description":"readme","author":"alice"}}"#;
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        let addr = spawn_one_shot(Box::leak(response.into_boxed_str()));

        let client =
            RemoteCatalogClient::new(&format!("http://{addr}/catalog"), "http://x/upload", None)
                .unwrap();
        let catalog = client.fetch_catalog().await.unwrap();
        assert_eq!(catalog.get("README").unwrap().author, "alice");
    }

    #[tokio::test]
    async fn fetch_catalog_collapses_trailing_slash_directory_keys() {
        let body = r#"{"inel/":{"directory":false,"pub_date":"2020-01-01T00:00:00Z","description":"","author":"alice"},"inel/a.py":{"directory":false,"pub_date":"2020-01-01T00:00:00Z","description":"","author":"alice"}}"#;
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        let addr = spawn_one_shot(Box::leak(response.into_boxed_str()));

        let client =
            RemoteCatalogClient::new(&format!("http://{addr}/catalog"), "http://x/upload", None)
                .unwrap();
        let catalog = client.fetch_catalog().await.unwrap();
        assert!(!catalog.contains_key("inel/"));
        let inel = catalog.get("inel").unwrap();
        assert!(inel.directory);
        assert!(!catalog.get("inel/a.py").unwrap().directory);
    }

    #[tokio::test]
    async fn fetch_catalog_non_2xx_is_http_error() {
        let response =
            "HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
        let addr = spawn_one_shot(response);

        let client =
            RemoteCatalogClient::new(&format!("http://{addr}/catalog"), "http://x/upload", None)
                .unwrap();
        let err = client.fetch_catalog().await.unwrap_err();
        assert!(matches!(err, RepoError::Http { status: 500, .. }));
    }

    #[test]
    fn extract_cookie_reads_named_value_among_pairs() {
        let header = "sessionid=abc; csrfmiddlewaretoken=xyz123; path=/";
        assert_eq!(
            extract_cookie(header, "csrfmiddlewaretoken"),
            Some("xyz123".to_string())
        );
        assert_eq!(extract_cookie(header, "missing"), None);
    }
}
