//! Default `Downloader`: fetches album/artist art over HTTP via `reqwest`.
//! Request-building style (base URL + query-param assembly + a `reqwest::Client`
//! held across calls) grounded on `blackbird-subsonic/src/client.rs`; the
//! HTTP-status-to-outcome mapping is generalized from `ReqwestError`/
//! `SubsonicError` into the `ReplyStatus` tiers spec.md §9 requires.
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thumb_core::downloader::{Downloader, Reply, ReplyStatus};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Fetches art from a provider that serves `{base_url}/album/{artist}/{album}`
/// and `{base_url}/artist/{artist}/{album}`.
pub struct HttpDownloader {
    base_url: String,
    client: reqwest::Client,
}

impl HttpDownloader {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), client: reqwest::Client::new() }
    }

    async fn fetch(&self, path: &str, timeout: Duration) -> Reply {
        let url = format!("{}{}", self.base_url, path);
        let request = self.client.get(&url).timeout(timeout);
        match request.send().await {
            Ok(resp) if resp.status().is_success() => match resp.bytes().await {
                Ok(bytes) => Reply::success(bytes.to_vec()),
                Err(e) => Reply::failed(status_for_transport_error(&e)),
            },
            Ok(resp) if resp.status().as_u16() == 404 => Reply::failed(ReplyStatus::NotFound),
            Ok(resp) if resp.status().is_server_error() => Reply::failed(ReplyStatus::TemporaryError),
            Ok(_resp) => Reply::failed(ReplyStatus::HardError),
            Err(e) => Reply::failed(status_for_transport_error(&e)),
        }
    }
}

fn status_for_transport_error(e: &reqwest::Error) -> ReplyStatus {
    if e.is_timeout() {
        ReplyStatus::Timeout
    } else if e.is_connect() {
        ReplyStatus::NetworkDown
    } else {
        ReplyStatus::TemporaryError
    }
}

impl Downloader for HttpDownloader {
    fn download_album<'a>(&'a self, artist: &'a str, album: &'a str, timeout: Duration) -> BoxFuture<'a, Reply> {
        Box::pin(async move { self.fetch(&format!("/album/{artist}/{album}"), timeout).await })
    }

    fn download_artist<'a>(&'a self, artist: &'a str, album: &'a str, timeout: Duration) -> BoxFuture<'a, Reply> {
        Box::pin(async move { self.fetch(&format!("/artist/{artist}/{album}"), timeout).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::net::SocketAddr;

    async fn spawn_server(status: u16, body: &'static [u8]) -> SocketAddr {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else { return };
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let reason = if status == 200 { "OK" } else { "ERR" };
                let header = format!(
                    "HTTP/1.1 {status} {reason}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = stream.write_all(header.as_bytes()).await;
                let _ = stream.write_all(body).await;
                let _: Result<(), Infallible> = Ok(());
            }
        });
        addr
    }

    #[tokio::test]
    async fn success_returns_the_body_bytes() {
        let addr = spawn_server(200, b"art-bytes").await;
        let downloader = HttpDownloader::new(format!("http://{addr}"));
        let reply = downloader.download_album("artist", "album", Duration::from_secs(5)).await;
        assert_eq!(reply.status, ReplyStatus::Success);
        assert_eq!(reply.bytes.unwrap(), b"art-bytes");
    }

    #[tokio::test]
    async fn not_found_maps_to_not_found() {
        let addr = spawn_server(404, b"").await;
        let downloader = HttpDownloader::new(format!("http://{addr}"));
        let reply = downloader.download_artist("artist", "album", Duration::from_secs(5)).await;
        assert_eq!(reply.status, ReplyStatus::NotFound);
    }

    #[tokio::test]
    async fn server_error_maps_to_temporary_error() {
        let addr = spawn_server(503, b"").await;
        let downloader = HttpDownloader::new(format!("http://{addr}"));
        let reply = downloader.download_album("artist", "album", Duration::from_secs(5)).await;
        assert_eq!(reply.status, ReplyStatus::TemporaryError);
    }

    #[tokio::test]
    async fn connection_refused_maps_to_network_down() {
        let downloader = HttpDownloader::new("http://127.0.0.1:1");
        let reply = downloader.download_album("artist", "album", Duration::from_secs(5)).await;
        assert_eq!(reply.status, ReplyStatus::NetworkDown);
    }
}
