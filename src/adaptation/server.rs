//! Adaptation server accept loop: one task per connection, grounded in
//! `src/api/console_socket.rs`'s raw-socket per-connection accept pattern.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::adaptation::protocol::{
    self, Method, Request,
};
use crate::credentials::CredentialStore;

const READ_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

/// Shared state the adaptation server needs per connection.
pub struct AdaptationState {
    /// Credential store consulted for the header to inject.
    pub credential_store: Arc<CredentialStore>,
    /// Host the adaptation server rewrites requests for; any other `Host`
    /// header passes through unmodified (204-equivalent).
    pub upstream_host: String,
}

/// Run the adaptation server's accept loop on `listener` until the process
/// is asked to shut down.
pub async fn run(listener: TcpListener, state: Arc<AdaptationState>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                tracing::warn!(error = %err, "adaptation server accept failed");
                continue;
            }
        };
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, &state).await {
                tracing::debug!(peer = %peer, error = %err, "adaptation connection ended");
            }
        });
    }
}

async fn read_frame(stream: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let read = tokio::time::timeout(READ_TIMEOUT, stream.read(&mut chunk))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "read timeout"))??;
        if read == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..read]);
        if buf.len() > MAX_FRAME_BYTES {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "frame too large"));
        }
        // A full ICAP-like frame is complete once we can see the header
        // terminator and, for bodies, a trailing chunk terminator.
        if let Some(pos) = find_subslice(&buf, b"\r\n\r\n") {
            let body = &buf[pos + 4..];
            if body.is_empty() || body.ends_with(b"0\r\n\r\n") || body == protocol::PREVIEW_SENTINEL {
                break;
            }
        }
    }
    Ok(buf)
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn host_header(headers: &[String]) -> Option<String> {
    headers.iter().find_map(|line| {
        line.split_once(':').and_then(|(name, value)| {
            (name.trim().eq_ignore_ascii_case("host")).then(|| value.trim().to_string())
        })
    })
}

async fn handle_connection(mut stream: TcpStream, state: &AdaptationState) -> std::io::Result<()> {
    let raw = read_frame(&mut stream).await?;
    if raw.is_empty() {
        return Ok(());
    }

    let request = match protocol::parse_request(&raw) {
        Ok(req) => req,
        Err(crate::errors::AdaptationError::UnsupportedMethod(_)) => {
            stream.write_all(&protocol::build_unsupported_method_response()).await?;
            return Ok(());
        }
        Err(_) => {
            stream.write_all(&protocol::build_bad_request_response()).await?;
            return Ok(());
        }
    };

    match request.method {
        Method::Options => {
            stream.write_all(&protocol::build_options_response()).await?;
        }
        Method::ReqMod => {
            if request.is_preview {
                stream.write_all(&protocol::build_continue_response()).await?;
                let rest = read_frame(&mut stream).await?;
                let full_request = match protocol::parse_request(&rest) {
                    Ok(req) => req,
                    Err(_) => {
                        stream.write_all(&protocol::build_bad_request_response()).await?;
                        return Ok(());
                    }
                };
                respond_reqmod(&mut stream, &full_request, state).await?;
            } else {
                respond_reqmod(&mut stream, &request, state).await?;
            }
        }
    }

    Ok(())
}

async fn respond_reqmod(
    stream: &mut TcpStream,
    request: &Request,
    state: &AdaptationState,
) -> std::io::Result<()> {
    let host_matches = host_header(&request.http_request_headers)
        .is_some_and(|h| h.eq_ignore_ascii_case(&state.upstream_host));

    if !host_matches {
        stream.write_all(&protocol::build_no_modification_response()).await?;
        return Ok(());
    }

    state.credential_store.refresh_if_changed();

    let modified_headers = match state.credential_store.current() {
        Some(credential) => protocol::inject_credential_header(
            &request.http_request_headers,
            &credential.header_name,
            &credential.header_value,
        ),
        None => {
            tracing::warn!("no credential currently loaded, stripping client-supplied placeholder header");
            protocol::strip_placeholder_auth_headers(&request.http_request_headers)
        }
    };
    let response = protocol::build_reqmod_response(&modified_headers, &request.http_request_body, true);
    stream.write_all(&response).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CredentialConfig, CredentialKind};
    use std::net::SocketAddr;
    use tokio::io::AsyncWriteExt as _;

    async fn spawn_test_server(
        upstream_host: &str,
        credential_value: Option<&str>,
    ) -> (SocketAddr, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let cred_path = dir.path().join("cred");
        if let Some(value) = credential_value {
            std::fs::write(&cred_path, value).unwrap();
        }

        let config = CredentialConfig {
            source_path: cred_path,
            kind: CredentialKind::ApiKey,
            header_name: "x-api-key".to_string(),
        };
        let state = Arc::new(AdaptationState {
            credential_store: Arc::new(CredentialStore::new(&config)),
            upstream_host: upstream_host.to_string(),
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(run(listener, state));
        (addr, dir)
    }

    #[tokio::test]
    async fn options_handshake_returns_allow_204() {
        let (addr, _dir) = spawn_test_server("api.anthropic.com", None).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"OPTIONS icap://gw/reqmod ICAP/1.0\r\n\r\n").await.unwrap();

        let mut buf = vec![0u8; 4096];
        let n = stream.read(&mut buf).await.unwrap();
        let text = String::from_utf8_lossy(&buf[..n]);
        assert!(text.contains("200 OK"));
        assert!(text.contains("Allow: 204"));
    }

    #[tokio::test]
    async fn reqmod_injects_credential_for_matching_host() {
        let (addr, _dir) = spawn_test_server("api.anthropic.com", Some("sk-injected")).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let frame = b"REQMOD icap://gw/reqmod ICAP/1.0\r\nEncapsulated: req-hdr=0, null-body=40\r\n\r\nGET /v1/messages HTTP/1.1\r\nHost: api.anthropic.com\r\n\r\n";
        stream.write_all(frame).await.unwrap();

        let mut buf = vec![0u8; 4096];
        let n = stream.read(&mut buf).await.unwrap();
        let text = String::from_utf8_lossy(&buf[..n]);
        assert!(text.contains("200 OK"));
        assert!(text.contains("x-api-key: sk-injected"));
    }

    #[tokio::test]
    async fn reqmod_preview_sentinel_triggers_continue_then_injects_credential() {
        let (addr, _dir) = spawn_test_server("api.anthropic.com", Some("sk-injected")).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let preview = b"REQMOD icap://gw/reqmod ICAP/1.0\r\nEncapsulated: req-hdr=0, req-body=40\r\n\r\nGET /v1/messages HTTP/1.1\r\nHost: api.anthropic.com\r\n\r\n0\r\n\r\n";
        stream.write_all(preview).await.unwrap();

        let mut buf = vec![0u8; 4096];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], protocol::build_continue_response().as_slice());

        let real_request = b"REQMOD icap://gw/reqmod ICAP/1.0\r\nEncapsulated: req-hdr=0, null-body=40\r\n\r\nGET /v1/messages HTTP/1.1\r\nHost: api.anthropic.com\r\n\r\n";
        stream.write_all(real_request).await.unwrap();

        let n = stream.read(&mut buf).await.unwrap();
        let text = String::from_utf8_lossy(&buf[..n]);
        assert!(text.contains("200 OK"));
        assert!(text.contains("x-api-key: sk-injected"));
        assert!(!text.to_lowercase().contains("authorization:"));
    }

    #[tokio::test]
    async fn reqmod_strips_placeholder_header_when_no_credential_loaded() {
        let (addr, _dir) = spawn_test_server("api.anthropic.com", None).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let frame = b"REQMOD icap://gw/reqmod ICAP/1.0\r\nEncapsulated: req-hdr=0, null-body=70\r\n\r\nGET /v1/messages HTTP/1.1\r\nHost: api.anthropic.com\r\nx-api-key: client-placeholder\r\n\r\n";
        stream.write_all(frame).await.unwrap();

        let mut buf = vec![0u8; 4096];
        let n = stream.read(&mut buf).await.unwrap();
        let text = String::from_utf8_lossy(&buf[..n]);
        assert!(text.contains("200 OK"));
        assert!(!text.to_lowercase().contains("client-placeholder"));
    }

    #[tokio::test]
    async fn reqmod_passes_through_for_non_matching_host() {
        let (addr, _dir) = spawn_test_server("api.anthropic.com", Some("sk-injected")).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let frame = b"REQMOD icap://gw/reqmod ICAP/1.0\r\nEncapsulated: req-hdr=0, null-body=30\r\n\r\nGET / HTTP/1.1\r\nHost: example.com\r\n\r\n";
        stream.write_all(frame).await.unwrap();

        let mut buf = vec![0u8; 4096];
        let n = stream.read(&mut buf).await.unwrap();
        let text = String::from_utf8_lossy(&buf[..n]);
        assert!(text.contains("204"));
    }
}
