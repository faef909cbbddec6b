use crate::{MarketplaceConfig, RemoteBackend, RemoteError};
use std::io::{self, Read, Write};

const BLOCK_SIZE: usize = 4096;

/// `ureq`-based backend for marketplace descriptors and image blobs.
///
/// The bearer token, if any, is only sent to URLs under the configured
/// marketplace; image locations on other hosts are fetched anonymously.
pub struct HttpBackend {
    config: MarketplaceConfig,
    agent: ureq::Agent,
}

impl HttpBackend {
    pub fn new(config: MarketplaceConfig) -> Self {
        let agent = ureq::Agent::new_with_defaults();
        Self { config, agent }
    }

    fn open(&self, url: &str) -> Result<ureq::http::Response<ureq::Body>, RemoteError> {
        let mut req = self.agent.get(url).header("User-Agent", crate::USER_AGENT);
        if let Some(ref token) = self.config.auth_token {
            if self.config.owns(url) {
                req = req.header("Authorization", &format!("Bearer {token}"));
            }
        }
        let resp = match req.call() {
            Ok(r) => r,
            Err(ureq::Error::StatusCode(404)) => {
                return Err(RemoteError::NotFound(url.to_owned()));
            }
            Err(ureq::Error::StatusCode(code)) => {
                return Err(RemoteError::Http(format!("HTTP {code} for {url}")));
            }
            Err(e) => {
                return Err(RemoteError::Http(format!("{url}: {e}")));
            }
        };

        let code = resp.status().as_u16();
        if code == 404 {
            return Err(RemoteError::NotFound(url.to_owned()));
        }
        if code >= 400 {
            return Err(RemoteError::Http(format!("HTTP {code} for {url}")));
        }
        Ok(resp)
    }
}

impl RemoteBackend for HttpBackend {
    fn get(&self, url: &str) -> Result<Vec<u8>, RemoteError> {
        tracing::debug!("GET {url}");
        let mut reader = self.open(url)?.into_body().into_reader();
        let mut body = Vec::new();
        reader
            .read_to_end(&mut body)
            .map_err(|e| RemoteError::Http(e.to_string()))?;
        Ok(body)
    }

    fn copy_to(&self, url: &str, sink: &mut dyn Write) -> Result<u64, RemoteError> {
        tracing::debug!("GET {url} (streaming)");
        let mut reader = self.open(url)?.into_body().into_reader();
        let mut buf = [0u8; BLOCK_SIZE];
        let mut total = 0u64;
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(RemoteError::Http(format!("{url}: {e}"))),
            };
            sink.write_all(&buf[..n])?;
            total += n as u64;
        }
        sink.flush()?;
        tracing::debug!("GET {url}: {total} bytes");
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::{BufRead, BufReader};
    use std::net::TcpListener;
    use std::sync::{Arc, Mutex};

    /// A captured HTTP request for header inspection.
    #[derive(Debug, Clone)]
    struct CapturedRequest {
        path: String,
        headers: HashMap<String, String>,
    }

    struct MockServer {
        addr: String,
        _handle: std::thread::JoinHandle<()>,
        requests: Arc<Mutex<Vec<CapturedRequest>>>,
    }

    impl MockServer {
        /// Serve `routes` (path → body) for GET; anything else is a 404,
        /// except `/boom` which answers 500.
        fn start(routes: Vec<(&'static str, Vec<u8>)>) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let addr = format!("http://{}", listener.local_addr().unwrap());
            let routes: Arc<HashMap<&'static str, Vec<u8>>> = Arc::new(routes.into_iter().collect());
            let requests: Arc<Mutex<Vec<CapturedRequest>>> = Arc::new(Mutex::new(Vec::new()));

            let requests_clone = Arc::clone(&requests);
            let handle = std::thread::spawn(move || {
                for stream in listener.incoming() {
                    let Ok(mut stream) = stream else { break };
                    let routes = Arc::clone(&routes);
                    let reqs = Arc::clone(&requests_clone);

                    std::thread::spawn(move || {
                        let mut reader = BufReader::new(stream.try_clone().unwrap());
                        let mut request_line = String::new();
                        if reader.read_line(&mut request_line).is_err() {
                            return;
                        }
                        let parts: Vec<&str> = request_line.trim().splitn(3, ' ').collect();
                        if parts.len() < 2 {
                            return;
                        }
                        let path = parts[1].to_owned();

                        let mut headers = HashMap::new();
                        loop {
                            let mut line = String::new();
                            if reader.read_line(&mut line).is_err() || line.trim().is_empty() {
                                break;
                            }
                            if let Some((k, v)) = line.trim().split_once(": ") {
                                headers.insert(k.to_lowercase(), v.to_owned());
                            }
                        }
                        reqs.lock().unwrap().push(CapturedRequest {
                            path: path.clone(),
                            headers,
                        });

                        let (status, body): (&str, &[u8]) = match routes.get(path.as_str()) {
                            Some(body) => ("200 OK", body.as_slice()),
                            None if path == "/boom" => ("500 Internal Server Error", &b""[..]),
                            None => ("404 Not Found", &b""[..]),
                        };
                        let head = format!(
                            "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                            body.len()
                        );
                        let _ = stream.write_all(head.as_bytes());
                        let _ = stream.write_all(body);
                        let _ = stream.flush();
                    });
                }
            });

            MockServer {
                addr,
                _handle: handle,
                requests,
            }
        }

        fn url(&self, path: &str) -> String {
            format!("{}{path}", self.addr)
        }

        fn captured_requests(&self) -> Vec<CapturedRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    fn backend_for(server: &MockServer, token: Option<&str>) -> HttpBackend {
        let mut config = MarketplaceConfig::new(&server.url("/metadata"));
        if let Some(token) = token {
            config = config.with_token(token);
        }
        HttpBackend::new(config)
    }

    #[test]
    fn http_get_returns_body() {
        let server = MockServer::start(vec![("/metadata/abc", b"<metadata/>".to_vec())]);
        let backend = backend_for(&server, None);
        let body = backend.get(&server.url("/metadata/abc")).unwrap();
        assert_eq!(body, b"<metadata/>");
    }

    #[test]
    fn http_get_missing_is_not_found() {
        let server = MockServer::start(vec![]);
        let backend = backend_for(&server, None);
        let err = backend.get(&server.url("/metadata/nope")).unwrap_err();
        assert!(matches!(err, RemoteError::NotFound(_)));
    }

    #[test]
    fn http_server_error_is_http_error() {
        let server = MockServer::start(vec![]);
        let backend = backend_for(&server, None);
        let err = backend.get(&server.url("/boom")).unwrap_err();
        assert!(matches!(err, RemoteError::Http(ref m) if m.contains("500")));
    }

    #[test]
    fn http_connection_refused_returns_error() {
        let backend = HttpBackend::new(MarketplaceConfig::new("http://127.0.0.1:1"));
        assert!(backend.get("http://127.0.0.1:1/x").is_err());
    }

    #[test]
    fn http_copy_to_streams_large_body() {
        let large: Vec<u8> = (0..1_000_000).map(|i| (i % 256) as u8).collect();
        let server = MockServer::start(vec![("/images/big.img", large.clone())]);
        let backend = backend_for(&server, None);

        let mut sink = Vec::new();
        let n = backend
            .copy_to(&server.url("/images/big.img"), &mut sink)
            .unwrap();
        assert_eq!(n, 1_000_000);
        assert_eq!(sink, large);
    }

    #[test]
    fn http_sends_user_agent() {
        let server = MockServer::start(vec![("/metadata/a", b"x".to_vec())]);
        let backend = backend_for(&server, None);
        backend.get(&server.url("/metadata/a")).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(50));

        let reqs = server.captured_requests();
        assert!(!reqs.is_empty());
        assert_eq!(
            reqs[0].headers.get("user-agent").map(String::as_str),
            Some(crate::USER_AGENT)
        );
    }

    #[test]
    fn http_auth_token_only_sent_to_marketplace() {
        let server = MockServer::start(vec![
            ("/metadata/a", b"x".to_vec()),
            ("/images/a.img", b"y".to_vec()),
        ]);
        let backend = backend_for(&server, Some("secret-token-42"));
        backend.get(&server.url("/metadata/a")).unwrap();
        backend.get(&server.url("/images/a.img")).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(50));

        let reqs = server.captured_requests();
        let auth_for = |path: &str| {
            reqs.iter()
                .find(|r| r.path == path)
                .and_then(|r| r.headers.get("authorization").cloned())
        };
        assert_eq!(
            auth_for("/metadata/a").as_deref(),
            Some("Bearer secret-token-42")
        );
        assert_eq!(auth_for("/images/a.img"), None);
    }
}
