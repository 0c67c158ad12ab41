use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use tiny_http::{Header, Method, Response, Server};
use tracing::{debug, warn};

use crate::{HarnessError, Result};

/// Local static file server acting as the update source for one test run.
///
/// Serves files under a root directory on 127.0.0.1. The accept loop runs on
/// a background thread; dropping the server unblocks and joins it, so teardown
/// happens even when a scenario bails early.
pub struct FileServer {
    root: PathBuf,
    port: u16,
    server: Arc<Server>,
    handle: Option<JoinHandle<()>>,
}

impl FileServer {
    /// Bind and start serving. Pass port 0 to let the OS pick one.
    pub fn start(root: impl AsRef<Path>, port: u16) -> Result<Self> {
        let root = root
            .as_ref()
            .canonicalize()
            .map_err(HarnessError::Io)?;

        let server = Server::http(("127.0.0.1", port))
            .map_err(|e| HarnessError::Server(format!("failed to bind port {}: {}", port, e)))?;
        let server = Arc::new(server);
        let port = server
            .server_addr()
            .to_ip()
            .map(|addr| addr.port())
            .unwrap_or(port);

        debug!("File server listening on 127.0.0.1:{} for {}", port, root.display());

        let handle = {
            let server = Arc::clone(&server);
            let root = root.clone();
            std::thread::spawn(move || serve_loop(&server, &root))
        };

        Ok(Self {
            root,
            port,
            server,
            handle: Some(handle),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// URL under which a file in the root directory is served.
    pub fn url_for(&self, filename: &str) -> String {
        format!("{}/{}", self.base_url(), filename)
    }
}

impl Drop for FileServer {
    fn drop(&mut self) {
        self.server.unblock();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn serve_loop(server: &Server, root: &Path) {
    for request in server.incoming_requests() {
        if request.method() != &Method::Get {
            let _ = request.respond(Response::from_string("method not allowed").with_status_code(405));
            continue;
        }

        let raw = request.url().to_string();
        let rel = raw
            .split('?')
            .next()
            .unwrap_or("")
            .trim_start_matches('/');

        match resolve(root, rel) {
            Some(path) => match std::fs::File::open(&path) {
                Ok(file) => {
                    debug!("GET /{} -> {}", rel, path.display());
                    let mut response = Response::from_file(file);
                    if let Ok(header) =
                        Header::from_bytes(&b"Content-Type"[..], content_type(&path).as_bytes())
                    {
                        response.add_header(header);
                    }
                    let _ = request.respond(response);
                }
                Err(e) => {
                    warn!("GET /{} failed: {}", rel, e);
                    let _ = request.respond(Response::from_string("not found").with_status_code(404));
                }
            },
            None => {
                warn!("GET /{} rejected", rel);
                let _ = request.respond(Response::from_string("not found").with_status_code(404));
            }
        }
    }
}

/// Resolve a request path inside the root, refusing anything that escapes it.
fn resolve(root: &Path, rel: &str) -> Option<PathBuf> {
    if rel.is_empty() {
        return None;
    }
    let candidate = root.join(rel).canonicalize().ok()?;
    if candidate.starts_with(root) && candidate.is_file() {
        Some(candidate)
    } else {
        None
    }
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => "application/json",
        Some("gz") | Some("tgz") => "application/gzip",
        Some("txt") | Some("log") => "text/plain",
        _ => "application/octet-stream",
    }
}
