use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;

use anyhow::Context;
use axum::Router;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use camino::Utf8PathBuf;
use console::style;
use reqwest::Url;
use tower_http::services::ServeDir;
use tracing::info;

/// What the development server puts in front of the browser.
pub(crate) enum Backend {
    /// Forward everything to a running site and inject the live-reload script
    /// into its HTML.
    Proxy { upstream: String, script: String },
    /// Serve a directory, with the live-reload script injected into its HTML.
    Static { dir: Utf8PathBuf, script: String },
}

pub(crate) fn start(port: u16, backend: Backend) -> thread::JoinHandle<Result<(), anyhow::Error>> {
    info!(url = %style(format!("http://localhost:{port}/")).yellow(), "starting a HTTP server");

    thread::spawn(move || {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?
            .block_on(serve(port, backend))
    })
}

async fn serve(port: u16, backend: Backend) -> Result<(), anyhow::Error> {
    let address = SocketAddr::from(([127, 0, 0, 1], port));
    let address = tokio::net::TcpListener::bind(address).await?;

    let router = match backend {
        Backend::Proxy { upstream, script } => {
            info!(%upstream, "proxying");
            let proxy = Proxy::new(&upstream, port, script)?;
            Router::new().fallback(forward).with_state(Arc::new(proxy))
        }
        Backend::Static { dir, script } => {
            info!(%dir, "serving files");
            Router::new()
                .fallback_service(ServeDir::new(dir))
                .layer(middleware::map_response_with_state(Arc::new(script), inject_into))
        }
    };

    axum::serve(address, router).await?;

    Ok(())
}

struct Proxy {
    client: reqwest::Client,
    upstream: Url,
    /// Origin of the upstream site, as it appears in redirects.
    upstream_origin: String,
    /// Origin under which the browser sees the proxy.
    public_origin: String,
    script: String,
}

impl Proxy {
    fn new(upstream: &str, port: u16, script: String) -> anyhow::Result<Self> {
        let upstream = Url::parse(upstream).with_context(|| format!("invalid upstream URL {upstream}"))?;
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            upstream_origin: upstream.origin().ascii_serialization(),
            public_origin: format!("http://localhost:{port}"),
            upstream,
            script,
        })
    }

    async fn forward(&self, request: Request) -> anyhow::Result<Response> {
        let (parts, body) = request.into_parts();

        let path = parts.uri.path_and_query().map_or("/", |pq| pq.as_str());
        let url = self.upstream.join(path)?;

        let mut headers = parts.headers;
        // Let reqwest set the upstream host, and ask for an uncompressed body
        // so HTML can be rewritten.
        headers.remove(header::HOST);
        headers.remove(header::ACCEPT_ENCODING);

        let body = axum::body::to_bytes(body, usize::MAX).await?;

        let response = self
            .client
            .request(parts.method, url)
            .headers(headers)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let mut headers = response.headers().clone();
        self.rewrite_headers(&mut headers);

        let is_html = is_html(&headers);

        let bytes = response.bytes().await?;
        let body = if is_html {
            headers.remove(header::CONTENT_LENGTH);
            Body::from(inject(&String::from_utf8_lossy(&bytes), &self.script))
        } else {
            Body::from(bytes)
        };

        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }

    fn rewrite_headers(&self, headers: &mut HeaderMap) {
        headers.remove(header::TRANSFER_ENCODING);
        headers.remove(header::CONNECTION);

        let location = headers
            .get(header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| rewrite_location(value, &self.upstream_origin, &self.public_origin));

        if let Some(location) = location
            && let Ok(value) = HeaderValue::from_str(&location)
        {
            headers.insert(header::LOCATION, value);
        }
    }
}

async fn forward(State(proxy): State<Arc<Proxy>>, request: Request) -> Response {
    match proxy.forward(request).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!("proxy error: {e:#}");
            (StatusCode::BAD_GATEWAY, format!("canham proxy error: {e:#}")).into_response()
        }
    }
}

/// Add the live-reload script to HTML served from disk.
async fn inject_into(State(script): State<Arc<String>>, response: Response) -> Response {
    if !is_html(response.headers()) {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => {
            parts.headers.remove(header::CONTENT_LENGTH);
            let html = inject(&String::from_utf8_lossy(&bytes), &script);
            Response::from_parts(parts, Body::from(html))
        }
        Err(e) => {
            tracing::error!("couldn't read a served page: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("canham server error: {e}")).into_response()
        }
    }
}

fn is_html(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("text/html"))
}

/// Insert the script right before the closing body tag, or at the end of a
/// document without one.
fn inject(html: &str, script: &str) -> String {
    let at = html.to_ascii_lowercase().rfind("</body>").unwrap_or(html.len());

    let mut out = String::with_capacity(html.len() + script.len());
    out.push_str(&html[..at]);
    out.push_str(script);
    out.push_str(&html[at..]);
    out
}

/// Point redirects to the upstream back at the proxy.
fn rewrite_location(location: &str, upstream: &str, public: &str) -> Option<String> {
    let rest = location.strip_prefix(upstream)?;
    if !(rest.is_empty() || rest.starts_with(['/', '?', '#'])) {
        return None;
    }
    Some(format!("{public}{rest}"))
}
