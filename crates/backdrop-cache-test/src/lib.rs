//! Helpers for testing the asset caches and the provider.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - When using [`tempdir`], make sure that the handle to the temp directory is held for the
//!    entire lifetime of the test. When dropped too early, this might silently leak the temp
//!    directory, since the disk cache will create it again lazily after it has been deleted. To
//!    avoid this, assign it to a variable in the test function (e.g. `let _cache_dir =
//!    test::tempdir()`).
//!
//!  - When using [`ImageServer`], make sure that the server is held until all requests to the
//!    server have been made. If the server is dropped, the ports remain open and all connections
//!    to it will time out.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::net::{SocketAddr, TcpListener};
use std::sync::{Arc, Mutex};

use axum::extract::{self, Request};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use reqwest::Url;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

pub use tempfile::TempDir;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `backdrop_cache` crate and mutes
///    all other logs (such as hyper or reqwest).
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("backdrop_cache=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Creates a temporary directory.
///
/// The directory is deleted when the [`TempDir`] instance is dropped, unless
/// [`keep`](TempDir::keep) is called. Use it as a guard to automatically clean up after tests.
pub fn tempdir() -> TempDir {
    TempDir::new().unwrap()
}

/// Renders a `width` by `height` gradient.
fn gradient(width: u32, height: u32) -> DynamicImage {
    let image = RgbImage::from_fn(width, height, |x, y| {
        let r = x * 255 / width.max(1);
        let g = y * 255 / height.max(1);
        Rgb([r as u8, g as u8, 128])
    });
    DynamicImage::ImageRgb8(image)
}

fn encode(image: &DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut buf = Vec::new();
    image.write_to(&mut Cursor::new(&mut buf), format).unwrap();
    buf
}

/// Returns a baseline JPEG of the given size, as a backdrop source would serve it.
pub fn jpeg_fixture(width: u32, height: u32) -> Vec<u8> {
    encode(&gradient(width, height), ImageFormat::Jpeg)
}

/// Returns a PNG of the given size.
pub fn png_fixture(width: u32, height: u32) -> Vec<u8> {
    encode(&gradient(width, height), ImageFormat::Png)
}

/// Returns a PNG whose header is intact but whose compressed pixel data is not.
pub fn corrupt_png_fixture(width: u32, height: u32) -> Vec<u8> {
    let mut data = png_fixture(width, height);
    let idat = data
        .windows(4)
        .position(|chunk| chunk == b"IDAT")
        .expect("PNG has an IDAT chunk");

    // keep the two byte zlib header, scramble the deflate stream after it
    let start = idat + 4 + 2;
    let end = (start + 64).min(data.len() - 4);
    for byte in &mut data[start..end] {
        *byte = 0xFF;
    }
    data
}

/// Parses fixture names like `1600x900.jpg` into their size and format.
fn parse_fixture_name(name: &str) -> Option<(u32, u32, ImageFormat)> {
    let (stem, extension) = name.rsplit_once('.')?;
    let format = match extension {
        "jpg" | "jpeg" => ImageFormat::Jpeg,
        "png" => ImageFormat::Png,
        _ => return None,
    };
    let (width, height) = stem.split_once('x')?;
    let width = width.parse().ok().filter(|w| *w > 0)?;
    let height = height.parse().ok().filter(|h| *h > 0)?;

    Some((width, height, format))
}

async fn serve_fixture(extract::Path(name): extract::Path<String>) -> Response {
    let Some((width, height, format)) = parse_fixture_name(&name) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let body = encode(&gradient(width, height), format);
    ([(header::CONTENT_TYPE, format.to_mime_type())], body).into_response()
}

/// A test server that binds to a random port and serves a web app.
///
/// This server requires a `tokio` runtime and is supposed to be run in a `tokio::test`. It
/// automatically stops serving when dropped.
#[derive(Debug)]
pub struct Server {
    handle: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
}

impl Server {
    pub fn with_router(router: Router) -> Self {
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));

        let listener = TcpListener::bind(addr).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();
        let listener = tokio::net::TcpListener::from_std(listener).unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { handle, socket }
    }

    /// Returns the socket address that this server listens on.
    pub fn addr(&self) -> SocketAddr {
        self.socket
    }

    /// Returns the port that this server listens on.
    pub fn port(&self) -> u16 {
        self.addr().port()
    }

    /// Returns a full URL pointing to the given path.
    ///
    /// This URL uses `localhost` as hostname.
    pub fn url(&self, path: &str) -> Url {
        let path = path.trim_start_matches('/');
        format!("http://localhost:{}/{}", self.port(), path)
            .parse()
            .unwrap()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// An image host counting the requests it receives.
///
/// Routes:
///
///  - `/t/p/original/{width}x{height}.{jpg,png}`: a generated image of that size. Any other name
///    responds with `404`.
///  - `/respond_statuscode/{status}/*`: an empty response with the given status.
///  - `/garbage_data/{data}`: responds with `data` as body.
///  - `/delay/{duration}/{path}`: waits for the humantime `duration`, then redirects to `/{path}`.
#[derive(Debug)]
pub struct ImageServer {
    server: Server,
    hits: Arc<Mutex<BTreeMap<String, usize>>>,
}

impl ImageServer {
    pub fn new() -> Self {
        let hits = Arc::new(Mutex::new(BTreeMap::new()));

        let hitcounter = {
            let hits = hits.clone();
            move |extract::OriginalUri(uri), req: Request, next: Next| {
                let hits = hits.clone();
                async move {
                    {
                        let mut hits = hits.lock().unwrap();
                        let hits = hits.entry(uri.to_string()).or_default();
                        *hits += 1;
                    }

                    next.run(req).await
                }
            }
        };

        let router = Router::new()
            .route("/t/p/original/:name", get(serve_fixture))
            .route(
                "/delay/:time/*path",
                get(
                    |extract::Path((time, path)): extract::Path<(String, String)>| async move {
                        let duration = humantime::parse_duration(&time).unwrap();
                        tokio::time::sleep(duration).await;

                        (StatusCode::FOUND, [("Location", format!("/{path}"))])
                    },
                ),
            )
            .route(
                "/respond_statuscode/:num/*tail",
                get(
                    |extract::Path((num, _)): extract::Path<(u16, String)>| async move {
                        StatusCode::from_u16(num).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
                    },
                ),
            )
            .route(
                "/garbage_data/*tail",
                get(|extract::Path(tail): extract::Path<String>| async move { tail }),
            )
            .layer(middleware::from_fn(hitcounter));

        let server = Server::with_router(router);

        Self { server, hits }
    }

    /// Returns and resets the total number of requests.
    pub fn accesses(&self) -> usize {
        let map = std::mem::take(&mut *self.hits.lock().unwrap());
        map.into_values().sum()
    }

    /// Returns and resets the number of requests per URI.
    pub fn all_hits(&self) -> Vec<(String, usize)> {
        let map = std::mem::take(&mut *self.hits.lock().unwrap());
        map.into_iter().collect()
    }

    pub fn url(&self, path: &str) -> Url {
        self.server.url(path)
    }
}

impl Default for ImageServer {
    fn default() -> Self {
        Self::new()
    }
}
