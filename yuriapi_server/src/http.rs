//! HTTP API service implementations for `server`

use std::{convert::Infallible, io, num::ParseIntError, path::PathBuf, sync::Arc};

use bytes::Bytes;
use futures::TryStreamExt;
use http_body_util::{BodyExt, Full, StreamBody, combinators::UnsyncBoxBody};
use hyper::{
    Method, StatusCode, Uri,
    body::Frame,
    header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderValue, LOCATION},
};
use thiserror::Error;
use tokio_util::io::ReaderStream;
use tracing::{debug, error};
use yuriapi_catalog::CatalogStore;

pub type ResponseBody = UnsyncBoxBody<Bytes, io::Error>;
pub type Response = hyper::Response<ResponseBody>;

/// Where `GET /` sends visitors
pub const PROJECT_HOMEPAGE: &str = "https://github.com/dragsbruh/yuriapi";

/// Items returned by the list endpoint when `n` is not given
pub const DEFAULT_SAMPLE_SIZE: i64 = 10;

/// Largest `n` the list endpoint accepts
pub const MAX_SAMPLE_SIZE: i64 = 50;

/// Maximum length for untrusted input when logging to prevent log flooding
const MAX_PATH_LENGTH_FOR_LOGGING: usize = 256;

/// Truncate a string for logging untrusted input to prevent log flooding
fn truncate_for_logging(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        s
    } else {
        &s[..s.floor_char_boundary(max_len)]
    }
}

/// Errors surfaced to API clients
///
/// The `Display` text of each variant is what the client receives in the `error` field, so it
/// must never carry paths or underlying I/O detail; those stay in the source chain and the
/// server logs.
#[derive(Debug, Error)]
pub enum Error {
    /// The requested path has no registered handler.
    #[error("not found")]
    NoHandler,

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("invalid query string")]
    InvalidQuery(#[from] serde_urlencoded::de::Error),

    #[error("invalid numeric value for `n`")]
    InvalidCount(#[source] ParseIntError),

    #[error("count must be in range (0, 50]")]
    CountOutOfRange(i64),

    #[error("invalid number for index")]
    InvalidIndex(#[source] ParseIntError),

    #[error("no such yuri")]
    ImageNotFound { cid: String, index: u64 },

    #[error("couldnt read image")]
    ImageRead {
        cid: String,
        index: u64,
        source: io::Error,
    },

    #[error("image endpoint is not configured")]
    ImagesDisabled,

    #[error("failed to serialize response")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::NoHandler | Self::ImageNotFound { .. } => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::InvalidQuery(_)
            | Self::InvalidCount(_)
            | Self::CountOutOfRange(_)
            | Self::InvalidIndex(_) => StatusCode::BAD_REQUEST,
            Self::ImagesDisabled => StatusCode::SERVICE_UNAVAILABLE,
            Self::ImageRead { .. } | Self::Serialize(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn into_response(self) -> Response {
        json_error(self.status_code(), &self.to_string())
    }
}

fn bytes_to_response_body(body: impl Into<Bytes>) -> ResponseBody {
    Full::new(body.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

fn response(status: StatusCode, content_type: &'static str, body: ResponseBody) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn json_response(status: StatusCode, body: impl Into<Bytes>) -> Response {
    response(status, "application/json", bytes_to_response_body(body))
}

fn json_error(status: StatusCode, message: &str) -> Response {
    let body = serde_json::json!({ "error": message }).to_string();
    json_response(status, body)
}

#[derive(Debug, Default)]
struct SampleParams {
    n: Option<String>,
}

impl SampleParams {
    /// When `n` is repeated the first occurrence wins
    fn from_query(query: Option<&str>) -> Result<Self> {
        let pairs: Vec<(String, String)> = serde_urlencoded::from_str(query.unwrap_or_default())?;
        let n = pairs
            .into_iter()
            .find_map(|(key, value)| (key == "n").then_some(value));
        Ok(Self { n })
    }

    fn count(&self) -> Result<i64> {
        let count = match self.n.as_deref() {
            None | Some("") => DEFAULT_SAMPLE_SIZE,
            Some(raw) => raw.parse().map_err(Error::InvalidCount)?,
        };
        if !(1..=MAX_SAMPLE_SIZE).contains(&count) {
            return Err(Error::CountOutOfRange(count));
        }
        Ok(count)
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Route<'a> {
    Home,
    Health,
    Sample,
    Image { cid: &'a str, index: Option<&'a str> },
}

impl<'a> Route<'a> {
    fn parse(path: &'a str) -> Result<Self> {
        match path {
            "/" => return Ok(Self::Home),
            "/health" => return Ok(Self::Health),
            "/v1/yuri" => return Ok(Self::Sample),
            _ => {}
        }

        let rest = path.strip_prefix("/v1/yuri/").ok_or(Error::NoHandler)?;
        let mut segments = rest.split('/');
        let cid = segments.next().filter(|s| !s.is_empty());
        let index = segments.next();
        match (cid, index, segments.next()) {
            (Some(cid), None, None) => Ok(Self::Image { cid, index: None }),
            (Some(cid), Some(index), None) if !index.is_empty() => Ok(Self::Image {
                cid,
                index: Some(index),
            }),
            _ => Err(Error::NoHandler),
        }
    }
}

/// A catalog id is used as a single directory name under the image root
fn is_plain_segment(cid: &str) -> bool {
    !cid.is_empty() && cid != "." && cid != ".." && !cid.contains(['/', '\\', '\0'])
}

#[derive(Debug)]
pub struct HttpApi {
    store: Arc<CatalogStore>,
    images_dir: Option<PathBuf>,
}

impl HttpApi {
    pub fn new(store: Arc<CatalogStore>, images_dir: Option<PathBuf>) -> Self {
        Self { store, images_dir }
    }

    async fn perform_routing(&self, method: &Method, uri: &Uri) -> Result<Response> {
        let route = Route::parse(uri.path())?;
        if method != Method::GET {
            return Err(Error::MethodNotAllowed);
        }

        match route {
            Route::Home => Ok(self.redirect_home()),
            Route::Health => Ok(self.health()),
            Route::Sample => self.sample_items(uri.query()),
            Route::Image { cid, index } => {
                let index = index
                    .map(|raw| raw.parse::<u64>())
                    .transpose()
                    .map_err(Error::InvalidIndex)?
                    .unwrap_or(0);
                self.serve_image(cid, index).await
            }
        }
    }

    fn health(&self) -> Response {
        response(
            StatusCode::OK,
            "text/plain; charset=utf-8",
            bytes_to_response_body("OK"),
        )
    }

    fn redirect_home(&self) -> Response {
        let mut response = Response::new(bytes_to_response_body(Bytes::new()));
        *response.status_mut() = StatusCode::FOUND;
        response
            .headers_mut()
            .insert(LOCATION, HeaderValue::from_static(PROJECT_HOMEPAGE));
        response
    }

    fn sample_items(&self, query: Option<&str>) -> Result<Response> {
        let params = SampleParams::from_query(query)?;
        let items = self.store.sample(params.count()?);
        let body = serde_json::to_vec(&items)?;
        Ok(json_response(StatusCode::OK, body))
    }

    async fn serve_image(&self, cid: &str, index: u64) -> Result<Response> {
        let images_dir = self.images_dir.as_ref().ok_or(Error::ImagesDisabled)?;
        let not_found = || Error::ImageNotFound {
            cid: cid.to_owned(),
            index,
        };

        let cid = urlencoding::decode(cid).map_err(|_| not_found())?;
        if !is_plain_segment(&cid) {
            return Err(not_found());
        }

        let path = images_dir.join(cid.as_ref()).join(format!("{index}.jpeg"));
        let read_err = |source: io::Error| match source.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::NotADirectory => not_found(),
            _ => Error::ImageRead {
                cid: cid.to_string(),
                index,
                source,
            },
        };

        let file = tokio::fs::File::open(&path).await.map_err(read_err)?;
        let metadata = file.metadata().await.map_err(read_err)?;
        if !metadata.is_file() {
            return Err(not_found());
        }

        let body = StreamBody::new(ReaderStream::new(file).map_ok(Frame::data)).boxed_unsync();
        let mut response = response(StatusCode::OK, "image/jpeg", body);
        response
            .headers_mut()
            .insert(CONTENT_LENGTH, HeaderValue::from(metadata.len()));
        Ok(response)
    }
}

/// Entry point for every request; never fails, errors are turned into JSON responses
pub async fn route_request<B>(
    http_server: Arc<HttpApi>,
    req: hyper::Request<B>,
) -> Result<Response, Infallible>
where
    B: Send,
{
    let method = req.method().clone();
    let uri = req.uri().clone();
    drop(req);

    let path = truncate_for_logging(uri.path(), MAX_PATH_LENGTH_FOR_LOGGING);
    let response = match http_server.perform_routing(&method, &uri).await {
        Ok(response) => {
            debug!(%method, %path, status = %response.status(), "Successfully processed request");
            response
        }
        Err(error) => {
            if error.status_code().is_server_error() {
                error!(?error, %method, %path, "Error while handling request");
            } else {
                debug!(%error, %method, %path, "Rejected request");
            }
            error.into_response()
        }
    };

    Ok(response)
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, fs, path::Path};

    use http_body_util::BodyExt;
    use pretty_assertions::assert_eq;
    use serde_json::Value;
    use yuriapi_catalog::Item;

    use super::*;

    fn seeded_store(dir: &Path, count: usize) -> Arc<CatalogStore> {
        for i in 0..count {
            fs::write(
                dir.join(format!("{i:02}.json")),
                format!(r#"{{"cid": "cid-{i}", "url": "u", "source": "s", "images": []}}"#),
            )
            .unwrap();
        }
        let store = Arc::new(CatalogStore::new(dir));
        store.refresh().unwrap();
        store
    }

    async fn get(api: &Arc<HttpApi>, uri: &str) -> (StatusCode, Option<String>, Bytes) {
        let req = hyper::Request::get(uri).body(()).unwrap();
        let response = route_request(Arc::clone(api), req).await.unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .map(|v| v.to_str().unwrap().to_owned());
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, content_type, body)
    }

    fn error_message(body: &Bytes) -> String {
        let value: Value = serde_json::from_slice(body).unwrap();
        value["error"].as_str().unwrap().to_owned()
    }

    #[test]
    fn parses_routes() {
        assert_eq!(Route::parse("/").unwrap(), Route::Home);
        assert_eq!(Route::parse("/v1/yuri").unwrap(), Route::Sample);
        assert_eq!(
            Route::parse("/v1/yuri/abc").unwrap(),
            Route::Image {
                cid: "abc",
                index: None
            }
        );
        assert_eq!(
            Route::parse("/v1/yuri/abc/3").unwrap(),
            Route::Image {
                cid: "abc",
                index: Some("3")
            }
        );
        for path in ["/v2/yuri", "/v1/yuri/", "/v1/yuri/abc/", "/v1/yuri/a/1/2", "/nope"] {
            assert!(
                matches!(Route::parse(path), Err(Error::NoHandler)),
                "{path} should not route"
            );
        }
    }

    #[test]
    fn rejects_unsafe_catalog_ids() {
        assert!(is_plain_segment("abc-123"));
        for cid in ["", ".", "..", "a/b", "a\\b"] {
            assert!(!is_plain_segment(cid), "{cid:?}");
        }
    }

    #[test_log::test(tokio::test)]
    async fn list_endpoint_validates_count() {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(HttpApi::new(seeded_store(dir.path(), 20), None));

        for (n, message) in [
            ("0", "count must be in range (0, 50]"),
            ("51", "count must be in range (0, 50]"),
            ("-1", "count must be in range (0, 50]"),
            ("abc", "invalid numeric value for `n`"),
            ("1.5", "invalid numeric value for `n`"),
        ] {
            let (status, content_type, body) = get(&api, &format!("/v1/yuri?n={n}")).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "n={n}");
            assert_eq!(content_type.as_deref(), Some("application/json"));
            assert_eq!(error_message(&body), message);
        }
    }

    #[test_log::test(tokio::test)]
    async fn list_endpoint_samples_distinct_items() {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(HttpApi::new(seeded_store(dir.path(), 20), None));

        let (status, _, body) = get(&api, "/v1/yuri?n=10").await;
        assert_eq!(status, StatusCode::OK);
        let items: Vec<Item> = serde_json::from_slice(&body).unwrap();
        let cids: HashSet<_> = items.iter().map(|i| i.cid.as_str()).collect();
        assert_eq!(cids.len(), 10);

        // default and empty both mean 10
        for uri in ["/v1/yuri", "/v1/yuri?n=", "/v1/yuri?other=1"] {
            let (status, _, body) = get(&api, uri).await;
            assert_eq!(status, StatusCode::OK, "{uri}");
            let items: Vec<Item> = serde_json::from_slice(&body).unwrap();
            assert_eq!(items.len(), 10, "{uri}");
        }

        let (_, _, body) = get(&api, "/v1/yuri?n=50").await;
        let items: Vec<Item> = serde_json::from_slice(&body).unwrap();
        assert_eq!(items.len(), 20);

        // a repeated `n` uses the first value
        let (status, _, body) = get(&api, "/v1/yuri?n=5&n=7").await;
        assert_eq!(status, StatusCode::OK);
        let items: Vec<Item> = serde_json::from_slice(&body).unwrap();
        assert_eq!(items.len(), 5);

        let (status, _, body) = get(&api, "/v1/yuri?n=3&n=abc").await;
        assert_eq!(status, StatusCode::OK);
        let items: Vec<Item> = serde_json::from_slice(&body).unwrap();
        assert_eq!(items.len(), 3);
    }

    #[test_log::test(tokio::test)]
    async fn image_endpoint() {
        let catalog = tempfile::tempdir().unwrap();
        let images = tempfile::tempdir().unwrap();
        fs::create_dir(images.path().join("abc")).unwrap();
        fs::write(images.path().join("abc/0.jpeg"), b"first").unwrap();
        fs::write(images.path().join("abc/2.jpeg"), b"third").unwrap();
        fs::write(images.path().join("top.jpeg"), b"outside").unwrap();
        fs::create_dir(images.path().join("abc/1.jpeg")).unwrap();

        let api = Arc::new(HttpApi::new(
            seeded_store(catalog.path(), 1),
            Some(images.path().to_path_buf()),
        ));

        let (status, content_type, body) = get(&api, "/v1/yuri/abc").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some("image/jpeg"));
        assert_eq!(&body[..], b"first");

        let (status, _, body) = get(&api, "/v1/yuri/abc/2").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"third");

        for uri in [
            "/v1/yuri/abc/1",
            "/v1/yuri/abc/9",
            "/v1/yuri/missing",
            "/v1/yuri/..",
            "/v1/yuri/%2E%2E",
            "/v1/yuri/top.jpeg/0",
        ] {
            let (status, _, body) = get(&api, uri).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
            assert_eq!(error_message(&body), "no such yuri");
        }

        for uri in ["/v1/yuri/abc/x", "/v1/yuri/abc/-1"] {
            let (status, _, body) = get(&api, uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(error_message(&body), "invalid number for index");
        }
    }

    #[test_log::test(tokio::test)]
    async fn image_endpoint_without_image_dir_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(HttpApi::new(seeded_store(dir.path(), 1), None));

        let (status, _, body) = get(&api, "/v1/yuri/cid-0/0").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(error_message(&body), "image endpoint is not configured");
    }

    #[test_log::test(tokio::test)]
    async fn unexpected_read_errors_hide_details() {
        let dir = tempfile::tempdir().unwrap();
        let images = tempfile::tempdir().unwrap();
        let api = HttpApi::new(
            seeded_store(dir.path(), 1),
            Some(images.path().join("\0invalid")),
        );
        let err = api.serve_image("abc", 0).await.unwrap_err();
        assert!(matches!(err, Error::ImageRead { .. }), "got {err:?}");

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(error_message(&body), "couldnt read image");
    }

    #[test_log::test(tokio::test)]
    async fn misc_routes() {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(HttpApi::new(seeded_store(dir.path(), 1), None));

        let req = hyper::Request::get("/").body(()).unwrap();
        let response = route_request(Arc::clone(&api), req).await.unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[LOCATION], PROJECT_HOMEPAGE);

        let (status, _, body) = get(&api, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"OK");

        let (status, _, body) = get(&api, "/v1/nothing").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(error_message(&body), "not found");

        let req = hyper::Request::post("/v1/yuri").body(()).unwrap();
        let response = route_request(Arc::clone(&api), req).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
