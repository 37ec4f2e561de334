use std::net::SocketAddr;
use std::sync::Arc;
use async_trait::async_trait;
use bytes::Bytes;
use hyper::header::{HeaderValue, LOCATION};
use hyper::{Method, Request, Response, StatusCode};
use rustc_hash::FxHashMap;
use tracing::{debug, error, info};
use crate::config::ServerConfig;
use crate::error::StorageError;
use crate::http::message::{parse_request, response, response_to_bytes};
use crate::storage::{FsStorage, Storage};
use crate::transport::request_handler::RequestHandler;

/// Serves the contents of a [Storage]: `GET /` lists all files, `GET /name` reads a file, and
///  `POST /name` writes the request body to a file.
///
/// Every request gets an answer, failures included. Over the datagram transport, the response
///  is limited to what fits into a single message.
pub struct FileRequestHandler {
    storage: Arc<dyn Storage>,
    redirects: FxHashMap<String, String>,
    max_response_len: usize,
}

impl FileRequestHandler {
    pub fn new(storage: Arc<dyn Storage>, redirects: FxHashMap<String, String>, max_response_len: usize) -> FileRequestHandler {
        FileRequestHandler {
            storage,
            redirects,
            max_response_len,
        }
    }

    /// serves `root_dir` with the configured redirects
    pub async fn from_config(config: &ServerConfig, max_response_len: usize) -> anyhow::Result<FileRequestHandler> {
        let storage = FsStorage::open(&config.root_dir).await?;
        Ok(FileRequestHandler::new(Arc::new(storage), config.redirects.clone(), max_response_len))
    }

    /// answers a request received as a single datagram payload
    pub async fn respond(&self, raw: &[u8]) -> Response<Bytes> {
        match parse_request(raw) {
            Ok(request) => self.serve(request).await,
            Err(e) => {
                debug!("unparseable request: {}", e);
                response(StatusCode::BAD_REQUEST, format!("Malformed request: {}", e))
            }
        }
    }

    pub async fn serve(&self, request: Request<Bytes>) -> Response<Bytes> {
        let path = request.uri().path();

        if let Some(target) = self.redirects.get(path) {
            debug!("redirecting {} to {}", path, target);
            return match HeaderValue::from_str(target) {
                Ok(location) => {
                    let mut redirect = response(StatusCode::FOUND, format!("Moved to {}", target));
                    redirect.headers_mut().insert(LOCATION, location);
                    redirect
                }
                Err(_) => {
                    error!("redirect target {:?} is not a valid header value", target);
                    response(StatusCode::INTERNAL_SERVER_ERROR, format!("Invalid redirect target for {}", path))
                }
            };
        }

        let name = match path.strip_prefix('/') {
            Some(name) => name,
            None => return response(StatusCode::BAD_REQUEST, format!("Invalid path: {}", path)),
        };

        match (request.method(), name) {
            (&Method::GET, "") => match self.storage.list().await {
                Ok(names) => response(StatusCode::OK, names.join("\n")),
                Err(e) => storage_failure(e),
            }
            (&Method::GET, name) => match self.storage.read(name).await {
                Ok(content) => response(StatusCode::OK, content),
                Err(e) => storage_failure(e),
            }
            (&Method::POST, "") => response(StatusCode::BAD_REQUEST, "File name is missing."),
            (&Method::POST, name) => match self.storage.write(name, request.body().clone()).await {
                Ok(()) => {
                    info!("wrote {} bytes to {}", request.body().len(), name);
                    response(StatusCode::OK, "Successfully wrote file content.")
                }
                Err(e) => storage_failure(e),
            }
            (method, _) => {
                response(StatusCode::METHOD_NOT_ALLOWED, format!("HTTP method not supported: {}", method))
            }
        }
    }
}

fn storage_failure(e: StorageError) -> Response<Bytes> {
    match e {
        StorageError::NotFound(_) => response(StatusCode::NOT_FOUND, "File does not exist."),
        StorageError::InvalidName(name) => response(StatusCode::BAD_REQUEST, format!("Invalid file name: {:?}", name)),
        StorageError::Io(e) => {
            error!("storage failure: {}", e);
            response(StatusCode::INTERNAL_SERVER_ERROR, format!("Error accessing file: {}", e))
        }
    }
}

#[async_trait]
impl RequestHandler for FileRequestHandler {
    async fn handle(&self, peer: SocketAddr, request: Bytes) -> Bytes {
        let response = self.respond(&request).await;
        info!("{} -> {}", peer, response.status());

        let response = response_to_bytes(&response);
        if response.len() > self.max_response_len {
            debug!("response of {} bytes exceeds the limit of {}", response.len(), self.max_response_len);
            return self.response_too_large(response.len(), self.max_response_len);
        }
        response
    }

    fn response_too_large(&self, len: usize, _max: usize) -> Bytes {
        response_to_bytes(&response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Response of {} bytes is too large.", len),
        ))
    }
}
