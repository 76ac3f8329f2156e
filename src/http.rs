//! The HTTP surface: health check plus upload/download of whole files.
//!
//! The teacher routes requests through a proprietary `proxmox::api` schema
//! router backed by crates this workspace does not have; SPEC_FULL.md §6.3
//! settles for hand-rolled routing directly over `hyper`, which the
//! teacher already depends on for its own HTTP client plumbing.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use log::{error, info};

use crate::error::StorageError;
use crate::receiver::Receiver;

/// Bind and serve the HTTP surface until the process is asked to stop.
/// Mirrors `hyper::Server::bind(..).serve(..)` usage as found throughout
/// the example pack's async services.
pub async fn serve(addr: SocketAddr, receiver: Arc<Receiver>) -> crate::error::Result<()> {
    let make_svc = make_service_fn(move |_conn| {
        let receiver = receiver.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let receiver = receiver.clone();
                async move { Ok::<_, Infallible>(route(receiver, req).await) }
            }))
        }
    });

    info!("http: listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| StorageError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))
}

async fn route(receiver: Arc<Receiver>, req: Request<Body>) -> Response<Body> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    match (&method, path.strip_prefix("/files/")) {
        (_, _) if method == Method::GET && path == "/" => {
            Response::new(Body::from("pong"))
        }
        (&Method::PUT, Some(file_id)) if !file_id.is_empty() => {
            put_file(receiver, file_id.to_string(), req).await
        }
        (&Method::GET, Some(file_id)) if !file_id.is_empty() => {
            get_file(receiver, file_id).await
        }
        _ => not_found(),
    }
}

async fn put_file(receiver: Arc<Receiver>, file_id: String, req: Request<Body>) -> Response<Body> {
    let body = match hyper::body::to_bytes(req.into_body()).await {
        Ok(b) => b,
        Err(e) => {
            error!("http: failed reading body for {}: {}", file_id, e);
            return status(StatusCode::BAD_REQUEST, "could not read request body");
        }
    };

    match receiver.save_file(&file_id, body).await {
        Ok(()) => status(StatusCode::CREATED, "stored"),
        Err(e) => error_response(&e),
    }
}

async fn get_file(receiver: Arc<Receiver>, file_id: &str) -> Response<Body> {
    match receiver.get_file(file_id).await {
        Ok(data) => Response::new(Body::from(Bytes::from(data))),
        Err(e) => error_response(&e),
    }
}

fn error_response(err: &StorageError) -> Response<Body> {
    let code = match err {
        StorageError::NotFound => StatusCode::NOT_FOUND,
        StorageError::AlreadyExists => StatusCode::CONFLICT,
        StorageError::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
        StorageError::Capacity | StorageError::NoReadyNode => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    status(code, &err.to_string())
}

fn status(code: StatusCode, message: &str) -> Response<Body> {
    let mut resp = Response::new(Body::from(message.to_string()));
    *resp.status_mut() = code;
    resp
}

fn not_found() -> Response<Body> {
    status(StatusCode::NOT_FOUND, "no such route")
}
