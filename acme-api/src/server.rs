//! The ACME HTTP listener (§10.1): a `hyper` 1.x accept loop, one
//! `tokio::task` per connection, dispatching on `(Method, path)` with simple
//! segment matching rather than pulling in a full web framework — the same
//! shape as this codebase's own admin-API listener, generalized to the ACME
//! wire surface.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use uuid::Uuid;

use acme_core::error::Error;

use crate::client_addr;
use crate::handlers::{account, authz, certificate, challenge, directory, key_change, order, revoke};
use crate::response::{self, Body};
use crate::state::AppState;

/// Bind and serve forever. Each accepted connection is handed to its own
/// task; a single slow or misbehaving client cannot stall any other (§5
/// concurrency model).
pub async fn run(addr: SocketAddr, state: Arc<AppState>) -> acme_core::error::Result<()> {
    let listener = TcpListener::bind(addr).await.map_err(Error::Io)?;
    tracing::info!(%addr, "ACME server listening");

    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(error) => {
                tracing::warn!(%error, "accept error");
                continue;
            }
        };

        let io = TokioIo::new(stream);
        let state = state.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |req| dispatch(req, state.clone(), peer_addr));
            if let Err(error) = http1::Builder::new().serve_connection(io, service).await {
                tracing::debug!(%error, "connection error");
            }
        });
    }
}

/// Every request funnels through here: resolve the client address, read
/// the body, run the matched handler, then attach the shared response
/// headers regardless of outcome (§6.1, §7: "a fresh nonce is still issued
/// on error responses").
async fn dispatch(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
    peer_addr: SocketAddr,
) -> Result<Response<Body>, Infallible> {
    let base_url = request_base_url(&req);
    let canonical_url = format!("{base_url}{}", req.uri().path());
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let headers = req.headers().clone();

    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(error) => {
            tracing::warn!(%error, "failed to read request body");
            Bytes::new()
        }
    };

    let outcome = route(&state, &method, &path, &body, &canonical_url, &base_url, &headers, peer_addr).await;

    let response = match outcome {
        Ok(response) => response,
        Err(error) => response::problem(&error),
    };
    Ok(response::finish(response, &state, &base_url))
}

/// The request's own scheme+host (§10.6), so the directory and every URL
/// built from it are correct behind whatever hostname a client actually
/// used to reach this server.
fn request_base_url(req: &Request<hyper::body::Incoming>) -> String {
    let host = req
        .headers()
        .get(hyper::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let scheme = if req.headers().get("x-forwarded-proto").map(|v| v == "https").unwrap_or(false) {
        "https"
    } else {
        "http"
    };
    format!("{scheme}://{host}")
}

fn parse_uuid(segment: &str) -> acme_core::error::Result<Uuid> {
    Uuid::parse_str(segment).map_err(|_| Error::malformed("path segment is not a valid identifier"))
}

#[allow(clippy::too_many_arguments)]
async fn route(
    state: &AppState,
    method: &Method,
    path: &str,
    body: &Bytes,
    canonical_url: &str,
    base_url: &str,
    headers: &hyper::HeaderMap,
    peer_addr: SocketAddr,
) -> acme_core::error::Result<Response<Body>> {
    let segments: Vec<&str> = path.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect();

    match (method, segments.as_slice()) {
        (&Method::GET, ["directory"]) => Ok(response::json(StatusCode::OK, &directory::directory(state, base_url))),
        (&Method::HEAD, ["new-nonce"]) | (&Method::GET, ["new-nonce"]) => Ok(directory::new_nonce()),
        (&Method::POST, ["new-account"]) => account::new_account(state, body, canonical_url, base_url).await,
        (&Method::POST, ["accounts", kid]) => account::account_update(state, body, canonical_url, base_url, kid).await,
        (&Method::POST, ["new-order"]) => order::new_order(state, body, canonical_url, base_url).await,
        (&Method::POST, ["order", id]) => order::get_order(state, body, canonical_url, base_url, parse_uuid(id)?).await,
        (&Method::POST, ["order", id, "finalize"]) => order::finalize(state, body, canonical_url, base_url, parse_uuid(id)?).await,
        (&Method::POST, ["orders", kid]) => order::orders_list(state, body, canonical_url, base_url, kid).await,
        (&Method::POST, ["authz", id]) => authz::authz(state, body, canonical_url, base_url, parse_uuid(id)?).await,
        (&Method::POST, ["challenge", id]) => {
            let source_addr = client_addr::resolve(&state.config, headers, peer_addr)?;
            challenge::challenge(state, body, canonical_url, base_url, parse_uuid(id)?, Some(source_addr)).await
        }
        (&Method::POST, ["certificate", id]) => {
            certificate::certificate(state, body, canonical_url, base_url, parse_uuid(id)?).await
        }
        (&Method::GET, ["ca-chain"]) | (&Method::POST, ["ca-chain"]) => certificate::ca_chain(state).await,
        (&Method::POST, ["revoke-cert"]) => revoke::revoke_cert(state, body, canonical_url, base_url).await,
        (&Method::POST, ["key-change"]) => key_change::key_change(state, body, canonical_url, base_url).await,
        _ => Err(Error::acme(
            acme_core::error::AcmeErrorType::Malformed,
            format!("no such resource: {method} {path}"),
        )),
    }
}
