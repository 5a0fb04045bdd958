//! Every response, success or error, passes through [`finish`]: it attaches
//! `Replay-Nonce`, `Cache-Control: no-store` and the index `Link` header
//! (§6.1), and nonces are issued even on error responses (§7: "a fresh
//! nonce is still issued on error responses").

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};

use acme_core::error::{AcmeErrorType, Error};
use acme_core::wire::ProblemDocument;

use crate::state::AppState;

pub type Body = Full<Bytes>;

pub fn json(status: StatusCode, body: &impl serde::Serialize) -> Response<Body> {
    let payload = serde_json::to_vec(body).unwrap_or_else(|_| b"{}".to_vec());
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from(payload)))
        .expect("building a response from a fixed header set cannot fail")
}

pub fn empty(status: StatusCode) -> Response<Body> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::new()))
        .expect("building a response from a fixed header set cannot fail")
}

/// Maps a core `Error` to an `application/problem+json` response with the
/// corresponding HTTP status (§6.2, §7). Non-ACME failures are logged in
/// full and reduced to a generic `serverInternal` document so internal
/// detail never reaches the client.
pub fn problem(error: &Error) -> Response<Body> {
    let kind = error.acme_type();
    let status = StatusCode::from_u16(kind.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let detail = if error.is_client_facing() {
        error.to_string()
    } else {
        tracing::error!(%error, "internal error while handling ACME request");
        "the server encountered an internal error".to_string()
    };

    let doc = ProblemDocument::new(kind, detail);
    let payload = serde_json::to_vec(&doc).unwrap_or_else(|_| b"{}".to_vec());
    Response::builder()
        .status(status)
        .header("content-type", "application/problem+json")
        .body(Full::new(Bytes::from(payload)))
        .expect("building a response from a fixed header set cannot fail")
}

pub fn problem_kind(kind: AcmeErrorType, detail: impl Into<String>) -> Response<Body> {
    problem(&Error::acme(kind, detail))
}

/// Attach the headers every ACME response carries, regardless of outcome
/// (§6.1). `base_url` is the request's own scheme+host (§10.6), used to
/// build the directory `Link`.
pub fn finish(mut response: Response<Body>, state: &AppState, base_url: &str) -> Response<Body> {
    let nonce = state.nonces.issue();
    let headers = response.headers_mut();
    headers.insert(
        "replay-nonce",
        nonce.parse().expect("issued nonce is ASCII and header-safe"),
    );
    headers.insert("cache-control", "no-store".parse().unwrap());
    headers.insert(
        "link",
        format!("<{base_url}/directory>; rel=\"index\"")
            .parse()
            .expect("base_url is validated host/scheme data"),
    );
    response
}
