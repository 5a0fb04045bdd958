//! End-to-end tests against the real `hyper` listener (§6.1, §8): no mock
//! transport, a genuine `InMemoryStore` and a genuine self-signed CA
//! signer, reached over `reqwest` the way an ACME client would.
//!
//! Deep state-machine coverage (order/authorization/challenge transitions,
//! finalize) lives as unit tests next to the code in `acme-core`,
//! `acme-relay` and `acme-validate`; what belongs here is the stuff only
//! observable with a socket in the loop: directory shape, the headers
//! every response carries, and the authenticator's error ordering.

use std::net::SocketAddr;
use std::sync::Arc;

use acme_api::AppState;
use acme_auth::NonceStore;
use acme_core::config::AcmeConfig;
use acme_core::relay::OrderFinalizer;
use acme_core::store::InMemoryStore;
use acme_core::validate::ValidatorRegistry;
use acme_relay::{CaFinalizer, RcgenCaSigner};
use acme_validate::DummyValidator;
use base64::Engine;
use serde_json::json;

const URL_SAFE_NO_PAD: base64::engine::GeneralPurpose = base64::engine::general_purpose::URL_SAFE_NO_PAD;

/// Spins up a CA-mode server on an ephemeral local port and returns its
/// base URL. The CA key/cert are a throwaway self-signed pair generated
/// for the test, never touching disk.
async fn spawn_server() -> String {
    let key_pair = rcgen::KeyPair::generate().expect("generate CA key");
    let mut params = rcgen::CertificateParams::new(Vec::<String>::new()).expect("CA params");
    params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
    let ca_cert = params.self_signed(&key_pair).expect("self-sign CA cert");
    let ca_cert_pem = ca_cert.pem();
    let ca_key_pem = key_pair.serialize_pem();

    let signer = Arc::new(RcgenCaSigner::load(&ca_cert_pem, &ca_key_pem).expect("load CA signer"));
    let store = Arc::new(InMemoryStore::new());
    let nonces = Arc::new(NonceStore::new(64));

    let mut validators = ValidatorRegistry::new();
    validators.register(Arc::new(DummyValidator)).expect("register dummy validator");

    let finalizer: Arc<dyn OrderFinalizer> = Arc::new(CaFinalizer::new(store.clone(), signer));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
    let addr: SocketAddr = listener.local_addr().expect("local addr");
    drop(listener);

    let state = Arc::new(AppState {
        store,
        nonces,
        validators: Arc::new(validators),
        finalizer,
        relay_new_order: None,
        relay_revoke: None,
        config: Arc::new(AcmeConfig::default()),
        ca_chain_pem: Some(ca_cert_pem),
    });

    tokio::spawn(async move {
        let _ = acme_api::run(addr, state).await;
    });

    let base_url = format!("http://{addr}");
    wait_for_directory(&base_url).await;
    base_url
}

async fn wait_for_directory(base_url: &str) {
    let client = reqwest::Client::new();
    for _ in 0..50 {
        if client.get(format!("{base_url}/directory")).send().await.is_ok() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    panic!("server never came up at {base_url}");
}

/// Minimal flattened-JSON envelope with a caller-supplied protected header
/// and payload; signature bytes are irrelevant for the error paths tested
/// here, all of which are rejected before signature math runs.
fn unsigned_envelope(protected: &serde_json::Value, payload: &serde_json::Value) -> serde_json::Value {
    let protected_b64 = URL_SAFE_NO_PAD.encode(protected.to_string());
    let payload_b64 = URL_SAFE_NO_PAD.encode(payload.to_string());
    json!({
        "protected": protected_b64,
        "payload": payload_b64,
        "signature": URL_SAFE_NO_PAD.encode("not-a-real-signature"),
    })
}

async fn fresh_nonce(client: &reqwest::Client, base_url: &str) -> String {
    let resp = client
        .head(format!("{base_url}/new-nonce"))
        .send()
        .await
        .expect("new-nonce request");
    resp.headers()
        .get("replay-nonce")
        .expect("new-nonce response carries Replay-Nonce")
        .to_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn directory_has_the_required_resource_map() {
    let base_url = spawn_server().await;
    let client = reqwest::Client::new();

    let resp = client.get(format!("{base_url}/directory")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers().get("cache-control").unwrap(), "no-store");
    let nonce = resp.headers().get("replay-nonce").expect("directory carries a nonce");
    assert!(!nonce.to_str().unwrap().is_empty());
    let link = resp.headers().get("link").unwrap().to_str().unwrap();
    assert!(link.contains("/directory"));
    assert!(link.contains("rel=\"index\""));

    let body: serde_json::Value = resp.json().await.unwrap();
    for key in ["newNonce", "newAccount", "newOrder", "revokeCert", "keyChange"] {
        assert!(body.get(key).is_some(), "directory missing {key}");
    }
}

#[tokio::test]
async fn new_nonce_returns_204_with_a_fresh_nonce() {
    let base_url = spawn_server().await;
    let client = reqwest::Client::new();

    let resp = client.head(format!("{base_url}/new-nonce")).send().await.unwrap();
    assert_eq!(resp.status(), 204);
    assert!(!resp.headers().get("replay-nonce").unwrap().is_empty());

    let resp_get = client.get(format!("{base_url}/new-nonce")).send().await.unwrap();
    assert_eq!(resp_get.status(), 204);
}

#[tokio::test]
async fn malformed_envelope_is_rejected_before_any_nonce_check() {
    let base_url = spawn_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base_url}/new-account"))
        .body("this is not json")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
    assert_eq!(resp.headers().get("content-type").unwrap(), "application/problem+json");
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["type"], "urn:ietf:params:acme:error:malformed");
    // Even a rejected request gets a fresh nonce (§7).
    assert!(resp.headers().get("replay-nonce").is_some());
}

#[tokio::test]
async fn unsupported_signature_algorithm_is_rejected() {
    let base_url = spawn_server().await;
    let client = reqwest::Client::new();
    let url = format!("{base_url}/new-account");
    let nonce = fresh_nonce(&client, &base_url).await;

    let protected = json!({
        "alg": "ES256",
        "nonce": nonce,
        "url": url,
        "jwk": {"kty": "RSA", "n": "AA", "e": "AQAB"},
    });
    let payload = json!({"termsOfServiceAgreed": true});
    let envelope = unsigned_envelope(&protected, &payload);

    let resp = client.post(&url).json(&envelope).send().await.unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["type"], "urn:ietf:params:acme:error:badSignatureAlgorithm");
}

/// §3 "nonce monotonicity in single use": a nonce is consumed the moment
/// it passes step 4 of the authenticator, regardless of what happens to
/// the request afterwards - so replaying it, even against a request that
/// itself fails for an unrelated reason, is still a `badNonce`.
#[tokio::test]
async fn a_nonce_is_single_use_even_when_the_first_request_fails() {
    let base_url = spawn_server().await;
    let client = reqwest::Client::new();
    let url = format!("{base_url}/new-account");
    let nonce = fresh_nonce(&client, &base_url).await;

    let protected = json!({
        "alg": "ES256",
        "nonce": nonce,
        "url": url,
        "jwk": {"kty": "RSA", "n": "AA", "e": "AQAB"},
    });
    let payload = json!({});
    let envelope = unsigned_envelope(&protected, &payload);

    let first = client.post(&url).json(&envelope).send().await.unwrap();
    assert_eq!(first.status(), 400);
    let first_body: serde_json::Value = first.json().await.unwrap();
    assert_eq!(first_body["type"], "urn:ietf:params:acme:error:badSignatureAlgorithm");

    let second = client.post(&url).json(&envelope).send().await.unwrap();
    assert_eq!(second.status(), 400);
    let second_body: serde_json::Value = second.json().await.unwrap();
    assert_eq!(second_body["type"], "urn:ietf:params:acme:error:badNonce");
}

#[tokio::test]
async fn signature_url_binding_is_enforced() {
    let base_url = spawn_server().await;
    let client = reqwest::Client::new();
    let url = format!("{base_url}/new-account");
    let nonce = fresh_nonce(&client, &base_url).await;

    let protected = json!({
        "alg": "RS256",
        "nonce": nonce,
        "url": format!("{base_url}/some-other-resource"),
        "jwk": {"kty": "RSA", "n": "AA", "e": "AQAB"},
    });
    let envelope = unsigned_envelope(&protected, &json!({}));

    let resp = client.post(&url).json(&envelope).send().await.unwrap();
    assert_eq!(resp.status(), 403);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["type"], "urn:ietf:params:acme:error:unauthorized");
}

#[tokio::test]
async fn ca_chain_endpoint_serves_the_configured_issuer() {
    let base_url = spawn_server().await;
    let client = reqwest::Client::new();

    let resp = client.get(format!("{base_url}/ca-chain")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body = resp.text().await.unwrap();
    assert!(body.contains("BEGIN CERTIFICATE"));
}

#[tokio::test]
async fn unknown_resource_is_a_malformed_problem_document() {
    let base_url = spawn_server().await;
    let client = reqwest::Client::new();

    let resp = client.post(format!("{base_url}/no-such-resource")).body("{}").send().await.unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["type"], "urn:ietf:params:acme:error:malformed");
}
