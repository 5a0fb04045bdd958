//! Signed-request authentication (§4.2): the entry point every protocol
//! handler calls before touching ACME state.

use acme_core::error::{Error, Result};
use acme_core::model::{Account, AccountStatus, Jwk};
use acme_core::store::Session;

use crate::jws::{parse, ParsedJws};
use crate::nonce::NonceStore;

/// Outcome of a successful authentication (§4.2 contract: "returns the
/// resolved account and payload").
pub struct Authenticated {
    pub payload: Vec<u8>,
    /// `None` only for new-account requests signed with an embedded `jwk`
    /// that has no matching account yet.
    pub account: Option<Account>,
    pub key_thumbprint: [u8; 32],
    /// The embedded key, present only in `jwk`-mode requests. new-account
    /// needs this to mint the account it doesn't have yet.
    pub jwk: Option<Jwk>,
}

/// How the caller is allowed to authenticate this particular request. Most
/// handlers require an existing account (`kid` mode only); new-account and
/// revoke-by-cert-key accept an embedded `jwk` instead (§4.2 step 6).
pub enum AuthMode {
    /// Either `jwk` or `kid` is acceptable (new-account, revoke-cert).
    Either,
    /// Only `kid` is acceptable (every other authenticated handler).
    KidOnly,
}

pub struct Authenticator<'a> {
    nonces: &'a NonceStore,
    /// Canonical base URL used to validate the kid-mode account route
    /// prefix and the documented buggy variant (§4.2 step 7).
    accounts_url_prefix: String,
    new_account_url: String,
}

impl<'a> Authenticator<'a> {
    pub fn new(nonces: &'a NonceStore, accounts_url_prefix: String, new_account_url: String) -> Self {
        Self {
            nonces,
            accounts_url_prefix,
            new_account_url,
        }
    }

    /// Run the full §4.2 contract. `canonical_url` is the request URL after
    /// reverse-proxy normalization (§6.6); `post_as_get` is true for
    /// handlers whose payload must be empty.
    pub async fn authenticate(
        &self,
        body: &[u8],
        canonical_url: &str,
        mode: AuthMode,
        post_as_get: bool,
        session: &mut dyn Session,
    ) -> Result<Authenticated> {
        // Step 1: parse.
        let jws = parse(body)?;

        // Step 2: URL binding.
        if jws.header.url != canonical_url {
            return Err(Error::unauthorized(format!(
                "signature url {:?} does not match request url {:?}",
                jws.header.url, canonical_url
            )));
        }

        // Step 4: consume the nonce. (Step 3, algorithm policy, is enforced
        // inside `verify` so that a bad-nonce request and a bad-algorithm
        // request against the same envelope both get their specific error;
        // we check the nonce first per the contract's stated order.)
        if !self.nonces.consume(&jws.header.nonce) {
            return Err(Error::bad_nonce("nonce is unknown, already consumed, or forged"));
        }

        // Step 5: exactly one of jwk/kid.
        let embedded_jwk = jws.header.jwk.clone();
        let (account, key_thumbprint) = match (&jws.header.jwk, &jws.header.kid, mode) {
            (Some(_), Some(_), _) => {
                return Err(Error::malformed("exactly one of jwk or kid must be present"))
            }
            (None, None, _) => {
                return Err(Error::malformed("exactly one of jwk or kid must be present"))
            }
            (Some(jwk), None, AuthMode::Either) => {
                self.verify_embedded_key(&jws, jwk, session).await?
            }
            (Some(_), None, AuthMode::KidOnly) => {
                return Err(Error::malformed("this resource requires kid-mode authentication"))
            }
            (None, Some(kid), _) => self.verify_kid(&jws, kid, session).await?,
        };

        // Step 8: POST-as-GET payload must be empty.
        if post_as_get && !jws.payload.is_empty() {
            return Err(Error::malformed("POST-as-GET must carry an empty payload"));
        }

        Ok(Authenticated {
            payload: jws.payload,
            account,
            key_thumbprint,
            jwk: embedded_jwk,
        })
    }

    /// §4.2 step 6: `jwk` mode. Verifies the signature against the embedded
    /// key and, opportunistically, looks up a matching existing account (so
    /// new-account's `only_return_existing` can find it).
    async fn verify_embedded_key(
        &self,
        jws: &ParsedJws,
        jwk: &acme_core::model::Jwk,
        session: &mut dyn Session,
    ) -> Result<(Option<Account>, [u8; 32])> {
        jws.verify(jwk)?;
        let thumbprint = jwk.thumbprint();
        let account = session.get_account_by_key_thumbprint(&thumbprint).await?;
        Ok((account, thumbprint))
    }

    /// §4.2 step 7: `kid` mode.
    async fn verify_kid(
        &self,
        jws: &ParsedJws,
        kid_url: &str,
        session: &mut dyn Session,
    ) -> Result<(Option<Account>, [u8; 32])> {
        let kid = self.extract_kid(kid_url)?;

        let account = session
            .get_account(&kid)
            .await?
            .ok_or_else(|| Error::account_does_not_exist("no account with this kid exists"))?;

        if account.status != AccountStatus::Valid {
            return Err(Error::unauthorized("account is not in a valid state"));
        }

        jws.verify(&account.key)?;

        let thumbprint = account.key.thumbprint();
        Ok((Some(account), thumbprint))
    }

    /// Accepts the canonical `{accounts_url_prefix}/{kid}` form, plus one
    /// documented buggy variant carried forward from the original
    /// implementation: a kid URL that is the new-account route with a
    /// trailing segment appended (§4.2 step 7, §10.6). Any other prefix is
    /// rejected outright.
    fn extract_kid(&self, kid_url: &str) -> Result<String> {
        if let Some(rest) = kid_url.strip_prefix(&self.accounts_url_prefix) {
            let rest = rest.trim_start_matches('/');
            if !rest.is_empty() {
                return Ok(rest.to_string());
            }
        }
        if let Some(rest) = kid_url.strip_prefix(&self.new_account_url) {
            let rest = rest.trim_start_matches('/');
            if !rest.is_empty() {
                tracing::warn!(
                    kid_url,
                    "accepted documented buggy kid variant (new-account route with trailing segment)"
                );
                return Ok(rest.to_string());
            }
        }
        Err(Error::malformed(format!(
            "kid url {kid_url:?} does not match the accounts route"
        )))
    }
}
