//! `POST /new-account` and `POST /accounts/{kid}` (§4.2 step 6, §6.1
//! scenario 3).

use acme_auth::{AuthMode, Authenticator};
use acme_core::error::{AcmeErrorType, Error, Result};
use acme_core::model::{Account, AccountStatus};
use acme_core::store::{Entity, Session};
use acme_core::wire::{AccountDto, AccountUpdatePayload, NewAccountPayload};
use hyper::StatusCode;
use time::OffsetDateTime;

use crate::response::{self, Body};
use crate::state::AppState;

fn account_url(base_url: &str, kid: &str) -> String {
    format!("{}/{kid}", AppState::accounts_url_prefix(base_url))
}

fn orders_url(base_url: &str, kid: &str) -> String {
    format!("{}/orders", account_url(base_url, kid))
}

fn validate_contacts(contacts: &[String], mail_suffixes: &[String]) -> Result<()> {
    if mail_suffixes.is_empty() {
        return Ok(());
    }
    for contact in contacts {
        let address = contact
            .strip_prefix("mailto:")
            .ok_or_else(|| Error::acme(AcmeErrorType::InvalidContact, "contact must be a mailto: URI"))?;
        if !mail_suffixes.iter().any(|suffix| address.ends_with(suffix.as_str())) {
            return Err(Error::acme(
                AcmeErrorType::InvalidContact,
                format!("{address} does not match an allowed contact domain"),
            ));
        }
    }
    Ok(())
}

/// `POST /new-account` (§4.2 step 6, jwk mode). Either creates the account
/// bound to the embedded key, or resolves it if one already exists for that
/// key (both the ordinary "already registered" case and `onlyReturnExisting`
/// go through the same lookup).
pub async fn new_account(
    state: &AppState,
    body: &[u8],
    canonical_url: &str,
    base_url: &str,
) -> Result<hyper::Response<Body>> {
    let mut session = state.store.begin().await.map_err(|e| Error::Store(e.to_string()))?;

    let authenticator = Authenticator::new(
        &state.nonces,
        AppState::accounts_url_prefix(base_url),
        AppState::new_account_url(base_url),
    );
    let authed = authenticator
        .authenticate(body, canonical_url, AuthMode::Either, false, session.as_mut())
        .await?;

    let payload: NewAccountPayload = if authed.payload.is_empty() {
        NewAccountPayload::default()
    } else {
        serde_json::from_slice(&authed.payload).map_err(|e| Error::malformed(format!("invalid new-account payload: {e}")))?
    };

    if let Some(existing) = authed.account {
        let dto = AccountDto::from_account(&existing, orders_url(base_url, &existing.kid));
        let mut response = response::json(StatusCode::OK, &dto);
        response.headers_mut().insert(
            "location",
            account_url(base_url, &existing.kid)
                .parse()
                .expect("account kid is URL-safe base64"),
        );
        return Ok(response);
    }

    if payload.only_return_existing {
        return Err(Error::account_does_not_exist(
            "no account is registered for this key",
        ));
    }

    if state.config.tos_url.is_some() && !payload.terms_of_service_agreed {
        return Err(Error::acme(
            AcmeErrorType::TermsOfServiceNotAgreed,
            "terms of service must be agreed to before registering an account",
        ));
    }

    validate_contacts(&payload.contact, &state.config.mail_suffixes)?;

    let jwk = authed
        .jwk
        .ok_or_else(|| Error::malformed("new-account requires an embedded jwk"))?;

    let account = Account {
        kid: jwk.kid(),
        key: jwk,
        status: AccountStatus::Valid,
        contacts: payload.contact,
        tos_agreed: payload.terms_of_service_agreed,
        created_at: OffsetDateTime::now_utc(),
    };

    session.add(Entity::Account(account.clone()));
    session.commit().await.map_err(|e| Error::Store(e.to_string()))?;

    let dto = AccountDto::from_account(&account, orders_url(base_url, &account.kid));
    let mut response = response::json(StatusCode::CREATED, &dto);
    response.headers_mut().insert(
        "location",
        account_url(base_url, &account.kid)
            .parse()
            .expect("account kid is URL-safe base64"),
    );
    Ok(response)
}

/// `POST /accounts/{kid}` (§4.2 step 7, kid mode): read, update contacts, or
/// deactivate.
pub async fn account_update(
    state: &AppState,
    body: &[u8],
    canonical_url: &str,
    base_url: &str,
    path_kid: &str,
) -> Result<hyper::Response<Body>> {
    let mut session = state.store.begin().await.map_err(|e| Error::Store(e.to_string()))?;

    let authenticator = Authenticator::new(
        &state.nonces,
        AppState::accounts_url_prefix(base_url),
        AppState::new_account_url(base_url),
    );
    let authed = authenticator
        .authenticate(body, canonical_url, AuthMode::KidOnly, false, session.as_mut())
        .await?;

    let mut account = authed
        .account
        .ok_or_else(|| Error::account_does_not_exist("no account with this kid exists"))?;

    if account.kid != path_kid {
        return Err(Error::unauthorized("kid does not match the requested account"));
    }

    if !authed.payload.is_empty() {
        let update: AccountUpdatePayload = serde_json::from_slice(&authed.payload)
            .map_err(|e| Error::malformed(format!("invalid account-update payload: {e}")))?;

        if let Some(contacts) = update.contact {
            validate_contacts(&contacts, &state.config.mail_suffixes)?;
            account.contacts = contacts;
        }

        if let Some(AccountStatus::Deactivated) = update.status {
            account.deactivate()?;
        } else if let Some(other) = update.status {
            if other != account.status {
                return Err(Error::malformed(
                    "only deactivation is a client-permitted account status transition",
                ));
            }
        }
    }

    session.add(Entity::Account(account.clone()));
    session.commit().await.map_err(|e| Error::Store(e.to_string()))?;

    let dto = AccountDto::from_account(&account, orders_url(base_url, &account.kid));
    Ok(response::json(StatusCode::OK, &dto))
}
