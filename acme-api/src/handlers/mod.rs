//! One module per wire resource (§6.1), plus the shared response/auth
//! plumbing in the parent crate.

pub mod account;
pub mod authz;
pub mod certificate;
pub mod challenge;
pub mod directory;
pub mod key_change;
pub mod order;
pub mod revoke;
