//! HTTP listener, router and RFC 8555 protocol handlers.

pub mod client_addr;
pub mod handlers;
pub mod response;
pub mod server;
pub mod state;

pub use server::run;
pub use state::AppState;
