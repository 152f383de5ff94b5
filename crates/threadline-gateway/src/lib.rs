pub mod connection;
pub mod session;

pub use crate::connection::{handle_connection, principal_from_token};
pub use crate::session::GatewaySession;
