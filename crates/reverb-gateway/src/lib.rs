//! WebSocket Gateway. The single entry point audio-capturing
//! clients (browser, wearable) speak to: authenticates the connection,
//! runs the framed Wyoming-style protocol, and fans work out to the rest
//! of the system purely through the trait-object backends in
//! [`GatewayState`] — this crate never touches Redis or SQLite directly.

pub mod auth;
pub mod batch;
pub mod error;
pub mod opus_decode;
pub mod protocol;
pub mod session_init;
pub mod state;
pub mod ws;

pub use auth::{AuthClaims, SharedSecretAuthenticator, TokenAuthenticator};
pub use error::{GatewayError, Result};
pub use state::GatewayState;
pub use ws::router;
