//! Token verification for the gateway's `AwaitingAuth` state. A trait
//! boundary, not a concrete JWT implementation: the reference
//! deployment's token format is out of scope for this crate, so callers
//! plug in whatever verifier matches their identity provider.

use async_trait::async_trait;

/// Claims recovered from a validated token: enough for session
/// initialization to fill in `user_id`/`user_email`.
#[derive(Debug, Clone)]
pub struct AuthClaims {
    pub user_id: String,
    pub user_email: String,
}

#[async_trait]
pub trait TokenAuthenticator: Send + Sync {
    async fn verify(&self, token: &str) -> Option<AuthClaims>;
}

/// Shared-secret verifier: the token must equal the configured secret
/// exactly. Stands in for real JWT verification the way
/// `reverb_transcribe::MockStreamingStt` stands in for a real STT
/// vendor — good enough to exercise the state machine, not meant to be
/// the production identity check.
pub struct SharedSecretAuthenticator {
    secret: Option<String>,
}

impl SharedSecretAuthenticator {
    pub fn new(secret: Option<String>) -> Self {
        Self { secret }
    }
}

#[async_trait]
impl TokenAuthenticator for SharedSecretAuthenticator {
    async fn verify(&self, token: &str) -> Option<AuthClaims> {
        match &self.secret {
            // No secret configured: accept any non-empty token, using it
            // verbatim as the user id (dev/test mode).
            None => {
                if token.is_empty() {
                    None
                } else {
                    Some(AuthClaims {
                        user_id: token.to_string(),
                        user_email: format!("{token}@example.invalid"),
                    })
                }
            }
            Some(secret) => {
                let (user_id, presented) = token.split_once(':')?;
                if presented == secret {
                    Some(AuthClaims {
                        user_id: user_id.to_string(),
                        user_email: format!("{user_id}@example.invalid"),
                    })
                } else {
                    None
                }
            }
        }
    }
}
