use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

/// Cleartext credential check for parkd. Every user on every lot logs in with
/// the one password configured at startup; the lot name is only logged here
/// and resolved later, when the first statement opens it.
#[derive(Debug)]
pub struct SharedPassword {
    secret: Vec<u8>,
}

impl SharedPassword {
    pub fn new(password: String) -> Self {
        Self {
            secret: password.into_bytes(),
        }
    }

    fn expected(&self) -> Password {
        Password::new(None, self.secret.clone())
    }
}

#[async_trait]
impl AuthSource for SharedPassword {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        tracing::debug!(
            user = login.user().unwrap_or("-"),
            lot = login.database().unwrap_or("-"),
            host = login.host(),
            "cleartext login"
        );
        Ok(self.expected())
    }
}
