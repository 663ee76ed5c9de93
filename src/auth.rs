use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

/// One shared password for every user and tenant database. Tenants are
/// isolated by database name, not by credentials.
#[derive(Debug)]
pub struct SlotgridAuthSource {
    password: String,
}

impl SlotgridAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for SlotgridAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        tracing::debug!(user = ?login.user(), database = ?login.database(), "password login");
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
