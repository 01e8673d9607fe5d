//! Interactive user login over a throwaway MTProto connection.

use std::sync::Arc;

use async_trait::async_trait;
use grammers_client::{
    session::storages::TlSession,
    types::{LoginToken, PasswordToken},
    Client, SignInError,
};
use tracing::{debug, info};

use relay_core::{
    errors::Error,
    ports::{AuthHandle, AuthPort, CodeOutcome, SourceClient, UserClientConnector},
    Result,
};

use crate::{export_session, start_client, timed, MtprotoSource, RunnerGuard, REQUEST_TIMEOUT};

/// Creates one [`MtprotoAuthHandle`] per login attempt.
pub struct MtprotoAuth {
    api_id: i32,
    api_hash: String,
}

impl MtprotoAuth {
    pub fn new(api_id: i32, api_hash: impl Into<String>) -> Self {
        Self {
            api_id,
            api_hash: api_hash.into(),
        }
    }
}

#[async_trait]
impl AuthPort for MtprotoAuth {
    async fn create_handle(&self) -> Result<Box<dyn AuthHandle>> {
        let session = Arc::new(TlSession::new());
        let (client, runner) = start_client(Arc::clone(&session), self.api_id);
        debug!("mtproto: login connection opened");
        Ok(Box::new(MtprotoAuthHandle {
            client,
            session,
            api_hash: self.api_hash.clone(),
            login_token: None,
            password_token: None,
            _runner: runner,
        }))
    }
}

/// A fresh, unauthorized connection plus the tokens of the current login attempt.
pub struct MtprotoAuthHandle {
    client: Client,
    session: Arc<TlSession>,
    api_hash: String,
    login_token: Option<LoginToken>,
    password_token: Option<PasswordToken>,
    _runner: RunnerGuard,
}

#[async_trait]
impl AuthHandle for MtprotoAuthHandle {
    async fn request_code(&mut self, phone: &str) -> Result<()> {
        let token = timed(
            "request_login_code",
            self.client.request_login_code(phone, &self.api_hash),
        )
        .await?;
        self.login_token = Some(token);
        Ok(())
    }

    async fn submit_code(&mut self, code: &str) -> Result<CodeOutcome> {
        let token = self
            .login_token
            .as_ref()
            .ok_or_else(|| Error::Auth("no login code was requested".to_string()))?;

        let signed = tokio::time::timeout(REQUEST_TIMEOUT, self.client.sign_in(token, code))
            .await
            .map_err(|_| Error::External("sign-in timed out".to_string()))?;

        // Only a password prompt keeps the attempt alive; the caller tears down otherwise.
        match signed {
            Ok(_) => Ok(CodeOutcome::SignedIn),
            Err(SignInError::PasswordRequired(token)) => {
                self.password_token = Some(token);
                Ok(CodeOutcome::PasswordRequired)
            }
            Err(e) => Err(Error::Auth(e.to_string())),
        }
    }

    async fn submit_password(&mut self, password: &str) -> Result<()> {
        let token = self
            .password_token
            .take()
            .ok_or_else(|| Error::Auth("no 2FA password was requested".to_string()))?;

        timed(
            "check_password",
            self.client
                .check_password(token, password.as_bytes().to_vec()),
        )
        .await?;
        Ok(())
    }

    async fn export_credential(&self) -> Result<String> {
        Ok(export_session(&self.session))
    }

    async fn teardown(self: Box<Self>) {
        // Dropping the runner guard closes the connection; the session itself stays valid.
        debug!("mtproto: login connection closed");
    }
}

/// Turns an exported session string into a live user-identity source.
pub struct MtprotoConnector {
    api_id: i32,
}

impl MtprotoConnector {
    pub fn new(api_id: i32) -> Self {
        Self { api_id }
    }
}

#[async_trait]
impl UserClientConnector for MtprotoConnector {
    async fn connect(&self, credential: &str) -> Result<Arc<dyn SourceClient>> {
        let source = MtprotoSource::connect_user(self.api_id, credential).await?;
        info!("mtproto: user client installed");
        Ok(Arc::new(source))
    }
}
