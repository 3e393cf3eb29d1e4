//! Login and session verification.
//!
//! A login attempt is: fetch the anti-forgery token, pre-check the
//! credentials, post the RSA-encrypted credentials and expect a two-hop
//! redirect chain, then confirm the session independently by loading an
//! account-only page. Only that last check marks the session authenticated.

use crate::acquisition::cipher::CredentialCipher;
use crate::acquisition::http_client::{HttpGateway, Redirects};
use crate::acquisition::markup::{first_attr, first_text};
use crate::acquisition::site::SiteEndpoints;
use crate::error::{preview, AcquireError};
use async_trait::async_trait;
use scraper::Html;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Hidden input carrying the login token.
const TOKEN_SELECTOR: &str = "input#tokens";
/// Element that only renders for a logged-in user.
const IDENTITY_SELECTOR: &str = ".ac_user_name";

/// Username and password for the single account of a run.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Session state owned by [`SessionManager`]. Cookies live in the gateway.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub token: Option<String>,
    pub authenticated: bool,
}

/// Something that can (re-)establish an authenticated session.
#[async_trait]
pub trait Authenticator: Send {
    async fn authenticate(&mut self) -> Result<(), AcquireError>;
}

pub struct SessionManager {
    gateway: Arc<HttpGateway>,
    site: SiteEndpoints,
    cipher: CredentialCipher,
    credentials: Credentials,
    state: SessionState,
}

impl SessionManager {
    pub fn new(
        gateway: Arc<HttpGateway>,
        site: SiteEndpoints,
        cipher: CredentialCipher,
        credentials: Credentials,
    ) -> Self {
        Self {
            gateway,
            site,
            cipher,
            credentials,
            state: SessionState::default(),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.authenticated
    }

    /// Load the login page and read the anti-forgery token.
    pub async fn fetch_token(&mut self) -> Result<String, AcquireError> {
        let url = self.site.login_page();
        let resp = self.gateway.get(&url, Redirects::Follow).await?;
        let token = parse_token(&resp.body).ok_or_else(|| {
            AcquireError::protocol(&url, format!("login token not found: {}", resp.body))
        })?;
        self.state.token = Some(token.clone());
        Ok(token)
    }

    /// Run the full login sequence.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<(), AcquireError> {
        self.state = SessionState::default();
        if username.is_empty() || password.is_empty() {
            return Err(AcquireError::Auth("username or password not configured".into()));
        }

        let token = self.fetch_token().await?;
        tracing::info!("login token acquired");

        self.check_user(username, password, &token).await?;

        let encrypted_username = self.cipher.encrypt(username)?;
        let encrypted_password = self.cipher.encrypt(password)?;

        let url = self.site.login_page();
        let form = [
            ("username", encrypted_username),
            ("password", encrypted_password),
            ("target", self.site.home().to_string()),
            ("error_num", "0".to_string()),
            ("tokens", token),
        ];
        let resp = self.gateway.post_form(&url, &form, Redirects::Manual).await?;

        let Some(first_hop) = resp.redirect_target() else {
            return Err(AcquireError::Auth(format!(
                "login did not redirect (status {})",
                resp.status
            )));
        };
        tracing::info!("login redirected to {first_hop}");

        let hop = self.gateway.get(&first_hop, Redirects::Manual).await?;
        if !hop.is_redirect() {
            return Err(AcquireError::Auth(format!(
                "login redirect chain ended early at {first_hop} (status {})",
                hop.status
            )));
        }

        if !self.verify_login().await? {
            return Err(AcquireError::Auth(
                "login redirected but the account page shows no user".into(),
            ));
        }
        Ok(())
    }

    /// Load an account-only page and look for the user identity marker.
    pub async fn verify_login(&mut self) -> Result<bool, AcquireError> {
        let resp = self
            .gateway
            .get(&self.site.account_page(), Redirects::Follow)
            .await?;
        let authenticated = match identity_marker(&resp.body) {
            Some(name) => {
                tracing::info!("logged in as {name}");
                true
            }
            None => {
                tracing::warn!("account page has no identity marker");
                false
            }
        };
        self.state.authenticated = authenticated;
        Ok(authenticated)
    }

    async fn check_user(
        &self,
        username: &str,
        password: &str,
        token: &str,
    ) -> Result<(), AcquireError> {
        let url = self.site.check_user();
        let form = [
            ("username", username.to_string()),
            ("password", password.to_string()),
            ("type", "m".to_string()),
            ("token", token.to_string()),
        ];
        let resp = self.gateway.post_form(&url, &form, Redirects::Follow).await?;
        interpret_check_user(&resp.body)
    }
}

#[async_trait]
impl Authenticator for SessionManager {
    async fn authenticate(&mut self) -> Result<(), AcquireError> {
        let Credentials { username, password } = self.credentials.clone();
        self.login(&username, &password).await
    }
}

fn parse_token(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    first_attr(&document, TOKEN_SELECTOR, "value").filter(|t| !t.is_empty())
}

fn identity_marker(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    first_text(&document, IDENTITY_SELECTOR)
}

/// The pre-check passes only for a JSON object whose `error` field is unset.
fn interpret_check_user(body: &str) -> Result<(), AcquireError> {
    let payload: Value = serde_json::from_str(body).map_err(|_| {
        AcquireError::Auth(format!("credential check returned non-JSON: {}", preview(body)))
    })?;
    let Some(fields) = payload.as_object() else {
        return Err(AcquireError::Auth(format!(
            "credential check returned a non-object: {}",
            preview(body)
        )));
    };
    match fields.get("error") {
        Some(err) if is_set(err) => Err(AcquireError::Auth(format!(
            "credential check rejected: {}",
            preview(&err.to_string())
        ))),
        _ => Ok(()),
    }
}

/// Falsy JSON (null, false, 0, empty string/array/object) counts as unset.
fn is_set(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
