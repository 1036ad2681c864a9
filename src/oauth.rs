//! OAuth providers a charter can connect to.
//!
//! Covers the authorization-code flow: building the provider's authorization
//! URL, exchanging the returned code for tokens, and reading the account the
//! tokens belong to.

use std::fmt::{Display, Formatter, Result as FmtResult};

use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::config::{OAuthConfig, OAuthProviderConfig};

//////////////////////////////////////////// Providers /////////////////////////////////////////////

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthProvider {
    Github,
    Gitlab,
    Bitbucket,
    Dockerhub,
}

/// What a connection gives access to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
    Git,
    Registry,
}

impl ConnectionType {
    pub const ALL: [&'static str; 2] = ["git", "registry"];

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "git" => Some(ConnectionType::Git),
            "registry" => Some(ConnectionType::Registry),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionType::Git => "git",
            ConnectionType::Registry => "registry",
        }
    }
}

/// Provider URLs of the authorization-code flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub authorize: String,
    pub token: String,
    pub user: String,
}

impl OAuthProvider {
    pub const ALL: [&'static str; 4] = ["github", "gitlab", "bitbucket", "dockerhub"];

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "github" => Some(OAuthProvider::Github),
            "gitlab" => Some(OAuthProvider::Gitlab),
            "bitbucket" => Some(OAuthProvider::Bitbucket),
            "dockerhub" => Some(OAuthProvider::Dockerhub),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthProvider::Github => "github",
            OAuthProvider::Gitlab => "gitlab",
            OAuthProvider::Bitbucket => "bitbucket",
            OAuthProvider::Dockerhub => "dockerhub",
        }
    }

    /// GitHub serves repositories and packages; GitLab and Bitbucket serve
    /// repositories; Docker Hub serves images.
    pub fn supports(&self, connection_type: ConnectionType) -> bool {
        matches!(
            (self, connection_type),
            (OAuthProvider::Github, _)
                | (OAuthProvider::Gitlab, ConnectionType::Git)
                | (OAuthProvider::Bitbucket, ConnectionType::Git)
                | (OAuthProvider::Dockerhub, ConnectionType::Registry)
        )
    }

    /// The configured client registration, if any.
    pub fn client<'a>(&self, config: &'a OAuthConfig) -> Option<&'a OAuthProviderConfig> {
        match self {
            OAuthProvider::Github => config.github.as_ref(),
            OAuthProvider::Gitlab => config.gitlab.as_ref(),
            OAuthProvider::Bitbucket => config.bitbucket.as_ref(),
            OAuthProvider::Dockerhub => config.dockerhub.as_ref(),
        }
    }

    pub fn endpoints(&self, client: &OAuthProviderConfig) -> Endpoints {
        match self {
            OAuthProvider::Github => Endpoints {
                authorize: "https://github.com/login/oauth/authorize".to_string(),
                token: "https://github.com/login/oauth/access_token".to_string(),
                user: "https://api.github.com/user".to_string(),
            },
            OAuthProvider::Gitlab => {
                let site = client
                    .site
                    .as_deref()
                    .unwrap_or("https://gitlab.com")
                    .trim_end_matches('/');
                Endpoints {
                    authorize: format!("{}/oauth/authorize", site),
                    token: format!("{}/oauth/token", site),
                    user: format!("{}/api/v4/user", site),
                }
            }
            OAuthProvider::Bitbucket => Endpoints {
                authorize: "https://bitbucket.org/site/oauth2/authorize".to_string(),
                token: "https://bitbucket.org/site/oauth2/access_token".to_string(),
                user: "https://api.bitbucket.org/2.0/user".to_string(),
            },
            OAuthProvider::Dockerhub => Endpoints {
                authorize: "https://hub.docker.com/oauth/authorize".to_string(),
                token: "https://hub.docker.com/oauth/token".to_string(),
                user: "https://hub.docker.com/api/user".to_string(),
            },
        }
    }

    /// Where the provider sends the browser back to.
    pub fn redirect_uri(&self, public_url: &str) -> String {
        format!(
            "{}/callback/oauth/{}",
            public_url.trim_end_matches('/'),
            self.as_str()
        )
    }
}

impl Display for OAuthProvider {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// Builds the provider authorization URL; `state` ties the callback to a
/// pending connection.
pub fn authorization_url(
    endpoints: &Endpoints,
    client: &OAuthProviderConfig,
    redirect_uri: &str,
    state: &str,
    scopes: &[String],
) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(&endpoints.authorize)?;
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("response_type", "code")
            .append_pair("client_id", &client.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("state", state);
        if !scopes.is_empty() {
            query.append_pair("scope", &scopes.join(" "));
        }
    }
    Ok(url)
}

/////////////////////////////////////////// OAuthError /////////////////////////////////////////////

#[derive(Debug)]
pub enum OAuthError {
    /// The provider could not be reached.
    Http(reqwest::Error),
    /// The provider answered with a non-success status.
    Status(u16),
    /// The provider's answer lacks a required member.
    Response(String),
}

impl Display for OAuthError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            OAuthError::Http(e) => write!(f, "provider request failed: {}", e),
            OAuthError::Status(status) => write!(f, "provider answered {}", status),
            OAuthError::Response(msg) => write!(f, "unexpected provider response: {}", msg),
        }
    }
}

impl std::error::Error for OAuthError {}

impl From<reqwest::Error> for OAuthError {
    fn from(e: reqwest::Error) -> Self {
        OAuthError::Http(e)
    }
}

/////////////////////////////////////////////// Flow ///////////////////////////////////////////////

/// Tokens returned by the provider's token endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

/// The provider account that approved a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
    pub id: String,
    pub login: Option<String>,
    pub account_type: Option<String>,
}

impl AccountInfo {
    /// Reads the provider's user document.
    pub fn from_user(provider: OAuthProvider, user: &Value) -> Result<Self, OAuthError> {
        let id = match user.get("id").or_else(|| user.get("uuid")) {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => return Err(OAuthError::Response("account id missing".to_string())),
        };
        let login_field = match provider {
            OAuthProvider::Github => "login",
            _ => "username",
        };
        let login = user
            .get(login_field)
            .and_then(Value::as_str)
            .map(str::to_string);
        let account_type = match provider {
            OAuthProvider::Github => user.get("type").and_then(Value::as_str).map(str::to_string),
            _ => None,
        };
        Ok(AccountInfo {
            id,
            login,
            account_type,
        })
    }
}

/// Exchanges an authorization code for tokens.
pub async fn exchange_code(
    http: &reqwest::Client,
    endpoints: &Endpoints,
    client: &OAuthProviderConfig,
    code: &str,
    redirect_uri: &str,
) -> Result<TokenResponse, OAuthError> {
    let response = http
        .post(&endpoints.token)
        .header(reqwest::header::ACCEPT, "application/json")
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", client.client_id.as_str()),
            ("client_secret", client.client_secret.as_str()),
        ])
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(OAuthError::Status(response.status().as_u16()));
    }
    let body: Value = response.json().await?;
    if let Some(error) = body.get("error").and_then(Value::as_str) {
        return Err(OAuthError::Response(error.to_string()));
    }
    serde_json::from_value(body).map_err(|e| OAuthError::Response(e.to_string()))
}

/// Reads the account the access token belongs to.
pub async fn fetch_account(
    http: &reqwest::Client,
    provider: OAuthProvider,
    endpoints: &Endpoints,
    access_token: &str,
) -> Result<AccountInfo, OAuthError> {
    let response = http
        .get(&endpoints.user)
        .bearer_auth(access_token)
        .header(reqwest::header::ACCEPT, "application/json")
        .header(reqwest::header::USER_AGENT, "galley")
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(OAuthError::Status(response.status().as_u16()));
    }
    let user: Value = response.json().await?;
    AccountInfo::from_user(provider, &user)
}
