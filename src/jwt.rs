//! Token issuance and verification.
//!
//! Every token kind shares one HS256 key and is told apart by the `typ`
//! header. Access tokens (`at+jwt`) carry the caller's scopes and refresh
//! tokens (`rt+jwt`) are exchanged for access tokens. Agent tokens
//! (`agent+jwt`) authenticate a vessel engine on the tunnel, and node agent
//! tokens (`node-agent+jwt`) let a freshly provisioned node report itself.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter, Result as FmtResult};

use chrono::Utc;
use hmac::{Hmac, Mac};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

pub const ISSUER: &str = "run.galley.auth";
pub const AUDIENCE: &str = "run.galley.api";

/// Access tokens are short lived; clients refresh them continuously.
pub const ACCESS_TOKEN_TTL_SECS: i64 = 30;
/// Ninety days.
pub const REFRESH_TOKEN_TTL_SECS: i64 = 7_776_000;
pub const DEFAULT_AGENT_TOKEN_TTL_SECS: i64 = 3600;

//////////////////////////////////////////// TokenType /////////////////////////////////////////////

/// The kind of token, carried in the JOSE `typ` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    Access,
    Refresh,
    Agent,
    NodeAgent,
}

impl TokenType {
    pub fn typ(&self) -> &'static str {
        match self {
            TokenType::Access => "at+jwt",
            TokenType::Refresh => "rt+jwt",
            TokenType::Agent => "agent+jwt",
            TokenType::NodeAgent => "node-agent+jwt",
        }
    }
}

///////////////////////////////////////////// CrewRole /////////////////////////////////////////////

/// A role granted by a scope in the `scp` claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CrewRole {
    VesselCaptain,
    VesselMember,
    CharterCaptain,
    CharterBoatswain,
    CharterPurser,
    CharterSteward,
    CharterDeckhand,
}

impl CrewRole {
    /// Every charter-level role.
    pub const CHARTER_ROLES: [CrewRole; 5] = [
        CrewRole::CharterCaptain,
        CrewRole::CharterBoatswain,
        CrewRole::CharterPurser,
        CrewRole::CharterSteward,
        CrewRole::CharterDeckhand,
    ];

    /// Maps a `crew_charter_member.charter_role` value to its role.
    pub fn from_charter_role(role: &str) -> Option<CrewRole> {
        match role {
            "captain" => Some(CrewRole::CharterCaptain),
            "boatswain" => Some(CrewRole::CharterBoatswain),
            "purser" => Some(CrewRole::CharterPurser),
            "steward" => Some(CrewRole::CharterSteward),
            "deckhand" => Some(CrewRole::CharterDeckhand),
            _ => None,
        }
    }

    pub fn is_charter_role(&self) -> bool {
        Self::CHARTER_ROLES.contains(self)
    }
}

/////////////////////////////////////////////// Scopes /////////////////////////////////////////////

/// Scope key for a vessel-level role.
pub fn vessel_scope(vessel_id: Uuid) -> String {
    format!("vessel:{}", vessel_id)
}

/// Scope key for a charter-level role.
pub fn charter_scope(vessel_id: Uuid, charter_id: Uuid) -> String {
    format!("charter:{}:{}", vessel_id, charter_id)
}

/// A parsed scope key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Vessel(Uuid),
    Charter(Uuid, Uuid),
}

impl Scope {
    pub fn parse(key: &str) -> Option<Scope> {
        if let Some(vessel) = key.strip_prefix("vessel:") {
            return Uuid::parse_str(vessel).ok().map(Scope::Vessel);
        }
        let rest = key.strip_prefix("charter:")?;
        let (vessel, charter) = rest.split_once(':')?;
        Some(Scope::Charter(
            Uuid::parse_str(vessel).ok()?,
            Uuid::parse_str(charter).ok()?,
        ))
    }

    pub fn vessel_id(&self) -> Uuid {
        match self {
            Scope::Vessel(vessel_id) | Scope::Charter(vessel_id, _) => *vessel_id,
        }
    }
}

////////////////////////////////////////////// Claims //////////////////////////////////////////////

/// Registered claims plus galley's `scp` and `embarking` claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub scp: BTreeMap<String, CrewRole>,
    #[serde(default)]
    pub embarking: bool,
}

impl Claims {
    fn new(sub: String, ttl_secs: i64) -> Self {
        let now = Utc::now().timestamp();
        Self {
            sub,
            iat: now,
            exp: now + ttl_secs,
            iss: ISSUER.to_string(),
            aud: AUDIENCE.to_string(),
            jti: None,
            scp: BTreeMap::new(),
            embarking: false,
        }
    }

    /// The subject as a UUID, when it is one.
    pub fn subject_id(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.sub).ok()
    }
}

////////////////////////////////////////////// JwtError ////////////////////////////////////////////

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JwtError {
    /// Signing failed.
    Encode(String),
    /// The token failed signature or claims validation.
    Invalid(String),
    /// The token is valid but of another kind.
    WrongType { expected: &'static str },
    /// The pepper could not key the refresh hash.
    Pepper,
}

impl Display for JwtError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            JwtError::Encode(msg) => write!(f, "failed to sign token: {}", msg),
            JwtError::Invalid(msg) => write!(f, "invalid token: {}", msg),
            JwtError::WrongType { expected } => write!(f, "token is not of type {}", expected),
            JwtError::Pepper => write!(f, "refresh token pepper is unusable"),
        }
    }
}

impl std::error::Error for JwtError {}

////////////////////////////////////////////// JwtKeys /////////////////////////////////////////////

/// Signing material shared by every token kind.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    pepper: Vec<u8>,
    agent_token_ttl_secs: i64,
}

impl std::fmt::Debug for JwtKeys {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("JwtKeys")
            .field("agent_token_ttl_secs", &self.agent_token_ttl_secs)
            .finish_non_exhaustive()
    }
}

impl JwtKeys {
    pub fn new(secret: &[u8], pepper: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            pepper: pepper.to_vec(),
            agent_token_ttl_secs: DEFAULT_AGENT_TOKEN_TTL_SECS,
        }
    }

    pub fn with_agent_token_ttl(mut self, ttl_secs: i64) -> Self {
        self.agent_token_ttl_secs = ttl_secs;
        self
    }

    /// The pepper, also used to derive the credential vault key.
    pub fn pepper(&self) -> &[u8] {
        &self.pepper
    }

    fn sign(&self, token_type: TokenType, claims: &Claims) -> Result<String, JwtError> {
        let mut header = Header::new(Algorithm::HS256);
        header.typ = Some(token_type.typ().to_string());
        jsonwebtoken::encode(&header, claims, &self.encoding)
            .map_err(|e| JwtError::Encode(e.to_string()))
    }

    /// Issues an access token carrying `scp` and `embarking`.
    pub fn issue_access(
        &self,
        user_id: Uuid,
        scp: BTreeMap<String, CrewRole>,
        embarking: bool,
    ) -> Result<String, JwtError> {
        let mut claims = Claims::new(user_id.to_string(), ACCESS_TOKEN_TTL_SECS);
        claims.scp = scp;
        claims.embarking = embarking;
        self.sign(TokenType::Access, &claims)
    }

    /// Issues a refresh token with a fresh `jti`.
    ///
    /// Returns the token and its claims so the caller can record the session
    /// expiry.
    pub fn issue_refresh(&self, user_id: Uuid) -> Result<(String, Claims), JwtError> {
        let mut claims = Claims::new(user_id.to_string(), REFRESH_TOKEN_TTL_SECS);
        claims.jti = Some(Uuid::new_v4().to_string());
        let token = self.sign(TokenType::Refresh, &claims)?;
        Ok((token, claims))
    }

    /// Issues a token an agent presents when it opens the tunnel.
    pub fn issue_agent(&self, vessel_engine_id: Uuid) -> Result<String, JwtError> {
        let claims = Claims::new(vessel_engine_id.to_string(), self.agent_token_ttl_secs);
        self.sign(TokenType::Agent, &claims)
    }

    /// Issues the token a node agent uses to report on its node.
    pub fn issue_node_agent(&self, node_id: Uuid) -> Result<String, JwtError> {
        let claims = Claims::new(node_id.to_string(), self.agent_token_ttl_secs);
        self.sign(TokenType::NodeAgent, &claims)
    }

    /// Verifies signature, issuer, audience, expiry and `typ`.
    pub fn verify(&self, token: &str, token_type: TokenType) -> Result<Claims, JwtError> {
        let header =
            jsonwebtoken::decode_header(token).map_err(|e| JwtError::Invalid(e.to_string()))?;
        if header.typ.as_deref() != Some(token_type.typ()) {
            return Err(JwtError::WrongType {
                expected: token_type.typ(),
            });
        }
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[ISSUER]);
        validation.set_audience(&[AUDIENCE]);
        validation.leeway = 5;
        jsonwebtoken::decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| JwtError::Invalid(e.to_string()))
    }

    /// Hex HMAC-SHA256 of a refresh token under the pepper.
    ///
    /// Only this hash is stored; the token itself never reaches the database.
    pub fn refresh_hash(&self, token: &str) -> Result<String, JwtError> {
        let mut mac = HmacSha256::new_from_slice(&self.pepper).map_err(|_| JwtError::Pepper)?;
        mac.update(token.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> JwtKeys {
        JwtKeys::new(b"test-secret-that-is-long-enough", b"pepper")
    }

    #[test]
    fn access_token_round_trips_scopes() {
        let keys = keys();
        let user = Uuid::new_v4();
        let vessel = Uuid::new_v4();
        let charter = Uuid::new_v4();
        let mut scp = BTreeMap::new();
        scp.insert(vessel_scope(vessel), CrewRole::VesselMember);
        scp.insert(charter_scope(vessel, charter), CrewRole::CharterPurser);

        let token = keys.issue_access(user, scp.clone(), true).unwrap();
        let claims = keys.verify(&token, TokenType::Access).unwrap();
        assert_eq!(claims.subject_id(), Some(user));
        assert_eq!(claims.scp, scp);
        assert!(claims.embarking);
        assert_eq!(claims.exp - claims.iat, ACCESS_TOKEN_TTL_SECS);
        assert_eq!(claims.iss, ISSUER);
    }

    #[test]
    fn typ_is_enforced() {
        let keys = keys();
        let (refresh, claims) = keys.issue_refresh(Uuid::new_v4()).unwrap();
        assert!(claims.jti.is_some());
        assert_eq!(
            keys.verify(&refresh, TokenType::Access),
            Err(JwtError::WrongType { expected: "at+jwt" })
        );
        assert!(keys.verify(&refresh, TokenType::Refresh).is_ok());
    }

    #[test]
    fn refresh_tokens_are_unique() {
        let keys = keys();
        let user = Uuid::new_v4();
        let (a, _) = keys.issue_refresh(user).unwrap();
        let (b, _) = keys.issue_refresh(user).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn foreign_signature_is_rejected() {
        let other = JwtKeys::new(b"another-secret", b"pepper");
        let token = other.issue_agent(Uuid::new_v4()).unwrap();
        assert!(matches!(
            keys().verify(&token, TokenType::Agent),
            Err(JwtError::Invalid(_))
        ));
    }

    #[test]
    fn node_agent_tokens_are_not_agent_tokens() {
        let keys = keys();
        let node = Uuid::new_v4();
        let token = keys.issue_node_agent(node).unwrap();
        assert_eq!(
            keys.verify(&token, TokenType::Agent),
            Err(JwtError::WrongType {
                expected: "agent+jwt"
            })
        );
        let claims = keys.verify(&token, TokenType::NodeAgent).unwrap();
        assert_eq!(claims.subject_id(), Some(node));
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let keys = keys().with_agent_token_ttl(-600);
        let token = keys.issue_agent(Uuid::new_v4()).unwrap();
        assert!(keys.verify(&token, TokenType::Agent).is_err());
    }

    #[test]
    fn refresh_hash_depends_on_pepper() {
        let a = JwtKeys::new(b"secret", b"pepper-a");
        let b = JwtKeys::new(b"secret", b"pepper-b");
        let hash = a.refresh_hash("token").unwrap();
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, a.refresh_hash("token").unwrap());
        assert_ne!(hash, b.refresh_hash("token").unwrap());
    }

    #[test]
    fn scope_keys_parse() {
        let vessel = Uuid::new_v4();
        let charter = Uuid::new_v4();
        assert_eq!(
            Scope::parse(&vessel_scope(vessel)),
            Some(Scope::Vessel(vessel))
        );
        assert_eq!(
            Scope::parse(&charter_scope(vessel, charter)),
            Some(Scope::Charter(vessel, charter))
        );
        assert_eq!(Scope::parse("charter:nope"), None);
        assert_eq!(Scope::parse("fleet:1"), None);
    }

    #[test]
    fn roles_serialize_screaming() {
        assert_eq!(
            serde_json::to_string(&CrewRole::CharterBoatswain).unwrap(),
            "\"CHARTER_BOATSWAIN\""
        );
        assert_eq!(
            CrewRole::from_charter_role("deckhand"),
            Some(CrewRole::CharterDeckhand)
        );
        assert!(!CrewRole::VesselCaptain.is_charter_role());
    }
}
