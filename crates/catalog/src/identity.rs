//! Request identity
//!
//! Classifies the credentials presented on a request and turns verified
//! ones into a [`RequestIdentity`]. Basic credentials are compared with
//! the configured pair; bearer tokens are RS256 JWTs checked with
//! `jsonwebtoken`.

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use base64::Engine;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use tracing::{debug, warn};
use uuid::Uuid;

/// Actor recorded for writes without an identifiable user
pub const SYSTEM_USER: Uuid = Uuid::nil();

/// Authentication mechanism presented on one request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuthType {
    None,
    Basic,
    Bearer,
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AuthType::None => "NONE",
            AuthType::Basic => "BASIC",
            AuthType::Bearer => "BEARER",
        })
    }
}

/// Verified identity attached to a request
#[derive(Debug, Clone, PartialEq)]
pub struct RequestIdentity {
    pub auth_type: AuthType,
    pub subject_id: Option<String>,
    pub claims: Map<String, Value>,
}

impl RequestIdentity {
    pub fn anonymous() -> Self {
        Self {
            auth_type: AuthType::None,
            subject_id: None,
            claims: Map::new(),
        }
    }

    /// Basic credentials identify the service account, not a user
    pub fn basic() -> Self {
        Self {
            auth_type: AuthType::Basic,
            subject_id: None,
            claims: Map::new(),
        }
    }

    pub fn bearer(claims: Map<String, Value>) -> Self {
        let subject_id = claims
            .get("sub")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        Self {
            auth_type: AuthType::Bearer,
            subject_id,
            claims,
        }
    }

    /// The subject as a user id, when it is one
    pub fn user_id(&self) -> Option<Uuid> {
        self.subject_id
            .as_deref()
            .and_then(|s| Uuid::parse_str(s).ok())
    }

    /// User to record as creator of writes made on this request
    pub fn actor(&self) -> Uuid {
        self.user_id().unwrap_or(SYSTEM_USER)
    }
}

/// Why presented credentials were refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("Malformed authorization header")]
    Malformed,
    #[error("Invalid basic credentials")]
    InvalidBasic,
    #[error("Invalid bearer token: {0}")]
    InvalidBearer(String),
}

/// Username and password accepted for basic authentication
#[derive(Clone)]
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for BasicCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicCredentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// RS256 bearer token verification
#[derive(Clone)]
pub struct BearerVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl BearerVerifier {
    pub fn from_rsa_pem(
        pem: &[u8],
        issuer: Option<&str>,
        audience: Option<&str>,
    ) -> Result<Self, jsonwebtoken::errors::Error> {
        let key = DecodingKey::from_rsa_pem(pem)?;
        Ok(Self::new(key, Algorithm::RS256, issuer, audience))
    }

    pub fn new(key: DecodingKey, algorithm: Algorithm, issuer: Option<&str>, audience: Option<&str>) -> Self {
        let mut validation = Validation::new(algorithm);
        match issuer {
            Some(iss) => validation.set_issuer(&[iss]),
            None => validation.iss = None,
        }
        match audience {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }
        Self { key, validation }
    }

    pub fn verify(&self, token: &str) -> Result<Map<String, Value>, IdentityError> {
        decode::<Map<String, Value>>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| IdentityError::InvalidBearer(e.to_string()))
    }
}

/// Turns request headers into a verified identity
#[derive(Clone, Default)]
pub struct IdentityVerifier {
    basic: Option<BasicCredentials>,
    bearer: Option<BearerVerifier>,
}

impl IdentityVerifier {
    pub fn new(basic: Option<BasicCredentials>, bearer: Option<BearerVerifier>) -> Self {
        Self { basic, bearer }
    }

    /// Auth type presented, without verifying anything
    pub fn classify(headers: &HeaderMap) -> AuthType {
        match headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) {
            Some(value) if starts_with_scheme(value, "basic") => AuthType::Basic,
            Some(value) if starts_with_scheme(value, "bearer") => AuthType::Bearer,
            _ => AuthType::None,
        }
    }

    /// Verify the credentials on a request.
    ///
    /// Missing credentials, or an Authorization scheme other than Basic
    /// and Bearer, give an anonymous identity. Credentials of a kind this
    /// deployment has no verifier for are left unverified: the auth type
    /// is kept so the mode guard can reject it, but no subject is attached.
    pub fn identify(&self, headers: &HeaderMap) -> Result<RequestIdentity, IdentityError> {
        let auth_type = Self::classify(headers);
        let value = match headers.get(AUTHORIZATION) {
            Some(raw) if auth_type != AuthType::None => {
                raw.to_str().map_err(|_| IdentityError::Malformed)?
            }
            Some(_) => {
                debug!("Ignoring Authorization header with an unrecognised scheme");
                return Ok(RequestIdentity::anonymous());
            }
            None => return Ok(RequestIdentity::anonymous()),
        };

        match auth_type {
            AuthType::Basic => match &self.basic {
                Some(expected) => {
                    let (user, pass) = decode_basic(&value[6..])?;
                    if user == expected.username && pass == expected.password {
                        debug!("Basic credentials accepted");
                        Ok(RequestIdentity::basic())
                    } else {
                        warn!("Basic credentials rejected for user {}", user);
                        Err(IdentityError::InvalidBasic)
                    }
                }
                None => Ok(RequestIdentity::basic()),
            },
            AuthType::Bearer => match &self.bearer {
                Some(verifier) => {
                    let claims = verifier.verify(value[7..].trim())?;
                    Ok(RequestIdentity::bearer(claims))
                }
                None => Ok(RequestIdentity {
                    auth_type: AuthType::Bearer,
                    subject_id: None,
                    claims: Map::new(),
                }),
            },
            AuthType::None => Ok(RequestIdentity::anonymous()),
        }
    }
}

fn starts_with_scheme(value: &str, scheme: &str) -> bool {
    value.len() > scheme.len()
        && value[..scheme.len()].eq_ignore_ascii_case(scheme)
        && value.as_bytes()[scheme.len()] == b' '
}

fn decode_basic(encoded: &str) -> Result<(String, String), IdentityError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|_| IdentityError::Malformed)?;
    let text = String::from_utf8(bytes).map_err(|_| IdentityError::Malformed)?;
    let (user, pass) = text.split_once(':').ok_or(IdentityError::Malformed)?;
    Ok((user.to_string(), pass.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    fn basic_header(user: &str, pass: &str) -> String {
        let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", user, pass));
        format!("Basic {}", encoded)
    }

    fn hs256_verifier(secret: &[u8]) -> BearerVerifier {
        BearerVerifier::new(DecodingKey::from_secret(secret), Algorithm::HS256, None, None)
    }

    fn token(secret: &[u8], claims: Value) -> String {
        encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(secret)).unwrap()
    }

    #[test]
    fn test_classify_auth_type() {
        assert_eq!(IdentityVerifier::classify(&HeaderMap::new()), AuthType::None);
        assert_eq!(IdentityVerifier::classify(&headers("Basic abc")), AuthType::Basic);
        assert_eq!(IdentityVerifier::classify(&headers("bearer abc")), AuthType::Bearer);
        assert_eq!(IdentityVerifier::classify(&headers("Digest abc")), AuthType::None);
    }

    #[test]
    fn test_unrecognised_scheme_is_anonymous() {
        let verifier = IdentityVerifier::new(None, Some(hs256_verifier(b"secret")));
        let identity = verifier.identify(&headers("Digest username=\"svc\"")).unwrap();
        assert_eq!(identity.auth_type, AuthType::None);
        assert_eq!(identity.subject_id, None);

        let identity = verifier.identify(&headers("Bearer")).unwrap();
        assert_eq!(identity.auth_type, AuthType::None);
    }

    #[test]
    fn test_basic_credentials() {
        let verifier = IdentityVerifier::new(
            Some(BasicCredentials {
                username: "svc".into(),
                password: "secret".into(),
            }),
            None,
        );

        let identity = verifier.identify(&headers(&basic_header("svc", "secret"))).unwrap();
        assert_eq!(identity.auth_type, AuthType::Basic);
        assert_eq!(identity.subject_id, None);
        assert_eq!(identity.actor(), SYSTEM_USER);

        let err = verifier.identify(&headers(&basic_header("svc", "wrong"))).unwrap_err();
        assert_eq!(err, IdentityError::InvalidBasic);
    }

    #[test]
    fn test_bearer_token_subject() {
        let secret = b"test-secret";
        let user = Uuid::new_v4();
        let exp = chrono::Utc::now().timestamp() + 3600;
        let verifier = IdentityVerifier::new(None, Some(hs256_verifier(secret)));

        let jwt = token(secret, json!({ "sub": user.to_string(), "exp": exp }));
        let identity = verifier.identify(&headers(&format!("Bearer {}", jwt))).unwrap();
        assert_eq!(identity.auth_type, AuthType::Bearer);
        assert_eq!(identity.user_id(), Some(user));
        assert_eq!(identity.actor(), user);
    }

    #[test]
    fn test_bearer_token_rejected() {
        let verifier = IdentityVerifier::new(None, Some(hs256_verifier(b"right")));
        let exp = chrono::Utc::now().timestamp() + 3600;
        let jwt = token(b"wrong", json!({ "sub": "someone", "exp": exp }));

        let result = verifier.identify(&headers(&format!("Bearer {}", jwt)));
        assert!(matches!(result, Err(IdentityError::InvalidBearer(_))));
    }

    #[test]
    fn test_non_uuid_subject_has_no_user_id() {
        let identity = RequestIdentity::bearer(
            json!({ "sub": "idir-user" }).as_object().cloned().unwrap(),
        );
        assert_eq!(identity.subject_id.as_deref(), Some("idir-user"));
        assert_eq!(identity.user_id(), None);
        assert_eq!(identity.actor(), SYSTEM_USER);
    }
}
