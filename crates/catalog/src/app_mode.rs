//! Server authentication mode and the guard matching it against requests

use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

use crate::error::{CatalogError, GateError};
use crate::gate::Enforcement;
use crate::identity::AuthType;

/// Authentication mechanisms a deployment accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AuthMode {
    None,
    Basic,
    Oidc,
    Full,
}

impl AuthMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMode::None => "NOAUTH",
            AuthMode::Basic => "BASICAUTH",
            AuthMode::Oidc => "OIDCAUTH",
            AuthMode::Full => "FULLAUTH",
        }
    }

    pub fn basic_enabled(&self) -> bool {
        matches!(self, AuthMode::Basic | AuthMode::Full)
    }

    pub fn oidc_enabled(&self) -> bool {
        matches!(self, AuthMode::Oidc | AuthMode::Full)
    }

    /// Permission checks need an identity provider behind them
    pub fn enforcement(&self) -> Enforcement {
        if self.oidc_enabled() {
            Enforcement::Enforced
        } else {
            Enforcement::Disabled
        }
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthMode {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NONE" | "NOAUTH" => Ok(AuthMode::None),
            "BASIC" | "BASICAUTH" => Ok(AuthMode::Basic),
            "OIDC" | "OIDCAUTH" => Ok(AuthMode::Oidc),
            "FULL" | "FULLAUTH" => Ok(AuthMode::Full),
            other => Err(CatalogError::Config(format!("Unknown auth mode: {}", other))),
        }
    }
}

/// Reject auth types the configured mode cannot serve.
///
/// Only two combinations are refused: bearer credentials against a
/// basic-only server and basic credentials against an OIDC-only server.
pub fn check_app_mode(mode: AuthMode, auth_type: AuthType) -> Result<(), GateError> {
    let refused = match (mode, auth_type) {
        (AuthMode::Basic, AuthType::Bearer) => true,
        (AuthMode::Oidc, AuthType::Basic) => true,
        _ => false,
    };

    if refused {
        warn!("Auth type {} refused in mode {}", auth_type, mode);
        return Err(GateError::NotImplemented(format!(
            "{} authentication is not supported in {} mode",
            auth_type, mode
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_mode_rejects_bearer() {
        let err = check_app_mode(AuthMode::Basic, AuthType::Bearer).unwrap_err();
        assert!(matches!(err, GateError::NotImplemented(_)));
    }

    #[test]
    fn test_oidc_mode_rejects_basic() {
        assert!(check_app_mode(AuthMode::Oidc, AuthType::Basic).is_err());
    }

    #[test]
    fn test_other_combinations_pass() {
        let modes = [AuthMode::None, AuthMode::Basic, AuthMode::Oidc, AuthMode::Full];
        let types = [AuthType::None, AuthType::Basic, AuthType::Bearer];
        let mut refused = 0;
        for mode in modes {
            for auth_type in types {
                if check_app_mode(mode, auth_type).is_err() {
                    refused += 1;
                }
            }
        }
        assert_eq!(refused, 2);
        assert!(check_app_mode(AuthMode::Full, AuthType::Basic).is_ok());
        assert!(check_app_mode(AuthMode::Full, AuthType::Bearer).is_ok());
        assert!(check_app_mode(AuthMode::None, AuthType::Bearer).is_ok());
    }

    #[test]
    fn test_parse_auth_mode() {
        assert_eq!("basicauth".parse::<AuthMode>().unwrap(), AuthMode::Basic);
        assert_eq!("OIDCAUTH".parse::<AuthMode>().unwrap(), AuthMode::Oidc);
        assert_eq!("full".parse::<AuthMode>().unwrap(), AuthMode::Full);
        assert_eq!("noauth".parse::<AuthMode>().unwrap(), AuthMode::None);
        assert!("kerberos".parse::<AuthMode>().is_err());
    }

    #[test]
    fn test_enforcement_follows_identity_provider() {
        assert_eq!(AuthMode::None.enforcement(), Enforcement::Disabled);
        assert_eq!(AuthMode::Basic.enforcement(), Enforcement::Disabled);
        assert_eq!(AuthMode::Oidc.enforcement(), Enforcement::Enforced);
        assert_eq!(AuthMode::Full.enforcement(), Enforcement::Enforced);
    }
}
