//! Credential resolution: the controller never reads environment
//! variables itself; a caller-supplied [`CredentialProvider`] is the
//! sanctioned seam for that fallback.

use evolve_core::AgentType;
use evolve_error::{EvolveError, Result};

/// A resolved credential to pass down to the `AgentDriver`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// An OAuth token, valid only for agent families where
    /// [`AgentType::supports_oauth`] is `true`.
    OAuth(String),
    /// A bring-your-own-key provider credential.
    ProviderKey(String),
    /// An Evolve-issued gateway key, routing LLM calls through a
    /// first-party proxy for accounting.
    GatewayKey(String),
}

/// Credentials the caller supplied explicitly (highest priority).
#[derive(Debug, Clone, Default)]
pub struct ExplicitCredentials {
    /// Explicit OAuth token.
    pub oauth_token: Option<String>,
    /// Explicit provider (BYOK) key.
    pub provider_key: Option<String>,
    /// Explicit gateway key.
    pub gateway_key: Option<String>,
}

/// Supplies the environment-variable fallback tier. A caller that wants no
/// env-var fallback at all passes [`NoCredentials`].
pub trait CredentialProvider: Send + Sync {
    /// `EVOLVE_API_KEY`-equivalent gateway credential, if set.
    fn env_gateway_key(&self) -> Option<String> {
        None
    }
    /// Provider-specific API key env var, if set.
    fn env_provider_key(&self) -> Option<String> {
        None
    }
    /// OAuth token env var, if set.
    fn env_oauth_token(&self) -> Option<String> {
        None
    }
}

/// A [`CredentialProvider`] that never supplies a fallback.
pub struct NoCredentials;

impl CredentialProvider for NoCredentials {}

/// Resolve the credential to use for `agent_type`, applying the fixed
/// priority: explicit OAuth > explicit provider key > explicit gateway key
/// > env-var gateway key > env-var provider key > env-var OAuth.
///
/// An OAuth token resolved for a family that doesn't support OAuth is a
/// client-side validation error, regardless of which tier it came from.
pub fn resolve_credential(
    explicit: &ExplicitCredentials,
    env: &dyn CredentialProvider,
    agent_type: AgentType,
) -> Result<Option<Credential>> {
    let candidate = explicit
        .oauth_token
        .clone()
        .map(Credential::OAuth)
        .or_else(|| explicit.provider_key.clone().map(Credential::ProviderKey))
        .or_else(|| explicit.gateway_key.clone().map(Credential::GatewayKey))
        .or_else(|| env.env_gateway_key().map(Credential::GatewayKey))
        .or_else(|| env.env_provider_key().map(Credential::ProviderKey))
        .or_else(|| env.env_oauth_token().map(Credential::OAuth));

    if matches!(candidate, Some(Credential::OAuth(_))) && !agent_type.supports_oauth() {
        return Err(EvolveError::Internal(format!(
            "agent family does not support OAuth: {agent_type:?}"
        )));
    }

    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EnvStub {
        gateway: Option<&'static str>,
        provider: Option<&'static str>,
        oauth: Option<&'static str>,
    }

    impl CredentialProvider for EnvStub {
        fn env_gateway_key(&self) -> Option<String> {
            self.gateway.map(str::to_string)
        }
        fn env_provider_key(&self) -> Option<String> {
            self.provider.map(str::to_string)
        }
        fn env_oauth_token(&self) -> Option<String> {
            self.oauth.map(str::to_string)
        }
    }

    #[test]
    fn explicit_oauth_outranks_everything() {
        let explicit = ExplicitCredentials {
            oauth_token: Some("tok".into()),
            provider_key: Some("pk".into()),
            gateway_key: Some("gk".into()),
        };
        let resolved = resolve_credential(&explicit, &NoCredentials, AgentType::Claude).unwrap();
        assert_eq!(resolved, Some(Credential::OAuth("tok".into())));
    }

    #[test]
    fn env_gateway_key_outranks_env_provider_and_oauth() {
        let env = EnvStub { gateway: Some("gk"), provider: Some("pk"), oauth: Some("tok") };
        let resolved = resolve_credential(&ExplicitCredentials::default(), &env, AgentType::Claude).unwrap();
        assert_eq!(resolved, Some(Credential::GatewayKey("gk".into())));
    }

    #[test]
    fn explicit_gateway_outranks_env_tiers() {
        let explicit = ExplicitCredentials { gateway_key: Some("explicit-gk".into()), ..Default::default() };
        let env = EnvStub { gateway: Some("env-gk"), provider: None, oauth: None };
        let resolved = resolve_credential(&explicit, &env, AgentType::Claude).unwrap();
        assert_eq!(resolved, Some(Credential::GatewayKey("explicit-gk".into())));
    }

    #[test]
    fn oauth_for_unsupported_family_is_rejected() {
        let explicit = ExplicitCredentials { oauth_token: Some("tok".into()), ..Default::default() };
        let err = resolve_credential(&explicit, &NoCredentials, AgentType::Gemini).unwrap_err();
        assert_eq!(err.kind(), evolve_error::ErrorKind::InternalError);
    }

    #[test]
    fn no_credential_present_resolves_to_none() {
        let resolved = resolve_credential(&ExplicitCredentials::default(), &NoCredentials, AgentType::Claude).unwrap();
        assert_eq!(resolved, None);
    }
}
