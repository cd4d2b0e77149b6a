//! Bearer-token authentication and per-method authorization.
//!
//! A tonic interceptor validates the JWT against a configured public key and
//! places the verified principal on the request extensions; handlers then
//! check the method's required scope against the static table below.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use thiserror::Error;
use tonic::metadata::MetadataMap;
use tonic::service::Interceptor;
use tonic::{Request, Status};

/// Scope required to read ISAs.
pub const READ_ISA_SCOPE: &str = "dss.read.identification_service_areas";

/// Scope required to write ISAs.
pub const WRITE_ISA_SCOPE: &str = "dss.write.identification_service_areas";

/// Method name → required scope.
///
/// Subscriptions are a read-side primitive (they observe ISAs), so every
/// subscription method requires the read scope only.
const METHOD_SCOPES: &[(&str, &str)] = &[
    ("GetIdentificationServiceArea", READ_ISA_SCOPE),
    ("SearchIdentificationServiceAreas", READ_ISA_SCOPE),
    ("PutIdentificationServiceArea", WRITE_ISA_SCOPE),
    ("PatchIdentificationServiceArea", WRITE_ISA_SCOPE),
    ("DeleteIdentificationServiceArea", WRITE_ISA_SCOPE),
    ("GetSubscription", READ_ISA_SCOPE),
    ("PutSubscription", READ_ISA_SCOPE),
    ("PatchSubscription", READ_ISA_SCOPE),
    ("DeleteSubscription", READ_ISA_SCOPE),
    ("SearchSubscriptions", READ_ISA_SCOPE),
];

/// Look up the scope a method requires.
pub fn required_scope(method: &str) -> Option<&'static str> {
    METHOD_SCOPES
        .iter()
        .find(|(m, _)| *m == method)
        .map(|(_, scope)| *scope)
}

/// Errors while loading the verification key.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("failed to read public key file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse public key: {0}")]
    Key(#[from] jsonwebtoken::errors::Error),
}

/// Verified principal attached to a request by the interceptor.
#[derive(Debug, Clone)]
pub struct Claims {
    pub owner: String,
    pub scopes: Vec<String>,
}

impl Claims {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

/// Raw JWT claims: `sub` becomes the owner, `scope` is the OAuth
/// space-separated scope list.
#[derive(Debug, Deserialize)]
struct TokenClaims {
    sub: String,
    #[serde(default)]
    scope: String,
}

/// Interceptor that validates bearer tokens and records the caller.
#[derive(Clone)]
pub struct AuthInterceptor {
    key: DecodingKey,
    validation: Validation,
}

impl AuthInterceptor {
    /// Build an interceptor verifying RS256 signatures against the PEM
    /// public key at `path`.
    pub fn from_public_key_file(path: &str) -> Result<Self, AuthError> {
        let pem = std::fs::read(path)?;
        let key = DecodingKey::from_rsa_pem(&pem)?;
        Ok(Self {
            key,
            validation: Validation::new(Algorithm::RS256),
        })
    }
}

impl Interceptor for AuthInterceptor {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        let token = bearer_token(request.metadata())
            .ok_or_else(|| Status::unauthenticated("missing token"))?;

        let data = decode::<TokenClaims>(&token, &self.key, &self.validation)
            .map_err(|_| Status::unauthenticated("invalid token"))?;

        let scopes = data
            .claims
            .scope
            .split_whitespace()
            .map(String::from)
            .collect();

        request.extensions_mut().insert(Claims {
            owner: data.claims.sub,
            scopes,
        });
        Ok(request)
    }
}

fn bearer_token(metadata: &MetadataMap) -> Option<String> {
    let header = metadata.get("authorization")?.to_str().ok()?;
    let token = header.strip_prefix("Bearer ").unwrap_or(header);
    Some(token.to_string())
}

/// Authorize `method` on `request` and return the caller's identity.
///
/// `Unauthenticated` when no verified claims are attached,
/// `PermissionDenied` when the claims lack the method's scope.
pub fn authorize<T>(request: &Request<T>, method: &str) -> Result<String, Status> {
    let claims = request
        .extensions()
        .get::<Claims>()
        .ok_or_else(|| Status::unauthenticated("missing owner from context"))?;

    let scope = required_scope(method)
        .ok_or_else(|| Status::permission_denied(format!("unknown method {method}")))?;

    if !claims.has_scope(scope) {
        return Err(Status::permission_denied(format!(
            "missing required scope {scope}"
        )));
    }

    Ok(claims.owner.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::metadata::MetadataValue;

    fn request_with_claims(owner: &str, scopes: &[&str]) -> Request<()> {
        let mut request = Request::new(());
        request.extensions_mut().insert(Claims {
            owner: owner.to_string(),
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
        });
        request
    }

    #[test]
    fn test_every_method_has_a_scope() {
        for method in [
            "GetIdentificationServiceArea",
            "PutIdentificationServiceArea",
            "PatchIdentificationServiceArea",
            "DeleteIdentificationServiceArea",
            "SearchIdentificationServiceAreas",
            "GetSubscription",
            "PutSubscription",
            "PatchSubscription",
            "DeleteSubscription",
            "SearchSubscriptions",
        ] {
            assert!(required_scope(method).is_some(), "no scope for {method}");
        }
    }

    #[test]
    fn test_isa_writes_need_write_scope() {
        for method in [
            "PutIdentificationServiceArea",
            "PatchIdentificationServiceArea",
            "DeleteIdentificationServiceArea",
        ] {
            assert_eq!(required_scope(method), Some(WRITE_ISA_SCOPE));
        }
    }

    #[test]
    fn test_subscription_methods_need_read_scope() {
        for method in [
            "GetSubscription",
            "PutSubscription",
            "PatchSubscription",
            "DeleteSubscription",
            "SearchSubscriptions",
        ] {
            assert_eq!(required_scope(method), Some(READ_ISA_SCOPE));
        }
    }

    #[test]
    fn test_authorize_returns_owner() {
        let request = request_with_claims("uss-one", &[WRITE_ISA_SCOPE]);
        let owner = authorize(&request, "PutIdentificationServiceArea").unwrap();
        assert_eq!(owner, "uss-one");
    }

    #[test]
    fn test_authorize_without_claims_is_unauthenticated() {
        let request = Request::new(());
        let status = authorize(&request, "GetSubscription").unwrap_err();
        assert_eq!(status.code(), tonic::Code::Unauthenticated);
    }

    #[test]
    fn test_authorize_without_scope_is_denied() {
        let request = request_with_claims("uss-one", &[READ_ISA_SCOPE]);
        let status = authorize(&request, "PutIdentificationServiceArea").unwrap_err();
        assert_eq!(status.code(), tonic::Code::PermissionDenied);
    }

    #[test]
    fn test_bearer_token_strips_prefix() {
        let mut metadata = MetadataMap::new();
        metadata.insert(
            "authorization",
            MetadataValue::try_from("Bearer abc.def.ghi").unwrap(),
        );
        assert_eq!(bearer_token(&metadata).as_deref(), Some("abc.def.ghi"));
    }

    #[test]
    fn test_bearer_token_missing_header() {
        assert!(bearer_token(&MetadataMap::new()).is_none());
    }
}
