//! Bearer token minting for calls against the NMS.
//!
//! The NMS expects an HS256 JWT carrying a small claims set (roles and
//! access permissions, not just a subject), mirroring the shape the real
//! NMS's own auth helper builds before every northbound/southbound call.
//! This mints, it never verifies — verification-side JWT handling (decode +
//! `DecodingKey`) is the pattern `dashboard::middleware_auth` uses for the
//! operator-facing API; here we're the caller, not the verifier, so we use
//! `jsonwebtoken::encode` instead.

use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NmsClaims {
    pub fullname: String,
    pub username: String,
    pub services: Vec<String>,
    pub roles: Vec<String>,
    pub access_permissions: Vec<String>,
    #[serde(default)]
    pub geolocation_restriction: Vec<String>,
    pub exp: i64,
}

impl NmsClaims {
    /// Claims used for admin-role calls: network/hub/AP creation.
    pub fn admin(username: &str, expiry_seconds: i64) -> Self {
        NmsClaims {
            fullname: username.to_string(),
            username: username.to_string(),
            services: vec!["nms".to_string()],
            roles: vec!["Read".into(), "Write".into(), "Admin".into()],
            access_permissions: vec![
                "network".into(),
                "hub".into(),
                "ap".into(),
                "rt".into(),
                "candidate".into(),
                "secret".into(),
                "heartbeat".into(),
            ],
            geolocation_restriction: vec![],
            exp: Utc::now().timestamp() + expiry_seconds,
        }
    }

    /// Claims used for RT-scoped calls: periodic heartbeat only.
    pub fn rt_scoped(auid: &str, expiry_seconds: i64) -> Self {
        NmsClaims {
            fullname: auid.to_string(),
            username: auid.to_string(),
            services: vec!["rt".to_string()],
            roles: vec!["Read".into(), "Write".into()],
            access_permissions: vec!["heartbeat".into()],
            geolocation_restriction: vec![],
            exp: Utc::now().timestamp() + expiry_seconds,
        }
    }
}

fn algorithm_from_name(name: &str) -> Algorithm {
    match name {
        "HS384" => Algorithm::HS384,
        "HS512" => Algorithm::HS512,
        _ => Algorithm::HS256,
    }
}

/// Mints a `Bearer <jwt>` header value for the admin identity.
pub fn admin_bearer(secret: &str, algorithm: &str, expiry_seconds: i64) -> anyhow::Result<String> {
    mint(&NmsClaims::admin("hubsim-controller", expiry_seconds), secret, algorithm)
}

/// Mints a `Bearer <jwt>` header value scoped to a single RT's heartbeat calls.
pub fn rt_bearer(
    auid: &str,
    secret: &str,
    algorithm: &str,
    expiry_seconds: i64,
) -> anyhow::Result<String> {
    mint(&NmsClaims::rt_scoped(auid, expiry_seconds), secret, algorithm)
}

fn mint(claims: &NmsClaims, secret: &str, algorithm: &str) -> anyhow::Result<String> {
    let alg = algorithm_from_name(algorithm);
    let header = Header::new(alg);
    let key = EncodingKey::from_secret(secret.as_bytes());
    let token = encode(&header, claims, &key)?;
    Ok(format!("Bearer {token}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_bearer_has_expected_shape() {
        let header = admin_bearer("s3cret", "HS256", 3600).unwrap();
        assert!(header.starts_with("Bearer "));
        assert_eq!(header.matches('.').count(), 2);
    }

    #[test]
    fn rt_bearer_claims_are_scoped_to_heartbeat() {
        let claims = NmsClaims::rt_scoped("T-rt-1", 60);
        assert_eq!(claims.access_permissions, vec!["heartbeat".to_string()]);
        assert!(claims.exp > Utc::now().timestamp());
    }

    #[test]
    fn unknown_algorithm_name_falls_back_to_hs256() {
        assert_eq!(algorithm_from_name("nonsense"), Algorithm::HS256);
    }
}
