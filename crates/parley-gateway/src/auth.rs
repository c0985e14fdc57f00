use jsonwebtoken::{DecodingKey, Validation, decode};
use tracing::debug;

use parley_types::api::Claims;
use parley_types::models::Identity;

use crate::error::ChatError;

/// Verifies a platform-issued HS256 token and returns the identity it carries.
pub fn decode_identity(token: &str, jwt_secret: &str) -> Result<Identity, ChatError> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| {
        debug!("Rejected token: {}", e);
        ChatError::AuthFailure
    })?;

    Ok(token_data.claims.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use parley_types::models::Role;
    use uuid::Uuid;

    fn token(secret: &str, exp: i64) -> (Claims, String) {
        let claims = Claims {
            sub: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            role: Role::TeamLead,
            username: "dana".into(),
            exp: exp as usize,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap();
        (claims, token)
    }

    #[test]
    fn valid_token_yields_identity() {
        let exp = (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp();
        let (claims, signed) = token("s3cret", exp);
        let identity = decode_identity(&signed, "s3cret").unwrap();
        assert_eq!(identity.user_id, claims.sub);
        assert_eq!(identity.tenant_id, claims.tenant_id);
        assert_eq!(identity.role, Role::TeamLead);
    }

    #[test]
    fn wrong_secret_or_expired_token_is_rejected() {
        let exp = (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp();
        let (_, valid) = token("s3cret", exp);
        assert!(matches!(decode_identity(&valid, "other"), Err(ChatError::AuthFailure)));

        let expired = (chrono::Utc::now() - chrono::Duration::hours(1)).timestamp();
        let (_, stale) = token("s3cret", expired);
        assert!(matches!(decode_identity(&stale, "s3cret"), Err(ChatError::AuthFailure)));
    }
}
