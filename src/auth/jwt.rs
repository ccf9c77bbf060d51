use anyhow::Result;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AppConfig;

#[derive(Clone)]
pub struct JwtService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    expiry: Duration,
    attendant_audience: String,
    attendant_expiry: Duration,
}

impl JwtService {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            encoding: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            issuer: config.jwt_issuer.clone(),
            audience: config.jwt_audience.clone(),
            expiry: Duration::minutes(config.jwt_expiry_minutes),
            attendant_audience: config.attendant_token_audience.clone(),
            attendant_expiry: Duration::minutes(config.attendant_token_expiry_minutes),
        })
    }

    pub fn generate_token(&self, user_id: Uuid, email: &str, role: &str) -> Result<String> {
        let now = Utc::now();
        let exp = now + self.expiry;
        let claims = Claims {
            sub: user_id,
            email: email.to_owned(),
            role: role.to_owned(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now.timestamp() as usize,
            exp: exp.timestamp() as usize,
        };

        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::default();
        validation.set_audience(&[self.audience.clone()]);
        validation.set_issuer(&[self.issuer.clone()]);
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        Ok(data.claims)
    }

    /// Token for the PIN-based attendant portal. It carries a separate
    /// audience so it is never accepted where a user token is required.
    pub fn generate_attendant_token(&self, attendant_id: Uuid, name: &str) -> Result<String> {
        let now = Utc::now();
        let exp = now + self.attendant_expiry;
        let claims = AttendantClaims {
            sub: attendant_id,
            name: name.to_owned(),
            iss: self.issuer.clone(),
            aud: self.attendant_audience.clone(),
            iat: now.timestamp() as usize,
            exp: exp.timestamp() as usize,
        };

        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    pub fn verify_attendant_token(&self, token: &str) -> Result<AttendantClaims> {
        let mut validation = Validation::default();
        validation.set_audience(&[self.attendant_audience.clone()]);
        validation.set_issuer(&[self.issuer.clone()]);
        let data = decode::<AttendantClaims>(token, &self.decoding, &validation)?;
        Ok(data.claims)
    }

    pub fn expiry_seconds(&self) -> i64 {
        self.expiry.num_seconds()
    }

    pub fn attendant_expiry_seconds(&self) -> i64 {
        self.attendant_expiry.num_seconds()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub email: String,
    pub role: String,
    pub iss: String,
    pub aud: String,
    pub iat: usize,
    pub exp: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendantClaims {
    pub sub: Uuid,
    pub name: String,
    pub iss: String,
    pub aud: String,
    pub iat: usize,
    pub exp: usize,
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn service() -> JwtService {
        let config = AppConfig {
            database_url: "postgres://localhost/unused".into(),
            database_max_pool_size: 1,
            server_host: "127.0.0.1".into(),
            server_port: 0,
            jwt_secret: "unit-secret".into(),
            jwt_issuer: "unit-issuer".into(),
            jwt_audience: "unit-users".into(),
            jwt_expiry_minutes: 5,
            attendant_token_audience: "unit-attendants".into(),
            attendant_token_expiry_minutes: 5,
            refresh_token_expiry_days: 1,
            refresh_cookie_secure: false,
            refresh_cookie_domain: None,
            cors_allowed_origin: None,
            upload_dir: PathBuf::from("uploads"),
            max_upload_bytes: 1024,
        };
        JwtService::from_config(&config).expect("jwt service")
    }

    #[test]
    fn user_token_carries_role() {
        let jwt = service();
        let id = Uuid::new_v4();
        let token = jwt.generate_token(id, "ann@example.org", "ADMIN").unwrap();
        let claims = jwt.verify_token(&token).unwrap();
        assert_eq!(claims.sub, id);
        assert_eq!(claims.role, "ADMIN");
        assert_eq!(claims.email, "ann@example.org");
    }

    #[test]
    fn audiences_do_not_cross() {
        let jwt = service();
        let attendant_token = jwt
            .generate_attendant_token(Uuid::new_v4(), "Ann Lee")
            .unwrap();
        assert!(jwt.verify_token(&attendant_token).is_err());

        let user_token = jwt
            .generate_token(Uuid::new_v4(), "ann@example.org", "KEYMAN")
            .unwrap();
        assert!(jwt.verify_attendant_token(&user_token).is_err());
        assert!(jwt.verify_attendant_token(&attendant_token).is_ok());
    }
}
