/*!
Jetons bearer HS256 pour tester les routes protégées du hub en local.
*/

use anyhow::Result;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::Serialize;
use std::time::Duration;

#[derive(Serialize)]
struct DevClaims<'a> {
    sub: &'a str,
    iat: i64,
    exp: i64,
}

pub fn issue_token(secret: &str, sub: &str, ttl: Duration) -> Result<String> {
    let now = chrono::Utc::now().timestamp();
    let claims = DevClaims { sub, iat: now, exp: now + ttl.as_secs() as i64 };
    Ok(encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))?)
}
