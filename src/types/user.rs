#![allow(dead_code)]
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Operator account for the admin CLI / API. `totp_secret` backs a second
/// factor on top of the hashed password.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub hashed_password: String,
    pub totp_secret: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}
