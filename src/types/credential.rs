#![allow(dead_code)]
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Encrypted exchange API credentials. `private_key_encrypted` holds the
/// AEAD ciphertext, base64-encoded — never the plaintext key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub id: i64,
    pub name: String,
    pub exchange_host: String,
    pub api_key_index: i64,
    pub private_key_encrypted: String,
    pub account_index: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Default for Credential {
    fn default() -> Self {
        Self {
            id: 0,
            name: "default".to_string(),
            exchange_host: "https://mainnet.zklighter.elliot.ai".to_string(),
            api_key_index: 3,
            private_key_encrypted: String::new(),
            account_index: 0,
            is_active: true,
            created_at: Utc::now(),
        }
    }
}
