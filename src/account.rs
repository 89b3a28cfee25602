//! Account records and quota arithmetic.
//!
//! `used_bytes` counts the plaintext size of every file row that has not
//! been permanently deleted — trashed files stay billable.  The store
//! facade is the only writer, and it moves the counter in the same
//! mutation as the row commit or delete.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Admin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub name: String,
    pub role: Role,
    pub quota_bytes: u64,
    pub used_bytes: u64,
    /// Per-account cipher key — the full 16 raw bytes handed to the block
    /// cipher, never a printable encoding of them.  Generated once, never
    /// rotated (frames on disk are keyed by it).
    pub cipher_key: [u8; 16],
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn new(name: &str, quota_bytes: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_owned(),
            role: Role::User,
            quota_bytes,
            used_bytes: 0,
            cipher_key: Uuid::new_v4().into_bytes(),
            created_at: Utc::now(),
        }
    }

    pub fn available_bytes(&self) -> u64 {
        self.quota_bytes.saturating_sub(self.used_bytes)
    }

    /// Reserve `bytes` against the quota, or fail without changing state.
    pub fn charge(&mut self, bytes: u64) -> StoreResult<()> {
        if bytes > self.available_bytes() {
            return Err(StoreError::QuotaExceeded {
                needed: bytes,
                available: self.available_bytes(),
            });
        }
        self.used_bytes += bytes;
        Ok(())
    }

    /// Return `bytes` to the quota (permanent delete, rollback).
    pub fn release(&mut self, bytes: u64) {
        self.used_bytes = self.used_bytes.saturating_sub(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charge_and_release() {
        let mut a = Account::new("alice", 100);
        a.charge(60).unwrap();
        assert_eq!(a.available_bytes(), 40);
        assert!(matches!(a.charge(41), Err(StoreError::QuotaExceeded { .. })));
        assert_eq!(a.used_bytes, 60); // failed charge left no trace
        a.release(60);
        assert_eq!(a.used_bytes, 0);
        a.release(1); // over-release saturates instead of wrapping
        assert_eq!(a.used_bytes, 0);
    }

    #[test]
    fn fresh_accounts_have_distinct_keys() {
        let a = Account::new("a", 1);
        let b = Account::new("b", 1);
        assert_ne!(a.cipher_key, b.cipher_key);
        // The key is raw material, exactly one cipher block wide — no
        // normalisation padding or truncation ever applies to it.
        assert_eq!(a.cipher_key.len(), crate::codec::aes::BLOCK_SIZE);
    }
}
