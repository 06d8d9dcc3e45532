use async_trait::async_trait;
use chrono::Utc;
use lazy_static::lazy_static;
use regex::Regex;
use sqlx::Row;

use super::Database;
use crate::error::StorageError;

lazy_static! {
    static ref BLOB_KEY: Regex =
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,127}$").expect("blob key pattern is valid");
}

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Key/value cache for pre-rendered assets such as the survey's QR image.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Blob>, StorageError>;
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<(), StorageError>;
}

pub fn is_valid_key(key: &str) -> bool {
    BLOB_KEY.is_match(key)
}

#[async_trait]
impl BlobStore for Database {
    async fn get(&self, key: &str) -> Result<Option<Blob>, StorageError> {
        if !is_valid_key(key) {
            return Err(StorageError::InvalidKey(key.to_string()));
        }

        let row = sqlx::query("SELECT content_type, bytes FROM blobs WHERE key = ?")
            .bind(key)
            .fetch_optional(self.pool())
            .await?;

        Ok(row.map(|row| Blob {
            content_type: row.get::<String, _>("content_type"),
            bytes: row.get::<Vec<u8>, _>("bytes"),
        }))
    }

    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<(), StorageError> {
        if !is_valid_key(key) {
            return Err(StorageError::InvalidKey(key.to_string()));
        }

        sqlx::query(
            r#"
            INSERT INTO blobs (key, content_type, bytes, stored_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(key)
            DO UPDATE SET content_type = excluded.content_type,
                          bytes = excluded.bytes,
                          stored_at = excluded.stored_at
            "#,
        )
        .bind(key)
        .bind(content_type)
        .bind(bytes)
        .bind(Utc::now().to_rfc3339())
        .execute(self.pool())
        .await?;

        Ok(())
    }
}
