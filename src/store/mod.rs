//! File-backed resource access.
//!
//! The core never reads wordlist or hash-list bytes; it tracks metadata and
//! an opaque `storage_ref` pointing into the storage collaborator. The
//! `ResourceAccess` trait is the one seam shared by every file-backed
//! resource kind, implemented once per concrete kind.

use crate::database::models::{CrackedHash, HashList, Wordlist};
use crate::database::DbPool;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait ResourceAccess: Send + Sync {
    type Item;

    async fn list(&self, project_id: &str) -> Result<Vec<Self::Item>>;
    async fn get_by_id(&self, id: &str) -> Result<Option<Self::Item>>;
    async fn create(&self, item: &Self::Item) -> Result<()>;
    /// Record where the storage layer put the file's bytes.
    async fn upload_file(&self, id: &str, storage_ref: &str) -> Result<()>;
}

#[derive(Clone)]
pub struct HashListRepository {
    pool: DbPool,
}

impl HashListRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Append cracked (hash, plaintext) pairs, stamped with crack time.
    /// `INSERT OR IGNORE` against the (hash_list_id, hash_value) unique key
    /// makes at-least-once report redelivery safe; the returned count is
    /// rows actually inserted.
    pub async fn insert_cracked(
        &self,
        hash_list_id: &str,
        cracked: &[CrackedHash],
        cracked_at: DateTime<Utc>,
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;

        for item in cracked {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO hash_list_items (hash_list_id, hash_value, plaintext, cracked_at)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(hash_list_id)
            .bind(&item.hash_value)
            .bind(&item.plaintext)
            .bind(cracked_at)
            .execute(&mut *tx)
            .await?;

            inserted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }

    /// Register uncracked hash values parsed out of an uploaded file.
    /// Duplicates within the file or across re-parses hit the unique key
    /// and are ignored; the returned count is rows actually inserted.
    pub async fn register_hashes(&self, hash_list_id: &str, hashes: &[String]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;

        for hash_value in hashes {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO hash_list_items (hash_list_id, hash_value)
                VALUES (?, ?)
                "#,
            )
            .bind(hash_list_id)
            .bind(hash_value)
            .execute(&mut *tx)
            .await?;

            inserted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }

    pub async fn item_count(&self, hash_list_id: &str) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as(r#"SELECT COUNT(*) FROM hash_list_items WHERE hash_list_id = ?"#)
                .bind(hash_list_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    pub async fn cracked_count(&self, hash_list_id: &str) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            r#"SELECT COUNT(*) FROM hash_list_items WHERE hash_list_id = ? AND plaintext IS NOT NULL"#,
        )
        .bind(hash_list_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}

#[async_trait]
impl ResourceAccess for HashListRepository {
    type Item = HashList;

    async fn list(&self, project_id: &str) -> Result<Vec<HashList>> {
        let items = sqlx::query_as::<_, HashList>(
            r#"SELECT * FROM hash_lists WHERE project_id = ? ORDER BY name ASC"#,
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(items)
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<HashList>> {
        let item = sqlx::query_as::<_, HashList>(r#"SELECT * FROM hash_lists WHERE id = ?"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(item)
    }

    async fn create(&self, item: &HashList) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO hash_lists (id, project_id, name, storage_ref) VALUES (?, ?, ?, ?)"#,
        )
        .bind(&item.id)
        .bind(&item.project_id)
        .bind(&item.name)
        .bind(&item.storage_ref)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn upload_file(&self, id: &str, storage_ref: &str) -> Result<()> {
        sqlx::query(r#"UPDATE hash_lists SET storage_ref = ? WHERE id = ?"#)
            .bind(storage_ref)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[derive(Clone)]
pub struct WordlistRepository {
    pool: DbPool,
}

impl WordlistRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResourceAccess for WordlistRepository {
    type Item = Wordlist;

    async fn list(&self, project_id: &str) -> Result<Vec<Wordlist>> {
        let items = sqlx::query_as::<_, Wordlist>(
            r#"SELECT * FROM wordlists WHERE project_id = ? ORDER BY name ASC"#,
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(items)
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Wordlist>> {
        let item = sqlx::query_as::<_, Wordlist>(r#"SELECT * FROM wordlists WHERE id = ?"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(item)
    }

    async fn create(&self, item: &Wordlist) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO wordlists (id, project_id, name, storage_ref) VALUES (?, ?, ?, ?)"#,
        )
        .bind(&item.id)
        .bind(&item.project_id)
        .bind(&item.name)
        .bind(&item.storage_ref)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn upload_file(&self, id: &str, storage_ref: &str) -> Result<()> {
        sqlx::query(r#"UPDATE wordlists SET storage_ref = ? WHERE id = ?"#)
            .bind(storage_ref)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
