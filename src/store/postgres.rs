//! PostgreSQL store backed by `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Postgres, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::{InsertOutcome, Store, Transaction};
use crate::model::{RefreshToken, User, VerificationKind, VerificationRecord};
use crate::Result;

const USER_COLUMNS: &str =
    "id, email, username, password_hash, password_salt, email_verified, created_at, updated_at";

const REFRESH_TOKEN_COLUMNS: &str =
    "id, token, user_id, created_at, expires_at, revoked_at, replaced_by";

const VERIFICATION_COLUMNS: &str = "id, user_id, hashed_token, created_at, expires_at";

fn db_span(operation: &'static str, statement: &str) -> tracing::Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

fn user_from_row(row: &PgRow) -> Result<User> {
    Ok(User {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        username: row.try_get("username")?,
        password_hash: row.try_get("password_hash")?,
        password_salt: row.try_get("password_salt")?,
        email_verified: row.try_get("email_verified")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn refresh_token_from_row(row: &PgRow) -> Result<RefreshToken> {
    Ok(RefreshToken {
        id: row.try_get("id")?,
        token: row.try_get("token")?,
        user_id: row.try_get("user_id")?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
        revoked_at: row.try_get("revoked_at")?,
        replaced_by: row.try_get("replaced_by")?,
    })
}

fn verification_from_row(row: &PgRow) -> Result<VerificationRecord> {
    Ok(VerificationRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        hashed_token: row.try_get("hashed_token")?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
    })
}

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransaction { tx }))
    }
}

pub struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn user_by_email(&mut self, email: &str) -> Result<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        let row = sqlx::query(&query)
            .bind(email)
            .fetch_optional(&mut *self.tx)
            .instrument(db_span("SELECT", &query))
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn user_by_id(&mut self, user_id: Uuid) -> Result<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(user_id)
            .fetch_optional(&mut *self.tx)
            .instrument(db_span("SELECT", &query))
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn insert_user(&mut self, user: &User) -> Result<InsertOutcome> {
        // ON CONFLICT keeps the transaction usable after a duplicate email.
        let query = r"
            INSERT INTO users
                (id, email, username, password_hash, password_salt, email_verified, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT ON CONSTRAINT users_email_key DO NOTHING
        ";
        let result = sqlx::query(query)
            .bind(user.id)
            .bind(&user.email)
            .bind(&user.username)
            .bind(&user.password_hash)
            .bind(&user.password_salt)
            .bind(user.email_verified)
            .bind(user.created_at)
            .bind(user.updated_at)
            .execute(&mut *self.tx)
            .instrument(db_span("INSERT", query))
            .await?;

        if result.rows_affected() == 0 {
            Ok(InsertOutcome::Conflict)
        } else {
            Ok(InsertOutcome::Created)
        }
    }

    async fn mark_email_verified(&mut self, user_id: Uuid, now: DateTime<Utc>) -> Result<u64> {
        let query = r"
            UPDATE users
            SET email_verified = TRUE, updated_at = $2
            WHERE id = $1 AND email_verified = FALSE
        ";
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(now)
            .execute(&mut *self.tx)
            .instrument(db_span("UPDATE", query))
            .await?;
        Ok(result.rows_affected())
    }

    async fn update_password(
        &mut self,
        user_id: Uuid,
        password_hash: &str,
        password_salt: &str,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let query = r"
            UPDATE users
            SET password_hash = $2, password_salt = $3, updated_at = $4
            WHERE id = $1
        ";
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(password_hash)
            .bind(password_salt)
            .bind(now)
            .execute(&mut *self.tx)
            .instrument(db_span("UPDATE", query))
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_verification(
        &mut self,
        kind: VerificationKind,
        record: &VerificationRecord,
    ) -> Result<()> {
        let query = format!(
            "INSERT INTO {} ({VERIFICATION_COLUMNS}) VALUES ($1, $2, $3, $4, $5)",
            kind.table()
        );
        sqlx::query(&query)
            .bind(record.id)
            .bind(record.user_id)
            .bind(&record.hashed_token)
            .bind(record.created_at)
            .bind(record.expires_at)
            .execute(&mut *self.tx)
            .instrument(db_span("INSERT", &query))
            .await?;
        Ok(())
    }

    async fn verification_by_hash(
        &mut self,
        kind: VerificationKind,
        hashed_token: &str,
    ) -> Result<Option<VerificationRecord>> {
        let query = format!(
            "SELECT {VERIFICATION_COLUMNS} FROM {} WHERE hashed_token = $1",
            kind.table()
        );
        let row = sqlx::query(&query)
            .bind(hashed_token)
            .fetch_optional(&mut *self.tx)
            .instrument(db_span("SELECT", &query))
            .await?;
        row.as_ref().map(verification_from_row).transpose()
    }

    async fn verifications_for_user(
        &mut self,
        kind: VerificationKind,
        user_id: Uuid,
    ) -> Result<Vec<VerificationRecord>> {
        let query = format!(
            "SELECT {VERIFICATION_COLUMNS} FROM {} WHERE user_id = $1 ORDER BY created_at",
            kind.table()
        );
        let rows = sqlx::query(&query)
            .bind(user_id)
            .fetch_all(&mut *self.tx)
            .instrument(db_span("SELECT", &query))
            .await?;
        rows.iter().map(verification_from_row).collect()
    }

    async fn delete_verifications_for_user(
        &mut self,
        kind: VerificationKind,
        user_id: Uuid,
    ) -> Result<u64> {
        let query = format!("DELETE FROM {} WHERE user_id = $1", kind.table());
        let result = sqlx::query(&query)
            .bind(user_id)
            .execute(&mut *self.tx)
            .instrument(db_span("DELETE", &query))
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_refresh_token(&mut self, token: &RefreshToken) -> Result<()> {
        let query = format!(
            "INSERT INTO refresh_tokens ({REFRESH_TOKEN_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7)"
        );
        sqlx::query(&query)
            .bind(token.id)
            .bind(&token.token)
            .bind(token.user_id)
            .bind(token.created_at)
            .bind(token.expires_at)
            .bind(token.revoked_at)
            .bind(token.replaced_by)
            .execute(&mut *self.tx)
            .instrument(db_span("INSERT", &query))
            .await?;
        Ok(())
    }

    async fn refresh_token_for_user(
        &mut self,
        token: &str,
        user_id: Uuid,
    ) -> Result<Option<RefreshToken>> {
        let query = format!(
            "SELECT {REFRESH_TOKEN_COLUMNS} FROM refresh_tokens WHERE token = $1 AND user_id = $2"
        );
        let row = sqlx::query(&query)
            .bind(token)
            .bind(user_id)
            .fetch_optional(&mut *self.tx)
            .instrument(db_span("SELECT", &query))
            .await?;
        row.as_ref().map(refresh_token_from_row).transpose()
    }

    async fn valid_refresh_token(
        &mut self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshToken>> {
        let query = format!(
            "SELECT {REFRESH_TOKEN_COLUMNS} FROM refresh_tokens \
             WHERE token = $1 AND expires_at > $2 AND revoked_at IS NULL"
        );
        let row = sqlx::query(&query)
            .bind(token)
            .bind(now)
            .fetch_optional(&mut *self.tx)
            .instrument(db_span("SELECT", &query))
            .await?;
        row.as_ref().map(refresh_token_from_row).transpose()
    }

    async fn refresh_tokens_for_user(&mut self, user_id: Uuid) -> Result<Vec<RefreshToken>> {
        let query = format!(
            "SELECT {REFRESH_TOKEN_COLUMNS} FROM refresh_tokens WHERE user_id = $1 ORDER BY created_at"
        );
        let rows = sqlx::query(&query)
            .bind(user_id)
            .fetch_all(&mut *self.tx)
            .instrument(db_span("SELECT", &query))
            .await?;
        rows.iter().map(refresh_token_from_row).collect()
    }

    async fn link_replaced_refresh_token(
        &mut self,
        old_id: Uuid,
        new_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let query = r"
            UPDATE refresh_tokens
            SET revoked_at = $3, replaced_by = $2
            WHERE id = $1 AND revoked_at IS NULL
        ";
        let result = sqlx::query(query)
            .bind(old_id)
            .bind(new_id)
            .bind(now)
            .execute(&mut *self.tx)
            .instrument(db_span("UPDATE", query))
            .await?;
        Ok(result.rows_affected())
    }

    async fn revoke_refresh_token(&mut self, token_id: Uuid, now: DateTime<Utc>) -> Result<u64> {
        let query = r"
            UPDATE refresh_tokens
            SET revoked_at = $2
            WHERE id = $1 AND revoked_at IS NULL
        ";
        let result = sqlx::query(query)
            .bind(token_id)
            .bind(now)
            .execute(&mut *self.tx)
            .instrument(db_span("UPDATE", query))
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_stale_refresh_tokens(
        &mut self,
        user_id: Uuid,
        cutoff: DateTime<Utc>,
    ) -> Result<u64> {
        let query = "DELETE FROM refresh_tokens WHERE user_id = $1 AND expires_at < $2";
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(cutoff)
            .execute(&mut *self.tx)
            .instrument(db_span("DELETE", query))
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_refresh_tokens_for_user(&mut self, user_id: Uuid) -> Result<u64> {
        let query = "DELETE FROM refresh_tokens WHERE user_id = $1";
        let result = sqlx::query(query)
            .bind(user_id)
            .execute(&mut *self.tx)
            .instrument(db_span("DELETE", query))
            .await?;
        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
