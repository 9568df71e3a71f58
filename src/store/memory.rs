//! In-process store for tests and local runs.
//!
//! A transaction takes the table lock for its whole lifetime and works on a staged
//! copy. Commit publishes the copy; dropping the transaction discards it. Transactions
//! are therefore serialized.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{InsertOutcome, Store, Transaction};
use crate::model::{RefreshToken, User, VerificationKind, VerificationRecord};
use crate::{Error, Result};

#[derive(Clone, Debug, Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    refresh_tokens: HashMap<Uuid, RefreshToken>,
    verifications: HashMap<VerificationKind, HashMap<Uuid, VerificationRecord>>,
}

impl Tables {
    fn verifications_mut(
        &mut self,
        kind: VerificationKind,
    ) -> &mut HashMap<Uuid, VerificationRecord> {
        self.verifications.entry(kind).or_default()
    }
}

#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let guard = self.tables.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryTransaction { guard, staged }))
    }
}

pub struct MemoryTransaction {
    guard: OwnedMutexGuard<Tables>,
    staged: Tables,
}

fn sorted_by_created<T, F>(mut items: Vec<T>, created: F) -> Vec<T>
where
    F: Fn(&T) -> DateTime<Utc>,
{
    items.sort_by_key(|item| created(item));
    items
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn user_by_email(&mut self, email: &str) -> Result<Option<User>> {
        Ok(self
            .staged
            .users
            .values()
            .find(|user| user.email == email)
            .cloned())
    }

    async fn user_by_id(&mut self, user_id: Uuid) -> Result<Option<User>> {
        Ok(self.staged.users.get(&user_id).cloned())
    }

    async fn insert_user(&mut self, user: &User) -> Result<InsertOutcome> {
        if self.staged.users.values().any(|u| u.email == user.email) {
            return Ok(InsertOutcome::Conflict);
        }
        self.staged.users.insert(user.id, user.clone());
        Ok(InsertOutcome::Created)
    }

    async fn mark_email_verified(&mut self, user_id: Uuid, now: DateTime<Utc>) -> Result<u64> {
        match self.staged.users.get_mut(&user_id) {
            Some(user) if !user.email_verified => {
                user.email_verified = true;
                user.updated_at = now;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn update_password(
        &mut self,
        user_id: Uuid,
        password_hash: &str,
        password_salt: &str,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let Some(user) = self.staged.users.get_mut(&user_id) else {
            return Ok(0);
        };
        user.password_hash = password_hash.to_string();
        user.password_salt = password_salt.to_string();
        user.updated_at = now;
        Ok(1)
    }

    async fn insert_verification(
        &mut self,
        kind: VerificationKind,
        record: &VerificationRecord,
    ) -> Result<()> {
        if !self.staged.users.contains_key(&record.user_id) {
            return Err(Error::InvalidState(format!(
                "{} references unknown user",
                kind.table()
            )));
        }
        let table = self.staged.verifications_mut(kind);
        if table
            .values()
            .any(|existing| existing.hashed_token == record.hashed_token)
        {
            return Err(Error::InvalidState(format!(
                "duplicate hashed token in {}",
                kind.table()
            )));
        }
        table.insert(record.id, record.clone());
        Ok(())
    }

    async fn verification_by_hash(
        &mut self,
        kind: VerificationKind,
        hashed_token: &str,
    ) -> Result<Option<VerificationRecord>> {
        Ok(self
            .staged
            .verifications_mut(kind)
            .values()
            .find(|record| record.hashed_token == hashed_token)
            .cloned())
    }

    async fn verifications_for_user(
        &mut self,
        kind: VerificationKind,
        user_id: Uuid,
    ) -> Result<Vec<VerificationRecord>> {
        let records = self
            .staged
            .verifications_mut(kind)
            .values()
            .filter(|record| record.user_id == user_id)
            .cloned()
            .collect();
        Ok(sorted_by_created(records, |record| record.created_at))
    }

    async fn delete_verifications_for_user(
        &mut self,
        kind: VerificationKind,
        user_id: Uuid,
    ) -> Result<u64> {
        let table = self.staged.verifications_mut(kind);
        let before = table.len();
        table.retain(|_, record| record.user_id != user_id);
        Ok((before - table.len()) as u64)
    }

    async fn insert_refresh_token(&mut self, token: &RefreshToken) -> Result<()> {
        if !self.staged.users.contains_key(&token.user_id) {
            return Err(Error::InvalidState(
                "refresh token references unknown user".to_string(),
            ));
        }
        if self
            .staged
            .refresh_tokens
            .values()
            .any(|existing| existing.token == token.token)
        {
            return Err(Error::InvalidState("duplicate refresh token".to_string()));
        }
        self.staged.refresh_tokens.insert(token.id, token.clone());
        Ok(())
    }

    async fn refresh_token_for_user(
        &mut self,
        token: &str,
        user_id: Uuid,
    ) -> Result<Option<RefreshToken>> {
        Ok(self
            .staged
            .refresh_tokens
            .values()
            .find(|t| t.token == token && t.user_id == user_id)
            .cloned())
    }

    async fn valid_refresh_token(
        &mut self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshToken>> {
        Ok(self
            .staged
            .refresh_tokens
            .values()
            .find(|t| t.token == token && t.is_active(now))
            .cloned())
    }

    async fn refresh_tokens_for_user(&mut self, user_id: Uuid) -> Result<Vec<RefreshToken>> {
        let tokens = self
            .staged
            .refresh_tokens
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        Ok(sorted_by_created(tokens, |t| t.created_at))
    }

    async fn link_replaced_refresh_token(
        &mut self,
        old_id: Uuid,
        new_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        match self.staged.refresh_tokens.get_mut(&old_id) {
            Some(old) if old.revoked_at.is_none() => {
                old.revoked_at = Some(now);
                old.replaced_by = Some(new_id);
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn revoke_refresh_token(&mut self, token_id: Uuid, now: DateTime<Utc>) -> Result<u64> {
        match self.staged.refresh_tokens.get_mut(&token_id) {
            Some(token) if token.revoked_at.is_none() => {
                token.revoked_at = Some(now);
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn delete_stale_refresh_tokens(
        &mut self,
        user_id: Uuid,
        cutoff: DateTime<Utc>,
    ) -> Result<u64> {
        let before = self.staged.refresh_tokens.len();
        self.staged
            .refresh_tokens
            .retain(|_, t| !(t.user_id == user_id && t.expires_at < cutoff));
        Ok((before - self.staged.refresh_tokens.len()) as u64)
    }

    async fn delete_refresh_tokens_for_user(&mut self, user_id: Uuid) -> Result<u64> {
        let before = self.staged.refresh_tokens.len();
        self.staged.refresh_tokens.retain(|_, t| t.user_id != user_id);
        Ok((before - self.staged.refresh_tokens.len()) as u64)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let Self { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn user(email: &str) -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            username: String::new(),
            password_hash: "hash".to_string(),
            password_salt: "salt".to_string(),
            email_verified: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn committed_writes_are_visible() {
        let store = MemoryStore::new();
        let alice = user("alice@example.com");

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.insert_user(&alice).await.unwrap(), InsertOutcome::Created);
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.user_by_id(alice.id).await.unwrap(), Some(alice));
    }

    #[tokio::test]
    async fn dropped_transactions_roll_back() {
        let store = MemoryStore::new();
        let alice = user("alice@example.com");

        {
            let mut tx = store.begin().await.unwrap();
            tx.insert_user(&alice).await.unwrap();
        }

        let mut tx = store.begin().await.unwrap();
        assert!(tx.user_by_id(alice.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_email_conflicts() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert_user(&user("dup@example.com")).await.unwrap();
        assert_eq!(
            tx.insert_user(&user("dup@example.com")).await.unwrap(),
            InsertOutcome::Conflict
        );
    }

    #[tokio::test]
    async fn mark_email_verified_is_conditional() {
        let store = MemoryStore::new();
        let alice = user("alice@example.com");
        let mut tx = store.begin().await.unwrap();
        tx.insert_user(&alice).await.unwrap();

        assert_eq!(tx.mark_email_verified(alice.id, Utc::now()).await.unwrap(), 1);
        assert_eq!(tx.mark_email_verified(alice.id, Utc::now()).await.unwrap(), 0);
        assert_eq!(tx.mark_email_verified(Uuid::new_v4(), Utc::now()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn stale_purge_only_touches_old_tokens_of_that_user() {
        let store = MemoryStore::new();
        let alice = user("alice@example.com");
        let bob = user("bob@example.com");
        let now = Utc::now();
        let token = |owner: Uuid, value: &str, expires_at| RefreshToken {
            id: Uuid::new_v4(),
            token: value.to_string(),
            user_id: owner,
            created_at: now,
            expires_at,
            revoked_at: None,
            replaced_by: None,
        };

        let mut tx = store.begin().await.unwrap();
        tx.insert_user(&alice).await.unwrap();
        tx.insert_user(&bob).await.unwrap();
        tx.insert_refresh_token(&token(alice.id, "old", now - Duration::days(40)))
            .await
            .unwrap();
        tx.insert_refresh_token(&token(alice.id, "fresh", now + Duration::days(1)))
            .await
            .unwrap();
        tx.insert_refresh_token(&token(bob.id, "bob-old", now - Duration::days(40)))
            .await
            .unwrap();

        let deleted = tx
            .delete_stale_refresh_tokens(alice.id, now - Duration::days(30))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(tx.refresh_tokens_for_user(alice.id).await.unwrap().len(), 1);
        assert_eq!(tx.refresh_tokens_for_user(bob.id).await.unwrap().len(), 1);
    }
}
