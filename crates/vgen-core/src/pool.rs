//! AccountPool: eligibility filtering, leasing, and selection policy.
//!
//! Selection is LRU over `last_used` with a uniform pick among the three
//! oldest candidates, which diffuses races between concurrent generators.
//! The lease set lives behind one mutex; select-and-mark is a single
//! critical section so two workers can never lease the same account.

use anyhow::Result;
use rand::Rng;
use std::collections::HashSet;
use std::sync::Mutex;
use uuid::Uuid;

use crate::remote::VideoApi;
use crate::store::{Account, AccountId, AccountStatus, JobStore};

/// How many of the least-recently-used candidates the random pick spans.
const SELECTION_POOL: usize = 3;

pub struct AccountPool {
    store: JobStore,
    platform: String,
    leased: Mutex<HashSet<AccountId>>,
}

impl AccountPool {
    pub fn new(store: JobStore, platform: impl Into<String>) -> Self {
        Self {
            store,
            platform: platform.into(),
            leased: Mutex::new(HashSet::new()),
        }
    }

    /// Lease an eligible account (live, credits > 0, not excluded, not
    /// already leased), or None when the pool is exhausted. The returned
    /// account has `last_used` bumped so LRU ordering rotates.
    pub async fn acquire(&self, exclude_ids: &[AccountId]) -> Result<Option<Account>> {
        let candidates = self
            .store
            .list_eligible_accounts(&self.platform, exclude_ids)
            .await?;

        let picked = {
            let mut leased = self.leased.lock().unwrap();
            let free: Vec<&Account> = candidates
                .iter()
                .filter(|acc| !leased.contains(&acc.id))
                .collect();
            if free.is_empty() {
                None
            } else {
                let pool = &free[..free.len().min(SELECTION_POOL)];
                let idx = rand::thread_rng().gen_range(0..pool.len());
                let chosen = pool[idx].clone();
                leased.insert(chosen.id);
                Some(chosen)
            }
        };

        let Some(account) = picked else {
            return Ok(None);
        };

        self.store.touch_last_used(account.id).await?;
        tracing::debug!(
            account_id = account.id,
            email = %account.email,
            "account leased"
        );
        Ok(Some(account))
    }

    /// Clear the lease bit. Safe to call twice.
    pub fn release(&self, id: AccountId) {
        self.leased.lock().unwrap().remove(&id);
    }

    /// Clear every lease (administrative reset / shutdown).
    pub fn force_reset(&self) -> usize {
        let mut leased = self.leased.lock().unwrap();
        let n = leased.len();
        leased.clear();
        n
    }

    pub fn leased_count(&self) -> usize {
        self.leased.lock().unwrap().len()
    }

    /// Synthesize and persist a device id on first use. The remote service
    /// conditions behavior on device continuity, so once assigned the same
    /// id is presented on every subsequent call.
    pub async fn ensure_device_id(&self, account: &mut Account) -> Result<()> {
        if account.session.device_id.is_some() {
            return Ok(());
        }
        let device_id = Uuid::new_v4().to_string();
        self.store.set_device_id(account.id, &device_id).await?;
        tracing::info!(
            account_id = account.id,
            %device_id,
            "generated device id for account"
        );
        account.session.device_id = Some(device_id);
        Ok(())
    }

    /// Ask the remote service for the live balance and record it.
    pub async fn refresh_credits(
        &self,
        account: &Account,
        api: &dyn VideoApi,
    ) -> Result<i64> {
        let credits = api
            .get_credits()
            .await
            .map_err(|e| anyhow::anyhow!("credits fetch for account {}: {e}", account.id))?;
        self.store
            .set_credits(account.id, credits, crate::store::db::unix_timestamp())
            .await?;
        Ok(credits)
    }

    /// Account needs phone verification; excluded until an operator steps in.
    pub async fn mark_phone_required(&self, id: AccountId) -> Result<()> {
        self.store
            .set_account_status(id, AccountStatus::PhoneRequired)
            .await
    }

    /// Quota exhausted: zero the balance and cool the account down.
    pub async fn mark_no_credits(&self, id: AccountId) -> Result<()> {
        self.store
            .set_credits(id, 0, crate::store::db::unix_timestamp())
            .await?;
        self.store
            .set_account_status(id, AccountStatus::Cooldown)
            .await
    }

    /// Token rejected: the session is dead until re-captured.
    pub async fn mark_expired(&self, id: AccountId) -> Result<()> {
        self.store
            .set_account_status(id, AccountStatus::Expired)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with_accounts(n: usize) -> (JobStore, Vec<AccountId>) {
        let store = JobStore::open_memory().await.unwrap();
        let mut ids = Vec::new();
        for i in 0..n {
            let id = store
                .add_account("sora", &format!("acc{i}@example.com"), None, Some("tok"), 10)
                .await
                .unwrap();
            ids.push(id);
        }
        (store, ids)
    }

    #[tokio::test]
    async fn acquire_leases_and_excludes_leased() {
        let (store, _ids) = store_with_accounts(2).await;
        let pool = AccountPool::new(store, "sora");

        let first = pool.acquire(&[]).await.unwrap().expect("account");
        let second = pool.acquire(&[]).await.unwrap().expect("account");
        assert_ne!(first.id, second.id);
        assert_eq!(pool.leased_count(), 2);

        // Pool exhausted.
        assert!(pool.acquire(&[]).await.unwrap().is_none());

        pool.release(first.id);
        let third = pool.acquire(&[]).await.unwrap().expect("account");
        assert_eq!(third.id, first.id);
    }

    #[tokio::test]
    async fn acquire_respects_exclude_list() {
        let (store, ids) = store_with_accounts(2).await;
        let pool = AccountPool::new(store, "sora");

        let got = pool.acquire(&[ids[0]]).await.unwrap().expect("account");
        assert_eq!(got.id, ids[1]);

        // Excluding everything leaves nothing.
        pool.release(got.id);
        assert!(pool.acquire(&ids).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn selection_picks_among_three_least_recently_used() {
        let (store, ids) = store_with_accounts(5).await;
        // ids[0..5] get ascending last_used: 100, 200, 300, 400, 500.
        for (i, id) in ids.iter().enumerate() {
            sqlx::query("UPDATE accounts SET last_used = ?1 WHERE id = ?2")
                .bind(((i + 1) * 100) as i64)
                .bind(id)
                .execute(&store.pool)
                .await
                .unwrap();
        }
        let pool = AccountPool::new(store, "sora");

        for _ in 0..20 {
            let got = pool.acquire(&[]).await.unwrap().expect("account");
            // Only the three oldest are candidates.
            assert!(ids[..3].contains(&got.id), "picked outside LRU window");
            pool.release(got.id);
            // Restore the fixed ordering disturbed by touch_last_used.
            for (i, id) in ids.iter().enumerate() {
                sqlx::query("UPDATE accounts SET last_used = ?1 WHERE id = ?2")
                    .bind(((i + 1) * 100) as i64)
                    .bind(id)
                    .execute(&pool.store.pool)
                    .await
                    .unwrap();
            }
        }
    }

    #[tokio::test]
    async fn force_reset_clears_all_leases() {
        let (store, _ids) = store_with_accounts(3).await;
        let pool = AccountPool::new(store, "sora");
        pool.acquire(&[]).await.unwrap().unwrap();
        pool.acquire(&[]).await.unwrap().unwrap();
        assert_eq!(pool.force_reset(), 2);
        assert_eq!(pool.leased_count(), 0);
    }

    #[tokio::test]
    async fn ensure_device_id_synthesizes_once() {
        let (store, ids) = store_with_accounts(1).await;
        let pool = AccountPool::new(store.clone(), "sora");
        let mut account = store.get_account(ids[0]).await.unwrap().unwrap();
        assert!(account.session.device_id.is_none());

        pool.ensure_device_id(&mut account).await.unwrap();
        let assigned = account.session.device_id.clone().expect("device id set");

        // A second call keeps the same id, and it is persisted.
        pool.ensure_device_id(&mut account).await.unwrap();
        assert_eq!(account.session.device_id.as_deref(), Some(assigned.as_str()));
        let stored = store.get_account(ids[0]).await.unwrap().unwrap();
        assert_eq!(stored.session.device_id.as_deref(), Some(assigned.as_str()));
    }

    #[tokio::test]
    async fn failure_markings_update_store() {
        let (store, ids) = store_with_accounts(1).await;
        let pool = AccountPool::new(store.clone(), "sora");

        pool.mark_no_credits(ids[0]).await.unwrap();
        let acc = store.get_account(ids[0]).await.unwrap().unwrap();
        assert_eq!(acc.status, AccountStatus::Cooldown);
        assert_eq!(acc.credits_remaining, 0);

        pool.mark_expired(ids[0]).await.unwrap();
        let acc = store.get_account(ids[0]).await.unwrap().unwrap();
        assert_eq!(acc.status, AccountStatus::Expired);

        pool.mark_phone_required(ids[0]).await.unwrap();
        let acc = store.get_account(ids[0]).await.unwrap().unwrap();
        assert_eq!(acc.status, AccountStatus::PhoneRequired);

        // None of these are eligible any more.
        assert!(pool.acquire(&[]).await.unwrap().is_none());
    }
}
