//! Account repository operations.

use anyhow::{bail, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::db::{unix_timestamp, JobStore};
use super::placeholders;
use super::types::{Account, AccountId, AccountSession, AccountStats, AccountStatus};

const ACCOUNT_COLUMNS_SQL: &str = "id, platform, email, password_enc, \
     access_token, device_id, user_agent, cookies, \
     credits_remaining, credits_last_checked, credits_reset_at, \
     status, last_used, created_at, updated_at";

fn account_from_row(row: &SqliteRow) -> Account {
    let status_str: String = row.get("status");
    Account {
        id: row.get("id"),
        platform: row.get("platform"),
        email: row.get("email"),
        password_enc: row.get("password_enc"),
        session: AccountSession {
            access_token: row.get("access_token"),
            device_id: row.get("device_id"),
            user_agent: row.get("user_agent"),
            cookies: row.get("cookies"),
        },
        credits_remaining: row.get("credits_remaining"),
        credits_last_checked: row.get("credits_last_checked"),
        credits_reset_at: row.get("credits_reset_at"),
        status: AccountStatus::from_str(&status_str),
        last_used: row.get("last_used"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

impl JobStore {
    pub async fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS_SQL} FROM accounts WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(account_from_row))
    }

    pub async fn list_accounts(&self) -> Result<Vec<Account>> {
        let rows = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS_SQL} FROM accounts ORDER BY id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(account_from_row).collect())
    }

    /// Accounts eligible for leasing: live, holding credits, not excluded.
    /// Ordered LRU (never-used first) so the pool can pick from the oldest.
    pub async fn list_eligible_accounts(
        &self,
        platform: &str,
        exclude_ids: &[AccountId],
    ) -> Result<Vec<Account>> {
        let mut sql = format!(
            "SELECT {ACCOUNT_COLUMNS_SQL} FROM accounts \
             WHERE platform = ?1 AND status = 'live' AND credits_remaining > 0"
        );
        if !exclude_ids.is_empty() {
            sql.push_str(&format!(
                " AND id NOT IN ({})",
                placeholders(exclude_ids.len())
            ));
        }
        sql.push_str(" ORDER BY last_used ASC NULLS FIRST, id ASC");

        let mut query = sqlx::query(&sql).bind(platform);
        for id in exclude_ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(account_from_row).collect())
    }

    /// Insert an imported account, live by default. Returns the new id.
    pub async fn add_account(
        &self,
        platform: &str,
        email: &str,
        password_enc: Option<&str>,
        access_token: Option<&str>,
        credits_remaining: i64,
    ) -> Result<AccountId> {
        let now = unix_timestamp();
        let row_id = sqlx::query(
            r#"
            INSERT INTO accounts (
                platform, email, password_enc, access_token,
                credits_remaining, status, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, 'live', ?6, ?7)
            "#,
        )
        .bind(platform)
        .bind(email)
        .bind(password_enc)
        .bind(access_token)
        .bind(credits_remaining)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(row_id)
    }

    /// Persist session material (token, device id, user agent, cookies).
    pub async fn update_session(&self, id: AccountId, session: &AccountSession) -> Result<()> {
        let now = unix_timestamp();
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET access_token = ?1,
                device_id = ?2,
                user_agent = ?3,
                cookies = ?4,
                updated_at = ?5
            WHERE id = ?6
            "#,
        )
        .bind(&session.access_token)
        .bind(&session.device_id)
        .bind(&session.user_agent)
        .bind(&session.cookies)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            bail!("account {id} not found");
        }
        Ok(())
    }

    /// Persist a freshly synthesized device id.
    pub async fn set_device_id(&self, id: AccountId, device_id: &str) -> Result<()> {
        let now = unix_timestamp();
        sqlx::query("UPDATE accounts SET device_id = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(device_id)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_account_status(&self, id: AccountId, status: AccountStatus) -> Result<()> {
        let now = unix_timestamp();
        sqlx::query("UPDATE accounts SET status = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(status.as_str())
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record a credit balance observation.
    pub async fn set_credits(&self, id: AccountId, remaining: i64, checked_at: i64) -> Result<()> {
        let now = unix_timestamp();
        sqlx::query(
            "UPDATE accounts SET credits_remaining = ?1, credits_last_checked = ?2, updated_at = ?3 \
             WHERE id = ?4",
        )
        .bind(remaining)
        .bind(checked_at)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Bump `last_used` so LRU ordering sees this account as freshest.
    pub async fn touch_last_used(&self, id: AccountId) -> Result<()> {
        let now = unix_timestamp();
        sqlx::query("UPDATE accounts SET last_used = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(now)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Account totals for the queue-status snapshot.
    pub async fn account_stats(&self) -> Result<AccountStats> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total, \
               COALESCE(SUM(CASE WHEN credits_remaining > 0 THEN 1 ELSE 0 END), 0) AS with_credits \
             FROM accounts",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(AccountStats {
            total: row.get("total"),
            with_credits: row.get("with_credits"),
        })
    }
}
