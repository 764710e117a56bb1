/// SQLite-backed revocation store
use super::{
    decode_revocation, format_serial, parse_timestamp, Revocation, RevocationReason,
    RevocationStore, StatusRecord,
};
use crate::{
    db,
    error::{ResponderError, ResponderResult},
};
use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use sqlx::{Row, SqlitePool};

#[derive(Clone)]
pub struct SqliteRevocationStore {
    db: SqlitePool,
}

impl SqliteRevocationStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Open the database at `url`, creating it if needed, and migrate it
    pub async fn connect(url: &str) -> ResponderResult<Self> {
        let pool = db::create_pool(url, db::DatabaseOptions::for_url(url)).await?;
        db::run_migrations(&pool).await?;
        db::test_connection(&pool).await?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl RevocationStore for SqliteRevocationStore {
    async fn status(&self, serial: u64) -> ResponderResult<Option<StatusRecord>> {
        let key = format_serial(serial);

        let certificate = sqlx::query("SELECT description, expiry FROM certificates WHERE serial = ?")
            .bind(&key)
            .fetch_optional(&self.db)
            .await?;

        let revocation = sqlx::query("SELECT reason, info, revoked_at FROM revocations WHERE serial = ?")
            .bind(&key)
            .fetch_optional(&self.db)
            .await?;

        if certificate.is_none() && revocation.is_none() {
            return Ok(None);
        }

        let (description, expiry) = match certificate {
            Some(row) => {
                let description: String = row.try_get("description")?;
                let expiry: String = row.try_get("expiry")?;
                (Some(description), Some(parse_timestamp(&expiry)?))
            }
            None => (None, None),
        };

        let revocation = match revocation {
            Some(row) => {
                let revoked_at: String = row.try_get("revoked_at")?;
                Some(decode_revocation(
                    row.try_get("reason")?,
                    row.try_get("info")?,
                    &revoked_at,
                )?)
            }
            None => None,
        };

        Ok(Some(StatusRecord {
            serial,
            description,
            expiry,
            revocation,
        }))
    }

    async fn record_revocation(
        &self,
        serial: u64,
        reason: RevocationReason,
        info: &str,
    ) -> ResponderResult<Revocation> {
        let revoked_at = Utc::now().trunc_subsecs(0);

        let result = sqlx::query(
            r#"
            INSERT INTO revocations (serial, reason, info, revoked_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(serial) DO NOTHING
            "#,
        )
        .bind(format_serial(serial))
        .bind(reason.code())
        .bind(info)
        .bind(revoked_at.to_rfc3339())
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ResponderError::AlreadyRevoked(serial));
        }

        Ok(Revocation {
            reason,
            revoked_at,
            info: info.to_string(),
        })
    }

    async fn record_issued(
        &self,
        serial: u64,
        expiry: DateTime<Utc>,
        description: &str,
    ) -> ResponderResult<()> {
        sqlx::query(
            r#"
            INSERT INTO certificates (serial, description, expiry, issued_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(serial) DO UPDATE SET
                description = excluded.description,
                expiry = excluded.expiry
            "#,
        )
        .bind(format_serial(serial))
        .bind(description)
        .bind(expiry.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn ping(&self) -> ResponderResult<()> {
        db::test_connection(&self.db).await
    }
}
