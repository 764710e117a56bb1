/// PostgreSQL-backed revocation store
use super::{
    decode_revocation, format_serial, parse_timestamp, redact_url, Revocation, RevocationReason,
    RevocationStore, StatusRecord,
};
use crate::{
    db::postgres::{self as pg, PostgresConfig},
    error::{ResponderError, ResponderResult},
};
use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use sqlx::{PgPool, Row};
use tracing::info;

#[derive(Clone)]
pub struct PostgresRevocationStore {
    db: PgPool,
}

impl PostgresRevocationStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn connect(url: &str) -> ResponderResult<Self> {
        info!(url = %redact_url(url), "Opening PostgreSQL revocation store");
        let pool = pg::create_pool(PostgresConfig::new(url)).await?;
        pg::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl RevocationStore for PostgresRevocationStore {
    async fn status(&self, serial: u64) -> ResponderResult<Option<StatusRecord>> {
        let key = format_serial(serial);

        let certificate =
            sqlx::query("SELECT description, expiry FROM certificates WHERE serial = $1")
                .bind(&key)
                .fetch_optional(&self.db)
                .await?;

        let revocation =
            sqlx::query("SELECT reason, info, revoked_at FROM revocations WHERE serial = $1")
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
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (serial) DO NOTHING
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
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (serial) DO UPDATE SET
                description = EXCLUDED.description,
                expiry = EXCLUDED.expiry
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
        sqlx::query("SELECT 1").execute(&self.db).await?;
        Ok(())
    }
}
