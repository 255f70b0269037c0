//! Postgres persistence: lead identities, append-only scoring history
//! and the failure/audit trails. Any error here is fatal to the run;
//! everything upstream degrades, storage does not.

use sqlx::PgPool;

use crate::errors::{AppError, ResultExt};
use crate::models::{ApiCallRecord, ErrorLogEntry, LeadRecord, ScoreRecord};

pub struct ScoringStorage {
    pool: PgPool,
}

impl ScoringStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the schema when missing. Statements are idempotent, so
    /// this runs unconditionally at startup.
    pub async fn ensure_schema(&self) -> Result<(), AppError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS leads (
                lead_id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                phone TEXT UNIQUE NOT NULL,
                inn TEXT,
                kpp TEXT,
                ogrn TEXT,
                dob DATE,
                email TEXT,
                address TEXT,
                region TEXT,
                debt_amount DOUBLE PRECISION NOT NULL DEFAULT 0,
                revenue DOUBLE PRECISION,
                source_tags TEXT[] NOT NULL DEFAULT '{}',
                invalid_inn BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("creating leads table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scoring_history (
                id BIGSERIAL PRIMARY KEY,
                lead_id TEXT NOT NULL,
                phone TEXT NOT NULL,
                score INTEGER NOT NULL,
                rule_score INTEGER NOT NULL,
                group_name TEXT NOT NULL,
                reason_1 TEXT,
                reason_2 TEXT,
                reason_3 TEXT,
                model_version TEXT,
                degraded BOOLEAN NOT NULL DEFAULT FALSE,
                scored_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("creating scoring_history table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS error_logs (
                id BIGSERIAL PRIMARY KEY,
                name TEXT,
                inn TEXT,
                phone TEXT,
                source TEXT NOT NULL,
                error TEXT NOT NULL,
                occurred_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("creating error_logs table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS api_call_log (
                id BIGSERIAL PRIMARY KEY,
                source TEXT NOT NULL,
                phone TEXT NOT NULL,
                status TEXT NOT NULL,
                latency_ms BIGINT NOT NULL,
                attempted_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("creating api_call_log table")?;

        for statement in [
            "CREATE INDEX IF NOT EXISTS idx_leads_inn ON leads(inn)",
            "CREATE INDEX IF NOT EXISTS idx_leads_region ON leads(region)",
            "CREATE INDEX IF NOT EXISTS idx_history_lead ON scoring_history(lead_id)",
            "CREATE INDEX IF NOT EXISTS idx_api_call_source ON api_call_log(source)",
        ] {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("creating index")?;
        }

        tracing::info!("✓ Storage schema ready");
        Ok(())
    }

    /// Loads every stored lead so the identity index starts out knowing
    /// what previous runs already scored. A phone reappearing in a new
    /// file then merges instead of passing as a fresh lead.
    pub async fn load_leads(&self) -> Result<Vec<LeadRecord>, AppError> {
        let leads = sqlx::query_as::<_, LeadRecord>(
            r#"
            SELECT lead_id, name, phone, inn, kpp, ogrn, dob, email, address,
                   region, debt_amount, revenue, source_tags,
                   invalid_inn AS inn_invalid, created_at
            FROM leads
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("loading stored leads")?;
        Ok(leads)
    }

    /// Upserts by phone with the same merge policy the in-memory dedup
    /// index applies: the latest non-null scalar wins, tags accumulate,
    /// the earliest creation timestamp survives.
    pub async fn upsert_leads(&self, leads: &[LeadRecord]) -> Result<(), AppError> {
        for lead in leads {
            sqlx::query(
                r#"
                INSERT INTO leads (
                    lead_id, name, phone, inn, kpp, ogrn, dob, email, address,
                    region, debt_amount, revenue, source_tags, invalid_inn, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
                ON CONFLICT (phone) DO UPDATE
                SET lead_id = EXCLUDED.lead_id,
                    name = CASE WHEN EXCLUDED.name <> '' THEN EXCLUDED.name ELSE leads.name END,
                    inn = COALESCE(EXCLUDED.inn, leads.inn),
                    kpp = COALESCE(EXCLUDED.kpp, leads.kpp),
                    ogrn = COALESCE(EXCLUDED.ogrn, leads.ogrn),
                    dob = COALESCE(EXCLUDED.dob, leads.dob),
                    email = COALESCE(EXCLUDED.email, leads.email),
                    address = COALESCE(EXCLUDED.address, leads.address),
                    region = COALESCE(EXCLUDED.region, leads.region),
                    debt_amount = CASE WHEN EXCLUDED.debt_amount > 0
                                       THEN EXCLUDED.debt_amount
                                       ELSE leads.debt_amount END,
                    revenue = COALESCE(EXCLUDED.revenue, leads.revenue),
                    source_tags = ARRAY(
                        SELECT DISTINCT t
                        FROM unnest(leads.source_tags || EXCLUDED.source_tags) AS t
                    ),
                    invalid_inn = CASE WHEN EXCLUDED.inn IS NOT NULL
                                       THEN EXCLUDED.invalid_inn
                                       ELSE leads.invalid_inn END,
                    created_at = LEAST(leads.created_at, EXCLUDED.created_at)
                "#,
            )
            .bind(&lead.lead_id)
            .bind(&lead.name)
            .bind(&lead.phone)
            .bind(&lead.inn)
            .bind(&lead.kpp)
            .bind(&lead.ogrn)
            .bind(lead.dob)
            .bind(&lead.email)
            .bind(&lead.address)
            .bind(&lead.region)
            .bind(lead.debt_amount)
            .bind(lead.revenue)
            .bind(&lead.source_tags)
            .bind(lead.inn_invalid)
            .bind(lead.created_at)
            .execute(&self.pool)
            .await
            .with_context(|| format!("upserting lead {}", lead.lead_id))?;
        }

        tracing::info!("✓ Upserted {} leads", leads.len());
        Ok(())
    }

    pub async fn record_scores(&self, scores: &[ScoreRecord]) -> Result<(), AppError> {
        for score in scores {
            sqlx::query(
                r#"
                INSERT INTO scoring_history (
                    lead_id, phone, score, rule_score, group_name,
                    reason_1, reason_2, reason_3, model_version, degraded, scored_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(&score.lead_id)
            .bind(&score.phone)
            .bind(score.score)
            .bind(score.rule_score)
            .bind(score.group.as_str())
            .bind(score.reason(0))
            .bind(score.reason(1))
            .bind(score.reason(2))
            .bind(&score.model_version)
            .bind(score.degraded)
            .bind(score.scored_at)
            .execute(&self.pool)
            .await
            .with_context(|| format!("recording score for lead {}", score.lead_id))?;
        }

        tracing::info!("✓ Recorded {} scoring results", scores.len());
        Ok(())
    }

    pub async fn record_errors(&self, errors: &[ErrorLogEntry]) -> Result<(), AppError> {
        for entry in errors {
            sqlx::query(
                r#"
                INSERT INTO error_logs (name, inn, phone, source, error, occurred_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(&entry.name)
            .bind(&entry.inn)
            .bind(&entry.phone)
            .bind(&entry.source)
            .bind(&entry.error)
            .bind(entry.occurred_at)
            .execute(&self.pool)
            .await
            .context("recording error log entry")?;
        }
        Ok(())
    }

    pub async fn record_api_calls(&self, calls: &[ApiCallRecord]) -> Result<(), AppError> {
        for call in calls {
            sqlx::query(
                r#"
                INSERT INTO api_call_log (source, phone, status, latency_ms, attempted_at)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(call.source.name())
            .bind(&call.phone)
            .bind(&call.status)
            .bind(call.latency_ms as i64)
            .bind(call.attempted_at)
            .execute(&self.pool)
            .await
            .context("recording api call")?;
        }
        Ok(())
    }
}
