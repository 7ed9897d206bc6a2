//! Database initialization
//!
//! Opens (or creates) the shared SQLite database, applies pragmas for
//! concurrent worker access, creates all tables idempotently, runs versioned
//! migrations and seeds default settings and uniform prediction weights.

use crate::db::models::Platform;
use crate::predict::factors::Factor;
use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::{info, warn};

/// Initialize database connection and create tables if needed.
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // Enable foreign keys
    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

    // WAL mode allows concurrent readers across worker processes with one
    // writer; the task-claim statement is the sole mutual-exclusion point.
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;

    // Writers from other worker processes hold the lock briefly; wait rather
    // than surfacing SQLITE_BUSY to every caller.
    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    init_schema(&pool).await?;

    Ok(pool)
}

/// Create all tables, run migrations and seed defaults.
///
/// Idempotent — safe to call from every worker at startup, and used directly
/// by tests against in-memory pools.
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    create_settings_table(pool).await?;
    create_tasks_table(pool).await?;
    create_accounts_table(pool).await?;
    create_production_recipes_table(pool).await?;
    create_content_table(pool).await?;
    create_publications_table(pool).await?;
    create_metrics_table(pool).await?;
    create_prediction_snapshots_table(pool).await?;
    create_account_baselines_table(pool).await?;
    create_prediction_weights_table(pool).await?;
    create_weight_audit_log_table(pool).await?;
    create_adjustment_factor_cache_table(pool).await?;
    create_cycles_table(pool).await?;
    create_cycle_approvals_table(pool).await?;
    create_kpi_snapshots_table(pool).await?;
    create_batch_executions_table(pool).await?;
    create_content_embeddings_table(pool).await?;

    crate::db::migrations::run_migrations(pool).await?;

    init_default_settings(pool).await?;
    seed_prediction_weights(pool).await?;

    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the settings table
///
/// Stores every runtime tunable as a key-value pair. No cadence or threshold
/// is hardcoded anywhere else.
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the tasks table (durable work queue)
///
/// Failed tasks are never deleted — they remain for operator inspection.
pub async fn create_tasks_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            task_type TEXT NOT NULL CHECK (task_type IN ('produce', 'publish', 'measure', 'curate')),
            payload TEXT NOT NULL DEFAULT '{}',
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'queued', 'waiting', 'processing', 'retrying',
                                  'completed', 'failed', 'failed_permanent')),
            priority INTEGER NOT NULL DEFAULT 0,
            assigned_worker TEXT,
            retry_count INTEGER NOT NULL DEFAULT 0,
            max_retries INTEGER NOT NULL DEFAULT 3,
            error_message TEXT,
            last_error_at TIMESTAMP,
            retry_after TIMESTAMP,
            created_at TIMESTAMP NOT NULL,
            started_at TIMESTAMP,
            completed_at TIMESTAMP,
            CHECK (retry_count >= 0),
            CHECK (max_retries >= 0)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_tasks_claim ON tasks(task_type, status, priority, created_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_accounts_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS accounts (
            account_id TEXT PRIMARY KEY,
            platform TEXT NOT NULL CHECK (platform IN ('youtube', 'tiktok', 'instagram', 'x')),
            niche TEXT,
            status TEXT NOT NULL DEFAULT 'active' CHECK (status IN ('active', 'suspended')),
            display_name TEXT,
            auth_credentials TEXT,
            created_at TIMESTAMP NOT NULL,
            updated_at TIMESTAMP NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_accounts_platform ON accounts(platform, niche)")
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn create_content_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS content (
            content_id TEXT PRIMARY KEY,
            character_id TEXT,
            content_format TEXT NOT NULL CHECK (content_format IN ('short_video', 'text_post', 'image_post')),
            status TEXT NOT NULL DEFAULT 'planned'
                CHECK (status IN ('planned', 'producing', 'pending_approval', 'ready', 'posted',
                                  'measured', 'analyzed', 'rejected', 'cancelled', 'error')),
            niche TEXT,
            hook_type TEXT,
            narrative_structure TEXT,
            total_duration_seconds REAL,
            sound_bgm TEXT,
            tags TEXT,
            recipe_id INTEGER REFERENCES production_recipes(id),
            script_language TEXT,
            generated_text TEXT,
            media_url TEXT,
            quality_score REAL,
            revision_count INTEGER NOT NULL DEFAULT 0,
            metadata TEXT,
            created_at TIMESTAMP NOT NULL,
            updated_at TIMESTAMP NOT NULL,
            CHECK (revision_count >= 0),
            CHECK (total_duration_seconds IS NULL OR total_duration_seconds > 0)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_content_status ON content(status)")
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn create_publications_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS publications (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            content_id TEXT NOT NULL REFERENCES content(content_id),
            account_id TEXT NOT NULL REFERENCES accounts(account_id),
            platform TEXT NOT NULL CHECK (platform IN ('youtube', 'tiktok', 'instagram', 'x')),
            status TEXT NOT NULL DEFAULT 'posted' CHECK (status IN ('posted', 'measured')),
            posted_at TIMESTAMP NOT NULL,
            platform_post_id TEXT,
            post_url TEXT,
            measure_after TIMESTAMP NOT NULL,
            created_at TIMESTAMP NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_publications_content ON publications(content_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_publications_measure ON publications(status, measure_after)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_metrics_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS metrics (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            publication_id INTEGER NOT NULL REFERENCES publications(id),
            measurement_point TEXT NOT NULL CHECK (measurement_point IN ('48h', '7d', '30d')),
            views REAL NOT NULL DEFAULT 0,
            likes REAL NOT NULL DEFAULT 0,
            comments REAL NOT NULL DEFAULT 0,
            shares REAL NOT NULL DEFAULT 0,
            synthetic INTEGER NOT NULL DEFAULT 0,
            measured_at TIMESTAMP NOT NULL,
            UNIQUE (publication_id, measurement_point)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_metrics_point ON metrics(measurement_point)")
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn create_prediction_snapshots_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS prediction_snapshots (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            publication_id INTEGER NOT NULL UNIQUE REFERENCES publications(id),
            content_id TEXT NOT NULL,
            account_id TEXT NOT NULL,
            baseline_used REAL NOT NULL,
            baseline_source TEXT NOT NULL
                CHECK (baseline_source IN ('own_history', 'cohort_niche_age', 'cohort_niche',
                                           'cohort_platform', 'default')),
            adjustments_applied TEXT NOT NULL,
            total_adjustment REAL NOT NULL,
            predicted_impressions REAL NOT NULL,
            actual_impressions_48h REAL,
            actual_impressions_7d REAL,
            actual_impressions_30d REAL,
            prediction_error_7d REAL,
            prediction_error_30d REAL,
            created_at TIMESTAMP NOT NULL,
            updated_at TIMESTAMP NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_snapshots_content ON prediction_snapshots(content_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_account_baselines_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS account_baselines (
            account_id TEXT PRIMARY KEY REFERENCES accounts(account_id),
            baseline_impressions REAL NOT NULL,
            source TEXT NOT NULL
                CHECK (source IN ('own_history', 'cohort_niche_age', 'cohort_niche',
                                  'cohort_platform', 'default')),
            sample_count INTEGER NOT NULL DEFAULT 0,
            window_start TIMESTAMP,
            window_end TIMESTAMP,
            calculated_at TIMESTAMP NOT NULL,
            CHECK (baseline_impressions >= 0),
            CHECK (sample_count >= 0)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_prediction_weights_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS prediction_weights (
            platform TEXT NOT NULL CHECK (platform IN ('youtube', 'tiktok', 'instagram', 'x')),
            factor_name TEXT NOT NULL,
            weight REAL NOT NULL,
            updated_at TIMESTAMP NOT NULL,
            PRIMARY KEY (platform, factor_name),
            CHECK (weight >= 0.0)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_weight_audit_log_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS weight_audit_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            platform TEXT NOT NULL,
            factor_name TEXT NOT NULL,
            old_weight REAL NOT NULL,
            new_weight REAL NOT NULL,
            data_count INTEGER NOT NULL DEFAULT 0,
            metrics_count INTEGER NOT NULL DEFAULT 0,
            calculated_at TIMESTAMP NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_weight_audit_platform ON weight_audit_log(platform, calculated_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_adjustment_factor_cache_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS adjustment_factor_cache (
            platform TEXT NOT NULL,
            factor_name TEXT NOT NULL,
            factor_value TEXT NOT NULL,
            adjustment REAL NOT NULL,
            sample_count INTEGER NOT NULL DEFAULT 0,
            is_active INTEGER NOT NULL DEFAULT 1,
            updated_at TIMESTAMP NOT NULL,
            PRIMARY KEY (platform, factor_name, factor_value)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_cycles_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cycles (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            cycle_number INTEGER NOT NULL,
            thread_id TEXT NOT NULL UNIQUE,
            status TEXT NOT NULL DEFAULT 'running'
                CHECK (status IN ('running', 'suspended', 'completed', 'cancelled')),
            current_node TEXT NOT NULL,
            state TEXT NOT NULL DEFAULT '{}',
            started_at TIMESTAMP NOT NULL,
            updated_at TIMESTAMP NOT NULL,
            completed_at TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_cycles_status ON cycles(status)")
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn create_cycle_approvals_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cycle_approvals (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            thread_id TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('approved', 'rejected')),
            rejection_category TEXT
                CHECK (rejection_category IS NULL OR
                       rejection_category IN ('plan_revision', 'data_insufficient', 'hypothesis_weak')),
            comment TEXT,
            decided_at TIMESTAMP NOT NULL,
            consumed_at TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_cycle_approvals_thread ON cycle_approvals(thread_id, consumed_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_production_recipes_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS production_recipes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            recipe_name TEXT NOT NULL,
            steps TEXT NOT NULL DEFAULT '[]',
            is_active INTEGER NOT NULL DEFAULT 1,
            times_used INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMP NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_kpi_snapshots_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS kpi_snapshots (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            platform TEXT NOT NULL CHECK (platform IN ('youtube', 'tiktok', 'instagram', 'x')),
            year_month TEXT NOT NULL,
            kpi_target REAL NOT NULL,
            avg_impressions REAL NOT NULL DEFAULT 0,
            achievement_rate REAL NOT NULL DEFAULT 0,
            account_count INTEGER NOT NULL DEFAULT 0,
            publication_count INTEGER NOT NULL DEFAULT 0,
            prediction_accuracy REAL,
            is_reliable INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMP NOT NULL,
            UNIQUE (platform, year_month)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_batch_executions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS batch_executions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            job_name TEXT NOT NULL,
            dedup_key TEXT NOT NULL,
            started_at TIMESTAMP NOT NULL,
            duration_ms INTEGER,
            success INTEGER,
            error TEXT,
            UNIQUE (job_name, dedup_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_content_embeddings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS content_embeddings (
            content_id TEXT PRIMARY KEY REFERENCES content(content_id),
            embedding TEXT NOT NULL,
            source_hash TEXT NOT NULL,
            embedded_at TIMESTAMP NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Initialize or update default settings
///
/// Ensures all required settings exist with default values. Existing values
/// are left untouched; NULL values are reset to the default.
async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    // Measurement
    ensure_setting(pool, "METRICS_COLLECTION_DELAY_HOURS", "48").await?;
    ensure_setting(pool, "METRICS_FOLLOWUP_DAYS", "[7, 30]").await?;
    ensure_setting(pool, "METRICS_COLLECTION_RETRY_HOURS", "6").await?;
    ensure_setting(pool, "METRICS_MAX_COLLECTION_ATTEMPTS", "5").await?;
    ensure_setting(pool, "MEASUREMENT_POLL_INTERVAL_SEC", "300").await?;

    // Baselines
    ensure_setting(pool, "BASELINE_WINDOW_DAYS", "14").await?;
    ensure_setting(pool, "BASELINE_MIN_SAMPLE", "3").await?;
    ensure_setting(pool, "BASELINE_DEFAULT_IMPRESSIONS", "500").await?;

    // Prediction clips
    ensure_setting(pool, "ADJUSTMENT_INDIVIDUAL_MIN", "-0.5").await?;
    ensure_setting(pool, "ADJUSTMENT_INDIVIDUAL_MAX", "0.5").await?;
    ensure_setting(pool, "ADJUSTMENT_TOTAL_MIN", "-0.7").await?;
    ensure_setting(pool, "ADJUSTMENT_TOTAL_MAX", "1.0").await?;
    ensure_setting(pool, "PREDICTION_VALUE_MIN_RATIO", "0.3").await?;
    ensure_setting(pool, "PREDICTION_VALUE_MAX_RATIO", "2.0").await?;
    ensure_setting(pool, "CROSS_ACCOUNT_MIN_SAMPLE", "3").await?;
    ensure_setting(pool, "ANALYSIS_MIN_SAMPLE_SIZE", "5").await?;

    // Weight recalibration
    ensure_setting(pool, "WEIGHT_FLOOR", "0.02").await?;
    ensure_setting(pool, "WEIGHT_SMOOTHING_ALPHA", "0.3").await?;
    ensure_setting(pool, "WEIGHT_CHANGE_MAX_RATE", "0.2").await?;
    ensure_setting(pool, "WEIGHT_RECALC_MIN_NEW_DATA", "50").await?;
    ensure_setting(pool, "WEIGHT_RECALC_TIER_1_THRESHOLD", "500").await?;
    ensure_setting(pool, "WEIGHT_RECALC_TIER_2_THRESHOLD", "5000").await?;
    ensure_setting(pool, "WEIGHT_RECALC_TIER_3_THRESHOLD", "50000").await?;

    // Production pipeline
    ensure_setting(pool, "HUMAN_REVIEW_ENABLED", "true").await?;
    ensure_setting(pool, "AUTO_APPROVE_SCORE_THRESHOLD", "8.0").await?;
    ensure_setting(pool, "MAX_CONTENT_REVISION_COUNT", "3").await?;
    ensure_setting(pool, "PRODUCTION_POLL_INTERVAL_SEC", "30").await?;
    ensure_setting(pool, "TASK_RETRY_BASE_SEC", "300").await?;

    // Credential refresh
    ensure_setting(pool, "TOKEN_REFRESH_BUFFER_HOURS", "2").await?;
    ensure_setting(pool, "TOKEN_REFRESH_INTERVAL_SEC", "3600").await?;

    // KPI
    ensure_setting(pool, "KPI_TARGET_YOUTUBE", "10000").await?;
    ensure_setting(pool, "KPI_TARGET_TIKTOK", "20000").await?;
    ensure_setting(pool, "KPI_TARGET_INSTAGRAM", "15000").await?;
    ensure_setting(pool, "KPI_TARGET_X", "8000").await?;
    ensure_setting(pool, "KPI_CALC_MONTH_START_DAY", "21").await?;
    ensure_setting(pool, "KPI_MIN_RELIABLE_ACCOUNTS", "5").await?;

    // Batch scheduler hours (UTC)
    ensure_setting(pool, "BASELINE_UPDATE_UTC_HOUR", "1").await?;
    ensure_setting(pool, "ADJUSTMENT_CACHE_UTC_HOUR", "2").await?;
    ensure_setting(pool, "WEIGHT_RECALC_UTC_HOUR", "3").await?;
    ensure_setting(pool, "KPI_SNAPSHOT_UTC_HOUR", "4").await?;
    ensure_setting(pool, "EMBEDDING_REFRESH_INTERVAL_HOURS", "6").await?;

    // Strategy cycle
    ensure_setting(pool, "CYCLE_RESUME_POLL_INTERVAL_SEC", "60").await?;

    info!("Default settings initialized");
    Ok(())
}

/// Ensure a setting exists with the specified default value.
///
/// If the setting doesn't exist, it will be created with the default.
/// If the setting exists but has a NULL value, it will be reset to the default.
async fn ensure_setting(pool: &SqlitePool, key: &str, default_value: &str) -> Result<()> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM settings WHERE key = ?)")
        .bind(key)
        .fetch_one(pool)
        .await?;

    if !exists {
        // INSERT OR IGNORE handles concurrent initialization from several
        // workers passing the exists check simultaneously
        sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(default_value)
            .execute(pool)
            .await?;
        return Ok(());
    }

    let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_one(pool)
        .await?;

    if value.is_none() {
        sqlx::query("UPDATE settings SET value = ? WHERE key = ?")
            .bind(default_value)
            .bind(key)
            .execute(pool)
            .await?;

        warn!("Setting '{}' was NULL, reset to default: {}", key, default_value);
    }

    Ok(())
}

/// Seed uniform prediction weights (1/9 per factor) for every platform.
///
/// Existing weights are left untouched; recalibration owns them afterwards.
async fn seed_prediction_weights(pool: &SqlitePool) -> Result<()> {
    let uniform = 1.0 / Factor::ALL.len() as f64;
    let now = chrono::Utc::now();

    for platform in Platform::ALL {
        for factor in Factor::ALL {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO prediction_weights (platform, factor_name, weight, updated_at)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(platform)
            .bind(factor.as_str())
            .bind(uniform)
            .bind(now)
            .execute(pool)
            .await?;
        }
    }

    Ok(())
}
