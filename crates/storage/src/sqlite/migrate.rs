use chrono::Utc;
use sqlx::SqlitePool;

use super::SqliteInitError;

/// Runs the versioned migrations for the current schema.
///
/// Version 1 creates the puzzle catalog, puzzle sets with their ordered
/// membership and progress, and the per-cycle accuracy table.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    async fn is_applied(pool: &SqlitePool, version: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
            .bind(version)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            ",
    )
    .execute(pool)
    .await?;

    if !is_applied(pool, 1).await? {
        let mut tx = pool.begin().await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS puzzles (
                    id TEXT PRIMARY KEY,
                    fen TEXT NOT NULL,
                    solution TEXT NOT NULL,
                    rating INTEGER NOT NULL CHECK (rating >= 0),
                    band TEXT NOT NULL
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS puzzle_sets (
                    id INTEGER PRIMARY KEY,
                    target_rating INTEGER NOT NULL CHECK (target_rating >= 0),
                    size INTEGER NOT NULL CHECK (size >= 1),
                    repeats INTEGER NOT NULL CHECK (repeats >= 1),
                    repeat_index INTEGER NOT NULL DEFAULT 0,
                    puzzle_index INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    CHECK (repeat_index BETWEEN 0 AND repeats),
                    CHECK (puzzle_index BETWEEN 0 AND size)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        // Catalog puzzles are external, so membership does not reference `puzzles`.
        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS set_puzzles (
                    set_id INTEGER NOT NULL,
                    position INTEGER NOT NULL CHECK (position >= 0),
                    puzzle_id TEXT NOT NULL,
                    PRIMARY KEY (set_id, position),
                    UNIQUE (set_id, puzzle_id),
                    FOREIGN KEY (set_id) REFERENCES puzzle_sets(id) ON DELETE CASCADE
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS set_accuracy (
                    set_id INTEGER NOT NULL,
                    repeat_index INTEGER NOT NULL CHECK (repeat_index >= 0),
                    correct INTEGER NOT NULL DEFAULT 0 CHECK (correct >= 0),
                    incorrect INTEGER NOT NULL DEFAULT 0 CHECK (incorrect >= 0),
                    time_taken_secs INTEGER NOT NULL DEFAULT 0 CHECK (time_taken_secs >= 0),
                    PRIMARY KEY (set_id, repeat_index),
                    FOREIGN KEY (set_id) REFERENCES puzzle_sets(id) ON DELETE CASCADE
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_puzzles_band_rating
                    ON puzzles(band, rating);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                INSERT INTO schema_migrations (version, applied_at)
                VALUES (?1, ?2)
                ON CONFLICT(version) DO NOTHING
            ",
        )
        .bind(1_i64)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        log::info!("applied sqlite schema migration 1");
    }

    Ok(())
}
