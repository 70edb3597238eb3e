use std::collections::HashSet;

use sqlx::{QueryBuilder, Row, Sqlite};
use woodpecker_core::model::{DifficultyBand, PuzzleId, PuzzleRecord};

use super::SqliteRepository;
use super::mapping::{map_puzzle_row, map_sqlx, ser, u64_from_i64};
use crate::repository::{CatalogError, PuzzleCatalog, StorageError};

#[async_trait::async_trait]
impl PuzzleCatalog for SqliteRepository {
    async fn get_by_id(&self, id: &PuzzleId) -> Result<PuzzleRecord, CatalogError> {
        let row = sqlx::query(
            r"
            SELECT id, fen, solution, rating
            FROM puzzles WHERE id = ?1
            ",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        match row {
            Some(row) => Ok(map_puzzle_row(&row)?),
            None => Err(CatalogError::NotFound(id.clone())),
        }
    }

    async fn get_by_band(
        &self,
        band: DifficultyBand,
        exclude: &HashSet<PuzzleId>,
    ) -> Result<PuzzleRecord, CatalogError> {
        let mut qb: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("SELECT id, fen, solution, rating FROM puzzles WHERE band = ");
        qb.push_bind(band.as_str());
        if !exclude.is_empty() {
            qb.push(" AND id NOT IN (");
            let mut ids = qb.separated(", ");
            for id in exclude {
                ids.push_bind(id.as_str().to_string());
            }
            ids.push_unseparated(")");
        }
        qb.push(" ORDER BY RANDOM() LIMIT 1");

        let row = qb
            .build()
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;

        match row {
            Some(row) => Ok(map_puzzle_row(&row)?),
            None => Err(CatalogError::Exhausted(band)),
        }
    }

    async fn upsert_puzzle(&self, puzzle: &PuzzleRecord) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO puzzles (id, fen, solution, rating, band)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                fen = excluded.fen,
                solution = excluded.solution,
                rating = excluded.rating,
                band = excluded.band
            ",
        )
        .bind(puzzle.id().as_str())
        .bind(puzzle.starting_position())
        .bind(puzzle.solution_uci())
        .bind(i64::from(puzzle.rating()))
        .bind(puzzle.band().as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(())
    }

    async fn count_by_band(&self, band: DifficultyBand) -> Result<u64, StorageError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM puzzles WHERE band = ?1")
            .bind(band.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx)?;
        u64_from_i64("count", row.try_get::<i64, _>("n").map_err(ser)?)
    }
}
