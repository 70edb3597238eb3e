use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use woodpecker_core::model::{NewPuzzleSet, PuzzleId, PuzzleSet, SetId, SetProgress};

use super::SqliteRepository;
use super::mapping::{map_sqlx, ser, set_id_from_i64, set_id_to_i64, u32_from_i64};
use crate::repository::{ProgressSnapshot, ProgressStore, SetStore, StorageError};

fn progress_from_row(row: &SqliteRow) -> Result<ProgressSnapshot, StorageError> {
    Ok(ProgressSnapshot {
        progress: SetProgress::new(
            u32_from_i64("repeat_index", row.try_get::<i64, _>("repeat_index").map_err(ser)?)?,
            u32_from_i64("puzzle_index", row.try_get::<i64, _>("puzzle_index").map_err(ser)?)?,
        ),
        size: u32_from_i64("size", row.try_get::<i64, _>("size").map_err(ser)?)?,
        repeats: u32_from_i64("repeats", row.try_get::<i64, _>("repeats").map_err(ser)?)?,
    })
}

impl SqliteRepository {
    async fn load_set(&self, row: &SqliteRow) -> Result<PuzzleSet, StorageError> {
        let id = set_id_from_i64(row.try_get::<i64, _>("id").map_err(ser)?)?;
        let snapshot = progress_from_row(row)?;
        let target_rating =
            u32_from_i64("target_rating", row.try_get::<i64, _>("target_rating").map_err(ser)?)?;
        let created_at: DateTime<Utc> = row.try_get("created_at").map_err(ser)?;

        let members = sqlx::query(
            r"
            SELECT puzzle_id FROM set_puzzles
            WHERE set_id = ?1
            ORDER BY position ASC
            ",
        )
        .bind(set_id_to_i64(id)?)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        let mut puzzle_ids = Vec::with_capacity(members.len());
        for member in members {
            let raw: String = member.try_get("puzzle_id").map_err(ser)?;
            puzzle_ids.push(PuzzleId::new(raw).map_err(ser)?);
        }
        if u32::try_from(puzzle_ids.len()).ok() != Some(snapshot.size) {
            return Err(StorageError::Serialization(format!(
                "set {id} has {} puzzles but size {}",
                puzzle_ids.len(),
                snapshot.size
            )));
        }

        PuzzleSet::from_persisted(
            id,
            target_rating,
            snapshot.repeats,
            puzzle_ids,
            snapshot.progress,
            created_at,
        )
        .map_err(ser)
    }
}

#[async_trait::async_trait]
impl SetStore for SqliteRepository {
    async fn create_set(
        &self,
        set: NewPuzzleSet,
        created_at: DateTime<Utc>,
    ) -> Result<SetId, StorageError> {
        let size = set.validate().map_err(ser)?;

        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        let res = sqlx::query(
            r"
            INSERT INTO puzzle_sets (target_rating, size, repeats, repeat_index, puzzle_index, created_at)
            VALUES (?1, ?2, ?3, 0, 0, ?4)
            ",
        )
        .bind(i64::from(set.target_rating))
        .bind(i64::from(size))
        .bind(i64::from(set.repeats))
        .bind(created_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;
        let set_id = res.last_insert_rowid();

        for (position, puzzle_id) in set.puzzle_ids.iter().enumerate() {
            let position = i64::try_from(position)
                .map_err(|_| StorageError::Serialization("position overflow".into()))?;
            sqlx::query(
                r"
                INSERT INTO set_puzzles (set_id, position, puzzle_id)
                VALUES (?1, ?2, ?3)
                ",
            )
            .bind(set_id)
            .bind(position)
            .bind(puzzle_id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        }

        tx.commit().await.map_err(map_sqlx)?;
        set_id_from_i64(set_id)
    }

    async fn get_set(&self, id: SetId) -> Result<PuzzleSet, StorageError> {
        let row = sqlx::query(
            r"
            SELECT id, target_rating, size, repeats, repeat_index, puzzle_index, created_at
            FROM puzzle_sets WHERE id = ?1
            ",
        )
        .bind(set_id_to_i64(id)?)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?
        .ok_or(StorageError::NotFound)?;

        self.load_set(&row).await
    }

    async fn list_sets(&self, limit: u32) -> Result<Vec<PuzzleSet>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT id, target_rating, size, repeats, repeat_index, puzzle_index, created_at
            FROM puzzle_sets
            ORDER BY id DESC
            LIMIT ?1
            ",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        let mut sets = Vec::with_capacity(rows.len());
        for row in &rows {
            sets.push(self.load_set(row).await?);
        }
        Ok(sets)
    }
}

#[async_trait::async_trait]
impl ProgressStore for SqliteRepository {
    async fn get_progress(&self, set_id: SetId) -> Result<ProgressSnapshot, StorageError> {
        let row = sqlx::query(
            r"
            SELECT size, repeats, repeat_index, puzzle_index
            FROM puzzle_sets WHERE id = ?1
            ",
        )
        .bind(set_id_to_i64(set_id)?)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?
        .ok_or(StorageError::NotFound)?;

        progress_from_row(&row)
    }

    async fn set_progress(&self, set_id: SetId, progress: SetProgress) -> Result<(), StorageError> {
        let res = sqlx::query(
            r"
            UPDATE puzzle_sets
            SET repeat_index = ?2, puzzle_index = ?3
            WHERE id = ?1
            ",
        )
        .bind(set_id_to_i64(set_id)?)
        .bind(i64::from(progress.repeat_index))
        .bind(i64::from(progress.puzzle_index))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }
}
