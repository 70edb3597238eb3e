use woodpecker_core::model::{AccuracyDelta, AccuracyRecord, SetId};

use super::SqliteRepository;
use super::mapping::{map_accuracy_row, map_sqlx, set_id_to_i64, u64_to_i64};
use crate::repository::{AccuracyStore, StorageError};

#[async_trait::async_trait]
impl AccuracyStore for SqliteRepository {
    async fn increment(
        &self,
        set_id: SetId,
        repeat_index: u32,
        delta: AccuracyDelta,
    ) -> Result<AccuracyRecord, StorageError> {
        // Single upsert so concurrent increments never lose an update.
        let row = sqlx::query(
            r"
            INSERT INTO set_accuracy (set_id, repeat_index, correct, incorrect, time_taken_secs)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(set_id, repeat_index) DO UPDATE SET
                correct = correct + excluded.correct,
                incorrect = incorrect + excluded.incorrect,
                time_taken_secs = time_taken_secs + excluded.time_taken_secs
            RETURNING set_id, repeat_index, correct, incorrect, time_taken_secs
            ",
        )
        .bind(set_id_to_i64(set_id)?)
        .bind(i64::from(repeat_index))
        .bind(i64::from(delta.correct))
        .bind(i64::from(delta.incorrect))
        .bind(u64_to_i64("time_secs", delta.time_secs)?)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx)?;

        map_accuracy_row(&row)
    }

    async fn list_accuracy(&self, set_id: SetId) -> Result<Vec<AccuracyRecord>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT set_id, repeat_index, correct, incorrect, time_taken_secs
            FROM set_accuracy
            WHERE set_id = ?1
            ORDER BY repeat_index ASC
            ",
        )
        .bind(set_id_to_i64(set_id)?)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        rows.iter().map(map_accuracy_row).collect()
    }
}
