use sqlx::Row;
use sqlx::error::ErrorKind;
use woodpecker_core::model::{AccuracyRecord, PuzzleId, PuzzleRecord, SetId};

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

/// Map driver errors onto the storage taxonomy.
pub(crate) fn map_sqlx(e: sqlx::Error) -> StorageError {
    match &e {
        sqlx::Error::RowNotFound => StorageError::NotFound,
        sqlx::Error::Database(db) => match db.kind() {
            ErrorKind::ForeignKeyViolation => StorageError::NotFound,
            ErrorKind::UniqueViolation | ErrorKind::CheckViolation => StorageError::Conflict,
            _ => StorageError::Connection(e.to_string()),
        },
        _ => StorageError::Connection(e.to_string()),
    }
}

pub(crate) fn set_id_to_i64(id: SetId) -> Result<i64, StorageError> {
    i64::try_from(id.value()).map_err(|_| StorageError::Serialization("set_id overflow".into()))
}

pub(crate) fn set_id_from_i64(v: i64) -> Result<SetId, StorageError> {
    u64::try_from(v)
        .map(SetId::new)
        .map_err(|_| StorageError::Serialization("set_id sign overflow".into()))
}

pub(crate) fn u32_from_i64(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

pub(crate) fn u64_from_i64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

pub(crate) fn u64_to_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

pub(crate) fn map_puzzle_row(row: &sqlx::sqlite::SqliteRow) -> Result<PuzzleRecord, StorageError> {
    let id = PuzzleId::new(row.try_get::<String, _>("id").map_err(ser)?).map_err(ser)?;
    let fen: String = row.try_get("fen").map_err(ser)?;
    let solution: String = row.try_get("solution").map_err(ser)?;
    let rating = u32_from_i64("rating", row.try_get::<i64, _>("rating").map_err(ser)?)?;

    PuzzleRecord::from_uci_line(id, fen, &solution, rating).map_err(ser)
}

pub(crate) fn map_accuracy_row(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<AccuracyRecord, StorageError> {
    Ok(AccuracyRecord {
        set_id: set_id_from_i64(row.try_get::<i64, _>("set_id").map_err(ser)?)?,
        repeat_index: u32_from_i64(
            "repeat_index",
            row.try_get::<i64, _>("repeat_index").map_err(ser)?,
        )?,
        correct: u32_from_i64("correct", row.try_get::<i64, _>("correct").map_err(ser)?)?,
        incorrect: u32_from_i64("incorrect", row.try_get::<i64, _>("incorrect").map_err(ser)?)?,
        time_taken_secs: u64_from_i64(
            "time_taken_secs",
            row.try_get::<i64, _>("time_taken_secs").map_err(ser)?,
        )?,
    })
}
