//! `SQLite` implementation of the `ReasonSlotRepository`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::domain::models::{
    timeline, MachineId, MachineModeId, MachineObservationStateId, ReasonId, ReasonSlot,
    ReasonSource, TimeRange,
};
use crate::domain::ports::{ReasonSlotRepository, RepositoryError, RepositoryResult};

const SLOT_COLUMNS: &str = "id, machine_id, range_start, range_end, machine_mode, \
     machine_observation_state, reason, reason_details, reason_score, reason_source, \
     overwrite_required, reason_data, auto_reason_count, extra_manual, version";

pub struct SqliteSlotRepository {
    pool: SqlitePool,
}

impl SqliteSlotRepository {
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch_one_where(
        &self,
        condition: &str,
        machine_id: MachineId,
        at: DateTime<Utc>,
    ) -> RepositoryResult<Option<ReasonSlot>> {
        let sql = format!(
            "SELECT {SLOT_COLUMNS} FROM reason_slots WHERE machine_id = ? AND {condition} LIMIT 1"
        );
        let row: Option<SlotRow> = sqlx::query_as(&sql)
            .bind(i64::from(machine_id.0))
            .bind(at.timestamp_micros())
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }
}

async fn stored_version(conn: &mut SqliteConnection, id: Uuid) -> RepositoryResult<Option<u32>> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT version FROM reason_slots WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(conn)
        .await?;
    row.map(|(v,)| to_u32("version", v)).transpose()
}

/// Fails with `StaleSlot` unless `slot` is stored with its version; a
/// deleted slot is reported with version 0.
async fn check_version(conn: &mut SqliteConnection, slot: &ReasonSlot) -> RepositoryResult<()> {
    match stored_version(conn, slot.id).await? {
        Some(found) if found == slot.version => Ok(()),
        found => Err(RepositoryError::StaleSlot {
            id: slot.id,
            expected: slot.version,
            found: found.unwrap_or(0),
        }),
    }
}

async fn insert_row(
    conn: &mut SqliteConnection,
    slot: &ReasonSlot,
    version: u32,
) -> RepositoryResult<()> {
    sqlx::query(
        r"INSERT INTO reason_slots (id, machine_id, range_start, range_end, machine_mode,
               machine_observation_state, reason, reason_details, reason_score, reason_source,
               overwrite_required, reason_data, auto_reason_count, extra_manual, version,
               updated_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(slot.id.to_string())
    .bind(i64::from(slot.machine_id.0))
    .bind(slot.range.lower().timestamp_micros())
    .bind(slot.range.upper().timestamp_micros())
    .bind(i64::from(slot.machine_mode.0))
    .bind(i64::from(slot.machine_observation_state.0))
    .bind(slot.reason.map(|r| i64::from(r.0)))
    .bind(&slot.reason_details)
    .bind(slot.reason_score)
    .bind(slot.reason_source.as_str())
    .bind(slot.overwrite_required)
    .bind(serde_json::to_string(&slot.reason_data)?)
    .bind(i64::from(slot.auto_reason_count))
    .bind(slot.extra_manual)
    .bind(i64::from(version))
    .bind(Utc::now().to_rfc3339())
    .execute(conn)
    .await?;
    Ok(())
}

async fn update_row(conn: &mut SqliteConnection, slot: &ReasonSlot) -> RepositoryResult<()> {
    sqlx::query(
        r"UPDATE reason_slots SET range_start = ?, range_end = ?, machine_mode = ?,
               machine_observation_state = ?, reason = ?, reason_details = ?, reason_score = ?,
               reason_source = ?, overwrite_required = ?, reason_data = ?,
               auto_reason_count = ?, extra_manual = ?, version = version + 1, updated_at = ?
           WHERE id = ?",
    )
    .bind(slot.range.lower().timestamp_micros())
    .bind(slot.range.upper().timestamp_micros())
    .bind(i64::from(slot.machine_mode.0))
    .bind(i64::from(slot.machine_observation_state.0))
    .bind(slot.reason.map(|r| i64::from(r.0)))
    .bind(&slot.reason_details)
    .bind(slot.reason_score)
    .bind(slot.reason_source.as_str())
    .bind(slot.overwrite_required)
    .bind(serde_json::to_string(&slot.reason_data)?)
    .bind(i64::from(slot.auto_reason_count))
    .bind(slot.extra_manual)
    .bind(Utc::now().to_rfc3339())
    .bind(slot.id.to_string())
    .execute(conn)
    .await?;
    Ok(())
}

async fn delete_row(conn: &mut SqliteConnection, id: Uuid) -> RepositoryResult<()> {
    sqlx::query("DELETE FROM reason_slots WHERE id = ?")
        .bind(id.to_string())
        .execute(conn)
        .await?;
    Ok(())
}

#[async_trait]
impl ReasonSlotRepository for SqliteSlotRepository {
    async fn insert(&self, slot: &ReasonSlot) -> RepositoryResult<ReasonSlot> {
        let mut tx = self.pool.begin().await?;

        let (overlapping,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM reason_slots WHERE machine_id = ? AND range_start < ? AND range_end > ?",
        )
        .bind(i64::from(slot.machine_id.0))
        .bind(slot.range.upper().timestamp_micros())
        .bind(slot.range.lower().timestamp_micros())
        .fetch_one(&mut *tx)
        .await?;
        if overlapping > 0 {
            return Err(RepositoryError::PartitionViolation {
                machine_id: slot.machine_id,
                detail: format!("{} overlaps {overlapping} stored slot(s)", slot.range),
            });
        }

        insert_row(&mut tx, slot, 1).await?;
        tx.commit().await?;

        Ok(ReasonSlot {
            version: 1,
            ..slot.clone()
        })
    }

    async fn get(&self, id: Uuid) -> RepositoryResult<Option<ReasonSlot>> {
        let sql = format!("SELECT {SLOT_COLUMNS} FROM reason_slots WHERE id = ?");
        let row: Option<SlotRow> = sqlx::query_as(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn find_at(
        &self,
        machine_id: MachineId,
        at: DateTime<Utc>,
    ) -> RepositoryResult<Option<ReasonSlot>> {
        let micros = at.timestamp_micros();
        let sql = format!(
            "SELECT {SLOT_COLUMNS} FROM reason_slots \
             WHERE machine_id = ? AND range_start <= ? AND range_end > ? LIMIT 1"
        );
        let row: Option<SlotRow> = sqlx::query_as(&sql)
            .bind(i64::from(machine_id.0))
            .bind(micros)
            .bind(micros)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn find_in_range(
        &self,
        machine_id: MachineId,
        range: &TimeRange,
    ) -> RepositoryResult<Vec<ReasonSlot>> {
        let sql = format!(
            "SELECT {SLOT_COLUMNS} FROM reason_slots \
             WHERE machine_id = ? AND range_start < ? AND range_end > ? ORDER BY range_start"
        );
        let rows: Vec<SlotRow> = sqlx::query_as(&sql)
            .bind(i64::from(machine_id.0))
            .bind(range.upper().timestamp_micros())
            .bind(range.lower().timestamp_micros())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn find_all(&self, machine_id: MachineId) -> RepositoryResult<Vec<ReasonSlot>> {
        let sql = format!(
            "SELECT {SLOT_COLUMNS} FROM reason_slots WHERE machine_id = ? ORDER BY range_start"
        );
        let rows: Vec<SlotRow> = sqlx::query_as(&sql)
            .bind(i64::from(machine_id.0))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn find_ending_at(
        &self,
        machine_id: MachineId,
        at: DateTime<Utc>,
    ) -> RepositoryResult<Option<ReasonSlot>> {
        self.fetch_one_where("range_end = ?", machine_id, at).await
    }

    async fn find_starting_at(
        &self,
        machine_id: MachineId,
        at: DateTime<Utc>,
    ) -> RepositoryResult<Option<ReasonSlot>> {
        self.fetch_one_where("range_start = ?", machine_id, at).await
    }

    async fn replace(
        &self,
        original: &ReasonSlot,
        mut replacements: Vec<ReasonSlot>,
    ) -> RepositoryResult<Vec<ReasonSlot>> {
        replacements.sort_by_key(|s| s.range.lower());
        timeline::check_tiles(original.machine_id, &original.range, &replacements)?;

        let mut tx = self.pool.begin().await?;
        check_version(&mut tx, original).await?;

        // The kept row moves first so that no insert collides with its start
        match replacements.iter().find(|s| s.id == original.id) {
            Some(kept) => update_row(&mut tx, kept).await?,
            None => delete_row(&mut tx, original.id).await?,
        }
        for slot in replacements.iter_mut() {
            if slot.id == original.id {
                slot.version = original.version + 1;
            } else {
                insert_row(&mut tx, slot, 1).await?;
                slot.version = 1;
            }
        }

        tx.commit().await?;
        Ok(replacements)
    }

    async fn merge(&self, first: &ReasonSlot, second: &ReasonSlot) -> RepositoryResult<ReasonSlot> {
        let Some(range) = first
            .range
            .span(&second.range)
            .filter(|_| first.machine_id == second.machine_id)
        else {
            return Err(RepositoryError::PartitionViolation {
                machine_id: first.machine_id,
                detail: format!("{} does not follow {}", second.range, first.range),
            });
        };

        let mut tx = self.pool.begin().await?;
        check_version(&mut tx, first).await?;
        check_version(&mut tx, second).await?;

        delete_row(&mut tx, second.id).await?;
        let merged = ReasonSlot {
            range,
            ..first.clone()
        };
        update_row(&mut tx, &merged).await?;
        tx.commit().await?;

        Ok(ReasonSlot {
            version: first.version + 1,
            ..merged
        })
    }

    async fn machines(&self) -> RepositoryResult<Vec<MachineId>> {
        let rows: Vec<(i64,)> =
            sqlx::query_as("SELECT DISTINCT machine_id FROM reason_slots ORDER BY machine_id")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter()
            .map(|(id,)| to_u32("machine_id", id).map(MachineId))
            .collect()
    }
}

#[derive(sqlx::FromRow)]
struct SlotRow {
    id: String,
    machine_id: i64,
    range_start: i64,
    range_end: i64,
    machine_mode: i64,
    machine_observation_state: i64,
    reason: Option<i64>,
    reason_details: Option<String>,
    reason_score: f64,
    reason_source: String,
    overwrite_required: bool,
    reason_data: String,
    auto_reason_count: i64,
    extra_manual: bool,
    version: i64,
}

fn to_u32(column: &str, value: i64) -> RepositoryResult<u32> {
    u32::try_from(value)
        .map_err(|_| RepositoryError::InvalidData(format!("{column} out of range: {value}")))
}

fn to_datetime(column: &str, micros: i64) -> RepositoryResult<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| RepositoryError::InvalidData(format!("{column} out of range: {micros}")))
}

impl TryFrom<SlotRow> for ReasonSlot {
    type Error = RepositoryError;

    fn try_from(row: SlotRow) -> Result<Self, Self::Error> {
        let range = TimeRange::new(
            to_datetime("range_start", row.range_start)?,
            to_datetime("range_end", row.range_end)?,
        )?;
        let reason_data: BTreeMap<String, serde_json::Value> =
            serde_json::from_str(&row.reason_data)?;

        Ok(Self {
            id: Uuid::parse_str(&row.id)?,
            machine_id: MachineId(to_u32("machine_id", row.machine_id)?),
            range,
            machine_mode: MachineModeId(to_u32("machine_mode", row.machine_mode)?),
            machine_observation_state: MachineObservationStateId(to_u32(
                "machine_observation_state",
                row.machine_observation_state,
            )?),
            reason: row
                .reason
                .map(|r| to_u32("reason", r).map(ReasonId))
                .transpose()?,
            reason_details: row.reason_details,
            reason_score: row.reason_score,
            reason_source: row.reason_source.parse::<ReasonSource>()?,
            overwrite_required: row.overwrite_required,
            reason_data,
            auto_reason_count: to_u32("auto_reason_count", row.auto_reason_count)?,
            extra_manual: row.extra_manual,
            version: to_u32("version", row.version)?,
        })
    }
}
