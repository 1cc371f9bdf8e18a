use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::{
    db::{
        helpers::{
            decode_interruptions, encode_interruptions, format_datetime,
            parse_optional_datetime, to_u32,
        },
        Database,
    },
    models::{Interruption, SessionRecord},
};

const SESSION_COLUMNS: &str =
    "id, user_id, start_time, end_time, duration, completed, interruptions";

fn row_to_session(row: &Row) -> Result<SessionRecord> {
    let start_time: Option<String> = row.get("start_time")?;
    let end_time: Option<String> = row.get("end_time")?;
    let duration: Option<i64> = row.get("duration")?;
    let interruptions: String = row.get("interruptions")?;

    Ok(SessionRecord {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        start_time: parse_optional_datetime(start_time, "start_time")?,
        end_time: parse_optional_datetime(end_time, "end_time")?,
        duration: duration.map(|d| to_u32(d, "duration")).transpose()?,
        completed: row.get("completed")?,
        interruptions: decode_interruptions(&interruptions)?,
    })
}

impl Database {
    pub async fn insert_session(&self, session: &SessionRecord) -> Result<()> {
        let record = session.clone();
        self.execute(move |conn| {
            let now = format_datetime(Utc::now());
            conn.execute(
                "INSERT INTO focus_sessions (id, user_id, start_time, end_time, duration, completed, interruptions, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                params![
                    record.id,
                    record.user_id,
                    record.start_time.map(format_datetime),
                    record.end_time.map(format_datetime),
                    record.duration,
                    record.completed,
                    encode_interruptions(&record.interruptions)?,
                    now,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM focus_sessions WHERE id = ?1"
            ))?;

            let mut rows = stmt.query(params![session_id])?;
            let session = match rows.next()? {
                Some(row) => Some(row_to_session(row)?),
                None => None,
            };
            Ok(session)
        })
        .await
    }

    pub async fn sessions_since(
        &self,
        user_id: &str,
        day_start: DateTime<Utc>,
    ) -> Result<Vec<SessionRecord>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS}
                 FROM focus_sessions
                 WHERE user_id = ?1 AND start_time >= ?2
                 ORDER BY start_time ASC"
            ))?;

            let mut rows = stmt.query(params![user_id, format_datetime(day_start)])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(row_to_session(row)?);
            }

            Ok(sessions)
        })
        .await
    }

    /// Stamps the end time and the whole minutes since start. Returns the
    /// owning user's id.
    pub async fn complete_session(
        &self,
        session_id: &str,
        end_time: DateTime<Utc>,
    ) -> Result<String> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let session = conn
                .query_row(
                    &format!("SELECT {SESSION_COLUMNS} FROM focus_sessions WHERE id = ?1"),
                    params![session_id],
                    |row| Ok(row_to_session(row)),
                )
                .optional()?
                .ok_or_else(|| anyhow!("Session not found"))??;

            if session.completed {
                return Err(anyhow!("Session {session_id} already completed"));
            }

            let minutes = session
                .start_time
                .map_or(0, |start| (end_time - start).num_minutes().max(0));

            conn.execute(
                "UPDATE focus_sessions
                 SET end_time = ?1,
                     duration = ?2,
                     completed = 1,
                     updated_at = ?3
                 WHERE id = ?4",
                params![
                    format_datetime(end_time),
                    minutes,
                    format_datetime(Utc::now()),
                    session_id,
                ],
            )?;

            Ok(session.user_id)
        })
        .await
    }

    /// Appends to the session's interruption list. Returns the owning user's id.
    pub async fn append_interruption(
        &self,
        session_id: &str,
        interruption: Interruption,
    ) -> Result<String> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let (user_id, raw): (String, String) = tx
                .query_row(
                    "SELECT user_id, interruptions FROM focus_sessions WHERE id = ?1",
                    params![session_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?
                .ok_or_else(|| anyhow!("Session not found"))?;

            let mut interruptions = decode_interruptions(&raw)?;
            interruptions.push(interruption);

            tx.execute(
                "UPDATE focus_sessions
                 SET interruptions = ?1,
                     updated_at = ?2
                 WHERE id = ?3",
                params![
                    encode_interruptions(&interruptions)?,
                    format_datetime(Utc::now()),
                    session_id,
                ],
            )?;
            tx.commit()?;

            Ok(user_id)
        })
        .await
    }
}
