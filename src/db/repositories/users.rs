use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use crate::{
    db::{
        helpers::{format_datetime, to_u32},
        Database,
    },
    models::UserProfile,
};

impl Database {
    pub async fn get_user_profile(&self, user_id: &str) -> Result<Option<UserProfile>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let row = conn
                .query_row(
                    "SELECT id, daily_goal_hours, current_streak, focus_score, peak_performance_time
                     FROM users
                     WHERE id = ?1",
                    params![user_id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, Option<i64>>(1)?,
                            row.get::<_, i64>(2)?,
                            row.get::<_, i64>(3)?,
                            row.get::<_, Option<String>>(4)?,
                        ))
                    },
                )
                .optional()?;

            let Some((id, goal, streak, score, peak)) = row else {
                return Ok(None);
            };

            Ok(Some(UserProfile {
                user_id: id,
                daily_goal_hours: goal.map(|g| to_u32(g, "daily_goal_hours")).transpose()?,
                current_streak: to_u32(streak, "current_streak")?,
                focus_score: to_u32(score, "focus_score")?,
                peak_performance_time: peak,
            }))
        })
        .await
    }

    pub async fn upsert_user_profile(&self, profile: &UserProfile) -> Result<()> {
        let profile = profile.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO users (id, daily_goal_hours, current_streak, focus_score, peak_performance_time, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                     daily_goal_hours = excluded.daily_goal_hours,
                     current_streak = excluded.current_streak,
                     focus_score = excluded.focus_score,
                     peak_performance_time = excluded.peak_performance_time,
                     updated_at = excluded.updated_at",
                params![
                    profile.user_id,
                    profile.daily_goal_hours,
                    profile.current_streak,
                    profile.focus_score,
                    profile.peak_performance_time,
                    format_datetime(Utc::now()),
                ],
            )?;
            Ok(())
        })
        .await
    }
}
