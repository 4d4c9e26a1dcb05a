//! Database queries for teams.

use async_trait::async_trait;
use sqlx::SqliteConnection;

use super::{DbError, DbResultExt};
use crate::models::{Team, User};
use crate::store::TeamRepository;

pub struct SqliteTeamRepository;

#[async_trait]
impl TeamRepository<SqliteConnection> for SqliteTeamRepository {
    async fn create(&self, conn: &mut SqliteConnection, name: &str) -> Result<(), DbError> {
        sqlx::query("INSERT INTO teams (name) VALUES (?)")
            .bind(name)
            .execute(&mut *conn)
            .await
            .context("insert team")?;

        Ok(())
    }

    async fn get_by_name(
        &self,
        conn: &mut SqliteConnection,
        name: &str,
    ) -> Result<Option<Team>, DbError> {
        let team: Option<(String,)> = sqlx::query_as("SELECT name FROM teams WHERE name = ?")
            .bind(name)
            .fetch_optional(&mut *conn)
            .await
            .context("get team")?;

        let Some((team_name,)) = team else {
            return Ok(None);
        };

        let members: Vec<User> = sqlx::query_as(
            r#"
            SELECT id, username, is_active, team_name
            FROM users
            WHERE team_name = ?
            ORDER BY id
            "#,
        )
        .bind(&team_name)
        .fetch_all(&mut *conn)
        .await
        .context("get team members")?;

        Ok(Some(Team::from_users(team_name, &members)))
    }
}
