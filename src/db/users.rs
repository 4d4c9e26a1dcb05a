//! Database queries for users.

use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use super::{DbError, DbResultExt};
use crate::models::User;
use crate::store::UserRepository;

pub struct SqliteUserRepository;

#[async_trait]
impl UserRepository<SqliteConnection> for SqliteUserRepository {
    async fn upsert(&self, conn: &mut SqliteConnection, users: &[User]) -> Result<(), DbError> {
        for user in users {
            sqlx::query(
                r#"
                INSERT INTO users (id, username, is_active, team_name)
                VALUES (?, ?, ?, ?)
                ON CONFLICT (id) DO UPDATE
                SET username = excluded.username,
                    is_active = excluded.is_active,
                    team_name = excluded.team_name
                "#,
            )
            .bind(&user.id)
            .bind(&user.username)
            .bind(user.is_active)
            .bind(&user.team_name)
            .execute(&mut *conn)
            .await
            .context(format!("upsert user {}", user.id))?;
        }

        Ok(())
    }

    async fn get_by_id(
        &self,
        conn: &mut SqliteConnection,
        user_id: &str,
    ) -> Result<Option<User>, DbError> {
        sqlx::query_as::<_, User>(
            "SELECT id, username, is_active, team_name FROM users WHERE id = ?",
        )
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await
        .context("get user")
    }

    async fn active_candidates(
        &self,
        conn: &mut SqliteConnection,
        team_name: &str,
        excluded_ids: &[String],
    ) -> Result<Vec<User>, DbError> {
        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT id, username, is_active, team_name FROM users WHERE is_active = 1 AND team_name = ",
        );
        query.push_bind(team_name);

        if !excluded_ids.is_empty() {
            query.push(" AND id NOT IN (");
            let mut ids = query.separated(", ");
            for id in excluded_ids {
                ids.push_bind(id.as_str());
            }
            ids.push_unseparated(")");
        }

        query.push(" ORDER BY id");

        query
            .build_query_as::<User>()
            .fetch_all(&mut *conn)
            .await
            .context("get active candidates")
    }

    async fn set_active(
        &self,
        conn: &mut SqliteConnection,
        user_id: &str,
        is_active: bool,
    ) -> Result<Option<User>, DbError> {
        sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET is_active = ?
            WHERE id = ?
            RETURNING id, username, is_active, team_name
            "#,
        )
        .bind(is_active)
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await
        .context("update user active flag")
    }
}
