//! User persistence.
//!
//! Queries are checked at runtime (`query_as`) so builds do not need a live
//! database or an offline query cache.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::instrument;

use wallcraft_core::{Email, Role, UserId};

use super::{PgStore, RepositoryError, UserStore, conflict_on_unique};
use crate::models::{NewUser, User};

#[derive(sqlx::FromRow)]
struct UserRow {
    id: UserId,
    email: String,
    name: Option<String>,
    role: Role,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct UserCredentialRow {
    #[sqlx(flatten)]
    user: UserRow,
    password_hash: String,
}

impl TryFrom<UserRow> for User {
    type Error = RepositoryError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let email = Email::parse(&row.email).map_err(|e| {
            RepositoryError::DataCorruption(format!("invalid email in database: {e}"))
        })?;

        Ok(Self {
            id: row.id,
            email,
            name: row.name,
            role: row.role,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl UserStore for PgStore {
    #[instrument(skip(self, user), fields(email = %user.email, role = %user.role))]
    async fn create_user(&self, user: NewUser) -> Result<User, RepositoryError> {
        let row: UserRow = sqlx::query_as(
            r"
            INSERT INTO storefront.users (id, email, name, password_hash, role)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, email, name, role, created_at, updated_at
            ",
        )
        .bind(UserId::generate())
        .bind(user.email.as_str())
        .bind(&user.name)
        .bind(&user.password_hash)
        .bind(user.role)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| conflict_on_unique(e, "email"))?;

        row.try_into()
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        let row: Option<UserRow> = sqlx::query_as(
            r"
            SELECT id, email, name, role, created_at, updated_at
            FROM storefront.users
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(User::try_from).transpose()
    }

    async fn get_user_credentials(
        &self,
        email: &Email,
    ) -> Result<Option<(User, String)>, RepositoryError> {
        let row: Option<UserCredentialRow> = sqlx::query_as(
            r"
            SELECT id, email, name, role, created_at, updated_at, password_hash
            FROM storefront.users
            WHERE email = $1
            ",
        )
        .bind(email.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Ok((User::try_from(r.user)?, r.password_hash)))
            .transpose()
    }
}
