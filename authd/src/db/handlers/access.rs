//! Database repository for endpoint access rules.

use crate::db::{errors::Result, models::access::EndpointAccessDBResponse};
use sqlx::PgConnection;
use tracing::instrument;

pub struct EndpointAccess<'c> {
    db: &'c mut PgConnection,
}

impl<'c> EndpointAccess<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self), err)]
    pub async fn list(&mut self) -> Result<Vec<EndpointAccessDBResponse>> {
        let rows = sqlx::query_as::<_, EndpointAccessDBResponse>("SELECT endpoint, is_admin FROM endpoint_access ORDER BY endpoint")
            .fetch_all(&mut *self.db)
            .await?;

        Ok(rows)
    }

    #[instrument(skip(self), err)]
    pub async fn upsert(&mut self, endpoint: &str, is_admin: bool) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO endpoint_access (endpoint, is_admin) VALUES ($1, $2)
            ON CONFLICT (endpoint) DO UPDATE SET is_admin = EXCLUDED.is_admin
            "#,
        )
        .bind(endpoint)
        .bind(is_admin)
        .execute(&mut *self.db)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::PgPool;

    #[sqlx::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_upsert_and_list(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = EndpointAccess::new(&mut conn);

        repo.upsert("/users/v1/delete", true).await.unwrap();
        repo.upsert("/users/v1/get", false).await.unwrap();
        repo.upsert("/users/v1/get", true).await.unwrap();

        let rows = repo.list().await.unwrap();
        assert_eq!(
            rows,
            vec![
                EndpointAccessDBResponse {
                    endpoint: "/users/v1/delete".to_string(),
                    is_admin: true,
                },
                EndpointAccessDBResponse {
                    endpoint: "/users/v1/get".to_string(),
                    is_admin: true,
                },
            ]
        );
    }
}
