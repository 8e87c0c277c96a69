// src/db.rs

use std::time::Duration;

use sqlx::{PgPool, postgres::PgPoolOptions};

use crate::auth::hash_password;
use crate::permissions::Role;

pub async fn connect_pg(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn migrate(db: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(db).await
}

/// Creates the platform operator account once. An existing account with the
/// same email is left untouched, password included.
pub async fn bootstrap_superadmin(db: &PgPool, email: &str, password: &str) -> anyhow::Result<()> {
    let email = email.trim().to_lowercase();
    let password_hash = hash_password(password).map_err(|e| anyhow::anyhow!("{e:?}"))?;

    let inserted = sqlx::query(
        r#"
        INSERT INTO users (clinic_id, name, email, password_hash, role)
        VALUES (NULL, 'Platform Yöneticisi', $1, $2, $3)
        ON CONFLICT (email) DO NOTHING
        "#,
    )
    .bind(&email)
    .bind(&password_hash)
    .bind(Role::SuperAdmin)
    .execute(db)
    .await?
    .rows_affected();

    if inserted > 0 {
        tracing::info!(%email, "super admin account created");
    }
    Ok(())
}
