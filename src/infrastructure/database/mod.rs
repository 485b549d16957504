//! SeaORM-backed persistence: entities, migrations, repositories.

pub mod entities;
pub mod migrator;
pub mod repositories;

pub use repositories::SeaOrmRepositoryProvider;

use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use tracing::info;

use crate::config::DatabaseSettings;

/// Open the connection pool described by the database settings.
pub async fn init_database(
    settings: &DatabaseSettings,
) -> Result<DatabaseConnection, sea_orm::DbErr> {
    let url = settings.connection_url();
    info!(url = url.as_str(), "connecting to database");

    let mut opts = ConnectOptions::new(&url);
    opts.max_connections(settings.max_connections)
        .sqlx_logging(false);

    Database::connect(opts).await
}
