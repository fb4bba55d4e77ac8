//! Database migration runner for the Cadence billing tables.
//!
//! Usage:
//!   migrator up      - Apply pending migrations
//!   migrator down    - Roll back the last migration
//!   migrator status  - List applied and pending migrations
//!   migrator fresh   - Drop all tables and migrate from scratch
//!
//! The connection string is read from `DATABASE_URL`.

use cadence_db::migration::Migrator;
use sea_orm_migration::prelude::*;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // the migrator CLI installs its own tracing subscriber
    cli::run_cli(Migrator).await;
}
