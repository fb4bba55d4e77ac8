//! Database layer with `SeaORM` entities and repositories.
//!
//! This crate provides:
//! - `SeaORM` entity definitions for the billing tables
//! - Repositories that run ledger and invoice operations atomically
//! - Bounded retry of conflicting transactions
//! - Database migrations

pub mod entities;
pub mod error;
mod mapping;
pub mod migration;
pub mod repositories;
pub mod retry;
pub mod settings;

pub use error::RepositoryError;
pub use repositories::{
    ConfirmedCreditInvoice, Discrepancy, InvoiceRepository, LedgerRepository, Reconciliation,
    RecordedPayment, StatementRepository,
};
pub use retry::{RetryPolicy, with_retry};
pub use settings::BillingSettings;

use std::time::Duration;

use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use tracing::info;

use cadence_shared::config::DatabaseConfig;

/// Establishes a pooled connection to the database.
///
/// # Errors
///
/// Returns an error if the connection cannot be established.
pub async fn connect(config: &DatabaseConfig) -> Result<DatabaseConnection, DbErr> {
    let mut options = ConnectOptions::new(config.url.clone());
    options
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(Duration::from_secs(10))
        .sqlx_logging(false);
    let db = Database::connect(options).await?;
    info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "database connected"
    );
    Ok(db)
}

/// All repositories sharing one connection pool and one set of billing
/// settings.
#[derive(Debug, Clone)]
pub struct Repositories {
    /// Ledger entries, credit applications and decouplings.
    pub ledger: LedgerRepository,
    /// Invoices and payments.
    pub invoices: InvoiceRepository,
    /// Statements, summaries and reconciliation.
    pub statements: StatementRepository,
}

impl Repositories {
    /// Builds the repositories.
    #[must_use]
    pub fn new(db: DatabaseConnection, settings: BillingSettings) -> Self {
        let ledger = LedgerRepository::new(db.clone(), settings.clone());
        let invoices = InvoiceRepository::new(db.clone(), settings);
        let statements = StatementRepository::new(db, ledger.clone(), invoices.clone());
        Self {
            ledger,
            invoices,
            statements,
        }
    }
}
