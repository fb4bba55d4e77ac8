//! Cadence operations CLI.
//!
//! Runs the billing jobs and staff corrections that have no other front
//! end: the overdue sweep, statements, reconciliation, and manual credit
//! handling.

mod logging;

use anyhow::{Context, bail};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

use cadence_core::ledger::StudentStatement;
use cadence_db::{BillingSettings, Repositories, connect};
use cadence_shared::AppConfig;
use cadence_shared::types::{
    InvoiceId, LedgerApplicationId, LedgerEntryId, StudentId, UserId,
};

#[derive(Parser)]
#[command(name = "cadence")]
#[command(about = "Billing ledger operations for Cadence")]
#[command(version)]
struct Cli {
    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Mark sent invoices past their due date as overdue
    MarkOverdue {
        /// Reference date (default: today in the school timezone)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Print a student's statement
    Statement {
        /// Student id
        #[arg(long)]
        student: Uuid,
        /// First day included
        #[arg(long)]
        from: Option<NaiveDate>,
        /// Last day included
        #[arg(long)]
        to: Option<NaiveDate>,
    },

    /// Check stored balances against the transaction history
    Reconcile {
        /// Only this student (default: every student with a balance)
        #[arg(long)]
        student: Option<Uuid>,
    },

    /// Apply available credit to an invoice, oldest credit first
    ApplyCredit {
        /// Student whose credit is applied
        #[arg(long)]
        student: Uuid,
        /// Invoice id, must belong to the student
        #[arg(long)]
        invoice: Uuid,
        /// Amount to apply (default: as much as the balance needs)
        #[arg(long)]
        amount: Option<Decimal>,
        /// Staff member performing the operation
        #[arg(long)]
        actor: Uuid,
    },

    /// Take an applied credit back off its invoice
    Decouple {
        /// Application id
        #[arg(long)]
        application: Uuid,
        /// Why the credit is taken back
        #[arg(long)]
        reason: String,
        /// Staff member performing the operation
        #[arg(long)]
        actor: Uuid,
    },

    /// Reverse a ledger entry without active applications
    Reverse {
        /// Entry id
        #[arg(long)]
        entry: Uuid,
        /// Why the entry is reversed
        #[arg(long)]
        reason: String,
        /// Staff member performing the operation
        #[arg(long)]
        actor: Uuid,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = AppConfig::load().context("failed to load configuration")?;
    logging::init(&config.logging);

    let settings = BillingSettings::from_config(&config.billing)?;
    let currency = config.billing.currency;
    let db = connect(&config.database).await?;
    let repos = Repositories::new(db, settings.clone());

    match cli.command {
        Command::MarkOverdue { date } => {
            let today = date.unwrap_or_else(|| settings.today(Utc::now()));
            let marked = repos.invoices.mark_overdue(today).await?;
            if cli.json {
                let ids: Vec<Uuid> = marked.iter().map(|id| id.into_inner()).collect();
                println!("{}", serde_json::to_string_pretty(&ids)?);
            } else {
                println!("{} invoice(s) marked overdue as of {today}", marked.len());
            }
        }
        Command::Statement { student, from, to } => {
            let statement = repos
                .statements
                .statement(StudentId::from_uuid(student), currency, from, to)
                .await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&statement)?);
            } else {
                print_statement(&statement);
            }
        }
        Command::Reconcile { student } => {
            let students = match student {
                Some(id) => vec![StudentId::from_uuid(id)],
                None => repos.statements.students().await?,
            };
            let mut results = Vec::with_capacity(students.len());
            for student_id in &students {
                results.push(repos.statements.reconcile(*student_id).await?);
            }
            let inconsistent = results.iter().filter(|r| !r.is_consistent()).count();
            info!(students = students.len(), inconsistent, "reconciliation finished");

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                for result in results.iter().filter(|r| !r.is_consistent()) {
                    println!("{}:", result.student_id);
                    for discrepancy in &result.discrepancies {
                        println!("  {discrepancy:?}");
                    }
                }
            }
            if inconsistent > 0 {
                bail!("{inconsistent} of {} student(s) have discrepancies", students.len());
            }
            if !cli.json {
                println!("{} student(s) reconciled", students.len());
            }
        }
        Command::ApplyCredit {
            student,
            invoice,
            amount,
            actor,
        } => {
            let outcome = repos
                .ledger
                .apply_credit(
                    StudentId::from_uuid(student),
                    InvoiceId::from_uuid(invoice),
                    amount,
                    UserId::from_uuid(actor),
                )
                .await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                println!(
                    "applied {} from {} entr{}, invoice balance {} ({})",
                    outcome.total_applied,
                    outcome.applications.len(),
                    if outcome.applications.len() == 1 { "y" } else { "ies" },
                    outcome.invoice.balance,
                    outcome.invoice.status,
                );
            }
        }
        Command::Decouple {
            application,
            reason,
            actor,
        } => {
            let outcome = repos
                .ledger
                .decouple(
                    LedgerApplicationId::from_uuid(application),
                    &reason,
                    UserId::from_uuid(actor),
                )
                .await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                println!(
                    "decoupled {}, invoice balance {} ({})",
                    outcome.decoupling.amount, outcome.invoice.balance, outcome.invoice.status,
                );
            }
        }
        Command::Reverse {
            entry,
            reason,
            actor,
        } => {
            let entry_id = LedgerEntryId::from_uuid(entry);
            let outcome = repos
                .ledger
                .reverse_entry(entry_id, &reason, UserId::from_uuid(actor))
                .await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                println!("entry {entry_id} reversed");
            }
        }
    }

    Ok(())
}

fn print_statement(statement: &StudentStatement) {
    println!("Statement for student {}", statement.student_id);
    println!("{:>12}  {:<40} {:>12} {:>12} {:>12}", "date", "description", "debit", "credit", "balance");
    println!("{:>12}  {:<40} {:>12} {:>12} {:>12}", "", "opening balance", "", "", statement.opening_balance.amount);
    for line in &statement.lines {
        println!(
            "{:>12}  {:<40} {:>12} {:>12} {:>12}",
            line.date, line.description, line.debit, line.credit, line.running_balance
        );
    }
    println!(
        "{:>12}  {:<40} {:>12} {:>12} {:>12}",
        "", "closing balance", statement.total_debit.amount, statement.total_credit.amount,
        statement.closing_balance.amount
    );
    println!("available credit: {}", statement.available_credit.amount);
}
