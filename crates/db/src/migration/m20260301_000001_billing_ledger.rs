//! Initial database migration.
//!
//! Creates the student billing ledger: balances, ledger entries and their
//! applications, invoices, payments, the append-only transaction log and
//! the per-year counters for references and invoice numbers.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();

        // ============================================================
        // PART 1: COUNTERS
        // ============================================================
        db.execute_unprepared(CORRECTION_SEQUENCES_SQL).await?;
        db.execute_unprepared(INVOICE_SEQUENCES_SQL).await?;

        // ============================================================
        // PART 2: BALANCES & LEDGER ENTRIES
        // ============================================================
        db.execute_unprepared(STUDENT_BALANCES_SQL).await?;
        db.execute_unprepared(LEDGER_ENTRIES_SQL).await?;

        // ============================================================
        // PART 3: INVOICES & PAYMENTS
        // ============================================================
        db.execute_unprepared(INVOICES_SQL).await?;
        db.execute_unprepared(INVOICE_LINES_SQL).await?;
        db.execute_unprepared(PAYMENTS_SQL).await?;

        // ============================================================
        // PART 4: APPLICATIONS & AUDIT
        // ============================================================
        db.execute_unprepared(LEDGER_APPLICATIONS_SQL).await?;
        db.execute_unprepared(DECOUPLINGS_SQL).await?;

        // ============================================================
        // PART 5: TRANSACTION LOG
        // ============================================================
        db.execute_unprepared(STUDENT_TRANSACTIONS_SQL).await?;
        db.execute_unprepared(IMMUTABLE_TRANSACTIONS_SQL).await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared(DROP_ALL_SQL).await?;
        Ok(())
    }
}

const CORRECTION_SEQUENCES_SQL: &str = r"
CREATE TABLE correction_sequences (
    year INTEGER PRIMARY KEY,
    last_value INTEGER NOT NULL,
    CONSTRAINT chk_correction_year CHECK (year BETWEEN 1000 AND 9999),
    CONSTRAINT chk_correction_last_value CHECK (last_value BETWEEN 1 AND 9999)
);
";

const INVOICE_SEQUENCES_SQL: &str = r"
CREATE TABLE invoice_sequences (
    series VARCHAR(16) NOT NULL,
    year INTEGER NOT NULL,
    last_value INTEGER NOT NULL,
    PRIMARY KEY (series, year),
    CONSTRAINT chk_invoice_series CHECK (series IN ('standard', 'credit')),
    CONSTRAINT chk_invoice_sequence_year CHECK (year BETWEEN 1000 AND 9999),
    CONSTRAINT chk_invoice_last_value CHECK (last_value >= 1)
);
";

const STUDENT_BALANCES_SQL: &str = r"
CREATE TABLE student_balances (
    student_id UUID PRIMARY KEY,
    balance NUMERIC(19, 2) NOT NULL DEFAULT 0,
    last_sequence BIGINT NOT NULL DEFAULT 0,
    version BIGINT NOT NULL DEFAULT 0,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT chk_last_sequence CHECK (last_sequence >= 0)
);
";

const LEDGER_ENTRIES_SQL: &str = r"
CREATE TABLE ledger_entries (
    id UUID PRIMARY KEY,
    reference VARCHAR(16) NOT NULL UNIQUE,
    description TEXT NOT NULL,
    student_id UUID NOT NULL REFERENCES student_balances(student_id),
    course_id UUID,
    amount NUMERIC(19, 2) NOT NULL,
    entry_type VARCHAR(16) NOT NULL,
    status VARCHAR(32) NOT NULL DEFAULT 'open',
    applied_amount NUMERIC(19, 2) NOT NULL DEFAULT 0,
    version BIGINT NOT NULL DEFAULT 0,
    created_by UUID NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    reversed_by UUID,
    reversed_at TIMESTAMPTZ,
    reversal_reason TEXT,
    CONSTRAINT chk_entry_reference CHECK (reference ~ '^CR-[0-9]{4}-[0-9]{4}$'),
    CONSTRAINT chk_entry_description CHECK (length(trim(description)) > 0),
    CONSTRAINT chk_entry_amount_positive CHECK (amount > 0),
    CONSTRAINT chk_entry_type CHECK (entry_type IN ('credit', 'debit')),
    CONSTRAINT chk_entry_status CHECK (
        status IN ('open', 'partially_applied', 'fully_applied', 'reversed')
    ),
    CONSTRAINT chk_entry_applied_within_amount CHECK (
        applied_amount >= 0 AND applied_amount <= amount
    ),
    CONSTRAINT chk_debit_never_applied CHECK (
        entry_type = 'credit' OR applied_amount = 0
    ),
    CONSTRAINT chk_reversal_complete CHECK (
        (status = 'reversed') = (reversed_at IS NOT NULL)
        AND (reversed_at IS NULL) = (reversed_by IS NULL)
        AND (reversed_at IS NULL) = (reversal_reason IS NULL)
    )
);

CREATE INDEX idx_ledger_entries_student ON ledger_entries(student_id, created_at, reference);
CREATE INDEX idx_ledger_entries_open_credit ON ledger_entries(student_id)
    WHERE entry_type = 'credit' AND status IN ('open', 'partially_applied');
";

const INVOICES_SQL: &str = r"
CREATE TABLE invoices (
    id UUID PRIMARY KEY,
    number VARCHAR(16) NOT NULL UNIQUE,
    series VARCHAR(16) NOT NULL,
    original_invoice_id UUID REFERENCES invoices(id),
    student_id UUID NOT NULL REFERENCES student_balances(student_id),
    enrollment_id UUID,
    issue_date DATE NOT NULL,
    due_date DATE NOT NULL,
    currency CHAR(3) NOT NULL,
    subtotal NUMERIC(19, 2) NOT NULL,
    vat_amount NUMERIC(19, 2) NOT NULL,
    discount_amount NUMERIC(19, 2) NOT NULL DEFAULT 0,
    total NUMERIC(19, 2) NOT NULL,
    amount_paid NUMERIC(19, 2) NOT NULL DEFAULT 0,
    ledger_credit_applied NUMERIC(19, 2) NOT NULL DEFAULT 0,
    status VARCHAR(16) NOT NULL DEFAULT 'draft',
    version BIGINT NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT chk_invoice_series CHECK (series IN ('standard', 'credit')),
    CONSTRAINT chk_credit_has_original CHECK (
        (series = 'credit') = (original_invoice_id IS NOT NULL)
    ),
    CONSTRAINT chk_invoice_status CHECK (
        status IN ('draft', 'sent', 'paid', 'overdue', 'cancelled')
    ),
    CONSTRAINT chk_invoice_total CHECK (total = subtotal + vat_amount - discount_amount),
    CONSTRAINT chk_invoice_dates CHECK (due_date >= issue_date),
    CONSTRAINT chk_ledger_credit_non_negative CHECK (ledger_credit_applied >= 0),
    CONSTRAINT chk_standard_not_overpaid CHECK (
        series = 'credit'
        OR (amount_paid >= 0 AND amount_paid + ledger_credit_applied <= total)
    )
);

CREATE INDEX idx_invoices_student ON invoices(student_id, issue_date);
CREATE INDEX idx_invoices_outstanding ON invoices(due_date) WHERE status = 'sent';
";

const INVOICE_LINES_SQL: &str = r"
CREATE TABLE invoice_lines (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    invoice_id UUID NOT NULL REFERENCES invoices(id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    description TEXT NOT NULL,
    quantity NUMERIC(19, 4) NOT NULL,
    unit_price NUMERIC(19, 2) NOT NULL,
    vat_rate NUMERIC(5, 2) NOT NULL,
    lesson_id UUID,
    UNIQUE (invoice_id, position),
    CONSTRAINT chk_line_quantity CHECK (quantity > 0),
    CONSTRAINT chk_line_vat_rate CHECK (vat_rate >= 0 AND vat_rate <= 100)
);
";

const PAYMENTS_SQL: &str = r"
CREATE TABLE payments (
    id UUID PRIMARY KEY,
    invoice_id UUID NOT NULL REFERENCES invoices(id),
    student_id UUID NOT NULL REFERENCES student_balances(student_id),
    amount NUMERIC(19, 2) NOT NULL,
    payment_date DATE NOT NULL,
    method VARCHAR(32) NOT NULL,
    external_reference VARCHAR(255),
    recorded_by UUID NOT NULL,
    recorded_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT chk_payment_amount CHECK (amount > 0),
    CONSTRAINT chk_payment_method CHECK (
        method IN ('bank_transfer', 'direct_debit', 'card', 'cash')
    )
);

CREATE INDEX idx_payments_invoice ON payments(invoice_id);
";

const LEDGER_APPLICATIONS_SQL: &str = r"
CREATE TABLE ledger_applications (
    id UUID PRIMARY KEY,
    ledger_entry_id UUID NOT NULL REFERENCES ledger_entries(id),
    invoice_id UUID NOT NULL REFERENCES invoices(id),
    amount NUMERIC(19, 2) NOT NULL,
    status VARCHAR(16) NOT NULL DEFAULT 'active',
    applied_by UUID NOT NULL,
    applied_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT chk_application_amount CHECK (amount > 0),
    CONSTRAINT chk_application_status CHECK (status IN ('active', 'decoupled'))
);

CREATE INDEX idx_applications_entry ON ledger_applications(ledger_entry_id);
CREATE INDEX idx_applications_invoice ON ledger_applications(invoice_id);
";

const DECOUPLINGS_SQL: &str = r"
CREATE TABLE decouplings (
    id UUID PRIMARY KEY,
    application_id UUID NOT NULL UNIQUE REFERENCES ledger_applications(id),
    ledger_entry_id UUID NOT NULL REFERENCES ledger_entries(id),
    invoice_id UUID NOT NULL REFERENCES invoices(id),
    amount NUMERIC(19, 2) NOT NULL,
    reason TEXT NOT NULL,
    decoupled_by UUID NOT NULL,
    decoupled_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT chk_decoupling_amount CHECK (amount > 0),
    CONSTRAINT chk_decoupling_reason CHECK (length(trim(reason)) > 0)
);
";

const STUDENT_TRANSACTIONS_SQL: &str = r"
CREATE TABLE student_transactions (
    id UUID PRIMARY KEY,
    student_id UUID NOT NULL REFERENCES student_balances(student_id),
    sequence BIGINT NOT NULL,
    transaction_date DATE NOT NULL,
    transaction_type VARCHAR(32) NOT NULL,
    description TEXT NOT NULL,
    reference_number VARCHAR(32) NOT NULL,
    debit NUMERIC(19, 2) NOT NULL DEFAULT 0,
    credit NUMERIC(19, 2) NOT NULL DEFAULT 0,
    running_balance NUMERIC(19, 2) NOT NULL,
    invoice_id UUID REFERENCES invoices(id),
    payment_id UUID REFERENCES payments(id),
    ledger_entry_id UUID REFERENCES ledger_entries(id),
    created_by UUID NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (student_id, sequence),
    CONSTRAINT chk_transaction_type CHECK (
        transaction_type IN (
            'invoice_charge', 'payment', 'credit_invoice', 'debit_correction',
            'credit_applied', 'credit_decoupled', 'correction_reversed'
        )
    ),
    CONSTRAINT chk_debit_or_credit CHECK (
        (debit > 0 AND credit = 0) OR (debit = 0 AND credit > 0)
    )
);

CREATE INDEX idx_student_transactions_order
    ON student_transactions(student_id, transaction_date, created_at, sequence);
";

const IMMUTABLE_TRANSACTIONS_SQL: &str = r"
CREATE OR REPLACE FUNCTION reject_transaction_change() RETURNS TRIGGER AS $$
BEGIN
    RAISE EXCEPTION 'student_transactions are append-only';
END;
$$ LANGUAGE plpgsql;

CREATE TRIGGER trg_student_transactions_immutable
    BEFORE UPDATE OR DELETE ON student_transactions
    FOR EACH ROW EXECUTE FUNCTION reject_transaction_change();
";

const DROP_ALL_SQL: &str = r"
DROP TRIGGER IF EXISTS trg_student_transactions_immutable ON student_transactions;
DROP FUNCTION IF EXISTS reject_transaction_change();
DROP TABLE IF EXISTS student_transactions;
DROP TABLE IF EXISTS decouplings;
DROP TABLE IF EXISTS ledger_applications;
DROP TABLE IF EXISTS payments;
DROP TABLE IF EXISTS invoice_lines;
DROP TABLE IF EXISTS invoices;
DROP TABLE IF EXISTS ledger_entries;
DROP TABLE IF EXISTS student_balances;
DROP TABLE IF EXISTS invoice_sequences;
DROP TABLE IF EXISTS correction_sequences;
";
