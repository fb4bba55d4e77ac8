//! Property-based tests for running balances.

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use proptest::prelude::*;
use rust_decimal::Decimal;

use cadence_shared::types::{StudentId, UserId};

use super::balance::{
    PostingLine, StudentTransaction, TransactionType, current_balance, verify_running_balances,
};

/// Strategy to generate positive decimal amounts (0.01 to 10,000.00).
fn positive_amount() -> impl Strategy<Value = Decimal> {
    (1i64..1_000_000i64).prop_map(|cents| Decimal::new(cents, 2))
}

/// A posting line with a random side and type.
fn posting_strategy() -> impl Strategy<Value = PostingLine> {
    (positive_amount(), any::<bool>()).prop_map(|(amount, is_debit)| {
        if is_debit {
            PostingLine::debit(TransactionType::InvoiceCharge, amount, "Invoice", "2026-01")
        } else {
            PostingLine::credit(TransactionType::Payment, amount, "Payment", "PAY")
        }
    })
}

fn post_all(lines: Vec<(PostingLine, u32)>) -> Vec<StudentTransaction> {
    let student = StudentId::new();
    let start = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
    let base = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    let mut day = 0u32;
    let mut out: Vec<StudentTransaction> = Vec::new();
    for (i, (line, gap)) in lines.into_iter().enumerate() {
        day += gap;
        let date = start + Duration::days(i64::from(day));
        let created = base + Duration::seconds(i64::try_from(i).unwrap());
        let tx = StudentTransaction::post(out.last(), student, line, date, UserId::new(), created)
            .unwrap();
        out.push(tx);
    }
    out
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Prefix sums of debit - credit reproduce every stored running balance,
    /// and the current balance is the last running balance.
    #[test]
    fn prop_running_balance_is_prefix_sum(
        lines in proptest::collection::vec((posting_strategy(), 0u32..3), 1..30),
    ) {
        let net: Decimal = lines.iter().map(|(l, _)| l.net()).sum();
        let txs = post_all(lines);

        let mut running = Decimal::ZERO;
        for tx in &txs {
            running += tx.debit - tx.credit;
            prop_assert_eq!(running, tx.running_balance);
        }
        prop_assert_eq!(verify_running_balances(&txs).unwrap(), net);
        prop_assert_eq!(current_balance(&txs), net);
    }

    /// Any tampered running balance is detected.
    #[test]
    fn prop_tampering_detected(
        lines in proptest::collection::vec((posting_strategy(), 0u32..3), 1..30),
        pick in any::<prop::sample::Index>(),
        delta in positive_amount(),
    ) {
        let mut txs = post_all(lines);
        let index = pick.index(txs.len());
        txs[index].running_balance += delta;
        prop_assert!(verify_running_balances(&txs).is_err());
    }
}
