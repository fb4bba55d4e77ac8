//! `SeaORM` Entity for student_transactions table.
//!
//! Append-only; a trigger rejects updates and deletes.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "student_transactions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub student_id: Uuid,
    pub sequence: i64,
    pub transaction_date: Date,
    pub transaction_type: String,
    #[sea_orm(column_type = "Text")]
    pub description: String,
    pub reference_number: String,
    #[sea_orm(column_type = "Decimal(Some((19, 2)))")]
    pub debit: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 2)))")]
    pub credit: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 2)))")]
    pub running_balance: Decimal,
    pub invoice_id: Option<Uuid>,
    pub payment_id: Option<Uuid>,
    pub ledger_entry_id: Option<Uuid>,
    pub created_by: Uuid,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::student_balances::Entity",
        from = "Column::StudentId",
        to = "super::student_balances::Column::StudentId"
    )]
    StudentBalances,
}

impl Related<super::student_balances::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StudentBalances.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
