//! `SeaORM` Entity for invoices table.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "invoices")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub number: String,
    pub series: String,
    pub original_invoice_id: Option<Uuid>,
    pub student_id: Uuid,
    pub enrollment_id: Option<Uuid>,
    pub issue_date: Date,
    pub due_date: Date,
    #[sea_orm(column_type = "Char(Some(3))")]
    pub currency: String,
    #[sea_orm(column_type = "Decimal(Some((19, 2)))")]
    pub subtotal: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 2)))")]
    pub vat_amount: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 2)))")]
    pub discount_amount: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 2)))")]
    pub total: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 2)))")]
    pub amount_paid: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 2)))")]
    pub ledger_credit_applied: Decimal,
    pub status: String,
    pub version: i64,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::student_balances::Entity",
        from = "Column::StudentId",
        to = "super::student_balances::Column::StudentId"
    )]
    StudentBalances,
    #[sea_orm(has_many = "super::invoice_lines::Entity")]
    InvoiceLines,
    #[sea_orm(has_many = "super::payments::Entity")]
    Payments,
    #[sea_orm(has_many = "super::ledger_applications::Entity")]
    LedgerApplications,
}

impl Related<super::student_balances::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StudentBalances.def()
    }
}

impl Related<super::invoice_lines::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::InvoiceLines.def()
    }
}

impl Related<super::payments::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Payments.def()
    }
}

impl Related<super::ledger_applications::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::LedgerApplications.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
