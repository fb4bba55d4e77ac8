//! `SeaORM` Entity for ledger_entries table.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "ledger_entries")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub reference: String,
    #[sea_orm(column_type = "Text")]
    pub description: String,
    pub student_id: Uuid,
    pub course_id: Option<Uuid>,
    #[sea_orm(column_type = "Decimal(Some((19, 2)))")]
    pub amount: Decimal,
    pub entry_type: String,
    pub status: String,
    #[sea_orm(column_type = "Decimal(Some((19, 2)))")]
    pub applied_amount: Decimal,
    pub version: i64,
    pub created_by: Uuid,
    pub created_at: DateTimeWithTimeZone,
    pub reversed_by: Option<Uuid>,
    pub reversed_at: Option<DateTimeWithTimeZone>,
    #[sea_orm(column_type = "Text", nullable)]
    pub reversal_reason: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::student_balances::Entity",
        from = "Column::StudentId",
        to = "super::student_balances::Column::StudentId"
    )]
    StudentBalances,
    #[sea_orm(has_many = "super::ledger_applications::Entity")]
    LedgerApplications,
}

impl Related<super::student_balances::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StudentBalances.def()
    }
}

impl Related<super::ledger_applications::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::LedgerApplications.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
