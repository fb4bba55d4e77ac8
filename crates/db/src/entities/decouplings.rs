//! `SeaORM` Entity for decouplings table (immutable audit).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "decouplings")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub application_id: Uuid,
    pub ledger_entry_id: Uuid,
    pub invoice_id: Uuid,
    #[sea_orm(column_type = "Decimal(Some((19, 2)))")]
    pub amount: Decimal,
    #[sea_orm(column_type = "Text")]
    pub reason: String,
    pub decoupled_by: Uuid,
    pub decoupled_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::ledger_applications::Entity",
        from = "Column::ApplicationId",
        to = "super::ledger_applications::Column::Id"
    )]
    LedgerApplications,
}

impl Related<super::ledger_applications::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::LedgerApplications.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
