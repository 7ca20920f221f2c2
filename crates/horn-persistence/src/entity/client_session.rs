//! Client session entity
//!
//! One row per Twinface client, tracking token expiry and stream status.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "client_session")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub client_id: Uuid,
    /// SHA-256 hex digest of the bearer token
    pub token: String,
    pub created_at: DateTimeWithTimeZone,
    pub expires_at: Option<DateTimeWithTimeZone>,
    /// ACTIVE, WARNING or CLOSED
    pub status: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::data_batch::Entity")]
    DataBatch,
}

impl Related<super::data_batch::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DataBatch.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
