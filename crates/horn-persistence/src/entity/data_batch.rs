//! Data batch entity
//!
//! Notifications kept for a client that had no open stream when they arrived.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "data_batch")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub batch_id: Uuid,
    pub client_session_id: Uuid,
    pub created_at: DateTimeWithTimeZone,
    /// `{"twinId": "...", "clientIds": ["..."]}`
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub batch_data: Option<Json>,
    /// PENDING, PROCESSING, COMPLETED or FAILED
    pub status: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::client_session::Entity",
        from = "Column::ClientSessionId",
        to = "super::client_session::Column::ClientId"
    )]
    ClientSession,
}

impl Related<super::client_session::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ClientSession.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
