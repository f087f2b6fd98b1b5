use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Casbin-shaped rule row. `ptype = "p"` rows are permissions
/// `(principal, object, action, effect, condition, id)`; `ptype = "g"` rows are
/// groupings `(principal, inherited)`.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "casbin_rule")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = true)]
    pub id: i64,
    pub ptype: String,
    pub v0: String,
    pub v1: String,
    pub v2: String,
    pub v3: String,
    pub v4: String,
    pub v5: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
