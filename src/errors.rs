use miette::Diagnostic;
use thiserror::Error;

use crate::authz::errors::AuthzError;

#[derive(Debug, Error, Diagnostic)]
pub enum ServiceError {
    #[error("I/O error: {0}")]
    #[diagnostic(code(mission_control::io))]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    #[diagnostic(
        code(mission_control::db),
        help("Check `database.url` and that the database is reachable")
    )]
    Db(#[from] sea_orm::DbErr),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Authz(#[from] AuthzError),

    #[error("Bad listen address `{0}`")]
    #[diagnostic(code(mission_control::listen_addr))]
    ListenAddr(String),
}
