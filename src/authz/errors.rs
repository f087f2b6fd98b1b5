use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use miette::Diagnostic;
use serde_json::json;
use thiserror::Error;

/// Coarse error classes the host reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidPolicy,
    AdapterUnavailable,
    ExpressionError,
    UnresolvedReference,
    InvalidInput,
    Cancelled,
    Internal,
}

#[derive(Debug, Error, Diagnostic)]
pub enum AuthzError {
    #[error("Failed to load policy file `{path}`")]
    #[diagnostic(
        code(mission_control::authz::policy_load),
        help("Check that the file exists and is readable")
    )]
    PolicyLoadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Policy YAML parse error: {0}")]
    #[diagnostic(
        code(mission_control::authz::policy_parse),
        help("The policy file is a YAML list of `{{principal, acl: [{{objects, actions}}], inherit: [..]}}` entries")
    )]
    PolicyParse(String),

    #[error("Invalid policy: {0}")]
    #[diagnostic(code(mission_control::authz::invalid_policy))]
    InvalidPolicy(String),

    #[error("Unknown object `{object}` in rule `{rule}`")]
    #[diagnostic(
        code(mission_control::authz::unknown_object),
        help("Declare the object in `policy.objects` or fix the rule")
    )]
    UnknownObject { object: String, rule: String },

    #[error("Unknown action `{action}` in rule `{rule}`")]
    #[diagnostic(
        code(mission_control::authz::unknown_action),
        help("Supported actions: read, create, update, delete, run, approve, *")
    )]
    UnknownAction { action: String, rule: String },

    #[error("Cyclic role inheritance detected: {0}")]
    #[diagnostic(
        code(mission_control::authz::cyclic_roles),
        help("Check the `inherit` lists and stored role bindings for circular references")
    )]
    CyclicRoleInheritance(String),

    #[error("Invalid condition expression: {0}")]
    #[diagnostic(
        code(mission_control::authz::invalid_condition),
        help("Supported operators: ==, !=, >, <, >=, <=, &&, ||, !, in, and function calls. Variables: r.sub, r.obj, r.act")
    )]
    InvalidCondition(String),

    #[error("Invalid selector: {0}")]
    #[diagnostic(
        code(mission_control::authz::invalid_selector),
        help("Label selectors accept `k=v`, `k!=v`, `k in (a,b)`, `k notin (a,b)`, `k` and `!k`, joined by commas")
    )]
    InvalidSelector(String),

    #[error("Unresolved reference: {0}")]
    #[diagnostic(code(mission_control::authz::unresolved_reference))]
    UnresolvedReference(String),

    #[error("Invalid input: {0}")]
    #[diagnostic(code(mission_control::authz::invalid_input))]
    InvalidInput(String),

    #[error("Adapter unavailable: {0}")]
    #[diagnostic(
        code(mission_control::authz::adapter_unavailable),
        help("The persistence backend could not be reached; decisions default to deny")
    )]
    AdapterUnavailable(String),

    #[error("Operation cancelled")]
    #[diagnostic(code(mission_control::authz::cancelled))]
    Cancelled,

    #[error("Background job error: {0}")]
    #[diagnostic(code(mission_control::authz::background))]
    Background(String),

    #[error("I/O error: {0}")]
    #[diagnostic(code(mission_control::authz::io))]
    Io(#[from] std::io::Error),
}

impl AuthzError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthzError::PolicyLoadError { .. }
            | AuthzError::PolicyParse(_)
            | AuthzError::InvalidPolicy(_)
            | AuthzError::UnknownObject { .. }
            | AuthzError::UnknownAction { .. }
            | AuthzError::CyclicRoleInheritance(_)
            | AuthzError::Io(_) => ErrorKind::InvalidPolicy,
            AuthzError::InvalidCondition(_) | AuthzError::InvalidSelector(_) => {
                ErrorKind::ExpressionError
            }
            AuthzError::UnresolvedReference(_) => ErrorKind::UnresolvedReference,
            AuthzError::InvalidInput(_) => ErrorKind::InvalidInput,
            AuthzError::AdapterUnavailable(_) => ErrorKind::AdapterUnavailable,
            AuthzError::Cancelled => ErrorKind::Cancelled,
            AuthzError::Background(_) => ErrorKind::Internal,
        }
    }
}

impl From<sea_orm::DbErr> for AuthzError {
    fn from(value: sea_orm::DbErr) -> Self {
        AuthzError::AdapterUnavailable(value.to_string())
    }
}

impl From<tokio_cron_scheduler::JobSchedulerError> for AuthzError {
    fn from(value: tokio_cron_scheduler::JobSchedulerError) -> Self {
        AuthzError::Background(value.to_string())
    }
}

/// Error bodies of the non-decision endpoints. Decisions carry their own
/// status mapping in `web`.
impl IntoResponse for AuthzError {
    fn into_response(self) -> Response {
        let status = match self.kind() {
            ErrorKind::InvalidInput | ErrorKind::ExpressionError => StatusCode::BAD_REQUEST,
            ErrorKind::UnresolvedReference => StatusCode::NOT_FOUND,
            ErrorKind::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}
