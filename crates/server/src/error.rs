use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use db::{
    AuditError,
    models::{
        chat::ChatError, kanban::KanbanError, project::ProjectError,
        project_task::ProjectTaskError, user::UserError, workspace::WorkspaceError,
    },
};
use thiserror::Error;
use utils::response::ApiResponse;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}, reload and retry")]
    VersionMismatch(String),
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Audit(#[from] AuditError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Maps each listed variant of a repository error onto an `ApiError` kind,
/// keeping the repository's message. `Database` is always passed through.
macro_rules! domain_error {
    ($err:ident { $($pat:pat => $kind:ident),+ $(,)? }) => {
        impl From<$err> for ApiError {
            fn from(err: $err) -> Self {
                let message = err.to_string();
                match err {
                    $($pat => ApiError::$kind(message),)+
                    $err::Database(e) => ApiError::Database(e),
                }
            }
        }
    };
}

domain_error!(UserError {
    UserError::NotFound => NotFound,
    UserError::Conflict(_) => Conflict,
    UserError::VersionMismatch => VersionMismatch,
});

domain_error!(WorkspaceError {
    WorkspaceError::NotFound | WorkspaceError::MemberNotFound => NotFound,
    WorkspaceError::Conflict(_) => Conflict,
    WorkspaceError::VersionMismatch => VersionMismatch,
});

domain_error!(ProjectError {
    ProjectError::NotFound | ProjectError::MemberNotFound => NotFound,
    ProjectError::Conflict(_) => Conflict,
    ProjectError::VersionMismatch => VersionMismatch,
});

domain_error!(ProjectTaskError {
    ProjectTaskError::NotFound => NotFound,
    ProjectTaskError::Conflict(_) => Conflict,
    ProjectTaskError::VersionMismatch => VersionMismatch,
});

domain_error!(KanbanError {
    KanbanError::BoardNotFound | KanbanError::ColumnNotFound | KanbanError::CardNotFound => NotFound,
    KanbanError::Conflict(_) => Conflict,
    KanbanError::VersionMismatch => VersionMismatch,
    KanbanError::InvalidReorder(_) => BadRequest,
});

domain_error!(ChatError {
    ChatError::RoomNotFound | ChatError::NotFound => NotFound,
    ChatError::Conflict(_) => Conflict,
});

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) | ApiError::Database(sqlx::Error::RowNotFound) => {
                StatusCode::NOT_FOUND
            }
            ApiError::Conflict(_) | ApiError::VersionMismatch(_) => StatusCode::CONFLICT,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Audit(_) | ApiError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
            "Internal server error".to_string()
        } else if let ApiError::Database(sqlx::Error::RowNotFound) = self {
            "Not found".to_string()
        } else {
            self.to_string()
        };

        (status, Json(ApiResponse::<()>::error(message))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repository_errors_map_to_status_codes() {
        assert_eq!(
            ApiError::from(WorkspaceError::NotFound).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(ProjectError::Conflict("slug taken".to_string())).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(UserError::VersionMismatch).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(KanbanError::InvalidReorder("7 is listed twice".to_string())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Database(sqlx::Error::RowNotFound).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(ChatError::Database(sqlx::Error::PoolClosed)).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn messages_come_from_the_repository_error() {
        let err = ApiError::from(ProjectError::Conflict("slug 'site' is taken".to_string()));
        assert_eq!(err.to_string(), "project conflict: slug 'site' is taken");
    }
}
