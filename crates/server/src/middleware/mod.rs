pub mod audit;
pub mod model_loaders;

pub use audit::{AuditScope, audit_scope_middleware};
pub use model_loaders::{
    load_board_middleware, load_column_middleware, load_project_middleware, load_room_middleware,
    load_workspace_middleware,
};
