//! Kanban boards, columns and cards.
//!
//! A board is scoped to a workspace and optionally to a project within it.
//! Columns belong to a board and cards to a column; both carry a `position`
//! that orders them within their parent. Reordering rewrites the positions of
//! the listed rows to their index in one transaction.

mod board;
mod card;
mod column;

pub use board::{CreateKanbanBoard, KanbanBoard, UpdateKanbanBoard};
pub use card::{
    CreateKanbanCard, KanbanCard, KanbanCardAssignee, KanbanCardAttachment, UpdateKanbanCard,
};
pub use column::{CreateKanbanColumn, KanbanColumn, UpdateKanbanColumn};

use std::collections::HashSet;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KanbanError {
    #[error("board not found")]
    BoardNotFound,
    #[error("column not found")]
    ColumnNotFound,
    #[error("card not found")]
    CardNotFound,
    #[error("kanban conflict: {0}")]
    Conflict(String),
    #[error("version mismatch")]
    VersionMismatch,
    #[error("invalid reorder: {0}")]
    InvalidReorder(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Checks that `ordered_ids` names only children of the parent, each once.
fn validate_reorder(ordered_ids: &[i64], children: &[i64]) -> Result<(), KanbanError> {
    let known: HashSet<i64> = children.iter().copied().collect();
    let mut seen = HashSet::with_capacity(ordered_ids.len());

    for id in ordered_ids {
        if !known.contains(id) {
            return Err(KanbanError::InvalidReorder(format!(
                "{} does not belong to this parent",
                id
            )));
        }
        if !seen.insert(*id) {
            return Err(KanbanError::InvalidReorder(format!("{} is listed twice", id)));
        }
    }

    Ok(())
}
