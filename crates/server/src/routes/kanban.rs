//! Boards, columns and cards.
//!
//! Every mutation is audited in the same transaction as the change. Reorders
//! hand their event to the repository, which records it inside the retried
//! transaction that rewrites the positions.

use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    middleware::from_fn_with_state,
    response::Json as ResponseJson,
    routing::{get, post, put},
};
use db::models::{
    audit_event::NewAuditEvent,
    kanban::{
        CreateKanbanBoard, CreateKanbanCard, CreateKanbanColumn, KanbanBoard, KanbanCard,
        KanbanColumn, UpdateKanbanCard,
    },
    workspace::Workspace,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utils::response::ApiResponse;

use crate::{
    AppState,
    error::ApiError,
    middleware::{
        AuditScope, load_board_middleware, load_column_middleware, load_workspace_middleware,
    },
    routes::{KANBAN_AUDIT, audit_change},
};

#[derive(Debug, Deserialize)]
pub struct ReorderRequest {
    pub ordered_ids: Vec<i64>,
}

#[derive(Debug, Serialize)]
pub struct BoardDetail {
    pub board: KanbanBoard,
    pub columns: Vec<KanbanColumn>,
}

pub async fn list_boards(
    State(state): State<AppState>,
    Extension(workspace): Extension<Workspace>,
) -> Result<ResponseJson<ApiResponse<Vec<KanbanBoard>>>, ApiError> {
    let boards = KanbanBoard::list_by_workspace(&state.db().pool, workspace.id).await?;
    Ok(ResponseJson(ApiResponse::success(boards)))
}

pub async fn create_board(
    State(state): State<AppState>,
    Extension(scope): Extension<AuditScope>,
    Extension(workspace): Extension<Workspace>,
    Json(payload): Json<CreateKanbanBoard>,
) -> Result<ResponseJson<ApiResponse<KanbanBoard>>, ApiError> {
    let mut tx = state.db().pool.begin().await?;
    let board = KanbanBoard::create(&mut *tx, workspace.id, &payload).await?;
    audit_change(
        &state,
        &scope,
        &mut tx,
        KANBAN_AUDIT,
        "KanbanBoard",
        board.id,
        json!({
            "action": "createBoard",
            "workspaceId": workspace.id,
            "projectId": board.project_id,
            "slug": board.slug,
        }),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(%board, "Kanban board created");
    Ok(ResponseJson(ApiResponse::success(board)))
}

pub async fn get_board(
    State(state): State<AppState>,
    Extension(board): Extension<KanbanBoard>,
) -> Result<ResponseJson<ApiResponse<BoardDetail>>, ApiError> {
    let columns = KanbanColumn::list_by_board(&state.db().pool, board.id).await?;
    Ok(ResponseJson(ApiResponse::success(BoardDetail { board, columns })))
}

pub async fn delete_board(
    State(state): State<AppState>,
    Extension(scope): Extension<AuditScope>,
    Extension(board): Extension<KanbanBoard>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    let mut tx = state.db().pool.begin().await?;
    let rows = KanbanBoard::delete(&mut *tx, board.id).await?;
    if rows == 0 {
        return Err(ApiError::NotFound("board not found".to_string()));
    }
    audit_change(
        &state,
        &scope,
        &mut tx,
        KANBAN_AUDIT,
        "KanbanBoard",
        board.id,
        json!({ "action": "deleteBoard", "slug": board.slug }),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(%board, "Kanban board deleted");
    Ok(ResponseJson(ApiResponse::success(())))
}

pub async fn list_columns(
    State(state): State<AppState>,
    Extension(board): Extension<KanbanBoard>,
) -> Result<ResponseJson<ApiResponse<Vec<KanbanColumn>>>, ApiError> {
    let columns = KanbanColumn::list_by_board(&state.db().pool, board.id).await?;
    Ok(ResponseJson(ApiResponse::success(columns)))
}

pub async fn create_column(
    State(state): State<AppState>,
    Extension(scope): Extension<AuditScope>,
    Extension(board): Extension<KanbanBoard>,
    Json(payload): Json<CreateKanbanColumn>,
) -> Result<ResponseJson<ApiResponse<KanbanColumn>>, ApiError> {
    let mut tx = state.db().pool.begin().await?;
    let column = KanbanColumn::create(&mut *tx, board.id, &payload).await?;
    audit_change(
        &state,
        &scope,
        &mut tx,
        KANBAN_AUDIT,
        "KanbanColumn",
        column.id,
        json!({
            "action": "createColumn",
            "boardId": board.id,
            "position": column.position,
        }),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(%column, "Kanban column created");
    Ok(ResponseJson(ApiResponse::success(column)))
}

pub async fn reorder_columns(
    State(state): State<AppState>,
    Extension(scope): Extension<AuditScope>,
    Extension(board): Extension<KanbanBoard>,
    Json(payload): Json<ReorderRequest>,
) -> Result<ResponseJson<ApiResponse<Vec<KanbanColumn>>>, ApiError> {
    let event = reorder_event(&scope, "KanbanBoard", board.id, &payload.ordered_ids);
    let columns = KanbanColumn::reorder(
        &state.db().pool,
        board.id,
        &payload.ordered_ids,
        state.audit(),
        &event,
    )
    .await?;
    Ok(ResponseJson(ApiResponse::success(columns)))
}

pub async fn list_cards(
    State(state): State<AppState>,
    Extension(column): Extension<KanbanColumn>,
) -> Result<ResponseJson<ApiResponse<Vec<KanbanCard>>>, ApiError> {
    let cards = KanbanCard::list_by_column(&state.db().pool, column.id).await?;
    Ok(ResponseJson(ApiResponse::success(cards)))
}

pub async fn create_card(
    State(state): State<AppState>,
    Extension(scope): Extension<AuditScope>,
    Extension(column): Extension<KanbanColumn>,
    Json(payload): Json<CreateKanbanCard>,
) -> Result<ResponseJson<ApiResponse<KanbanCard>>, ApiError> {
    let mut tx = state.db().pool.begin().await?;
    let card = KanbanCard::create(&mut *tx, column.id, &payload).await?;
    audit_change(
        &state,
        &scope,
        &mut tx,
        KANBAN_AUDIT,
        "KanbanCard",
        card.id,
        json!({
            "action": "createCard",
            "columnId": column.id,
            "position": card.position,
        }),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(%card, "Kanban card created");
    Ok(ResponseJson(ApiResponse::success(card)))
}

pub async fn reorder_cards(
    State(state): State<AppState>,
    Extension(scope): Extension<AuditScope>,
    Extension(column): Extension<KanbanColumn>,
    Json(payload): Json<ReorderRequest>,
) -> Result<ResponseJson<ApiResponse<Vec<KanbanCard>>>, ApiError> {
    let event = reorder_event(&scope, "KanbanColumn", column.id, &payload.ordered_ids);
    let cards = KanbanCard::reorder_within_column(
        &state.db().pool,
        column.id,
        &payload.ordered_ids,
        state.audit(),
        &event,
    )
    .await?;
    Ok(ResponseJson(ApiResponse::success(cards)))
}

pub async fn update_card(
    State(state): State<AppState>,
    Extension(scope): Extension<AuditScope>,
    Path(card_id): Path<i64>,
    Json(payload): Json<UpdateKanbanCard>,
) -> Result<ResponseJson<ApiResponse<KanbanCard>>, ApiError> {
    let existing = KanbanCard::find_by_id(&state.db().pool, card_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("card not found".to_string()))?;

    let mut tx = state.db().pool.begin().await?;
    let card = KanbanCard::update(&mut *tx, card_id, &payload).await?;
    let action = if existing.column_id == card.column_id {
        "updateCard"
    } else {
        "moveCard"
    };
    audit_change(
        &state,
        &scope,
        &mut tx,
        KANBAN_AUDIT,
        "KanbanCard",
        card.id,
        json!({
            "action": action,
            "fromColumnId": existing.column_id,
            "toColumnId": card.column_id,
            "position": card.position,
            "toVersion": card.version,
        }),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(%card, "Kanban card updated");
    Ok(ResponseJson(ApiResponse::success(card)))
}

pub async fn delete_card(
    State(state): State<AppState>,
    Extension(scope): Extension<AuditScope>,
    Path(card_id): Path<i64>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    let mut tx = state.db().pool.begin().await?;
    let rows = KanbanCard::delete(&mut *tx, card_id).await?;
    if rows == 0 {
        return Err(ApiError::NotFound("card not found".to_string()));
    }
    audit_change(
        &state,
        &scope,
        &mut tx,
        KANBAN_AUDIT,
        "KanbanCard",
        card_id,
        json!({ "action": "deleteCard" }),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(card_id, "Kanban card deleted");
    Ok(ResponseJson(ApiResponse::success(())))
}

fn reorder_event(
    scope: &AuditScope,
    target_type: &str,
    target_id: i64,
    ordered_ids: &[i64],
) -> NewAuditEvent {
    scope
        .event(KANBAN_AUDIT)
        .target(target_type, Some(target_id))
        .payload(&json!({ "action": "reorder", "orderedIds": ordered_ids }))
}

pub fn router(state: &AppState) -> Router<AppState> {
    let workspace_boards = Router::new()
        .route(
            "/workspaces/{workspace_id}/boards",
            get(list_boards).post(create_board),
        )
        .layer(from_fn_with_state(state.clone(), load_workspace_middleware));

    let board_router = Router::new()
        .route("/", get(get_board).delete(delete_board))
        .route("/columns", get(list_columns).post(create_column))
        .route("/columns/reorder", post(reorder_columns))
        .layer(from_fn_with_state(state.clone(), load_board_middleware));

    let column_router = Router::new()
        .route("/cards", get(list_cards).post(create_card))
        .route("/cards/reorder", post(reorder_cards))
        .layer(from_fn_with_state(state.clone(), load_column_middleware));

    Router::new()
        .merge(workspace_boards)
        .nest("/boards/{board_id}", board_router)
        .nest("/columns/{column_id}", column_router)
        .route("/cards/{card_id}", put(update_card).delete(delete_card))
}

#[cfg(test)]
mod tests {
    use db::{
        models::kanban::{CreateKanbanBoard, CreateKanbanColumn, KanbanBoard, KanbanColumn},
        test_utils::{seed_user, seed_workspace},
    };
    use serde_json::json;

    use crate::routes::test_support::{TestApp, test_app};

    async fn board_with_columns(app: &TestApp, names: &[&str]) -> (KanbanBoard, Vec<i64>) {
        let pool = &app.state.db().pool;
        let owner = seed_user(pool, "owner").await;
        let workspace = seed_workspace(pool, owner.id, "acme").await;
        let board = KanbanBoard::create(
            pool,
            workspace.id,
            &CreateKanbanBoard {
                name: "Delivery".to_string(),
                slug: "delivery".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let mut ids = Vec::new();
        for name in names {
            let column = KanbanColumn::create(
                pool,
                board.id,
                &CreateKanbanColumn {
                    name: name.to_string(),
                    slug: name.to_lowercase(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
            ids.push(column.id);
        }
        (board, ids)
    }

    #[tokio::test]
    async fn board_detail_lists_columns_in_position_order() {
        let app = test_app().await;
        let (board, ids) = board_with_columns(&app, &["Todo", "Doing", "Done"]).await;

        let (status, body) = app.get(&format!("/api/boards/{}", board.id)).await;
        assert_eq!(status, 200);
        assert_eq!(body["data"]["board"]["slug"], "delivery");
        let listed: Vec<i64> = body["data"]["columns"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["id"].as_i64().unwrap())
            .collect();
        assert_eq!(listed, ids);
    }

    #[tokio::test]
    async fn reorder_rewrites_positions_and_is_audited() {
        let app = test_app().await;
        let (board, ids) = board_with_columns(&app, &["Todo", "Doing", "Done"]).await;
        let reversed: Vec<i64> = ids.iter().rev().copied().collect();

        let (status, body) = app
            .send_json(
                "POST",
                &format!("/api/boards/{}/columns/reorder", board.id),
                json!({ "ordered_ids": reversed }),
            )
            .await;
        assert_eq!(status, 200);
        let columns = body["data"].as_array().unwrap();
        assert_eq!(columns[0]["id"].as_i64(), Some(reversed[0]));
        assert_eq!(columns[0]["position"], 0);
        assert_eq!(columns[2]["position"], 2);

        let page = app
            .state
            .audit_query()
            .query(None, &Default::default())
            .await
            .unwrap();
        assert_eq!(page.total_count, 1);
        assert_eq!(page.items[0].event_type, "KanbanAudit");
        assert_eq!(page.items[0].target_id, Some(board.id));
    }

    #[tokio::test]
    async fn reorder_with_foreign_id_is_bad_request() {
        let app = test_app().await;
        let (board, mut ids) = board_with_columns(&app, &["Todo", "Done"]).await;
        ids.push(987_654);

        let (status, body) = app
            .send_json(
                "POST",
                &format!("/api/boards/{}/columns/reorder", board.id),
                json!({ "ordered_ids": ids }),
            )
            .await;
        assert_eq!(status, 400);
        assert_eq!(body["success"], false);

        // Rejected before the transaction opens, so nothing is recorded
        let recorded = app.state.audit_query().count(None).await.unwrap();
        assert_eq!(recorded, 0);
    }

    #[tokio::test]
    async fn card_move_to_other_column_appends() {
        let app = test_app().await;
        let (_, ids) = board_with_columns(&app, &["Todo", "Done"]).await;

        let (_, body) = app
            .send_json(
                "POST",
                &format!("/api/columns/{}/cards", ids[1]),
                json!({ "title": "Already done" }),
            )
            .await;
        assert_eq!(body["data"]["position"], 0);

        let (_, body) = app
            .send_json(
                "POST",
                &format!("/api/columns/{}/cards", ids[0]),
                json!({ "title": "Ship it" }),
            )
            .await;
        let card_id = body["data"]["id"].as_i64().unwrap();

        let (status, body) = app
            .send_json(
                "PUT",
                &format!("/api/cards/{card_id}"),
                json!({ "column_id": ids[1], "version": 1 }),
            )
            .await;
        assert_eq!(status, 200);
        assert_eq!(body["data"]["column_id"].as_i64(), Some(ids[1]));
        assert_eq!(body["data"]["position"], 1);
        assert_eq!(body["data"]["version"], 2);

        let (status, _) = app
            .send_json(
                "PUT",
                &format!("/api/cards/{card_id}"),
                json!({ "title": "Stale", "version": 1 }),
            )
            .await;
        assert_eq!(status, 409);
    }

    #[tokio::test]
    async fn unknown_card_is_not_found() {
        let app = test_app().await;
        let (status, _) = app
            .send_json(
                "PUT",
                "/api/cards/31337",
                json!({ "title": "Ghost", "version": 1 }),
            )
            .await;
        assert_eq!(status, 404);
        let (status, _) = app.send_json("DELETE", "/api/cards/31337", json!({})).await;
        assert_eq!(status, 404);
    }
}
