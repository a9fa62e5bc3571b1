use axum::{
    Extension, Json, Router,
    extract::{Query, State},
    middleware::from_fn_with_state,
    response::Json as ResponseJson,
    routing::{get, post},
};
use db::models::chat::{
    ChatMessage, ChatRoom, ChatRoomMember, ChatRoomRole, CreateChatRoom, PostChatMessage,
};
use serde::Deserialize;
use utils::response::ApiResponse;

use crate::{AppState, error::ApiError, middleware::load_room_middleware};

const DEFAULT_MESSAGE_LIMIT: i64 = 100;
const MAX_MESSAGE_LIMIT: i64 = 500;

#[derive(Debug, Deserialize)]
pub struct RoomQueryParams {
    /// Only rooms of this project; all open rooms when absent
    #[serde(default)]
    pub project_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct MessageQueryParams {
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct JoinRoomRequest {
    pub user_id: i64,
    #[serde(default)]
    pub role: ChatRoomRole,
}

pub async fn list_rooms(
    State(state): State<AppState>,
    Query(params): Query<RoomQueryParams>,
) -> Result<ResponseJson<ApiResponse<Vec<ChatRoom>>>, ApiError> {
    let rooms = ChatRoom::list(&state.db().pool, params.project_id).await?;
    Ok(ResponseJson(ApiResponse::success(rooms)))
}

pub async fn create_room(
    State(state): State<AppState>,
    Json(payload): Json<CreateChatRoom>,
) -> Result<ResponseJson<ApiResponse<ChatRoom>>, ApiError> {
    let room = ChatRoom::create(&state.db().pool, &payload).await?;
    tracing::info!(%room, "Chat room created");
    Ok(ResponseJson(ApiResponse::success(room)))
}

pub async fn list_messages(
    State(state): State<AppState>,
    Extension(room): Extension<ChatRoom>,
    Query(params): Query<MessageQueryParams>,
) -> Result<ResponseJson<ApiResponse<Vec<ChatMessage>>>, ApiError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_MESSAGE_LIMIT)
        .clamp(1, MAX_MESSAGE_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);
    let messages = ChatMessage::list_by_room(&state.db().pool, room.id, limit, offset).await?;
    Ok(ResponseJson(ApiResponse::success(messages)))
}

pub async fn post_message(
    State(state): State<AppState>,
    Extension(room): Extension<ChatRoom>,
    Json(payload): Json<PostChatMessage>,
) -> Result<ResponseJson<ApiResponse<ChatMessage>>, ApiError> {
    if room.archived_at.is_some() {
        return Err(ApiError::Conflict(format!("chat room {} is archived", room.id)));
    }
    let message = ChatMessage::post(&state.db().pool, room.id, &payload).await?;
    tracing::debug!(%message, "Chat message posted");
    Ok(ResponseJson(ApiResponse::success(message)))
}

pub async fn join_room(
    State(state): State<AppState>,
    Extension(room): Extension<ChatRoom>,
    Json(payload): Json<JoinRoomRequest>,
) -> Result<ResponseJson<ApiResponse<ChatRoomMember>>, ApiError> {
    let member =
        ChatRoomMember::join(&state.db().pool, room.id, payload.user_id, payload.role).await?;
    tracing::info!(
        room_id = room.id,
        user_id = member.user_id,
        role = %member.role,
        "User joined chat room"
    );
    Ok(ResponseJson(ApiResponse::success(member)))
}

pub fn router(state: &AppState) -> Router<AppState> {
    let room_router = Router::new()
        .route("/messages", get(list_messages).post(post_message))
        .route("/members", post(join_room))
        .layer(from_fn_with_state(state.clone(), load_room_middleware));

    let inner = Router::new()
        .route("/", get(list_rooms).post(create_room))
        .nest("/{room_id}", room_router);

    Router::new().nest("/chat/rooms", inner)
}
