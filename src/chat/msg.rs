use sqlx::SqlitePool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    auth::{Identity, Role},
    chat::{
        assign,
        events::{parse_inbound, ServerEvent},
        Connection, ConnectionRegistry,
    },
    db::ChatMessage,
    AppResult,
};

/// Routes one inbound frame from `sender`, received on `origin`.
///
/// Malformed frames are dropped without a reply. Routing problems are
/// reported to `origin` as `ERROR` events. Store errors propagate; the
/// caller logs them and keeps the connection.
pub async fn handle_inbound(
    db_pool: &SqlitePool,
    registry: &ConnectionRegistry,
    sender: &Identity,
    origin: &Connection,
    raw: &str,
) -> AppResult<()> {
    let inbound = match parse_inbound(raw) {
        Ok(inbound) => inbound,
        Err(e) => {
            tracing::debug!(user_id = %sender.id, conn_id = %origin.id(), "dropping inbound frame: {e}");
            return Ok(());
        }
    };

    let assignment = if sender.role == Role::Homeowner {
        // a homeowner has exactly one room; never trust one from the payload
        assign::find_or_create_assignment(db_pool, &sender.id).await?
    } else {
        let Some(room_id) = inbound.room_id.as_deref() else {
            origin.send(&ServerEvent::error("roomId is required"));
            return Ok(());
        };
        assign::assignment_by_room(db_pool, room_id).await?
    };

    let Some(assignment) = assignment else {
        origin.send(&ServerEvent::error("no chat room is available yet"));
        return Ok(());
    };
    if !assignment.active {
        origin.send(&ServerEvent::error("this conversation has been closed"));
        return Ok(());
    }
    if sender.role == Role::Company && assignment.company_id != sender.id {
        tracing::warn!(user_id = %sender.id, room_id = %assignment.room_id, "company wrote to a room it does not own");
        origin.send(&ServerEvent::error("you are not a participant of this room"));
        return Ok(());
    }

    let message = ChatMessage {
        id: Uuid::now_v7().to_string(),
        room_id: assignment.room_id.clone(),
        sender_id: sender.id.clone(),
        sender_role: sender.role,
        content: inbound.content,
        read: false,
        created_at: OffsetDateTime::now_utc(),
    };
    insert_message(db_pool, &message).await?;

    let event = ServerEvent::NewMessage { message };
    let delivered = registry.broadcast(&assignment.homeowner_id, &event)
        + registry.broadcast(&assignment.company_id, &event);
    tracing::debug!(room_id = %assignment.room_id, delivered, "message fanned out");

    Ok(())
}

pub async fn insert_message(db_pool: &SqlitePool, message: &ChatMessage) -> AppResult<()> {
    sqlx::query("INSERT INTO messages (id,room_id,sender_id,sender_role,content,read,created_at) values (?,?,?,?,?,?,?)")
        .bind(&message.id)
        .bind(&message.room_id)
        .bind(&message.sender_id)
        .bind(message.sender_role)
        .bind(&message.content)
        .bind(message.read)
        .bind(message.created_at)
        .execute(db_pool)
        .await?;
    Ok(())
}

/// Every message of a room, oldest first.
pub async fn history(db_pool: &SqlitePool, room_id: &str) -> AppResult<Vec<ChatMessage>> {
    Ok(
        sqlx::query_as(
            "SELECT id,room_id,sender_id,sender_role,content,read,created_at FROM messages
             WHERE room_id=? ORDER BY julianday(created_at), id",
        )
        .bind(room_id)
        .fetch_all(db_pool)
        .await?
    )
}
