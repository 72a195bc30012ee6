use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::debug;

use shared::domain::{
    ordered_pair, ChatId, Conversation, Message, MessageId, NewConversation, NewMessage,
    NewNotification, Notification, NotificationId, ParticipantModel, UserId,
};

const CONVERSATION_COLUMNS: &str = "id, sender_id, receiver_id, sender_model, receiver_model, last_message, last_message_at";
const MESSAGE_COLUMNS: &str =
    "id, chat_id, sender_id, sender_model, message_content, seen, sended_time";
const NOTIFICATION_COLUMNS: &str =
    "id, from_user_id, sender_model, message, to_user_id, receiver_model, read";

/// Durable home of conversations, their messages and per-recipient
/// notifications.
#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    /// Inserts a conversation unless one already exists for the unordered
    /// participant pair, in which case the existing row is returned untouched.
    pub async fn create_conversation(&self, data: &NewConversation) -> Result<Conversation> {
        let (low, high) = ordered_pair(&data.sender_id, &data.receiver_id);
        let row = sqlx::query(&format!(
            "INSERT INTO conversations (sender_id, receiver_id, sender_model, receiver_model, participant_low, participant_high, last_message, last_message_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(participant_low, participant_high) DO NOTHING
             RETURNING {CONVERSATION_COLUMNS}"
        ))
        .bind(data.sender_id.as_str())
        .bind(data.receiver_id.as_str())
        .bind(data.sender_model.as_str())
        .bind(data.receiver_model.as_str())
        .bind(low.as_str())
        .bind(high.as_str())
        .bind(&data.last_message)
        .bind(data.last_message_at)
        .fetch_optional(&self.pool)
        .await
        .context("failed to insert conversation")?;

        if let Some(row) = row {
            return conversation_from_row(&row);
        }

        debug!(
            sender_id = %data.sender_id,
            receiver_id = %data.receiver_id,
            "conversation already exists for pair, reusing it"
        );
        self.find_by_participants(&data.sender_id, &data.receiver_id)
            .await?
            .ok_or_else(|| anyhow!("conversation for pair disappeared after conflict"))
    }

    pub async fn find_by_participants(
        &self,
        a: &UserId,
        b: &UserId,
    ) -> Result<Option<Conversation>> {
        let (low, high) = ordered_pair(a, b);
        let row = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations
             WHERE participant_low = ? AND participant_high = ?"
        ))
        .bind(low.as_str())
        .bind(high.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(conversation_from_row).transpose()
    }

    pub async fn find_conversation(&self, chat_id: ChatId) -> Result<Option<Conversation>> {
        let row = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?"
        ))
        .bind(chat_id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(conversation_from_row).transpose()
    }

    /// Moves the conversation summary to `message`. Returns `None` when the
    /// message's conversation does not exist.
    pub async fn update_last_message(&self, message: &Message) -> Result<Option<Conversation>> {
        let row = sqlx::query(&format!(
            "UPDATE conversations SET last_message = ?, last_message_at = ?
             WHERE id = ?
             RETURNING {CONVERSATION_COLUMNS}"
        ))
        .bind(&message.message_content)
        .bind(message.sended_time)
        .bind(message.chat_id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(conversation_from_row).transpose()
    }

    /// Rebuilds the denormalized summary from the newest stored message.
    pub async fn recompute_last_message(&self, chat_id: ChatId) -> Result<Option<Conversation>> {
        let newest = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE chat_id = ? ORDER BY id DESC LIMIT 1"
        ))
        .bind(chat_id.0)
        .fetch_optional(&self.pool)
        .await?;

        match newest.as_ref().map(message_from_row).transpose()? {
            Some(message) => self.update_last_message(&message).await,
            None => self.find_conversation(chat_id).await,
        }
    }

    pub async fn create_message(&self, data: &NewMessage) -> Result<Message> {
        let row = sqlx::query(&format!(
            "INSERT INTO messages (chat_id, sender_id, sender_model, message_content, seen, sended_time)
             VALUES (?, ?, ?, ?, 0, ?)
             RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(data.chat_id.0)
        .bind(data.sender_id.as_str())
        .bind(data.sender_model.as_str())
        .bind(&data.message_content)
        .bind(data.sended_time)
        .fetch_one(&self.pool)
        .await
        .context("failed to insert message")?;
        message_from_row(&row)
    }

    pub async fn list_conversation_messages(
        &self,
        chat_id: ChatId,
        limit: u32,
        before: Option<MessageId>,
    ) -> Result<Vec<Message>> {
        let mut rows = if let Some(before_id) = before {
            sqlx::query(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE chat_id = ? AND id < ?
                 ORDER BY id DESC
                 LIMIT ?"
            ))
            .bind(chat_id.0)
            .bind(before_id.0)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE chat_id = ?
                 ORDER BY id DESC
                 LIMIT ?"
            ))
            .bind(chat_id.0)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        };

        rows.reverse();
        rows.iter().map(message_from_row).collect()
    }

    /// Unread notifications addressed to `user_id`, oldest first.
    pub async fn find_pending(&self, user_id: &UserId) -> Result<Vec<Notification>> {
        let rows = sqlx::query(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications
             WHERE to_user_id = ? AND read = 0
             ORDER BY id ASC"
        ))
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(notification_from_row).collect()
    }

    pub async fn create_notification(&self, data: &NewNotification) -> Result<Notification> {
        let row = sqlx::query(&format!(
            "INSERT INTO notifications (from_user_id, sender_model, message, to_user_id, receiver_model, read)
             VALUES (?, ?, ?, ?, ?, 0)
             RETURNING {NOTIFICATION_COLUMNS}"
        ))
        .bind(data.from.as_str())
        .bind(data.sender_model.as_str())
        .bind(&data.message)
        .bind(data.to.as_str())
        .bind(data.receiver_model.as_str())
        .fetch_one(&self.pool)
        .await
        .context("failed to insert notification")?;
        notification_from_row(&row)
    }

    pub async fn mark_notifications_read(&self, user_id: &UserId) -> Result<u64> {
        let result = sqlx::query("UPDATE notifications SET read = 1 WHERE to_user_id = ? AND read = 0")
            .bind(user_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn conversation_from_row(row: &SqliteRow) -> Result<Conversation> {
    Ok(Conversation {
        id: ChatId(row.try_get("id")?),
        sender_id: UserId(row.try_get("sender_id")?),
        receiver_id: UserId(row.try_get("receiver_id")?),
        sender_model: model_column(row, "sender_model")?,
        receiver_model: model_column(row, "receiver_model")?,
        last_message: row.try_get("last_message")?,
        last_message_at: row.try_get::<DateTime<Utc>, _>("last_message_at")?,
    })
}

fn message_from_row(row: &SqliteRow) -> Result<Message> {
    Ok(Message {
        id: MessageId(row.try_get("id")?),
        chat_id: ChatId(row.try_get("chat_id")?),
        sender_id: UserId(row.try_get("sender_id")?),
        sender_model: model_column(row, "sender_model")?,
        message_content: row.try_get("message_content")?,
        seen: row.try_get("seen")?,
        sended_time: row.try_get::<DateTime<Utc>, _>("sended_time")?,
    })
}

fn notification_from_row(row: &SqliteRow) -> Result<Notification> {
    Ok(Notification {
        id: NotificationId(row.try_get("id")?),
        from: UserId(row.try_get("from_user_id")?),
        sender_model: model_column(row, "sender_model")?,
        message: row.try_get("message")?,
        to: UserId(row.try_get("to_user_id")?),
        receiver_model: model_column(row, "receiver_model")?,
        read: row.try_get("read")?,
    })
}

fn model_column(row: &SqliteRow, column: &str) -> Result<ParticipantModel> {
    let raw: String = row.try_get(column)?;
    ParticipantModel::parse(&raw).ok_or_else(|| anyhow!("unknown participant model '{raw}' in {column}"))
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
