use std::sync::Mutex;

use cqbridge_contracts::MessageType;
use cqbridge_kernel::{LogError, MessageLog, NewMessage, StoredMessage};
use rusqlite::{params, Connection, OptionalExtension};

/// Message log persisted in SQLite so ids survive restarts.
pub struct SqliteMessageLog {
    conn: Mutex<Connection>,
}

impl SqliteMessageLog {
    pub fn open(path: &str) -> Result<Self, String> {
        let conn = Connection::open(path).map_err(|e| e.to_string())?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                bot_id INTEGER NOT NULL,
                message_type INTEGER NOT NULL,
                group_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                engine_ref TEXT NOT NULL,
                text TEXT NOT NULL,
                time INTEGER NOT NULL
            );
            ",
        )
        .map_err(|e| e.to_string())?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, LogError> {
        self.conn
            .lock()
            .map_err(|_| LogError::Backend("sqlite connection lock poisoned".to_string()))
    }
}

fn backend(err: rusqlite::Error) -> LogError {
    LogError::Backend(err.to_string())
}

impl MessageLog for SqliteMessageLog {
    fn record(&self, message: NewMessage) -> Result<i64, LogError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO messages(bot_id, message_type, group_id, user_id, engine_ref, text, time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                message.bot_id,
                message.message_type.engine_code(),
                message.group_id,
                message.user_id,
                message.engine_ref,
                message.text,
                message.time
            ],
        )
        .map_err(backend)?;
        Ok(conn.last_insert_rowid())
    }

    fn find(&self, bot_id: i64, message_id: i64) -> Result<Option<StoredMessage>, LogError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT id, bot_id, message_type, group_id, user_id, engine_ref, text, time
                 FROM messages WHERE id = ?1 AND bot_id = ?2",
                params![message_id, bot_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, i64>(7)?,
                    ))
                },
            )
            .optional()
            .map_err(backend)?;
        let Some((message_id, bot_id, kind, group_id, user_id, engine_ref, text, time)) = row else {
            return Ok(None);
        };
        let message_type = MessageType::from_engine_code(kind)
            .ok_or_else(|| LogError::Backend(format!("unknown message_type {kind}")))?;
        Ok(Some(StoredMessage {
            message_id,
            bot_id,
            message_type,
            group_id,
            user_id,
            engine_ref,
            text,
            time,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_db(tag: &str) -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir()
            .join(format!("cqbridge-{tag}-{nanos}.db"))
            .to_string_lossy()
            .to_string()
    }

    fn message(bot_id: i64, text: &str) -> NewMessage {
        NewMessage {
            bot_id,
            message_type: MessageType::Private,
            group_id: 0,
            user_id: 42,
            engine_ref: "r1".to_string(),
            text: text.to_string(),
            time: 1_700_000_000,
        }
    }

    #[test]
    fn messages_survive_reopen() {
        let path = temp_db("log-reopen");
        let id = {
            let log = SqliteMessageLog::open(&path).unwrap();
            log.record(message(1, "first")).unwrap()
        };
        let log = SqliteMessageLog::open(&path).unwrap();
        let found = log.find(1, id).unwrap().unwrap();
        assert_eq!(found.text, "first");
        assert_eq!(found.message_type, MessageType::Private);
        assert_eq!(found.user_id, 42);
        assert_eq!(log.record(message(1, "second")).unwrap(), id + 1);
    }

    #[test]
    fn find_is_scoped_to_bot() {
        let log = SqliteMessageLog::open(&temp_db("log-scope")).unwrap();
        let id = log.record(message(1, "x")).unwrap();
        assert!(log.find(2, id).unwrap().is_none());
        assert!(log.find(1, id + 100).unwrap().is_none());
    }
}
