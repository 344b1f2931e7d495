//! Redis storage backend.
//!
//! Layout under the configured keybase:
//! - `<keybase><sha1>`: JSON-encoded request
//! - `<keybase>queue`: list of keys, oldest at the head
//! - `<keybase>log`: list of JSON log entries
//!
//! Several relay processes may share one Redis; `queue` uses a MULTI
//! transaction and `unqueue` a Lua script so pop, fetch and delete happen
//! as one step.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};

use super::{content_key, Storage, StorageError};
use crate::relay::{LogEntry, Outcome, SerializedRequest};

const UNQUEUE_SCRIPT: &str = r#"
local key = redis.call('LPOP', KEYS[1])
while key do
    local body = redis.call('GET', key)
    if body then
        redis.call('DEL', key)
        return {key, body}
    end
    key = redis.call('LPOP', KEYS[1])
end
return false
"#;

pub struct RedisStorage {
    conn: MultiplexedConnection,
    keybase: String,
    unqueue_script: Script,
}

impl RedisStorage {
    pub async fn connect(url: &str, keybase: impl Into<String>) -> Result<Self, StorageError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_tokio_connection().await?;

        Ok(Self {
            conn,
            keybase: keybase.into(),
            unqueue_script: Script::new(UNQUEUE_SCRIPT),
        })
    }

    fn queue_key(&self) -> String {
        format!("{}queue", self.keybase)
    }

    fn log_key(&self) -> String {
        format!("{}log", self.keybase)
    }
}

#[async_trait]
impl Storage for RedisStorage {
    async fn queue(&self, req: &SerializedRequest) -> Result<String, StorageError> {
        let key = content_key(&self.keybase, req)?;
        let payload = serde_json::to_string(req)?;
        let mut conn = self.conn.clone();

        let _: () = redis::pipe()
            .atomic()
            .set(&key, payload)
            .ignore()
            .rpush(self.queue_key(), &key)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(key)
    }

    async fn unqueue(&self) -> Result<Option<(SerializedRequest, String)>, StorageError> {
        let mut conn = self.conn.clone();

        let popped: Option<(String, String)> = self
            .unqueue_script
            .key(self.queue_key())
            .invoke_async(&mut conn)
            .await?;

        match popped {
            Some((key, payload)) => {
                let req = serde_json::from_str(&payload)?;
                Ok(Some((req, key)))
            }
            None => Ok(None),
        }
    }

    async fn log(&self, key: &str, outcome: &Outcome) -> Result<(), StorageError> {
        let entry = serde_json::to_string(&LogEntry::new(key, outcome))?;
        let mut conn = self.conn.clone();

        let _: () = conn.rpush(self.log_key(), entry).await?;
        Ok(())
    }
}
