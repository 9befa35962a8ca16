//! `NodeRegistry` over Redis: one `SET ... EX` per heartbeat, `KEYS` +
//! `MGET` to enumerate the active set.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::debug;

use crate::errors::CoreError;
use crate::model::Node;
use crate::ports::NodeRegistry;

const KEY_PREFIX: &str = "node:";

pub struct RedisNodeRegistry {
    conn: ConnectionManager,
}

impl RedisNodeRegistry {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url).map_err(CoreError::from)?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(CoreError::from)?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl NodeRegistry for RedisNodeRegistry {
    async fn register(&self, node: &Node, ttl: Duration) -> anyhow::Result<()> {
        let key = format!("{KEY_PREFIX}{}", node.id);
        let payload = serde_json::to_string(node)?;
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(key, payload, ttl.as_secs().max(1))
            .await
            .map_err(CoreError::from)?;
        Ok(())
    }

    async fn list_active(&self) -> anyhow::Result<Vec<Node>> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = conn
            .keys(format!("{KEY_PREFIX}*"))
            .await
            .map_err(CoreError::from)?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let values: Vec<Option<String>> = conn.mget(&keys).await.map_err(CoreError::from)?;
        let mut nodes = Vec::with_capacity(values.len());
        for (key, value) in keys.iter().zip(values.into_iter()) {
            match value {
                Some(raw) => match serde_json::from_str::<Node>(&raw) {
                    Ok(node) => nodes.push(node),
                    Err(e) => debug!(%key, "skipping node record with unparsable payload: {e}"),
                },
                None => debug!(%key, "node expired between KEYS scan and MGET read, skipping"),
            }
        }
        Ok(nodes)
    }
}
