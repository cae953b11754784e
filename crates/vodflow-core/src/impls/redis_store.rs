//! Redis-backed work order store.
//!
//! Layout:
//! - `{prefix}:order:{id}` - JSON `WorkOrderRecord`
//! - `{prefix}:open` - set of open order ids, so `list_open` never scans keys
//!
//! Every write goes through a Lua script so that the record and the open
//! index change together, and so that `compare_and_put` is atomic across
//! orchestrator instances. Closed records carry `EXPIRE closed_ttl`.
//!
//! # Thread Safety
//! The store wraps a `ConnectionManager`, which multiplexes one connection
//! and reconnects on its own. Each call clones the manager handle, so the
//! store is shared freely between the reconcile loop and callback tasks.
//!
//! # Example
//! ```ignore
//! let store = RedisWorkOrderStore::connect("redis://127.0.0.1/", "vodflow", DEFAULT_CLOSED_TTL).await?;
//! let manager = WorkOrderManager::new(Arc::new(store), Arc::new(SystemClock));
//! ```

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use redis::Script;
use redis::aio::ConnectionManager;
use tracing::{debug, info, warn};

use crate::domain::record::{decode, encode};
use crate::domain::{WorkOrder, WorkOrderId};
use crate::error::StoreError;
use crate::ports::WorkOrderStore;

pub const DEFAULT_KEY_PREFIX: &str = "vodflow";
pub const DEFAULT_CLOSED_TTL: Duration = Duration::from_secs(24 * 60 * 60);

// KEYS[1] order key, KEYS[2] open index
// ARGV[1] record, ARGV[2] id, ARGV[3] "1" when open, ARGV[4] ttl seconds
const WRITE_RECORD: &str = r"
if ARGV[3] == '1' then
  redis.call('SET', KEYS[1], ARGV[1])
  redis.call('SADD', KEYS[2], ARGV[2])
else
  redis.call('SET', KEYS[1], ARGV[1], 'EX', ARGV[4])
  redis.call('SREM', KEYS[2], ARGV[2])
end
return 1
";

const CREATE_GUARD: &str = r"
if redis.call('EXISTS', KEYS[1]) == 1 then
  return 0
end
";

// ARGV[5] expected revision
const REVISION_GUARD: &str = r"
local current = redis.call('GET', KEYS[1])
if not current then
  return 0
end
local revision = cjson.decode(current)['revision'] or 0
if tonumber(revision) ~= tonumber(ARGV[5]) then
  return 0
end
";

/// Key naming for one store prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisKeys {
    prefix: String,
}

impl RedisKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn order(&self, id: &WorkOrderId) -> String {
        format!("{}:order:{}", self.prefix, id)
    }

    pub fn open_index(&self) -> String {
        format!("{}:open", self.prefix)
    }
}

/// `EX 0` is rejected by Redis, so anything under a second rounds up.
fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

struct Scripts {
    create: Script,
    compare_and_put: Script,
    put: Script,
}

impl Scripts {
    fn new() -> Self {
        Self {
            create: Script::new(&format!("{CREATE_GUARD}{WRITE_RECORD}")),
            compare_and_put: Script::new(&format!("{REVISION_GUARD}{WRITE_RECORD}")),
            put: Script::new(WRITE_RECORD),
        }
    }
}

pub struct RedisWorkOrderStore {
    conn: ConnectionManager,
    keys: RedisKeys,
    closed_ttl: Duration,
    scripts: Scripts,
}

impl fmt::Debug for RedisWorkOrderStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisWorkOrderStore")
            .field("connection", &"ConnectionManager")
            .field("keys", &self.keys)
            .field("closed_ttl", &self.closed_ttl)
            .finish()
    }
}

impl RedisWorkOrderStore {
    /// Open a client for `redis_url` and wait for the first connection.
    pub async fn connect(
        redis_url: &str,
        key_prefix: impl Into<String>,
        closed_ttl: Duration,
    ) -> Result<Self, StoreError> {
        info!(redis_url, "connecting to redis work order store");
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::with_connection(conn, key_prefix, closed_ttl))
    }

    /// Build on an existing connection, e.g. one shared with other Redis users
    /// in the process. Nothing is sent to the server here.
    pub fn with_connection(
        conn: ConnectionManager,
        key_prefix: impl Into<String>,
        closed_ttl: Duration,
    ) -> Self {
        Self {
            conn,
            keys: RedisKeys::new(key_prefix),
            closed_ttl,
            scripts: Scripts::new(),
        }
    }

    pub fn keys(&self) -> &RedisKeys {
        &self.keys
    }

    async fn run_write(
        &self,
        script: &Script,
        order: &WorkOrder,
        expected_revision: Option<u64>,
    ) -> Result<bool, StoreError> {
        let record = encode(order)?;
        let mut invocation = script.prepare_invoke();
        invocation
            .key(self.keys.order(&order.id))
            .key(self.keys.open_index())
            .arg(record)
            .arg(order.id.as_str())
            .arg(if order.is_open() { "1" } else { "0" })
            .arg(ttl_secs(self.closed_ttl));
        if let Some(expected) = expected_revision {
            invocation.arg(expected);
        }

        let mut conn = self.conn.clone();
        let written: i64 = invocation.invoke_async(&mut conn).await?;
        Ok(written == 1)
    }
}

#[async_trait]
impl WorkOrderStore for RedisWorkOrderStore {
    async fn create(&self, order: &WorkOrder) -> Result<(), StoreError> {
        if self.run_write(&self.scripts.create, order, None).await? {
            debug!(work_order_id = %order.id, "work order created");
            Ok(())
        } else {
            Err(StoreError::AlreadyExists(order.id.clone()))
        }
    }

    async fn get(&self, id: &WorkOrderId) -> Result<Option<WorkOrder>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(self.keys.order(id))
            .query_async(&mut conn)
            .await?;
        raw.as_deref().map(decode).transpose()
    }

    async fn list_open(&self) -> Result<Vec<WorkOrder>, StoreError> {
        let mut conn = self.conn.clone();
        let mut ids: Vec<String> = redis::cmd("SMEMBERS")
            .arg(self.keys.open_index())
            .query_async(&mut conn)
            .await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        ids.sort();

        let keys: Vec<String> = ids
            .iter()
            .map(|id| self.keys.order(&WorkOrderId::new(id.as_str())))
            .collect();
        let raws: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await?;

        let mut open = Vec::with_capacity(raws.len());
        for (id, raw) in ids.iter().zip(raws) {
            let Some(raw) = raw else {
                // Deleted by another instance between SMEMBERS and MGET.
                debug!(work_order_id = %id, "open index entry without record");
                continue;
            };
            match decode(&raw) {
                Ok(order) if order.is_open() => open.push(order),
                Ok(_) => {}
                Err(e) => {
                    warn!(work_order_id = %id, error = %e, "skipping undecodable work order");
                }
            }
        }
        open.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(open)
    }

    async fn put(&self, order: &WorkOrder) -> Result<(), StoreError> {
        self.run_write(&self.scripts.put, order, None).await?;
        Ok(())
    }

    async fn compare_and_put(
        &self,
        order: &WorkOrder,
        expected_revision: u64,
    ) -> Result<bool, StoreError> {
        let written = self
            .run_write(&self.scripts.compare_and_put, order, Some(expected_revision))
            .await?;
        if !written {
            debug!(work_order_id = %order.id, expected_revision, "revision conflict");
        }
        Ok(written)
    }

    async fn delete(&self, id: &WorkOrderId) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let (removed, _): (i64, i64) = redis::pipe()
            .atomic()
            .cmd("DEL")
            .arg(self.keys.order(id))
            .cmd("SREM")
            .arg(self.keys.open_index())
            .arg(id.as_str())
            .query_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }
}
