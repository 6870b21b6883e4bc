use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use parking_lot::Mutex;
use redis::{Client, Connection};

use super::{ScanCursor, ScanPage, Store};
use crate::error::{StoreError, StoreResult};

/// Redis-backed store shared by every process pointing at the same server.
///
/// Commands run over one connection guarded by a `parking_lot::Mutex`. Every
/// primitive is a single Redis command except [`Store::set_drain_into`], which
/// runs as a `MULTI`/`EXEC` transaction.
pub struct RedisStore {
    connection: Mutex<Connection>,
}

impl RedisStore {
    /// Connects to `url` (for example `redis://127.0.0.1:6379/0`).
    pub fn connect(url: &str) -> StoreResult<Self> {
        let client = Client::open(url)?;
        let connection = client.get_connection()?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }
}

impl Store for RedisStore {
    fn hash_get(&self, bucket: &str, field: &str) -> StoreResult<Option<Vec<u8>>> {
        let mut conn = self.connection.lock();
        Ok(redis::cmd("HGET")
            .arg(bucket)
            .arg(field)
            .query::<Option<Vec<u8>>>(&mut *conn)?)
    }

    fn hash_set(&self, bucket: &str, field: &str, value: &[u8]) -> StoreResult<()> {
        let mut conn = self.connection.lock();
        redis::cmd("HSET")
            .arg(bucket)
            .arg(field)
            .arg(value)
            .query::<()>(&mut *conn)?;
        Ok(())
    }

    fn hash_get_all(&self, bucket: &str) -> StoreResult<Vec<(String, Vec<u8>)>> {
        let mut conn = self.connection.lock();
        let fields: HashMap<String, Vec<u8>> =
            redis::cmd("HGETALL").arg(bucket).query(&mut *conn)?;
        Ok(fields.into_iter().collect())
    }

    fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let mut conn = self.connection.lock();
        Ok(redis::cmd("PEXPIRE")
            .arg(key)
            .arg(millis)
            .query::<bool>(&mut *conn)?)
    }

    fn set_add(&self, set: &str, members: &[String]) -> StoreResult<usize> {
        if members.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection.lock();
        Ok(redis::cmd("SADD")
            .arg(set)
            .arg(members)
            .query::<usize>(&mut *conn)?)
    }

    fn set_remove(&self, set: &str, member: &str) -> StoreResult<bool> {
        let mut conn = self.connection.lock();
        let removed: usize = redis::cmd("SREM").arg(set).arg(member).query(&mut *conn)?;
        Ok(removed > 0)
    }

    fn set_members(&self, set: &str) -> StoreResult<BTreeSet<String>> {
        let mut conn = self.connection.lock();
        let members: Vec<String> = redis::cmd("SMEMBERS").arg(set).query(&mut *conn)?;
        Ok(members.into_iter().collect())
    }

    fn set_union_into(&self, dest: &str, sources: &[&str]) -> StoreResult<usize> {
        let mut conn = self.connection.lock();
        Ok(redis::cmd("SUNIONSTORE")
            .arg(dest)
            .arg(dest)
            .arg(sources)
            .query::<usize>(&mut *conn)?)
    }

    fn set_drain_into(&self, source: &str, dest: &str) -> StoreResult<usize> {
        let mut conn = self.connection.lock();
        let (moved,): (usize,) = redis::pipe()
            .atomic()
            .cmd("SCARD")
            .arg(source)
            .cmd("SUNIONSTORE")
            .arg(dest)
            .arg(dest)
            .arg(source)
            .ignore()
            .cmd("UNLINK")
            .arg(source)
            .ignore()
            .query(&mut *conn)?;
        Ok(moved)
    }

    fn delete(&self, keys: &[String]) -> StoreResult<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection.lock();
        Ok(redis::cmd("UNLINK").arg(keys).query::<usize>(&mut *conn)?)
    }

    fn scan(
        &self,
        pattern: &str,
        cursor: Option<&ScanCursor>,
        count: usize,
    ) -> StoreResult<ScanPage> {
        let position = match cursor {
            Some(cursor) => cursor
                .as_str()
                .parse::<u64>()
                .map_err(|_| StoreError::InvalidCursor(cursor.to_string()))?,
            None => 0,
        };
        let mut conn = self.connection.lock();
        let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(position)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count.max(1))
            .query(&mut *conn)?;
        Ok(ScanPage {
            keys,
            next: (next != 0).then(|| ScanCursor::new(next.to_string())),
        })
    }
}
