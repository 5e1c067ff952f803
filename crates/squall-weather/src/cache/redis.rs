use std::time::Duration;

use async_trait::async_trait;
use ::redis::aio::ConnectionManager;
use ::redis::AsyncCommands;
use tokio::sync::OnceCell;

use super::{CacheBackend, CacheError};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const OPERATION_TIMEOUT: Duration = Duration::from_millis(500);

/// Remote tier backed by a shared redis connection.
///
/// The connection is established lazily. While redis is unreachable every
/// operation fails with [`CacheError::Backend`] and the next one dials again.
pub struct RedisBackend {
    client: ::redis::Client,
    conn: OnceCell<ConnectionManager>,
}

impl RedisBackend {
    /// Parse `url` without dialing. Only a malformed URL is an error here.
    pub fn new(url: &str) -> Result<Self, CacheError> {
        Ok(Self {
            client: ::redis::Client::open(url)?,
            conn: OnceCell::new(),
        })
    }

    /// Dial once with the longer startup timeout.
    pub async fn warm_up(&self) -> Result<(), CacheError> {
        self.dial(CONNECT_TIMEOUT).await.map(|_| ())
    }

    #[cfg(test)]
    fn is_connected(&self) -> bool {
        self.conn.initialized()
    }

    async fn dial(&self, timeout: Duration) -> Result<ConnectionManager, CacheError> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                match tokio::time::timeout(timeout, ConnectionManager::new(self.client.clone())).await {
                    Ok(result) => Ok::<_, CacheError>(result?),
                    Err(_) => Err(CacheError::Backend(format!("connect timed out after {:?}", timeout))),
                }
            })
            .await?;
        Ok(conn.clone())
    }
}

async fn bounded<T>(
    op: &str,
    fut: impl std::future::Future<Output = ::redis::RedisResult<T>>,
) -> Result<T, CacheError> {
    match tokio::time::timeout(OPERATION_TIMEOUT, fut).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(CacheError::Backend(format!("{} timed out after {:?}", op, OPERATION_TIMEOUT))),
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    fn tier(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.dial(OPERATION_TIMEOUT).await?;
        bounded("GET", conn.get::<_, Option<String>>(key)).await
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), CacheError> {
        let mut conn = self.dial(OPERATION_TIMEOUT).await?;
        // EX 0 is rejected by the server
        bounded("SET", conn.set_ex::<_, _, ()>(key, value, ttl_seconds.max(1))).await
    }
}
