//! Login attempt guard
//!
//! Brute-force prevention backed by the primary. Each key (typically the
//! client address) gets a few free attempts; after that every attempt has
//! to wait out a delay that grows along the Fibonacci sequence from
//! `min_wait` up to `max_wait`.

use crate::common::{timestamp_now_millis, Error, GuardConfig, Result};
use crate::node::NodeHandle;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Stored attempt counter for one key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub count: u32,
    /// Unix millis
    pub first_request: i64,
    pub last_request: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    Allowed { remaining: u32 },
    Blocked { retry_after: Duration },
}

impl GuardDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GuardDecision::Allowed { .. })
    }
}

#[derive(Debug, Clone)]
pub struct LoginGuard {
    node: Arc<NodeHandle>,
    config: GuardConfig,
}

impl LoginGuard {
    pub fn new(node: Arc<NodeHandle>, config: GuardConfig) -> Self {
        Self { node, config }
    }

    pub fn node(&self) -> &Arc<NodeHandle> {
        &self.node
    }

    /// Count one attempt for `key`, unless it arrives before the current
    /// delay has passed (blocked attempts are not counted).
    pub async fn check(&self, key: &str) -> Result<GuardDecision> {
        self.check_at(key, timestamp_now_millis()).await
    }

    async fn check_at(&self, key: &str, now: i64) -> Result<GuardDecision> {
        self.ensure_primary()?;
        let storage_key = self.key(key);

        let record = match self.node.get(&storage_key).await? {
            Some(raw) => serde_json::from_slice::<AttemptRecord>(&raw).ok(),
            None => None,
        };

        let record = match record {
            Some(record) => {
                let wait = self.delay_for(record.count);
                let next_allowed = record.last_request + wait.as_millis() as i64;
                if now < next_allowed {
                    return Ok(GuardDecision::Blocked {
                        retry_after: Duration::from_millis((next_allowed - now) as u64),
                    });
                }
                AttemptRecord {
                    count: record.count.saturating_add(1),
                    first_request: record.first_request,
                    last_request: now,
                }
            }
            None => AttemptRecord {
                count: 1,
                first_request: now,
                last_request: now,
            },
        };

        let json = serde_json::to_vec(&record)?;
        self.node
            .set(&storage_key, Bytes::from(json), Some(self.config.max_wait()))
            .await?;

        Ok(GuardDecision::Allowed {
            remaining: self.config.free_retries.saturating_sub(record.count),
        })
    }

    /// Forget the attempts for `key` (after a successful login)
    pub async fn reset(&self, key: &str) -> Result<()> {
        self.ensure_primary()?;
        self.node.del(&self.key(key)).await?;
        Ok(())
    }

    /// Wait required after `count` recorded attempts
    pub fn delay_for(&self, count: u32) -> Duration {
        if count < self.config.free_retries {
            return Duration::ZERO;
        }

        let min = self.config.min_wait();
        let max = self.config.max_wait();
        let (mut prev, mut cur) = (min, min);
        for _ in 0..(count - self.config.free_retries) {
            if cur >= max {
                break;
            }
            let next = prev + cur;
            prev = cur;
            cur = next;
        }
        cur.min(max)
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    fn ensure_primary(&self) -> Result<()> {
        if self.node.is_primary() {
            Ok(())
        } else {
            Err(Error::StaleBinding(self.node.label().to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::NodeConfig;
    use crate::node::{Connector, Endpoint, MemoryWorld, Role};

    const MIN: Duration = Duration::from_secs(300);

    async fn guard() -> (LoginGuard, Arc<MemoryWorld>) {
        let endpoint = Endpoint::new("127.0.0.1", 6379);
        let world = MemoryWorld::with_nodes([endpoint.clone()]);
        let node = Arc::new(NodeHandle::new(
            0,
            &NodeConfig::new("127.0.0.1", 6379),
            Duration::from_millis(200),
        ));
        node.attach_client(world.connector().connect(&endpoint).await.unwrap());
        node.set_role(Role::Primary);
        (LoginGuard::new(node, GuardConfig::default()), world)
    }

    #[tokio::test]
    async fn test_delays() {
        let (guard, _world) = guard().await;
        assert_eq!(guard.delay_for(0), Duration::ZERO);
        assert_eq!(guard.delay_for(2), Duration::ZERO);
        assert_eq!(guard.delay_for(3), MIN);
        assert_eq!(guard.delay_for(4), MIN * 2);
        assert_eq!(guard.delay_for(5), MIN * 3);
        assert_eq!(guard.delay_for(6), MIN * 5);
        assert_eq!(guard.delay_for(50), Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn test_blocks_after_free_retries() {
        let (guard, _world) = guard().await;
        let t0 = 1_700_000_000_000;

        assert_eq!(
            guard.check_at("10.0.0.1", t0).await.unwrap(),
            GuardDecision::Allowed { remaining: 2 }
        );
        assert_eq!(
            guard.check_at("10.0.0.1", t0 + 1).await.unwrap(),
            GuardDecision::Allowed { remaining: 1 }
        );
        assert_eq!(
            guard.check_at("10.0.0.1", t0 + 2).await.unwrap(),
            GuardDecision::Allowed { remaining: 0 }
        );

        match guard.check_at("10.0.0.1", t0 + 3).await.unwrap() {
            GuardDecision::Blocked { retry_after } => {
                assert_eq!(retry_after, MIN - Duration::from_millis(1))
            }
            other => panic!("expected block, got {:?}", other),
        }

        // once the wait is over the attempt goes through
        let later = t0 + 2 + MIN.as_millis() as i64;
        assert!(guard.check_at("10.0.0.1", later).await.unwrap().is_allowed());

        // other keys are unaffected
        assert!(guard.check_at("10.0.0.2", t0 + 3).await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn test_reset() {
        let (guard, world) = guard().await;
        for i in 0..4 {
            guard.check_at("10.0.0.1", i).await.unwrap();
        }
        guard.reset("10.0.0.1").await.unwrap();
        assert!(world
            .read(&Endpoint::new("127.0.0.1", 6379), "bruteforce:10.0.0.1")
            .is_none());
        assert_eq!(
            guard.check_at("10.0.0.1", 10).await.unwrap(),
            GuardDecision::Allowed { remaining: 2 }
        );
    }

    #[tokio::test]
    async fn test_stale_when_demoted() {
        let (guard, _world) = guard().await;
        guard.node().set_role(Role::Replica);
        let err = guard.check("10.0.0.1").await.unwrap_err();
        assert!(matches!(err, Error::StaleBinding(_)));
    }
}
