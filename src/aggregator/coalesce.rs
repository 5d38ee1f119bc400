//! Request coalescing
//!
//! Short-window buckets keyed by rounded coordinates. New tasks for an
//! in-flight bucketed coordinate may attach to the existing task and share
//! its result. Advisory only: correctness does not depend on it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::info;

use crate::types::GeoPoint;

const FLUSH_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone, Default)]
pub struct RequestCoalescer {
    buckets: Arc<Mutex<HashMap<String, Bucket>>>,
}

struct Bucket {
    primary_task: String,
    attached: Vec<String>,
}

pub fn bucket_key(point: &GeoPoint) -> String {
    format!("{:.6},{:.6}", point.latitude, point.longitude)
}

impl RequestCoalescer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `task_id` for the point's bucket. Returns the primary task
    /// id when an earlier task already holds the bucket, meaning the caller
    /// may wait on that task instead of running its own.
    pub async fn attach(&self, point: &GeoPoint, task_id: &str) -> Option<String> {
        let key = bucket_key(point);
        let mut buckets = self.buckets.lock().await;
        match buckets.get_mut(&key) {
            Some(bucket) => {
                bucket.attached.push(task_id.to_string());
                Some(bucket.primary_task.clone())
            }
            None => {
                buckets.insert(
                    key,
                    Bucket {
                        primary_task: task_id.to_string(),
                        attached: Vec::new(),
                    },
                );
                None
            }
        }
    }

    pub async fn flush(&self) {
        let drained: Vec<(String, usize)> = {
            let mut buckets = self.buckets.lock().await;
            buckets
                .drain()
                .map(|(key, bucket)| (key, 1 + bucket.attached.len()))
                .collect()
        };
        for (key, count) in drained {
            if count > 1 {
                info!(bucket = %key, tasks = count, "flushed coalesced requests");
            }
        }
    }

    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let coalescer = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                coalescer.flush().await;
            }
        })
    }
}
