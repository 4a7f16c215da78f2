//! 有界轮询
//!
//! 心跳等待和登记等待共用同一个轮询函数：固定间隔、固定上限，
//! 只有"条件满足"和"超时"两种退出方式。时钟可注入，测试中不真实睡眠。

use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// 时钟接口
#[async_trait]
pub trait Clock: Send + Sync {
    /// 当前时刻
    fn now(&self) -> Instant;

    /// 睡眠指定时长
    async fn sleep(&self, duration: Duration);
}

/// 基于 tokio 定时器的时钟
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// 手动推进的时钟，`sleep` 立即返回并推进当前时刻
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    /// 手动推进
    pub fn advance(&self, duration: Duration) {
        if let Ok(mut offset) = self.offset.lock() {
            *offset += duration;
        }
    }

    /// 累计推进时长
    pub fn elapsed(&self) -> Duration {
        self.offset.lock().map(|o| *o).unwrap_or_default()
    }

    /// 每次 `sleep` 调用的时长记录
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        if let Ok(mut sleeps) = self.sleeps.lock() {
            sleeps.push(duration);
        }
        self.advance(duration);
    }
}

/// 轮询策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl PollPolicy {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// 心跳等待默认策略: 每 10 秒, 最长 300 秒
    pub fn heartbeat() -> Self {
        Self::new(Duration::from_secs(10), Duration::from_secs(300))
    }

    /// 登记等待默认策略: 每 30 秒, 最长 600 秒
    pub fn registry() -> Self {
        Self::new(Duration::from_secs(30), Duration::from_secs(600))
    }
}

/// 轮询结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOutcome {
    /// 条件是否在上限内满足
    pub satisfied: bool,
    /// 从开始到结束的耗时
    pub elapsed: Duration,
    /// 探测次数
    pub attempts: u32,
}

/// 按策略反复探测直到条件满足或超时
///
/// 立即探测一次，之后每隔 `interval` 探测一次；到达 `timeout` 时做最后一次探测。
/// 最后一次睡眠会被截断到剩余时长，不会越过上限。
pub async fn poll_until<F, Fut>(policy: &PollPolicy, clock: &dyn Clock, mut probe: F) -> PollOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = clock.now();
    let mut attempts = 0;

    loop {
        attempts += 1;
        let satisfied = probe().await;
        let elapsed = clock.now().saturating_duration_since(start);

        trace!("轮询第 {} 次, 已耗时 {:?}, 满足: {}", attempts, elapsed, satisfied);

        if satisfied || elapsed >= policy.timeout {
            return PollOutcome {
                satisfied,
                elapsed,
                attempts,
            };
        }

        let remaining = policy.timeout - elapsed;
        clock.sleep(policy.interval.min(remaining)).await;
    }
}
