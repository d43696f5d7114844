//! 限流服务 - 业务能力层
//!
//! 保证同一个客户端的相邻两次发送至少间隔 `min_interval`，
//! 无论有多少并发调用者在抢

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// 最小间隔限流器
///
/// 只持有一个时间戳：下一次授权的时刻。调用者在锁内预定自己的时间槽，
/// 出锁后再等待，所以锁永远不会跨越等待；预定顺序即加锁顺序，不会饿死。
pub struct RateLimiter {
    min_interval: Duration,
    last_grant: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// 创建限流器，`min_interval` 为零时不做任何限制
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_grant: Mutex::new(None),
        }
    }

    /// 不限流
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// 预定下一个时间槽，返回需要等待的时长
    fn reserve(&self) -> Option<Duration> {
        if self.min_interval.is_zero() {
            return None;
        }

        let now = Instant::now();
        let slot = {
            let mut last = self.last_grant.lock();
            let slot = match *last {
                Some(prev) => (prev + self.min_interval).max(now),
                None => now,
            };
            *last = Some(slot);
            slot
        };

        let wait = slot.saturating_duration_since(now);
        if wait.is_zero() {
            None
        } else {
            Some(wait)
        }
    }

    /// 协作式获取：挂起当前任务而不阻塞线程
    pub async fn acquire(&self) {
        if let Some(wait) = self.reserve() {
            trace!("⏳ 限流等待 {:?}", wait);
            tokio::time::sleep(wait).await;
        }
    }

    /// 阻塞式获取：占用调用线程直到时间槽到达
    pub fn acquire_blocking(&self) {
        if let Some(wait) = self.reserve() {
            trace!("⏳ 限流等待 {:?}", wait);
            std::thread::sleep(wait);
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::disabled()
    }
}
