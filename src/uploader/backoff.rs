// 指数退避策略
//
// 第 i 次重试前等待 2^i 秒 + [0, 500ms) 随机抖动（防雪崩），
// 结果不超过上限。

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

/// 初始退避延迟
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// 随机抖动上限（不含）
pub const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(500);

/// 最大退避延迟
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// 退避策略
#[derive(Debug)]
pub struct BackoffPolicy {
    base_delay: Duration,
    max_jitter: Duration,
    max_delay: Duration,
    rng: Mutex<StdRng>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_JITTER, DEFAULT_MAX_DELAY)
    }
}

impl BackoffPolicy {
    pub fn new(base_delay: Duration, max_jitter: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_jitter,
            max_delay,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// 固定随机种子，相同种子得到相同的等待序列
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    /// 设置最大退避延迟
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// 不等待（用于测试和本地服务）
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO, Duration::ZERO)
    }

    /// 计算第 `attempt` 次失败后的等待时间（从 0 开始）
    ///
    /// # 延迟序列（不含抖动）
    /// - attempt=0: 1s
    /// - attempt=1: 2s
    /// - attempt=2: 4s
    /// - 最大: max_delay
    pub fn wait(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        let base = self
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay);

        let jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(self.rng.lock().gen_range(0..jitter_ms))
        };

        base.saturating_add(jitter).min(self.max_delay)
    }
}
