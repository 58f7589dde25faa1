//! 节拍计数与超时

use crate::config::TICKS_PER_SEC;
use crate::error::{Result, RtosError};

/// 单次延时或超时允许的最大节拍数
///
/// 所有未到期的截止时间都必须落在当前时刻的 2^31 节拍以内，
/// 带符号差值比较才能在计数器回绕时保持正确。
pub const MAX_DELAY_TICKS: u32 = i32::MAX as u32;

/// 32 位节拍计数，会回绕
///
/// 比较一律通过带符号差值进行，不要直接比较原始数值。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Tick(u32);

impl Tick {
    pub const ZERO: Tick = Tick(0);

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn wrapping_add(self, ticks: u32) -> Self {
        Self(self.0.wrapping_add(ticks))
    }

    /// `self - earlier` 的带符号差值
    pub const fn since(self, earlier: Tick) -> i32 {
        self.0.wrapping_sub(earlier.0) as i32
    }

    /// 是否严格早于 `other`
    pub const fn is_before(self, other: Tick) -> bool {
        self.since(other) < 0
    }

    /// 是否已经到达 `deadline`
    pub const fn has_reached(self, deadline: Tick) -> bool {
        self.since(deadline) >= 0
    }
}

/// 阻塞调用的超时
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// 立即返回
    NoWait,
    /// 最多等待若干节拍
    Ticks(u32),
    /// 一直等待
    Forever,
}

impl Timeout {
    /// 按毫秒构造超时
    pub fn from_ms(ms: u32) -> Result<Self> {
        Ok(Timeout::Ticks(ms_to_ticks(ms)?))
    }

    pub fn is_no_wait(self) -> bool {
        matches!(self, Timeout::NoWait | Timeout::Ticks(0))
    }

    /// 需要挂到超时链表上的节拍数，`Forever` 为 `None`
    pub(crate) fn ticks(self) -> Result<Option<u32>> {
        match self {
            Timeout::Forever => Ok(None),
            Timeout::NoWait => Ok(Some(0)),
            Timeout::Ticks(n) if n > MAX_DELAY_TICKS => Err(RtosError::InvalidArgument),
            Timeout::Ticks(n) => Ok(Some(n)),
        }
    }
}

/// 毫秒转换为节拍，结果超出 32 位时返回 `InvalidArgument`
pub fn ms_to_ticks(ms: u32) -> Result<u32> {
    let ticks = ms as u64 * TICKS_PER_SEC as u64 / 1000;
    u32::try_from(ticks).map_err(|_| RtosError::InvalidArgument)
}

/// 节拍转换为毫秒
pub fn ticks_to_ms(ticks: u32) -> Result<u32> {
    let ms = ticks as u64 * 1000 / TICKS_PER_SEC as u64;
    u32::try_from(ms).map_err(|_| RtosError::InvalidArgument)
}
