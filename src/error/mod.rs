//! 错误类型与致命错误处理

mod types;

pub use types::{FatalError, Result, RtosError};
pub(crate) use types::Fault;

/// 停机
///
/// 记录错误日志后 panic。目标板上由 panic handler 停在原地，
/// 主机测试中可以用 `#[should_panic]` 观察。
#[cold]
#[track_caller]
pub fn fatal(reason: FatalError) -> ! {
    crate::error!("kernel halted: {}", reason);
    panic!("kernel halted: {}", reason)
}

/// 把内部失败结果转换为对外的 `Result`，致命错误直接停机
#[track_caller]
pub(crate) fn resolve<T>(r: core::result::Result<T, Fault>) -> Result<T> {
    match r {
        Ok(v) => Ok(v),
        Err(Fault::Error(e)) => Err(e),
        Err(Fault::Fatal(f)) => fatal(f),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(RtosError::OutOfMemory.to_string(), "Out of memory");
        assert_eq!(
            FatalError::StackOverflow(crate::kernel::task::TaskId::from_index(2)).to_string(),
            "stack overflow in task 2"
        );
    }

    #[test]
    fn test_resolve_passes_errors_through() {
        assert_eq!(resolve::<u8>(Ok(3)), Ok(3));
        assert_eq!(resolve::<u8>(Err(Fault::Error(RtosError::Timeout))), Err(RtosError::Timeout));
    }

    #[test]
    #[should_panic(expected = "kernel halted")]
    fn test_resolve_halts_on_fatal() {
        let _ = resolve::<()>(Err(Fault::Fatal(FatalError::MutexNotOwner)));
    }
}
