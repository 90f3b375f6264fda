use crate::error::{FlowError, FlowResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// リクエスト実行中フラグ（UIの「処理中」表示）
///
/// [`BusyFlag::acquire`] が返すガードが生きている間だけ true になり、
/// 成功・失敗・早期リターンのどの経路でもガードのドロップで false に戻る。
#[derive(Clone, Debug, Default)]
pub struct BusyFlag {
    inner: Arc<AtomicBool>,
}

impl BusyFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// フラグを立てる
    ///
    /// 既に立っている場合は [`FlowError::Busy`]。
    pub fn acquire(&self) -> FlowResult<BusyGuard> {
        if self
            .inner
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(FlowError::Busy);
        }
        Ok(BusyGuard {
            inner: Arc::clone(&self.inner),
        })
    }

    pub fn is_set(&self) -> bool {
        self.inner.load(Ordering::SeqCst)
    }
}

/// ドロップ時にフラグを下ろすガード
#[derive(Debug)]
pub struct BusyGuard {
    inner: Arc<AtomicBool>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.inner.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_clears_on_drop() {
        let flag = BusyFlag::new();
        assert!(!flag.is_set());

        let guard = flag.acquire().unwrap();
        assert!(flag.is_set());

        drop(guard);
        assert!(!flag.is_set());
    }

    #[test]
    fn test_second_acquire_is_rejected() {
        let flag = BusyFlag::new();
        let _guard = flag.acquire().unwrap();

        assert!(matches!(flag.acquire(), Err(FlowError::Busy)));
        // 拒否されてもフラグは立ったまま
        assert!(flag.is_set());
    }

    #[test]
    fn test_clones_share_state() {
        let flag = BusyFlag::new();
        let observer = flag.clone();

        let guard = flag.acquire().unwrap();
        assert!(observer.is_set());
        drop(guard);
        assert!(!observer.is_set());
    }

    #[test]
    fn test_cleared_on_error_path() {
        fn failing(flag: &BusyFlag) -> FlowResult<()> {
            let _guard = flag.acquire()?;
            Err(FlowError::ServerRejected { status: 500 })
        }

        let flag = BusyFlag::new();
        assert!(failing(&flag).is_err());
        assert!(!flag.is_set());
    }
}
