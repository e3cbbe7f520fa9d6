//! # 一過性障害のリトライ
//!
//! レート制限・サーバーエラー・ネットワーク断に限り、倍々の待ち時間で
//! 再試行する。認証エラーは即座に返す。続きループのコントローラは
//! リトライしない契約のため、リトライはこのゲートウェイ層に閉じる。

use scribe_core::error::ScribeError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// 既定の最大再試行回数
pub const DEFAULT_MAX_RETRIES: usize = 3;
/// 初回の待ち時間（ミリ秒）。以後は倍々
pub const INITIAL_BACKOFF_MS: u64 = 2000;

/// 一過性エラーに限って `op` を再試行する
pub async fn retry_transient<T, F, Fut>(op: F) -> Result<T, ScribeError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ScribeError>>,
{
    let mut attempts_left = DEFAULT_MAX_RETRIES;
    let mut delay = Duration::from_millis(INITIAL_BACKOFF_MS);

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempts_left > 0 => {
                warn!(
                    "🔄 [Gateway] Retrying after transient error (attempts left: {}, waiting {:?}): {}",
                    attempts_left, delay, e
                );
                tokio::time::sleep(delay).await;
                attempts_left -= 1;
                delay *= 2;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_then_succeeds() {
        let calls = AtomicUsize::new(0);
        let result = retry_transient(|| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ScribeError::RateLimit { reason: "quota".into() })
                } else {
                    Ok("done")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_error_is_not_retried() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = retry_transient(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ScribeError::Auth { reason: "bad key".into() }) }
        })
        .await;
        assert!(matches!(result, Err(ScribeError::Auth { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_budget() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = retry_transient(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ScribeError::Server { status: 503, reason: "overloaded".into() }) }
        })
        .await;
        assert!(matches!(result, Err(ScribeError::Server { .. })));
        // 初回 + 再試行 3 回
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
