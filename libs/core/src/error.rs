//! # ドメインエラー型
//!
//! `thiserror` を使い、すべてのドメインエラーに明確な型を付与する。
//! Iron Principles: `unwrap()` / `expect()` は禁止。

use thiserror::Error;

/// ScribeFactory のドメインエラー
#[derive(Debug, Error)]
pub enum ScribeError {
    // === 外部コラボレータ (ストリーミング補完) ===
    #[error("ネットワーク接続に失敗: {reason}")]
    Network { reason: String },

    #[error("API 認証エラー (無効または期限切れの資格情報): {reason}")]
    Auth { reason: String },

    #[error("レート制限超過 (429): {reason}")]
    RateLimit { reason: String },

    #[error("プロバイダ側サーバーエラー (HTTP {status}): {reason}")]
    Server { status: u16, reason: String },

    // === ゲートウェイ ===
    #[error("ゲートウェイ実行エラー: {reason}")]
    Gateway { reason: String },

    #[error("API が空の応答を返した (model: {model})")]
    EmptyResponse { model: String },

    // === 設定 ===
    #[error("ペルソナプロファイル読み込みエラー: {source}")]
    ProfileLoad {
        #[source]
        source: anyhow::Error,
    },
}

impl ScribeError {
    /// ゲートウェイ内リトライの対象か。
    /// レート制限・サーバー系・ネットワーク断のみ一過性とみなす。
    /// 認証エラーは何度呼んでも直らないため対象外。
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ScribeError::Network { .. }
                | ScribeError::RateLimit { .. }
                | ScribeError::Server { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ScribeError::RateLimit { reason: "quota".into() }.is_transient());
        assert!(ScribeError::Server { status: 503, reason: "overloaded".into() }.is_transient());
        assert!(ScribeError::Network { reason: "refused".into() }.is_transient());
        assert!(!ScribeError::Auth { reason: "bad key".into() }.is_transient());
        assert!(!ScribeError::Gateway { reason: "bug".into() }.is_transient());
    }
}
