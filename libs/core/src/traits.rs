//! # ドメイントレイト定義
//!
//! ストリーミング補完の具体実装（OpenAI 互換 SSE / Gemini）は
//! `libs/infrastructure` に配置する（依存性逆転の原則）。

use crate::contracts::{ChatRequest, ClientConfig};
use crate::error::ScribeError;
use async_trait::async_trait;
use futures_util::stream::BoxStream;

/// ストリーミング呼び出しが返すチャンク列
pub type ChunkStream = BoxStream<'static, Result<String, ScribeError>>;

/// テキスト補完ゲートウェイ
///
/// エンジンが環境から消費する唯一の能力。設定はモジュール状態ではなく
/// 呼び出しごとに `ClientConfig` として受け取る。
#[async_trait]
pub trait CompletionGateway: Send + Sync {
    /// ストリーミング補完。チャンク列を返し、呼び出し側が逐次消費する。
    /// 返されたストリームを drop すれば残りの消費は放棄される。
    async fn stream_chat(
        &self,
        config: &ClientConfig,
        request: ChatRequest,
    ) -> Result<ChunkStream, ScribeError>;

    /// 企画フェーズ用の非ストリーミング補完。全文を一括で返す。
    async fn complete(
        &self,
        config: &ClientConfig,
        request: ChatRequest,
    ) -> Result<String, ScribeError>;
}
