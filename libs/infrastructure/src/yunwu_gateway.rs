//! # Yunwu Gateway — OpenAI 互換 SSE ストリーミング
//!
//! `/v1/chat/completions` に `stream: true` で接続し、`data:` 行を
//! デルタ本文に展開して流す。接続確立までは一過性エラーをリトライするが、
//! ストリーム開始後のエラーはそのまま上流へ返す（部分出力はコントローラ側が
//! 保持している）。

use crate::retry::retry_transient;
use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use scribe_core::contracts::{ChatRequest, ClientConfig};
use scribe_core::error::ScribeError;
use scribe_core::traits::{ChunkStream, CompletionGateway};
use std::collections::VecDeque;
use tracing::info;

/// OpenAI 互換エンドポイント用ゲートウェイ
pub struct YunwuGateway {
    http: reqwest::Client,
}

impl Default for YunwuGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl YunwuGateway {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    async fn open(
        &self,
        config: &ClientConfig,
        request: &ChatRequest,
        stream: bool,
    ) -> Result<reqwest::Response, ScribeError> {
        if config.api_key.trim().is_empty() {
            return Err(ScribeError::Auth {
                reason: "API キー未設定".to_string(),
            });
        }

        let mut messages = Vec::new();
        if !request.system_instruction.is_empty() {
            messages.push(serde_json::json!({
                "role": "system",
                "content": request.system_instruction,
            }));
        }
        messages.push(serde_json::json!({
            "role": "user",
            "content": request.prompt,
        }));

        let payload = serde_json::json!({
            "model": config.model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "stream": stream,
        });

        let url = format!("{}/v1/chat/completions", config.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .bearer_auth(&config.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ScribeError::Network { reason: e.to_string() })?;

        let status = response.status().as_u16();
        if response.status().is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, body))
    }
}

/// HTTP ステータスをドメインエラー分類へ写像する
fn classify_status(status: u16, body: String) -> ScribeError {
    match status {
        401 | 403 => ScribeError::Auth { reason: body },
        429 => ScribeError::RateLimit { reason: body },
        s if (500..600).contains(&s) => ScribeError::Server { status: s, reason: body },
        s => ScribeError::Gateway {
            reason: format!("HTTP {}: {}", s, body),
        },
    }
}

/// `data:` 行 1 本からデルタ本文を取り出す。
/// `[DONE]` 終端・コメント行・パース不能な行は None
fn parse_sse_line(line: &str) -> Option<String> {
    let data = line
        .strip_prefix("data: ")
        .or_else(|| line.strip_prefix("data:"))?
        .trim();
    if data == "[DONE]" {
        return None;
    }
    let json: serde_json::Value = serde_json::from_str(data).ok()?;
    let content = json["choices"][0]["delta"]["content"].as_str()?;
    if content.is_empty() {
        None
    } else {
        Some(content.to_string())
    }
}

/// 完結した行を取り出し、未完の行末をバッファに残す。
/// `\n` のバイト位置は常に UTF-8 文字境界なので、チャンク跨ぎの
/// マルチバイト文字が壊れることはない
fn drain_complete_lines(buffer: &mut Vec<u8>) -> Vec<String> {
    let Some(pos) = buffer.iter().rposition(|&b| b == b'\n') else {
        return Vec::new();
    };
    let complete: Vec<u8> = buffer.drain(..=pos).collect();
    String::from_utf8_lossy(&complete)
        .lines()
        .map(str::to_string)
        .collect()
}

struct SseState {
    bytes: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>,
    buffer: Vec<u8>,
    pending: VecDeque<String>,
}

/// HTTP レスポンスを SSE チャンク列へ変換する
fn sse_chunk_stream(response: reqwest::Response) -> ChunkStream {
    let state = SseState {
        bytes: response.bytes_stream().map(|r| r.map(|b| b.to_vec())).boxed(),
        buffer: Vec::new(),
        pending: VecDeque::new(),
    };

    stream::try_unfold(state, |mut st| async move {
        loop {
            if let Some(chunk) = st.pending.pop_front() {
                return Ok(Some((chunk, st)));
            }
            match st.bytes.next().await {
                Some(Ok(bytes)) => {
                    st.buffer.extend_from_slice(&bytes);
                    for line in drain_complete_lines(&mut st.buffer) {
                        if let Some(content) = parse_sse_line(&line) {
                            st.pending.push_back(content);
                        }
                    }
                }
                Some(Err(e)) => {
                    return Err(ScribeError::Network { reason: e.to_string() });
                }
                None => return Ok(None),
            }
        }
    })
    .boxed()
}

#[async_trait]
impl CompletionGateway for YunwuGateway {
    async fn stream_chat(
        &self,
        config: &ClientConfig,
        request: ChatRequest,
    ) -> Result<ChunkStream, ScribeError> {
        info!(
            "📡 [Yunwu] Opening stream (model: {}, prompt: {} chars)",
            config.model,
            request.prompt.chars().count()
        );
        let response = retry_transient(|| self.open(config, &request, true)).await?;
        Ok(sse_chunk_stream(response))
    }

    async fn complete(
        &self,
        config: &ClientConfig,
        request: ChatRequest,
    ) -> Result<String, ScribeError> {
        let response = retry_transient(|| self.open(config, &request, false)).await?;
        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ScribeError::Gateway { reason: format!("Invalid JSON response: {}", e) })?;
        let content = json["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("");
        if content.is_empty() {
            return Err(ScribeError::EmptyResponse {
                model: config.model.clone(),
            });
        }
        Ok(content.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sse_line_extracts_delta() {
        let line = r#"data: {"choices":[{"delta":{"content":"你好"}}]}"#;
        assert_eq!(parse_sse_line(line), Some("你好".to_string()));
    }

    #[test]
    fn test_parse_sse_line_done_and_noise() {
        assert_eq!(parse_sse_line("data: [DONE]"), None);
        assert_eq!(parse_sse_line(": keepalive"), None);
        assert_eq!(parse_sse_line("event: ping"), None);
        assert_eq!(parse_sse_line("data: not-json"), None);
        // 空デルタ（role 開始フレーム等）は流さない
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#),
            None
        );
    }

    #[test]
    fn test_drain_complete_lines_keeps_partial_tail() {
        let mut buffer = "data: a\ndata: b\ndata: part".as_bytes().to_vec();
        let lines = drain_complete_lines(&mut buffer);
        assert_eq!(lines, vec!["data: a", "data: b"]);
        assert_eq!(buffer, b"data: part");

        // 続きのバイトが来て行が完結する
        buffer.extend_from_slice(b"ial\n");
        let lines = drain_complete_lines(&mut buffer);
        assert_eq!(lines, vec!["data: partial"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_drain_handles_multibyte_chunk_boundary() {
        // 「好」(3 バイト) をチャンク境界で分断しても行単位なら壊れない
        let full = "data: {\"choices\":[{\"delta\":{\"content\":\"好\"}}]}\n".as_bytes();
        let (head, tail) = full.split_at(20);
        let mut buffer = head.to_vec();
        assert!(drain_complete_lines(&mut buffer).is_empty());
        buffer.extend_from_slice(tail);
        let lines = drain_complete_lines(&mut buffer);
        assert_eq!(lines.len(), 1);
        assert_eq!(parse_sse_line(&lines[0]), Some("好".to_string()));
    }

    #[test]
    fn test_classify_status_taxonomy() {
        assert!(matches!(classify_status(401, String::new()), ScribeError::Auth { .. }));
        assert!(matches!(classify_status(403, String::new()), ScribeError::Auth { .. }));
        assert!(matches!(classify_status(429, String::new()), ScribeError::RateLimit { .. }));
        assert!(matches!(
            classify_status(503, String::new()),
            ScribeError::Server { status: 503, .. }
        ));
        assert!(matches!(classify_status(404, String::new()), ScribeError::Gateway { .. }));
    }
}
