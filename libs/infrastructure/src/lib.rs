//! # Infrastructure — 外部 I/O 実装層
//!
//! `scribe_core::traits::CompletionGateway` の具体実装を提供する。
//! OpenAI 互換 SSE (yunwu) と Gemini の 2 系統。

pub mod gemini_gateway;
pub mod retry;
pub mod yunwu_gateway;

pub use gemini_gateway::GeminiGateway;
pub use yunwu_gateway::YunwuGateway;
