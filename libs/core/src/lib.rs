//! # Core — ドメインロジック層
//!
//! ScribeFactory の長文生成エンジンを定義する。
//! ストリーミング呼び出しの具体実装は `infrastructure` クレートに委譲する
//! （依存性逆転の原則）。

pub mod contracts;
pub mod error;
pub mod language;
pub mod oracle;
pub mod planner;
pub mod prompt_forge;
pub mod sanitizer;
pub mod shot_parser;
pub mod traits;
pub mod weaver;
