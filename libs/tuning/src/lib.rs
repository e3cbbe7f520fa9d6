//! # Tuning — ペルソナプロファイル管理
//!
//! 生成に使うドメインペルソナ（システムインストラクション + 企画プロンプト）を
//! 管理する。組み込み定義を持ち、`personas.toml` があれば上書きできる。

mod persona;

pub use persona::{PersonaManager, PersonaProfile};
