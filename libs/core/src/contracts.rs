//! # The Contract — 生成タスクの通信契約
//!
//! ホストとエンジンのやり取りを型安全に定義する。
//! プロバイダの選択状態をモジュール変数に持つ代わりに、
//! 不変の `ClientConfig` を毎回の呼び出しに引き渡す。

use serde::{Deserialize, Serialize};

/// テキスト変換モード。タスクの生存期間中は不変。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    /// 洗稿（原文と同等の長さを保つ深度リライト）
    Rewrite,
    /// 擴寫（原文の 1.5〜2.0 倍への拡張）
    Expand,
    /// 總結（要点とタグの単発生成）
    Summarize,
    /// 潤色（文法・語彙の磨き上げ）
    Polish,
    /// 分鏡脚本抽出（台詞逐字コピー + 6 フィールドのショット列）
    ScriptExtract,
}

impl Mode {
    /// ラウンド間に挿入する同期マーカー。
    /// モデルへの続き合図とクライアント側の分割点を兼ねる。
    pub fn completion_marker(&self) -> &'static str {
        match self {
            Mode::ScriptExtract => "----",
            _ => "-----",
        }
    }

    /// Summarize は単発生成であり、続きループの対象外
    pub fn is_single_shot(&self) -> bool {
        matches!(self, Mode::Summarize)
    }

    /// UI やログに出す表示名
    pub fn label(&self) -> &'static str {
        match self {
            Mode::Rewrite => "洗稿",
            Mode::Expand => "擴寫",
            Mode::Summarize => "總結",
            Mode::Polish => "潤色",
            Mode::ScriptExtract => "分鏡脚本",
        }
    }
}

/// 外部コラボレータが供給するスタイル/ペルソナ記述子。
/// エンジンはこれを変更しない（opaque）。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainProfile {
    /// 表示ラベル（例: "中醫玄學"）
    pub label: String,
    /// システムインストラクション本文
    pub system_instruction: String,
}

/// 1 つの論理的なテキスト変換ジョブの入力
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub mode: Mode,
    /// 不変の入力テキスト
    pub source_text: String,
    pub profile: DomainProfile,
}

impl GenerationRequest {
    /// 原文の文字数（バイト数ではなく `char` 数で数える）
    pub fn source_len(&self) -> usize {
        self.source_text.chars().count()
    }
}

/// 生成ループの最終結果。部分出力は破棄せず常にここに残す。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalResult {
    pub text: String,
    pub completed: bool,
    pub rounds_used: u32,
    pub aborted: bool,
    pub abort_reason: Option<String>,
}

/// ストリーミング補完 1 回分のリクエスト
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub prompt: String,
    pub system_instruction: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl ChatRequest {
    /// 長文生成用のデフォルト（temperature 0.85 / 8192 tokens）
    pub fn generation(prompt: String, system_instruction: String) -> Self {
        Self {
            prompt,
            system_instruction,
            temperature: 0.85,
            max_tokens: 8192,
        }
    }

    /// 企画フェーズ用（発散を許す高温設定）
    pub fn planning(prompt: String, system_instruction: String) -> Self {
        Self {
            prompt,
            system_instruction,
            temperature: 0.9,
            max_tokens: 4096,
        }
    }
}

/// ゲートウェイ呼び出しごとに渡す不変のクライアント設定
#[derive(Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    /// 主モデル失敗時に切り替えるフォールバックモデル
    pub fallback_model: Option<String>,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_key", if self.api_key.is_empty() { &"" } else { &"***" })
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("fallback_model", &self.fallback_model)
            .finish()
    }
}

/// 続きループの調整パラメータ。
/// リトライ予算と尾部コンテキスト窓は呼び出し側が調整できる。
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// 続きリクエストの最大回数
    pub max_continuations: u32,
    /// 続きプロンプトに埋め込む尾部コンテキストの文字数
    pub tail_window: usize,
    /// 台詞コピー量の計測に使う引用符ペア
    pub quote_pairs: Vec<(char, char)>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_continuations: 15,
            tail_window: 2500,
            quote_pairs: vec![('“', '”'), ('「', '」'), ('『', '』'), ('"', '"')],
        }
    }
}
