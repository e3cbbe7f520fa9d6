//! # 設定
//!
//! デフォルト値 → `config.toml` → 環境変数 (`SCRIBE_FACTORY_*`) の順に
//! 重ねて読み込む。API キーはログに出さない。

use scribe_core::contracts::{ClientConfig, EngineConfig};
use serde::{Deserialize, Serialize};

/// 補完プロバイダの種別
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    /// OpenAI 互換 SSE エンドポイント (yunwu.ai 等)
    Yunwu,
    /// Google Gemini (非ストリーミング)
    Google,
}

/// ScribeFactory 全体の設定
#[derive(Clone, Serialize, Deserialize)]
pub struct ScribeConfig {
    /// プロバイダ ("yunwu" | "google" | "auto")
    pub provider: String,
    /// API キー
    pub api_key: String,
    /// OpenAI 互換エンドポイントのベース URL
    pub base_url: String,
    /// 主モデル名
    pub model: String,
    /// フォールバックモデル名
    pub fallback_model: String,
    /// 続きリクエストの最大回数
    pub max_continuations: u32,
    /// 続きプロンプトの尾部コンテキスト窓（文字数）
    pub tail_window: usize,
    /// 同時に駆動するタスク数の上限（バッチ生成）
    pub batch_size: usize,
    /// 生成結果の出力先ディレクトリ
    pub output_dir: String,
    /// ペルソナ定義ファイル（存在すれば組み込み定義を上書き）
    pub personas_file: String,
}

impl std::fmt::Debug for ScribeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScribeConfig")
            .field("provider", &self.provider)
            .field("api_key", if self.api_key.is_empty() { &"" } else { &"***" })
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("fallback_model", &self.fallback_model)
            .field("max_continuations", &self.max_continuations)
            .field("tail_window", &self.tail_window)
            .field("batch_size", &self.batch_size)
            .field("output_dir", &self.output_dir)
            .field("personas_file", &self.personas_file)
            .finish()
    }
}

impl ScribeConfig {
    /// 設定をファイルまたは環境変数から読み込む
    pub fn load() -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            // デフォルト値の設定
            .set_default("provider", "auto")?
            .set_default(
                "api_key",
                std::env::var("GEMINI_API_KEY").unwrap_or_else(|_| "".to_string()),
            )?
            .set_default("base_url", "https://yunwu.ai")?
            .set_default("model", "gemini-3-pro-preview-thinking")?
            .set_default("fallback_model", "gemini-3-flash-preview")?
            .set_default("max_continuations", 15)?
            .set_default("tail_window", 2500)?
            .set_default("batch_size", 4)?
            .set_default("output_dir", "./output")?
            .set_default("personas_file", "personas.toml")?
            // config.toml があれば読み込む
            .add_source(config::File::with_name("config").required(false))
            // 環境変数 (SCRIBE_FACTORY_*) があれば上書き
            .add_source(config::Environment::with_prefix("SCRIBE_FACTORY"))
            .build()?;

        settings.try_deserialize()
    }

    /// プロバイダの決定。"auto" の場合はキーの形で推定する
    /// （Google のキーは `AIza` で始まる）
    pub fn resolved_provider(&self) -> Provider {
        match self.provider.as_str() {
            "google" => Provider::Google,
            "yunwu" => Provider::Yunwu,
            _ => {
                if self.api_key.starts_with("AIza") {
                    Provider::Google
                } else {
                    Provider::Yunwu
                }
            }
        }
    }

    /// ゲートウェイ呼び出しに渡す不変のクライアント設定を切り出す
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            api_key: self.api_key.trim().to_string(),
            base_url: self.base_url.trim_end_matches('/').to_string(),
            model: self.model.clone(),
            fallback_model: if self.fallback_model.is_empty() {
                None
            } else {
                Some(self.fallback_model.clone())
            },
        }
    }

    /// 続きループの調整パラメータを切り出す
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_continuations: self.max_continuations,
            tail_window: self.tail_window,
            ..EngineConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manual() -> ScribeConfig {
        ScribeConfig {
            provider: "auto".into(),
            api_key: "sk-abc".into(),
            base_url: "https://yunwu.ai/".into(),
            model: "m1".into(),
            fallback_model: "m2".into(),
            max_continuations: 7,
            tail_window: 1000,
            batch_size: 2,
            output_dir: "./out".into(),
            personas_file: "personas.toml".into(),
        }
    }

    #[test]
    fn test_provider_auto_detection() {
        let mut cfg = manual();
        assert_eq!(cfg.resolved_provider(), Provider::Yunwu);
        cfg.api_key = "AIzaSyExample".into();
        assert_eq!(cfg.resolved_provider(), Provider::Google);
        cfg.provider = "yunwu".into();
        assert_eq!(cfg.resolved_provider(), Provider::Yunwu);
    }

    #[test]
    fn test_client_config_trims_trailing_slash() {
        let cfg = manual();
        let client = cfg.client_config();
        assert_eq!(client.base_url, "https://yunwu.ai");
        assert_eq!(client.fallback_model.as_deref(), Some("m2"));
    }

    #[test]
    fn test_engine_config_carries_tunables() {
        let engine = manual().engine_config();
        assert_eq!(engine.max_continuations, 7);
        assert_eq!(engine.tail_window, 1000);
        // 引用符ペアはデフォルトを引き継ぐ
        assert!(!engine.quote_pairs.is_empty());
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let dump = format!("{:?}", manual());
        assert!(!dump.contains("sk-abc"));
    }
}
