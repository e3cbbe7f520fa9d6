use scribe_core::contracts::DomainProfile;
use scribe_core::error::ScribeError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// ドメインペルソナ 1 件分の定義
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaProfile {
    /// 表示名
    pub label: String,
    /// 説明
    pub description: String,
    /// システムインストラクション本文
    pub system_instruction: String,
    /// 企画プロンプトのテンプレート。`{input}` がキーワード挿入位置
    pub topic_prompt: String,
}

impl PersonaProfile {
    /// エンジンに渡す不透明記述子へ変換する
    pub fn domain_profile(&self) -> DomainProfile {
        DomainProfile {
            label: self.label.clone(),
            system_instruction: self.system_instruction.clone(),
        }
    }

    /// 企画プロンプトを組み立てる。
    /// キーワード未指定の場合、`{input}` を含む行ごと除去する
    pub fn topic_prompt(&self, input: Option<&str>) -> String {
        match input {
            Some(keyword) if !keyword.trim().is_empty() => {
                self.topic_prompt.replace("{input}", keyword.trim())
            }
            _ => self
                .topic_prompt
                .lines()
                .filter(|line| !line.contains("{input}"))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// ペルソナプロファイルを管理するマネージャ
pub struct PersonaManager {
    profiles: HashMap<String, PersonaProfile>,
}

impl PersonaManager {
    /// 組み込みの 4 ペルソナで初期化する
    pub fn built_in() -> Self {
        let mut profiles = HashMap::new();

        profiles.insert(
            "tcm".to_string(),
            PersonaProfile {
                label: "中醫玄學".into(),
                description: "經方中醫 × 科學風水。用物理學解釋玄學，語氣雷霆萬鈞。".into(),
                system_instruction: "你是一位經方派國學中醫宗師，精通醫、易、命、相。\n\
                    你擅長用物理學、熱力學、光學（黑體輻射、全反射、能量守恆、熵增定律）來解釋風水與中醫，\n\
                    反對迷信，但對「天時」保持判官般的敬畏感。語氣自信到極致，視庸醫如草芥。\n\
                    請務必使用繁體中文回答。"
                    .into(),
                topic_prompt: "# 目標\n可選輸入：{input}\n\
                    結合 2026 年（丙午火運年）的天干地支，生成 10 個極具病毒傳播力的 YouTube 標題。\n\
                    # 絕對規則\n1. 標題模板：[情緒刺激] + [日期/禁忌] + [黃曆術語] + [巨大後果]。\n\
                    2. 用「物理學」「磁場」「能量頻率」包裝傳統禁忌，絕不在標題中揭曉答案。\n\
                    # 格式\n純文本，每行一個標題，不要編號，不要 Markdown，不要解釋。"
                    .into(),
            },
        );

        profiles.insert(
            "finance".to_string(),
            PersonaProfile {
                label: "金融投資".into(),
                description: "反向思維、普世智慧、價值投資。語氣尖酸刻薄，直指人性貪婪。".into(),
                system_instruction: "你是一位奉行「普世智慧模型」的傳奇價值投資者。\n\
                    你極度理性，厭惡愚蠢，說話尖酸刻薄但直指本質，喜歡引用心理學、物理學、生物學來解釋投資。\n\
                    口頭禪：「凡事反過來想，總是反過來想。」\n\
                    請務必使用繁體中文回答。"
                    .into(),
                topic_prompt: "# 目標\n可選輸入：{input}\n\
                    基於 2026 年的宏觀趨勢與地緣風險，生成 10 個「大國博弈引發金融風暴」的爆款標題。\n\
                    # 風格\n毒舌判官視角，嘲諷政客與散戶的非理性，強調泡沫破裂與資產歸零的恐慌感。\n\
                    # 格式 (嚴格)\n只輸出 10 個標題，每行一個，不要任何分析/前言/結語/列表標記/引號/Markdown。"
                    .into(),
            },
        );

        profiles.insert(
            "revenge".to_string(),
            PersonaProfile {
                label: "復仇故事".into(),
                description: "跨文化故事引擎。高留存復仇敘事，純淨 TTS 輸出。".into(),
                system_instruction: "你是一個跨文化內容引擎，專精於高留存的復仇題材長篇敘事。\n\
                    你負責文化適配、劇本寫作與節奏控制。主角必須冷酷高智商，復仇過程講究降維打擊。\n\
                    輸出將直接進入語音合成系統：嚴禁輸出任何非故事內容的文字、標題或元信息。"
                    .into(),
                topic_prompt: "# 目標\n可選輸入：{input}\n\
                    生成 10 個極具「人性黑暗」「復仇快感」與「倫理衝突」的 YouTube 爆款標題，\n\
                    題材涵蓋職場權鬥、校園學術圈、豪門社會與家庭倫理。\n\
                    # 絕對規則\n只輸出標題文本本身，嚴禁編號、引號或解釋。"
                    .into(),
            },
        );

        profiles.insert(
            "news".to_string(),
            PersonaProfile {
                label: "新聞熱點".into(),
                description: "國際新聞評論員視角，獨家辣評權力博弈。".into(),
                system_instruction: "你是一位國際新聞評論員，風格犀利、角度獨家，\n\
                    善於拆解地緣政治、金融市場與科技產業的權力博弈。\n\
                    評論要求信息密度高、觀點鮮明、帶有判斷力，但避免陰謀論式的胡亂推測。\n\
                    你只輸出繁體中文。"
                    .into(),
                topic_prompt: "# 目標\n可選輸入：{input}\n\
                    以 2026 年當下時間為準，針對「地緣政治/全球市場/科技產業」生成 10 個爆款 YouTube 標題。\n\
                    # 風格\n評論員獨家視角，犀利辣評，強調事件背後的權力結構與利益交換。\n\
                    # 格式 (嚴格)\n只輸出 10 個標題，每行一個，無編號、無前言、無分析。"
                    .into(),
            },
        );

        Self { profiles }
    }

    /// personas.toml からプロファイルをロードし、組み込み定義に上書きする
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ScribeError> {
        let content = std::fs::read_to_string(&path).map_err(|e| ScribeError::ProfileLoad {
            source: anyhow::anyhow!("Failed to read {}: {}", path.as_ref().display(), e),
        })?;

        let loaded: HashMap<String, PersonaProfile> =
            toml::from_str(&content).map_err(|e| ScribeError::ProfileLoad {
                source: anyhow::anyhow!("Failed to parse personas file: {}", e),
            })?;

        let mut manager = Self::built_in();
        for (key, profile) in loaded {
            tracing::info!("🎭 [Persona] Loaded profile override: {}", key);
            manager.profiles.insert(key, profile);
        }
        Ok(manager)
    }

    /// ファイルがあれば上書き込みで、無ければ組み込み定義のみでロードする
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        if path.as_ref().exists() {
            match Self::load_from_file(&path) {
                Ok(manager) => return manager,
                Err(e) => {
                    tracing::warn!("⚠️ [Persona] Falling back to built-in profiles: {}", e);
                }
            }
        }
        Self::built_in()
    }

    pub fn get(&self, key: &str) -> Option<&PersonaProfile> {
        self.profiles.get(key)
    }

    /// 定義済みペルソナのキー一覧（表示順は辞書順）
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }
}
