//! # Prompt Forge — プロンプト組み立て
//!
//! 初回プロンプトと続きプロンプトを構築する。続きプロンプトには全バッファを
//! 決して埋め込まず、固定長の尾部窓・数値進捗・モード別ルールのみを載せる。
//! 多ラウンド生成でもプロンプト長が有界に保たれる。

use crate::contracts::{EngineConfig, GenerationRequest, Mode};
use crate::language::{ScriptDetector, ScriptHint};
use crate::shot_parser::TrailingShotCheck;

/// 予測ショット総数: `min(60, ceil(source_len / 250))`
pub fn estimated_total_shots(source_len: usize) -> usize {
    usize::min(60, source_len.div_ceil(250))
}

/// 続きプロンプトに載せる数値進捗
#[derive(Debug, Clone, Default)]
pub struct ProgressStats {
    pub done_chars: usize,
    pub target_chars: usize,
    pub shots_done: usize,
    pub estimated_shots: usize,
    pub copied_chars: usize,
}

impl ProgressStats {
    pub fn percent(&self) -> u32 {
        if self.target_chars == 0 {
            return 0;
        }
        ((self.done_chars as f64 / self.target_chars as f64) * 100.0).floor() as u32
    }
}

/// 分鏡脚本モードの続き指示。1 ラウンドにつきどちらか一方のみ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptFollowUp {
    /// 通常の続き（次の鏡頭から）
    Continue,
    /// 欄位不完全で除去した鏡頭 N の再生成
    ReworkShot(u32),
    /// 全鏡頭完成 → 角色信息・場景信息のみを出させる
    EmitInfoBlocks,
}

impl ScriptFollowUp {
    /// 末尾ショットチェックとコピー進捗から続き指示を決める
    pub fn decide(cleanup: Option<&TrailingShotCheck>, copied: usize, source_len: usize) -> Self {
        if let Some(check) = cleanup {
            if check.needs_rework {
                if let Some(n) = check.last_shot_number {
                    return ScriptFollowUp::ReworkShot(n);
                }
            }
        }
        if (copied as f64) >= 0.95 * source_len as f64 {
            ScriptFollowUp::EmitInfoBlocks
        } else {
            ScriptFollowUp::Continue
        }
    }
}

/// プロンプト組み立て機
pub struct PromptForge<'a> {
    config: &'a EngineConfig,
    detector: &'a dyn ScriptDetector,
}

impl<'a> PromptForge<'a> {
    pub fn new(config: &'a EngineConfig, detector: &'a dyn ScriptDetector) -> Self {
        Self { config, detector }
    }

    /// システムインストラクション。ペルソナ記述子は変更せずそのまま使う
    pub fn system_instruction(&self, request: &GenerationRequest) -> String {
        format!(
            "{}\n你也是一位專業的內容編輯，擅長長文改寫與分鏡脚本整理。",
            request.profile.system_instruction.trim()
        )
    }

    /// 原文のスクリプト判定結果を「言語保持」指示文に変換する
    fn language_hint(&self, source: &str) -> &'static str {
        match self.detector.detect(source) {
            ScriptHint::CjkDominant => "原文以中文為主，輸出必須全程使用與原文一致的中文，不得夾雜英文敘述。",
            ScriptHint::LatinDominant => {
                "The source is predominantly English; keep the entire output in the same language as the source."
            }
            ScriptHint::Mixed => "原文為多語言混排，請保持與原文一致的語言配比，不要擅自翻譯任何一側。",
        }
    }

    /// 初回プロンプト。原文全文・文字数・モード別ルール・言語指示を埋め込む
    pub fn initial_prompt(&self, request: &GenerationRequest) -> String {
        let source = &request.source_text;
        let src_len = request.source_len();
        let hint = self.language_hint(source);
        let marker = request.mode.completion_marker();

        match request.mode {
            Mode::Rewrite => format!(
                "# 深度洗稿任務（結構保持模式）\n\n\
                 ## 原始素材（共 {src_len} 字）\n{source}\n\n\
                 ## 洗稿要求\n\
                 1. 完全保持原文的段落結構、段落順序與段落數量，按原文順序逐段深度改寫。\n\
                 2. 每個句子都換一種說法：詞彙替換、句式變換、同義改寫，意思不變。\n\
                 3. 全文字數不得少於原文的 95%，改寫後每段字數接近原文對應段落。\n\
                 4. {hint}\n\
                 5. 如一次無法完成全部段落，在最後一個完整段落後輸出「{marker}」，系統會自動續寫。\n\
                 6. 未完成全部段落前嚴禁使用任何收尾語。只輸出改寫後的正文，嚴禁任何技術標記或解釋。"
            ),
            Mode::Expand => format!(
                "# 深度擴寫任務\n\n\
                 ## 原始素材（共 {src_len} 字）\n{source}\n\n\
                 ## 擴寫要求\n\
                 1. 保持原文結構與觀點，按原文順序逐段擴寫，加入例子、類比與邏輯推演。\n\
                 2. 目標字數為原文的 1.5〜2.0 倍（至少 {target} 字），禁止省略、禁止概括。\n\
                 3. {hint}\n\
                 4. 如一次無法完成，在最後一個完整段落後輸出「{marker}」，系統會自動續寫。\n\
                 5. 只輸出擴寫後的正文，嚴禁任何技術標記、前言後語或解釋。",
                target = src_len * 3 / 2
            ),
            Mode::Summarize => format!(
                "# 總結任務\n\n\
                 ## 原始素材（共 {src_len} 字）\n{source}\n\n\
                 ## 要求\n\
                 1. 將全文總結為 3 個關鍵要點，有力且易記，每點獨立一行。\n\
                 2. {hint}\n\
                 3. 最後另起一行，以「标签：」開頭，附上 3〜5 個以 # 開頭的話題標籤。\n\
                 4. 只輸出要點與標籤，不要前言後語。"
            ),
            Mode::Polish => format!(
                "# 潤色任務\n\n\
                 ## 原始素材（共 {src_len} 字）\n{source}\n\n\
                 ## 要求\n\
                 1. 修正語法，換用更強有力的動詞與精準的詞彙，使全文專業且權威。\n\
                 2. 不改變內容結構與意思，字數與原文相當（不少於原文的 95%）。\n\
                 3. {hint}\n\
                 4. 如一次無法完成，在最後一個完整段落後輸出「{marker}」，系統會自動續寫。\n\
                 5. 只輸出潤色後的正文，嚴禁任何技術標記或解釋。"
            ),
            Mode::ScriptExtract => format!(
                "# 分鏡脚本抽取任務\n\n\
                 ## 原始素材（共 {src_len} 字）\n{source}\n\n\
                 ## 輸出模板（每個鏡頭嚴格按此七行格式）\n\
                 镜头1\n\
                 镜头文案：「逐字複製的原文台詞」\n\
                 图片提示词：英文圖像描述\n\
                 视频提示词：英文運鏡描述\n\
                 景别：遠景/全景/中景/近景/特寫\n\
                 语音分镜：配音語氣說明\n\
                 音效：環境音或音效說明\n\n\
                 ## 鐵律\n\
                 1. 镜头文案必須逐字複製原文的連續片段，一字不得增刪改，並用「」包住。\n\
                 2. 按原文順序切分，預計共需約 {est} 個鏡頭，每個鏡頭的台詞以 40〜80 字為宜。\n\
                 3. 六個欄位缺一不可，音效欄不得留空。\n\
                 4. 全部台詞複製完畢後，輸出「角色信息」與「场景信息」兩個區塊，\
                 每個條目包含 名称／别名／描述 三項。场景信息輸出完畢後立即停筆，不要再輸出任何內容。\n\
                 5. 如一次無法完成全部鏡頭，在最後一個完整鏡頭後輸出「{marker}」，系統會自動續寫。\n\
                 6. {hint}",
                est = estimated_total_shots(src_len)
            ),
        }
    }

    /// 尾部窓: バッファ末尾 `tail_window` 文字のみ
    fn tail_of<'b>(&self, buffer: &'b str) -> &'b str {
        let window = self.config.tail_window;
        let total = buffer.chars().count();
        if total <= window {
            return buffer;
        }
        let skip = total - window;
        match buffer.char_indices().nth(skip) {
            Some((idx, _)) => &buffer[idx..],
            None => buffer,
        }
    }

    /// 改寫系モードで続きの対象となる原文の残り部分（有界の窓で切る）
    fn remaining_source<'b>(&self, request: &'b GenerationRequest, stats: &ProgressStats) -> &'b str {
        const SOURCE_WINDOW_CHARS: usize = 8000;
        let ratio = if stats.target_chars == 0 {
            0.0
        } else {
            (stats.done_chars as f64 / stats.target_chars as f64).min(0.95)
        };
        let src = &request.source_text;
        let total = src.chars().count();
        let start = ((total as f64) * ratio).floor() as usize;
        let begin = src
            .char_indices()
            .nth(start)
            .map(|(i, _)| i)
            .unwrap_or(src.len());
        let rest = &src[begin..];
        let rest_len = rest.chars().count();
        if rest_len <= SOURCE_WINDOW_CHARS {
            return rest;
        }
        match rest.char_indices().nth(SOURCE_WINDOW_CHARS) {
            Some((end, _)) => &rest[..end],
            None => rest,
        }
    }

    /// 続きプロンプト。冒頭で必ず「第一行はマーカー」を指示する
    pub fn continuation_prompt(
        &self,
        request: &GenerationRequest,
        buffer: &str,
        stats: &ProgressStats,
        follow_up: ScriptFollowUp,
    ) -> String {
        let mode = request.mode;
        let marker = mode.completion_marker();
        let label = mode.label();
        let tail = self.tail_of(buffer);
        let tail_len = tail.chars().count();
        let hint = self.language_hint(&request.source_text);
        let percent = stats.percent();

        let mut prompt = format!(
            "輸出第一行必須是「{marker}」，下一行直接接續正文。不要重覆前文，不要輸出任何元信息。\n\n\
             # 繼續{label}任務\n\n\
             ## 進度\n\
             - 已完成：{done} 字 / 目標 {target} 字（約 {percent}%）\n",
            done = stats.done_chars,
            target = stats.target_chars,
        );

        if mode == Mode::ScriptExtract {
            prompt.push_str(&format!(
                "- 已完成鏡頭：{} / 預估 {} 個\n- 已複製台詞：{} 字 / 原文 {} 字\n",
                stats.shots_done,
                stats.estimated_shots,
                stats.copied_chars,
                request.source_len(),
            ));
        }

        if matches!(mode, Mode::Rewrite | Mode::Expand | Mode::Polish) {
            let rest = self.remaining_source(request, stats);
            prompt.push_str(&format!(
                "\n## 原文剩餘部分（必須比對此部分繼續，按原文段落順序）\n{rest}\n"
            ));
        }

        prompt.push_str(&format!(
            "\n## 上文（最後 {tail_len} 字，僅供銜接，不要重寫）\n{tail}\n\n## 繼續要求\n"
        ));

        match mode {
            Mode::Rewrite => prompt.push_str(
                "1. 比對「原文剩餘部分」，按原文段落順序繼續逐段深度洗稿，與上文自然銜接。\n\
                 2. 未完成全部段落前嚴禁使用任何收尾語（如「完結」「全書完」）。\n",
            ),
            Mode::Expand => prompt.push_str(
                "1. 比對「原文剩餘部分」，繼續逐段擴寫，保持既有的例證密度與風格。\n\
                 2. 未達目標字數前不要收尾。\n",
            ),
            Mode::Polish => prompt.push_str(
                "1. 比對「原文剩餘部分」，繼續逐段潤色，保持已建立的語氣與用詞水準。\n\
                 2. 未完成全部段落前不要收尾。\n",
            ),
            Mode::Summarize => prompt.push_str("1. 繼續完成要點與標籤。\n"),
            Mode::ScriptExtract => match follow_up {
                ScriptFollowUp::ReworkShot(n) => prompt.push_str(&format!(
                    "## 重寫鏡頭 {n}\n\
                     鏡頭{n} 因欄位不完整已被移除。請從鏡頭{n} 重新開始輸出，\
                     七行格式六欄俱全，音效不得留空，台詞逐字複製原文並用「」包住。\n"
                )),
                ScriptFollowUp::EmitInfoBlocks => prompt.push_str(
                    "## 收尾\n\
                     全部鏡頭已完成。現在只輸出「角色信息」與「场景信息」兩個區塊，\
                     每個條目包含 名称／别名／描述 三項。不要再輸出任何鏡頭或其他內容。\n",
                ),
                ScriptFollowUp::Continue => prompt.push_str(
                    "1. 從下一個編號的鏡頭繼續輸出，編號連續，臺詞按原文順序逐字複製。\n\
                     2. 尚未複製完原文台詞之前，不要輸出角色信息或场景信息。\n",
                ),
            },
        }

        prompt.push_str(&format!("3. {hint}\n"));
        prompt
    }
}
