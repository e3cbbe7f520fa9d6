//! # Weaver — 続きループ制御
//!
//! ストリーミング補完を繰り返し呼び、蓄積出力が完成基準を満たすまで
//! 続きプロンプトを発行する状態機械。
//! `Idle -> Generating -> {Complete | Continuing} -> ... -> Complete | Aborted`
//!
//! 1 タスクにつき未決のストリーミング呼び出しは常に 1 本。コラボレータの
//! エラーはこの層ではリトライせず、部分出力を保持したまま Aborted として
//! ホストへ返す。

use crate::contracts::{ClientConfig, ChatRequest, EngineConfig, FinalResult, GenerationRequest, Mode};
use crate::language::{CharClassDetector, ScriptDetector};
use crate::oracle;
use crate::prompt_forge::{estimated_total_shots, ProgressStats, PromptForge, ScriptFollowUp};
use crate::sanitizer::sanitize;
use crate::shot_parser::{
    clean_script_output, copied_length, find_incomplete_trailing_shot, parse_shots, SCENE_MARKERS,
};
use crate::traits::CompletionGateway;
use futures_util::StreamExt;
use regex::Regex;
use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

static MARKER_LINE_RE: OnceLock<Regex> = OnceLock::new();
static MARKER_INLINE_RE: OnceLock<Regex> = OnceLock::new();
static NEWLINE_RUN_RE: OnceLock<Regex> = OnceLock::new();

fn marker_line_re() -> &'static Regex {
    MARKER_LINE_RE.get_or_init(|| Regex::new(r"(?m)^\s*-{4,}\s*$").unwrap())
}

fn marker_inline_re() -> &'static Regex {
    MARKER_INLINE_RE.get_or_init(|| Regex::new(r"-{4,}").unwrap())
}

fn newline_run_re() -> &'static Regex {
    NEWLINE_RUN_RE.get_or_init(|| Regex::new(r"\n\s*\n\s*\n+").unwrap())
}

/// 完成時の後始末: 同期マーカー除去 → 空行圧縮 → (分鏡のみ) 全バッファ清掃
fn finalize(accumulated: &str, mode: Mode) -> String {
    let sanitized = sanitize(accumulated, mode);
    let stripped = marker_line_re().replace_all(&sanitized, "");
    let stripped = marker_inline_re().replace_all(&stripped, "");
    let collapsed = newline_run_re().replace_all(&stripped, "\n\n");
    let trimmed = collapsed.trim();
    if mode == Mode::ScriptExtract {
        clean_script_output(trimmed).trim().to_string()
    } else {
        trimmed.to_string()
    }
}

/// 1 ラウンドの終わり方
enum RoundOutcome {
    /// ストリームを最後まで消費した
    Finished,
    /// 場景信息マーカーを途中検知し、残りの消費を放棄した（分鏡のみ）
    SceneEarlyExit,
    /// キャンセルトークンが発火した
    Cancelled,
}

/// 続きループの駆動機
pub struct Weaver {
    gateway: Arc<dyn CompletionGateway>,
    client: ClientConfig,
    engine: EngineConfig,
    detector: Arc<dyn ScriptDetector>,
}

impl Weaver {
    pub fn new(gateway: Arc<dyn CompletionGateway>, client: ClientConfig) -> Self {
        Self {
            gateway,
            client,
            engine: EngineConfig::default(),
            detector: Arc::new(CharClassDetector),
        }
    }

    /// リトライ予算・尾部窓などを調整する
    pub fn with_engine_config(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    /// 言語判定戦略を差し替える
    pub fn with_detector(mut self, detector: Arc<dyn ScriptDetector>) -> Self {
        self.detector = detector;
        self
    }

    /// 生成タスクを完了（または中断）まで駆動する。
    ///
    /// `on_update` には整形済みの全文が毎チャンク届く。部分出力はどの終端
    /// 状態でも破棄されない。
    pub async fn run_generation<F>(
        &self,
        request: GenerationRequest,
        mut on_update: F,
        cancel: CancellationToken,
    ) -> FinalResult
    where
        F: FnMut(&str) + Send,
    {
        let source_len = request.source_len();
        let forge = PromptForge::new(&self.engine, self.detector.as_ref());
        let system = forge.system_instruction(&request);
        let mut prompt = forge.initial_prompt(&request);
        let mut accumulated = String::new();
        let mut continuation_count: u32 = 0;
        let mut rounds_used: u32 = 0;

        info!(
            "🧵 [Weaver] {} task start ({} chars source, budget {})",
            request.mode.label(),
            source_len,
            self.engine.max_continuations
        );

        loop {
            rounds_used += 1;
            let outcome = match self
                .run_round(&prompt, &system, request.mode, &mut accumulated, &mut on_update, &cancel)
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("❌ [Weaver] Round {} failed: {}", rounds_used, e);
                    return FinalResult {
                        text: finalize(&accumulated, request.mode),
                        completed: false,
                        rounds_used,
                        aborted: true,
                        abort_reason: Some(e.to_string()),
                    };
                }
            };

            let buffer = sanitize(&accumulated, request.mode);

            // 總結は単発生成。続きループの対象外
            if request.mode.is_single_shot() {
                let completed = oracle::is_complete(&buffer, request.mode, source_len, &self.engine);
                info!("✅ [Weaver] Single-shot round done (completed: {})", completed);
                return FinalResult {
                    text: finalize(&accumulated, request.mode),
                    completed,
                    rounds_used,
                    aborted: false,
                    abort_reason: None,
                };
            }

            let complete = matches!(outcome, RoundOutcome::SceneEarlyExit)
                || oracle::is_complete(&buffer, request.mode, source_len, &self.engine);
            if complete {
                info!("🏁 [Weaver] Complete after {} rounds", rounds_used);
                return FinalResult {
                    text: finalize(&accumulated, request.mode),
                    completed: true,
                    rounds_used,
                    aborted: false,
                    abort_reason: None,
                };
            }

            if matches!(outcome, RoundOutcome::Cancelled) || cancel.is_cancelled() {
                warn!("🛑 [Weaver] Cancelled after {} rounds", rounds_used);
                return FinalResult {
                    text: finalize(&accumulated, request.mode),
                    completed: false,
                    rounds_used,
                    aborted: true,
                    abort_reason: Some("cancelled".to_string()),
                };
            }

            if continuation_count >= self.engine.max_continuations {
                return self.abort_exhausted(&request, &accumulated, rounds_used, source_len);
            }
            continuation_count += 1;

            // 分鏡脚本: マーカー追記の前に末尾ショットを検査し、
            // 欄位不完全なら該当スパンを切除してから再生成を指示する
            let mut follow_up = ScriptFollowUp::Continue;
            if request.mode == Mode::ScriptExtract {
                let check = find_incomplete_trailing_shot(&buffer, &self.engine);
                let shots = parse_shots(&check.cleaned_buffer);
                let copied = copied_length(&shots, &self.engine.quote_pairs);
                follow_up = ScriptFollowUp::decide(Some(&check), copied, source_len);
                if check.needs_rework {
                    warn!(
                        "✂️ [Weaver] Trailing shot {:?} incomplete — truncated for rework",
                        check.last_shot_number
                    );
                    accumulated = check.cleaned_buffer.clone();
                    on_update(&accumulated);
                }
            }

            let working = sanitize(&accumulated, request.mode);
            let stats = self.progress(&request, &working, source_len);
            prompt = forge.continuation_prompt(&request, &working, &stats, follow_up);
            accumulated.push_str(&format!("\n{}\n", request.mode.completion_marker()));

            info!(
                "🔁 [Weaver] Continuation {}/{} ({} / {} chars)",
                continuation_count,
                self.engine.max_continuations,
                stats.done_chars,
                stats.target_chars
            );
        }
    }

    /// 1 ラウンド分のストリーミング消費。
    /// チャンク到着ごとに蓄積・整形・配信し、分鏡モードでは場景信息の
    /// 出現を監視して早期脱出する
    async fn run_round<F>(
        &self,
        prompt: &str,
        system: &str,
        mode: Mode,
        accumulated: &mut String,
        on_update: &mut F,
        cancel: &CancellationToken,
    ) -> Result<RoundOutcome, crate::error::ScribeError>
    where
        F: FnMut(&str) + Send,
    {
        let request = ChatRequest::generation(prompt.to_string(), system.to_string());
        let mut stream = self.gateway.stream_chat(&self.client, request).await?;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(RoundOutcome::Cancelled),
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = next else { break };
            let delta = chunk?;
            accumulated.push_str(&delta);
            on_update(&sanitize(accumulated, mode));

            if mode == Mode::ScriptExtract && scene_marker_in_tail(accumulated, delta.len()) {
                info!("🎬 [Weaver] Scene-info marker seen mid-stream — abandoning the rest of the round");
                return Ok(RoundOutcome::SceneEarlyExit);
            }
        }
        Ok(RoundOutcome::Finished)
    }

    fn progress(&self, request: &GenerationRequest, buffer: &str, source_len: usize) -> ProgressStats {
        let target_chars = match request.mode {
            Mode::Expand => source_len * 3 / 2,
            _ => source_len,
        };
        let (shots_done, copied_chars) = if request.mode == Mode::ScriptExtract {
            let shots = parse_shots(buffer);
            let copied = copied_length(&shots, &self.engine.quote_pairs);
            (shots.len(), copied)
        } else {
            (0, 0)
        };
        ProgressStats {
            done_chars: buffer.chars().count(),
            target_chars,
            shots_done,
            estimated_shots: estimated_total_shots(source_len),
            copied_chars,
        }
    }

    /// リトライ予算を使い切った。診断注記を可視出力に残して Aborted へ
    fn abort_exhausted(
        &self,
        request: &GenerationRequest,
        accumulated: &str,
        rounds_used: u32,
        source_len: usize,
    ) -> FinalResult {
        let buffer = sanitize(accumulated, request.mode);
        let mut text = finalize(accumulated, request.mode);
        let annotation = match request.mode {
            Mode::ScriptExtract => {
                let shots = parse_shots(&buffer);
                let copied = copied_length(&shots, &self.engine.quote_pairs);
                format!(
                    "\n\n[系統提示: 已達最大續寫次數（{}）仍未完成。已解析鏡頭 {} 個（預估 {} 個），已複製台詞 {} / {} 字。]",
                    self.engine.max_continuations,
                    shots.len(),
                    estimated_total_shots(source_len),
                    copied,
                    source_len
                )
            }
            _ => format!(
                "\n\n[系統提示: 已達最大續寫次數（{}），內容可能不完整（目前 {} / {} 字）。]",
                self.engine.max_continuations,
                buffer.chars().count(),
                match request.mode {
                    Mode::Expand => source_len * 3 / 2,
                    _ => source_len,
                }
            ),
        };
        warn!(
            "⚠️ [Weaver] Retry budget exhausted after {} rounds without completion",
            rounds_used
        );
        text.push_str(&annotation);
        FinalResult {
            text,
            completed: false,
            rounds_used,
            aborted: true,
            abort_reason: Some("max continuations exhausted".to_string()),
        }
    }
}

/// 直近チャンク周辺だけを対象に場景信息マーカーを探す。
/// 毎チャンク全文走査すると蓄積長に対して二乗になるため
fn scene_marker_in_tail(buffer: &str, delta_len: usize) -> bool {
    let longest_marker = SCENE_MARKERS.iter().map(|m| m.len()).max().unwrap_or(0);
    let mut start = buffer.len().saturating_sub(delta_len + longest_marker);
    while start > 0 && !buffer.is_char_boundary(start) {
        start -= 1;
    }
    let tail = &buffer[start..];
    SCENE_MARKERS.iter().any(|m| tail.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::DomainProfile;
    use crate::error::ScribeError;
    use crate::traits::ChunkStream;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// ラウンドごとに台本どおりのチャンク列を返すフェイクゲートウェイ
    struct FakeGateway {
        rounds: Mutex<VecDeque<Vec<Result<String, ScribeError>>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl FakeGateway {
        fn new(rounds: Vec<Vec<Result<String, ScribeError>>>) -> Arc<Self> {
            Arc::new(Self {
                rounds: Mutex::new(rounds.into()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn scripted(texts: Vec<&str>) -> Arc<Self> {
            Self::new(
                texts
                    .into_iter()
                    .map(|t| vec![Ok(t.to_string())])
                    .collect(),
            )
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionGateway for FakeGateway {
        async fn stream_chat(
            &self,
            _config: &ClientConfig,
            request: ChatRequest,
        ) -> Result<ChunkStream, ScribeError> {
            self.prompts.lock().unwrap().push(request.prompt);
            let chunks = self.rounds.lock().unwrap().pop_front().unwrap_or_default();
            Ok(Box::pin(futures_util::stream::iter(chunks)))
        }

        async fn complete(
            &self,
            _config: &ClientConfig,
            _request: ChatRequest,
        ) -> Result<String, ScribeError> {
            Ok(String::new())
        }
    }

    fn client() -> ClientConfig {
        ClientConfig {
            api_key: "test-key".into(),
            base_url: "https://yunwu.ai".into(),
            model: "test-model".into(),
            fallback_model: None,
        }
    }

    fn request(mode: Mode, source: &str) -> GenerationRequest {
        GenerationRequest {
            mode,
            source_text: source.to_string(),
            profile: DomainProfile {
                label: "測試".into(),
                system_instruction: "你是測試用導師。".into(),
            },
        }
    }

    #[tokio::test]
    async fn test_summarize_is_single_round() {
        let gateway = FakeGateway::scripted(vec!["要點一。要點二。要點三。\n标签：#測試"]);
        let weaver = Weaver::new(gateway.clone(), client());
        let result = weaver
            .run_generation(
                request(Mode::Summarize, &"字".repeat(3000)),
                |_| {},
                CancellationToken::new(),
            )
            .await;
        assert!(result.completed);
        assert!(!result.aborted);
        assert_eq!(result.rounds_used, 1);
        assert_eq!(gateway.prompts().len(), 1);
    }

    #[tokio::test]
    async fn test_summarize_never_continues_even_if_incomplete() {
        let gateway = FakeGateway::scripted(vec!["沒有標籤的殘缺輸出"]);
        let weaver = Weaver::new(gateway.clone(), client());
        let result = weaver
            .run_generation(
                request(Mode::Summarize, &"字".repeat(3000)),
                |_| {},
                CancellationToken::new(),
            )
            .await;
        assert!(!result.completed);
        assert!(!result.aborted);
        assert_eq!(gateway.prompts().len(), 1);
    }

    #[tokio::test]
    async fn test_rewrite_two_round_scenario() {
        // 原文 2000 字。初回 1200 字（文中切れ）→ 続き 700 字（終止記号）で完成
        let round1 = "甲".repeat(1200);
        let round2 = format!("{}。", "乙".repeat(699));
        let gateway = FakeGateway::scripted(vec![round1.as_str(), round2.as_str()]);
        let weaver = Weaver::new(gateway.clone(), client());

        let mut updates = 0usize;
        let result = weaver
            .run_generation(
                request(Mode::Rewrite, &"源".repeat(2000)),
                |_| updates += 1,
                CancellationToken::new(),
            )
            .await;

        assert!(result.completed, "reason: {:?}", result.abort_reason);
        assert!(!result.aborted);
        assert_eq!(result.rounds_used, 2);
        assert!(updates >= 2);

        let prompts = gateway.prompts();
        assert_eq!(prompts.len(), 2);
        // 続きプロンプトはマーカー指示で始まり、前ラウンドの尾部を含む
        assert!(prompts[1].starts_with("輸出第一行必須是「-----」"));
        assert!(prompts[1].contains(&"甲".repeat(50)));
        // マーカーは最終出力から剥がされる
        assert!(!result.text.contains("-----"));
        assert!(result.text.ends_with("。"));
    }

    #[tokio::test]
    async fn test_retry_cap_aborts_with_annotation() {
        // 完成条件を決して満たさない出力を 16 ラウンド分用意し、
        // 15 回の続きで打ち切られることを確認（17 ラウンド目は発行されない）
        let rounds: Vec<&str> = vec!["短"; 20];
        let gateway = FakeGateway::scripted(rounds);
        let weaver = Weaver::new(gateway.clone(), client());
        let result = weaver
            .run_generation(
                request(Mode::Rewrite, &"源".repeat(5000)),
                |_| {},
                CancellationToken::new(),
            )
            .await;

        assert!(result.aborted);
        assert!(!result.completed);
        assert_eq!(result.rounds_used, 16); // 初回 1 + 続き 15
        assert_eq!(gateway.prompts().len(), 16);
        assert!(result.text.contains("[系統提示"));
        assert_eq!(result.abort_reason.as_deref(), Some("max continuations exhausted"));
    }

    #[tokio::test]
    async fn test_collaborator_error_preserves_partial_output() {
        let gateway = FakeGateway::new(vec![vec![
            Ok("已經寫出來的部分".to_string()),
            Err(ScribeError::RateLimit { reason: "quota".into() }),
        ]]);
        let weaver = Weaver::new(gateway.clone(), client());
        let result = weaver
            .run_generation(
                request(Mode::Rewrite, &"源".repeat(2000)),
                |_| {},
                CancellationToken::new(),
            )
            .await;

        assert!(result.aborted);
        assert!(!result.completed);
        assert!(result.text.contains("已經寫出來的部分"));
        assert!(result.abort_reason.unwrap().contains("レート制限"));
        // このコントローラ自身はリトライしない
        assert_eq!(gateway.prompts().len(), 1);
    }

    const COMPLETE_SHOT_1: &str = "镜头1\n镜头文案：「第一段台詞的逐字內容」\n图片提示词：courtyard at dusk\n视频提示词：slow pan\n景别：全景\n语音分镜：低沉男聲\n音效：蟬鳴\n";

    #[tokio::test]
    async fn test_script_extract_scene_marker_early_exit() {
        let gateway = FakeGateway::new(vec![vec![
            Ok(COMPLETE_SHOT_1.to_string()),
            Ok("角色信息\n名称：老陳\n描述：主角\n场景信息\n名称：四合院\n描述：老宅\n".to_string()),
            Ok("這一塊不應該被消費到".to_string()),
        ]]);
        let weaver = Weaver::new(gateway.clone(), client());
        let result = weaver
            .run_generation(
                request(Mode::ScriptExtract, "第一段台詞的逐字內容"),
                |_| {},
                CancellationToken::new(),
            )
            .await;

        assert!(result.completed);
        assert_eq!(result.rounds_used, 1);
        assert!(!result.text.contains("這一塊不應該被消費到"));
        assert!(result.text.contains("场景信息"));
    }

    #[tokio::test]
    async fn test_script_extract_rework_flow() {
        // 初回: 完成ショット + 欄位不完全なショット 2 → 切除して再生成指示。
        // 続き: ショット 2 完全版 + info ブロックで完成
        let round1 = format!("{COMPLETE_SHOT_1}镜头2\n镜头文案：「寫到一半就斷");
        let round2 = "镜头2\n镜头文案：「第二段台詞」\n图片提示词：rain\n视频提示词：tilt\n景别：近景\n语音分镜：女聲\n音效：雨聲\n角色信息\n名称：老陳\n描述：主角\n场景信息\n名称：四合院\n描述：老宅\n";
        let gateway = FakeGateway::scripted(vec![round1.as_str(), round2]);
        let weaver = Weaver::new(gateway.clone(), client());
        let result = weaver
            .run_generation(
                request(Mode::ScriptExtract, &"源".repeat(400)),
                |_| {},
                CancellationToken::new(),
            )
            .await;

        assert!(result.completed, "reason: {:?}", result.abort_reason);
        assert_eq!(result.rounds_used, 2);

        let prompts = gateway.prompts();
        assert!(prompts[1].starts_with("輸出第一行必須是「----」"));
        assert!(prompts[1].contains("重寫鏡頭 2"));
        // 切除後のバッファに鏡頭2 の残骸は無い
        assert!(!prompts[1].contains("寫到一半就斷"));
        // 最終出力は重複なしの整った脚本
        assert_eq!(result.text.matches("镜头2").count(), 1);
        assert!(result.text.contains("「第二段台詞」"));
    }

    #[tokio::test]
    async fn test_cancellation_between_chunks() {
        let gateway = FakeGateway::new(vec![vec![
            Ok("第一塊".to_string()),
            Ok("第二塊".to_string()),
        ]]);
        let weaver = Weaver::new(gateway.clone(), client());
        let cancel = CancellationToken::new();
        let cancel_inner = cancel.clone();
        let result = weaver
            .run_generation(
                request(Mode::Rewrite, &"源".repeat(2000)),
                move |_| cancel_inner.cancel(),
                cancel,
            )
            .await;

        assert!(result.aborted);
        assert_eq!(result.abort_reason.as_deref(), Some("cancelled"));
        assert!(result.text.contains("第一塊"));
        assert!(!result.text.contains("第二塊"));
    }

    #[test]
    fn test_finalize_strips_markers_and_collapses_newlines() {
        let raw = "第一段\n-----\n\n\n\n第二段\n-----\n";
        assert_eq!(finalize(raw, Mode::Rewrite), "第一段\n\n第二段");
    }
}
