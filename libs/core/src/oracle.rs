//! # Completion Oracle — 完成判定
//!
//! 蓄積バッファがモード別の完成基準を満たしたかを判定する純関数。
//! 毎チャンク蓄積後と毎ラウンド終了後に呼ばれるため、副作用は持たない
//! （過少計上ドリフトの `warn!` 診断のみ例外）。

use crate::contracts::{EngineConfig, Mode};
use crate::shot_parser::{
    copied_length, find_incomplete_trailing_shot, parse_shots, unquoted_caption_count,
    ROLE_MARKERS, SCENE_MARKERS,
};
use tracing::warn;

/// 總結モードの完成マーカー語彙
const TAG_MARKERS: [&str; 2] = ["标签", "標籤"];

/// 文末終止記号
const TERMINAL_PUNCTUATION: [char; 6] = ['。', '！', '？', '.', '!', '?'];

/// バッファがモード別の完成基準を満たしたか。
/// `source_len` は原文の文字数（`char` 数）。
pub fn is_complete(buffer: &str, mode: Mode, source_len: usize, config: &EngineConfig) -> bool {
    match mode {
        Mode::Summarize => summarize_complete(buffer),
        Mode::Rewrite | Mode::Polish => length_gated_complete(buffer, source_len, 0.90, 0.95),
        Mode::Expand => length_gated_complete(buffer, source_len, 1.40, 1.50),
        Mode::ScriptExtract => script_extract_complete(buffer, source_len, config),
    }
}

/// 總結: タグマーカーまたはハッシュタグ記号が現れていれば完成
fn summarize_complete(buffer: &str) -> bool {
    TAG_MARKERS.iter().any(|m| buffer.contains(m)) || buffer.contains('#')
}

/// 洗稿/潤色/擴寫の共通形:
/// 下限未満は問答無用で未完成。上限以上かつ文末終止記号で終わり、
/// 三点リーダで終わっていなければ完成
fn length_gated_complete(buffer: &str, source_len: usize, low: f64, high: f64) -> bool {
    let len = buffer.chars().count() as f64;
    let source = source_len as f64;
    if len < low * source {
        return false;
    }
    if len < high * source {
        return false;
    }
    let tail = buffer.trim_end();
    if tail.ends_with('…') || tail.ends_with("...") {
        return false;
    }
    tail.chars()
        .last()
        .map(|c| TERMINAL_PUNCTUATION.contains(&c))
        .unwrap_or(false)
}

/// 分鏡脚本の判定連鎖。
///
/// (a) 角色信息 + 場景信息の両マーカーが揃えば即完成（支配規則）
/// (b) 末尾に未解決の続きマーカーが残っていれば未完成
/// (c) ショットゼロは未完成
/// (d) 最後に開始されたショットが構造チェックに落ちれば未完成
/// (e) 台詞コピー量が原文の 95% に達したとき、完成 = 両マーカー在存
fn script_extract_complete(buffer: &str, source_len: usize, config: &EngineConfig) -> bool {
    let has_role = ROLE_MARKERS.iter().any(|m| buffer.contains(m));
    let has_scene = SCENE_MARKERS.iter().any(|m| buffer.contains(m));
    if has_role && has_scene {
        return true;
    }

    let marker = Mode::ScriptExtract.completion_marker();
    if buffer.trim_end().ends_with(marker) {
        return false;
    }

    let shots = parse_shots(buffer);
    if shots.is_empty() {
        return false;
    }

    if find_incomplete_trailing_shot(buffer, config).needs_rework {
        return false;
    }

    let copied = copied_length(&shots, &config.quote_pairs);
    let target = 0.95 * source_len as f64;
    if (copied as f64) >= target {
        // (a) が成立していない以上、少なくとも一方のマーカーが欠けている
        has_role && has_scene
    } else {
        let unquoted = unquoted_caption_count(&shots, &config.quote_pairs);
        if unquoted > 0 {
            warn!(
                "⚠️ [Oracle] Copied-length undercount suspected: {} captions without recognized quote glyphs ({}/{} chars copied)",
                unquoted, copied, source_len
            );
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> EngineConfig {
        EngineConfig::default()
    }

    fn buf(len_without_tail: usize, tail: &str) -> String {
        let mut s = "字".repeat(len_without_tail);
        s.push_str(tail);
        s
    }

    // ===== Rewrite / Polish =====

    #[test]
    fn test_rewrite_below_low_threshold_never_complete() {
        // 終止記号があっても下限未満は未完成
        let buffer = buf(800, "。"); // 801 < 900
        assert!(!is_complete(&buffer, Mode::Rewrite, 1000, &cfg()));
        assert!(!is_complete(&buffer, Mode::Polish, 1000, &cfg()));
    }

    #[test]
    fn test_rewrite_boundary_at_95_percent() {
        // 1000 * 0.95 = 950: 949 文字は常に未完成、960 文字は終止記号次第
        let below = buf(948, "。"); // 949
        assert!(!is_complete(&below, Mode::Rewrite, 1000, &cfg()));

        let above = buf(959, "。"); // 960
        assert!(is_complete(&above, Mode::Rewrite, 1000, &cfg()));

        let exact = buf(949, "。"); // 950
        assert!(is_complete(&exact, Mode::Rewrite, 1000, &cfg()));
    }

    #[test]
    fn test_rewrite_requires_terminal_punctuation() {
        let buffer = buf(960, "然後"); // 長さ十分だが文中で途切れている
        assert!(!is_complete(&buffer, Mode::Rewrite, 1000, &cfg()));
    }

    #[test]
    fn test_rewrite_rejects_ellipsis_endings() {
        assert!(!is_complete(&buf(960, "…"), Mode::Rewrite, 1000, &cfg()));
        assert!(!is_complete(&buf(960, "..."), Mode::Rewrite, 1000, &cfg()));
        // ピリオド 1 個は終止記号
        assert!(is_complete(&buf(960, "."), Mode::Rewrite, 1000, &cfg()));
    }

    // ===== Expand =====

    #[test]
    fn test_expand_uses_scaled_thresholds() {
        // 1000 字の原文 → 1400 未満は未完成、1500 以上で判定
        assert!(!is_complete(&buf(1300, "。"), Mode::Expand, 1000, &cfg()));
        assert!(!is_complete(&buf(1450, "。"), Mode::Expand, 1000, &cfg()));
        assert!(is_complete(&buf(1520, "。"), Mode::Expand, 1000, &cfg()));
    }

    // ===== Summarize =====

    #[test]
    fn test_summarize_complete_on_tag_marker_or_hashtag() {
        assert!(is_complete("要點一。要點二。\n标签：風水 養生", Mode::Summarize, 5000, &cfg()));
        assert!(is_complete("要點。\n標籤：命理", Mode::Summarize, 5000, &cfg()));
        assert!(is_complete("要點。#風水", Mode::Summarize, 5000, &cfg()));
        assert!(!is_complete("只有要點，還沒有收尾", Mode::Summarize, 5000, &cfg()));
    }

    // ===== ScriptExtract =====

    const COMPLETE_SHOT: &str = "镜头1\n镜头文案：「完整的一句」\n图片提示词：a\n视频提示词：b\n景别：c\n语音分镜：d\n音效：e\n";

    #[test]
    fn test_script_extract_dominance_rule() {
        // 両マーカーが揃えばショット状態に関係なく完成
        let buffer = "镜头1\n镜头文案：「殘\n角色信息\n名称：甲\n场景信息\n名称：老宅\n";
        assert!(is_complete(buffer, Mode::ScriptExtract, 100_000, &cfg()));
    }

    #[test]
    fn test_script_extract_unresolved_marker_blocks() {
        let buffer = format!("{COMPLETE_SHOT}----");
        assert!(!is_complete(&buffer, Mode::ScriptExtract, 6, &cfg()));
    }

    #[test]
    fn test_script_extract_zero_shots_incomplete() {
        assert!(!is_complete("還在醞釀中……", Mode::ScriptExtract, 1000, &cfg()));
    }

    #[test]
    fn test_script_extract_incomplete_trailing_shot_blocks() {
        let buffer = format!("{COMPLETE_SHOT}镜头2\n镜头文案：「沒寫完");
        assert!(!is_complete(&buffer, Mode::ScriptExtract, 6, &cfg()));
    }

    #[test]
    fn test_script_extract_copied_length_alone_is_not_enough() {
        // 台詞コピーは 95% を超えているが、info マーカーが両方欠けている
        assert!(!is_complete(COMPLETE_SHOT, Mode::ScriptExtract, 5, &cfg()));
        // 片方だけでも不足
        let with_role = format!("{COMPLETE_SHOT}角色信息\n名称：甲\n");
        assert!(!is_complete(&with_role, Mode::ScriptExtract, 5, &cfg()));
    }
}
