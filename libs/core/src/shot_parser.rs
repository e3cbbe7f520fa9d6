//! # Shot Parser — 分鏡脚本の行指向文法
//!
//! モデル出力の半構造化テキスト（ショット / 角色信息 / 場景信息）を
//! 明示的な行ステートマシンでパースする。正規表現の場当たり照合ではなく、
//! 「セクション見出し・フィールド行・継続行」の文法を一箇所に集約し、
//! 必須フィールド規則と重複検出を生成ループから独立してテスト可能にする。

use crate::contracts::EngineConfig;
use regex::Regex;
use std::collections::HashSet;
use std::ops::Range;
use std::sync::OnceLock;

/// ショットマーカー（簡体字・繁體字）
pub const SHOT_MARKERS: [&str; 2] = ["镜头", "鏡頭"];
/// 角色信息セクションマーカー
pub const ROLE_MARKERS: [&str; 2] = ["角色信息", "角色資訊"];
/// 場景信息セクションマーカー
pub const SCENE_MARKERS: [&str; 2] = ["场景信息", "場景資訊"];

/// 構造チェックの最小スパン長（文字数）。
/// フィールド欠落を伴う短いスパンは途中切断の典型パターン
pub const MIN_SHOT_SPAN_CHARS: usize = 150;

/// ショットの必須フィールド種別
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// 镜头文案 — 原文台詞の逐字コピー（引用符つき）
    Caption,
    /// 图片提示词
    ImagePrompt,
    /// 视频提示词
    VideoPrompt,
    /// 景别
    ShotType,
    /// 语音分镜
    VoiceOver,
    /// 音效 — 最終フィールド。非空であることが完成条件
    SoundEffect,
}

impl FieldKind {
    /// 継続行を取り込むフィールドか（文案・提示詞系は複数行になり得る）
    fn is_multiline(&self) -> bool {
        matches!(
            self,
            FieldKind::Caption | FieldKind::ImagePrompt | FieldKind::VideoPrompt
        )
    }
}

/// 各ラベルは同一言語の 2 表記（簡体字 / 繁體字）を許容する
const FIELD_LABELS: [(FieldKind, [&str; 2]); 6] = [
    (FieldKind::Caption, ["镜头文案", "鏡頭文案"]),
    (FieldKind::ImagePrompt, ["图片提示词", "圖片提示詞"]),
    (FieldKind::VideoPrompt, ["视频提示词", "視頻提示詞"]),
    (FieldKind::ShotType, ["景别", "景別"]),
    (FieldKind::VoiceOver, ["语音分镜", "語音分鏡"]),
    (FieldKind::SoundEffect, ["音效", "音效"]),
];

/// 角色/場景ブロック内エントリのフィールドラベル（+3 語彙）
const ENTRY_LABELS: [[&str; 2]; 3] = [["名称", "名稱"], ["别名", "別名"], ["描述", "描述"]];

static SHOT_MARKER_RE: OnceLock<Regex> = OnceLock::new();
static SEPARATOR_RE: OnceLock<Regex> = OnceLock::new();
static ALT_HEADING_RE: OnceLock<Regex> = OnceLock::new();
static NUMBERED_ENTRY_RE: OnceLock<Regex> = OnceLock::new();

fn shot_marker_re() -> &'static Regex {
    SHOT_MARKER_RE.get_or_init(|| Regex::new(r"^(?:镜头|鏡頭)\s*(\d+)").unwrap())
}

fn separator_re() -> &'static Regex {
    SEPARATOR_RE.get_or_init(|| Regex::new(r"^\s*[-=—–*＊#＃]{3,}\s*$").unwrap())
}

fn alt_heading_re() -> &'static Regex {
    ALT_HEADING_RE.get_or_init(|| {
        Regex::new(
            r"^\s*(?:出场人物|出場人物|人物列表|人物介绍|人物介紹|角色列表|场景列表|場景列表)\s*[:：]?\s*$",
        )
        .unwrap()
    })
}

fn numbered_entry_re() -> &'static Regex {
    NUMBERED_ENTRY_RE.get_or_init(|| Regex::new(r"^\s*\d+\s*[.、．)）]").unwrap())
}

/// パース済みショット 1 件
#[derive(Debug, Clone)]
pub struct Shot {
    pub number: u32,
    /// 镜头文案の生の値（引用符を含む）
    pub caption: String,
    pub image_prompt: String,
    pub video_prompt: String,
    pub shot_type: String,
    pub voice_over: String,
    pub sound_effect: String,
    /// バッファ内のバイト範囲（マーカー行の先頭から境界まで）
    pub span: Range<usize>,
}

impl Shot {
    fn new(number: u32, start: usize) -> Self {
        Self {
            number,
            caption: String::new(),
            image_prompt: String::new(),
            video_prompt: String::new(),
            shot_type: String::new(),
            voice_over: String::new(),
            sound_effect: String::new(),
            span: start..start,
        }
    }

    fn field_mut(&mut self, kind: FieldKind) -> &mut String {
        match kind {
            FieldKind::Caption => &mut self.caption,
            FieldKind::ImagePrompt => &mut self.image_prompt,
            FieldKind::VideoPrompt => &mut self.video_prompt,
            FieldKind::ShotType => &mut self.shot_type,
            FieldKind::VoiceOver => &mut self.voice_over,
            FieldKind::SoundEffect => &mut self.sound_effect,
        }
    }
}

/// `ラベル：値` 形式の行を分解する。全角・半角コロン両対応
fn split_label(line: &str) -> Option<(&str, &str)> {
    let idx = line.find(['：', ':'])?;
    let label = line[..idx].trim();
    let sep_len = if line[idx..].starts_with('：') { '：'.len_utf8() } else { 1 };
    let value = line[idx + sep_len..].trim();
    Some((label, value))
}

/// ショットマーカー行なら番号を返す
pub fn match_shot_marker(line: &str) -> Option<u32> {
    shot_marker_re()
        .captures(line.trim())
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

pub fn is_role_marker_line(line: &str) -> bool {
    ROLE_MARKERS.iter().any(|m| line.contains(m))
}

pub fn is_scene_marker_line(line: &str) -> bool {
    SCENE_MARKERS.iter().any(|m| line.contains(m))
}

fn match_field_line(line: &str) -> Option<(FieldKind, &str)> {
    let (label, value) = split_label(line)?;
    for (kind, variants) in FIELD_LABELS {
        if variants.contains(&label) {
            return Some((kind, value));
        }
    }
    None
}

fn is_entry_label(label: &str) -> bool {
    ENTRY_LABELS.iter().any(|v| v.contains(&label))
}

fn is_canonical_label(label: &str) -> bool {
    FIELD_LABELS.iter().any(|(_, v)| v.contains(&label))
        || is_entry_label(label)
        || SHOT_MARKERS.iter().any(|m| label.starts_with(m))
        || ROLE_MARKERS.contains(&label)
        || SCENE_MARKERS.contains(&label)
}

fn is_han(c: char) -> bool {
    matches!(c, '\u{4E00}'..='\u{9FFF}' | '\u{3400}'..='\u{4DBF}' | '\u{F900}'..='\u{FAFF}')
}

/// バッファ全体をショット列にパースする。
///
/// ショットの終端境界は「次のショットマーカー / 角色・場景マーカー /
/// バッファ末尾」のうち最初に現れるもの。
pub fn parse_shots(buffer: &str) -> Vec<Shot> {
    let mut shots: Vec<Shot> = Vec::new();
    let mut current: Option<Shot> = None;
    let mut current_field: Option<FieldKind> = None;
    let mut offset = 0usize;

    for raw in buffer.split_inclusive('\n') {
        let line_start = offset;
        offset += raw.len();
        let trimmed = raw.trim();

        if let Some(number) = match_shot_marker(trimmed) {
            if let Some(mut done) = current.take() {
                done.span.end = line_start;
                shots.push(done);
            }
            current = Some(Shot::new(number, line_start));
            current_field = None;
            continue;
        }

        if is_role_marker_line(trimmed) || is_scene_marker_line(trimmed) {
            if let Some(mut done) = current.take() {
                done.span.end = line_start;
                shots.push(done);
            }
            current_field = None;
            continue;
        }

        let Some(shot) = current.as_mut() else { continue };

        if let Some((kind, value)) = match_field_line(trimmed) {
            *shot.field_mut(kind) = value.to_string();
            current_field = kind.is_multiline().then_some(kind);
        } else if trimmed.is_empty() {
            current_field = None;
        } else if let Some(kind) = current_field {
            let field = shot.field_mut(kind);
            if !field.is_empty() {
                field.push('\n');
            }
            field.push_str(trimmed);
        }
    }

    if let Some(mut done) = current.take() {
        done.span.end = buffer.len();
        shots.push(done);
    }
    shots
}

/// 末尾ショットの構造チェック結果
#[derive(Debug, Clone)]
pub struct TrailingShotCheck {
    /// 再生成が必要な場合、該当ショットのスパンを丸ごと除いたバッファ
    pub cleaned_buffer: String,
    pub last_shot_number: Option<u32>,
    pub needs_rework: bool,
}

/// 引用符が開いたまま閉じていない文案か
fn caption_quote_unclosed(caption: &str, pairs: &[(char, char)]) -> bool {
    let text = caption.trim();
    if text.is_empty() {
        return false; // 欠落・空値は別ルールで検出する
    }
    for (open, close) in pairs {
        if open == close {
            if text.chars().filter(|c| c == open).count() % 2 == 1 {
                return true;
            }
        } else {
            let opens = text.chars().filter(|c| c == open).count();
            let closes = text.chars().filter(|c| c == close).count();
            if opens > closes {
                return true;
            }
        }
    }
    false
}

/// 最後に開始されたショットの構造的完全性を判定する。
///
/// 再生成条件: 必須 6 フィールドのいずれかが欠落 / 最終フィールド（音效）が
/// 空 / 文案の引用符が未閉。フィールドが全て埋まっているショットは、
/// スパンが長いというだけでは絶対に再生成しない。
pub fn find_incomplete_trailing_shot(buffer: &str, config: &EngineConfig) -> TrailingShotCheck {
    let shots = parse_shots(buffer);
    let Some(last) = shots.last() else {
        return TrailingShotCheck {
            cleaned_buffer: buffer.to_string(),
            last_shot_number: None,
            needs_rework: false,
        };
    };

    let span_text = &buffer[last.span.clone()];
    let span_chars = span_text.chars().count();

    let missing = FIELD_LABELS.iter().any(|(_, variants)| {
        !span_text
            .lines()
            .filter_map(split_label)
            .any(|(label, _)| variants.contains(&label))
    });
    let sound_empty = last.sound_effect.trim().is_empty();
    let unclosed = caption_quote_unclosed(&last.caption, &config.quote_pairs);

    let needs_rework = missing || sound_empty || unclosed;
    if needs_rework && span_chars < MIN_SHOT_SPAN_CHARS {
        tracing::debug!(
            "✂️ [ShotParser] Trailing shot {} looks truncated ({} chars < {})",
            last.number,
            span_chars,
            MIN_SHOT_SPAN_CHARS
        );
    }

    let cleaned_buffer = if needs_rework {
        buffer[..last.span.start].trim_end().to_string()
    } else {
        buffer.to_string()
    };

    TrailingShotCheck {
        cleaned_buffer,
        last_shot_number: Some(last.number),
        needs_rework,
    }
}

/// 台詞 1 件分のコピー文字数。
/// 認識できる引用符ペアが無い場合は生の値で数える（過少計上の軟化）。
fn dialogue_span_len(caption: &str, pairs: &[(char, char)]) -> usize {
    let text = caption.trim();
    for (open, close) in pairs {
        if let Some(i) = text.find(*open) {
            let after = &text[i + open.len_utf8()..];
            if let Some(j) = after.find(*close) {
                return after[..j].chars().count();
            }
        }
    }
    text.chars().count()
}

/// 全ショットの台詞コピー量（文字数）の合計
pub fn copied_length(shots: &[Shot], pairs: &[(char, char)]) -> usize {
    shots
        .iter()
        .map(|s| dialogue_span_len(&s.caption, pairs))
        .sum()
}

/// 引用符が認識できず生値フォールバックで数えたショットの数。
/// 過少計上ドリフトの診断に使う
pub fn unquoted_caption_count(shots: &[Shot], pairs: &[(char, char)]) -> usize {
    shots
        .iter()
        .filter(|s| {
            let text = s.caption.trim();
            !text.is_empty()
                && !pairs
                    .iter()
                    .any(|(open, _)| text.contains(*open))
        })
        .count()
}

/// テンプレート外の迷い込み行か（最初の info マーカーより前の領域で適用）。
/// 短い漢字ラベルの `ラベル：値` 行のうち、正規 6+3 語彙に無いものを落とす
fn is_stray_field_line(line: &str) -> bool {
    let Some((label, _)) = split_label(line) else {
        return false;
    };
    if label.is_empty() || label.chars().count() > 8 {
        return false;
    }
    if !label.chars().all(is_han) {
        return false;
    }
    !is_canonical_label(label)
}

/// 全バッファのクリーニングパス。
///
/// 1. テンプレート外行（別系統の見出し・罫線・語彙外の `ラベル：値` 行）を除去
/// 2. 重複ショット番号は先勝ちで、後続の重複は本体ごと削除
/// 3. 場景信息ブロックが成立した後ろに続く内容（幻覚オーバーフロー）を切り落とす
pub fn clean_script_output(buffer: &str) -> String {
    let filtered = remove_non_template_lines(buffer);
    let deduped = remove_duplicate_shots(&filtered);
    trim_after_scene_info(&deduped)
}

fn remove_non_template_lines(buffer: &str) -> String {
    let mut out = String::with_capacity(buffer.len());
    let mut info_section_started = false;
    for raw in buffer.split_inclusive('\n') {
        let trimmed = raw.trim();
        if is_role_marker_line(trimmed) || is_scene_marker_line(trimmed) {
            info_section_started = true;
        }
        if separator_re().is_match(trimmed) || alt_heading_re().is_match(trimmed) {
            continue;
        }
        if !info_section_started && is_stray_field_line(trimmed) {
            continue;
        }
        out.push_str(raw);
    }
    out
}

fn remove_duplicate_shots(buffer: &str) -> String {
    let mut seen: HashSet<u32> = HashSet::new();
    let mut out = String::with_capacity(buffer.len());
    let mut skipping = false;
    for raw in buffer.split_inclusive('\n') {
        let trimmed = raw.trim();
        if let Some(number) = match_shot_marker(trimmed) {
            if !seen.insert(number) {
                skipping = true;
                continue;
            }
            skipping = false;
        } else if is_role_marker_line(trimmed) || is_scene_marker_line(trimmed) {
            skipping = false;
        }
        if !skipping {
            out.push_str(raw);
        }
    }
    out
}

/// エントリ文法に合致する行か（`ラベル：値` / 番号付き項目）
fn is_entry_grammar_line(line: &str) -> bool {
    if numbered_entry_re().is_match(line) {
        return true;
    }
    split_label(line).is_some()
}

fn trim_after_scene_info(buffer: &str) -> String {
    let lines: Vec<&str> = buffer.split_inclusive('\n').collect();
    let Some(marker_idx) = lines
        .iter()
        .position(|l| is_scene_marker_line(l.trim()))
    else {
        return buffer.to_string();
    };

    let mut last_entry_idx = None;
    for (i, line) in lines.iter().enumerate().skip(marker_idx + 1) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if is_entry_grammar_line(trimmed) {
            last_entry_idx = Some(i);
        }
    }

    // ブロックが成立していなければ（エントリゼロ）何も切らない
    let Some(last_entry_idx) = last_entry_idx else {
        return buffer.to_string();
    };

    let mut out: String = lines[..=last_entry_idx].concat();
    let trimmed_len = out.trim_end().len();
    out.truncate(trimmed_len);
    out
}
