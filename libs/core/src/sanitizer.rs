//! # Sanitizer — 出力整形
//!
//! ストリーミング中に混入する Markdown / HTML 由来の装飾を除去する。
//! 純関数かつ冪等。`sanitize(sanitize(x)) == sanitize(x)` をテストで保証する。
//!
//! モード別ルール:
//! - 角括弧フィールド記法 `[ラベル]` は分鏡脚本モードでのみ保持
//! - 番号付きリストは總結・分鏡脚本モードでのみ保持

use crate::contracts::Mode;
use regex::Regex;
use std::sync::OnceLock;

static MD_LINK_RE: OnceLock<Regex> = OnceLock::new();
static HTML_TAG_RE: OnceLock<Regex> = OnceLock::new();
static HEADING_RE: OnceLock<Regex> = OnceLock::new();
static BULLET_RE: OnceLock<Regex> = OnceLock::new();
static ORDERED_RE: OnceLock<Regex> = OnceLock::new();
static BRACKET_RE: OnceLock<Regex> = OnceLock::new();
static CJK_BRACKET_RE: OnceLock<Regex> = OnceLock::new();
static BLANKS_RE: OnceLock<Regex> = OnceLock::new();
static LINE_TAIL_RE: OnceLock<Regex> = OnceLock::new();

fn md_link_re() -> &'static Regex {
    MD_LINK_RE.get_or_init(|| Regex::new(r"\[([^\[\]]*)\]\(([^()]*)\)").unwrap())
}

fn html_tag_re() -> &'static Regex {
    HTML_TAG_RE.get_or_init(|| Regex::new(r"<[^<>\n]*>").unwrap())
}

fn heading_re() -> &'static Regex {
    // `#標籤` のようなハッシュタグは後続の空白が無いため対象外
    HEADING_RE.get_or_init(|| Regex::new(r"(?m)^\s*#{1,6}[ \t]+").unwrap())
}

fn bullet_re() -> &'static Regex {
    // 同期マーカー行 `-----` は空白を伴わないため対象外
    BULLET_RE.get_or_init(|| Regex::new(r"(?m)^\s*[-*+•][ \t]+").unwrap())
}

fn ordered_re() -> &'static Regex {
    ORDERED_RE.get_or_init(|| Regex::new(r"(?m)^\s*\d+\.[ \t]+").unwrap())
}

fn bracket_re() -> &'static Regex {
    BRACKET_RE.get_or_init(|| Regex::new(r"\[[^\[\]\n]*\]").unwrap())
}

fn cjk_bracket_re() -> &'static Regex {
    CJK_BRACKET_RE.get_or_init(|| Regex::new(r"【[^【】\n]*】").unwrap())
}

fn blanks_re() -> &'static Regex {
    BLANKS_RE.get_or_init(|| Regex::new(r"\n\s*\n\s*\n+").unwrap())
}

fn line_tail_re() -> &'static Regex {
    LINE_TAIL_RE.get_or_init(|| Regex::new(r"(?m)[ \t]+$").unwrap())
}

/// 1 パス分の整形。`sanitize` はこれを不動点まで反復する。
fn sanitize_pass(text: &str, mode: Mode) -> String {
    let keep_ordered = matches!(mode, Mode::Summarize | Mode::ScriptExtract);
    let keep_brackets = matches!(mode, Mode::ScriptExtract);

    // リンク記法はどのモードでも本文テキストだけを残す
    let mut out = md_link_re().replace_all(text, "$1").into_owned();

    out = heading_re().replace_all(&out, "").into_owned();
    out = bullet_re().replace_all(&out, "").into_owned();
    if !keep_ordered {
        out = ordered_re().replace_all(&out, "").into_owned();
    }

    // HTML タグを落としたあと、残った山括弧もグリフ単位で除去する。
    // パス後に '<' '>' が残らないため、入れ子でタグが再形成されることはない
    out = html_tag_re().replace_all(&out, "").into_owned();
    out.retain(|c| !matches!(c, '*' | '_' | '~' | '`' | '<' | '>'));

    if !keep_brackets {
        out = bracket_re().replace_all(&out, "").into_owned();
        out = cjk_bracket_re().replace_all(&out, "").into_owned();
    }

    out = line_tail_re().replace_all(&out, "").into_owned();
    out = blanks_re().replace_all(&out, "\n\n").into_owned();
    out.trim().to_string()
}

/// 出力整形。純関数・冪等。
///
/// 1 パスでは入れ子になったリンク記法などが新しいパターンを生むことが
/// あるため、不動点に達するまで反復する。各パスは文字を増やさないので
/// 必ず停止する（実用上は 1〜2 パスで収束）。
pub fn sanitize(text: &str, mode: Mode) -> String {
    let mut current = sanitize_pass(text, mode);
    loop {
        let next = sanitize_pass(&current, mode);
        if next == current {
            return current;
        }
        current = next;
    }
}
