//! # Planner — 企画フェーズの選題抽出
//!
//! 非ストリーミング補完が返す「1 行 1 選題」のテキストを整形する。
//! 番号・引用符・箇条書き記号を剥がし、短すぎる行はノイズとして捨てる。

use regex::Regex;
use std::sync::OnceLock;

/// 1 回の企画で採用する選題の上限
pub const MAX_TOPICS: usize = 10;

static NUMBERING_RE: OnceLock<Regex> = OnceLock::new();

fn numbering_re() -> &'static Regex {
    NUMBERING_RE.get_or_init(|| Regex::new(r"^\s*(?:\d+\s*[.、．)）]|[-*•])\s*").unwrap())
}

/// モデル出力から選題リストを抽出する
pub fn parse_topic_lines(raw: &str) -> Vec<String> {
    raw.lines()
        .map(|line| {
            let stripped = numbering_re().replace(line.trim(), "");
            stripped
                .chars()
                .filter(|c| !matches!(c, '"' | '\'' | '“' | '”' | '「' | '」' | '《' | '》'))
                .collect::<String>()
                .trim()
                .to_string()
        })
        .filter(|line| line.chars().count() > 5)
        .take(MAX_TOPICS)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_numbering_and_quotes() {
        let raw = "1. 《倪師警告：這三種顏色千萬別穿》\n2. 「臥室床頭的禁忌擺設」\n- 全家保命的晚餐守則\n";
        let topics = parse_topic_lines(raw);
        assert_eq!(
            topics,
            vec![
                "倪師警告：這三種顏色千萬別穿",
                "臥室床頭的禁忌擺設",
                "全家保命的晚餐守則",
            ]
        );
    }

    #[test]
    fn test_short_lines_are_noise() {
        let raw = "好的\n以下是標題\n芒格警告：2026年別碰這兩種資產，否則養老金歸零\n";
        let topics = parse_topic_lines(raw);
        assert_eq!(topics.len(), 1);
        assert!(topics[0].starts_with("芒格警告"));
    }

    #[test]
    fn test_caps_at_ten_topics() {
        let raw = (1..=15)
            .map(|i| format!("{i}. 這是第{i}個足夠長的候選標題"))
            .collect::<Vec<_>>()
            .join("\n");
        assert_eq!(parse_topic_lines(&raw).len(), MAX_TOPICS);
    }

    #[test]
    fn test_empty_input_yields_empty_list() {
        assert!(parse_topic_lines("").is_empty());
        assert!(parse_topic_lines("\n\n\n").is_empty());
    }
}
