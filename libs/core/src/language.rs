//! # 言語ヒューリスティック
//!
//! 文字クラス比率による簡易スクリプト判定。プロンプトに「原文と同じ言語を
//! 保て」という指示を注入するために使う。本格的な言語判定ライブラリに
//! 差し替えられるよう、戦略インターフェースとして切り出してある。

/// 判定結果の三値ヒント
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptHint {
    /// CJK 文字が優勢（2:1 以上）
    CjkDominant,
    /// ラテン文字が優勢（2:1 以上）
    LatinDominant,
    /// どちらも優勢に達しない混在テキスト
    Mixed,
}

/// スクリプト判定の戦略インターフェース
pub trait ScriptDetector: Send + Sync {
    fn detect(&self, text: &str) -> ScriptHint;
}

/// 文字クラス数え上げによるデフォルト実装
#[derive(Debug, Default)]
pub struct CharClassDetector;

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}'   // CJK Unified Ideographs
        | '\u{3400}'..='\u{4DBF}' // Extension A
        | '\u{F900}'..='\u{FAFF}' // Compatibility Ideographs
        | '\u{3040}'..='\u{30FF}' // ひらがな・カタカナ
    )
}

impl ScriptDetector for CharClassDetector {
    fn detect(&self, text: &str) -> ScriptHint {
        let mut cjk = 0usize;
        let mut latin = 0usize;
        for c in text.chars() {
            if is_cjk(c) {
                cjk += 1;
            } else if c.is_ascii_alphabetic() {
                latin += 1;
            }
        }
        if cjk == 0 && latin == 0 {
            return ScriptHint::Mixed;
        }
        if cjk >= latin * 2 {
            ScriptHint::CjkDominant
        } else if latin >= cjk * 2 {
            ScriptHint::LatinDominant
        } else {
            ScriptHint::Mixed
        }
    }
}
