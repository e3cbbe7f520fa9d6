//! 生成結果のファイル出力とタスクレポート

use scribe_core::contracts::{FinalResult, Mode};
use std::path::{Path, PathBuf};

/// 1 タスク分の実行結果サマリ
pub struct TaskReport {
    pub input: PathBuf,
    pub output: Option<PathBuf>,
    pub ok: bool,
    pub completed: bool,
    pub rounds_used: u32,
    pub detail: String,
}

impl TaskReport {
    pub fn failure(input: &Path, detail: String) -> Self {
        Self {
            input: input.to_path_buf(),
            output: None,
            ok: false,
            completed: false,
            rounds_used: 0,
            detail,
        }
    }
}

/// ファイル名に使えない文字を `_` に置き換え、長すぎる名前は切り詰める
fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|') {
                '_'
            } else {
                c
            }
        })
        .take(100)
        .collect()
}

fn mode_suffix(mode: Mode) -> &'static str {
    match mode {
        Mode::Rewrite => "rewrite",
        Mode::Expand => "expand",
        Mode::Summarize => "summary",
        Mode::Polish => "polish",
        Mode::ScriptExtract => "script",
    }
}

/// 生成結果を書き出す。中断された部分出力も必ずファイルに残す
pub fn write_result(input: &Path, mode: Mode, output_dir: &Path, result: FinalResult) -> TaskReport {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    let file_name = format!("{}_{}.txt", sanitize_filename(stem), mode_suffix(mode));
    let path = output_dir.join(file_name);

    if let Err(e) = std::fs::write(&path, &result.text) {
        return TaskReport::failure(input, format!("書き出し失敗 ({}): {}", path.display(), e));
    }

    let detail = match &result.abort_reason {
        Some(reason) => format!("{} (部分出力は {} に保存済み)", reason, path.display()),
        None => String::new(),
    };

    TaskReport {
        input: input.to_path_buf(),
        output: Some(path),
        ok: !result.aborted,
        completed: result.completed,
        rounds_used: result.rounds_used,
        detail,
    }
}
