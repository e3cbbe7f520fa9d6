use clap::Parser;
use futures_util::stream::{self, StreamExt};
use infrastructure::{GeminiGateway, YunwuGateway};
use scribe_core::contracts::{ChatRequest, GenerationRequest, Mode};
use scribe_core::planner::parse_topic_lines;
use scribe_core::traits::CompletionGateway;
use scribe_core::weaver::Weaver;
use shared::config::{Provider, ScribeConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tuning::PersonaManager;

mod runner;
use runner::{write_result, TaskReport};

#[derive(Parser, Debug)]
#[command(author, version, about = "ScribeFactory — 長文コンテンツ生成工場", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// 企画フェーズ: 選題リストを生成する
    Plan {
        /// ペルソナキー (tcm / finance / revenge / news)
        #[arg(short, long, default_value = "tcm")]
        persona: String,

        /// 任意のキーワード（日付・題材など）
        #[arg(short, long)]
        input: Option<String>,
    },
    /// 生成フェーズ: 原文ファイルを変換する（複数指定で並列実行）
    Generate {
        /// 変換モード
        #[arg(short, long, value_enum, default_value_t = ModeArg::Rewrite)]
        mode: ModeArg,

        /// ペルソナキー
        #[arg(short, long, default_value = "tcm")]
        persona: String,

        /// 原文ファイル（複数可）
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Rewrite,
    Expand,
    Summarize,
    Polish,
    Script,
}

impl From<ModeArg> for Mode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Rewrite => Mode::Rewrite,
            ModeArg::Expand => Mode::Expand,
            ModeArg::Summarize => Mode::Summarize,
            ModeArg::Polish => Mode::Polish,
            ModeArg::Script => Mode::ScriptExtract,
        }
    }
}

fn build_gateway(config: &ScribeConfig) -> Arc<dyn CompletionGateway> {
    match config.resolved_provider() {
        Provider::Yunwu => Arc::new(YunwuGateway::new()),
        Provider::Google => Arc::new(GeminiGateway::new()),
    }
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config = ScribeConfig::load()?;
    info!("🏭 ScribeFactory starting: {:?}", config);

    if config.api_key.trim().is_empty() {
        anyhow::bail!("API キーが未設定です。GEMINI_API_KEY か SCRIBE_FACTORY_API_KEY を設定してください");
    }

    let gateway = build_gateway(&config);
    let personas = PersonaManager::load_or_default(&config.personas_file);

    // Ctrl-C で協調キャンセル。実行中のストリームはチャンク境界で止まる
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                warn!("🛑 Ctrl-C — cancelling in-flight generation");
                cancel.cancel();
            }
        });
    }

    match args.command {
        Commands::Plan { persona, input } => {
            plan_topics(&config, gateway, &personas, &persona, input.as_deref()).await
        }
        Commands::Generate { mode, persona, inputs } => {
            generate_files(&config, gateway, &personas, mode.into(), &persona, inputs, cancel).await
        }
    }
}

/// 企画フェーズ: 非ストリーミング呼び出しで選題リストを得る
async fn plan_topics(
    config: &ScribeConfig,
    gateway: Arc<dyn CompletionGateway>,
    personas: &PersonaManager,
    persona_key: &str,
    input: Option<&str>,
) -> Result<(), anyhow::Error> {
    let profile = personas
        .get(persona_key)
        .ok_or_else(|| anyhow::anyhow!("未知のペルソナ: {} (候補: {:?})", persona_key, personas.keys()))?;

    info!("🗓️ [Plan] Persona '{}' ({})", persona_key, profile.label);
    let request = ChatRequest::planning(
        profile.topic_prompt(input),
        profile.system_instruction.clone(),
    );
    let raw = gateway.complete(&config.client_config(), request).await?;
    let topics = parse_topic_lines(&raw);

    if topics.is_empty() {
        anyhow::bail!("選題を抽出できませんでした。モデル応答: {}", raw);
    }
    println!("📋 選題候補 ({} 件):", topics.len());
    for (i, topic) in topics.iter().enumerate() {
        println!("{:>2}. {}", i + 1, topic);
    }
    Ok(())
}

/// 生成フェーズ: 各入力ファイルを独立タスクとして並列駆動する。
/// タスク間に共有可変状態は無い
async fn generate_files(
    config: &ScribeConfig,
    gateway: Arc<dyn CompletionGateway>,
    personas: &PersonaManager,
    mode: Mode,
    persona_key: &str,
    inputs: Vec<PathBuf>,
    cancel: CancellationToken,
) -> Result<(), anyhow::Error> {
    let profile = personas
        .get(persona_key)
        .ok_or_else(|| anyhow::anyhow!("未知のペルソナ: {} (候補: {:?})", persona_key, personas.keys()))?;

    let weaver = Arc::new(
        Weaver::new(gateway, config.client_config()).with_engine_config(config.engine_config()),
    );
    let output_dir = PathBuf::from(&config.output_dir);
    std::fs::create_dir_all(&output_dir)?;

    info!(
        "🚀 [Generate] {} file(s), mode {}, concurrency {}",
        inputs.len(),
        mode.label(),
        config.batch_size
    );

    let reports: Vec<TaskReport> = stream::iter(inputs.into_iter().map(|path| {
        let weaver = Arc::clone(&weaver);
        let profile = profile.clone();
        let cancel = cancel.clone();
        let output_dir = output_dir.clone();
        async move {
            run_one(weaver.as_ref(), mode, &profile, &path, &output_dir, cancel).await
        }
    }))
    .buffer_unordered(config.batch_size.max(1))
    .collect()
    .await;

    let mut failed = 0usize;
    for report in &reports {
        if report.ok {
            info!(
                "🏆 {} → {} (rounds: {}, completed: {})",
                report.input.display(),
                report.output.as_ref().map(|p| p.display().to_string()).unwrap_or_default(),
                report.rounds_used,
                report.completed
            );
        } else {
            failed += 1;
            error!("❌ {} failed: {}", report.input.display(), report.detail);
        }
    }

    if failed > 0 {
        anyhow::bail!("{} 件のタスクが失敗しました", failed);
    }
    Ok(())
}

/// 1 ファイル分の生成タスク
async fn run_one(
    weaver: &Weaver,
    mode: Mode,
    profile: &tuning::PersonaProfile,
    input: &Path,
    output_dir: &Path,
    cancel: CancellationToken,
) -> TaskReport {
    let source_text = match std::fs::read_to_string(input) {
        Ok(text) => text,
        Err(e) => {
            return TaskReport::failure(input, format!("読み込み失敗: {}", e));
        }
    };

    let request = GenerationRequest {
        mode,
        source_text,
        profile: profile.domain_profile(),
    };

    // ライブ進捗: 2000 字刻みでログに出す
    let mut last_logged = 0usize;
    let input_name = input.display().to_string();
    let result = weaver
        .run_generation(
            request,
            |text| {
                let len = text.chars().count();
                if len >= last_logged + 2000 {
                    last_logged = len;
                    info!("✍️ [{}] {} chars so far", input_name, len);
                }
            },
            cancel,
        )
        .await;

    write_result(input, mode, output_dir, result)
}
