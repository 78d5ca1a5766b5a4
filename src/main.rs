use anyhow::{Context, Result, anyhow};
use serde_json::json;
use std::env;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use flashcard_ai::{
    Config, FlashcardFormat, FlashcardPipeline, LocalFileStore, SourceCard, init_logging,
    log_system_event,
};

const USAGE: &str = "Usage: flashcard-ai <file> [definition|question] [count] [--quiz]\n       flashcard-ai --health";
const DEFAULT_CARD_COUNT: usize = 10;

struct CliArgs {
    file: String,
    format: FlashcardFormat,
    count: usize,
    quiz: bool,
}

enum Command {
    Generate(CliArgs),
    Health,
}

fn parse_args(args: &[String]) -> Result<Command> {
    if args.iter().any(|a| a == "--health") {
        return Ok(Command::Health);
    }

    let quiz = args.iter().any(|a| a == "--quiz");
    let positional: Vec<&String> = args.iter().filter(|a| !a.starts_with("--")).collect();

    let file = positional
        .first()
        .map(|f| f.to_string())
        .ok_or_else(|| anyhow!("{}", USAGE))?;

    let format = match positional.get(1) {
        Some(raw) => raw.parse::<FlashcardFormat>().map_err(|e| anyhow!(e))?,
        None => FlashcardFormat::Question,
    };

    let count = match positional.get(2) {
        Some(raw) => raw
            .parse::<usize>()
            .with_context(|| format!("Invalid card count '{}'", raw))?,
        None => DEFAULT_CARD_COUNT,
    };

    Ok(Command::Generate(CliArgs {
        file,
        format,
        count,
        quiz,
    }))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let args: Vec<String> = env::args().skip(1).collect();
    let command = parse_args(&args)?;

    let config = Config::from_env()?;
    let _guard = init_logging(&config.logging)?;
    config.validate()?;

    match command {
        Command::Health => {
            let pipeline = FlashcardPipeline::new(
                &config.ai,
                config.batching,
                Arc::new(LocalFileStore::new(".")),
            );
            let report = pipeline.check_health().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Generate(cli) => run_generation(&config, cli).await?,
    }

    log_system_event!(shutdown, component = "cli", "Done");
    Ok(())
}

async fn run_generation(config: &Config, cli: CliArgs) -> Result<()> {
    let path = Path::new(&cli.file);
    let root = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_id = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("Invalid file path '{}'", cli.file))?;

    let pipeline = FlashcardPipeline::new(
        &config.ai,
        config.batching,
        Arc::new(LocalFileStore::new(root)),
    );

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling generation");
            ctrl_c.cancel();
        }
    });

    info!(file = %cli.file, format = %cli.format, count = cli.count, "Generating flashcards");

    let deck = pipeline
        .generate_deck_from_file(file_id, cli.format, cli.count, &cancel)
        .await?;

    let quiz = if cli.quiz {
        let sources: Vec<SourceCard> = deck
            .cards
            .iter()
            .enumerate()
            .map(|(i, card)| SourceCard::new((i + 1).to_string(), &card.front, &card.back))
            .collect();
        Some(pipeline.generate_quiz_with_cancel(&sources, &cancel).await?)
    } else {
        None
    };

    let output = json!({
        "deck": deck,
        "quiz": quiz,
        "stats": pipeline.stats(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}
