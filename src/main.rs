//! Command-line demo of model chains.
//!
//! ```text
//! chatchain [--log-dir <dir>] [invoke|batch|stream|log|fallback] [prompt words...]
//! ```
//!
//! Reads `OPENAI_API_KEY`, `BASE_URL` and `MODEL` from the environment (or a
//! `.env` file). `RUST_LOG` controls log output, which goes to stderr unless
//! `--log-dir` asks for rotating JSON log files.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use futures::StreamExt;

use chatchain::inference::{failing_demo_model, primary_model, EnvConfig};
use chatchain::parsers::StringOutputParser;
use chatchain::runnable::{LogEvent, PromptValue};
use chatchain::Runnable;

const DEFAULT_PROMPT: &str = "Tell me a short joke about compilers.";

#[tokio::main]
async fn main() -> Result<()> {
    let env = EnvConfig::from_env();

    let mut args = std::env::args().skip(1).peekable();
    if args.peek().map(String::as_str) == Some("--log-dir") {
        args.next();
        let dir = args.next().map(PathBuf::from).context("--log-dir needs a directory")?;
        let log_file = chatchain::init_file_tracing(&dir)
            .with_context(|| format!("failed to open log directory {}", dir.display()))?;
        eprintln!("logging to {}", log_file.display());
    } else {
        chatchain::init_tracing();
    }

    let missing = env.missing_fields();
    if !missing.is_empty() {
        tracing::warn!(?missing, "environment is incomplete, requests may fail");
    }

    let mode = args.next().unwrap_or_else(|| "fallback".to_string());
    let words: Vec<String> = args.collect();
    let prompt = if words.is_empty() {
        DEFAULT_PROMPT.to_string()
    } else {
        words.join(" ")
    };

    let model = primary_model(&env).context("failed to build primary model")?;

    match mode.as_str() {
        "invoke" => {
            let chain = model.pipe(StringOutputParser);
            let answer = chain.invoke(PromptValue::from(prompt)).await?;
            println!("{answer}");
        }
        "batch" => {
            let chain = model.pipe(StringOutputParser);
            let inputs = vec![
                PromptValue::from("What is your name?"),
                PromptValue::from(prompt),
            ];
            for (idx, result) in chain.batch(inputs).await.into_iter().enumerate() {
                match result {
                    Ok(answer) => println!("[{idx}] {answer}"),
                    Err(e) => println!("[{idx}] error: {e}"),
                }
            }
        }
        "stream" => {
            let chain = model.pipe(StringOutputParser);
            let mut tokens = chain.stream(PromptValue::from(prompt));
            let mut stdout = std::io::stdout();
            while let Some(token) = tokens.next().await {
                write!(stdout, "{}", token?)?;
                stdout.flush()?;
            }
            writeln!(stdout)?;
        }
        "log" => {
            let chain = model.pipe(StringOutputParser);
            let mut events = chain.stream_log(PromptValue::from(prompt));
            while let Some(event) = events.next().await {
                match event? {
                    LogEvent::Step(step) => println!("{}", serde_json::to_string(&step)?),
                    LogEvent::Final(answer) => println!("final: {answer}"),
                }
            }
        }
        "fallback" => {
            let broken = failing_demo_model(&env)
                .context("failed to build demo model")?
                .pipe(StringOutputParser);
            match broken.invoke(PromptValue::from(prompt.as_str())).await {
                Ok(answer) => println!("unexpected success: {answer}"),
                Err(e) => println!("without fallback: {e}"),
            }

            let chain = failing_demo_model(&env)?
                .with_fallbacks(vec![model.boxed()])
                .pipe(StringOutputParser);
            let answer = chain.invoke(PromptValue::from(prompt)).await?;
            println!("with fallback: {answer}");
        }
        other => bail!("unknown mode '{other}', expected invoke, batch, stream, log or fallback"),
    }

    Ok(())
}
