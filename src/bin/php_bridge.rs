//! `php_world_repl` — a small interactive REPL over a live PHP interpreter.
//!
//! Evaluates snippets typed at a prompt through a single interpreter
//! instance, exercising the crate's public surface the way a human embedder
//! would. Doubles as a manual smoke test for the CLI transport.

use clap::Parser;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use php_world::config::Config;
use php_world::controller::Controller;
use php_world::host::HostRegistry;
use php_world::logging::JsonFormatter;
use php_world::value::PhpValue;

#[derive(Parser)]
#[command(name = "php_world_repl", version = php_world::VERSION)]
struct Args {
    /// Evaluate a single snippet and exit instead of starting the REPL.
    #[arg(long)]
    eval: Option<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.filter.clone().into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .event_format(JsonFormatter::new("php_world_repl"))
                .with_ansi(false),
        )
        .init();

    config.log_summary();

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(async_main(config, args))
}

async fn async_main(config: Config, args: Args) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let controller = Controller::new(config, HostRegistry::new());
    controller.ensure_initialized().await?;

    if let Some(snippet) = args.eval {
        let result = eval(&controller, &snippet).await;
        print_result(&result);
        controller.exit().await?;
        return result.map(|_| ()).map_err(|e| e.into());
    }

    run_repl(&controller).await;
    controller.exit().await?;
    Ok(())
}

async fn run_repl(controller: &Controller) {
    println!("php_world {} — type PHP expressions, Ctrl-D to exit", php_world::VERSION);
    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("failed to start line editor: {e}");
            return;
        }
    };

    loop {
        match rl.readline("php> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line);
                let result = eval(controller, line).await;
                print_result(&result);
            }
            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => break,
            Err(e) => {
                eprintln!("readline error: {e}");
                break;
            }
        }
    }
}

/// Evaluates `snippet` as a PHP expression via the global `eval()` dispatch
/// (§4.4 "single-segment global functions"), wrapping it in a `return` so a
/// bare expression yields a value back to the REPL.
async fn eval(controller: &Controller, snippet: &str) -> php_world::Result<PhpValue> {
    let body = format!("return {};", snippet.trim_end_matches(';'));
    controller.global("eval")?.call(vec![PhpValue::String(body)]).await
}

fn print_result(result: &php_world::Result<PhpValue>) {
    match result {
        Ok(value) => println!("=> {value}"),
        Err(e) => eprintln!("! {e}"),
    }
}
