use std::io::Write;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use weather_checker::config::{Controller, GlobalArgs, Settings};
use weather_checker::controller::CheckOutcome;
use weather_checker::render::{detection_line, render_view};

#[derive(Parser)]
#[command(name = "weather-checker")]
#[command(about = "Check the current weather for a city")]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check the weather for one city and exit
    Check {
        /// City name, e.g. Colombo
        #[arg(required = true, num_args = 1..)]
        city: Vec<String>,
    },
    /// Read city names from stdin, one per line, until EOF or "quit"
    Interactive,
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "weather_checker=debug"
    } else {
        "weather_checker=warn"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Handle the `check` subcommand.
///
/// Waits for detection to settle first so that asking for your own city gets
/// the joke, then runs a single check and prints the resulting view.
async fn do_check(controller: &Controller, city: &str) -> anyhow::Result<ExitCode> {
    controller.detect().await;
    let outcome = controller.check(city).await;
    println!("{}", render_view(&controller.view()));
    Ok(match outcome {
        CheckOutcome::Failed => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    })
}

fn prompt() -> anyhow::Result<()> {
    print!("> ");
    std::io::stdout().flush().context("failed to write prompt")
}

/// Handle the `interactive` subcommand.
///
/// Detection runs alongside the input loop; a check typed before detection
/// settles is looked up normally.
async fn do_interactive(controller: &Controller) -> anyhow::Result<ExitCode> {
    let detection = async {
        controller.detect().await;
        println!("\n{}", detection_line(&controller.view().detection));
    };

    let session = async {
        println!(
            "Type a city and press Enter. If you search your own city, you'll get a cheeky reminder."
        );
        prompt()?;
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await.context("failed to read input")? {
            if matches!(line.trim(), "quit" | "exit") {
                break;
            }
            controller.check(&line).await;
            println!("{}\n", render_view(&controller.view()));
            prompt()?;
        }
        anyhow::Ok(ExitCode::SUCCESS)
    };

    tokio::pin!(detection, session);
    tokio::select! {
        result = &mut session => return result,
        () = &mut detection => {}
    }
    session.await
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.global.verbose);

    let settings = Settings::from_args(&cli.global)?;
    tracing::debug!(?settings, "starting");
    let controller = settings.controller()?;

    match cli.command {
        Command::Check { city } => do_check(&controller, &city.join(" ")).await,
        Command::Interactive => do_interactive(&controller).await,
    }
}
