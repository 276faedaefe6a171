use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use eoka_pilot::{CdpDriver, Command, Pilot, PilotConfig, ACTION_NAMES};

mod mcp;

#[derive(Parser)]
#[command(name = "eoka-pilot")]
#[command(about = "Element resolution and verified interaction for browser agents")]
#[command(version)]
struct Cli {
    /// YAML config file (defaults plus EOKA_PILOT_* environment otherwise)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Quiet mode (only errors)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Serve the MCP tools over stdio
    Serve,

    /// Run an action script, one `action payload` per line
    Run {
        /// Script file
        script: PathBuf,

        /// Page to open before the first step
        #[arg(long)]
        url: Option<String>,

        /// Run in headless mode (overrides config)
        #[arg(long)]
        headless: bool,

        /// Parse the script without launching a browser
        #[arg(long)]
        check: bool,
    },
}

/// One script line.
#[derive(Debug)]
struct Step {
    line: usize,
    action: String,
    payload: String,
}

fn parse_script(source: &str) -> anyhow::Result<Vec<Step>> {
    let mut steps = Vec::new();
    for (i, raw) in source.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (action, payload) = match line.split_once(char::is_whitespace) {
            Some((a, p)) => (a, p.trim()),
            None => (line, ""),
        };
        match Command::parse(action, payload) {
            Ok(Some(_)) => {}
            Ok(None) => bail!(
                "line {}: unknown action '{}' (expected one of: {})",
                i + 1,
                action,
                ACTION_NAMES.join(", ")
            ),
            Err(e) => bail!("line {}: {}", i + 1, e),
        }
        steps.push(Step {
            line: i + 1,
            action: action.to_string(),
            payload: payload.to_string(),
        });
    }
    Ok(steps)
}

fn init_logging(verbose: u8, quiet: bool) {
    // stdout carries MCP frames and script results
    if std::env::var_os("RUST_LOG").is_some() {
        FmtSubscriber::builder()
            .with_env_filter(EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .with_target(false)
            .compact()
            .init();
        return;
    }

    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            _ => Level::DEBUG,
        }
    };

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

fn load_config(path: Option<&Path>) -> anyhow::Result<PilotConfig> {
    Ok(match path {
        Some(p) => PilotConfig::load(p)
            .with_context(|| format!("loading config {}", p.display()))?,
        None => PilotConfig::from_env()?,
    })
}

async fn run_script(
    mut config: PilotConfig,
    script: &Path,
    url: Option<String>,
    headless: bool,
    check: bool,
) -> anyhow::Result<bool> {
    let source = std::fs::read_to_string(script)
        .with_context(|| format!("reading script {}", script.display()))?;
    let steps = parse_script(&source)?;

    if check {
        println!("Script valid: {}", script.display());
        println!("  Steps: {}", steps.len());
        return Ok(true);
    }

    if headless {
        config.browser.headless = true;
    }

    let mut driver = CdpDriver::launch(&config.browser).await?;
    if let Some(ref url) = url {
        driver.goto(url).await?;
    }
    let mut pilot = Pilot::new(driver, &config);

    let mut failures = 0;
    for step in &steps {
        let outcome = pilot.dispatch(&step.action, &step.payload).await;
        if outcome.is_error() {
            failures += 1;
        }
        println!(
            "[{}] {:>3}: {} {}\n      {}",
            chrono::Local::now().format("%H:%M:%S"),
            step.line,
            step.action,
            step.payload,
            outcome
        );
    }

    println!();
    if failures == 0 {
        println!("✓ {} steps", steps.len());
    } else {
        println!("✗ {} of {} steps failed", failures, steps.len());
    }

    pilot.into_driver().close().await?;
    Ok(failures == 0)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Mode::Serve => mcp::run_server(config).await,
        Mode::Run {
            script,
            url,
            headless,
            check,
        } => {
            if !run_script(config, &script, url, headless, check).await? {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_skips_comments_and_blank_lines() {
        let steps = parse_script("# login\n\nclick 3\ntype #q|rust|ENTER\nscroll\n").unwrap();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].line, 3);
        assert_eq!(steps[1].action, "type");
        assert_eq!(steps[1].payload, "#q|rust|ENTER");
        assert_eq!(steps[2].payload, "");
    }

    #[test]
    fn script_rejects_unknown_action() {
        let err = parse_script("click 1\nteleport 4\n").unwrap_err().to_string();
        assert!(err.starts_with("line 2: unknown action 'teleport'"));
        assert!(err.contains("find_element"));
    }
}
