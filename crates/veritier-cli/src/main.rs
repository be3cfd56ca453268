//! `veritier` binary: one-shot rule verification and drift sweeps over a
//! directory of JSON rule files.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use veritier_core::InMemoryRuleStore;
use veritier_verify::{ConsistencyEngine, VerificationTier};
use veritier_workflows::{
    start_drift_detection, start_rule_verification, CoreActivities, DriftDetectionInput,
    LogNotifier, RuleVerificationInput,
};

#[derive(Parser)]
#[command(name = "veritier", version, about = "Regulatory rule verification")]
struct Cli {
    /// Directory of JSON rule files (one rule per file).
    #[arg(long, global = true, default_value = "rules", env = "VERITIER_RULES")]
    rules: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the consistency tier ladder against one rule.
    Verify {
        rule_id: String,
        /// Path to the legal source text to verify against.
        #[arg(long)]
        source: Option<PathBuf>,
        /// Highest tier to run (0-4).
        #[arg(long, default_value_t = 4)]
        max_tier: u8,
        /// Tiers to skip, by number. Repeatable.
        #[arg(long = "skip-tier")]
        skip_tiers: Vec<u8>,
        /// Keep running tiers after a failure.
        #[arg(long)]
        no_fail_fast: bool,
    },
    /// Check rules for drift against their current stored state.
    Drift {
        /// Specific rules to check; omit for the whole corpus.
        rule_ids: Vec<String>,
        /// Skip drift notifications.
        #[arg(long)]
        no_notify: bool,
    },
}

fn parse_tier(n: u8) -> anyhow::Result<VerificationTier> {
    VerificationTier::from_number(n).with_context(|| format!("no such tier: {n}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let mut store = InMemoryRuleStore::new();
    let loaded = store
        .load_directory(&cli.rules)
        .with_context(|| format!("loading rules from {}", cli.rules.display()))?;
    tracing::info!(count = loaded, "rule store ready");

    let activities = Arc::new(CoreActivities::new(
        Arc::new(store),
        ConsistencyEngine::heuristic(),
        Arc::new(LogNotifier),
    ));

    match cli.command {
        Command::Verify {
            rule_id,
            source,
            max_tier,
            skip_tiers,
            no_fail_fast,
        } => {
            let source_text = source
                .map(|path| {
                    std::fs::read_to_string(&path)
                        .with_context(|| format!("reading source text {}", path.display()))
                })
                .transpose()?;
            let skip_tiers = skip_tiers
                .into_iter()
                .map(parse_tier)
                .collect::<anyhow::Result<Vec<_>>>()?;
            let input = RuleVerificationInput {
                rule_id,
                source_text,
                max_tier: parse_tier(max_tier)?,
                skip_tiers,
                fail_fast: !no_fail_fast,
            };
            let handle = start_rule_verification(activities, input);
            let output = handle
                .result()
                .await
                .context("verification run terminated")?;
            println!("{}", serde_json::to_string_pretty(&output)?);
            if !output.overall_passed {
                std::process::exit(1);
            }
        }
        Command::Drift {
            rule_ids,
            no_notify,
        } => {
            let input = DriftDetectionInput {
                rule_ids,
                notify_on_drift: !no_notify,
            };
            let handle = start_drift_detection(activities, input);
            let output = handle.result().await.context("drift sweep terminated")?;
            println!("{}", serde_json::to_string_pretty(&output)?);
            if output.rules_with_drift > 0 {
                std::process::exit(2);
            }
        }
    }
    Ok(())
}
