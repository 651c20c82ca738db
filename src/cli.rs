use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::analysis::Analysis;
use crate::config::Config;
use crate::output::{self, OutputMode};
use crate::progress;
use crate::view::ViewTree;

#[derive(Parser)]
#[command(name = "dirscan")]
#[command(version)]
#[command(about = "Measure a directory tree and write an XML size report")]
#[command(long_about = "dirscan walks a directory tree depth-first, shows live progress \
    and writes every directory's aggregate size to an XML report.\n\n\
    Examples:\n  \
    dirscan analyze ~/src                  # Report to ./dir_<timestamp>.xml\n  \
    dirscan analyze /var --tree            # Also print the tree\n  \
    dirscan analyze . -o report.xml --json # Machine-readable summary")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase output verbosity (-v, -vv for more)
    #[arg(short = 'v', long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short = 'q', long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Crawl a directory tree and write a size report
    #[command(visible_alias = "a")]
    Analyze {
        /// Root directory to analyze
        #[arg(value_name = "PATH")]
        path: PathBuf,

        /// Report file [default: <output_dir>/<prefix><timestamp>.xml]
        #[arg(short = 'o', long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Live view queue capacity [default: 1]
        #[arg(long, value_name = "N")]
        ui_capacity: Option<usize>,

        /// Report queue capacity [default: 1000]
        #[arg(long, value_name = "N")]
        report_capacity: Option<usize>,

        /// Skip timestamps, attributes, owner and permissions
        #[arg(long)]
        no_metadata: bool,

        /// Print the resulting tree
        #[arg(long)]
        tree: bool,

        /// Output the summary as JSON for scripting
        #[arg(long)]
        json: bool,
    },

    /// View or reset configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,

        /// Print the config file location
        #[arg(long)]
        path: bool,

        /// Reset to defaults
        #[arg(long)]
        reset: bool,
    },
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    pub fn output_mode(&self) -> OutputMode {
        OutputMode::from_flags(self.quiet, self.verbose)
    }

    pub fn run(self) -> anyhow::Result<()> {
        let mode = self.output_mode();
        match self.command {
            Commands::Analyze {
                path,
                output,
                ui_capacity,
                report_capacity,
                no_metadata,
                tree,
                json,
            } => {
                let mut config = Config::load();
                config.apply_cli_overrides(ui_capacity, report_capacity, no_metadata);
                run_analyze(&config, AnalyzeArgs { path, output, tree, json }, mode)
            }
            Commands::Config { show, path, reset } => {
                if reset {
                    let saved = Config::default().save()?;
                    println!("{} Configuration reset: {}", "OK".green(), saved.display());
                    return Ok(());
                }
                if path {
                    println!("{}", Config::config_path()?.display());
                    return Ok(());
                }
                if show || mode != OutputMode::Quiet {
                    print!("{}", Config::load().to_toml()?);
                }
                Ok(())
            }
        }
    }
}

struct AnalyzeArgs {
    path: PathBuf,
    output: Option<PathBuf>,
    tree: bool,
    json: bool,
}

fn run_analyze(config: &Config, args: AnalyzeArgs, mode: OutputMode) -> anyhow::Result<()> {
    let root = args
        .path
        .canonicalize()
        .with_context(|| format!("Cannot analyze {}", args.path.display()))?;
    let root = crate::path_util::display_path(&root);

    let report_path = args
        .output
        .unwrap_or_else(|| config.report.report_path(chrono::Local::now()));
    if let Some(parent) = report_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create report directory: {}", parent.display()))?;
    }

    let view = Arc::new(Mutex::new(ViewTree::new()));
    let spinner = (mode != OutputMode::Quiet && !args.json).then(|| {
        let pb = progress::create_spinner(&format!("Analyzing {}", root));
        if let Ok(mut tree) = view.lock() {
            progress::follow_view(&mut tree, pb.clone());
        }
        pb
    });

    let analysis = Analysis::from_config(&root, config)
        .with_view(Arc::clone(&view))
        .with_report_file(&report_path)
        .with_context(|| format!("Failed to create report {}", report_path.display()))?;

    // Ctrl-C stops the crawl at the next directory; the summary still prints.
    let cancel = analysis.cancel_token();
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupt received, stopping...");
        cancel.cancel();
    })
    .context("Failed to set signal handler")?;

    let result = analysis.start().context("Failed to start analysis")?.wait();

    if let Some(pb) = &spinner {
        progress::finish_and_clear(pb);
    }
    let summary = result.with_context(|| format!("Analysis of {} failed", root))?;

    if args.json {
        output::print_json(&summary)?;
    } else {
        output::print_summary(&summary, mode);
    }
    if args.tree {
        let tree = view.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        output::print_tree(&tree);
    }
    if let Some(err) = &summary.report_error {
        tracing::warn!(error = %err, "report is incomplete");
    }
    Ok(())
}
