//! graft CLI - Command-line interface for graft-core
//!
//! ARCHITECTURE: Thin I/O layer over the engine library. This binary
//! handles argument parsing (clap), JSON on stdin/stdout, process exit
//! codes, and logging init. The engine is stateless between invocations;
//! an external orchestrator owns plan-level rollback.

use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use graft_core::{
    build_graph, execute_single_step, parse_plan, supported_languages, verify_plan, ExecOptions,
    Graph, StepReport,
};

/// graft - CST-level source transformation engine for code-editing agents
///
/// Each subcommand reads JSON from its argument (a path, inline JSON, or
/// '-' for stdin) and writes JSON to stdout. Exit code 0 = success,
/// 1 = error with details on stdout.
#[derive(Parser, Debug)]
#[command(name = "graft")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "EXAMPLES:\n  \
    graft build-graph src/a.py src/b.py          Build the structural graph\n  \
    graft verify-plan plan.json graph.json       Pre-check a plan, no writes\n  \
    graft execute-step step.json                 Apply one step with rollback\n  \
    echo '{...}' | graft execute-step -          Read the step from stdin\n  \
    graft locate locator.json                    Resolve a locator, read-only\n  \
    graft languages                              List supported languages")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the structural graph (symbols, imports, line kinds) for files
    #[command(name = "build-graph")]
    BuildGraph {
        /// Source files to summarize
        #[arg(value_name = "PATH", required = true)]
        paths: Vec<PathBuf>,
    },

    /// Statically verify a plan against a graph; writes nothing
    #[command(name = "verify-plan")]
    VerifyPlan {
        /// Plan JSON (path, inline JSON, or '-' for stdin)
        plan: String,
        /// Graph JSON produced by build-graph (path or inline JSON)
        graph: String,
    },

    /// Execute one plan step with per-file rollback on failure
    #[command(name = "execute-step")]
    ExecuteStep {
        /// Step JSON (path, inline JSON, or '-' for stdin)
        step: String,
        /// Disable the advisory verification levels (referential,
        /// import closure, triviality)
        #[arg(long)]
        no_advisory: bool,
    },

    /// Resolve a locator and print node metadata (read-only)
    Locate {
        /// Locator JSON (path, inline JSON, or '-' for stdin)
        locator: String,
    },

    /// Resolve a locator to a unique byte region (read-only)
    #[command(name = "locate-region")]
    LocateRegion {
        /// Locator JSON (path, inline JSON, or '-' for stdin)
        locator: String,
    },

    /// List supported languages and their file extensions
    Languages,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let code = match run(args.command) {
        Ok(code) => code,
        Err(error) => {
            // Errors are data: JSON on stdout, exit 1
            println!("{}", json!({ "success": false, "error": error.to_string() }));
            1
        }
    };
    std::process::exit(code);
}

fn run(command: Command) -> Result<i32> {
    match command {
        Command::BuildGraph { paths } => {
            let graph = build_graph(&paths);
            print_json(&serde_json::to_value(&graph)?)?;
            Ok(0)
        }
        Command::VerifyPlan { plan, graph } => {
            let plan_json = read_json_input(&plan).context("reading plan")?;
            let graph_json = read_json_input(&graph).context("reading graph")?;
            let graph: Graph =
                serde_json::from_value(graph_json).context("graph does not match schema")?;

            let report = match parse_plan(&plan_json) {
                Ok(parsed) => verify_plan(&parsed, &graph),
                Err(error) => {
                    let mut report = graft_core::VerifyReport::default();
                    report.error("structural", None, error.to_string());
                    report.finish()
                }
            };
            print_json(&serde_json::to_value(&report)?)?;
            Ok(0)
        }
        Command::ExecuteStep { step, no_advisory } => {
            let step_json = read_json_input(&step).context("reading step")?;
            let report = execute_single_step(
                &step_json,
                ExecOptions {
                    advisory: !no_advisory,
                },
            );
            print_report(&report)
        }
        Command::Locate { locator } => {
            let locator_json = read_json_input(&locator).context("reading locator")?;
            let report = graft_core::run_primitive(
                "locate",
                &json!({ "locator": locator_json }),
                ExecOptions::default(),
            );
            print_report(&report)
        }
        Command::LocateRegion { locator } => {
            let locator_json = read_json_input(&locator).context("reading locator")?;
            let report = graft_core::run_primitive(
                "locate_region",
                &json!({ "locator": locator_json }),
                ExecOptions::default(),
            );
            print_report(&report)
        }
        Command::Languages => {
            let languages: Vec<Value> = supported_languages()
                .iter()
                .map(|language| {
                    json!({
                        "name": language.name(),
                        "extensions": language.extensions(),
                    })
                })
                .collect();
            print_json(&json!({ "languages": languages }))?;
            Ok(0)
        }
    }
}

/// Read JSON from '-' (stdin), inline text, or a file path
fn read_json_input(source: &str) -> Result<Value> {
    let text = if source == "-" {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("reading stdin")?;
        buffer
    } else if source.trim_start().starts_with(['{', '[']) {
        source.to_string()
    } else {
        std::fs::read_to_string(source).with_context(|| format!("reading '{source}'"))?
    };
    serde_json::from_str(&text).with_context(|| "invalid JSON input".to_string())
}

/// Read-only results print their payload; failures print the report
fn print_report(report: &StepReport) -> Result<i32> {
    if report.success {
        match &report.result {
            Some(result) => {
                // Surface warnings alongside the payload
                let mut value = result.clone();
                if !report.warnings.is_empty() {
                    if let Some(map) = value.as_object_mut() {
                        map.insert("warnings".to_string(), json!(report.warnings));
                    }
                }
                print_json(&value)?;
            }
            None => print_json(&serde_json::to_value(report)?)?,
        }
        Ok(0)
    } else {
        print_json(&serde_json::to_value(report)?)?;
        Ok(1)
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
