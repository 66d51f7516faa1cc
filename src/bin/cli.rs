//! Relay Agent CLI
//!
//! Runs tasks against a recorded screen trace and writes a benchmark summary.
//! Run with: cargo run --bin relay-agent -- --trace trace.json --task "..."

use std::env;
use std::fs;
use std::future::Future;
use std::io::{self, BufRead, Write};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use relay_agent::benchmark::{BenchmarkSummary, TaskReport};
use relay_agent::device::{ReplayDevice, SnapshotVerifier};
use relay_agent::model::{
    ModelActionPlanner, ModelClient, ModelCompletionVerifier, ModelStrategicPlanner,
};
use relay_agent::{Agent, AppSettings, Collaborators, TaskEvent, TaskOutcome};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Default)]
struct CliArgs {
    trace: Option<String>,
    tasks: Vec<String>,
    tasks_file: Option<String>,
    output: Option<String>,
}

fn print_usage() {
    println!("Usage: relay-agent --trace <file.json> [--task <text>] [--tasks <file>] [--output <results.json>]");
    println!();
    println!("Without --task or --tasks, tasks are read interactively from stdin.");
}

fn parse_args(args: &[String]) -> anyhow::Result<Option<CliArgs>> {
    let mut parsed = CliArgs::default();
    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        let mut value = |name: &str| {
            iter.next()
                .cloned()
                .with_context(|| format!("{} expects a value", name))
        };
        match arg.as_str() {
            "--trace" => parsed.trace = Some(value("--trace")?),
            "--task" => parsed.tasks.push(value("--task")?),
            "--tasks" => parsed.tasks_file = Some(value("--tasks")?),
            "--output" | "-o" => parsed.output = Some(value("--output")?),
            "--help" | "-h" => return Ok(None),
            other => bail!("Unknown argument: {}", other),
        }
    }
    Ok(Some(parsed))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (ignore errors if file doesn't exist)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("relay_agent=info")),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    let Some(cli) = parse_args(&args)? else {
        print_usage();
        return Ok(());
    };
    let Some(trace) = cli.trace.as_deref() else {
        print_usage();
        bail!("--trace is required");
    };

    let mut settings = AppSettings::load();
    settings.apply_env();

    let device = Arc::new(
        ReplayDevice::from_path(trace).with_context(|| format!("Loading trace {}", trace))?,
    );
    let fast = ModelClient::new(settings.action_model());
    let strategic = ModelClient::new(settings.planner_model());
    let parts = Collaborators {
        screen: device.clone(),
        executor: device.clone(),
        verifier: Arc::new(SnapshotVerifier::new()),
        completion: Arc::new(ModelCompletionVerifier::new(fast.clone())),
        action_planner: Arc::new(ModelActionPlanner::new(fast)),
        strategic_planner: Arc::new(ModelStrategicPlanner::new(strategic)),
    };
    let agent = Agent::new(settings.orchestrator(), parts);

    println!("Relay Agent");
    println!("================================================");
    println!("Action model: {} @ {}", settings.model_name, settings.base_url);
    println!("Planner model: {}", settings.planner_model_name);
    println!("Trace: {} ({} frames)", trace, device.frame_count());
    println!("Max iterations: {}", agent.config().max_iterations);
    println!("================================================\n");

    let mut tasks = cli.tasks.clone();
    if let Some(path) = &cli.tasks_file {
        let content =
            fs::read_to_string(path).with_context(|| format!("Reading tasks from {}", path))?;
        tasks.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(String::from),
        );
    }

    let mut reports = Vec::new();
    if tasks.is_empty() {
        println!("Interactive mode. Type your task and press Enter.");
        println!("Type 'quit' or 'exit' to exit.\n");
        let stdin = io::stdin();
        loop {
            print!("Task: ");
            io::stdout().flush()?;
            let mut line = String::new();
            if stdin.lock().read_line(&mut line)? == 0 {
                break;
            }
            let task = line.trim();
            if task.is_empty() {
                continue;
            }
            if task == "quit" || task == "exit" {
                break;
            }
            device.rewind();
            let outcome = run_one(&agent, task).await?;
            reports.push(TaskReport::from(&outcome));
        }
    } else {
        for task in &tasks {
            device.rewind();
            let outcome = run_one(&agent, task).await?;
            reports.push(TaskReport::from(&outcome));
        }
    }

    let summary = BenchmarkSummary::new(settings.model_name.clone(), reports);
    println!(
        "\nPassed {}/{} ({:.1}%) in {:.1}s",
        summary.passed, summary.total_tasks, summary.success_rate, summary.total_time_s
    );
    if let Some(path) = &cli.output {
        summary
            .write_to(path)
            .with_context(|| format!("Writing results to {}", path))?;
        println!("Results written to {}", path);
    }

    Ok(())
}

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Poll `finished` every `tick` until it holds. Returns `true` as soon as
/// `signal` resolves first. The signal future lives across ticks.
async fn signalled_before_finish<S: Future>(
    mut signal: Pin<&mut S>,
    finished: impl Fn() -> bool,
    tick: Duration,
) -> bool {
    while !finished() {
        tokio::select! {
            _ = signal.as_mut() => return true,
            _ = tokio::time::sleep(tick) => {}
        }
    }
    false
}

/// Run one task, printing its events; Ctrl-C stops it at the next iteration.
async fn run_one(agent: &Agent, task: &str) -> anyhow::Result<TaskOutcome> {
    println!("Task: {}\n", task);
    let mut handle = agent.start_task(task);
    let mut events = handle.events();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(record) => print_event(&record.event),
                Err(RecvError::Lagged(n)) => println!("  ... {} events skipped", n),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    if signalled_before_finish(ctrl_c.as_mut(), || handle.is_finished(), POLL_INTERVAL).await {
        println!("Stopping...");
        let _ = handle.stop().await;
    }
    let outcome = handle.wait().await?;
    let _ = printer.await;

    println!("\n{} after {} iterations: {}\n", outcome.status, outcome.iterations, outcome.message);
    Ok(outcome)
}

fn print_event(event: &TaskEvent) {
    match event {
        TaskEvent::Iteration { iteration, elements } => {
            println!("[{}] screen with {} elements", iteration, elements)
        }
        TaskEvent::PlanReceived { summary, .. } => println!("    plan: {}", summary),
        TaskEvent::StepDispatched { step, attempt, .. } if *attempt > 1 => {
            println!("    retry: {}", step.label())
        }
        TaskEvent::StepDispatched { step, .. } => println!("    step: {}", step.label()),
        TaskEvent::Failure {
            record,
            failures_since_last_plan,
        } => println!("    failure ({}): {}", failures_since_last_plan, record.diagnosis),
        TaskEvent::Diagnostic { message, .. } => println!("    note: {}", message),
        TaskEvent::PlanningDispatched { trigger, .. } => println!("    planning: {}", trigger),
        TaskEvent::RecoveryDeferred {
            failures_since_last_plan,
            ..
        } => println!("    recovery deferred ({} failures)", failures_since_last_plan),
        TaskEvent::PlanAdopted { strategy, .. } => println!("    adopted strategy: {}", strategy),
        TaskEvent::PlanDiscarded { trigger, reason, .. } => {
            println!("    discarded {} plan: {}", trigger, reason)
        }
        TaskEvent::CompletionRejected { reason, .. } => {
            println!("    completion rejected: {}", reason)
        }
        TaskEvent::Started { .. } | TaskEvent::Finished { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("relay-agent")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_parse_args() {
        let cli = parse_args(&args(&["--trace", "t.json", "--task", "a", "--task", "b", "-o", "r.json"]))
            .unwrap()
            .unwrap();
        assert_eq!(cli.trace.as_deref(), Some("t.json"));
        assert_eq!(cli.tasks, vec!["a", "b"]);
        assert_eq!(cli.output.as_deref(), Some("r.json"));
    }

    #[tokio::test]
    async fn test_signal_between_ticks_is_not_lost() {
        // The signal resolves well after the first tick has elapsed.
        let signal = tokio::time::sleep(Duration::from_millis(50));
        tokio::pin!(signal);
        let stopped =
            signalled_before_finish(signal.as_mut(), || false, Duration::from_millis(5)).await;
        assert!(stopped);
    }

    #[tokio::test]
    async fn test_finish_without_signal() {
        let polls = std::cell::Cell::new(0);
        let signal = std::future::pending::<()>();
        tokio::pin!(signal);
        let finished = || {
            polls.set(polls.get() + 1);
            polls.get() > 3
        };
        let stopped =
            signalled_before_finish(signal.as_mut(), finished, Duration::from_millis(1)).await;
        assert!(!stopped);
        assert_eq!(polls.get(), 4);
    }

    #[test]
    fn test_parse_args_errors() {
        assert!(parse_args(&args(&["--trace"])).is_err());
        assert!(parse_args(&args(&["--bogus"])).is_err());
        assert!(parse_args(&args(&["--help"])).unwrap().is_none());
    }
}
