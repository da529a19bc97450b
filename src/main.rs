// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands, DaemonCommands};
use skald_config::Config;
use skald_core::{AgentServices, Orchestrator, Planner, ProgressEvent};
use skald_guard::{
    spawn_authorization, spawn_interactions, AuthorizationSetup, InteractionHandler,
    InteractionKind, InteractionRequest, InteractionResponse,
};
use skald_model::from_config;
use skald_session::Session;
use skald_tools::{builtin, AllowAll, Dispatcher, ToolContext, ToolRegistry};

fn main() {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let runtime = tokio::runtime::Runtime::new().expect("building tokio runtime");
    let result = runtime.block_on(run(cli));
    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = skald_config::load(cli.config.as_deref())?;
    config
        .agent
        .pre_authorized_commands
        .extend(cli.allow_commands.clone());
    config
        .agent
        .pre_authorized_domains
        .extend(cli.allow_domains.clone());
    if cli.plan {
        config.agent.planning_enabled = true;
    }

    match cli.command {
        Some(Commands::Daemon { action }) => daemon_command(config, action).await,
        Some(Commands::Chat { prompt }) => one_shot(config, cli.workdir, prompt.join(" ")).await,
        None if !cli.prompt.is_empty() => {
            one_shot(config, cli.workdir, cli.prompt.join(" ")).await
        }
        None => {
            anyhow::bail!("nothing to do; pass a prompt or a subcommand (see --help)")
        }
    }
}

async fn daemon_command(config: Config, action: DaemonCommands) -> anyhow::Result<()> {
    let socket_path = config
        .daemon
        .socket_path
        .clone()
        .unwrap_or_else(skald_daemon::default_socket_path);
    match action {
        DaemonCommands::Start => skald_daemon::run(config).await,
        DaemonCommands::Status => {
            match read_daemon_pid(&socket_path) {
                Some(pid) => println!("daemon running (pid {pid}) on {}", socket_path.display()),
                None => println!("daemon not running"),
            }
            Ok(())
        }
        DaemonCommands::Stop => {
            let pid = read_daemon_pid(&socket_path).context("daemon not running")?;
            #[cfg(unix)]
            unsafe {
                libc::kill(pid, libc::SIGTERM);
            }
            println!("sent SIGTERM to daemon (pid {pid})");
            Ok(())
        }
    }
}

fn read_daemon_pid(socket_path: &std::path::Path) -> Option<i32> {
    let pid_path = socket_path.parent()?.join("daemon.pid");
    let pid: i32 = std::fs::read_to_string(pid_path).ok()?.trim().parse().ok()?;
    #[cfg(unix)]
    {
        (unsafe { libc::kill(pid, 0) } == 0).then_some(pid)
    }
    #[cfg(not(unix))]
    {
        Some(pid)
    }
}

/// Run one prompt against the configured model and print the stream.
async fn one_shot(config: Config, workdir: Option<PathBuf>, prompt: String) -> anyhow::Result<()> {
    anyhow::ensure!(!prompt.trim().is_empty(), "empty prompt");
    let working_dir = match workdir {
        Some(w) => w,
        None => std::env::current_dir()?,
    };

    let model = from_config(&config.model)?;
    let judge = match &config.judge_model {
        Some(cfg) => Some(from_config(cfg)?),
        None => None,
    };

    let mut registry = ToolRegistry::new();
    builtin::register_standard_tools(
        &mut registry,
        Duration::from_secs(config.agent.shell_timeout_secs),
    );

    let interactions = spawn_interactions(Arc::new(TerminalInteractionHandler));
    let authorizer = spawn_authorization(AuthorizationSetup {
        workspace_dir: working_dir.join(".skald"),
        workspace: skald_config::WorkspaceConfig::load(&working_dir.join(".skald"))
            .unwrap_or_default(),
        cli_commands: config.agent.pre_authorized_commands.clone(),
        cli_domains: config.agent.pre_authorized_domains.clone(),
        judge: judge.clone(),
        interactions: Some(interactions.clone()),
    });

    let session = Arc::new(tokio::sync::Mutex::new(Session::new(&working_dir)));
    let ctx = ToolContext {
        working_dir: working_dir.clone(),
        session,
        authorizer: Arc::new(authorizer),
        // Domain blocking needs the daemon's blocker actor; one-shot runs
        // rely on per-domain authorization alone.
        domains: Arc::new(AllowAll),
    };

    let (progress_tx, mut progress_rx) = tokio::sync::mpsc::channel(256);
    let printer = tokio::spawn(async move {
        while let Some(event) = progress_rx.recv().await {
            match event {
                ProgressEvent::AssistantMessage { content, .. } => {
                    println!("{content}");
                }
                ProgressEvent::ToolCallStarted {
                    tool_name, args, ..
                } => {
                    eprintln!("→ {tool_name} {args}");
                }
                ProgressEvent::ToolCallFinished {
                    tool_name,
                    is_error,
                    ..
                } => {
                    eprintln!("← {tool_name}{}", if is_error { " (error)" } else { "" });
                }
                ProgressEvent::Terminated { reason } => {
                    eprintln!("[{reason}]");
                }
                _ => {}
            }
        }
    });

    let prompt = if config.agent.planning_enabled {
        let planner = Planner::new(Arc::clone(&model), Some(interactions.clone()));
        match planner.plan(&prompt).await {
            Ok(Some(plan)) => format!("{prompt}\n\nPlan:\n{plan}"),
            _ => prompt,
        }
    } else {
        prompt
    };

    let services = AgentServices {
        model,
        judge,
        dispatcher: Dispatcher::new(Arc::new(registry), config.agent.tool_parallelism),
        progress: progress_tx,
    };
    let system_prompt = format!(
        "You are skald, an AI coding agent working in {}.\n\
         Use the available tools to inspect and modify the project. Read a file \
         before editing it. Prefer small, verifiable steps, and report what you \
         did when you finish.",
        working_dir.display()
    );
    let mut orchestrator = Orchestrator::new(services, config.agent.clone(), system_prompt);

    // Ctrl-C cancels the turn.
    let (cancel_tx, mut cancel_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cancel_tx.send(());
        }
    });

    let result = orchestrator.run_prompt(&ctx, &prompt, &mut cancel_rx).await;
    drop(orchestrator);
    let _ = printer.await;

    interactions.stop(Duration::from_secs(2)).await;
    match result.reason {
        skald_core::TerminationReason::Done => Ok(()),
        reason => anyhow::bail!("turn ended with {reason}"),
    }
}

/// Interaction handler for one-shot CLI runs: plain stdin/stdout prompts.
struct TerminalInteractionHandler;

#[async_trait::async_trait]
impl InteractionHandler for TerminalInteractionHandler {
    async fn handle(&self, req: &InteractionRequest) -> anyhow::Result<InteractionResponse> {
        let question = match req.kind {
            InteractionKind::Authorization => format!(
                "Allow {}? [y/N] ",
                req.payload["description"].as_str().unwrap_or("operation")
            ),
            _ => format!(
                "{}\n> ",
                req.payload["question"].as_str().unwrap_or("input required")
            ),
        };
        let kind = req.kind;
        let answer = tokio::task::spawn_blocking(move || {
            let mut stdout = std::io::stdout();
            let _ = write!(stdout, "{question}");
            let _ = stdout.flush();
            let mut line = String::new();
            std::io::stdin().read_line(&mut line).map(|_| line)
        })
        .await??;
        let answer = answer.trim().to_string();
        Ok(match kind {
            InteractionKind::Authorization => {
                InteractionResponse::approved(answer.eq_ignore_ascii_case("y"))
            }
            _ => InteractionResponse::answered(answer),
        })
    }
}
