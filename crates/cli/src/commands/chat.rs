//! `parley chat`: Interactive or single-message chat mode.
//!
//! Replies stream to stdout as they are generated. Ctrl+C interrupts the
//! reply in progress; pressed while idle it leaves the chat.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use parley_agent::{Agent, TurnOutcome, WarmupOutcome};
use parley_config::AppConfig;
use parley_core::event::AgentEvent;
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio::sync::{Notify, broadcast};

pub struct ChatArgs {
    pub message: Option<String>,
    pub speaker: String,
    pub warmup: bool,
    pub prompt_file: Option<PathBuf>,
}

pub async fn run(args: ChatArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let backend = parley_backends::build_from_config(&config)?;
    let agent = Arc::new(Agent::from_config(&config, backend));

    if let Some(path) = &args.prompt_file {
        if path.exists() {
            let saved = tokio::fs::read_to_string(path).await?;
            agent.reset_prompt(saved)?;
            eprintln!("  Resumed prompt from {}", path.display());
        }
    }

    if args.warmup {
        eprint!("  Warming up...");
        match agent.warmup().await {
            WarmupOutcome::Warmed(response) => eprintln!("\r  ✅ Model ready: {}", response.model),
            WarmupOutcome::Skipped => eprint!("\r                \r"),
            WarmupOutcome::Failed(e) => {
                eprintln!("\r  ⚠️  Warmup failed: {e}");
                eprintln!("     Continuing; the first reply may be slow.");
            }
        }
    }

    let quit = Arc::new(Notify::new());
    spawn_interrupt_handler(agent.clone(), quit.clone());
    let mut events = agent.event_bus().subscribe();

    if let Some(message) = args.message {
        let outcome = stream_turn(&agent, &mut events, &args.speaker, &message).await?;
        save_prompt(&agent, args.prompt_file.as_ref()).await?;
        if outcome.is_cancelled() {
            eprintln!("  [interrupted]");
        }
        return Ok(());
    }

    println!();
    println!("  parley — Interactive Mode");
    println!();
    println!("  Backend:   {}", config.backend.as_str());
    println!("  Model:     {}", config.model);
    println!("  Template:  {}", config.agent.template.as_str());
    println!("  Agent:     {}", agent.identity());
    println!();
    println!("  Type your message and press Enter.");
    println!("  Ctrl+C interrupts a reply; 'exit' or Ctrl+C while idle quits.");
    println!();

    let mut lines = BufReader::new(io::stdin()).lines();
    loop {
        print!("  {} > ", args.speaker);
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = quit.notified() => None,
        };
        let Some(line) = line else { break };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "exit" | "quit" | "/exit" | "/quit" | ":q") {
            break;
        }

        print!("  {} > ", agent.identity());
        std::io::stdout().flush()?;
        match stream_turn(&agent, &mut events, &args.speaker, line).await {
            Ok(outcome) => {
                if outcome.is_cancelled() {
                    println!("  [interrupted]");
                }
            }
            Err(e) => eprintln!("  [Error] {e}"),
        }
        println!();
        save_prompt(&agent, args.prompt_file.as_ref()).await?;
    }

    println!();
    println!("  Goodbye! 👋");
    println!();
    Ok(())
}

/// Submit a turn, printing chunks as they arrive.
async fn stream_turn(
    agent: &Agent,
    events: &mut broadcast::Receiver<Arc<AgentEvent>>,
    speaker: &str,
    message: &str,
) -> parley_core::Result<TurnOutcome> {
    let turn = agent.submit_turn(speaker, message);
    tokio::pin!(turn);

    loop {
        tokio::select! {
            biased;
            Ok(event) = events.recv() => print_chunk(&event),
            outcome = &mut turn => {
                while let Ok(event) = events.try_recv() {
                    print_chunk(&event);
                }
                println!();
                return outcome;
            }
        }
    }
}

fn print_chunk(event: &AgentEvent) {
    if let AgentEvent::Chunk { content, .. } = event {
        print!("{content}");
        let _ = std::io::stdout().flush();
    }
}

fn spawn_interrupt_handler(agent: Arc<Agent>, quit: Arc<Notify>) {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if agent.status().is_processing() {
                agent.interrupt().await;
            } else {
                quit.notify_one();
            }
        }
    });
}

async fn save_prompt(agent: &Agent, path: Option<&PathBuf>) -> std::io::Result<()> {
    match path {
        Some(path) => tokio::fs::write(path, agent.running_prompt()).await,
        None => Ok(()),
    }
}
