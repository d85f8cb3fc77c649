use std::io::{self, Write};

use anyhow::{Context, Result};
use conduit::config::{DEFAULT_LOG_FILTER, PROFILE_PATH_ENV_VAR};
use conduit::{
    ConfigError, ConnectionOrchestrator, ConnectionProfile, EnvConfig, OrchestratorConfig,
    OrchestratorHandle,
};
use conduit_cli::commands::{parse_input, Input, SlashCommand, HELP_TEXT};
use conduit_cli::render::{Output, Renderer};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let env = EnvConfig::from_env();
    init_tracing(&env.log_filter);

    let path = env
        .profile_path
        .ok_or(ConfigError::MissingEnv(PROFILE_PATH_ENV_VAR))?;
    let profile = ConnectionProfile::load(&path)
        .with_context(|| format!("failed to load profile {}", path.display()))?;
    info!(endpoint = %profile.endpoint, backend = ?profile.backend, "starting chat");

    let (handle, mut events, task) =
        ConnectionOrchestrator::spawn(profile, OrchestratorConfig::default())
            .context("failed to start orchestrator")?;
    handle.connect()?;

    let mut renderer = Renderer::default();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    debug!("stdin closed");
                    break;
                };
                if !dispatch(&handle, &line)? {
                    break;
                }
            }
            event = events.recv() => {
                let Some(event) = event else {
                    break;
                };
                write_outputs(renderer.render(&event))?;
            }
        }
    }

    handle.shutdown();
    let _ = task.await;
    Ok(())
}

fn init_tracing(filter: &str) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

/// Handles one input line. Returns `false` when the session should end.
fn dispatch(handle: &OrchestratorHandle, line: &str) -> Result<bool> {
    let command = match parse_input(line) {
        Input::Empty => return Ok(true),
        Input::Message(content) => {
            handle.send_message(content)?;
            return Ok(true);
        }
        Input::Command(command) => command,
    };

    match command {
        SlashCommand::Help => status(HELP_TEXT)?,
        SlashCommand::Cancel => handle.cancel_generation()?,
        SlashCommand::New => handle.new_conversation()?,
        SlashCommand::Conversation(id) => handle.switch_conversation(id)?,
        SlashCommand::Cwd(path) => handle.set_working_directory(path)?,
        SlashCommand::Allow => answer_permission(handle, true)?,
        SlashCommand::Deny => answer_permission(handle, false)?,
        SlashCommand::Connect => handle.connect()?,
        SlashCommand::Disconnect => handle.disconnect()?,
        SlashCommand::Quit => return Ok(false),
        SlashCommand::MissingArgument(usage) => status(&format!("usage: {usage}"))?,
        SlashCommand::Unknown(name) => status(&format!("unknown command {name}; try /help"))?,
    }
    Ok(true)
}

fn answer_permission(handle: &OrchestratorHandle, granted: bool) -> Result<()> {
    match handle.snapshot().pending_permission {
        Some(request) => handle.respond_permission(request.id, granted)?,
        None => status("no permission request is pending")?,
    }
    Ok(())
}

fn write_outputs(outputs: Vec<Output>) -> io::Result<()> {
    let mut stdout = io::stdout().lock();
    for output in outputs {
        match output {
            Output::Transcript(text) => {
                stdout.write_all(text.as_bytes())?;
                stdout.flush()?;
            }
            Output::Status(line) => status(&line)?,
        }
    }
    Ok(())
}

fn status(line: &str) -> io::Result<()> {
    writeln!(io::stderr().lock(), "{line}")
}
