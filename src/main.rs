use chrono::Local;
use clap::{Parser, Subcommand};
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;
use voice_portal::{ClientConfig, SessionEventBus, VoiceClient};

// Demo client for the voice-agent portal.
//
// Usage:
//   voice-portal --otp 123456 agents                 # list agents
//   voice-portal --otp 123456 call hospital          # talk to an agent until Ctrl-C
//   voice-portal --config portal.json call realestate --muted

#[derive(Parser, Debug)]
#[command(version, about = "Voice agent portal client")]
struct Cli {
    /// JSON config file; VOICE_PORTAL_* variables override it.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Portal base URL (overrides config).
    #[arg(long)]
    base_url: Option<String>,

    /// Log in with this one-time code before running the command.
    #[arg(long)]
    otp: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the agents available to the current credentials.
    Agents {
        #[arg(long, default_value_t = vpcore::portal::DEFAULT_LIST_LIMIT)]
        limit: u32,
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },
    /// Open a voice session with an agent and keep it up until Ctrl-C.
    Call {
        agent_id: String,
        /// Start with the microphone muted.
        #[arg(long)]
        muted: bool,
    },
    /// Forget the stored token.
    Logout,
}

/// Wall-clock time of day for log lines, in the local timezone.
fn timestamp() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

fn main() {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                timestamp(),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let mut config = match ClientConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load config: {e}");
            std::process::exit(2);
        }
    };
    if let Some(base_url) = cli.base_url.clone() {
        config.base_url = base_url;
    }

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to build tokio runtime: {e}");
            std::process::exit(1);
        }
    };

    let code = rt.block_on(run(cli, config));
    std::process::exit(code);
}

async fn run(cli: Cli, config: ClientConfig) -> i32 {
    let events = Arc::new(SessionEventBus::new());
    let client = VoiceClient::builder(config)
        .with_observer(events.clone())
        .build();

    if let Some(otp) = &cli.otp {
        match client.portal().login_otp(otp).await {
            Ok(token) => info!("Logged in (remaining uses: {:?})", token.remaining_uses),
            Err(e) => {
                error!("OTP login failed: {e}");
                return 1;
            }
        }
    }

    match cli.command {
        Command::Agents { limit, offset } => match client.portal().list_agents(limit, offset).await {
            Ok(list) => {
                for agent in &list.agents {
                    println!("{:<20} {:<30} {}", agent.id, agent.name, agent.description);
                }
                println!(
                    "{} of {} (more: {})",
                    list.agents.len(),
                    list.pagination.total,
                    list.pagination.has_more
                );
                0
            }
            Err(e) => {
                error!("Failed to list agents: {e}");
                1
            }
        },
        Command::Logout => match client.portal().logout().await {
            Ok(()) => 0,
            Err(e) => {
                error!("Logout failed: {e}");
                1
            }
        },
        Command::Call { agent_id, muted } => call(&client, &events, &agent_id, muted).await,
    }
}

async fn call(client: &VoiceClient, events: &SessionEventBus, agent_id: &str, muted: bool) -> i32 {
    let agent = match client.portal().list_agents(50, 0).await {
        Ok(list) => list.agents.into_iter().find(|a| a.id == agent_id),
        Err(e) => {
            error!("Failed to list agents: {e}");
            return 1;
        }
    };
    let Some(agent) = agent else {
        error!("Unknown agent {agent_id}");
        return 1;
    };

    let mut status = events.status.subscribe();
    let mut messages = events.messages.subscribe();

    if muted && let Err(e) = client.set_muted(true).await {
        error!("{}", e.user_message());
    }
    if let Err(e) = client.connect(&agent).await {
        error!("{}", e.user_message());
        client.shutdown().await;
        return 1;
    }

    let code = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break 0,
            Ok(update) = status.recv() => {
                info!("Status: {:?}", update.phase);
                if let Some(err) = &update.error {
                    error!("{err}");
                    break 1;
                }
            }
            Ok(message) = messages.recv() => println!("agent: {message}"),
        }
    };

    client.shutdown().await;
    code
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_timestamp_is_local_time_of_day() {
        let stamp = timestamp();
        let parts: Vec<&str> = stamp.split(':').collect();
        assert_eq!(parts.len(), 3);
        assert!(parts.iter().all(|p| p.len() == 2 && p.parse::<u8>().is_ok()));
    }

    #[test]
    fn test_cli_parses_call_command() {
        let cli = Cli::try_parse_from(["voice-portal", "--otp", "123456", "call", "hospital"]).unwrap();
        assert_eq!(cli.otp.as_deref(), Some("123456"));
        assert!(matches!(cli.command, Command::Call { .. }));
    }
}
