use clap::{Parser, Subcommand};

mod commands;
mod util;

use commands::reminders::ReminderCommands;
use util::Caller;

#[derive(Parser)]
#[command(name = "parley", version, about = "Parley CLI: chat, calendar reminders and achievements")]
struct Cli {
    /// API base URL
    #[arg(long, env = "PARLEY_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    /// User identity key sent as x-user-id
    #[arg(long, env = "PARLEY_USER_ID")]
    user_id: Option<String>,

    /// Bearer token for /v1/admin routes
    #[arg(long, env = "PARLEY_ADMIN_TOKEN", hide_env_values = true)]
    admin_token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check API health
    Health,
    /// Send one chat message and print the reply
    Chat {
        /// Message text
        content: String,
    },
    /// Show recent conversation messages, oldest first
    Messages {
        /// Maximum number of messages (1-200)
        #[arg(long)]
        limit: Option<u32>,
    },
    /// List unlocked achievements
    Achievements,
    /// Reminder operations
    Reminders {
        #[command(subcommand)]
        command: ReminderCommands,
    },
    /// Retry enrichment of pending achievements (admin)
    AchievementsRetry,
    /// Operator views (admin)
    Admin {
        #[command(subcommand)]
        command: AdminCommands,
    },
}

#[derive(Subcommand)]
enum AdminCommands {
    /// Every award record of a user, in any status
    UserAchievements {
        /// User identity key
        user_id: String,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let caller = Caller {
        user_id: cli.user_id.as_deref(),
        admin_token: cli.admin_token.as_deref(),
    };
    let api_url = cli.api_url.as_str();

    let code = match cli.command {
        Commands::Health => commands::health::run(api_url).await,
        Commands::Chat { content } => commands::chat::send(api_url, &caller, &content).await,
        Commands::Messages { limit } => commands::chat::messages(api_url, &caller, limit).await,
        Commands::Achievements => commands::achievements::list(api_url, &caller).await,
        Commands::Reminders { command } => commands::reminders::run(api_url, &caller, command).await,
        Commands::AchievementsRetry => commands::achievements::retry(api_url, &caller).await,
        Commands::Admin {
            command: AdminCommands::UserAchievements { user_id },
        } => commands::achievements::for_user(api_url, &caller, &user_id).await,
    };

    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_reminder_run_with_now() {
        let cli = Cli::try_parse_from(["parley", "reminders", "run", "--now", "2025-05-01T13:30:00Z"]).unwrap();
        match cli.command {
            Commands::Reminders {
                command: ReminderCommands::Run { now },
            } => assert_eq!(now.as_deref(), Some("2025-05-01T13:30:00Z")),
            _ => panic!("expected reminders run"),
        }
    }

    #[test]
    fn parses_chat_content_and_user() {
        let cli = Cli::try_parse_from(["parley", "--user-id", "u1", "chat", "2025-05-01 14:00 Standup"]).unwrap();
        assert_eq!(cli.user_id.as_deref(), Some("u1"));
        assert!(matches!(cli.command, Commands::Chat { ref content } if content == "2025-05-01 14:00 Standup"));
    }
}
