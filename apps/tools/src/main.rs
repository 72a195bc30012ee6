use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use shared::domain::{ChatId, UserId};
use storage::Storage;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://./data/server.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Unread notifications addressed to a user.
    Pending {
        #[arg(long)]
        user: String,
    },
    /// The conversation between two participants, if any.
    Conversation {
        #[arg(long)]
        a: String,
        #[arg(long)]
        b: String,
    },
    /// Newest messages of a conversation, oldest first.
    History {
        #[arg(long)]
        chat: i64,
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
    /// Rebuild a conversation's last-message summary from its newest message.
    RepairSummary {
        #[arg(long)]
        chat: i64,
    },
    MarkRead {
        #[arg(long)]
        user: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url)
        .await
        .with_context(|| format!("failed to open database '{}'", cli.database_url))?;

    match cli.command {
        Command::Pending { user } => {
            let pending = storage.find_pending(&UserId::new(user)).await?;
            print_json(&pending)?;
        }
        Command::Conversation { a, b } => {
            let conversation = storage
                .find_by_participants(&UserId::new(a), &UserId::new(b))
                .await?;
            match conversation {
                Some(conversation) => print_json(&conversation)?,
                None => println!("no conversation"),
            }
        }
        Command::History { chat, limit } => {
            let messages = storage
                .list_conversation_messages(ChatId(chat), limit.clamp(1, 500), None)
                .await?;
            print_json(&messages)?;
        }
        Command::RepairSummary { chat } => {
            match storage.recompute_last_message(ChatId(chat)).await? {
                Some(conversation) => print_json(&conversation)?,
                None => println!("conversation {chat} not found"),
            }
        }
        Command::MarkRead { user } => {
            let updated = storage.mark_notifications_read(&UserId::new(user)).await?;
            println!("marked {updated} notifications read");
        }
    }

    Ok(())
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
