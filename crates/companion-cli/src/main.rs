// ============================================================================
// companion-db — CLI database inspection tool for the companion memory engine
// ============================================================================
// Usage:
//   companion-db stats                                Show database statistics
//   companion-db history --companion X --model M --user U   Dump one conversation
//   companion-db rate --user U                        Show a subject's rate window
//   companion-db export --format json                 Export full database as JSON
// ============================================================================

use anyhow::Result;
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use companion_core::{CompanionDb, ConversationKey};
use tracing_subscriber::EnvFilter;

/// Companion memory database inspection tool
#[derive(Parser)]
#[command(
    name = "companion-db",
    version,
    about = "Inspect the companion memory database"
)]
struct Cli {
    /// Path to the database file (default: ~/.companion/companion.redb)
    #[arg(long, global = true)]
    db_path: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show database statistics (conversations, entries, rate subjects)
    Stats,

    /// Dump one conversation's history in chronological order
    History {
        /// Companion name
        #[arg(long)]
        companion: String,

        /// Model name recorded in the conversation key
        #[arg(long, default_value = "gemini-2.5-flash")]
        model: String,

        /// User id
        #[arg(long)]
        user: String,
    },

    /// Show a subject's current rate window
    Rate {
        /// User id
        #[arg(long)]
        user: String,
    },

    /// Export full database contents as JSON
    Export {
        /// Output format (currently only json is supported)
        #[arg(long, default_value = "json")]
        format: String,
    },
}

/// Seed entries carry small sequential scores, live turns carry epoch
/// milliseconds; render each accordingly.
fn format_score(score: i64) -> String {
    if score < 1_000_000_000 {
        format!("seed[{}]", score)
    } else {
        Utc.timestamp_millis_opt(score)
            .single()
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| format!("(invalid: {})", score))
    }
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let db = CompanionDb::open(cli.db_path.as_deref())?;

    match cli.command {
        Commands::Stats => cmd_stats(&db),
        Commands::History {
            companion,
            model,
            user,
        } => cmd_history(&db, &companion, &model, &user),
        Commands::Rate { user } => cmd_rate(&db, &user),
        Commands::Export { format } => cmd_export(&db, &format),
    }
}

fn cmd_stats(db: &CompanionDb) -> Result<()> {
    let stats = db.stats()?;

    println!("=== Companion Memory Database Stats ===");
    println!("Database: {}", db.path().display());
    println!();
    println!("Conversations: {}", stats.total_conversations);
    println!("Entries:       {}", stats.total_entries);
    println!("Rate subjects: {}", stats.rate_subjects);

    if stats.total_conversations > 0 {
        println!();
        println!("{:<48}  {}", "CONVERSATION", "ENTRIES");
        println!("{}", "-".repeat(60));
        for (key, count) in db.conversation_keys()? {
            println!("{:<48}  {}", key, count);
        }
    }

    Ok(())
}

fn cmd_history(db: &CompanionDb, companion: &str, model: &str, user: &str) -> Result<()> {
    let key = ConversationKey::new(companion, model, user);
    let entries = db.history_range(&key.storage_key())?;

    if entries.is_empty() {
        println!("No history for {}", key);
        return Ok(());
    }

    println!("=== {} ===", key);
    for entry in &entries {
        println!("{:<24}  {}", format_score(entry.score), entry.text);
    }
    println!("\nTotal: {} entries", entries.len());

    Ok(())
}

fn cmd_rate(db: &CompanionDb, user: &str) -> Result<()> {
    match db.rate_snapshot(user)? {
        Some(record) => {
            println!("Subject:         {}", user);
            println!("Window id:       {}", record.window_id);
            println!("Current window:  {} requests", record.current);
            println!("Previous window: {} requests", record.previous);
        }
        None => println!("No rate window recorded for {}", user),
    }

    Ok(())
}

fn cmd_export(db: &CompanionDb, format: &str) -> Result<()> {
    if format != "json" {
        anyhow::bail!("Unsupported format '{}'. Only 'json' is supported.", format);
    }

    let stats = db.stats()?;

    let mut conversations = serde_json::Map::new();
    for (key, _) in db.conversation_keys()? {
        let entries = db.history_range(&key)?;
        conversations.insert(key, serde_json::to_value(entries)?);
    }

    let rate_subjects: serde_json::Map<String, serde_json::Value> = db
        .rate_subjects()?
        .into_iter()
        .map(|(subject, record)| Ok((subject, serde_json::to_value(record)?)))
        .collect::<Result<_>>()?;

    let export = serde_json::json!({
        "exported_at": Utc::now().to_rfc3339(),
        "stats": stats,
        "conversations": conversations,
        "rate_subjects": rate_subjects,
    });

    println!("{}", serde_json::to_string_pretty(&export)?);
    Ok(())
}
