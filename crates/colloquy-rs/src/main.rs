//! Command-line inspector for Colloquy conversation storage.

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use colloquy_rs::config::{ColloquyConfig, LayeredConfigOptions};
use colloquy_rs::core::{
    CommandState, ConversationStore, FileTemplateProvider, JsonlThreadRegistry, Message, Thread,
    ThreadId, ThreadRegistry,
};
use log::{debug, info};
use std::path::{Path, PathBuf};

/// Command-line options for the inspector.
#[derive(Parser)]
#[command(name = "colloquy", version)]
struct Cli {
    /// Optional path to a colloquy.json5 config file, layered last
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List threads, most recently active first
    Threads,
    /// Print the visible messages of a thread
    Show {
        thread_id: ThreadId,
        /// Include system and function messages
        #[arg(long)]
        all: bool,
    },
    /// Rename a thread
    Rename { thread_id: ThreadId, name: String },
    /// Delete a thread and its message log
    Delete { thread_id: ThreadId },
    /// List prompt templates
    Commands,
}

/// Stores resolved from the effective config.
struct Workspace {
    conversations: ConversationStore,
    registry: JsonlThreadRegistry,
    templates: FileTemplateProvider,
}

impl Workspace {
    fn open(config: &ColloquyConfig, cwd: &Path) -> anyhow::Result<Self> {
        let root = config.storage.resolve_root(cwd);
        debug!("opening workspace (root={})", root.display());
        let conversations = ConversationStore::new(config.storage.conversations_path(&root))
            .context("failed to open conversation store")?;
        let registry = JsonlThreadRegistry::new(config.storage.threads_path(&root))
            .context("failed to open thread registry")?;
        let templates = FileTemplateProvider::new(config.commands.resolve_dir(&root));
        Ok(Self {
            conversations,
            registry,
            templates,
        })
    }
}

fn main() -> anyhow::Result<()> {
    colloquy_rs::init_logging();
    let cli = Cli::parse();
    let cwd = std::env::current_dir().context("failed to resolve current directory")?;

    let mut options = LayeredConfigOptions::new(&cwd);
    if let Some(path) = &cli.config {
        options = options.with_runtime_path(path);
    }
    let layered = ColloquyConfig::load_layered_with_options(options)
        .context("failed to load layered config")?;
    info!("config loaded (layers={})", layered.layers.len());
    let workspace = Workspace::open(&layered.config, &cwd)?;

    match cli.command {
        Command::Threads => {
            for thread in workspace.registry.list_threads()? {
                println!("{}", thread_line(&thread));
            }
        }
        Command::Show { thread_id, all } => {
            let messages = if all {
                workspace.conversations.find_all(thread_id)?
            } else {
                workspace.conversations.find_displayable(thread_id)?
            };
            if messages.is_empty() && workspace.registry.get_thread(thread_id)?.is_none() {
                bail!("unknown thread: {thread_id}");
            }
            for message in &messages {
                println!("{}", message_block(message));
            }
        }
        Command::Rename { thread_id, name } => {
            let Some(thread) = workspace.registry.rename_thread(thread_id, &name)? else {
                bail!("unknown thread: {thread_id}");
            };
            println!("{}", thread_line(&thread));
        }
        Command::Delete { thread_id } => {
            let removed_log = workspace.conversations.delete_thread(thread_id)?;
            let removed_entry = workspace.registry.delete_thread(thread_id)?;
            if !removed_log && !removed_entry {
                bail!("unknown thread: {thread_id}");
            }
            println!("deleted {thread_id}");
        }
        Command::Commands => {
            for command in workspace.templates.list_commands()? {
                let marker = match command.state {
                    CommandState::Enabled => "",
                    CommandState::Disabled => " (disabled)",
                };
                println!(
                    "{}\t{}{}\t{}",
                    command.id, command.name, marker, command.description
                );
            }
        }
    }
    Ok(())
}

fn thread_line(thread: &Thread) -> String {
    let modified = thread
        .modified_at
        .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string());
    format!("{}\t{}\t{}", thread.id, modified, thread.name)
}

fn message_block(message: &Message) -> String {
    let mut block = format!(
        "[{}] {}",
        message.role,
        message.created_at.format("%Y-%m-%d %H:%M:%S")
    );
    if let Some(command_id) = &message.command_id {
        block.push_str(&format!(" /{command_id}"));
    }
    block.push('\n');
    block.push_str(&message.display_content);
    block.push('\n');
    block
}
