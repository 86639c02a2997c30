use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use polychat::{load_all_bots, Backend, ChatAdapter, Config, Message, StreamMode};
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::io::AsyncBufReadExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "polychat")]
#[command(about = "Chat with OpenAI, Claude, Gemini or a local Ollama model through one interface", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true, value_enum)]
    backend: Option<Backend>,

    #[arg(long, global = true)]
    model: Option<String>,

    #[arg(long, global = true, help = "System instruction sent with every request")]
    system: Option<String>,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Send one message and print the completion")]
    Ask {
        prompt: String,

        #[arg(long, value_name = "FILE", help = "JSON array of tool descriptors")]
        tools: Option<PathBuf>,
    },
    #[command(about = "Send one message and stream the reply")]
    Stream {
        prompt: String,

        #[arg(long, help = "Print the full text so far on each update")]
        cumulative: bool,
    },
    #[command(about = "Interactive conversation on stdin; /exit to quit")]
    Chat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = Config::load().unwrap_or_default();
    config.merge_with_cli(cli.backend, cli.model.clone(), cli.system.clone());

    let bots = load_all_bots(&config)?;
    let mut adapter = bots.adapter(&config);
    info!(backend = %adapter.backend(), model = %adapter.model(), "ready");

    match cli.command {
        Commands::Ask { prompt, tools } => {
            ask_command(&mut adapter, prompt, tools.as_deref()).await?;
        }
        Commands::Stream { prompt, cumulative } => {
            stream_command(&mut adapter, prompt, StreamMode::from_cumulative(cumulative)).await?;
        }
        Commands::Chat => {
            chat_command(&mut adapter).await?;
        }
    }

    Ok(())
}

async fn ask_command(adapter: &mut ChatAdapter, prompt: String, tools: Option<&Path>) -> Result<()> {
    let tools = match tools {
        Some(path) => load_tools(path)?,
        None => Vec::new(),
    };

    let completion = adapter.call(Message::user(prompt), &tools).await?;
    println!("{}", completion.text());

    if completion.has_tool_calls() {
        println!("{}", serde_json::to_string_pretty(&completion.tool_calls)?);
    }

    Ok(())
}

async fn stream_command(adapter: &mut ChatAdapter, prompt: String, mode: StreamMode) -> Result<()> {
    stream_reply(adapter, Message::user(prompt), mode).await?;
    Ok(())
}

async fn chat_command(adapter: &mut ChatAdapter) -> Result<()> {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();

    prompt_marker()?;
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line == "/exit" || line == "/quit" {
            break;
        }
        if !line.is_empty() {
            let reply = stream_reply(adapter, Message::user(line), StreamMode::Delta).await?;
            adapter.push(Message::assistant(reply));
        }
        prompt_marker()?;
    }

    Ok(())
}

/// Streams one reply to stdout and returns the assembled text.
async fn stream_reply(adapter: &mut ChatAdapter, message: Message, mode: StreamMode) -> Result<String> {
    let mut stream = adapter.stream(message, mode);
    let mut stdout = std::io::stdout();
    let mut reply = String::new();

    while let Some(item) = stream.next().await {
        let item = item?;
        match mode {
            StreamMode::Delta => {
                write!(stdout, "{}", item)?;
                stdout.flush()?;
                reply.push_str(&item);
            }
            StreamMode::Cumulative => {
                writeln!(stdout, "{}", item)?;
                reply = item;
            }
        }
    }

    if mode == StreamMode::Delta {
        writeln!(stdout)?;
    }
    Ok(reply)
}

fn prompt_marker() -> Result<()> {
    let mut stdout = std::io::stdout();
    write!(stdout, "> ")?;
    stdout.flush()?;
    Ok(())
}

fn load_tools(path: &Path) -> Result<Vec<Value>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read tools file {}", path.display()))?;
    let tools: Vec<Value> = serde_json::from_str(&content)
        .with_context(|| format!("Tools file {} must hold a JSON array", path.display()))?;
    Ok(tools)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_global_backend_after_subcommand() {
        let cli = Cli::try_parse_from([
            "polychat",
            "stream",
            "hello",
            "--cumulative",
            "--backend",
            "ollama",
            "--model",
            "llama3.2",
        ])
        .unwrap();

        assert_eq!(cli.backend, Some(Backend::Ollama));
        assert_eq!(cli.model.as_deref(), Some("llama3.2"));
        match cli.command {
            Commands::Stream { prompt, cumulative } => {
                assert_eq!(prompt, "hello");
                assert!(cumulative);
            }
            _ => panic!("expected stream command"),
        }
    }

    #[test]
    fn cli_accepts_openai_spelling() {
        let cli = Cli::try_parse_from(["polychat", "--backend", "openai", "chat"]).unwrap();
        assert_eq!(cli.backend, Some(Backend::OpenAi));
    }

    #[test]
    fn tools_file_must_be_array() {
        let mut good = tempfile::NamedTempFile::new().unwrap();
        write!(good, r#"[{{"type": "function", "function": {{"name": "f"}}}}]"#).unwrap();
        assert_eq!(load_tools(good.path()).unwrap().len(), 1);

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        write!(bad, r#"{{"type": "function"}}"#).unwrap();
        assert!(load_tools(bad.path()).is_err());
    }
}
