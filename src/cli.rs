use clap::{Parser, Subcommand};
use colored::Colorize;
use rustyline::{
    Config as RustyConfig, Editor, error::ReadlineError,
    completion::{Completer, Pair},
    hint::{Hinter, HistoryHinter},
    highlight::{Highlighter, MatchingBracketHighlighter, CmdKind},
    validate::Validator,
    Helper, history::FileHistory
};
use runchat::{config::Config, Message, RunClient};

const BUILTINS: [&str; 6] = ["assistants", "config", "exit", "health", "help", "use"];

#[derive(Parser, Debug)]
#[command(name = "runchat", version, about = "Chat with a thread/run assistant server")]
pub struct Cli {
    /// Server base URL
    #[arg(long)]
    pub api_addr: Option<String>,

    /// Assistant to run messages against
    #[arg(long)]
    pub assistant_id: Option<String>,

    /// Incomplete polls allowed per message (0 = unbounded)
    #[arg(long)]
    pub max_poll_attempts: Option<u32>,

    /// Seconds to wait for a reply before giving up (0 = no deadline)
    #[arg(long)]
    pub poll_timeout_secs: Option<u64>,

    /// Echo request payloads and enable debug logging
    #[arg(long)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send one message and print the reply
    Send {
        #[arg(required = true)]
        message: Vec<String>,
    },
    /// Check that the server is up
    Health,
    /// List assistants known to the server
    Assistants,
}

impl Cli {
    pub fn apply(&self, config: &mut Config) {
        if let Some(addr) = &self.api_addr { config.api_addr = addr.clone(); }
        if let Some(id) = &self.assistant_id { config.assistant_id = id.clone(); }
        if let Some(max) = self.max_poll_attempts { config.max_poll_attempts = max; }
        if let Some(secs) = self.poll_timeout_secs { config.poll_timeout_secs = secs; }
        if self.debug { config.debug = true; }
    }
}

struct RunchatHelper {
    hinter: HistoryHinter,
    bracket_highlighter: MatchingBracketHighlighter,
}

impl Helper for RunchatHelper {}

impl Completer for RunchatHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        // Only the first word is a built-in; everything else is chat text
        let before_cursor = &line[..pos];
        if before_cursor.contains(' ') {
            return Ok((pos, Vec::new()));
        }
        let candidates = BUILTINS
            .iter()
            .filter(|cmd| cmd.starts_with(before_cursor))
            .map(|cmd| Pair {
                display: cmd.to_string(),
                replacement: cmd.to_string(),
            })
            .collect();
        Ok((0, candidates))
    }
}

impl Hinter for RunchatHelper {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, ctx: &rustyline::Context<'_>) -> Option<String> {
        self.hinter.hint(line, pos, ctx)
    }
}

impl Highlighter for RunchatHelper {
    fn highlight_hint<'h>(&self, hint: &'h str) -> std::borrow::Cow<'h, str> {
        std::borrow::Cow::Owned(hint.truecolor(128, 128, 128).to_string())
    }

    fn highlight<'l>(&self, line: &'l str, pos: usize) -> std::borrow::Cow<'l, str> {
        self.bracket_highlighter.highlight(line, pos)
    }

    fn highlight_char(&self, line: &str, pos: usize, forced: CmdKind) -> bool {
        self.bracket_highlighter.highlight_char(line, pos, forced)
    }
}

impl Validator for RunchatHelper {}

/// Picks the first assistant on the server when none is configured.
pub async fn ensure_assistant(config: &mut Config, client: RunClient) -> RunClient {
    if !client.assistant_id().trim().is_empty() {
        return client;
    }
    match client.search_assistants().await {
        Ok(assistants) => match assistants.first() {
            Some(first) => {
                println!(
                    "{}",
                    format!("Using assistant {} ({})", first.assistant_id, first.name())
                        .truecolor(128, 128, 128)
                );
                config.assistant_id = first.assistant_id.clone();
                client.with_assistant(first.assistant_id.clone()).unwrap_or(client)
            }
            None => {
                println!("{}", "No assistants found on the server. Set one with 'use <assistant_id>'.".yellow());
                client
            }
        },
        Err(e) => {
            println!("{}", format!("Could not list assistants: {}", e).red());
            client
        }
    }
}

pub async fn send(config: &Config, client: &RunClient, message: &str) -> runchat::Result<()> {
    if config.debug {
        let pretty_in = serde_json::to_string_pretty(&Message::user(message)).unwrap_or_default();
        println!("{}", format!("[API request]\n{}", pretty_in).truecolor(128, 128, 128));
    }
    let reply = client.submit_message(message).await?;
    if reply.is_empty() {
        println!("{}", "(empty reply)".truecolor(128, 128, 128));
    } else {
        println!("{}", reply.yellow());
    }
    Ok(())
}

pub async fn health(client: &RunClient) -> runchat::Result<()> {
    client.health_check().await?;
    println!("{}", "Server is healthy".green());
    Ok(())
}

pub async fn list_assistants(client: &RunClient) -> runchat::Result<()> {
    let assistants = client.search_assistants().await?;
    if assistants.is_empty() {
        println!("{}", "No assistants found".yellow());
        return Ok(());
    }
    println!("{}", format!("Found {} assistant(s):", assistants.len()).green());
    for (i, assistant) in assistants.iter().enumerate() {
        let marker = if assistant.assistant_id == client.assistant_id() { "*" } else { " " };
        println!("{} {}. {} | {}", marker, i + 1, assistant.assistant_id.cyan(), assistant.name());
    }
    Ok(())
}

fn show_config(config: &Config, client: &RunClient) {
    let policy = client.poll_policy();
    println!("{}", "--- Effective Config ---".yellow());
    println!("api_addr:          {}", config.api_addr);
    println!("api_key:           {}", config.masked_api_key());
    println!("assistant_id:      {}", if client.assistant_id().is_empty() { "(not set)" } else { client.assistant_id() });
    println!("poll interval:     {:?}", policy.interval);
    println!("max poll attempts: {}", policy.max_attempts.map(|n| n.to_string()).unwrap_or_else(|| "unbounded".to_string()));
    println!("poll deadline:     {}", policy.deadline.map(|d| format!("{:?}", d)).unwrap_or_else(|| "none".to_string()));
    println!("debug:             {}", config.debug);
    println!("{}", "--- End of Config ---".yellow());
}

#[derive(Debug, PartialEq, Eq)]
enum PromptLine<'a> {
    Exit,
    Help,
    Health,
    Assistants,
    Config,
    Use(Option<&'a str>),
    Chat(&'a str),
}

/// Classifies a trimmed prompt line. Anything that is not a built-in is chat text.
fn parse_prompt_line(input: &str) -> PromptLine<'_> {
    match input {
        "exit" => PromptLine::Exit,
        "help" => PromptLine::Help,
        "health" => PromptLine::Health,
        "assistants" => PromptLine::Assistants,
        "config" => PromptLine::Config,
        "use" => PromptLine::Use(None),
        input if input.starts_with("use ") => {
            let id = input[4..].trim();
            PromptLine::Use((!id.is_empty()).then_some(id))
        }
        message => PromptLine::Chat(message),
    }
}

pub async fn run_cli(mut config: Config, mut client: RunClient) -> Result<(), Box<dyn std::error::Error>> {
    let rusty_config = RustyConfig::builder()
        .completion_type(rustyline::CompletionType::List)
        .build();

    let mut rl: Editor<RunchatHelper, FileHistory> = Editor::with_config(rusty_config)?;
    rl.set_helper(Some(RunchatHelper {
        hinter: HistoryHinter {},
        bracket_highlighter: MatchingBracketHighlighter::new(),
    }));

    println!(
        "{}",
        format!("runchat v{} -> {} (type 'help' for commands)", env!("CARGO_PKG_VERSION"), config.api_addr).blue()
    );

    loop {
        match rl.readline(&"runchat> ".green()) {
            Ok(line) => {
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                rl.add_history_entry(input)?;
                let outcome = match parse_prompt_line(input) {
                    PromptLine::Exit => break,
                    PromptLine::Help => {
                        println!(
                            "{}",
                            "Workflow:\n\
                            - Type a message and wait for the assistant's reply. Each message runs on a new thread.\n\
                            \n\
                            Available commands:\n\
                            - health: Check that the server is up\n\
                            - assistants: List assistants on the server (* marks the current one)\n\
                            - use <assistant_id>: Send later messages to another assistant\n\
                            - config: Show the effective configuration\n\
                            - exit: Exit the program\n\
                            - help: Show this help message\n"
                                .blue()
                        );
                        Ok(())
                    },
                    PromptLine::Health => health(&client).await,
                    PromptLine::Assistants => list_assistants(&client).await,
                    PromptLine::Config => {
                        show_config(&config, &client);
                        Ok(())
                    },
                    PromptLine::Use(None) => {
                        println!("{}", "Usage: use <assistant_id>".yellow());
                        Ok(())
                    },
                    PromptLine::Use(Some(id)) => {
                        client.with_assistant(id).map(|next| {
                            client = next;
                            config.assistant_id = id.to_string();
                            println!("{}", format!("Now using assistant {}", id).truecolor(128, 128, 128));
                        })
                    },
                    PromptLine::Chat(message) => send(&config, &client, message).await,
                };
                if let Err(e) = outcome {
                    println!("{}", format!("Error: {}", e).red());
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(Box::new(e)),
        }
    }

    println!("{}", "Goodbye!".blue());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let cli = Cli::parse_from([
            "runchat",
            "--api-addr",
            "http://remote:8123",
            "--max-poll-attempts",
            "0",
            "--debug",
            "send",
            "hello",
            "there",
        ]);
        let mut config = Config::default();
        cli.apply(&mut config);

        assert_eq!(config.api_addr, "http://remote:8123");
        assert_eq!(config.max_poll_attempts, 0);
        assert!(config.debug);
        match cli.command {
            Some(Command::Send { message }) => assert_eq!(message.join(" "), "hello there"),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn prompt_builtins_and_chat_text() {
        assert_eq!(parse_prompt_line("exit"), PromptLine::Exit);
        assert_eq!(parse_prompt_line("use"), PromptLine::Use(None));
        assert_eq!(parse_prompt_line("use   "), PromptLine::Use(None));
        assert_eq!(parse_prompt_line("use  agent-2 "), PromptLine::Use(Some("agent-2")));
        assert_eq!(parse_prompt_line("user story please"), PromptLine::Chat("user story please"));
        assert_eq!(parse_prompt_line("health check?"), PromptLine::Chat("health check?"));
    }

    #[test]
    fn no_subcommand_means_interactive() {
        let cli = Cli::parse_from(["runchat"]);
        assert!(cli.command.is_none());
        let mut config = Config::default();
        cli.apply(&mut config);
        assert_eq!(config.api_addr, "http://localhost:2024");
    }
}
