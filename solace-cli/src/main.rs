//! solace-cli — terminal client for the Solace dispatch server
//!
//! # Subcommands
//! - `chat [--session <id>]`               — interactive conversation
//! - `send <text> [--session <id>] [--json]` — send one message, print the reply
//! - `history <id> [--json]`               — print a session transcript
//! - `end <id>`                            — end a session
//! - `greet <id>`                          — ask whether a greeting is due
//! - `status`                              — show server health

use std::io::{BufRead, Write};

use clap::{Parser, Subcommand};
use serde::Deserialize;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8787";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "solace-cli", version, about = "Solace — terminal chat client")]
struct Cli {
    /// Solace HTTP server URL (overrides SOLACE_HTTP_URL env var)
    #[arg(long, env = "SOLACE_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start an interactive conversation
    Chat {
        /// Continue this session instead of the active one
        #[arg(long)]
        session: Option<String>,
    },

    /// Send one message and print the reply
    Send {
        text: String,

        /// Target session (defaults to the active one)
        #[arg(long)]
        session: Option<String>,

        /// Print the raw JSON response
        #[arg(long)]
        json: bool,
    },

    /// Print the messages of a session
    History {
        session: String,

        #[arg(long)]
        json: bool,
    },

    /// End a session
    End { session: String },

    /// Check whether the UI should greet in a session
    Greet { session: String },

    /// Show Solace server status
    Status,
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SessionResponse {
    pub id: String,
    pub created_at: String,
    pub ended_at: Option<String>,
    pub crisis_flag: bool,
}

#[derive(Debug, Deserialize)]
pub struct MessageResponse {
    pub id: String,
    pub sender: String,
    pub created_at: String,
    pub text: String,
    pub safety_flag: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SendResponse {
    pub message: MessageResponse,
    pub suggested_topic: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryResponse {
    pub session_id: String,
    pub messages: Vec<MessageResponse>,
    pub count: usize,
}

// ============================================================================
// Formatting
// ============================================================================

/// One transcript line: `[HH:MM] you: text`, with a marker on flagged messages.
pub fn format_message(m: &MessageResponse) -> String {
    let who = match m.sender.as_str() {
        "user" => "you",
        _ => "solace",
    };
    // RFC 3339 timestamps carry the clock time at offset 11..16
    let clock = m.created_at.get(11..16).unwrap_or("--:--");
    let marker = match m.safety_flag.as_deref() {
        Some(_) => " [!]",
        None => "",
    };
    format!("[{}] {}{}: {}", clock, who, marker, m.text)
}

pub fn format_topic(topic: &str) -> String {
    format!("(suggested: {})", topic.replace('_', " "))
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

struct Api {
    server: String,
    client: reqwest::blocking::Client,
}

impl Api {
    fn new(server: &str) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()?;
        Ok(Self {
            server: server.to_string(),
            client,
        })
    }

    fn get(&self, path: &str) -> anyhow::Result<serde_json::Value> {
        let url = format!("{}{}", self.server, path);
        let resp = self
            .client
            .get(&url)
            .send()
            .map_err(|e| anyhow::anyhow!("connection failed to {}: {}", url, e))?;
        Self::read(resp)
    }

    fn post(&self, path: &str, body: Option<serde_json::Value>) -> anyhow::Result<serde_json::Value> {
        let url = format!("{}{}", self.server, path);
        let req = self.client.post(&url);
        let req = match body {
            Some(b) => req.json(&b),
            None => req,
        };
        let resp = req
            .send()
            .map_err(|e| anyhow::anyhow!("connection failed to {}: {}", url, e))?;
        Self::read(resp)
    }

    fn read(resp: reqwest::blocking::Response) -> anyhow::Result<serde_json::Value> {
        let status = resp.status();
        let body: serde_json::Value = resp.json().unwrap_or_default();
        if !status.is_success() {
            anyhow::bail!(
                "server returned {}: {}",
                status,
                body["error"].as_str().unwrap_or("no details")
            );
        }
        Ok(body)
    }

    fn resolve_session(&self, session: Option<String>) -> anyhow::Result<String> {
        match session {
            Some(id) => Ok(id),
            None => {
                let session: SessionResponse = serde_json::from_value(self.get("/sessions/active")?)?;
                Ok(session.id)
            }
        }
    }

    fn send(&self, session: &str, text: &str) -> anyhow::Result<serde_json::Value> {
        self.post(
            &format!("/sessions/{}/messages", session),
            Some(serde_json::json!({ "text": text })),
        )
    }
}

fn print_reply(body: serde_json::Value) -> anyhow::Result<()> {
    let reply: SendResponse = serde_json::from_value(body)?;
    println!("{}", format_message(&reply.message));
    if let Some(topic) = reply.suggested_topic {
        println!("{}", format_topic(&topic));
    }
    Ok(())
}

fn do_chat(api: &Api, session: Option<String>) -> anyhow::Result<()> {
    let session = api.resolve_session(session)?;
    let greet = api.get(&format!("/sessions/{}/greet", session))?;
    if greet["should_greet"].as_bool().unwrap_or(false) {
        println!("Hi, I'm Solace. How are you feeling right now?");
    }
    println!("(session {} — type /quit to leave, /end to close the session)", session);

    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let text = line.trim();
        match text {
            "" => continue,
            "/quit" => break,
            "/end" => {
                api.post(&format!("/sessions/{}/end", session), None)?;
                println!("Session ended. Take care.");
                break;
            }
            _ => match api.send(&session, text) {
                Ok(body) => print_reply(body)?,
                Err(e) => eprintln!("solace-cli: {}", e),
            },
        }
    }
    Ok(())
}

fn do_send(api: &Api, text: &str, session: Option<String>, json: bool) -> anyhow::Result<()> {
    let session = api.resolve_session(session)?;
    let body = api.send(&session, text)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }
    print_reply(body)
}

fn do_history(api: &Api, session: &str, json: bool) -> anyhow::Result<()> {
    let body = api.get(&format!("/sessions/{}/messages", session))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }
    let history: HistoryResponse = serde_json::from_value(body)?;
    if history.count == 0 {
        eprintln!("No messages in session {}", history.session_id);
        return Ok(());
    }
    for m in &history.messages {
        println!("{}", format_message(m));
    }
    Ok(())
}

fn do_end(api: &Api, session: &str) -> anyhow::Result<()> {
    let session: SessionResponse =
        serde_json::from_value(api.post(&format!("/sessions/{}/end", session), None)?)?;
    println!("Session:  {}", session.id);
    println!("Started:  {}", session.created_at);
    println!("Ended:    {}", session.ended_at.as_deref().unwrap_or("?"));
    if session.crisis_flag {
        println!("Crisis:   flagged");
    }
    Ok(())
}

fn do_greet(api: &Api, session: &str) -> anyhow::Result<()> {
    let body = api.get(&format!("/sessions/{}/greet", session))?;
    println!("{}", body["should_greet"].as_bool().unwrap_or(false));
    Ok(())
}

/// Show the server status by calling GET /health.
fn do_status(api: &Api) -> anyhow::Result<()> {
    let body = api.get("/health")?;
    println!("Solace server: {}", body["status"].as_str().unwrap_or("unknown"));
    println!("Version:       {}", body["version"].as_str().unwrap_or("?"));
    println!("Store:         {}", body["store"].as_str().unwrap_or("?"));
    println!("Backend:       {}", body["backend"].as_str().unwrap_or("?"));
    if let Some(pg) = body["postgresql"].as_str() {
        println!("PostgreSQL:    {}", pg);
    }
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();

    let result = Api::new(&server).and_then(|api| match cli.command {
        Commands::Chat { session } => do_chat(&api, session),
        Commands::Send { text, session, json } => do_send(&api, &text, session, json),
        Commands::History { session, json } => do_history(&api, &session, json),
        Commands::End { session } => do_end(&api, &session),
        Commands::Greet { session } => do_greet(&api, &session),
        Commands::Status => do_status(&api),
    });

    if let Err(e) = result {
        eprintln!("solace-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_message(sender: &str, flag: Option<&str>) -> MessageResponse {
        MessageResponse {
            id: "7b5c24ab-1234-5678-9abc-def012345678".to_string(),
            sender: sender.to_string(),
            created_at: "2026-02-23T10:04:05.123456Z".to_string(),
            text: "hello".to_string(),
            safety_flag: flag.map(str::to_string),
        }
    }

    #[test]
    fn test_format_user_message() {
        let line = format_message(&mock_message("user", None));
        assert_eq!(line, "[10:04] you: hello");
    }

    #[test]
    fn test_format_flagged_assistant_message() {
        let line = format_message(&mock_message("assistant", Some("crisis_detected")));
        assert_eq!(line, "[10:04] solace [!]: hello");
    }

    #[test]
    fn test_format_short_timestamp_graceful() {
        let mut m = mock_message("user", None);
        m.created_at = "bad".to_string();
        assert!(format_message(&m).starts_with("[--:--]"));
    }

    #[test]
    fn test_format_topic() {
        assert_eq!(format_topic("sleep_story"), "(suggested: sleep story)");
    }

    #[test]
    fn test_send_response_parses_server_shape() {
        let body = serde_json::json!({
            "message": {
                "id": "7b5c24ab-1234-5678-9abc-def012345678",
                "session_id": "aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee",
                "sender": "assistant",
                "created_at": "2026-02-23T10:04:05Z",
                "text": "Let's breathe.",
                "safety_flag": null
            },
            "suggested_topic": "breathing"
        });
        let parsed: SendResponse = serde_json::from_value(body).expect("should parse");
        assert_eq!(parsed.message.text, "Let's breathe.");
        assert_eq!(parsed.suggested_topic.as_deref(), Some("breathing"));
    }

    #[test]
    fn test_history_response_parses_empty() {
        let body = serde_json::json!({
            "session_id": "aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee",
            "messages": [],
            "count": 0
        });
        let parsed: HistoryResponse = serde_json::from_value(body).expect("should parse");
        assert_eq!(parsed.count, 0);
        assert!(parsed.messages.is_empty());
    }
}
