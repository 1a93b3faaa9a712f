//! Line-oriented chat REPL hosting one or more client instances ("tabs").
//!
//! Every tab is a full [`ModelSession`]; all of them share one
//! [`BroadcastHub`], so tabs on the same model mirror each other.

use std::sync::Arc;

use client::{BroadcastHub, ChatBackend, CredentialSource, ModelSession, SessionEvent};
use futures_util::future::select_all;
use proto::{ChatError, Message, ModelName};
use reqwest::Url;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

/// Builds new tabs wired to the same backend, credential, and hub.
pub struct SessionFactory {
    pub backend: Arc<dyn ChatBackend>,
    pub credential: Arc<dyn CredentialSource>,
    pub hub: BroadcastHub,
    pub ws_url: Url,
}

impl SessionFactory {
    fn open(&self) -> ModelSession {
        ModelSession::new(
            self.backend.clone(),
            self.credential.clone(),
            self.hub.clone(),
            self.ws_url.clone(),
        )
    }
}

/// One parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Model(String),
    Models,
    TabNew,
    TabFocus(usize),
    History,
    Status,
    Help,
    Quit,
    /// Anything that is not a command is submitted as a prompt.
    Say(String),
    Unknown(String),
}

impl ReplCommand {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        let Some(command) = trimmed.strip_prefix('/') else {
            return Self::Say(line.to_string());
        };
        let mut parts = command.split_whitespace();
        let head = parts.next().unwrap_or_default();
        let arg = parts.next();
        match (head, arg) {
            ("model", Some(name)) => Self::Model(name.to_string()),
            ("models", None) => Self::Models,
            ("tab", Some("new")) => Self::TabNew,
            ("tab", Some(n)) => match n.parse::<usize>() {
                Ok(n) if n >= 1 => Self::TabFocus(n),
                _ => Self::Unknown(trimmed.to_string()),
            },
            ("history", None) => Self::History,
            ("status", None) => Self::Status,
            ("help", None) => Self::Help,
            ("quit" | "exit", None) => Self::Quit,
            _ => Self::Unknown(trimmed.to_string()),
        }
    }
}

const HELP: &str = "\
/model NAME   switch the focused tab to NAME
/models       list selectable models
/tab new      open a tab on the focused tab's model
/tab N        focus tab N
/history      print the focused tab's conversation
/status       show model, channel, and usage of the focused tab
/quit         exit";

enum Input {
    Line(Option<String>),
    Event(usize, SessionEvent),
}

pub struct Repl {
    factory: SessionFactory,
    tabs: Vec<ModelSession>,
    focus: usize,
}

impl Repl {
    /// Opens `tabs` instances on `model`.
    pub async fn start(factory: SessionFactory, model: ModelName, tabs: usize) -> Self {
        let mut repl = Self {
            factory,
            tabs: Vec::new(),
            focus: 0,
        };
        for _ in 0..tabs {
            repl.open_tab(model.clone()).await;
        }
        repl.focus = 0;
        repl
    }

    async fn open_tab(&mut self, model: ModelName) {
        let mut session = self.factory.open();
        session.select_model(model).await;
        self.tabs.push(session);
        self.focus = self.tabs.len() - 1;
        self.report_notices(self.focus);
        let tab = &self.tabs[self.focus];
        println!(
            "[{}] {} ({} messages, {})",
            self.focus + 1,
            tab.active_model().map(ModelName::as_str).unwrap_or("-"),
            tab.messages().len(),
            tab.gate().summary()
        );
    }

    /// Reads stdin and dispatches tab events until `/quit` or EOF.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        println!("Type a prompt, or /help for commands.");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            let input = {
                let events = select_all(self.tabs.iter_mut().enumerate().map(|(i, tab)| {
                    Box::pin(async move { (i, tab.next_event().await) })
                }));
                tokio::select! {
                    line = lines.next_line() => Input::Line(line?),
                    ((i, event), _, _) = events => Input::Event(i, event),
                }
            };

            match input {
                Input::Line(None) => break,
                Input::Line(Some(line)) => {
                    if !self.handle_line(&line).await {
                        break;
                    }
                }
                Input::Event(i, event) => self.print_event(i, event),
            }
        }

        for tab in &mut self.tabs {
            tab.shutdown();
        }
        Ok(())
    }

    /// Returns `false` when the REPL should exit.
    async fn handle_line(&mut self, line: &str) -> bool {
        let command = ReplCommand::parse(line);
        debug!(?command, tab = self.focus + 1, "REPL input");
        match command {
            ReplCommand::Quit => return false,
            ReplCommand::Help => println!("{HELP}"),
            ReplCommand::Unknown(text) => println!("unknown command: {text} (try /help)"),
            ReplCommand::Model(name) => {
                let focus = self.focus;
                let tab = &mut self.tabs[focus];
                if tab.select_model(ModelName::new(name.clone())).await {
                    self.report_notices(focus);
                    let tab = &self.tabs[focus];
                    println!(
                        "[{}] switched to {name} ({} messages)",
                        focus + 1,
                        tab.messages().len()
                    );
                } else {
                    println!("[{}] already on {name}", focus + 1);
                }
            }
            ReplCommand::Models => match self.tabs[self.focus].models().await {
                Ok(models) => {
                    for model in models {
                        println!("  {model}");
                    }
                }
                Err(e) => println!("could not list models: {e}"),
            },
            ReplCommand::TabNew => {
                let model = self.tabs[self.focus]
                    .active_model()
                    .cloned()
                    .unwrap_or_else(|| ModelName::new("default"));
                self.open_tab(model).await;
            }
            ReplCommand::TabFocus(n) => {
                if n <= self.tabs.len() {
                    self.focus = n - 1;
                    println!("focused tab {n}");
                } else {
                    println!("no tab {n}; {} open", self.tabs.len());
                }
            }
            ReplCommand::History => {
                for message in self.tabs[self.focus].messages() {
                    println!("  {}", format_message(message));
                }
            }
            ReplCommand::Status => {
                let tab = &self.tabs[self.focus];
                println!(
                    "[{}] model={} channel={:?} waiting={} usage: {}",
                    self.focus + 1,
                    tab.active_model().map(ModelName::as_str).unwrap_or("-"),
                    tab.channel_state(),
                    tab.is_waiting(),
                    tab.gate().summary()
                );
            }
            ReplCommand::Say(text) => {
                let focus = self.focus;
                if let Err(e) = self.tabs[focus].send(text) {
                    let tab = &self.tabs[focus];
                    println!("[{}] {}", focus + 1, describe_failure(&e, tab.input()));
                }
            }
        }
        true
    }

    fn print_event(&self, tab: usize, event: SessionEvent) {
        let n = tab + 1;
        match event {
            SessionEvent::Connected(model) => println!("[{n}] connected to {model}"),
            SessionEvent::Disconnected { model, reason } => {
                println!("[{n}] disconnected from {model}: {reason}")
            }
            SessionEvent::Committed(message) => println!("[{n}] {}", format_message(&message)),
            SessionEvent::Synced(message) => {
                println!("[{n}] (synced) {}", format_message(&message))
            }
            SessionEvent::RolledBack(e) => {
                println!("[{n}] {}", describe_failure(&e, self.tabs[tab].input()));
            }
            SessionEvent::Discarded => {}
        }
    }

    fn report_notices(&mut self, tab: usize) {
        for notice in self.tabs[tab].take_notices() {
            println!("[{}] ! {notice} [{}]", tab + 1, notice.kind());
        }
    }
}

/// One status line for a failed submission; rollbacks mention the
/// restored input.
fn describe_failure(error: &ChatError, input: &str) -> String {
    if error.rolled_back() {
        format!("! {error} [{}]; input restored: {input:?}", error.kind())
    } else {
        format!("! {error} [{}]", error.kind())
    }
}

fn format_message(message: &Message) -> String {
    format!(
        "{} {}: {}",
        message.created_at.format("%H:%M"),
        message.role,
        message.content
    )
}
