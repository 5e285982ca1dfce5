//! Command registry
//!
//! A closed set of command identifiers mapped to scheduler actions.
//! Unknown identifiers are a no-op; nothing is ever looked up by
//! constructing a name from user input. Text extraction (finding the
//! sender and the `!word args` tail in a chat line) happens upstream;
//! elevation is a boolean decided by the embedding configuration.

use crate::request::RequestSource;
use crate::scheduler::SchedulerCommand;
use std::collections::HashSet;
use tokio::sync::mpsc;
use tracing::debug;

/// The closed command set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Play,
    Direct,
    Stop,
    FastForward,
    Rewind,
    Jump,
    Now,
    Next,
    Drop,
    Upvote,
    Downvote,
}

impl Command {
    /// Look up a command identifier. Anything not listed here does not
    /// exist as far as the bot is concerned.
    pub fn from_word(word: &str) -> Option<Self> {
        match word {
            "play" => Some(Command::Play),
            "direct" => Some(Command::Direct),
            "stop" => Some(Command::Stop),
            "ff" => Some(Command::FastForward),
            "rew" => Some(Command::Rewind),
            "jump" => Some(Command::Jump),
            "now" => Some(Command::Now),
            "next" => Some(Command::Next),
            "drop" => Some(Command::Drop),
            "yea" => Some(Command::Upvote),
            "nay" => Some(Command::Downvote),
            _ => None,
        }
    }
}

/// Maps dispatched commands onto scheduler messages
pub struct CommandRouter {
    scheduler: mpsc::Sender<SchedulerCommand>,
    elevated_senders: HashSet<String>,
}

impl CommandRouter {
    pub fn new(
        scheduler: mpsc::Sender<SchedulerCommand>,
        elevated_senders: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            scheduler,
            elevated_senders: elevated_senders
                .into_iter()
                .map(|s| s.to_ascii_lowercase())
                .collect(),
        }
    }

    fn is_elevated(&self, sender: &str) -> bool {
        self.elevated_senders.contains(sender)
    }

    /// Route one command. Malformed arguments make the command a no-op.
    pub async fn dispatch(&self, sender: &str, word: &str, arguments: Option<&str>) {
        let Some(command) = Command::from_word(&word.to_ascii_lowercase()) else {
            debug!("ignoring unknown command '{}'", word);
            return;
        };

        let sender = sender.trim().to_ascii_lowercase();
        let elevated = self.is_elevated(&sender);

        let scheduled = match command {
            Command::Play => parse_play_source(arguments)
                .map(|source| SchedulerCommand::Submit { sender, source }),
            Command::Direct => parse_direct_source(arguments)
                .map(|source| SchedulerCommand::Submit { sender, source }),
            Command::Stop => Some(SchedulerCommand::Stop { sender, elevated }),
            Command::FastForward => parse_seek_secs(arguments, 10).map(|secs| {
                SchedulerCommand::Seek {
                    sender,
                    delta_secs: secs,
                    elevated,
                }
            }),
            Command::Rewind => parse_seek_secs(arguments, 30).map(|secs| {
                SchedulerCommand::Seek {
                    sender,
                    delta_secs: -secs,
                    elevated,
                }
            }),
            Command::Jump => arguments.and_then(parse_jump_target).map(|target_secs| {
                SchedulerCommand::Jump {
                    sender,
                    target_secs,
                    elevated,
                }
            }),
            Command::Now => Some(SchedulerCommand::NowPlaying),
            Command::Next => Some(SchedulerCommand::ListQueue),
            Command::Drop => parse_drop_position(arguments).map(|position| {
                SchedulerCommand::Drop {
                    sender,
                    elevated,
                    position,
                }
            }),
            Command::Upvote => Some(SchedulerCommand::Vote { sender, up: true }),
            Command::Downvote => Some(SchedulerCommand::Vote { sender, up: false }),
        };

        if let Some(command) = scheduled {
            let _ = self.scheduler.send(command).await;
        }
    }
}

/// A play argument is a page URL when it looks like one, search terms
/// otherwise.
fn parse_play_source(arguments: Option<&str>) -> Option<RequestSource> {
    let trimmed = arguments?.trim();
    if trimmed.is_empty() {
        return None;
    }
    if looks_like_url(trimmed) {
        Some(RequestSource::Page(normalize_url(trimmed)))
    } else {
        Some(RequestSource::Search(trimmed.to_string()))
    }
}

fn parse_direct_source(arguments: Option<&str>) -> Option<RequestSource> {
    let trimmed = arguments?.trim();
    if trimmed.is_empty() || !looks_like_url(trimmed) {
        return None;
    }
    Some(RequestSource::Direct(normalize_url(trimmed)))
}

/// `http(s)://...`, or a bare `host.tld/...` reference
fn looks_like_url(text: &str) -> bool {
    if text.starts_with("http://") || text.starts_with("https://") {
        return true;
    }
    for (index, _) in text.match_indices('.') {
        let tail = &text[index + 1..];
        let label_len = tail.chars().take_while(|c| c.is_ascii_alphabetic()).count();
        if (1..=3).contains(&label_len) && tail[label_len..].starts_with('/') {
            return true;
        }
    }
    false
}

/// Lost spaces in pasted URLs were almost certainly `%20`s
fn normalize_url(text: &str) -> String {
    let url = text.replace(' ', "%20");
    if url.contains("://") {
        url
    } else {
        format!("http://{}", url)
    }
}

fn parse_seek_secs(arguments: Option<&str>, default_secs: i64) -> Option<i64> {
    match arguments.map(str::trim).filter(|a| !a.is_empty()) {
        None => Some(default_secs),
        Some(text) => text.parse::<i64>().ok().filter(|secs| *secs > 0),
    }
}

/// Parse `[[hh:]mm:]ss` into absolute seconds, each component 1-2 digits.
/// Hours are 3600 seconds.
fn parse_jump_target(arguments: &str) -> Option<u64> {
    let time = arguments.trim().trim_start_matches(':');
    if time.is_empty() {
        return None;
    }

    let parts: Vec<&str> = time.split(':').collect();
    if parts.len() > 3 {
        return None;
    }
    for part in &parts {
        if part.is_empty() || part.len() > 2 || !part.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
    }

    let mut total = 0u64;
    for (index, part) in parts.iter().rev().enumerate() {
        let value: u64 = part.parse().ok()?;
        let unit = match index {
            0 => 1,
            1 => 60,
            _ => 3_600,
        };
        total += value * unit;
    }
    Some(total)
}

fn parse_drop_position(arguments: Option<&str>) -> Option<Option<usize>> {
    match arguments.map(str::trim).filter(|a| !a.is_empty()) {
        None => Some(None),
        Some(text) => match text.parse::<usize>() {
            Ok(position) if position >= 1 => Some(Some(position)),
            _ => None,
        },
    }
}
