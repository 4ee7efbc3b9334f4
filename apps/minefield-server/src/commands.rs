//! Chat commands and the parsing around them.

use chrono::{DateTime, Utc};

use crate::transport::{ChatRef, MessageId};

pub const DEFAULT_HEIGHT: usize = 8;
pub const DEFAULT_WIDTH: usize = 8;
pub const DEFAULT_MINES: usize = 9;
/// Chat keyboards get unwieldy past eight buttons per row.
pub const MAX_WIDTH: usize = 8;
pub const MAX_CELLS: usize = 100;
pub const MAX_LISTED: usize = 10;

pub const NEW_GAME_TEXT: &str = "Step right up and sweep a mine or two!";
pub const HELP_TEXT: &str = "A Minesweeper bot for groups.\n\n/mine starts a new game";
pub const SOURCE_TEXT: &str = "Source code: https://github.com/fossifer/minesweeperbot\n\
Credits to: https://git.jerryxiao.cc/Jerry/tgmsbot and https://github.com/gamescomputersplay/minesweeper-solver";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListScope {
    /// Sessions of the current chat; supergroups only.
    Chat,
    /// Open sessions everywhere, restricted to public groups.
    Public,
    /// Open sessions everywhere.
    All,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    NewGame(Vec<String>),
    List(ListScope),
    Status,
    Stats,
    Help,
    Source,
}

impl Command {
    /// Maps `/name@bot args..` onto a command. Unknown names yield `None`.
    pub fn parse(name: &str, args: &[String]) -> Option<Self> {
        let name = name.trim_start_matches('/');
        let name = name.split('@').next().unwrap_or(name);
        let command = match name.to_ascii_lowercase().as_str() {
            "mine" => Command::NewGame(args.to_vec()),
            "list" => Command::List(match args.first().map(String::as_str) {
                Some("open") => ListScope::Public,
                Some("all") => ListScope::All,
                _ => ListScope::Chat,
            }),
            "status" => Command::Status,
            "stats" => Command::Stats,
            "start" | "help" => Command::Help,
            "source" => Command::Source,
            _ => return None,
        };
        Some(command)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::NewGame(_) => "mine",
            Command::List(_) => "list",
            Command::Status => "status",
            Command::Stats => "stats",
            Command::Help => "help",
            Command::Source => "source",
        }
    }
}

/// Board dimensions requested with `/mine`, plus whether the width was
/// clamped on the way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardRequest {
    pub height: usize,
    pub width: usize,
    pub mines: usize,
    pub width_clamped: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardRequestError {
    TooManyCells,
    WrongArity,
}

impl BoardRequestError {
    pub fn message(self) -> &'static str {
        match self {
            BoardRequestError::TooManyCells => "A board cannot have more than 100 cells",
            BoardRequestError::WrongArity => "Usage: /mine or /mine <height> <width> <mines>",
        }
    }
}

/// Reads `[]` or `[height, width, mines]`. Any unparsable number falls back
/// to the default board as a whole.
pub fn parse_board_request(args: &[String]) -> Result<BoardRequest, BoardRequestError> {
    let (height, width, mines) = match args {
        [] => (DEFAULT_HEIGHT, DEFAULT_WIDTH, DEFAULT_MINES),
        [h, w, m] => match (h.parse::<usize>(), w.parse::<usize>(), m.parse::<usize>()) {
            (Ok(h), Ok(w), Ok(m)) => (h, w, m),
            _ => (DEFAULT_HEIGHT, DEFAULT_WIDTH, DEFAULT_MINES),
        },
        _ => return Err(BoardRequestError::WrongArity),
    };
    let width_clamped = width > MAX_WIDTH;
    let width = width.min(MAX_WIDTH);
    if height.saturating_mul(width) > MAX_CELLS {
        return Err(BoardRequestError::TooManyCells);
    }
    Ok(BoardRequest {
        height,
        width,
        mines,
        width_clamped,
    })
}

/// Markdown link to a message in a supergroup. Private supergroups use the
/// `t.me/c/` form, which needs the chat id without its `-100` prefix.
pub fn message_link(chat: &ChatRef, message: MessageId, text: &str) -> Option<String> {
    if let Some(username) = &chat.username {
        return Some(format!("[{text}](https://t.me/{username}/{message})"));
    }
    let internal = chat.id.checked_neg()?.checked_sub(1_000_000_000_000)?;
    (internal > 0).then(|| format!("[{text}](https://t.me/c/{internal}/{message})"))
}

pub fn listing_label(creator: &str, created_at: DateTime<Utc>) -> String {
    format!(
        "{} created on {}",
        creator.replace(['[', ']'], ""),
        created_at.format("%a %b %e %H:%M:%S %Y")
    )
}

pub fn stats_text(games: u64, deaths: u64, wins: u64, cards: i64) -> String {
    format!("Played {games} games, blew up {deaths} times, won {wins}\nHolding {cards} immunity cards")
}
