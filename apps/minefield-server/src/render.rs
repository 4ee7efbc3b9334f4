//! Keyboard rendering with a debounce in front of the rate-limited edit call.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use minefield_board::{Board, Cell};
use tracing::{debug, error};

use crate::clock::{micros, Clock};
use crate::session::{Fingerprint, Session};
use crate::transport::{Button, ChatId, ChatTransport, Keyboard, MessageId};

pub const HIDDEN_CELL: &str = "\u{25a0}";
pub const EMPTY_CELL: &str = "\u{2800}";
pub const FLAGGED_CELL: &str = "\u{1f6a9}";
pub const STEPPED_CELL: &str = "\u{2622}\u{fe0f}";

#[derive(Debug, Clone, Copy)]
pub struct RenderConfig {
    /// Requests closer together than this are deferred.
    pub min_interval: Duration,
    /// How long a deferred render waits before checking whether it is still
    /// the latest one.
    pub delay: Duration,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(500),
            delay: Duration::from_millis(500),
        }
    }
}

fn cell_text(cell: Cell) -> String {
    match cell {
        Cell::Hidden => HIDDEN_CELL.to_string(),
        Cell::Open(0) => EMPTY_CELL.to_string(),
        // Fullwidth digits keep every button the same width.
        Cell::Open(n) => char::from_u32(0xff10 + u32::from(n))
            .map(String::from)
            .unwrap_or_else(|| n.to_string()),
        Cell::Flagged => FLAGGED_CELL.to_string(),
        Cell::Stepped => STEPPED_CELL.to_string(),
    }
}

/// Button grid for `board`. Every button carries
/// `"{fingerprint} {row} {col} {token}"`.
pub fn keyboard(fingerprint: Fingerprint, board: &Board, token: u8) -> Keyboard {
    board
        .grid()
        .chunks(board.width())
        .enumerate()
        .map(|(row, cells)| {
            cells
                .iter()
                .enumerate()
                .map(|(col, &cell)| Button {
                    text: cell_text(cell),
                    callback_data: format!("{fingerprint} {row} {col} {token}"),
                })
                .collect()
        })
        .collect()
}

/// Text shown above the keyboard once the board is in play.
pub fn header(board: &Board) -> String {
    let banner = if board.guess_free() {
        "\u{2705} No guessing needed this round"
    } else {
        "\u{274c} This round needs some guessing"
    };
    let remaining = board.mines().saturating_sub(board.mines_opened());
    format!("{banner} ({STEPPED_CELL} {remaining:02})")
}

/// Collapses bursts of render requests into at most one edit per
/// `min_interval`, always ending on the latest board.
#[derive(Clone)]
pub struct RenderScheduler {
    transport: Arc<dyn ChatTransport>,
    clock: Clock,
    config: RenderConfig,
}

impl RenderScheduler {
    pub fn new(transport: Arc<dyn ChatTransport>, clock: Clock, config: RenderConfig) -> Self {
        Self {
            transport,
            clock,
            config,
        }
    }

    pub async fn request_render(&self, session: &Arc<Session>, chat: ChatId, message: MessageId) {
        let now = self.clock.now_micros();
        let elapsed = now.saturating_sub(session.last_action_token());
        session.set_last_action_token(now);
        if elapsed <= micros(self.config.min_interval) {
            debug!(session = %session.id(), "render deferred");
            counter!("minefield_renders_total", 1, "result" => "deferred");
            let scheduler = self.clone();
            let session = Arc::clone(session);
            tokio::spawn(async move {
                tokio::time::sleep(scheduler.config.delay).await;
                if session.last_action_token() != now {
                    debug!(session = %session.id(), "render superseded");
                    counter!("minefield_renders_total", 1, "result" => "superseded");
                    return;
                }
                scheduler.render(&session, chat, message).await;
            });
        } else {
            self.render(session, chat, message).await;
        }
    }

    async fn render(&self, session: &Session, chat: ChatId, message: MessageId) {
        let (text, keyboard) = {
            let state = session.lock();
            (
                header(&state.board),
                keyboard(session.id(), &state.board, session.display_token()),
            )
        };
        match self
            .transport
            .edit_message(chat, message, &text, &keyboard)
            .await
        {
            Ok(()) => {
                counter!("minefield_renders_total", 1, "result" => "rendered");
            }
            Err(err) if err.is_transient() => {
                let timeouts = session.record_timeout();
                debug!(session = %session.id(), error = %err, timeouts, "render failed");
                counter!("minefield_delivery_failures_total", 1, "kind" => err.metric_label());
            }
            Err(err) => {
                error!(session = %session.id(), error = %err, "render failed");
                counter!("minefield_delivery_failures_total", 1, "kind" => err.metric_label());
            }
        }
    }
}
