use std::sync::Arc;

use metrics::counter;
use minefield_board::Board;
use tracing::{debug, error, info, warn};

use crate::commands::{
    self, parse_board_request, Command, ListScope, HELP_TEXT, MAX_LISTED, NEW_GAME_TEXT,
    SOURCE_TEXT,
};
use crate::coordinator::{MoveCoordinator, MoveOutcome, MoveTarget};
use crate::events::{InboundEvent, TapPayload};
use crate::registry::{RegistryError, SessionRegistry};
use crate::render::{keyboard, RenderScheduler};
use crate::reward::RewardEngine;
use crate::session::{Fingerprint, Session};
use crate::transport::{ChatRef, ChatTransport, DeliveryError, MessageId, UserRef};

/// Default cap on sessions one creator may have running.
pub const MAX_GAMES_PER_USER: usize = 10;

/// Entry point for every inbound event.
pub struct GameService {
    registry: SessionRegistry,
    coordinator: MoveCoordinator,
    rewards: Arc<RewardEngine>,
    transport: Arc<dyn ChatTransport>,
    max_games_per_user: usize,
}

impl GameService {
    pub fn new(
        registry: SessionRegistry,
        renderer: RenderScheduler,
        rewards: Arc<RewardEngine>,
        transport: Arc<dyn ChatTransport>,
        max_games_per_user: usize,
    ) -> Self {
        let coordinator = MoveCoordinator::new(
            registry.clone(),
            renderer,
            Arc::clone(&rewards),
            Arc::clone(&transport),
        );
        Self {
            registry,
            coordinator,
            rewards,
            transport,
            max_games_per_user,
        }
    }

    pub fn coordinator(&self) -> &MoveCoordinator {
        &self.coordinator
    }

    pub async fn handle(&self, event: InboundEvent) {
        counter!("minefield_events_total", 1, "kind" => event.kind());
        match event {
            InboundEvent::Command {
                chat,
                from,
                message_id,
                name,
                args,
            } => match Command::parse(&name, &args) {
                Some(command) => {
                    info!(command = command.name(), user_id = from.id, chat_id = chat.id, "command");
                    self.run_command(command, &chat, &from, message_id).await;
                }
                None => debug!(command = %name, "unknown command"),
            },
            InboundEvent::Tap {
                id,
                chat,
                from,
                message_id,
                data,
            } => self.tap(&id, &chat, &from, message_id, &data).await,
        }
    }

    async fn tap(&self, tap_id: &str, chat: &ChatRef, from: &UserRef, message: MessageId, data: &str) {
        let payload: TapPayload = match data.parse() {
            Ok(payload) => payload,
            Err(err) => {
                info!(user_id = from.id, data, error = %err, "unknown tap payload");
                self.answer(tap_id, None).await;
                return;
            }
        };
        let outcome = self
            .coordinator
            .apply_move(
                payload.fingerprint,
                from,
                (payload.row, payload.col),
                payload.token,
                MoveTarget {
                    chat: chat.id,
                    message,
                },
            )
            .await;
        debug!(user_id = from.id, session = %payload.fingerprint, ?outcome, "tap handled");
        match outcome {
            MoveOutcome::Restricted { remaining_secs } => {
                let alert = format!("You can sweep again in {remaining_secs} seconds");
                self.answer(tap_id, Some(&alert)).await;
            }
            _ => self.answer(tap_id, None).await,
        }
    }

    async fn answer(&self, tap_id: &str, alert: Option<&str>) {
        if let Err(err) = self.transport.answer_tap(tap_id, alert).await {
            log_delivery_failure("answer tap", &err);
        }
    }

    async fn reply(&self, chat: &ChatRef, reply_to: MessageId, text: &str) {
        if let Err(err) = self
            .transport
            .send_message(chat.id, text, None, Some(reply_to))
            .await
        {
            log_delivery_failure("reply", &err);
        }
    }

    async fn run_command(&self, command: Command, chat: &ChatRef, from: &UserRef, message: MessageId) {
        match command {
            Command::NewGame(args) => {
                self.new_game(&args, chat, from, message).await;
            }
            Command::List(scope) => {
                let text = self.list_games(scope, chat);
                self.reply(chat, message, &text).await;
            }
            Command::Status => {
                let text = format!("Games in progress: {}", self.registry.count());
                self.reply(chat, message, &text).await;
            }
            Command::Stats => {
                let profile = self.rewards.profile(from.id);
                let text = commands::stats_text(
                    profile.games,
                    profile.deaths,
                    profile.wins,
                    profile.cards,
                );
                self.reply(chat, message, &text).await;
            }
            Command::Help => self.reply(chat, message, HELP_TEXT).await,
            Command::Source => self.reply(chat, message, SOURCE_TEXT).await,
        }
    }

    /// Creates a session and posts its keyboard. Returns the new session id.
    pub async fn new_game(
        &self,
        args: &[String],
        chat: &ChatRef,
        from: &UserRef,
        message: MessageId,
    ) -> Option<Fingerprint> {
        if self.rewards.restriction(from.id).is_some() {
            self.reply(chat, message, "Blown up that many times and still want more?")
                .await;
            return None;
        }
        if self.registry.iter_by_creator(from.id).count() >= self.max_games_per_user {
            let text = format!(
                "You already have {} games running.\nFinish one of them first.",
                self.max_games_per_user
            );
            self.reply(chat, message, &text).await;
            return None;
        }
        let request = match parse_board_request(args) {
            Ok(request) => request,
            Err(err) => {
                self.reply(chat, message, err.message()).await;
                return None;
            }
        };
        if request.width_clamped {
            self.reply(chat, message, "That is too wide, the width is now 8")
                .await;
        }
        let board = match Board::random(request.height, request.width, request.mines) {
            Ok(board) => board,
            Err(err) => {
                self.reply(chat, message, &err.to_string()).await;
                return None;
            }
        };
        let fingerprint = Fingerprint(board.fingerprint());
        let session = match self
            .registry
            .create(board, fingerprint, chat.clone(), from.clone())
        {
            Ok(session) => session,
            Err(RegistryError::DuplicateSession(id)) => {
                warn!(session = %id, "fingerprint collision");
                return None;
            }
        };
        let keys = {
            let state = session.lock();
            keyboard(fingerprint, &state.board, session.display_token())
        };

        match self
            .transport
            .send_message(chat.id, NEW_GAME_TEXT, Some(&keys), Some(message))
            .await
        {
            Ok(message_id) => {
                session.set_message_id(message_id);
                info!(session = %fingerprint, chat_id = chat.id, user_id = from.id, "game started");
                Some(fingerprint)
            }
            Err(err) => {
                log_delivery_failure("new game keyboard", &err);
                self.registry.remove(fingerprint);
                None
            }
        }
    }

    /// Markdown listing of running games for `/list`.
    pub fn list_games(&self, scope: ListScope, chat: &ChatRef) -> String {
        if scope == ListScope::Chat && !chat.is_supergroup() {
            return "This only works in supergroups".to_string();
        }
        let sessions: Box<dyn Iterator<Item = Arc<Session>> + '_> = match scope {
            ListScope::Chat => Box::new(self.registry.iter_by_chat(chat.id)),
            ListScope::Public | ListScope::All => Box::new(self.registry.iter_open()),
        };
        let links: Vec<String> = sessions
            .filter(|session| session.group().is_supergroup())
            .filter(|session| scope != ListScope::Public || session.group().username.is_some())
            .filter_map(|session| {
                let message = session.message_id()?;
                let label = commands::listing_label(
                    &session.creator().first_name,
                    session.created_at(),
                );
                commands::message_link(session.group(), message, &label)
            })
            .take(MAX_LISTED)
            .collect();
        if !links.is_empty() {
            return links.join("\n");
        }
        match scope {
            ListScope::Chat => {
                "No games running in this chat\nTry /list open or /list all".to_string()
            }
            ListScope::Public | ListScope::All => "No matching games found".to_string(),
        }
    }
}

fn log_delivery_failure(what: &str, err: &DeliveryError) {
    counter!("minefield_delivery_failures_total", 1, "kind" => err.metric_label());
    if err.is_transient() {
        debug!(error = %err, "{what} failed");
    } else {
        error!(error = %err, "{what} failed");
    }
}
