mod common;

use common::{harness, harness_with, supergroup, user, Harness};
use minefield_server::commands::NEW_GAME_TEXT;
use minefield_server::events::InboundEvent;
use minefield_server::players::PlayerStore;
use minefield_server::registry::RegistryConfig;
use minefield_server::transport::{ChatKind, ChatRef, DeliveryError};

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn private_chat() -> ChatRef {
    ChatRef {
        id: 5,
        kind: ChatKind::Private,
        username: None,
    }
}

async fn command(h: &Harness, chat: ChatRef, name: &str, list: &[&str]) -> String {
    h.service
        .handle(InboundEvent::Command {
            chat,
            from: user(5, "ada"),
            message_id: 40,
            name: name.to_string(),
            args: args(list),
        })
        .await;
    h.transport.sent().pop().expect("no reply was sent").text
}

#[test_timeout::tokio_timeout_test]
async fn default_game_posts_a_full_keyboard() {
    let h = harness();
    let id = h
        .service
        .new_game(&[], &supergroup(), &user(5, "ada"), 40)
        .await
        .unwrap();

    let sent = h.transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].text, NEW_GAME_TEXT);
    assert_eq!(sent[0].reply_to, Some(40));
    let keys = sent[0].keyboard.as_ref().unwrap();
    assert_eq!(keys.len(), 8);
    assert!(keys.iter().all(|row| row.len() == 8));
    assert!(keys[0][0].callback_data.starts_with(&format!("{id} 0 0 ")));

    let session = h.registry.get(id).unwrap();
    assert_eq!(session.message_id(), Some(sent[0].message_id));
    assert_eq!(session.creator().id, 5);
}

#[test_timeout::tokio_timeout_test]
async fn wide_boards_are_clamped_with_a_notice() {
    let h = harness();
    h.service
        .new_game(&args(&["5", "12", "4"]), &supergroup(), &user(5, "ada"), 40)
        .await
        .unwrap();

    let sent = h.transport.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].text, "That is too wide, the width is now 8");
    let keys = sent[1].keyboard.as_ref().unwrap();
    assert_eq!(keys.len(), 5);
    assert_eq!(keys[0].len(), 8);
}

#[test_timeout::tokio_timeout_test]
async fn bad_board_requests_create_nothing() {
    let h = harness();
    let chat = supergroup();
    let ada = user(5, "ada");

    let refused = h.service.new_game(&args(&["13", "8", "10"]), &chat, &ada, 40).await;
    assert!(refused.is_none());
    assert_eq!(
        h.transport.sent().pop().unwrap().text,
        "A board cannot have more than 100 cells"
    );

    let overfull = h.service.new_game(&args(&["3", "3", "9"]), &chat, &ada, 41).await;
    assert!(overfull.is_none());
    let reply = h.transport.sent().pop().unwrap();
    assert_eq!(reply.reply_to, Some(41));
    assert!(reply.keyboard.is_none());

    assert_eq!(h.registry.count(), 0);
}

#[test_timeout::tokio_timeout_test]
async fn failed_keyboard_delivery_drops_the_session() {
    let h = harness();
    h.transport
        .fail_next_send(DeliveryError::Other("chat not found".into()));
    let id = h
        .service
        .new_game(&[], &supergroup(), &user(5, "ada"), 40)
        .await;
    assert!(id.is_none());
    assert_eq!(h.registry.count(), 0);
}

#[test_timeout::tokio_timeout_test]
async fn creators_are_capped() {
    let h = harness_with(RegistryConfig::default(), 2);
    let (chat, ada) = (supergroup(), user(5, "ada"));
    assert!(h.service.new_game(&[], &chat, &ada, 1).await.is_some());
    assert!(h.service.new_game(&[], &chat, &ada, 2).await.is_some());
    assert!(h.service.new_game(&[], &chat, &ada, 3).await.is_none());
    assert_eq!(
        h.transport.sent().pop().unwrap().text,
        "You already have 2 games running.\nFinish one of them first."
    );
    assert!(h.service.new_game(&[], &chat, &user(6, "bob"), 4).await.is_some());
    assert_eq!(h.registry.count(), 3);
}

#[test_timeout::tokio_timeout_test]
async fn restricted_players_cannot_start_games() {
    let h = harness();
    let until = h.clock.now() + chrono::Duration::seconds(30);
    h.players
        .update(5, &mut |profile| profile.restricted_until = Some(until))
        .unwrap();

    let id = h.service.new_game(&[], &supergroup(), &user(5, "ada"), 40).await;
    assert!(id.is_none());
    assert_eq!(
        h.transport.sent().pop().unwrap().text,
        "Blown up that many times and still want more?"
    );
}

#[test_timeout::tokio_timeout_test]
async fn listing_games() {
    let h = harness();
    assert_eq!(
        command(&h, private_chat(), "list", &[]).await,
        "This only works in supergroups"
    );
    assert_eq!(
        command(&h, supergroup(), "list", &[]).await,
        "No games running in this chat\nTry /list open or /list all"
    );

    command(&h, supergroup(), "mine", &[]).await;
    let keyboard_message = h.transport.sent().pop().unwrap().message_id;

    let listing = command(&h, supergroup(), "/list@minebot", &[]).await;
    assert!(listing.starts_with("[ada created on "));
    assert!(listing.ends_with(&format!("](https://t.me/c/1234567890/{keyboard_message})")));

    assert_eq!(
        command(&h, private_chat(), "list", &["open"]).await,
        "No matching games found"
    );
    let everywhere = command(&h, private_chat(), "list", &["all"]).await;
    assert!(everywhere.contains("https://t.me/c/1234567890/"));
}

#[test_timeout::tokio_timeout_test]
async fn status_and_stats() {
    let h = harness();
    assert_eq!(
        command(&h, supergroup(), "status", &[]).await,
        "Games in progress: 0"
    );
    command(&h, supergroup(), "mine", &[]).await;
    assert_eq!(
        command(&h, supergroup(), "status", &[]).await,
        "Games in progress: 1"
    );

    h.players
        .update(5, &mut |profile| {
            profile.games = 4;
            profile.deaths = 3;
            profile.wins = 1;
            profile.cards = 7;
        })
        .unwrap();
    assert_eq!(
        command(&h, private_chat(), "stats", &[]).await,
        "Played 4 games, blew up 3 times, won 1\nHolding 7 immunity cards"
    );
}

#[test_timeout::tokio_timeout_test]
async fn unknown_commands_are_ignored() {
    let h = harness();
    h.service
        .handle(InboundEvent::Command {
            chat: supergroup(),
            from: user(5, "ada"),
            message_id: 40,
            name: "reveal".into(),
            args: Vec::new(),
        })
        .await;
    assert!(h.transport.sent().is_empty());
}

#[test_timeout::tokio_timeout_test]
async fn every_tap_is_answered() {
    let h = harness();
    let tap = |id: &str, data: &str| InboundEvent::Tap {
        id: id.to_string(),
        chat: supergroup(),
        from: user(5, "ada"),
        message_id: 1,
        data: data.to_string(),
    };

    h.service.handle(tap("cb-1", "not a payload")).await;
    h.service.handle(tap("cb-2", "42 0 0 0")).await;

    let until = h.clock.now() + chrono::Duration::seconds(30);
    h.players
        .update(5, &mut |profile| profile.restricted_until = Some(until))
        .unwrap();
    h.service.handle(tap("cb-3", "42 0 0 0")).await;

    assert_eq!(
        h.transport.answers(),
        vec![
            ("cb-1".to_string(), None),
            ("cb-2".to_string(), None),
            (
                "cb-3".to_string(),
                Some("You can sweep again in 30 seconds".to_string())
            ),
        ]
    );
}
