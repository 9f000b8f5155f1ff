//! Chat command frontend: thin text formatting over the storage layer.
//!
//! Failures surface as plain-language replies, never a debug dump. Batch
//! watch/unwatch commands report success and failure subsets distinctly.

use crate::db::{self, DbError, Pool};
use crate::feed::FeedService;
use anyhow::Result;
use std::collections::BTreeSet;
use teloxide::prelude::*;
use tracing::{info, instrument, warn};

const START_MESSAGE: &str =
    "Let's get started, use the /help command to learn more about how to use my features...";

const HELP_MESSAGE: &str = "Need help? 🤖

I'm a bot for snooping on your favourite Twitter accounts.

Want to receive a Telegram message when your favourite Twitter account tweets something new? I can do that for you!

See a list of my commands below:

/help - shows you this help message
/watch - watch specific Twitter accounts
/watching - show a list of Twitter handles being watched
/unwatch - stop watching a Twitter account
/latest - gets the latest tweet for the given account

Add me to a group chat to see the updates right there. Since I only respond to commands, I don't need admin privileges.";

#[instrument(skip_all)]
pub async fn handle_update(
    bot: &Bot,
    pool: &Pool,
    feed: &dyn FeedService,
    msg: &Message,
) -> Result<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let Some((command, args)) = parse_command(text) else {
        return Ok(());
    };
    let chat_id = msg.chat.id.0.to_string();

    let reply = match command.as_str() {
        "/start" => START_MESSAGE.to_string(),
        "/help" => HELP_MESSAGE.to_string(),
        "/watch" => watch_command(pool, &chat_id, &normalize_handles(&args)).await,
        "/unwatch" => unwatch_command(pool, &chat_id, &normalize_handles(&args)).await,
        "/watching" => watching_command(pool, &chat_id).await,
        "/latest" => latest_command(feed, &args).await,
        _ => return Ok(()),
    };

    let _ = bot.send_message(msg.chat.id, reply).await;
    Ok(())
}

/// Split a message into a slash command and its arguments. Strips the
/// `@botname` suffix used in group chats. Returns None for non-commands.
fn parse_command(text: &str) -> Option<(String, Vec<String>)> {
    let trimmed = text.trim();
    if !trimmed.starts_with('/') {
        return None;
    }
    let mut parts = trimmed.split_whitespace();
    let first = parts.next()?;
    let command = first.split('@').next().unwrap_or(first).to_string();
    let args = parts.map(str::to_string).collect();
    Some((command, args))
}

/// Canonical handle form: lowercase, no leading '@', deduplicated, sorted.
fn normalize_handles(args: &[String]) -> Vec<String> {
    let set: BTreeSet<String> = args
        .iter()
        .map(|arg| arg.trim_start_matches('@').to_lowercase())
        .filter(|h| !h.is_empty())
        .collect();
    set.into_iter().collect()
}

async fn watch_command(pool: &Pool, chat_id: &str, handles: &[String]) -> String {
    if handles.is_empty() {
        return "Ensure your command follows the pattern:\n\n/watch @twitterhandle\n\nYou can also add multiple Twitter handles separated by a space.".to_string();
    }

    let mut watched = Vec::new();
    let mut failed = Vec::new();
    for handle in handles {
        match db::create_watch_relationship(pool, handle, chat_id).await {
            // Already watching still reads as success to the user.
            Ok(()) | Err(DbError::AlreadyWatching { .. }) => watched.push(handle.clone()),
            Err(err) => {
                warn!(?err, handle, chat_id, "watch failed");
                failed.push(handle.clone());
            }
        }
    }
    info!(chat_id, watched = watched.len(), failed = failed.len(), "watch command");
    build_watch_reply(&watched, &failed)
}

fn build_watch_reply(watched: &[String], failed: &[String]) -> String {
    if watched.len() + failed.len() == 1 {
        return if failed.is_empty() {
            format!("You are now snooping on @{} 👀", watched[0])
        } else {
            format!(
                "Something has gone wrong on our end, we can't seem to snoop on @{} at the moment.",
                failed[0]
            )
        };
    }

    let mut message = String::new();
    if !watched.is_empty() {
        message.push_str("You are now snooping on the following Twitter handles:\n\n");
        message.push_str(&bullet_list(watched));
    }
    if !failed.is_empty() {
        if !message.is_empty() {
            message.push_str("\n\n");
        }
        message.push_str("We've been unable to watch the following handles:\n\n");
        message.push_str(&bullet_list(failed));
    }
    message
}

async fn unwatch_command(pool: &Pool, chat_id: &str, handles: &[String]) -> String {
    if handles.is_empty() {
        return "Ensure your command follows the pattern:\n\n/unwatch @twitterhandle\n\nYou can also add multiple Twitter handles separated by a space.".to_string();
    }

    let currently_watched = match db::fetch_watcher(pool, chat_id).await {
        Ok(watcher) => watcher
            .handles
            .into_iter()
            .map(|h| h.name)
            .collect::<Vec<_>>(),
        Err(DbError::WatcherNotFound(_)) => Vec::new(),
        Err(err) => {
            warn!(?err, chat_id, "failed to load watch list");
            return "There has been an issue determining your watch list, please try again later 😔".to_string();
        }
    };

    let unwatch_all = handles.len() == 1 && handles[0] == "all";
    let targets: Vec<String> = if unwatch_all {
        currently_watched.clone()
    } else {
        handles.to_vec()
    };

    let mut dropped = Vec::new();
    let mut missing = Vec::new();
    for handle in &targets {
        if !currently_watched.contains(handle) {
            missing.push(handle.clone());
            continue;
        }
        match db::delete_watch_relationship(pool, handle, chat_id).await {
            Ok(()) => dropped.push(handle.clone()),
            Err(err) => {
                warn!(?err, handle, chat_id, "unwatch failed");
                missing.push(handle.clone());
            }
        }
    }

    if unwatch_all {
        return "You have unwatched all Twitter handles 😥\n\nAdd some more using the /watch command!".to_string();
    }
    build_unwatch_reply(&dropped, &missing)
}

fn build_unwatch_reply(dropped: &[String], missing: &[String]) -> String {
    if dropped.len() + missing.len() == 1 {
        return if missing.is_empty() {
            format!("You are no longer snooping on @{}", dropped[0])
        } else {
            format!(
                "You aren't watching @{}, are you sure you typed it correctly?",
                missing[0]
            )
        };
    }

    let mut message = String::new();
    if !dropped.is_empty() {
        message.push_str("You are no longer snooping on the following Twitter handles:\n\n");
        message.push_str(&bullet_list(dropped));
    }
    if !missing.is_empty() {
        if !message.is_empty() {
            message.push_str("\n\n");
        }
        message.push_str("You are not watching the following handles:\n\n");
        message.push_str(&bullet_list(missing));
        message.push_str("\n\nAre you sure you typed them correctly?");
    }
    message
}

async fn watching_command(pool: &Pool, chat_id: &str) -> String {
    let handles = match db::fetch_watcher(pool, chat_id).await {
        Ok(watcher) => watcher
            .handles
            .into_iter()
            .map(|h| h.name)
            .collect::<Vec<_>>(),
        Err(DbError::WatcherNotFound(_)) => Vec::new(),
        Err(err) => {
            warn!(?err, chat_id, "failed to load watch list");
            return "⛔ There has been an issue retrieving this information, please try again..."
                .to_string();
        }
    };

    if handles.is_empty() {
        "You aren't watching any Twitter handles at the moment. Use the /watch command followed by a handle to see their tweets whenever they post.".to_string()
    } else {
        format!(
            "You are watching the following Twitter handles:\n\n{}",
            bullet_list(&handles)
        )
    }
}

async fn latest_command(feed: &dyn FeedService, args: &[String]) -> String {
    let normalized = normalize_handles(args);
    let [handle] = normalized.as_slice() else {
        return "Ensure your command follows the pattern:\n\n/latest @twitterhandle".to_string();
    };

    match feed.recent_posts(handle, 1).await {
        Ok(posts) => match posts.first() {
            Some(post) => format!("Here's the latest tweet from @{handle}:\n\n{}", post.url),
            None => format!("We couldn't find any recent tweets from @{handle}."),
        },
        Err(err) => {
            warn!(?err, handle, "latest tweet lookup failed");
            "⛔ There has been an issue retrieving this information, please try again..."
                .to_string()
        }
    }
}

fn bullet_list(handles: &[String]) -> String {
    handles
        .iter()
        .map(|h| format!("- @{h}"))
        .collect::<Vec<_>>()
        .join("\n")
}
