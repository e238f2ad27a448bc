//! Host console: stdin commands acting as the LAN room's host.
//!
//! Commands are `/kick <name>`, `/lock`, `/unlock`, `/who`, `/chat <text>`,
//! or any raw wire line, which is submitted as a host action.

use actions::{Action, DecodeError};
use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{info, warn};

use crate::services::room::RoomHandle;

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Kick(String),
    Who,
    Act(Action),
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConsoleError {
    #[error("usage: /kick <name>")]
    MissingKickTarget,
    #[error("unknown command {0:?}")]
    UnknownCommand(String),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Parse one console line. Blank lines yield `Ok(None)`.
///
/// # Errors
///
/// Returns a [`ConsoleError`] for unknown slash commands, a `/kick` without
/// a name, or a raw line that is not a valid action.
pub fn parse_command(line: &str, host_name: &str) -> Result<Option<ConsoleCommand>, ConsoleError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(command) = line.strip_prefix('/') else {
        return Ok(Some(ConsoleCommand::Act(actions::decode(line)?)));
    };

    let (verb, rest) = command.split_once(' ').unwrap_or((command, ""));
    let rest = rest.trim();
    let parsed = match verb {
        "kick" if rest.is_empty() => return Err(ConsoleError::MissingKickTarget),
        "kick" => ConsoleCommand::Kick(rest.to_owned()),
        "lock" => ConsoleCommand::Act(Action::LockBoard),
        "unlock" => ConsoleCommand::Act(Action::UnlockBoard),
        "who" => ConsoleCommand::Who,
        "chat" => ConsoleCommand::Act(Action::Chat { author: host_name.to_owned(), text: rest.to_owned() }),
        other => return Err(ConsoleError::UnknownCommand(other.to_owned())),
    };
    Ok(Some(parsed))
}

/// Read commands from `input` until it ends or the room stops.
pub async fn run<R>(input: R, room: RoomHandle, host_name: String)
where
    R: AsyncRead + Unpin,
{
    let mut lines = FramedRead::new(input, LinesCodec::new());
    info!(room = %room.code(), "console: ready");

    while let Some(line) = lines.next().await {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "console: read failed");
                break;
            }
        };
        let command = match parse_command(&line, &host_name) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                warn!(error = %e, "console: rejected input");
                continue;
            }
        };
        if execute(&room, command).await.is_err() {
            warn!(room = %room.code(), "console: room closed");
            break;
        }
    }
    info!("console: input closed");
}

async fn execute(room: &RoomHandle, command: ConsoleCommand) -> Result<(), crate::services::room::RoomError> {
    match command {
        ConsoleCommand::Kick(name) => {
            if !room.kick(&name).await? {
                warn!(%name, "console: no such participant");
            }
        }
        ConsoleCommand::Who => {
            let snapshot = room.snapshot().await?;
            info!(
                participants = ?snapshot.participants,
                locked = snapshot.locked,
                history = snapshot.history_len,
                redo = snapshot.redo_len,
                "console: who"
            );
        }
        ConsoleCommand::Act(action) => room.host_action(action).await?,
    }
    Ok(())
}
