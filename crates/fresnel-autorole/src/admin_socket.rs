//! Unix socket server for control commands and gateway ingress.
//!
//! One JSON command per line in, one JSON response per line out. The
//! gateway bridge uses the same socket: it pushes platform notifications
//! with `event` and follows role changes with `subscribe`.

use crate::directory::RoleMutation;
use crate::error::{Error, Result};
use crate::events::{Dispatcher, GatewayEvent};
use crate::service::ScoreCard;
use fresnel_thz::{GuildId, RoleId, UserId};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, watch};

pub const DEFAULT_LEADERBOARD_LIMIT: usize = 10;

/// Command sent over the socket.
#[derive(Debug, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum AdminCommand {
    /// Register a role at a threshold (or move it)
    AddThreshold {
        guild_id: GuildId,
        threshold: i64,
        role_id: RoleId,
    },
    RemoveThreshold { guild_id: GuildId, role_id: RoleId },
    /// Override a member's score
    SetScore {
        guild_id: GuildId,
        user_id: UserId,
        score: i64,
    },
    QueryScore { guild_id: GuildId, user_id: UserId },
    ListThresholds { guild_id: GuildId },
    Leaderboard {
        guild_id: GuildId,
        #[serde(default)]
        limit: Option<usize>,
    },
    /// Platform notification from the gateway bridge
    Event { event: GatewayEvent },
    /// Stream role mutations until the connection closes
    Subscribe,
    Ping,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rung {
    pub threshold: u64,
    pub role_id: RoleId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub rank: usize,
    pub user_id: UserId,
    pub score: u64,
}

/// Response to a command.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AdminResponse {
    Ok { message: String },
    Error { error: String },
    Score(ScoreCard),
    Thresholds { items: Vec<Rung> },
    Leaderboard { items: Vec<Entry> },
    Subscribed,
    Mutation { mutation: RoleMutation },
    Pong,
}

impl From<Error> for AdminResponse {
    fn from(e: Error) -> Self {
        AdminResponse::Error {
            error: e.to_string(),
        }
    }
}

/// Control socket server.
pub struct AdminSocket {
    dispatcher: Arc<Dispatcher>,
    socket_path: PathBuf,
}

impl AdminSocket {
    pub fn new(dispatcher: Arc<Dispatcher>, socket_path: impl Into<PathBuf>) -> Self {
        Self {
            dispatcher,
            socket_path: socket_path.into(),
        }
    }

    /// Accept connections until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        // Stale socket from a previous run
        let _ = std::fs::remove_file(&self.socket_path);

        let listener = UnixListener::bind(&self.socket_path)?;
        tracing::info!("Admin socket listening on {:?}", self.socket_path);

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let dispatcher = Arc::clone(&self.dispatcher);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, dispatcher).await {
                                tracing::warn!("Admin connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Failed to accept admin connection: {}", e);
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        let _ = std::fs::remove_file(&self.socket_path);
        Ok(())
    }
}

async fn handle_connection(stream: UnixStream, dispatcher: Arc<Dispatcher>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        let response = match serde_json::from_str::<AdminCommand>(&line) {
            Ok(AdminCommand::Subscribe) => {
                let rx = dispatcher.directory().subscribe();
                return stream_mutations(&mut writer, rx).await;
            }
            Ok(cmd) => execute_command(cmd, &dispatcher).await,
            Err(e) => AdminResponse::Error {
                error: format!("Invalid command: {}", e),
            },
        };

        write_response(&mut writer, &response).await?;
        line.clear();
    }

    Ok(())
}

async fn write_response<W>(writer: &mut W, response: &AdminResponse) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let response_json = serde_json::to_string(response)? + "\n";
    writer.write_all(response_json.as_bytes()).await?;
    Ok(())
}

async fn stream_mutations<W>(writer: &mut W, mut rx: broadcast::Receiver<RoleMutation>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_response(writer, &AdminResponse::Subscribed).await?;
    loop {
        match rx.recv().await {
            Ok(mutation) => write_response(writer, &AdminResponse::Mutation { mutation }).await?,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!("Mutation subscriber lagged, {} changes dropped", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => return Ok(()),
        }
    }
}

async fn execute_command(cmd: AdminCommand, dispatcher: &Dispatcher) -> AdminResponse {
    let service = dispatcher.service();
    match cmd {
        AdminCommand::AddThreshold {
            guild_id,
            threshold,
            role_id,
        } => match service.add_threshold(guild_id, threshold, role_id).await {
            Ok(added) => {
                let mut message = match added.moved_from {
                    Some(old) => format!("Moved role {} from {} to {}", role_id, old, added.threshold),
                    None => format!("Registered role {} at {}", role_id, added.threshold),
                };
                if !added.bumped.is_empty() {
                    message.push_str(&format!(", {} member(s) grandfathered", added.bumped.len()));
                }
                AdminResponse::Ok { message }
            }
            Err(e) => e.into(),
        },

        AdminCommand::RemoveThreshold { guild_id, role_id } => {
            match service.remove_threshold(guild_id, role_id).await {
                Ok(removed) => AdminResponse::Ok {
                    message: format!("Unregistered role {} (was {})", role_id, removed.threshold),
                },
                Err(e) => e.into(),
            }
        }

        AdminCommand::SetScore {
            guild_id,
            user_id,
            score,
        } => match service.set_score(guild_id, user_id, score).await {
            Ok(Some(previous)) => AdminResponse::Ok {
                message: format!("Score of {} set to {} (was {})", user_id, score, previous),
            },
            Ok(None) => AdminResponse::Ok {
                message: format!("Score of {} set to {}", user_id, score),
            },
            Err(e) => e.into(),
        },

        AdminCommand::QueryScore { guild_id, user_id } => {
            match service.query_score(guild_id, user_id).await {
                Ok(card) => AdminResponse::Score(card),
                Err(e) => e.into(),
            }
        }

        AdminCommand::ListThresholds { guild_id } => match service.list_thresholds(guild_id).await {
            Ok(rungs) => AdminResponse::Thresholds {
                items: rungs
                    .into_iter()
                    .map(|(threshold, role_id)| Rung { threshold, role_id })
                    .collect(),
            },
            Err(e) => e.into(),
        },

        AdminCommand::Leaderboard { guild_id, limit } => match service.leaderboard(guild_id).await {
            Ok(board) => AdminResponse::Leaderboard {
                items: board
                    .into_iter()
                    .take(limit.unwrap_or(DEFAULT_LEADERBOARD_LIMIT))
                    .map(|s| Entry {
                        rank: s.rank,
                        user_id: s.user,
                        score: s.score,
                    })
                    .collect(),
            },
            Err(e) => e.into(),
        },

        AdminCommand::Event { event } => {
            let guild = event.guild_id();
            match dispatcher.dispatch(event).await {
                Ok(()) => AdminResponse::Ok {
                    message: format!("Applied event for guild {}", guild),
                },
                Err(e) => {
                    tracing::warn!(guild = %guild, "event dispatch failed: {}", e);
                    e.into()
                }
            }
        }

        AdminCommand::Subscribe => AdminResponse::Subscribed,

        AdminCommand::Ping => AdminResponse::Pong,
    }
}
