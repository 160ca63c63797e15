//! fresnel-admin CLI tool
//!
//! Manages the THz ladder and scores of a running Fresnel node.
//!
//! Usage:
//!   fresnel-admin add-threshold <guild> <threshold> <role>
//!   fresnel-admin remove-threshold <guild> <role>
//!   fresnel-admin set-score <guild> <user> <score>
//!   fresnel-admin score <guild> <user>
//!   fresnel-admin thresholds <guild>
//!   fresnel-admin leaderboard <guild> [limit]
//!   fresnel-admin ping

use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::str::FromStr;

/// Command sent over the socket.
#[derive(Debug, Serialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
enum AdminCommand {
    AddThreshold { guild_id: u64, threshold: i64, role_id: u64 },
    RemoveThreshold { guild_id: u64, role_id: u64 },
    SetScore { guild_id: u64, user_id: u64, score: i64 },
    QueryScore { guild_id: u64, user_id: u64 },
    ListThresholds { guild_id: u64 },
    Leaderboard { guild_id: u64, limit: Option<usize> },
    Ping,
}

#[derive(Debug, Deserialize)]
struct Rung {
    threshold: u64,
    role_id: u64,
}

#[derive(Debug, Deserialize)]
struct Entry {
    rank: usize,
    user_id: u64,
    score: u64,
}

/// Response from admin command.
#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum AdminResponse {
    Ok { message: String },
    Error { error: String },
    Score {
        user_id: u64,
        score: u64,
        role_id: Option<u64>,
        rank: usize,
        tracked: usize,
    },
    Thresholds { items: Vec<Rung> },
    Leaderboard { items: Vec<Entry> },
    Pong,
}

fn print_usage() {
    eprintln!("fresnel-admin - Manage a Fresnel node's role ladder and scores");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  fresnel-admin add-threshold <guild> <threshold> <role>  Register or move a role");
    eprintln!("  fresnel-admin remove-threshold <guild> <role>           Unregister a role");
    eprintln!("  fresnel-admin set-score <guild> <user> <score>          Override a score");
    eprintln!("  fresnel-admin score <guild> <user>                      Show a member's score");
    eprintln!("  fresnel-admin thresholds <guild>                        List the ladder");
    eprintln!("  fresnel-admin leaderboard <guild> [limit]               Show top members");
    eprintln!("  fresnel-admin ping                                      Check if daemon is running");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  FRESNEL_SOCKET  Path to admin socket (default: ./fresnel-data/admin.sock)");
}

fn get_socket_path() -> PathBuf {
    std::env::var("FRESNEL_SOCKET")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./fresnel-data/admin.sock"))
}

fn send_command(cmd: AdminCommand) -> Result<AdminResponse, String> {
    let socket_path = get_socket_path();

    let mut stream = UnixStream::connect(&socket_path).map_err(|e| {
        format!(
            "Failed to connect to fresnel-node at {:?}: {}\n\
             Is the fresnel-node running?",
            socket_path, e
        )
    })?;

    let cmd_json = serde_json::to_string(&cmd).map_err(|e| e.to_string())?;
    writeln!(stream, "{}", cmd_json).map_err(|e| e.to_string())?;

    let mut reader = BufReader::new(&stream);
    let mut response_line = String::new();
    reader
        .read_line(&mut response_line)
        .map_err(|e| e.to_string())?;

    serde_json::from_str(&response_line).map_err(|e| format!("Invalid response: {}", e))
}

/// Positional argument `index` of `args`, parsed.
fn arg<T: FromStr>(args: &[String], index: usize, name: &str) -> Result<T, String> {
    let raw = args
        .get(index)
        .ok_or_else(|| format!("{} requires a <{}> argument", args[1], name))?;
    raw.parse()
        .map_err(|_| format!("<{}> must be an integer, got {:?}", name, raw))
}

fn parse_command(args: &[String]) -> Result<AdminCommand, String> {
    let cmd = match args[1].as_str() {
        "add-threshold" => AdminCommand::AddThreshold {
            guild_id: arg(args, 2, "guild")?,
            threshold: arg(args, 3, "threshold")?,
            role_id: arg(args, 4, "role")?,
        },
        "remove-threshold" => AdminCommand::RemoveThreshold {
            guild_id: arg(args, 2, "guild")?,
            role_id: arg(args, 3, "role")?,
        },
        "set-score" => AdminCommand::SetScore {
            guild_id: arg(args, 2, "guild")?,
            user_id: arg(args, 3, "user")?,
            score: arg(args, 4, "score")?,
        },
        "score" => AdminCommand::QueryScore {
            guild_id: arg(args, 2, "guild")?,
            user_id: arg(args, 3, "user")?,
        },
        "thresholds" => AdminCommand::ListThresholds {
            guild_id: arg(args, 2, "guild")?,
        },
        "leaderboard" => AdminCommand::Leaderboard {
            guild_id: arg(args, 2, "guild")?,
            limit: match args.get(3) {
                Some(_) => Some(arg(args, 3, "limit")?),
                None => None,
            },
        },
        "ping" => AdminCommand::Ping,
        other => return Err(format!("Unknown command: {}", other)),
    };
    Ok(cmd)
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }
    if matches!(args[1].as_str(), "-h" | "--help" | "help") {
        print_usage();
        std::process::exit(0);
    }

    let cmd = match parse_command(&args) {
        Ok(cmd) => cmd,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_usage();
            std::process::exit(1);
        }
    };

    match send_command(cmd) {
        Ok(response) => match response {
            AdminResponse::Ok { message } => {
                println!("{}", message);
            }
            AdminResponse::Error { error } => {
                eprintln!("Error: {}", error);
                std::process::exit(1);
            }
            AdminResponse::Score {
                user_id,
                score,
                role_id,
                rank,
                tracked,
            } => {
                let role = role_id.map_or_else(|| "(none)".to_string(), |r| r.to_string());
                println!("user {}: {} THz, role {}, rank {}/{}", user_id, score, role, rank, tracked);
            }
            AdminResponse::Thresholds { items } => {
                if items.is_empty() {
                    println!("(none)");
                }
                for rung in items {
                    println!("{:>10}  {}", rung.threshold, rung.role_id);
                }
            }
            AdminResponse::Leaderboard { items } => {
                if items.is_empty() {
                    println!("(none)");
                }
                for entry in items {
                    println!("{:>4}. {:<20} {} THz", entry.rank, entry.user_id, entry.score);
                }
            }
            AdminResponse::Pong => {
                println!("pong - fresnel-node is running");
            }
        },
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }
}
