//! Administrative command-line surface
//!
//! Minimal hand-rolled parsing into a `Command`, plus one-shot execution
//! against the store for everything that does not need the running
//! orchestrator. `start` (the default) is handled by `main`.

use std::env;

use anyhow::{Context, Result};
use chrono::Local;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{Config, SettingsManager};
use crate::db::Database;
use crate::media::{ItemKind, MediaState};
use crate::services::indexer::IndexerService;
use crate::services::rate_limiter::{RateLimit, RateLimitedClient};

/// At most this much of the log tail goes to the paste service.
const MAX_LOG_UPLOAD_BYTES: usize = 512 * 1024;

/// Keep the newest end of the log, trimmed to a char boundary.
fn tail_for_upload(raw: String, max_bytes: usize) -> String {
    if raw.len() <= max_bytes {
        return raw;
    }
    let mut start = raw.len() - max_bytes;
    while !raw.is_char_boundary(start) {
        start += 1;
    }
    raw[start..].to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsCommand {
    Get(String),
    Set(String, String),
    Load,
    Save,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemCommand {
    Add {
        kind: ItemKind,
        imdb_id: Option<String>,
        tmdb_id: Option<String>,
        tvdb_id: Option<String>,
    },
    Reset(i64),
    Retry(i64),
    Pause(i64),
    Unpause(i64),
    Remove(i64),
    Reindex(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamsCommand {
    List(i64),
    Blacklist(i64, i64),
    Unblacklist(i64, i64),
    Reset(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbCommand {
    Snapshot(String),
    Restore(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Settings(SettingsCommand),
    Item(ItemCommand),
    Streams(StreamsCommand),
    Db(DbCommand),
    GenerateApiKey,
    UploadLogs,
    VfsList,
    Calendar,
    Help,
}

pub const USAGE: &str = "\
usage: curator [command]

commands:
  start                                run the orchestrator (default)
  settings get <path>|all              read a settings value
  settings set <path> <value>          write a settings value
  settings load|save                   reload from / persist to disk
  item add [--movie|--show] [--imdb ID] [--tmdb ID] [--tvdb ID]
  item reset|retry|pause|unpause|remove|reindex <id>
  streams list <item>                  candidate and blacklisted streams
  streams blacklist <item> <stream>
  streams unblacklist <item> <stream>
  streams reset <item>
  db snapshot <file>                   dump the database
  db restore <file>                    restore a dump
  apikey generate
  logs upload                          post the log file to the paste service
  vfs ls                               list entries exposed via the VFS
  calendar                             pending scheduled tasks (14 days)
  help";

fn parse_id(value: Option<&String>, what: &str) -> Result<i64, String> {
    value
        .ok_or_else(|| format!("missing {what} id"))?
        .parse()
        .map_err(|_| format!("invalid {what} id"))
}

/// Parse process arguments. Errors carry a user-facing message.
pub fn parse_args() -> Result<Command, String> {
    let args: Vec<String> = env::args().skip(1).collect();
    parse(&args)
}

fn parse(args: &[String]) -> Result<Command, String> {
    let mut words = args.iter();
    let Some(first) = words.next() else {
        return Ok(Command::Start);
    };

    match first.as_str() {
        "start" => Ok(Command::Start),
        "help" | "--help" | "-h" => Ok(Command::Help),

        "settings" => match words.next().map(String::as_str) {
            Some("get") => {
                let path = words.next().ok_or("missing settings path")?;
                Ok(Command::Settings(SettingsCommand::Get(path.clone())))
            }
            Some("set") => {
                let path = words.next().ok_or("missing settings path")?.clone();
                let value = words.next().ok_or("missing settings value")?.clone();
                Ok(Command::Settings(SettingsCommand::Set(path, value)))
            }
            Some("load") => Ok(Command::Settings(SettingsCommand::Load)),
            Some("save") => Ok(Command::Settings(SettingsCommand::Save)),
            other => Err(format!("unknown settings command: {other:?}")),
        },

        "item" => {
            let sub = words.next().ok_or("missing item command")?;
            match sub.as_str() {
                "add" => {
                    let mut kind = ItemKind::Movie;
                    let mut imdb_id = None;
                    let mut tmdb_id = None;
                    let mut tvdb_id = None;
                    while let Some(flag) = words.next() {
                        match flag.as_str() {
                            "--movie" => kind = ItemKind::Movie,
                            "--show" => kind = ItemKind::Show,
                            "--imdb" => imdb_id = words.next().cloned(),
                            "--tmdb" => tmdb_id = words.next().cloned(),
                            "--tvdb" => tvdb_id = words.next().cloned(),
                            other => return Err(format!("unknown flag: {other}")),
                        }
                    }
                    if imdb_id.is_none() && tmdb_id.is_none() && tvdb_id.is_none() {
                        return Err("item add needs at least one external id".into());
                    }
                    Ok(Command::Item(ItemCommand::Add {
                        kind,
                        imdb_id,
                        tmdb_id,
                        tvdb_id,
                    }))
                }
                "reset" => Ok(Command::Item(ItemCommand::Reset(parse_id(words.next(), "item")?))),
                "retry" => Ok(Command::Item(ItemCommand::Retry(parse_id(words.next(), "item")?))),
                "pause" => Ok(Command::Item(ItemCommand::Pause(parse_id(words.next(), "item")?))),
                "unpause" => Ok(Command::Item(ItemCommand::Unpause(parse_id(
                    words.next(),
                    "item",
                )?))),
                "remove" => Ok(Command::Item(ItemCommand::Remove(parse_id(
                    words.next(),
                    "item",
                )?))),
                "reindex" => Ok(Command::Item(ItemCommand::Reindex(parse_id(
                    words.next(),
                    "item",
                )?))),
                other => Err(format!("unknown item command: {other}")),
            }
        }

        "streams" => {
            let sub = words.next().ok_or("missing streams command")?;
            match sub.as_str() {
                "list" => Ok(Command::Streams(StreamsCommand::List(parse_id(
                    words.next(),
                    "item",
                )?))),
                "blacklist" => Ok(Command::Streams(StreamsCommand::Blacklist(
                    parse_id(words.next(), "item")?,
                    parse_id(words.next(), "stream")?,
                ))),
                "unblacklist" => Ok(Command::Streams(StreamsCommand::Unblacklist(
                    parse_id(words.next(), "item")?,
                    parse_id(words.next(), "stream")?,
                ))),
                "reset" => Ok(Command::Streams(StreamsCommand::Reset(parse_id(
                    words.next(),
                    "item",
                )?))),
                other => Err(format!("unknown streams command: {other}")),
            }
        }

        "db" => match words.next().map(String::as_str) {
            Some("snapshot") => {
                let file = words.next().ok_or("missing snapshot file")?.clone();
                Ok(Command::Db(DbCommand::Snapshot(file)))
            }
            Some("restore") => {
                let file = words.next().ok_or("missing restore file")?.clone();
                Ok(Command::Db(DbCommand::Restore(file)))
            }
            other => Err(format!("unknown db command: {other:?}")),
        },

        "apikey" => match words.next().map(String::as_str) {
            Some("generate") => Ok(Command::GenerateApiKey),
            other => Err(format!("unknown apikey command: {other:?}")),
        },

        "logs" => match words.next().map(String::as_str) {
            Some("upload") => Ok(Command::UploadLogs),
            other => Err(format!("unknown logs command: {other:?}")),
        },

        "vfs" => match words.next().map(String::as_str) {
            Some("ls") => Ok(Command::VfsList),
            other => Err(format!("unknown vfs command: {other:?}")),
        },

        "calendar" => Ok(Command::Calendar),

        other => Err(format!("unknown command: {other}")),
    }
}

/// Run a one-shot admin command. Returns the process exit code.
pub async fn execute(command: Command, config: &Config, db: &Database) -> Result<i32> {
    match command {
        Command::Start => unreachable!("start is handled by main"),
        Command::Help => {
            println!("{USAGE}");
            Ok(0)
        }

        Command::Settings(cmd) => {
            let settings = SettingsManager::load_or_default(&config.settings_file())?;
            match cmd {
                SettingsCommand::Get(path) => match settings.get_path(&path) {
                    Some(value) => {
                        println!("{}", serde_json::to_string_pretty(&value)?);
                        Ok(0)
                    }
                    None => {
                        eprintln!("unknown settings path: {path}");
                        Ok(1)
                    }
                },
                SettingsCommand::Set(path, raw) => {
                    // Accept bare strings as well as JSON literals.
                    let value = serde_json::from_str(&raw)
                        .unwrap_or_else(|_| serde_json::Value::String(raw));
                    settings.set_path(&path, value)?;
                    settings.save()?;
                    println!("ok");
                    Ok(0)
                }
                SettingsCommand::Load => {
                    settings.load()?;
                    println!("ok");
                    Ok(0)
                }
                SettingsCommand::Save => {
                    settings.save()?;
                    println!("ok");
                    Ok(0)
                }
            }
        }

        Command::Item(cmd) => execute_item(cmd, config, db).await,
        Command::Streams(cmd) => execute_streams(cmd, db).await,
        Command::Db(cmd) => execute_db(cmd, config).await,

        Command::GenerateApiKey => {
            use rand::Rng;
            let settings = SettingsManager::load_or_default(&config.settings_file())?;
            let key: String = rand::thread_rng()
                .sample_iter(&rand::distributions::Alphanumeric)
                .take(32)
                .map(char::from)
                .collect();
            settings.set_path("api_key", serde_json::Value::String(key.clone()))?;
            settings.save()?;
            println!("{key}");
            Ok(0)
        }

        Command::UploadLogs => {
            let settings = SettingsManager::load_or_default(&config.settings_file())?;
            let path = config.log_file();
            let raw = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("reading log file {}", path.display()))?;
            let body = tail_for_upload(raw, MAX_LOG_UPLOAD_BYTES);
            if body.is_empty() {
                eprintln!("log file is empty, nothing to upload");
                return Ok(1);
            }

            let http = RateLimitedClient::new("logs", RateLimit::default());
            let url = http
                .post_text(&settings.get().logging.paste_url, body)
                .await?;
            println!("{}", url.trim());
            Ok(0)
        }

        Command::VfsList => {
            for entry in db.filesystem_entries().vfs_listing().await? {
                println!("{:>12}  {}", entry.file_size, entry.path);
            }
            Ok(0)
        }

        Command::Calendar => {
            let now = Local::now().naive_local();
            for task in db.scheduled_tasks().upcoming(now, 14).await? {
                println!(
                    "{}  item {:>6}  {}  {}",
                    task.scheduled_for,
                    task.item_id,
                    task.task_type,
                    task.reason.as_deref().unwrap_or("-")
                );
            }
            Ok(0)
        }
    }
}

async fn execute_item(cmd: ItemCommand, config: &Config, db: &Database) -> Result<i32> {
    let repo = db.media_items();
    match cmd {
        ItemCommand::Add {
            kind,
            imdb_id,
            tmdb_id,
            tvdb_id,
        } => {
            let id = repo
                .create(crate::db::CreateMediaItem {
                    kind,
                    imdb_id,
                    tmdb_id,
                    tvdb_id,
                    requested_by: Some("cli".to_string()),
                    ..crate::db::CreateMediaItem::default()
                })
                .await?;
            println!("{id}");
            Ok(0)
        }
        ItemCommand::Reset(id) => {
            repo.reset(id).await?;
            repo.update_ancestor_states(id).await?;
            println!("ok");
            Ok(0)
        }
        ItemCommand::Retry(id) => {
            // Re-open the item so the retry sweep re-drives it; streams and
            // metadata are kept.
            let Some(view) = repo.queue_view(id).await? else {
                eprintln!("no such item: {id}");
                return Ok(1);
            };
            if view.state == MediaState::Failed || view.state == MediaState::Unknown {
                let Some(record) = repo.get_by_id(id).await? else {
                    eprintln!("no such item: {id}");
                    return Ok(1);
                };
                let state = if record.indexed_at.is_some() {
                    MediaState::Indexed
                } else {
                    MediaState::Requested
                };
                repo.set_state(id, state).await?;
            }
            repo.update_ancestor_states(id).await?;
            println!("ok");
            Ok(0)
        }
        ItemCommand::Pause(id) => {
            repo.pause(id).await?;
            println!("ok");
            Ok(0)
        }
        ItemCommand::Unpause(id) => {
            repo.unpause(id).await?;
            println!("ok");
            Ok(0)
        }
        ItemCommand::Remove(id) => {
            db.scheduled_tasks().cancel_pending_for_item(id).await?;
            let removed = repo.delete(id).await?;
            if removed == 0 {
                eprintln!("no such item: {id}");
                return Ok(1);
            }
            println!("ok");
            Ok(0)
        }
        ItemCommand::Reindex(id) => {
            let settings = SettingsManager::load_or_default(&config.settings_file())?;
            let indexer = IndexerService::new(db.clone(), &settings.get().indexer);
            indexer.index_item(id, &CancellationToken::new()).await?;
            println!("ok");
            Ok(0)
        }
    }
}

async fn execute_streams(cmd: StreamsCommand, db: &Database) -> Result<i32> {
    let streams = db.streams();
    match cmd {
        StreamsCommand::List(item_id) => {
            for stream in streams.candidates_for(item_id).await? {
                println!("{:>6}  {}  {}", stream.id, stream.infohash, stream.raw_title);
            }
            let blacklisted = streams.blacklisted_for(item_id).await?;
            if !blacklisted.is_empty() {
                println!("blacklisted:");
                for stream in blacklisted {
                    println!("{:>6}  {}  {}", stream.id, stream.infohash, stream.raw_title);
                }
            }
            Ok(0)
        }
        StreamsCommand::Blacklist(item_id, stream_id) => {
            streams.blacklist(item_id, stream_id).await?;
            println!("ok");
            Ok(0)
        }
        StreamsCommand::Unblacklist(item_id, stream_id) => {
            streams.unblacklist(item_id, stream_id).await?;
            println!("ok");
            Ok(0)
        }
        StreamsCommand::Reset(item_id) => {
            streams.reset_for_item(item_id).await?;
            println!("ok");
            Ok(0)
        }
    }
}

async fn execute_db(cmd: DbCommand, config: &Config) -> Result<i32> {
    match cmd {
        DbCommand::Snapshot(file) => {
            let status = tokio::process::Command::new("pg_dump")
                .arg("--format=custom")
                .arg("--file")
                .arg(&file)
                .arg(&config.database_url)
                .status()
                .await
                .context("running pg_dump")?;
            if status.success() {
                info!(file = %file, "Database snapshot written");
                Ok(0)
            } else {
                eprintln!("pg_dump failed: {status}");
                Ok(1)
            }
        }
        DbCommand::Restore(file) => {
            let status = tokio::process::Command::new("pg_restore")
                .arg("--clean")
                .arg("--if-exists")
                .arg("--dbname")
                .arg(&config.database_url)
                .arg(&file)
                .status()
                .await
                .context("running pg_restore")?;
            if status.success() {
                info!(file = %file, "Database restored");
                Ok(0)
            } else {
                eprintln!("pg_restore failed: {status}");
                Ok(1)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_words(words: &[&str]) -> Result<Command, String> {
        let args: Vec<String> = words.iter().map(|s| s.to_string()).collect();
        parse(&args)
    }

    #[test]
    fn no_args_starts_the_orchestrator() {
        assert_eq!(parse_words(&[]).unwrap(), Command::Start);
        assert_eq!(parse_words(&["start"]).unwrap(), Command::Start);
    }

    #[test]
    fn settings_commands_parse() {
        assert_eq!(
            parse_words(&["settings", "get", "all"]).unwrap(),
            Command::Settings(SettingsCommand::Get("all".into()))
        );
        assert_eq!(
            parse_words(&["settings", "set", "retry_interval", "3600"]).unwrap(),
            Command::Settings(SettingsCommand::Set("retry_interval".into(), "3600".into()))
        );
        assert!(parse_words(&["settings", "frobnicate"]).is_err());
    }

    #[test]
    fn item_add_requires_an_external_id() {
        assert!(parse_words(&["item", "add"]).is_err());
        assert_eq!(
            parse_words(&["item", "add", "--show", "--tvdb", "81189"]).unwrap(),
            Command::Item(ItemCommand::Add {
                kind: ItemKind::Show,
                imdb_id: None,
                tmdb_id: None,
                tvdb_id: Some("81189".into()),
            })
        );
    }

    #[test]
    fn item_ops_need_numeric_ids() {
        assert_eq!(
            parse_words(&["item", "pause", "42"]).unwrap(),
            Command::Item(ItemCommand::Pause(42))
        );
        assert!(parse_words(&["item", "pause", "forty-two"]).is_err());
        assert!(parse_words(&["item", "pause"]).is_err());
    }

    #[test]
    fn stream_commands_parse() {
        assert_eq!(
            parse_words(&["streams", "blacklist", "7", "12"]).unwrap(),
            Command::Streams(StreamsCommand::Blacklist(7, 12))
        );
    }

    #[test]
    fn logs_upload_parses() {
        assert_eq!(parse_words(&["logs", "upload"]).unwrap(), Command::UploadLogs);
        assert!(parse_words(&["logs", "tail"]).is_err());
    }

    #[test]
    fn log_tail_keeps_the_newest_end() {
        let raw = "old line\nnew line".to_string();
        assert_eq!(tail_for_upload(raw.clone(), 1024), raw);
        assert_eq!(tail_for_upload(raw, 8), "new line");
    }

    #[test]
    fn log_tail_respects_char_boundaries() {
        let raw = "aaaé tail".to_string();
        // Cutting into the middle of the two-byte é must not panic.
        let tail = tail_for_upload(raw, 6);
        assert_eq!(tail, " tail");
    }
}
