//! Command implementations of the in-memory store.
//!
//! Replies follow the usual key-value server conventions: `OK` status strings, integer
//! counts, `Nil` for missing keys and `ERR` / `WRONGTYPE` prefixed error replies.

use super::memory::StoreState;
use crate::client::{CommandOutcome, ReplyError};
use crate::pipeline::types::Value;

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Commands the in-memory store understands.
pub const SUPPORTED_COMMANDS: &[&str] = &[
    "get", "set", "del", "exists", "incr", "incrby", "mget", "hset", "hget", "hmget", "expire",
    "ping", "echo",
];

/// A stored value.
#[derive(Debug, Clone, PartialEq)]
pub enum Stored {
    Str(String),
    Hash(BTreeMap<String, String>),
}

fn wrong_args(command: &str) -> ReplyError {
    ReplyError::new(format!(
        "ERR wrong number of arguments for '{}' command",
        command
    ))
}

fn wrong_type() -> ReplyError {
    ReplyError::new("WRONGTYPE Operation against a key holding the wrong kind of value")
}

fn not_integer() -> ReplyError {
    ReplyError::new("ERR value is not an integer or out of range")
}

fn text(value: &Value) -> Result<String, ReplyError> {
    match value {
        Value::Str(s) => Ok(s.clone()),
        Value::Int(i) => Ok(i.to_string()),
        Value::Bytes(b) => String::from_utf8(b.clone())
            .map_err(|_| ReplyError::new("ERR argument is not valid UTF-8")),
        Value::Nil | Value::Array(_) => Err(ReplyError::new("ERR invalid argument type")),
    }
}

fn integer(value: &Value) -> Result<i64, ReplyError> {
    match value {
        Value::Int(i) => Ok(*i),
        other => text(other)?.parse().map_err(|_| not_integer()),
    }
}

fn ok() -> Value {
    Value::Str("OK".to_string())
}

pub(super) fn execute(state: &StoreState, command: &str, args: &[Value]) -> CommandOutcome {
    match command {
        "get" => {
            let [key] = args else {
                return Err(wrong_args(command));
            };
            read_string(state, &text(key)?)
        }
        "set" => {
            let [key, value] = args else {
                return Err(wrong_args(command));
            };
            let key = text(key)?;
            state.expires.remove(&key);
            state.data.insert(key, Stored::Str(text(value)?));
            Ok(ok())
        }
        "del" => {
            if args.is_empty() {
                return Err(wrong_args(command));
            }
            let mut removed = 0;
            for key in args {
                let key = text(key)?;
                state.purge_if_expired(&key);
                state.expires.remove(&key);
                if state.data.remove(&key).is_some() {
                    removed += 1;
                }
            }
            Ok(Value::Int(removed))
        }
        "exists" => {
            if args.is_empty() {
                return Err(wrong_args(command));
            }
            let mut found = 0;
            for key in args {
                let key = text(key)?;
                state.purge_if_expired(&key);
                if state.data.contains_key(&key) {
                    found += 1;
                }
            }
            Ok(Value::Int(found))
        }
        "incr" => {
            let [key] = args else {
                return Err(wrong_args(command));
            };
            increment(state, &text(key)?, 1)
        }
        "incrby" => {
            let [key, delta] = args else {
                return Err(wrong_args(command));
            };
            increment(state, &text(key)?, integer(delta)?)
        }
        "mget" => {
            if args.is_empty() {
                return Err(wrong_args(command));
            }
            let mut values = Vec::with_capacity(args.len());
            for key in args {
                // Keys of another type read as nil here rather than failing the command.
                values.push(read_string(state, &text(key)?).unwrap_or(Value::Nil));
            }
            Ok(Value::Array(values))
        }
        "hset" => {
            if args.len() < 3 || args.len() % 2 == 0 {
                return Err(wrong_args(command));
            }
            let key = text(&args[0])?;
            let pairs = args[1..]
                .chunks(2)
                .map(|pair| -> Result<(String, String), ReplyError> {
                    Ok((text(&pair[0])?, text(&pair[1])?))
                })
                .collect::<Result<Vec<_>, _>>()?;
            state.purge_if_expired(&key);
            let mut entry = state
                .data
                .entry(key)
                .or_insert_with(|| Stored::Hash(BTreeMap::new()));
            let Stored::Hash(fields) = entry.value_mut() else {
                return Err(wrong_type());
            };
            let mut added = 0;
            for (field, value) in pairs {
                if fields.insert(field, value).is_none() {
                    added += 1;
                }
            }
            Ok(Value::Int(added))
        }
        "hget" => {
            let [key, field] = args else {
                return Err(wrong_args(command));
            };
            let field = text(field)?;
            read_hash(state, &text(key)?, |fields| {
                fields
                    .get(&field)
                    .map(|v| Value::Str(v.clone()))
                    .unwrap_or(Value::Nil)
            })
        }
        "hmget" => {
            if args.len() < 2 {
                return Err(wrong_args(command));
            }
            let key = text(&args[0])?;
            let fields = args[1..]
                .iter()
                .map(text)
                .collect::<Result<Vec<_>, _>>()?;
            read_hash(state, &key, |stored| {
                Value::Array(
                    fields
                        .iter()
                        .map(|f| stored.get(f).map(|v| Value::Str(v.clone())).unwrap_or(Value::Nil))
                        .collect(),
                )
            })
            .map(|value| match value {
                Value::Nil => Value::Array(vec![Value::Nil; fields.len()]),
                other => other,
            })
        }
        "expire" => {
            let [key, seconds] = args else {
                return Err(wrong_args(command));
            };
            let key = text(key)?;
            let seconds = integer(seconds)?;
            state.purge_if_expired(&key);
            if !state.data.contains_key(&key) {
                return Ok(Value::Int(0));
            }
            if seconds <= 0 {
                state.data.remove(&key);
                state.expires.remove(&key);
            } else {
                let deadline = Instant::now()
                    .checked_add(Duration::from_secs(seconds as u64))
                    .ok_or_else(|| {
                        ReplyError::new(format!("ERR invalid expire time in '{}' command", command))
                    })?;
                state.expires.insert(key, deadline);
            }
            Ok(Value::Int(1))
        }
        "ping" => match args {
            [] => Ok(Value::Str("PONG".to_string())),
            [message] => Ok(Value::Str(text(message)?)),
            _ => Err(wrong_args(command)),
        },
        "echo" => {
            let [message] = args else {
                return Err(wrong_args(command));
            };
            Ok(Value::Str(text(message)?))
        }
        _ => Err(ReplyError::new(format!("ERR unknown command '{}'", command))),
    }
}

fn read_string(state: &StoreState, key: &str) -> CommandOutcome {
    state.purge_if_expired(key);
    match state.data.get(key).as_deref() {
        None => Ok(Value::Nil),
        Some(Stored::Str(s)) => Ok(Value::Str(s.clone())),
        Some(Stored::Hash(_)) => Err(wrong_type()),
    }
}

fn read_hash<F>(state: &StoreState, key: &str, read: F) -> CommandOutcome
where
    F: FnOnce(&BTreeMap<String, String>) -> Value,
{
    state.purge_if_expired(key);
    match state.data.get(key).as_deref() {
        None => Ok(Value::Nil),
        Some(Stored::Hash(fields)) => Ok(read(fields)),
        Some(Stored::Str(_)) => Err(wrong_type()),
    }
}

fn increment(state: &StoreState, key: &str, delta: i64) -> CommandOutcome {
    state.purge_if_expired(key);
    let mut entry = state
        .data
        .entry(key.to_string())
        .or_insert_with(|| Stored::Str("0".to_string()));
    let Stored::Str(current) = entry.value_mut() else {
        return Err(wrong_type());
    };
    let next = current
        .parse::<i64>()
        .map_err(|_| not_integer())?
        .checked_add(delta)
        .ok_or_else(not_integer)?;
    *current = next.to_string();
    Ok(Value::Int(next))
}
