//! Maintenance commands run against a single store.

use clap::Subcommand;
use color_eyre::Result;
use serde_json::{json, Value};

use cachesync::cache::Store;

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
  /// Print the live value under KEY (null when missing or expired)
  Get { key: String },
  /// Store VALUE under KEY; VALUE is parsed as JSON, falling back to a string
  Set {
    key: String,
    value: String,
    /// Expire after this many minutes
    #[arg(long)]
    ttl: Option<u32>,
  },
  /// Like set, but only when KEY is missing or expired
  Add {
    key: String,
    value: String,
    #[arg(long)]
    ttl: Option<u32>,
  },
  /// Like set, but only when KEY holds a live value
  Replace {
    key: String,
    value: String,
    #[arg(long)]
    ttl: Option<u32>,
  },
  /// Remove KEY
  Remove { key: String },
  /// Increment the counter under KEY
  Incr { key: String },
  /// Decrement the counter under KEY
  Decr { key: String },
  /// List keys in the namespace
  Keys,
  /// List keys with an expiry and the epoch-minute they expire at
  Expirable,
  /// Remove every entry in the namespace
  Flush,
  /// Remove expired entries
  FlushExpired {
    /// Sweep every namespace on the backend
    #[arg(long)]
    all: bool,
  },
  /// List namespaces registered on the backend
  Namespaces,
}

/// Run `command` against `store`, returning what should be printed.
pub fn run(store: &Store, command: Command) -> Result<Option<Value>> {
  let output = match command {
    Command::Get { key } => Some(store.get::<Value>(&key).unwrap_or(Value::Null)),
    Command::Set { key, value, ttl } => {
      store.set(&key, &parse_value(&value), ttl);
      None
    }
    Command::Add { key, value, ttl } => {
      store.add(&key, &parse_value(&value), ttl);
      None
    }
    Command::Replace { key, value, ttl } => {
      store.replace(&key, &parse_value(&value), ttl);
      None
    }
    Command::Remove { key } => {
      store.remove(&key);
      None
    }
    Command::Incr { key } => Some(json!(store.incr(&key))),
    Command::Decr { key } => Some(json!(store.decr(&key))),
    Command::Keys => Some(json!(store.keys())),
    Command::Expirable => Some(json!(store.expirable_keys())),
    Command::Flush => {
      store.flush();
      None
    }
    Command::FlushExpired { all } => {
      let removed = if all {
        store.flush_expired_all_namespaces()
      } else {
        store.flush_expired()
      };
      Some(json!({ "removed": removed }))
    }
    Command::Namespaces => Some(json!(Store::namespaces(store.backend().as_ref()))),
  };
  Ok(output)
}

fn parse_value(raw: &str) -> Value {
  serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use cachesync::cache::MemoryStorage;
  use std::sync::Arc;

  fn store() -> Store {
    Store::new(Arc::new(MemoryStorage::new()), "cli", None).unwrap()
  }

  fn set(key: &str, value: &str) -> Command {
    Command::Set {
      key: key.to_string(),
      value: value.to_string(),
      ttl: None,
    }
  }

  #[test]
  fn test_set_then_get() {
    let store = store();
    run(&store, set("obj", r#"{"a": 1}"#)).unwrap();
    run(&store, set("plain", "hello world")).unwrap();

    let obj = run(&store, Command::Get { key: "obj".into() }).unwrap();
    assert_eq!(obj, Some(json!({"a": 1})));

    let plain = run(&store, Command::Get { key: "plain".into() }).unwrap();
    assert_eq!(plain, Some(json!("hello world")));

    let missing = run(&store, Command::Get { key: "nope".into() }).unwrap();
    assert_eq!(missing, Some(Value::Null));
  }

  #[test]
  fn test_counters_and_keys() {
    let store = store();
    run(&store, Command::Incr { key: "n".into() }).unwrap();
    let n = run(&store, Command::Incr { key: "n".into() }).unwrap();
    assert_eq!(n, Some(json!(2)));

    let keys = run(&store, Command::Keys).unwrap();
    assert_eq!(keys, Some(json!(["n"])));
  }

  #[test]
  fn test_flush_expired_reports_count() {
    let store = store();
    let output = run(&store, Command::FlushExpired { all: true }).unwrap();
    assert_eq!(output, Some(json!({"removed": 0})));
  }

  #[test]
  fn test_namespaces() {
    let store = store();
    let output = run(&store, Command::Namespaces).unwrap();
    assert_eq!(output, Some(json!(["", "cli"])));
  }
}
