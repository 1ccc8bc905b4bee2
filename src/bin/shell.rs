//! Interactive shell for the store.
//!
//! Reads commands from standard input with line editing and history:
//!
//! ```text
//! put <key> <value>   Insert a key-value pair
//! get <key>           Look up a key
//! stats               Show page count and tree height
//! help                Show the command list
//! exit | quit         Leave the shell
//! ```

use cowkv::{Config, Db, StoreError};
use eyre::{Result, WrapErr};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

const PROMPT: &str = "cowkv> ";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "cowkv.db".to_string());
    let db = Db::open(Config::new(&path)).wrap_err_with(|| format!("failed to open {path}"))?;

    println!("cowkv shell. Type 'help' for commands.");
    println!("Connected to: {path}");

    let mut editor = DefaultEditor::new().wrap_err("failed to initialize line editor")?;

    loop {
        match editor.readline(PROMPT) {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                editor.add_history_entry(trimmed).ok();
                if !handle_line(&db, trimmed) {
                    break;
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
            }
            Err(ReadlineError::Eof) => {
                println!("Bye");
                break;
            }
            Err(err) => {
                eprintln!("Error reading input: {err}");
                break;
            }
        }
    }

    db.close()?;
    Ok(())
}

/// Execute one command line; returns false when the shell should exit
fn handle_line(db: &Db, line: &str) -> bool {
    let parts: Vec<&str> = line.split_whitespace().collect();

    match parts.as_slice() {
        ["put", key, value] => match db.update(|tx| tx.put(key.as_bytes(), value.as_bytes())) {
            Ok(()) => println!("OK"),
            Err(err) => eprintln!("Error: {err}"),
        },
        ["put", ..] => println!("Usage: put <key> <value>"),

        ["get", key] => match db.view(|tx| tx.get(key.as_bytes())) {
            Ok(value) => println!("{}", String::from_utf8_lossy(&value)),
            Err(StoreError::KeyNotFound) => println!("NOT_FOUND"),
            Err(err) => eprintln!("Error: {err}"),
        },
        ["get", ..] => println!("Usage: get <key>"),

        ["stats"] => match db.stats() {
            Ok(stats) => {
                println!("page_count: {}", stats.page_count);
                println!("tree_height: {}", stats.tree_height);
            }
            Err(err) => eprintln!("Error: {err}"),
        },

        ["help"] => {
            println!("Commands: put <k> <v>, get <k>, stats, exit");
        }

        ["exit"] | ["quit"] => return false,

        _ => println!("Unknown command"),
    }

    true
}
