//! Line-mode 5250 client.
//!
//! Screens are printed to stdout as text. Each stdin line is typed into the
//! current field; `:name` lines send a named key (`:f3`, `:fieldexit`,
//! `:quit`) and an empty line presses Enter.

use anyhow::Context;
use log::{error, info};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use tn5250_core::config::load_default_config;
use tn5250_core::{Key, Session, SessionEnd, TextTerminal};

fn keys_for_line(line: &str) -> Vec<Key> {
    if line.is_empty() {
        return vec![Key::Enter];
    }
    if let Some(name) = line.strip_prefix(':') {
        return name
            .split_whitespace()
            .filter_map(|n| match n.parse::<Key>() {
                Ok(key) => Some(key),
                Err(e) => {
                    eprintln!("{e}");
                    None
                }
            })
            .collect();
    }
    line.chars().map(Key::Char).collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut config = load_default_config();
    config
        .parse_args(std::env::args().skip(1))
        .context("invalid command line")?;
    if !config.has_property("host") {
        eprintln!("usage: tn5250 [+opt|-opt|key=value]... host[:port]");
        std::process::exit(2);
    }

    let underscores = config.get_boolean_property("underscores");
    let mut session = Session::connect(config).await.context("connect failed")?;

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            for key in keys_for_line(line.trim_end_matches('\r')) {
                if tx.send(key).is_err() {
                    return;
                }
            }
        }
    });

    let display = session.display_mut();
    display.set_terminal(Box::new(TextTerminal::new(std::io::stdout()).with_underscores(underscores)));
    display.set_key_source(rx);

    match session.run().await {
        Ok(SessionEnd::Quit) => info!("session closed by operator"),
        Ok(SessionEnd::Disconnected) => info!("host disconnected"),
        Err(e) => {
            error!("session failed: {e}");
            return Err(e.into());
        }
    }
    Ok(())
}
