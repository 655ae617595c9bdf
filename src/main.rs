use std::sync::Arc;

use chatsync::adapters::mock::ScriptedProvider;
use chatsync::adapters::{InMemoryStore, MemoryCache, TabHub};
use chatsync::{Collaborators, SyncConfig, SyncEngine};
use color_eyre::eyre::{eyre, Result, WrapErr};
use tracing::info;
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const HUB_CAPACITY: usize = 256;
const MAX_TABS: usize = 16;

/// Command-line options for the simulation.
struct Options {
    tabs: usize,
    message: String,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            tabs: 3,
            message: "Hello".to_string(),
        }
    }
}

fn usage() -> String {
    format!(
        "chatsync {}\n\nUSAGE:\n    chatsync [--tabs N] [--message TEXT]\n\n\
         Runs N simulated tabs against one in-memory store, sends TEXT from the\n\
         first tab and prints what every tab converged to.\n\n\
         Logging is controlled by CHATSYNC_LOG (default: info).",
        VERSION
    )
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Option<Options>> {
    let mut options = Options::default();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" => {
                println!("chatsync {}", VERSION);
                return Ok(None);
            }
            "--help" | "-h" => {
                println!("{}", usage());
                return Ok(None);
            }
            "--tabs" => {
                let value = args.next().ok_or_else(|| eyre!("--tabs needs a value"))?;
                let tabs: usize = value
                    .parse()
                    .wrap_err_with(|| format!("invalid tab count '{}'", value))?;
                if tabs == 0 || tabs > MAX_TABS {
                    return Err(eyre!("tab count must be between 1 and {}", MAX_TABS));
                }
                options.tabs = tabs;
            }
            "--message" => {
                options.message = args.next().ok_or_else(|| eyre!("--message needs a value"))?;
            }
            other => return Err(eyre!("unknown argument '{}'\n\n{}", other, usage())),
        }
    }
    Ok(Some(options))
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("CHATSYNC_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let Some(options) = parse_args(std::env::args().skip(1))? else {
        return Ok(());
    };
    init_logging();

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(simulate(options))
}

async fn simulate(options: Options) -> Result<()> {
    let hub = TabHub::new(HUB_CAPACITY);
    let store = Arc::new(InMemoryStore::new());
    let config = SyncConfig::from_env();

    let mut tabs = Vec::with_capacity(options.tabs);
    for n in 1..=options.tabs {
        let provider = ScriptedProvider::new();
        provider.push_reply(&["Echo", ": ", &options.message]);
        let collaborators = Collaborators {
            remote: store.clone(),
            local: Arc::new(MemoryCache::new()),
            transport: Arc::new(hub.connect(format!("tab-{}", n))),
            board: hub.board(),
            provider: Arc::new(provider),
            probe: None,
        };
        let mut engine = SyncEngine::new(config.clone(), collaborators);
        engine.start().await;
        tabs.push(engine);
    }

    let (first, siblings) = tabs
        .split_first_mut()
        .ok_or_else(|| eyre!("no tabs to simulate"))?;

    let local_id = first.create_conversation("Demo conversation").await?;
    first.select_conversation(&local_id).await?;
    first.run_until_idle().await;
    let thread_id = first
        .state()
        .active_thread
        .clone()
        .ok_or_else(|| eyre!("conversation was not selected"))?;
    info!("Conversation {} confirmed as {}", local_id, thread_id);

    for tab in siblings.iter_mut() {
        tab.run_until_idle().await;
        tab.select_conversation(&thread_id).await?;
    }

    first.send_message(&thread_id, &options.message).await?;
    settle(&mut tabs).await;

    for tab in &tabs {
        print_tab(tab);
    }
    for tab in tabs.iter_mut() {
        tab.shutdown().await;
    }
    Ok(())
}

/// Let every tab catch up with the others until nothing moves.
async fn settle(tabs: &mut [SyncEngine]) {
    for _ in 0..4 {
        for tab in tabs.iter_mut() {
            tab.run_until_idle().await;
        }
    }
}

fn print_tab(tab: &SyncEngine) {
    let state = tab.state();
    println!(
        "[{}]{} threads={} pending={} peers={}",
        state.tab_id,
        if state.is_leader { " leader" } else { "" },
        state.threads.len(),
        state.pending_operation_count(),
        state.peers.len(),
    );
    for message in &state.messages {
        println!(
            "    {:<9} {:<40} {:?}",
            format!("{:?}", message.role),
            message.content,
            message.status
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_args_defaults() {
        let options = parse_args(args(&[])).unwrap().unwrap();
        assert_eq!(options.tabs, 3);
        assert_eq!(options.message, "Hello");
    }

    #[test]
    fn test_parse_args_values() {
        let options = parse_args(args(&["--tabs", "2", "--message", "Hi there"]))
            .unwrap()
            .unwrap();
        assert_eq!(options.tabs, 2);
        assert_eq!(options.message, "Hi there");
    }

    #[test]
    fn test_parse_args_rejects_bad_input() {
        assert!(parse_args(args(&["--tabs", "0"])).is_err());
        assert!(parse_args(args(&["--tabs", "many"])).is_err());
        assert!(parse_args(args(&["--message"])).is_err());
        assert!(parse_args(args(&["--frobnicate"])).is_err());
    }

    #[test]
    fn test_version_flag_stops_early() {
        assert!(parse_args(args(&["--version"])).unwrap().is_none());
    }
}
