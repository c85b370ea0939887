//! Wiring for the `prompter` binary: builds the store, the role, and the
//! stdin command loop.

use std::sync::Arc;
use std::time::Duration;

use realtime_store::{LocalStore, Store};
use sheet_source::{SheetClient, SheetError, SheetLocator, SheetRange, validate};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::cli::{Cli, Command, DisplayArgs, RemoteArgs, SessionArgs};
use crate::config::Config;
use crate::display::{DisplaySession, HeadlessSurface, KeyCommand};
use crate::error::PrompterError;
use crate::remote::{HELP, LogPanel, RemoteCommand, RemoteSession};
use crate::scroll::ScrollConfig;
use crate::session::{LaunchParams, LocalStorage, Role, SessionBinding, open_storage};
use crate::store::{ConnectionStatus, FirebaseStore, StatusBoard};

const RENDER_INTERVAL: Duration = Duration::from_secs(1);

pub async fn run(cli: Cli, config: Config) -> Result<(), PrompterError> {
    let Cli {
        store_url,
        store_auth,
        command,
        ..
    } = cli;
    let storage = open_storage(config.data_dir.clone());
    let backend = Backend {
        url: store_url,
        auth: store_auth,
    };

    match command {
        Command::Display(args) => run_display(args, backend, &config, storage).await,
        Command::Remote(args) => run_remote(args, backend, &config, storage).await,
        Command::Session(args) => {
            print_session(&args, storage.as_ref());
            Ok(())
        }
    }
}

struct Backend {
    url: Option<String>,
    auth: Option<String>,
}

impl Backend {
    fn build(&self, config: &Config) -> Result<Arc<dyn Store>, PrompterError> {
        match &self.url {
            Some(url) => {
                let store = FirebaseStore::new(url, self.auth.clone())?;
                store.spawn_probe(config.probe_interval());
                info!(target = "prompter::app", url = %url, "using realtime database");
                Ok(Arc::new(store))
            }
            None => {
                warn!(
                    target = "prompter::app",
                    "no store url configured; session state stays in this process"
                );
                Ok(Arc::new(LocalStore::new()))
            }
        }
    }
}

async fn fetch_script(config: &Config, sheet: &str, range: Option<&str>) -> Result<String, SheetError> {
    if !validate(sheet) {
        warn!(target = "prompter::app", sheet, "sheet link does not point at Google Sheets");
        return Err(SheetError::NotASheet {
            source_url: sheet.to_string(),
        });
    }
    let client = SheetClient::with_bases(&config.sheets_docs_base, &config.sheets_values_base)
        .with_api_key(config.sheets_api_key.clone());
    let mut locator = SheetLocator::parse(sheet)?;
    if let Some(range) = range {
        locator = locator.with_range(SheetRange::parse(range));
    }
    client.fetch(&locator).await
}

async fn run_display(
    args: DisplayArgs,
    backend: Backend,
    config: &Config,
    storage: Arc<dyn LocalStorage>,
) -> Result<(), PrompterError> {
    let launch = args.launch_params()?;
    let binding = SessionBinding::resolve(Role::Display, &launch, storage.as_ref());
    let status = StatusBoard::new(binding.token.clone());
    let surface = Arc::new(HeadlessSurface::new(args.viewport_height));
    let display = DisplaySession::new(
        binding,
        surface.clone(),
        config.sync_timing(),
        ScrollConfig::default(),
        status.clone(),
    );
    display.observe_viewport(surface.viewport());

    let Some(sheet) = launch.sheet.as_deref() else {
        display.show_missing_sheet();
        println!("{}", surface.text());
        return Ok(());
    };
    display.show_content(fetch_script(config, sheet, launch.range.as_deref()).await);
    println!("{}", surface.text());

    if display.is_local_only() {
        status.set(ConnectionStatus::LocalOnly);
    } else {
        let store = backend.build(config)?;
        if let Err(err) = display.connect(store, config.connect_policy()).await {
            warn!(target = "prompter::app", error = %err, "continuing without sync");
        }
    }
    eprintln!("[{}] keys: space play/pause, up/down nudge, r reset, f fullscreen, q quit", status.current());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut render = tokio::time::interval(RENDER_INTERVAL);
    let mut status_rx = status.subscribe();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let key = if line.trim().is_empty() { " " } else { line.trim() };
                if matches!(key, "q" | "quit" | "exit") {
                    break;
                }
                match KeyCommand::from_key(key) {
                    Some(command) => display.handle_key(command),
                    None => eprintln!("unknown key {key:?}"),
                }
            }
            _ = render.tick() => {
                let text = surface.text();
                let rows: Vec<&str> = text.lines().collect();
                let current = rows
                    .get(surface.viewport().first_visible_line(rows.len()))
                    .copied()
                    .unwrap_or_default();
                let state = if display.driver().is_running() { "playing" } else { "paused" };
                println!(
                    "[{:5.1}% {state} x{:.1}] {current}",
                    display.percent(),
                    display.engine().speed()
                );
            }
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                eprintln!("[status] {}", *status_rx.borrow_and_update());
            }
        }
    }
    display.shutdown();
    Ok(())
}

async fn run_remote(
    args: RemoteArgs,
    backend: Backend,
    config: &Config,
    storage: Arc<dyn LocalStorage>,
) -> Result<(), PrompterError> {
    let launch = args.launch.resolve(LaunchParams::default())?;
    let binding = SessionBinding::resolve(Role::Remote, &launch, storage.as_ref());
    println!("session: {}", binding.token);
    let status = StatusBoard::new(binding.token.clone());
    let remote = RemoteSession::new(
        binding,
        Arc::new(LogPanel),
        storage,
        config.sync_timing(),
        status.clone(),
    );

    let store = backend.build(config)?;
    if let Err(err) = remote.connect(store, config.connect_policy()).await {
        warn!(target = "prompter::app", error = %err, "remote is offline; commands stay local");
    }
    eprintln!("[{}] {HELP}", status.current());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut status_rx = status.subscribe();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let command = match line.parse::<RemoteCommand>() {
                    Ok(command) => command,
                    Err(err) => {
                        eprintln!("{err}");
                        continue;
                    }
                };
                if remote.execute(&command) {
                    continue;
                }
                match command {
                    RemoteCommand::Quit => break,
                    RemoteCommand::Help => eprintln!("{HELP}"),
                    _ => {
                        let state = remote.state();
                        println!(
                            "[{}] {} speed x{:.1} at {:.1}%",
                            status.current(),
                            if state.is_playing { "playing" } else { "paused" },
                            state.speed,
                            state.scroll_position
                        );
                    }
                }
            }
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                eprintln!("[status] {}", *status_rx.borrow_and_update());
            }
        }
    }
    remote.shutdown();
    Ok(())
}

fn print_session(args: &SessionArgs, storage: &dyn LocalStorage) {
    let launch = LaunchParams {
        session: args.session.clone(),
        ..LaunchParams::default()
    };
    let binding = SessionBinding::resolve(Role::Remote, &launch, storage);
    for line in share_links(&args.base_url, &binding.token, args.sheet.as_deref()) {
        println!("{line}");
    }
}

/// `session`, `display` and `remote` lines for sharing a session.
pub fn share_links(base_url: &str, token: &str, sheet: Option<&str>) -> Vec<String> {
    let base = base_url.trim_end_matches('/');
    let mut display_query = url::form_urlencoded::Serializer::new(String::new());
    display_query.append_pair("session", token);
    if let Some(sheet) = sheet {
        display_query.append_pair("sheet", sheet);
    }
    let mut remote_query = url::form_urlencoded::Serializer::new(String::new());
    remote_query.append_pair("session", token);
    vec![
        format!("session: {token}"),
        format!("display: {base}/display?{}", display_query.finish()),
        format!("remote:  {base}/remote?{}", remote_query.finish()),
    ]
}
