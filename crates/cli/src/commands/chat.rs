//! `copanel chat` — Interactive or single-message chat through the shell.

use std::io::Write;
use std::sync::Arc;

use copanel_backend::HttpChatBackend;
use copanel_chat::Shell;
use copanel_config::AppConfig;
use copanel_core::{ChatMessage, FeatureId, Role, SessionStore, ShellEvent};
use copanel_storage::FileSessionStore;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::debug;

pub async fn run(
    feature: Option<String>,
    message: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    let backend = HttpChatBackend::from_config(&config.backend)
        .map_err(|e| format!("Failed to create backend client: {e}"))?;
    let store: Option<Arc<dyn SessionStore>> = config
        .session
        .persist
        .then(|| Arc::new(FileSessionStore::new(config.session.store_path())) as Arc<dyn SessionStore>);

    debug!(backend = %config.backend.base_url, persist = config.session.persist, "Starting chat");
    let shell = Shell::new(config.clone(), Arc::new(backend), store);
    let mut events = shell.subscribe();

    if let Some(name) = feature {
        let id: FeatureId = name.parse()?;
        shell.switch_to(id).await;
    }
    if shell.chat().restore().await {
        println!(
            "  Restored session ({} messages)",
            shell.chat().history().await.len()
        );
    }

    if let Some(msg) = message {
        eprint!("  Thinking...");
        let reply = shell.send(&msg).await;
        eprint!("\r              \r");
        print_reply(reply.as_ref());
        print_routed(&mut events);
        return Ok(());
    }

    println!();
    println!("  copanel — Interactive Chat");
    println!();
    println!("  Backend:   {}", config.backend.base_url);
    println!("  Feature:   {}", shell.active_feature());
    println!();
    println!("  Commands:  /feature <name>   switch feature");
    println!("             /new              start a new session");
    println!("             exit              quit");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt()?;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => {}
            "exit" | "quit" => break,
            "/new" => {
                shell.chat().start_new_session(Some(shell.active_feature())).await;
                println!("  Started a new session\n");
            }
            _ if line.starts_with("/feature") => {
                let name = line.trim_start_matches("/feature").trim();
                match name.parse::<FeatureId>() {
                    Ok(id) => {
                        // The live conversation carries over; a fresh one
                        // picks up the feature's stored session.
                        let active = shell.switch_feature(id).await;
                        println!("  Active feature: {active}\n");
                    }
                    Err(e) => eprintln!("  [Error] {e}\n"),
                }
            }
            text => {
                eprint!("  ...");
                let reply = shell.send(text).await;
                eprint!("\r     \r");
                print_reply(reply.as_ref());
                print_routed(&mut events);
            }
        }
        prompt()?;
    }

    Ok(())
}

fn prompt() -> std::io::Result<()> {
    print!("  You > ");
    std::io::stdout().flush()
}

fn print_reply(reply: Option<&ChatMessage>) {
    let Some(reply) = reply else {
        eprintln!("  (nothing sent)");
        return;
    };
    let label = match reply.role {
        Role::System => "System",
        _ => "Assistant",
    };
    println!();
    for line in reply.text().lines() {
        println!("  {label} > {line}");
    }
    println!();
}

/// Print shared-state writes and cache invalidations published since the last call.
fn print_routed(events: &mut broadcast::Receiver<Arc<ShellEvent>>) {
    loop {
        match events.try_recv() {
            Ok(event) => match event.as_ref() {
                ShellEvent::SharedStateUpdated { key, .. } => println!("  [context] {key} updated"),
                ShellEvent::CacheInvalidated { keys, .. } => {
                    println!("  [context] invalidate {}", keys.join(", "))
                }
                _ => {}
            },
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
}
