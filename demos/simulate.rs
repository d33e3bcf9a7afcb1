//! Drives the engine against the in-memory host: a login in the normal
//! partition shows up in an open private window once the debounce settles.
//!
//! Run with `RUST_LOG=csync=debug cargo run --example simulate`.

use std::sync::Arc;
use std::time::Duration;

use csync::cookies::{CookieRecord, InMemoryCookieStore, PartitionId};
use csync::storage::{JsonFileStore, StorageArea};
use csync::tab::InMemoryTabs;
use csync::{
    CsyncEngine, EngineConfig, EngineEvent, HostServices, InMemoryConfigStore, LogNotifier, SystemClock,
    TokioTimerService,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("csync=info")).init();

    // Short delays so the demo finishes quickly.
    let config = EngineConfig::builder()
        .debounce_delay(Duration::from_millis(300))
        .max_debounce_wait(Duration::from_secs(2))
        .sync_cooldown(Duration::from_millis(500))
        .init_cache_delay(Duration::from_millis(100))
        .build()?;

    let dir = tempfile::tempdir()?;
    let store = JsonFileStore::open(dir.path().join("csync.json"))?;
    let clock = Arc::new(SystemClock);
    let timers = TokioTimerService::persistent(clock.clone(), store.clone(), config.timers_key());

    let cookies = InMemoryCookieStore::new(config.normal_partition.clone());
    let tabs = InMemoryTabs::new();
    let sites = InMemoryConfigStore::new(["shop.test"]);

    let services = HostServices {
        clock,
        store,
        cookies: cookies.clone(),
        tabs: tabs.clone(),
        pages: tabs.clone(),
        timers,
        notifier: Arc::new(LogNotifier),
        config_store: sites,
    };

    let engine = CsyncEngine::new(config, services);
    let mut events = engine.subscribe_events();
    let (handle, join) = engine.start()?;

    let private = PartitionId::new("1");
    cookies.open_partition(private.clone());
    let page = tabs.open("https://shop.test/", private.clone());

    // The user logs in in a normal window.
    let normal = tabs.open("https://shop.test/login", "0");
    if let Some(area) = tabs.local_storage(normal) {
        area.set_item("cart", "[42]")?;
    }
    cookies.set_cookie("0", CookieRecord::new("session", "s3cr3t", "shop.test").secure(true).http_only(true));
    cookies.set_cookie("0", CookieRecord::new("theme", "dark", ".shop.test"));

    let wait = async {
        while let Ok(event) = events.recv().await {
            match event {
                EngineEvent::BatchProcessed(outcome) if !outcome.synced.is_empty() => {
                    for report in &outcome.synced {
                        log::info!(
                            "Batch ({}) synced {} cookies and {} localStorage items for {}",
                            outcome.reason,
                            report.cookies_synced,
                            report.local_storage_synced,
                            report.site
                        );
                    }
                    break;
                }
                EngineEvent::Warning { message } => log::warn!("{message}"),
                _ => {}
            }
        }
    };
    if tokio::time::timeout(Duration::from_secs(5), wait).await.is_err() {
        log::warn!("No batch within 5s");
    }

    for cookie in cookies.cookies(&private) {
        println!("private: {}={} ({})", cookie.name, cookie.value, cookie.domain);
    }
    if let Some(area) = tabs.local_storage(page) {
        for item in area.items() {
            println!("private localStorage: {}={}", item.key, item.value);
        }
    }

    let status = handle.request_status("www.shop.test").await?;
    println!("status: {}", serde_json::to_string_pretty(&status)?);

    let report = handle.request_manual_sync("shop.test").await?;
    println!("manual sync: {}", serde_json::to_string(&report)?);

    let verification = handle.verify("shop.test").await?;
    println!("in sync: {}", verification.in_sync());

    handle.shutdown().await?;
    join.await?;
    Ok(())
}
