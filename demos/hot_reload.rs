//! Demo: file → text → json pipeline with hot reload
//!
//! Loads a JSON settings file through three chained registries, edits the
//! file on disk and lets the watcher push the change through the chain.

use asset_registry::assets::AssetKeys;
use asset_registry::{HotReloadWatcher, Registries};
use std::fs;
use std::thread;
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let root = std::env::temp_dir().join("asset_registry_demo");
    fs::create_dir_all(&root)?;
    fs::write(root.join("settings.json"), r#"{ "volume": 3, "fullscreen": false }"#)?;

    let mut registries = Registries::new();
    let keys = AssetKeys::register(&mut registries, &root)?;

    let settings = registries.acquire(keys.json, "settings.json")?;
    println!("Loaded settings: {}", settings.value);

    let mut watcher = HotReloadWatcher::new(keys.files);
    watcher.force_check(&mut registries)?;
    println!("Watching {} file(s) under {}", watcher.tracked(), root.display());

    // Make sure the new write lands on a later mtime tick.
    thread::sleep(Duration::from_millis(1100));
    fs::write(root.join("settings.json"), r#"{ "volume": 9, "fullscreen": true }"#)?;

    let reloaded = watcher.force_check(&mut registries)?;
    println!("Reloaded {reloaded} file(s)");
    println!("Settings now: {}", registries.get(keys.json, "settings.json")?.value);

    for key in [keys.files.id(), keys.texts.id(), keys.json.id()] {
        let stats = registries.stats(key)?;
        println!(
            "{:>6}: {} live, {} reloads, hit ratio {:.2}",
            registries.label(key)?,
            stats.live_slots,
            stats.reloads,
            stats.hit_ratio()
        );
    }

    registries.shutdown();
    fs::remove_dir_all(&root)?;
    Ok(())
}
