#![allow(dead_code, unused_imports)]

use asset_registry::assets::AssetKeys;
use asset_registry::Registries;
use std::{fs, fs::File, path::Path, time::Instant};

#[cfg(feature = "profiling")]
use tracing_subscriber::{self, prelude::*};

const FILES: usize = 500;

fn write_assets(root: &Path, version: usize) -> std::io::Result<()> {
    for i in 0..FILES {
        fs::write(
            root.join(format!("asset_{i}.json")),
            format!(r#"{{ "id": {i}, "version": {version} }}"#),
        )?;
    }
    Ok(())
}

#[cfg(feature = "profiling")]
#[tracing::instrument(skip(registries, keys))]
fn profile_reloads(registries: &mut Registries, keys: AssetKeys, count: usize) {
    let _span = tracing::info_span!("reload_loop", count = count).entered();
    for i in 0..count {
        if i % 100 == 0 {
            tracing::info!("Reloading asset {}/{}", i, count);
        }
        let name = format!("asset_{i}.json");
        if let Err(err) = registries.reload(keys.files, &name) {
            tracing::error!(%err, name, "reload failed");
        }
    }
}

#[cfg(feature = "profiling")]
fn main() {
    // Set up tracing subscriber to write to a file
    let file = File::create("trace.json").unwrap();
    let (non_blocking, _guard) = tracing_appender::non_blocking(file);
    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_max_level(tracing::Level::TRACE)
        .init();

    let root = std::env::temp_dir().join(format!("asset_registry_profile_{}", std::process::id()));
    fs::create_dir_all(&root).unwrap();
    write_assets(&root, 0).unwrap();

    let mut registries = Registries::new();
    let keys = AssetKeys::register(&mut registries, &root).unwrap();

    println!("Loading {FILES} json assets...");
    {
        let _span = tracing::info_span!("load").entered();
        for i in 0..FILES {
            registries.acquire(keys.json, &format!("asset_{i}.json")).unwrap();
        }
    }

    write_assets(&root, 1).unwrap();
    println!("Profiling cascading reload...");
    let start = Instant::now();
    profile_reloads(&mut registries, keys, FILES);
    println!("Reloaded {FILES} file → text → json chains in: {:?}", start.elapsed());

    registries.shutdown();
    fs::remove_dir_all(&root).ok();
}

#[cfg(not(feature = "profiling"))]
fn main() {
    println!("profile_reload binary requires --features profiling");
}
