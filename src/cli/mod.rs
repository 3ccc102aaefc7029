use clap::{Parser, Subcommand};
use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use crate::config;
use crate::http::server::HttpServer;
use crate::storage::fs::scan_library;
use crate::storage::watched::WatchedStore;
use crate::sweep::Sweeper;

#[derive(Parser)]
#[command(name = "vidsweep")]
#[command(version = "0.1")]
#[command(about = "Local video server that remembers what you watched and sweeps it away")]
pub struct Cli {
    /// Path to the config TOML file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show library and watched-store counters
    Status,
    /// Run http server hosting the library
    Serve,
    /// List unwatched videos on the computer
    List {
        /// Include videos already marked watched
        #[arg(short, long)]
        all: bool,
    },
}

/// Loads the config and pins the library root to one canonical absolute
/// form, so every root-derived path compares equal no matter how the
/// root was spelled.
fn load_config(path: &Path) -> config::Config {
    let mut cfg = config::Config::load(path).unwrap();
    cfg.library.root =
        std::fs::canonicalize(&cfg.library.root).expect("Media root is not accessible");
    cfg
}

/// Entrypoint for CLI
pub fn run() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let cfg = load_config(&cli.config);

    match &cli.command {
        Commands::Status {} => {
            let store = WatchedStore::new(&cfg.database).expect("Failed to initialize storage");
            let watched = store.list_all().unwrap();

            // One walk gives both counters; the store may know fingerprints
            // of files no longer on disk, so membership is checked per file.
            let videos = scan_library(&cfg.library, &HashSet::new());
            let total = videos.len();
            let unwatched = videos
                .iter()
                .filter(|video| !watched.contains(&video.fingerprint))
                .count();

            println!("Library root: {}", cfg.library.root.to_string_lossy());
            println!(
                "Database contains {} watched entries",
                store.watched_count().unwrap()
            );
            println!("Filesystem contains {total} videos, {unwatched} unwatched");
        }

        Commands::Serve {} => {
            println!("Starting HTTP server...");

            let store = Arc::new(Mutex::new(
                WatchedStore::new(&cfg.database).expect("Failed to initialize storage"),
            ));
            let (sweeper, worker) = Sweeper::start(
                cfg.library.root.clone(),
                cfg.library.fingerprint_mtime,
                Arc::clone(&store),
            );

            let stop = Arc::new(AtomicBool::new(false));
            {
                let stop = Arc::clone(&stop);
                ctrlc::set_handler(move || {
                    log::info!("shutdown requested");
                    stop.store(true, Ordering::SeqCst);
                })
                .expect("Failed to install the Ctrl-C handler");
            }

            let http_server = HttpServer::new(store, Arc::clone(&sweeper), cfg.library, cfg.http);

            println!(
                "HTTP server running at http://{}:{}",
                http_server.config.bind_addr, http_server.config.port
            );
            http_server.run(stop).expect("HTTP server failed");

            // Queued files whose streams were still open when the server
            // stopped get one last chance here.
            worker.shutdown(&sweeper);
        }

        Commands::List { all } => {
            let store = WatchedStore::new(&cfg.database).expect("Failed to initialize storage");

            let watched = if *all || !cfg.library.skip_watched {
                HashSet::new()
            } else {
                store.list_all().unwrap()
            };

            let videos = scan_library(&cfg.library, &watched);
            for video in &videos {
                println!("{} ({})", video.path.to_string_lossy(), video.mime);
            }
            if videos.is_empty() {
                println!("No videos found :(");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use tempfile::tempdir;

    #[test]
    fn test_load_config_canonicalizes_the_library_root() -> anyhow::Result<()> {
        let tmp = tempdir()?;
        fs::create_dir(tmp.path().join("media"))?;
        fs::create_dir(tmp.path().join("elsewhere"))?;

        let contents = format!(
            r#"
version = 1

[library]
root = "{}"

[database]
in_memory = true

[http]
bind_addr = "127.0.0.1"
port = 5000
"#,
            tmp.path().join("elsewhere/../media").display()
        );
        let config_path = tmp.path().join("config.toml");
        fs::write(&config_path, contents)?;

        let cfg = load_config(&config_path);

        assert!(cfg.library.root.is_absolute());
        assert_eq!(
            cfg.library.root,
            fs::canonicalize(tmp.path().join("media"))?
        );
        Ok(())
    }
}
