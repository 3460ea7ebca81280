//! volsync - Peer-to-peer volume metadata store
//!
//! Usage:
//!   volsync init                          - Create a config and identity
//!   volsync volume create <name>          - Create a volume
//!   volsync peer add <public_key>         - Register a peer
//!   volsync fs mkdir <volume> <path>      - Create a directory
//!   volsync sync <volume> [path]          - Print the sync stream of a directory
//!   volsync snapshot create <volume> <n>  - Snapshot a volume

use clap::{Parser, Subcommand};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use volsync::{
    chunk::{ChunkStore, DirChunkStore},
    config::Config,
    db::{BucketNames, Db, PeerId, PublicKey, SharingKey, VolumeId, ROOT_INODE},
    fs::{path, Volume},
    Error, Result,
};

#[derive(Parser)]
#[command(name = "volsync")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Peer-to-peer volume metadata store")]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a configuration with a fresh identity
    Init {
        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },

    /// Manage volumes
    #[command(subcommand)]
    Volume(VolumeCommands),

    /// Manage peers
    #[command(subcommand)]
    Peer(PeerCommands),

    /// Modify a volume's directory tree
    #[command(subcommand)]
    Fs(FsCommands),

    /// Print the sync stream of a directory as JSON lines
    Sync {
        /// Volume name
        volume: String,

        /// Directory inside the volume
        #[arg(default_value = "")]
        path: String,
    },

    /// Manage snapshots
    #[command(subcommand)]
    Snapshot(SnapshotCommands),
}

#[derive(Subcommand)]
enum VolumeCommands {
    /// Create a volume
    Create {
        name: String,

        /// Storage location for the default backend
        #[arg(long, default_value = "local")]
        storage: String,

        /// Sharing key of the default backend (hex)
        #[arg(long, default_value = "")]
        sharing_key: String,
    },

    /// List volumes
    List,

    /// Show a volume
    Show { name: String },
}

#[derive(Subcommand)]
enum PeerCommands {
    /// Register a peer by public key (hex)
    Add { public_key: String },

    /// Authorize a peer for a volume
    Allow { peer: u32, volume: String },

    /// Revoke a peer's authorization for a volume
    Deny { peer: u32, volume: String },

    /// List peers
    List,
}

#[derive(Subcommand)]
enum FsCommands {
    /// Create a directory
    Mkdir { volume: String, path: String },

    /// Store a local file's content under a path
    Put {
        volume: String,
        path: String,
        /// Local file to read
        source: PathBuf,
    },

    /// Remove a file or empty directory
    Rm { volume: String, path: String },
}

#[derive(Subcommand)]
enum SnapshotCommands {
    /// Snapshot a volume's directory tree
    Create { volume: String, name: String },

    /// List a volume's snapshots
    List { volume: String },
}

fn main() {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .as_ref()
        .map(expand_tilde)
        .unwrap_or_else(Config::default_path);

    let config = Config::load(&config_path).ok();
    if let Err(e) = init_logging(cli.verbose, config.as_ref()) {
        eprintln!("Failed to set up logging: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = run_command(cli.command, &config_path) {
        error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Install the global subscriber; logs go to stderr or the configured file.
/// `RUST_LOG` overrides the configured level.
fn init_logging(verbose: bool, config: Option<&Config>) -> Result<()> {
    let level = if verbose {
        Level::DEBUG
    } else {
        config
            .and_then(|c| c.logging.level.parse::<Level>().ok())
            .unwrap_or(Level::INFO)
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    let file = config.and_then(|c| c.logging.file.clone());
    let result = match file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .finish();
            tracing::subscriber::set_global_default(subscriber)
        }
        None => {
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)
        }
    };
    result.map_err(|e| Error::Config(e.to_string()))
}

fn run_command(command: Commands, config_path: &Path) -> Result<()> {
    match command {
        Commands::Init { force } => cmd_init(config_path, force),

        Commands::Volume(cmd) => {
            let ctx = Context::open(config_path)?;
            match cmd {
                VolumeCommands::Create {
                    name,
                    storage,
                    sharing_key,
                } => cmd_volume_create(&ctx, &name, &storage, &sharing_key),
                VolumeCommands::List => cmd_volume_list(&ctx),
                VolumeCommands::Show { name } => cmd_volume_show(&ctx, &name),
            }
        }

        Commands::Peer(cmd) => {
            let ctx = Context::open(config_path)?;
            match cmd {
                PeerCommands::Add { public_key } => cmd_peer_add(&ctx, &public_key),
                PeerCommands::Allow { peer, volume } => cmd_peer_grant(&ctx, peer, &volume, true),
                PeerCommands::Deny { peer, volume } => cmd_peer_grant(&ctx, peer, &volume, false),
                PeerCommands::List => cmd_peer_list(&ctx),
            }
        }

        Commands::Fs(cmd) => {
            let ctx = Context::open(config_path)?;
            match cmd {
                FsCommands::Mkdir { volume, path } => cmd_mkdir(&ctx, &volume, &path),
                FsCommands::Put {
                    volume,
                    path,
                    source,
                } => cmd_put(&ctx, &volume, &path, &source),
                FsCommands::Rm { volume, path } => cmd_rm(&ctx, &volume, &path),
            }
        }

        Commands::Sync { volume, path } => {
            let ctx = Context::open(config_path)?;
            cmd_sync(&ctx, &volume, &path)
        }

        Commands::Snapshot(cmd) => {
            let ctx = Context::open(config_path)?;
            match cmd {
                SnapshotCommands::Create { volume, name } => {
                    cmd_snapshot_create(&ctx, &volume, &name)
                }
                SnapshotCommands::List { volume } => cmd_snapshot_list(&ctx, &volume),
            }
        }
    }
}

/// Loaded configuration and open database
struct Context {
    config: Config,
    db: Db,
}

impl Context {
    fn open(config_path: &Path) -> Result<Self> {
        let config = Config::load(config_path)?;
        config.ensure_directories()?;
        let db = Db::open(&config.db_path, BucketNames::default())?;
        Ok(Context { config, db })
    }

    fn volume_id(&self, name: &str) -> Result<VolumeId> {
        self.db.view(|tx| Ok(tx.volumes()?.get_by_name(name)?.id()))
    }

    fn open_volume(&self, name: &str) -> Result<Volume> {
        let id = self.volume_id(name)?;
        Ok(Volume::open(self.db.clone(), &id, &self.config.identity.public_key)?
            .with_max_batch(self.config.sync.batch_size))
    }

    fn chunks(&self) -> Result<DirChunkStore> {
        DirChunkStore::open(&self.config.chunk_dir)
    }
}

fn cmd_init(config_path: &Path, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        return Err(Error::Config(format!(
            "{:?} exists already (use --force to overwrite)",
            config_path
        )));
    }

    info!("Initializing volsync...");
    let config = Config::from_env()?;

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    config.save(config_path)?;
    config.ensure_directories()?;

    info!("Configuration saved to {:?}", config_path);
    info!("Data directory: {:?}", config.data_dir);
    println!("Public key: {}", config.identity.public_key);
    Ok(())
}

fn cmd_volume_create(ctx: &Context, name: &str, storage: &str, sharing_key: &str) -> Result<()> {
    let key = hex::decode(sharing_key.trim())
        .map_err(|e| Error::InvalidConfig(format!("invalid sharing key: {}", e)))?;
    let key = SharingKey::new(key);
    let id = ctx
        .db
        .update(|tx| Ok(tx.volumes()?.create(name, storage, &key)?.id()))?;
    ctx.db.flush()?;
    println!("{}", id);
    Ok(())
}

fn cmd_volume_list(ctx: &Context) -> Result<()> {
    for (name, id) in ctx.db.view(|tx| tx.volumes()?.list())? {
        println!("{}\t{}", name, id);
    }
    Ok(())
}

fn cmd_volume_show(ctx: &Context, name: &str) -> Result<()> {
    ctx.db.view(|tx| {
        let volume = tx.volumes()?.get_by_name(name)?;
        println!("Volume: {}", name);
        println!("ID: {}", volume.id());
        println!("Epoch: {}", volume.epoch()?);
        for (backend, storage) in volume.storage()?.list()? {
            println!("Storage {}: {}", backend, storage.location);
        }
        println!("Snapshots: {}", volume.snapshots()?.list()?.len());
        Ok(())
    })
}

fn cmd_peer_add(ctx: &Context, public_key: &str) -> Result<()> {
    let key = PublicKey::from_hex(public_key)?;
    let peer = ctx.db.update(|tx| tx.peers()?.make(&key))?;
    ctx.db.flush()?;
    println!("{}", peer.id);
    Ok(())
}

fn cmd_peer_grant(ctx: &Context, peer: u32, volume: &str, allow: bool) -> Result<()> {
    let id = ctx.volume_id(volume)?;
    ctx.db.update(|tx| {
        let peers = tx.peers()?;
        if allow {
            peers.allow(PeerId(peer), &id)
        } else {
            peers.deny(PeerId(peer), &id)
        }
    })?;
    ctx.db.flush()?;
    info!(
        "Peer {} {} for volume {}",
        peer,
        if allow { "allowed" } else { "denied" },
        volume
    );
    Ok(())
}

fn cmd_peer_list(ctx: &Context) -> Result<()> {
    ctx.db.view(|tx| {
        for peer in tx.peers()?.iter()? {
            let peer = peer?;
            println!("{}\t{}", peer.id, peer.pub_key);
        }
        Ok(())
    })
}

/// Resolve the parent directory of `path`, returning its inode and the last segment
fn split_parent(volume: &Volume, target: &str) -> Result<(u64, String)> {
    let mut segments = path::clean(target);
    let name = segments
        .pop()
        .ok_or_else(|| Error::InvalidName(target.to_string()))?
        .to_string();
    if segments.is_empty() {
        return Ok((ROOT_INODE, name));
    }
    let parent_path = segments.join("/");
    match volume.lookup(&parent_path)? {
        Some(dirent) if dirent.is_dir() => Ok((dirent.inode, name)),
        _ => Err(Error::PathNotFound(parent_path)),
    }
}

fn cmd_mkdir(ctx: &Context, volume: &str, target: &str) -> Result<()> {
    let volume = ctx.open_volume(volume)?;
    let (parent, name) = split_parent(&volume, target)?;
    let inode = volume.mkdir(parent, &name)?;
    ctx.db.flush()?;
    info!("Created {} (inode {})", target, inode);
    Ok(())
}

fn cmd_put(ctx: &Context, volume: &str, target: &str, source: &Path) -> Result<()> {
    let volume = ctx.open_volume(volume)?;
    let (parent, name) = split_parent(&volume, target)?;
    let data = std::fs::read(source)?;
    let key = ctx.chunks()?.add(&data)?;
    let inode = volume.create_file(parent, &name, key.as_bytes().to_vec())?;
    ctx.db.flush()?;
    info!("Stored {} ({} bytes, inode {})", target, data.len(), inode);
    Ok(())
}

fn cmd_rm(ctx: &Context, volume: &str, target: &str) -> Result<()> {
    let volume = ctx.open_volume(volume)?;
    let (parent, name) = split_parent(&volume, target)?;
    volume.remove(parent, &name)?;
    ctx.db.flush()?;
    info!("Removed {}", target);
    Ok(())
}

fn cmd_sync(ctx: &Context, volume: &str, dir: &str) -> Result<()> {
    let volume = ctx.open_volume(volume)?;
    volume.sync_send(dir, |item| {
        println!("{}", serde_json::to_string(&item)?);
        Ok(())
    })?;
    ctx.db.flush()
}

fn cmd_snapshot_create(ctx: &Context, volume: &str, name: &str) -> Result<()> {
    let volume = ctx.open_volume(volume)?;
    let chunks = ctx.chunks()?;
    let record = volume.snapshot(name, &chunks)?;
    ctx.db.flush()?;
    println!("{}\t{}", record.name, record.root_manifest()?);
    Ok(())
}

fn cmd_snapshot_list(ctx: &Context, volume: &str) -> Result<()> {
    let volume = ctx.open_volume(volume)?;
    for record in volume.snapshots()? {
        println!(
            "{}\t{}\t{}",
            record.name,
            record.created.format("%Y-%m-%d %H:%M:%S"),
            record.root_manifest()?
        );
    }
    Ok(())
}

/// Expand a leading `~` to the home directory
fn expand_tilde(path: &PathBuf) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.clone()
}
