use anyhow::{Context, Result};
use cadenza_core::{init_logging, AppDirs, Config};
use cadenza_host::{
    Connection, HostContext, ManifestCatalog, PluginCatalog, PluginDescriptor,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Parser)]
#[command(name = "cadenza", version, about = "Media player plugin host")]
struct Cli {
    /// Additional plugin directory (may be repeated)
    #[arg(long = "plugins-dir", global = true)]
    plugins_dirs: Vec<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Plugin discovery commands
    #[command(subcommand)]
    Plugins(PluginsCommand),
    /// Audio socket diagnostics
    #[command(subcommand)]
    Audio(AudioCommand),
    /// Find the provider that owns an entity reference
    Resolve(ResolveCommand),
}

#[derive(Debug, Subcommand)]
enum PluginsCommand {
    /// List installed plugin manifests without starting them
    List,
    /// Discover and bind every plugin, then report their state
    Scan {
        /// How long to wait for plugins to bind
        #[arg(long, default_value_t = 3000)]
        wait_ms: u64,
    },
}

#[derive(Debug, Subcommand)]
enum AudioCommand {
    /// Listen on a named audio socket and report what arrives
    Listen {
        name: String,
        /// Stop after this many seconds
        #[arg(long, default_value_t = 10)]
        seconds: u64,
    },
}

#[derive(Debug, Parser)]
struct ResolveCommand {
    reference: String,
    /// How long to wait for plugins to bind
    #[arg(long, default_value_t = 3000)]
    wait_ms: u64,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let dirs = AppDirs::discover()?;
    let mut config = Config::load_or_default(&dirs)?;
    config.plugins.extra_dirs.extend(cli.plugins_dirs.iter().cloned());
    let _logging = init_logging(&config.logging, &dirs)?;

    match cli.command {
        Command::Plugins(PluginsCommand::List) => {
            let mut roots = vec![dirs.plugins_dir().to_path_buf()];
            roots.extend(config.plugins.extra_dirs.iter().cloned());
            let catalog = ManifestCatalog::new(roots);
            let found = catalog.enumerate();
            if found.is_empty() {
                println!(
                    "No plugins found. Install plugins under {}.",
                    dirs.plugins_dir().display()
                );
            }
            for descriptor in &found {
                println!("{}", describe_descriptor(descriptor));
            }
        }
        Command::Plugins(PluginsCommand::Scan { wait_ms }) => {
            let context = HostContext::new(config, dirs).context("failed to start plugin host")?;
            context.discover();
            wait_for_binds(&context, Duration::from_millis(wait_ms));
            for connection in context.registry().connections() {
                println!("{}", describe_connection(&connection));
            }
            for plugin in context.registry().new_plugins() {
                println!("new: {plugin}");
            }
            context.shutdown();
        }
        Command::Audio(AudioCommand::Listen { name, seconds }) => {
            listen(&config, &dirs, &name, Duration::from_secs(seconds))?;
        }
        Command::Resolve(resolve) => {
            let context = HostContext::new(config, dirs).context("failed to start plugin host")?;
            context.discover();
            wait_for_binds(&context, Duration::from_millis(resolve.wait_ms));
            match context.aggregator().resolve_reference(&resolve.reference) {
                Some(owner) => println!("{} -> {owner}", resolve.reference),
                None => println!("{} -> (no provider)", resolve.reference),
            }
            context.shutdown();
        }
    }
    Ok(())
}

/// Waits until no connection is still binding, or the timeout passes.
fn wait_for_binds(context: &HostContext, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        let pending = context
            .registry()
            .connections()
            .iter()
            .any(|c| c.state() == cadenza_host::BoundState::Binding);
        if !pending {
            return;
        }
        thread::sleep(Duration::from_millis(50));
    }
    tracing::warn!(timeout_ms = timeout.as_millis() as u64, "some plugins are still binding");
}

#[cfg(unix)]
fn listen(config: &Config, dirs: &AppDirs, name: &str, duration: Duration) -> Result<()> {
    use cadenza_audio::{AudioSocketHost, HostOptions, NullSink};

    let socket_dir = config
        .audio
        .socket_dir
        .clone()
        .unwrap_or_else(|| dirs.socket_dir().to_path_buf());
    std::fs::create_dir_all(&socket_dir)
        .with_context(|| format!("failed to create {}", socket_dir.display()))?;
    let options = HostOptions {
        max_frame_bytes: config.audio.max_frame_bytes,
        pool_buffers: config.audio.pool_buffers,
    };
    let host = AudioSocketHost::new(name, &socket_dir, Box::new(NullSink::new()), options);
    host.start_listening()?;
    println!("Listening on {}", host.path().display());

    thread::sleep(duration);
    let stats = host.stats();
    host.release();
    println!(
        "connections: {}, frames: {}, bytes: {}, format changes: {}, framing errors: {}",
        stats.connections, stats.frames, stats.bytes, stats.format_changes, stats.framing_errors
    );
    Ok(())
}

#[cfg(not(unix))]
fn listen(_config: &Config, _dirs: &AppDirs, _name: &str, _duration: Duration) -> Result<()> {
    anyhow::bail!("audio sockets are only available on unix platforms")
}

fn describe_descriptor(descriptor: &PluginDescriptor) -> String {
    let name = descriptor.name.as_deref().unwrap_or("(unnamed)");
    let mut line = format!("{} [{}] {}", descriptor.key(), descriptor.kind, name);
    if let Some(author) = &descriptor.author {
        line.push_str(&format!(" by {author}"));
    }
    line
}

fn describe_connection(connection: &Arc<Connection>) -> String {
    let mut line = format!(
        "{} [{}] {}",
        connection.identifier().key(),
        connection.kind(),
        connection.state()
    );
    if let Some(socket) = connection.audio_socket_name() {
        line.push_str(&format!(" socket={socket}"));
    }
    line
}
