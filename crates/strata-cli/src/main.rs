mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{EXIT_FAILURE, EXIT_NOT_FOUND, EXIT_STORE_ERROR};
use std::path::PathBuf;
use std::process::ExitCode;
use strata_core::{install_signal_handler, StrataConfig};

#[derive(Debug, Parser)]
#[command(
    name = "strata",
    version,
    about = "Content-addressed squashfs layer store with overlay checkout"
)]
struct Cli {
    /// Configuration file (default: ~/.config/strata/config.toml if present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Repository root, overriding the configuration file.
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Mount implementation: "kernel" or "mock".
    #[arg(long, global = true)]
    mounter: Option<String>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create the repository layout if it does not exist.
    Init,
    /// Compress a directory into a new layer and store the resulting image.
    Create {
        /// Directory holding the layer's filesystem tree.
        dir: PathBuf,
        /// Tag to point at the new image.
        #[arg(long)]
        tag: Option<String>,
        /// Image (id or tag) to stack the new layer on.
        #[arg(long)]
        parent: Option<String>,
    },
    /// Print an image manifest.
    Lookup {
        /// Manifest id or tag.
        name: String,
    },
    /// Point a tag at an image.
    Tag {
        /// Tag to create or repoint.
        tag: String,
        /// Manifest id or existing tag.
        target: String,
    },
    /// List stored manifests and tags.
    List,
    /// Mount every layer of an image read-only.
    Mount {
        /// Manifest id or tag.
        name: String,
    },
    /// Unmount every layer of an image.
    Unmount {
        /// Manifest id or tag.
        name: String,
    },
    /// Check out an image as a writable root filesystem.
    Checkout {
        /// Manifest id or tag.
        name: String,
    },
    /// Unmount a checkout and discard its writable state.
    Release {
        /// Root directory printed by `checkout`.
        root: PathBuf,
    },
    /// Convert an exported foreign image into strata layers.
    Build {
        /// Image name inside the export directory.
        image: String,
        /// Export directory (<dir>/<image>/history.json and <id>.tar diffs).
        #[arg(long)]
        from: PathBuf,
        /// Tag to point at the built image.
        #[arg(long)]
        tag: Option<String>,
    },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("STRATA_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Completions { shell } = cli.command {
        return exit(commands::completions::run::<Cli>(shell));
    }

    install_signal_handler();

    let mut config = match StrataConfig::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(EXIT_FAILURE);
        }
    };
    if let Some(root) = cli.root {
        config.root = root;
    }
    if let Some(mounter) = cli.mounter {
        config.mounter = mounter;
    }
    let repo = match config.open_repository() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(EXIT_STORE_ERROR);
        }
    };
    let json = cli.json;

    let result = match cli.command {
        Commands::Init => commands::init::run(&repo, json),
        Commands::Create { dir, tag, parent } => {
            commands::create::run(&repo, &dir, tag.as_deref(), parent.as_deref(), json)
        }
        Commands::Lookup { name } => commands::lookup::run(&repo, &name),
        Commands::Tag { tag, target } => commands::tag::run(&repo, &tag, &target, json),
        Commands::List => commands::list::run(&repo, json),
        Commands::Mount { name } => commands::mount::run(&repo, &name, json),
        Commands::Unmount { name } => commands::unmount::run(&repo, &name),
        Commands::Checkout { name } => commands::checkout::run(&repo, &name, json),
        Commands::Release { root } => commands::release::run(&repo, &root),
        Commands::Build { image, from, tag } => {
            commands::build::run(&repo, &image, &from, tag.as_deref(), json)
        }
        Commands::Completions { .. } => Ok(commands::EXIT_SUCCESS),
    };
    exit(result)
}

fn exit(result: Result<u8, String>) -> ExitCode {
    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("image not found:") {
                EXIT_NOT_FOUND
            } else if msg.starts_with("store error:") {
                EXIT_STORE_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}
