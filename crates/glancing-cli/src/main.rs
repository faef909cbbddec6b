mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{EXIT_CONFIG_ERROR, EXIT_FAILURE};
use glancing_core::{ImportOptions, Settings};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "glancing",
    version,
    about = "Verify marketplace VM images and keep a Glance registry in sync"
)]
struct Cli {
    /// Settings file (default: $GLANCING_CONFIG, then /etc/glancing/glancing.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

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
    /// Verify one image and import it into the registry.
    Import {
        /// Import even if the size or a checksum does not match.
        #[arg(short, long, default_value_t = false, conflicts_with = "dry_run")]
        force: bool,
        /// Verify only, never touch the registry.
        #[arg(short, long, default_value_t = false)]
        dry_run: bool,
        /// Skip checksum verification.
        #[arg(short = 'D', long, default_value_t = false)]
        no_checksum: bool,
        /// Registry name of the image.
        #[arg(short, long)]
        name: Option<String>,
        /// Keep downloaded and decompressed files.
        #[arg(short, long, default_value_t = false)]
        keep_temps: bool,
        /// Expected digests, colon separated (md5, sha1, sha224, sha256, sha384 or sha512).
        #[arg(short = 's', long = "sums")]
        digests: Option<String>,
        /// Checksum files (paths or URLs) listing `<digest> <filename>` lines.
        #[arg(short = 'S', long = "sums-file", value_delimiter = ',')]
        sums_files: Vec<String>,
        /// Marketplace metadata endpoint (overrides the settings file).
        #[arg(short = 'u', long)]
        url: Option<String>,
        /// Directory receiving backups of replaced images.
        #[arg(long)]
        backup_dir: Option<PathBuf>,
        /// Marketplace id, JSON or XML descriptor file, image URL or local image.
        descriptor: String,
    },
    /// Reconcile every image listed in the image lists with the registry.
    Sync {
        /// Image list file, may be repeated (overrides the settings file).
        #[arg(short = 'l', long)]
        vmlist: Vec<PathBuf>,
        /// Marketplace metadata endpoint (overrides the settings file).
        #[arg(short = 'u', long)]
        url: Option<String>,
        /// Directory receiving backups of replaced images.
        #[arg(long)]
        backup_dir: Option<PathBuf>,
        /// Keep downloaded and decompressed files.
        #[arg(short, long, default_value_t = false)]
        keep_temps: bool,
    },
    /// Delete every image with one of the given names or ids.
    Delete {
        /// Image names or ids.
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// List registered images with their version and marketplace id.
    List,
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

fn run_command(command: Commands, mut settings: Settings, json: bool) -> Result<u8, String> {
    match command {
        Commands::Import {
            force,
            dry_run,
            no_checksum,
            name,
            keep_temps,
            digests,
            sums_files,
            url,
            backup_dir,
            descriptor,
        } => {
            if let Some(url) = url {
                settings.marketplace_url = url;
            }
            if let Some(dir) = backup_dir {
                settings.backup_dir = dir;
            }
            let mut options = ImportOptions {
                force,
                dry_run,
                no_checksum,
                keep_temps: keep_temps || settings.keep_temps,
                name,
                sums_files,
                ..ImportOptions::default()
            };
            if let Some(ref list) = digests {
                options = options.with_digest_list(list);
            }
            commands::import::run(&settings, &descriptor, &options, json)
        }
        Commands::Sync {
            vmlist,
            url,
            backup_dir,
            keep_temps,
        } => {
            if !vmlist.is_empty() {
                settings.vmlists = vmlist;
            }
            if let Some(url) = url {
                settings.marketplace_url = url;
            }
            if let Some(dir) = backup_dir {
                settings.backup_dir = dir;
            }
            settings.keep_temps |= keep_temps;
            commands::sync::run(&settings, json)
        }
        Commands::Delete { names } => commands::delete::run(&settings, &names, json),
        Commands::List => commands::list::run(&settings, json),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
    }
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

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
            tracing_subscriber::EnvFilter::try_from_env("GLANCING_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
        command => commands::load_settings(cli.config.as_deref())
            .and_then(|settings| run_command(command, settings, cli.json)),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with(commands::CONFIG_ERROR_PREFIX) {
                EXIT_CONFIG_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}
