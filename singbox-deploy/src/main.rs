// SPDX-License-Identifier: AGPL-3.0-or-later
//! sbdeploy: deploy sing-box inbounds behind Caddy and print their share links

use std::io::{BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use singbox_deploy::{
    artifacts::COMMON_CONFIG_NAME,
    catalog,
    config::{LoggingConfig, DEFAULT_CONFIG_FILE},
    selection,
    share::qr_code_url,
    Config, DeployError, Deployer, State, TemplateSet,
};

/// sbdeploy: sing-box inbound deployment
///
/// Renders sing-box inbounds and a Caddy reverse-proxy site for a domain,
/// provisions the TLS key pair, and records share links.
#[derive(Parser, Debug)]
#[command(name = "sbdeploy")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// State file path (overrides the configured one)
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Render and install configs for a domain
    Deploy(DeployArgs),

    /// Show deployed inbounds
    #[command(alias = "ls")]
    List,

    /// Print share links and QR-code URLs
    Url {
        /// Filter by tag substring
        #[arg(long)]
        tag: Option<String>,

        /// Filter by inbound key (e.g. vless-ws-tls)
        #[arg(long = "type")]
        kind: Option<String>,
    },

    /// List supported inbound keys
    Keys,

    /// Show configuration
    Config,

    /// Initialize a new configuration file
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Show version information
    Version,
}

#[derive(Args, Debug)]
struct DeployArgs {
    /// Domain served by Caddy
    domain: String,

    /// Contact email (defaults to info@<domain>)
    #[arg(long)]
    email: Option<String>,

    /// Inbound keys to enable (repeatable or comma separated)
    #[arg(long = "type", value_delimiter = ',')]
    types: Vec<String>,

    /// sing-box root directory
    #[arg(long)]
    root: Option<PathBuf>,

    /// Caddyfile output path
    #[arg(long)]
    caddy: Option<PathBuf>,

    /// Directory for subscription files
    #[arg(long)]
    subscriptions: Option<PathBuf>,

    /// sing-box binary used to generate the TLS key pair
    #[arg(long)]
    sing_box_bin: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // init and version must work even when the config file is broken
    let config = match cli.command {
        Commands::Init { .. } | Commands::Version => None,
        _ => load_config(&cli.config)?,
    };

    init_logging(&cli, config.as_ref().map(|c| &c.logging));

    match cli.command {
        Commands::Version => {
            println!("sbdeploy v{}", env!("CARGO_PKG_VERSION"));
            println!("sing-box inbound deployment behind Caddy");
            Ok(())
        }

        Commands::Init { force } => init_config(&cli.config, force),

        Commands::Config => show_config(&cli.config, config),

        Commands::Keys => {
            for key in catalog::supported_keys() {
                println!("{key}");
            }
            Ok(())
        }

        Commands::List => {
            let state = load_state(&state_path(&cli, config.as_ref()))?;
            list_inbounds(&state);
            Ok(())
        }

        Commands::Url { ref tag, ref kind } => {
            let state = load_state(&state_path(&cli, config.as_ref()))?;
            print_urls(&state, tag.as_deref(), kind.as_deref());
            Ok(())
        }

        Commands::Deploy(ref args) => deploy(&cli, config.unwrap_or_default(), args).await,
    }
}

/// Load the config file if present
fn load_config(path: &Path) -> anyhow::Result<Option<Config>> {
    if !path.exists() {
        return Ok(None);
    }
    let config = Config::from_file(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    Ok(Some(config))
}

fn init_logging(cli: &Cli, logging: Option<&LoggingConfig>) {
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else if cli.verbose {
        EnvFilter::new("info")
    } else {
        let level = logging.map_or("warn", |l| l.level.as_str());
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    let json = logging.is_some_and(|l| l.format == "json");
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(cli.debug)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn state_path(cli: &Cli, config: Option<&Config>) -> PathBuf {
    match (&cli.state, config) {
        (Some(path), _) => path.clone(),
        (None, Some(config)) => config.state_path(),
        (None, None) => Config::default().state_path(),
    }
}

fn load_state(path: &Path) -> anyhow::Result<State> {
    State::load(path).map_err(|e| match e {
        DeployError::StateNotFound { .. } => anyhow::anyhow!("state file not found, run deploy first"),
        other => anyhow::Error::new(other),
    })
}

/// Initialize a new configuration file
fn init_config(config_path: &Path, force: bool) -> anyhow::Result<()> {
    if config_path.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists: {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    let default_config = r#"# SPDX-License-Identifier: AGPL-3.0-or-later
# sbdeploy configuration

root_dir = "/etc/sing-box"
caddy_file = "/etc/caddy/Caddyfile"
# subscription_dir = "/etc/sing-box/subscriptions"
# state_file = "/etc/sing-box/deploy-state.json"

[tls]
sing_box_bin = "sing-box"
key_bits = 1024
generate_timeout_secs = 60
# key_path = "/etc/sing-box/tls.key"
# cert_path = "/etc/sing-box/tls.cer"

[logging]
level = "info"
format = "text"
"#;

    std::fs::write(config_path, default_config)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;
    info!("Created configuration file: {}", config_path.display());
    println!("Created configuration file: {}", config_path.display());
    Ok(())
}

/// Show the effective configuration
fn show_config(config_path: &Path, config: Option<Config>) -> anyhow::Result<()> {
    let config = match config {
        Some(config) => config,
        None => {
            println!("No configuration file found at {}. Using defaults:", config_path.display());
            println!();
            Config::default()
        }
    };

    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

/// Ask which inbounds to deploy
fn prompt_selection() -> anyhow::Result<Vec<String>> {
    let supported = catalog::supported_keys();

    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "Available inbound templates:")?;
    write!(stdout, "{}", selection::menu(&supported))?;
    write!(stdout, "Select inbounds to deploy (comma separated, default all): ")?;
    stdout.flush()?;

    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(selection::parse_selection(&line, &supported)?)
}

async fn deploy(cli: &Cli, mut config: Config, args: &DeployArgs) -> anyhow::Result<()> {
    if let Some(root) = &args.root {
        config.root_dir = root.clone();
    }
    if let Some(caddy) = &args.caddy {
        config.caddy_file = caddy.clone();
    }
    if let Some(dir) = &args.subscriptions {
        config.subscription_dir = Some(dir.clone());
    }
    if let Some(bin) = &args.sing_box_bin {
        config.tls.sing_box_bin = bin.clone();
    }
    if let Some(state) = &cli.state {
        config.state_file = Some(state.clone());
    }

    let keys = if !args.types.is_empty() {
        args.types.clone()
    } else if std::io::stdin().is_terminal() {
        prompt_selection()?
    } else {
        debug!("stdin is not a terminal, deploying every inbound");
        Vec::new()
    };

    let options = config.deployment_options(args.domain.clone(), args.email.clone(), keys);
    let deployer = Deployer::new(TemplateSet::embedded()?)?;
    let state = deployer
        .run(&options)
        .await
        .with_context(|| format!("Deployment for {} failed", args.domain.trim()))?;

    println!("Deployed {} inbounds for {}", state.inbounds.len(), state.domain);
    println!("sing-box config: {}", state.root_dir.join(COMMON_CONFIG_NAME).display());
    println!("Caddyfile: {}", state.caddy_file.display());
    println!("Subscriptions: {}", state.subscription_file.display());
    println!("State: {}", options.state_file.display());
    println!("Share links:");
    for inbound in &state.inbounds {
        println!("- {} -> {}", inbound.tag, inbound.share_url);
    }

    Ok(())
}

fn list_inbounds(state: &State) {
    println!("Domain: {}", state.domain);
    println!("Subscription file: {}", state.subscription_file.display());
    println!("Inbounds:");
    for inbound in state.sorted_by_tag() {
        println!(
            "- {} [{}/{}] port:{} path:{}",
            inbound.tag, inbound.protocol, inbound.transport, inbound.listen_port, inbound.path
        );
    }
}

fn print_urls(state: &State, tag: Option<&str>, kind: Option<&str>) {
    let matches = state.filter(tag, kind);
    if matches.is_empty() {
        println!("no matching inbounds");
        return;
    }

    for inbound in matches {
        println!("{} -> {}", inbound.tag, inbound.share_url);
        println!("QR: {}", qr_code_url(&inbound.share_url));
        println!();
    }
}
