// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 SMB Launcher Contributors

// SMB Launcher - CLI Client
// Command-line interface for managing SMB server profiles and opening shares

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use comfy_table::{Attribute, Cell, Color, ContentArrangement, Table};
use dialoguer::{Confirm, Input, Password};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use smb_launcher_common::{
    parse_address, AppPaths, ConnectObserver, ConnectState, Error, MountResolver, ProfileStore,
    ServerProfile, Settings, ShareAddress, ShareInfo, ShareType, SystemServerManager,
};

const PASSWORD_MASK: &str = "********";

#[derive(Parser)]
#[command(name = "smb-launcher")]
#[command(about = "Open SMB shares from saved server profiles", long_about = None)]
#[command(version)]
struct Cli {
    /// Directory holding server_config.json and settings.toml
    #[arg(long, global = true, value_name = "DIR")]
    config_dir: Option<PathBuf>,

    /// Enable debug logging on stderr
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List all server profiles
    List {
        /// Show detailed information
        #[arg(short, long)]
        verbose: bool,

        /// Output as JSON for scripting (passwords are masked)
        #[arg(short, long)]
        json: bool,
    },

    /// Add a new server profile
    Add {
        /// Profile name
        name: Option<String>,

        /// Server address, e.g. smb://10.0.0.5/data
        #[arg(short, long)]
        address: Option<String>,

        /// Username, optionally DOMAIN\user
        #[arg(short, long)]
        user: Option<String>,

        /// Password
        #[arg(short, long)]
        password: Option<String>,

        /// Skip interactive prompts (use provided args only)
        #[arg(short = 'y', long)]
        non_interactive: bool,
    },

    /// Edit an existing profile
    Edit {
        /// Profile name or list position (1-based); a matching name wins
        target: String,

        /// New profile name
        #[arg(short, long)]
        name: Option<String>,

        /// New server address
        #[arg(short, long)]
        address: Option<String>,

        /// New username
        #[arg(short, long)]
        user: Option<String>,

        /// New password
        #[arg(short, long)]
        password: Option<String>,

        /// Keep unspecified fields without prompting
        #[arg(short = 'y', long)]
        non_interactive: bool,
    },

    /// Delete a profile
    Delete {
        /// Profile name or list position (1-based); a matching name wins
        target: String,

        /// Do not ask for confirmation
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Show detailed information about a profile
    Info {
        /// Profile name or list position (1-based); a matching name wins
        target: String,
    },

    /// List the shares exported by a profile's server
    Shares {
        /// Profile name or list position (1-based); a matching name wins
        target: String,
    },

    /// Connect to a profile's server and open the mounted share
    Connect {
        /// Profile name or list position (1-based); a matching name wins
        target: String,

        /// Verify the share and mount point without opening the file browser
        #[arg(long)]
        no_open: bool,
    },

    /// Show where profiles and settings are stored
    Paths,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let default_filter = if cli.debug {
        "smb_launcher=debug,smb_launcher_common=debug"
    } else {
        "smb_launcher=warn,smb_launcher_common=warn"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let paths = AppPaths::resolve(cli.config_dir).context("Failed to resolve config directory")?;
    debug!("Using base directory {}", paths.base_dir().display());

    match cli.command {
        Commands::List { verbose, json } => {
            list_profiles(&paths, verbose, json)?;
        }
        Commands::Add {
            name,
            address,
            user,
            password,
            non_interactive,
        } => {
            add_profile(&paths, name, address, user, password, non_interactive)?;
        }
        Commands::Edit {
            target,
            name,
            address,
            user,
            password,
            non_interactive,
        } => {
            edit_profile(&paths, &target, name, address, user, password, non_interactive)?;
        }
        Commands::Delete { target, yes } => {
            delete_profile(&paths, &target, yes)?;
        }
        Commands::Info { target } => {
            show_profile_info(&paths, &target)?;
        }
        Commands::Shares { target } => {
            list_shares(&paths, &target).await?;
        }
        Commands::Connect { target, no_open } => {
            connect(&paths, &target, no_open).await?;
        }
        Commands::Paths => {
            show_paths(&paths)?;
        }
    }

    Ok(())
}

/// Convert a library error into the message shown to the operator
fn friendly(err: Error) -> anyhow::Error {
    anyhow::anyhow!(err.user_message())
}

fn open_manager(paths: &AppPaths) -> Result<SystemServerManager> {
    SystemServerManager::open(paths).map_err(friendly)
}

/// Resolve a profile name or a 1-based list position to an index
///
/// An exact name match wins over a position.
fn resolve_target(store: &ProfileStore, target: &str) -> Result<usize> {
    if let Some(index) = store.find_by_name(target) {
        return Ok(index);
    }

    match target.trim().parse::<usize>() {
        Ok(position) if (1..=store.len()).contains(&position) => Ok(position - 1),
        _ => anyhow::bail!(
            "No profile at position or named '{}' ({} profile(s) stored)",
            target.yellow(),
            store.len()
        ),
    }
}

/// Profile as shown by `list --json`
#[derive(Serialize)]
struct ProfileView<'a> {
    position: usize,
    name: &'a str,
    address: &'a str,
    username: &'a str,
    password: &'static str,
}

impl<'a> ProfileView<'a> {
    fn new(index: usize, profile: &'a ServerProfile) -> Self {
        Self {
            position: index + 1,
            name: &profile.name,
            address: &profile.address,
            username: &profile.username,
            password: PASSWORD_MASK,
        }
    }
}

fn list_profiles(paths: &AppPaths, verbose: bool, json: bool) -> Result<()> {
    let store = ProfileStore::open(paths.profiles_file()).map_err(friendly)?;
    let profiles = store.profiles();

    if json {
        // JSON output for scripting
        let views: Vec<ProfileView<'_>> = profiles
            .iter()
            .enumerate()
            .map(|(i, p)| ProfileView::new(i, p))
            .collect();
        println!("{}", serde_json::to_string_pretty(&views)?);
        return Ok(());
    }

    if profiles.is_empty() {
        println!("{}", "No profiles found.".yellow());
        println!("Create one with: {}", "smb-launcher add <name>".cyan());
        return Ok(());
    }

    if verbose {
        print_profiles_verbose(profiles);
    } else {
        print_profiles_table(profiles);
    }

    Ok(())
}

fn print_profiles_table(profiles: &[ServerProfile]) {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);

    // Header
    table.set_header(vec![
        Cell::new("#").add_attribute(Attribute::Bold).fg(Color::Cyan),
        Cell::new("Name")
            .add_attribute(Attribute::Bold)
            .fg(Color::Cyan),
        Cell::new("Address")
            .add_attribute(Attribute::Bold)
            .fg(Color::Cyan),
        Cell::new("User")
            .add_attribute(Attribute::Bold)
            .fg(Color::Cyan),
    ]);

    for (i, profile) in profiles.iter().enumerate() {
        table.add_row(vec![
            Cell::new(i + 1).fg(Color::DarkGrey),
            Cell::new(&profile.name).fg(Color::Green),
            Cell::new(&profile.address),
            Cell::new(&profile.username),
        ]);
    }

    println!();
    println!("{}", table);
    println!();
    println!("{} profile(s) found", profiles.len().to_string().cyan());
    println!();
}

fn print_profiles_verbose(profiles: &[ServerProfile]) {
    println!();
    for (i, profile) in profiles.iter().enumerate() {
        if i > 0 {
            println!("{}", "─".repeat(80).dimmed());
        }
        println!(
            "{}",
            format!("{}. {}", i + 1, profile.display_label()).bold().green()
        );
        print_address_details(&profile.address);
        println!("  User:     {}", profile.username);
        println!("  Password: {}", PASSWORD_MASK.dimmed());
        println!();
    }
}

fn print_address_details(address: &str) {
    match parse_address(address) {
        Ok(parsed) => {
            println!("  Host:     {}", parsed.host);
            if let Some(port) = parsed.port {
                println!("  Port:     {}", port);
            }
            println!(
                "  Share:    {}",
                parsed.share.as_deref().unwrap_or("(chosen at connect)")
            );
        }
        Err(e) => {
            println!("  Address:  {} {}", address, format!("({})", e).red());
        }
    }
}

/// Use the argument if given, otherwise prompt (or fail when non-interactive)
fn field_or_prompt(
    value: Option<String>,
    prompt: &str,
    default: Option<&str>,
    non_interactive: bool,
) -> Result<String> {
    if let Some(v) = value {
        return Ok(v);
    }
    if non_interactive {
        return match default {
            Some(d) => Ok(d.to_string()),
            None => anyhow::bail!("{} is required in non-interactive mode", prompt),
        };
    }

    let mut input = Input::<String>::new().with_prompt(prompt);
    if let Some(d) = default {
        input = input.default(d.to_string());
    }
    input.interact_text().context("Failed to read input")
}

fn add_profile(
    paths: &AppPaths,
    name: Option<String>,
    address: Option<String>,
    user: Option<String>,
    password: Option<String>,
    non_interactive: bool,
) -> Result<()> {
    let mut manager = open_manager(paths)?;

    if !non_interactive {
        println!("{}", "Creating new server profile".bold().green());
        println!();
    }

    let name = field_or_prompt(name, "Profile name", None, non_interactive)?;
    if manager.store().find_by_name(&name).is_some() {
        anyhow::bail!(
            "A profile with the name '{}' already exists. Please choose a different name or delete the existing profile first.",
            name.yellow()
        );
    }

    let address = field_or_prompt(address, "Server address (smb://host/share)", None, non_interactive)?;
    if let Err(e) = parse_address(&address) {
        println!("{}", format!("⚠️  {}", e.user_message()).yellow());
    }
    let user = field_or_prompt(user, "Username", None, non_interactive)?;

    let password = match password {
        Some(p) => p,
        None if non_interactive => anyhow::bail!("Password is required in non-interactive mode"),
        None => Password::new()
            .with_prompt("Password")
            .interact()
            .context("Failed to read password input")?,
    };

    let profile = ServerProfile::new(name, address, user, password);
    let label = profile.display_label();
    let index = manager.add_profile(profile).map_err(friendly)?;

    println!();
    println!(
        "{}",
        format!("✓ Profile {} saved at position {}", label, index + 1)
            .green()
            .bold()
    );
    println!(
        "  Connect with: {}",
        format!("smb-launcher connect {}", index + 1).cyan()
    );
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn edit_profile(
    paths: &AppPaths,
    target: &str,
    name: Option<String>,
    address: Option<String>,
    user: Option<String>,
    password: Option<String>,
    non_interactive: bool,
) -> Result<()> {
    let mut manager = open_manager(paths)?;
    let index = resolve_target(manager.store(), target)?;
    let current = manager.profile(index).map_err(friendly)?.clone();

    println!(
        "{}",
        format!("Editing {}", current.display_label()).bold().green()
    );

    let name = field_or_prompt(name, "Profile name", Some(&current.name), non_interactive)?;
    let address = field_or_prompt(address, "Server address", Some(&current.address), non_interactive)?;
    let user = field_or_prompt(user, "Username", Some(&current.username), non_interactive)?;

    let password = match password {
        Some(p) => p,
        None if non_interactive => current.password.clone(),
        None => {
            let entered = Password::new()
                .with_prompt("Password (leave empty to keep current)")
                .allow_empty_password(true)
                .interact()
                .context("Failed to read password input")?;
            if entered.is_empty() {
                current.password.clone()
            } else {
                entered
            }
        }
    };

    let updated = ServerProfile::new(name, address, user, password);
    let label = updated.display_label();
    manager.edit_profile(index, updated).map_err(friendly)?;

    println!("{}", format!("✓ Profile {} updated", label).green().bold());
    Ok(())
}

fn delete_profile(paths: &AppPaths, target: &str, yes: bool) -> Result<()> {
    let mut manager = open_manager(paths)?;
    let index = resolve_target(manager.store(), target)?;
    let label = manager.profile(index).map_err(friendly)?.display_label();

    // Confirm deletion
    if !yes {
        let confirm = Confirm::new()
            .with_prompt(format!(
                "Are you sure you want to delete profile {}?",
                label.yellow()
            ))
            .default(false)
            .interact()?;

        if !confirm {
            println!("{}", "Deletion cancelled".dimmed());
            return Ok(());
        }
    }

    manager.delete_profile(index).map_err(friendly)?;

    println!();
    println!("{}", format!("Profile {} deleted successfully", label).green());
    println!();
    Ok(())
}

fn show_profile_info(paths: &AppPaths, target: &str) -> Result<()> {
    let settings = Settings::load(&paths.settings_file()).map_err(friendly)?;
    let store = ProfileStore::open(paths.profiles_file()).map_err(friendly)?;
    let index = resolve_target(&store, target)?;
    let profile = store.get(index).map_err(friendly)?;

    println!();
    println!("{}", format!("Profile: {}", profile.name).bold().green());
    println!("  Position: {}", index + 1);

    println!();
    println!("{}", "  Connection:".bold());
    println!("    Address:  {}", profile.address);
    println!("    User:     {}", profile.username);
    println!("    Password: {}", PASSWORD_MASK.dimmed());

    println!();
    println!("{}", "  Local Mount:".bold());
    match parse_address(&profile.address) {
        Ok(parsed) => {
            println!(
                "    Port:     {}",
                parsed.port.unwrap_or(settings.port)
            );
            match parsed.share {
                Some(share) => {
                    let resolver = MountResolver::new(settings.mount_root.clone());
                    match resolver.resolve_local_path(&share) {
                        Ok(path) => {
                            let state = if path.exists() {
                                "mounted".green()
                            } else {
                                "not mounted".yellow()
                            };
                            println!("    Path:     {} ({})", path.display(), state);
                        }
                        Err(e) => println!("    {}", e.user_message().red()),
                    }
                }
                None => println!("    Path:     {}", "(share chosen at connect)".dimmed()),
            }
        }
        Err(e) => println!("    {}", e.user_message().red()),
    }

    println!();
    Ok(())
}

fn show_paths(paths: &AppPaths) -> Result<()> {
    let settings = Settings::load(&paths.settings_file()).map_err(friendly)?;
    println!("Base directory: {}", paths.base_dir().display());
    println!("Profiles:       {}", paths.profiles_file().display());
    println!("Settings:       {}", paths.settings_file().display());
    println!("Mount root:     {}", settings.mount_root.display());
    Ok(())
}

/// Mirrors connection progress onto a spinner
struct SpinnerObserver {
    bar: ProgressBar,
}

impl ConnectObserver for SpinnerObserver {
    fn on_state(&mut self, state: &ConnectState) {
        if !state.is_terminal() {
            self.bar.set_message(format!("{}...", state));
        }
    }
}

fn spinner(message: String) -> Result<ProgressBar> {
    let bar = ProgressBar::new_spinner();
    bar.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    bar.set_message(message);
    bar.enable_steady_tick(Duration::from_millis(100));
    Ok(bar)
}

async fn connect(paths: &AppPaths, target: &str, no_open: bool) -> Result<()> {
    let mut manager = open_manager(paths)?;
    let index = resolve_target(manager.store(), target)?;
    let label = manager.profile(index).map_err(friendly)?.display_label();
    if no_open {
        manager.orchestrator_mut().set_open_browser(false);
    }

    let bar = spinner(format!("Connecting to {}", label))?;
    let observer_bar = bar.clone();
    let result = tokio::task::spawn_blocking(move || {
        let mut observer = SpinnerObserver { bar: observer_bar };
        manager.connect(index, &mut observer)
    })
    .await
    .context("Connection task failed")?;
    bar.finish_and_clear();

    let connected = result.map_err(friendly)?;
    if connected.opened {
        println!(
            "{}",
            format!("✓ Opened {}", connected.local_path.display())
                .green()
                .bold()
        );
    } else {
        println!(
            "{}",
            format!(
                "✓ Share {} is mounted at {}",
                connected.share,
                connected.local_path.display()
            )
            .green()
            .bold()
        );
    }
    Ok(())
}

async fn list_shares(paths: &AppPaths, target: &str) -> Result<()> {
    let manager = open_manager(paths)?;
    let index = resolve_target(manager.store(), target)?;
    let label = manager.profile(index).map_err(friendly)?.display_label();

    let bar = spinner(format!("Listing shares of {}", label))?;
    let result = tokio::task::spawn_blocking(move || manager.shares(index))
        .await
        .context("Share listing task failed")?;
    bar.finish_and_clear();

    let (address, shares) = result.map_err(friendly)?;
    print_shares_table(&address, &shares);
    Ok(())
}

fn share_type_label(share: &ShareInfo) -> &'static str {
    match share.share_type {
        ShareType::Disk => "Disk",
        ShareType::PrintQueue => "Printer",
        ShareType::Device => "Device",
        ShareType::Ipc => "IPC",
    }
}

fn print_shares_table(address: &ShareAddress, shares: &[ShareInfo]) {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Share")
            .add_attribute(Attribute::Bold)
            .fg(Color::Cyan),
        Cell::new("Type")
            .add_attribute(Attribute::Bold)
            .fg(Color::Cyan),
        Cell::new("Remark")
            .add_attribute(Attribute::Bold)
            .fg(Color::Cyan),
    ]);

    for share in shares {
        let name = if share.is_browsable() {
            Cell::new(&share.name).fg(Color::Green)
        } else {
            Cell::new(&share.name).fg(Color::DarkGrey)
        };
        table.add_row(vec![
            name,
            Cell::new(share_type_label(share)),
            Cell::new(&share.remark).fg(Color::DarkGrey),
        ]);
    }

    println!();
    println!("{}", table);
    println!();
    println!(
        "{} share(s) on {}",
        shares.len().to_string().cyan(),
        address
    );
    println!();
}
