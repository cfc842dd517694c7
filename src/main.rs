//! packpilot CLI - packaging recipes for Intune and Patch My PC
//!
//! Usage:
//!   packpilot parse metadata.txt                  # Parse pasted script output
//!   packpilot resolve --type msi --file App.msi   # Resolve install/uninstall commands
//!   packpilot recipe App.msi --metadata meta.txt -o out/
//!   packpilot recipe ./package/ --metadata meta.txt   # Folder: first installer is used
//!   packpilot rules list                          # Show installer rules
//!   packpilot sample                              # Print sample script output

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use packpilot::config::Settings;
use packpilot::describe::{DescriptionSource, OfflineDescriber, WingetDescriber};
use packpilot::detection;
use packpilot::export::{self, ExportOptions};
use packpilot::installer::{self, PackageFiles};
use packpilot::metadata::{self, ParsedMetadata};
use packpilot::recipe::{Architecture, Category, InstallContext, Priority, Recipe, RecipeRequest};
use packpilot::resolver::{self, ResolveInput, UninstallCommand};
use packpilot::rules::RuleTable;
use packpilot::PackPilotError;
use std::io::Read;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "packpilot")]
#[command(about = "Generate silent install/uninstall commands and deployment recipes for Windows installers")]
#[command(version)]
struct Cli {
    /// Rules file (default: rules.json, or rules_path from the settings file)
    #[arg(long, global = true)]
    rules: Option<PathBuf>,

    /// Settings file (default: .packpilot.yaml in the working or home directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse metadata script output into key/value fields
    Parse {
        /// File with the pasted output, `-` or nothing for stdin
        input: Option<PathBuf>,

        /// Treat lines without a separator as continuations of the previous value
        #[arg(long)]
        multiline: bool,

        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Resolve install and uninstall commands for one installer
    Resolve {
        /// Installer type key from the rules file (exe_nsis, msi, ...)
        #[arg(short = 't', long = "type")]
        type_key: String,

        /// Installer filename
        #[arg(short, long)]
        file: String,

        /// UninstallString from the registry
        #[arg(long)]
        uninstall_string: Option<String>,

        /// MSI product code
        #[arg(long)]
        product_code: Option<String>,

        /// Metadata script output to take values from
        #[arg(short, long)]
        metadata: Option<PathBuf>,

        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Build a full packaging recipe and optionally write export files
    #[command(disable_version_flag = true)]
    Recipe {
        /// Installer file or package folder; checked on disk when it exists,
        /// otherwise only its name is used
        installer: PathBuf,

        /// Metadata script output, `-` for stdin
        #[arg(short, long)]
        metadata: Option<PathBuf>,

        #[arg(long)]
        app_name: Option<String>,

        #[arg(long)]
        vendor: Option<String>,

        #[arg(long = "version")]
        app_version: Option<String>,

        /// 64-bit, 32-bit or Any
        #[arg(long)]
        arch: Option<Architecture>,

        /// System or User
        #[arg(long)]
        context: Option<InstallContext>,

        /// Name shown in Apps & Features
        #[arg(long)]
        apps_features_name: Option<String>,

        /// Installer type key (default: detected from the filename)
        #[arg(short = 't', long = "type")]
        type_key: Option<String>,

        /// Wrap the installer with ServiceUI
        #[arg(long)]
        interactive: bool,

        #[arg(long)]
        requires_restart: bool,

        /// Do not create a desktop shortcut
        #[arg(long)]
        no_shortcut: bool,

        /// Installation timeout in minutes (5-120)
        #[arg(long, default_value_t = packpilot::recipe::DEFAULT_TIMEOUT_MINUTES)]
        timeout: u32,

        #[arg(long, default_value = "Normal")]
        priority: Priority,

        #[arg(long, default_value = "Productivity")]
        category: Category,

        /// Look up a description in winget-pkgs
        #[arg(long)]
        describe: bool,

        /// Treat metadata lines without a separator as continuations
        #[arg(long)]
        multiline: bool,

        /// Write export files to this directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print the recipe as JSON
        #[arg(long)]
        json: bool,
    },

    /// Inspect and manage the rules file
    Rules {
        #[command(subcommand)]
        action: RulesAction,
    },

    /// Print sample metadata script output
    Sample,
}

#[derive(Subcommand)]
enum RulesAction {
    /// List installer types
    List,

    /// Show one rule as JSON
    Show {
        key: String,
    },

    /// Validate a rules file
    Validate {
        path: Option<PathBuf>,
    },

    /// Write the built-in rules to a file
    Init {
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    if cli.no_color {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli) {
        eprintln!("{}: {:#}", "error".red().bold(), e);
        let configuration = e
            .downcast_ref::<PackPilotError>()
            .is_some_and(PackPilotError::is_configuration_error);
        if configuration {
            eprintln!(
                "{}: fix the rules or settings file; `packpilot rules validate` checks the rules",
                "hint".yellow()
            );
        }
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut settings = match &cli.config {
        Some(path) => Settings::load(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => Settings::load_default().context("failed to load settings")?,
    };
    settings.merge_cli(cli.rules.clone(), None, None, None);

    match cli.command {
        Commands::Parse {
            input,
            multiline,
            json,
        } => {
            if multiline {
                settings.merge_cli(None, None, Some(true), None);
            }
            let text = read_input(input.as_deref())?;
            let data = metadata::parse_with_mode(&text, settings.parse.mode());
            print_metadata(&data, json)
        }

        Commands::Resolve {
            type_key,
            file,
            uninstall_string,
            product_code,
            metadata,
            json,
        } => {
            let table = load_rules(&settings)?;
            let mut input = ResolveInput::new(type_key, file);
            if let Some(s) = uninstall_string {
                input = input.with_uninstall_string(s);
            }
            if let Some(c) = product_code {
                input = input.with_product_code(c);
            }
            if let Some(path) = metadata {
                let text = read_input(Some(&path))?;
                input = input.with_metadata(&metadata::parse_with_mode(&text, settings.parse.mode()));
            }

            let resolution = resolver::resolve(&table, &input)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&resolution)?);
            } else {
                println!("{}: {}", "Installer type".bold(), resolution.installer_type);
                println!("{}: {}", "Install".bold(), resolution.install_command.green());
                print_uninstall(&resolution.uninstall);
                println!("{}: {}", "Detection".bold(), resolution.detection_method);
            }
            Ok(())
        }

        Commands::Recipe {
            installer: installer_path,
            metadata,
            app_name,
            vendor,
            app_version,
            arch,
            context,
            apps_features_name,
            type_key,
            interactive,
            requires_restart,
            no_shortcut,
            timeout,
            priority,
            category,
            describe,
            multiline,
            output,
            json,
        } => {
            settings.merge_cli(
                None,
                output,
                multiline.then_some(true),
                describe.then_some(true),
            );
            let table = load_rules(&settings)?;

            let filename = if installer_path.is_dir() {
                package_installer(&installer_path)?
            } else if installer_path.exists() {
                installer::validate_installer(&installer_path)?.file_name
            } else {
                installer_path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(String::from)
                    .with_context(|| format!("invalid installer path: {}", installer_path.display()))?
            };

            let parsed = match metadata {
                Some(path) => {
                    let text = read_input(Some(&path))?;
                    metadata::parse_with_mode(&text, settings.parse.mode())
                }
                None => ParsedMetadata::new(),
            };
            if parsed.is_empty() {
                log::warn!("no metadata fields available, using command-line values only");
            }

            let mut request = RecipeRequest::new(filename, parsed);
            request.app_name = app_name;
            request.vendor = vendor;
            request.version = app_version;
            request.architecture = arch;
            request.install_context = context;
            request.apps_features_name = apps_features_name;
            request.installer_type_key = type_key;
            request.interactive = interactive;
            request.requires_restart = requires_restart;
            request.create_shortcut = !no_shortcut;
            request.timeout_minutes = timeout;
            request.priority = priority;
            request.category = category;

            let mut recipe = Recipe::build(&request, &table)?;

            let describer: Box<dyn DescriptionSource> = if settings.describe.enabled {
                Box::new(WingetDescriber::new(
                    settings.describe.timeout_seconds,
                    settings.describe.user_agent.clone(),
                ))
            } else {
                Box::new(OfflineDescriber)
            };
            recipe.description = Some(describer.describe(&recipe.app_name));

            if json {
                println!("{}", serde_json::to_string_pretty(&recipe)?);
            } else {
                print_recipe(&recipe);
            }

            if let Some(dir) = &settings.output_dir {
                let options = ExportOptions {
                    assignment_group: settings.assignment_group.clone(),
                };
                let written = export::write_all(&recipe, dir, &options)?;
                eprintln!(
                    "{} {} file(s) to {}",
                    "Wrote".green().bold(),
                    written.len(),
                    dir.display()
                );
            }
            Ok(())
        }

        Commands::Rules { action } => run_rules(action, &settings),

        Commands::Sample => {
            println!("{}", metadata::SAMPLE_OUTPUT);
            Ok(())
        }
    }
}

fn run_rules(action: RulesAction, settings: &Settings) -> Result<()> {
    match action {
        RulesAction::List => {
            let table = load_rules(settings)?;
            for (key, record) in table.iter() {
                let uninstall = if record.uninstall_command.is_some() {
                    ""
                } else {
                    " (no uninstall template)"
                };
                println!(
                    "{:<20} {} [{}]{}",
                    key.cyan(),
                    record.installer_type,
                    record.detection_method,
                    uninstall.dimmed()
                );
            }
            Ok(())
        }
        RulesAction::Show { key } => {
            let table = load_rules(settings)?;
            let record = table.require(&key)?;
            println!("{}", serde_json::to_string_pretty(record)?);
            Ok(())
        }
        RulesAction::Validate { path } => {
            let path = path.unwrap_or_else(|| settings.rules_path());
            let table = RuleTable::load(&path)?;
            println!(
                "{} {}: {} installer type(s)",
                "OK".green().bold(),
                path.display(),
                table.len()
            );
            Ok(())
        }
        RulesAction::Init { path, force } => {
            let path = path.unwrap_or_else(|| settings.rules_path());
            RuleTable::write_builtin(&path, force)?;
            println!("{} {}", "Created".green().bold(), path.display());
            Ok(())
        }
    }
}

fn load_rules(settings: &Settings) -> Result<RuleTable> {
    let path = settings.rules_path();
    RuleTable::load(&path).with_context(|| {
        format!(
            "cannot load installer rules (run `packpilot rules init {}` to create them)",
            path.display()
        )
    })
}

/// File name of the main installer in a package source folder
fn package_installer(dir: &Path) -> Result<String> {
    let files = PackageFiles::scan(dir)
        .with_context(|| format!("failed to scan package folder {}", dir.display()))?;
    let primary = files
        .primary_installer()
        .with_context(|| format!("no installer found in {}", dir.display()))?;
    log::info!(
        "package folder {}: {} installer(s), {} config file(s), {} script(s)",
        dir.display(),
        files.installers.len(),
        files.configs.len(),
        files.scripts.len()
    );
    if files.installers.len() > 1 {
        log::warn!(
            "{} installers in {}, using {}",
            files.installers.len(),
            dir.display(),
            primary.display()
        );
    }
    Ok(installer::validate_installer(primary)?.file_name)
}

/// Read a file, or stdin for `-` / no path
fn read_input(path: Option<&Path>) -> Result<String> {
    match path {
        Some(p) if p != Path::new("-") => std::fs::read_to_string(p)
            .with_context(|| format!("failed to read {}", p.display())),
        _ => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("failed to read stdin")?;
            Ok(text)
        }
    }
}

fn print_metadata(data: &ParsedMetadata, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(data)?);
        return Ok(());
    }

    if data.is_empty() {
        eprintln!(
            "{}: no metadata fields found; enter application details manually",
            "warning".yellow()
        );
        return Ok(());
    }

    for (key, value) in data.iter() {
        println!("{} : {}", key.cyan(), value);
    }
    Ok(())
}

fn print_uninstall(uninstall: &UninstallCommand) {
    let command = if uninstall.is_placeholder() {
        uninstall.command.yellow()
    } else {
        uninstall.command.green()
    };
    println!("{}: {}", "Uninstall".bold(), command);
    println!("  {} {}", "source:".dimmed(), uninstall.source);
}

fn print_recipe(recipe: &Recipe) {
    println!(
        "{} {}",
        recipe.app_name.bold(),
        format!("v{}", recipe.version).dimmed()
    );
    println!("  Vendor:        {}", recipe.vendor);
    println!("  Architecture:  {}", recipe.architecture);
    println!("  Context:       {}", recipe.install_context);
    println!("  Installer:     {} ({})", recipe.uploaded_filename, recipe.installer_type);
    println!("  Category:      {}", recipe.category);
    println!("  Priority:      {}", recipe.priority);
    println!("  Timeout:       {} min", recipe.timeout_minutes);
    if let Some(ref description) = recipe.description {
        println!("  Description:   {}", description);
    }
    println!();
    println!("{}: {}", "Install".bold(), recipe.install_command.green());
    print_uninstall(&recipe.uninstall);
    println!();
    println!("{}: {}", "Detection".bold(), recipe.detection_method);
    for path in detection::registry_paths(recipe.install_context) {
        println!("  {}", path);
    }
    if recipe.is_interactive {
        println!("{}: ServiceUI.exe must be included in the package", "note".yellow());
    }
    if recipe.requires_restart {
        println!("{}: a restart is required after installation", "note".yellow());
    }
}
