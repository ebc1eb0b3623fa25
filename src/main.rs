use clap::{Parser, Subcommand};
use colored::Colorize;
use pourover::bottle::Filename;
use pourover::loader::FormulaLoader;
use pourover::{
    Config, Formula, InstallOptions, Installer, JsonFormulaLoader, SpecKind, Tab,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pour")]
#[command(author, version, about = "Install formulae from bottles or source", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory of formula definitions (`<name>.json`)
    #[arg(long, global = true)]
    formulae: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Install formulae
    Install {
        /// Formula names
        #[arg(required = true)]
        names: Vec<String>,

        /// Build option to enable, e.g. `with-docs` (repeatable)
        #[arg(short = 'o', long = "option")]
        options: Vec<String>,

        /// Build from source even if a bottle is available
        #[arg(short = 's', long)]
        build_from_source: bool,

        /// Pour a bottle even if options were requested
        #[arg(long)]
        force_bottle: bool,

        /// Reinstall even if already installed
        #[arg(short, long)]
        force: bool,

        /// Install the development version
        #[arg(long, conflicts_with = "head")]
        devel: bool,

        /// Install from the HEAD of the repository
        #[arg(long = "HEAD")]
        head: bool,
    },

    /// Uninstall formulae
    Uninstall {
        /// Formula names
        #[arg(required = true)]
        names: Vec<String>,

        /// Uninstall even if other formulae depend on it
        #[arg(long)]
        ignore_dependencies: bool,
    },

    /// Show what would be installed for a formula
    Info {
        /// Formula name
        name: String,
    },

    /// Link an installed formula into the prefix
    Link {
        /// Formula name
        name: String,
    },

    /// Remove an installed formula's links from the prefix
    Unlink {
        /// Formula name
        name: String,
    },

    /// Print the artifact names of a bottle
    BottleFilename {
        name: String,
        version: String,
        tag: String,

        #[arg(long, default_value_t = 0)]
        rebuild: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "pourover=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();
    init_colors();

    let formulae_dir = cli
        .formulae
        .or_else(|| std::env::var_os("POUROVER_FORMULAE").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("formulae"));

    match cli.command {
        Commands::Install {
            names,
            options,
            build_from_source,
            force_bottle,
            force,
            devel,
            head,
        } => {
            let spec = if head {
                Some(SpecKind::Head)
            } else if devel {
                Some(SpecKind::Devel)
            } else {
                None
            };
            let opts = InstallOptions {
                spec,
                options,
                force,
                build_from_source,
                force_bottle,
                installed_as_dependency: false,
            };
            install(&formulae_dir, &names, &opts).await?;
        }
        Commands::Uninstall {
            names,
            ignore_dependencies,
        } => {
            let installer = Installer::new(Config::from_env())?;
            let mut failed = false;
            for name in &names {
                match installer.uninstall(name, ignore_dependencies) {
                    Ok(outcome) => println!(
                        "{} Uninstalled {} {} ({} links removed)",
                        "✓".green(),
                        outcome.name.bold(),
                        outcome.versions.join(", "),
                        outcome.unlinked
                    ),
                    Err(e) => {
                        eprintln!("{} {}", "Error:".red().bold(), e);
                        failed = true;
                    }
                }
            }
            if failed {
                std::process::exit(1);
            }
        }
        Commands::Info { name } => {
            let installer = Installer::new(Config::from_env())?;
            let formula = JsonFormulaLoader::new(&formulae_dir).load(&name).await?;
            info(&installer, &formula)?;
        }
        Commands::Link { name } => {
            let installer = Installer::new(Config::from_env())?;
            let linked = installer.link(&name)?;
            println!("{} Linked {} ({} symlinks created)", "✓".green(), name.bold(), linked.len());
        }
        Commands::Unlink { name } => {
            let installer = Installer::new(Config::from_env())?;
            let unlinked = installer.unlink(&name)?;
            println!(
                "{} Unlinked {} ({} symlinks removed)",
                "✓".green(),
                name.bold(),
                unlinked.len()
            );
        }
        Commands::BottleFilename {
            name,
            version,
            tag,
            rebuild,
        } => {
            let filename = Filename::new(&name, &version, tag.as_str(), rebuild);
            println!("{}", filename);
            println!("{}", filename.json());
            println!("{}", filename.bintray());
        }
    }

    Ok(())
}

async fn install(
    formulae_dir: &std::path::Path,
    names: &[String],
    opts: &InstallOptions,
) -> anyhow::Result<()> {
    let installer = Installer::new(Config::from_env())?;
    let loader = JsonFormulaLoader::new(formulae_dir);

    let mut failed = false;
    let mut formulae: Vec<Formula> = Vec::new();
    for name in names {
        match loader.load(name).await {
            Ok(formula) => formulae.push(formula),
            Err(e) => {
                eprintln!("{} {}", "Error:".red().bold(), e);
                failed = true;
            }
        }
    }

    println!("{} Installing {} formulae...", "==>".bold().green(), formulae.len());
    let results = installer.install_all(&formulae, opts).await;

    for (formula, result) in formulae.iter().zip(results) {
        match result {
            Ok(outcome) if outcome.already_installed => println!(
                "{} {} {} is already installed",
                "Warning:".yellow().bold(),
                outcome.name,
                outcome.keg.version()
            ),
            Ok(outcome) => {
                let how = if outcome.poured_from_bottle {
                    "poured from bottle"
                } else {
                    "built from source"
                };
                println!(
                    "{} {} {} ({}, {}ms)",
                    "✓".green(),
                    outcome.name.bold(),
                    outcome.keg.version(),
                    how.dimmed(),
                    outcome.time_ms
                );
                if !outcome.invalid_options.is_empty() {
                    println!(
                        "  {} unknown options: {}",
                        "Warning:".yellow().bold(),
                        outcome.invalid_options.join(", ")
                    );
                }
                if let Some(err) = &outcome.link_error {
                    println!("  {} could not link: {}", "Warning:".yellow().bold(), err);
                }
            }
            Err(e) => {
                eprintln!("{} {}: {}", "✗".red(), formula.name.bold(), e);
                failed = true;
            }
        }
    }

    if failed {
        std::process::exit(1);
    }
    Ok(())
}

fn info(installer: &Installer, formula: &Formula) -> anyhow::Result<()> {
    println!("{}", format!("==> {}", formula.full_name()).bold().green());
    if let Some(desc) = &formula.desc {
        println!("{}", desc);
    }

    match formula.active_spec(None) {
        Some(active) => {
            let version = formula.pkg_version(active.version());
            println!("{}: {} ({})", "Version".bold(), version, active.kind);
            match installer.bottle_for(formula, active.kind) {
                Some(bottle) => println!("{}: {}", "Bottle".bold(), bottle.filename),
                None => println!("{}: {}", "Bottle".bold(), "none for this platform".dimmed()),
            }
        }
        None => println!("{}: {}", "Version".bold(), "no usable spec".red()),
    }

    if !formula.options.is_empty() {
        println!("{}: {}", "Options".bold(), formula.options.join(", "));
    }
    if !formula.dependencies.is_empty() {
        println!("{}: {}", "Dependencies".bold(), formula.dependencies.join(", "));
    }

    let kegs = installer.cellar().installed_kegs(&formula.name)?;
    if kegs.is_empty() {
        println!("{}: {}", "Installed".bold(), "no".dimmed());
    }
    for keg in kegs {
        let how = match Tab::for_keg(&keg) {
            Ok(tab) if tab.poured_from_bottle => "poured from bottle",
            Ok(_) => "built from source",
            Err(_) => "no install receipt",
        };
        println!("{}: {} ({})", "Installed".bold(), keg.path().display(), how);
    }

    Ok(())
}

/// Honour NO_COLOR / CLICOLOR_FORCE and disable colors when stdout is not a terminal
fn init_colors() {
    let env_set = |key: &str| std::env::var(key).is_ok_and(|v| v != "0");
    let enabled = if std::env::var_os("NO_COLOR").is_some() {
        false
    } else if env_set("CLICOLOR_FORCE") {
        true
    } else {
        std::env::var("CLICOLOR").map_or(true, |v| v != "0")
            && std::io::IsTerminal::is_terminal(&std::io::stdout())
    };
    colored::control::set_override(enabled);
}
