use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use colored::Colorize;
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use parking_lot::Mutex;
use repoman::{
    config::Config, AptFile, Cmd, ProcessListener, RepoManager, RepomanError, RepomanResult,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Spinner shown while an external probe tool runs.
struct SpinnerListener {
    bar: Mutex<Option<ProgressBar>>,
}

impl SpinnerListener {
    fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }
}

impl ProcessListener for SpinnerListener {
    fn on_started(&self, command: &str) {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {wide_msg}") {
            pb.set_style(style);
        }
        let program = command.split_whitespace().next().unwrap_or(command);
        pb.set_message(format!("Running {}...", program));
        pb.enable_steady_tick(Duration::from_millis(100));
        *self.bar.lock() = Some(pb);
    }

    fn on_finished(&self, _success: bool) {
        if let Some(pb) = self.bar.lock().take() {
            pb.finish_and_clear();
        }
    }
}

#[tokio::main]
async fn main() {
    let matches = build_cli().get_matches();

    let default_level = if matches.get_flag("verbose") { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();
    if matches.get_flag("no-color") {
        colored::control::set_override(false);
    }

    let start_time = Instant::now();
    if let Err(e) = run_command(matches).await {
        eprintln!("{}: {}", "Error".red().bold(), e);
        std::process::exit(e.exit_code());
    }
    info!("Operation completed in {} ms", start_time.elapsed().as_millis());
}

fn build_cli() -> Command {
    Command::new("repoman")
        .version(repoman::REPOMAN_VERSION)
        .about("Choose the default APT repository mirrors and toggle APT source lines.")
        .arg(Arg::new("verbose")
            .short('v')
            .long("verbose")
            .global(true)
            .action(ArgAction::SetTrue))
        .arg(Arg::new("config")
            .short('c')
            .long("config")
            .value_name("CONFIG")
            .global(true))
        .arg(Arg::new("no-color")
            .long("no-color")
            .global(true)
            .action(ArgAction::SetTrue))
        .arg(Arg::new("yes")
            .short('y')
            .long("yes")
            .global(true)
            .action(ArgAction::SetTrue)
            .help("Answer yes to confirmation prompts"))
        .subcommand_required(true)
        .subcommand(Command::new("mirrors")
            .about("Curated distro mirrors")
            .subcommand_required(true)
            .subcommand(Command::new("list")
                .about("List curated mirrors, marking the current one")
                .arg(Arg::new("filter")
                    .short('f')
                    .long("filter")
                    .value_name("TEXT")
                    .help("Only show mirrors whose line contains TEXT"))
                .arg(Arg::new("json")
                    .long("json")
                    .action(ArgAction::SetTrue)))
            .subcommand(Command::new("current")
                .about("Show the mirror the distro list points at"))
            .subcommand(Command::new("select")
                .about("Switch the distro repository to a curated mirror")
                .arg(Arg::new("text")
                    .required(true)
                    .help("Text contained in the mirror's line, e.g. a country or URL"))))
        .subcommand(Command::new("sources")
            .about("APT source lines")
            .subcommand_required(true)
            .subcommand(Command::new("list")
                .about("List source lines of every APT list file")
                .arg(Arg::new("debian")
                    .long("debian")
                    .action(ArgAction::SetTrue)
                    .help("Only the Debian lists"))
                .arg(Arg::new("json")
                    .long("json")
                    .action(ArgAction::SetTrue)))
            .subcommand(toggle_command("enable", "Uncomment source lines"))
            .subcommand(toggle_command("disable", "Comment out source lines")))
        .subcommand(Command::new("fastest")
            .about("Detect and switch to the fastest mirror")
            .subcommand_required(true)
            .subcommand(Command::new("distro")
                .about("Fastest curated distro mirror")
                .arg(Arg::new("builtin")
                    .long("builtin")
                    .action(ArgAction::SetTrue)
                    .help("Rank with HTTP requests instead of netselect")))
            .subcommand(Command::new("debian")
                .about("Fastest Debian mirror via netselect-apt")))
        .subcommand(Command::new("debian")
            .about("Debian repository")
            .subcommand_required(true)
            .subcommand(Command::new("set")
                .about("Point the Debian lists at URL")
                .arg(Arg::new("url")
                    .required(true)
                    .value_name("URL"))))
        .subcommand(Command::new("check")
            .about("Check whether a repository answers")
            .arg(Arg::new("url")
                .required(true)
                .value_name("URL"))
            .arg(Arg::new("json")
                .long("json")
                .action(ArgAction::SetTrue)))
        .subcommand(Command::new("restore")
            .about("Reinstall the release's original APT source files")
            .arg(Arg::new("ahs")
                .long("ahs")
                .action(ArgAction::SetTrue)
                .conflicts_with("no-ahs")
                .help("Enable the Advanced Hardware Stack repo without asking"))
            .arg(Arg::new("no-ahs")
                .long("no-ahs")
                .action(ArgAction::SetTrue)
                .help("Leave the Advanced Hardware Stack repo disabled")))
}

fn toggle_command(name: &'static str, about: &'static str) -> Command {
    Command::new(name)
        .about(about)
        .arg(Arg::new("file")
            .required(true)
            .help("List file name, e.g. mx.list or sources.list"))
        .arg(Arg::new("index")
            .required(true)
            .num_args(1..)
            .value_parser(value_parser!(usize))
            .help("Line numbers as shown by `sources list`"))
}

async fn run_command(matches: ArgMatches) -> RepomanResult<()> {
    let config = load_config(&matches)?;
    let assume_yes = matches.get_flag("yes");

    let cmd = Cmd::new()
        .with_halt_grace(Duration::from_secs(config.probe.halt_grace_seconds))
        .with_listener(Arc::new(SpinnerListener::new()));
    let mut manager = RepoManager::new(config)?.with_cmd(cmd);
    spawn_interrupt_handler(manager.shell().clone());

    match matches.subcommand() {
        Some(("mirrors", sub)) => match sub.subcommand() {
            Some(("list", list_matches)) => {
                let filter = list_matches
                    .get_one::<String>("filter")
                    .map(|s| s.as_str())
                    .unwrap_or("");
                let mirrors = manager.mirrors().filter(filter);
                if list_matches.get_flag("json") {
                    println!("{}", serde_json::to_string_pretty(&mirrors)?);
                    return Ok(());
                }
                if mirrors.is_empty() {
                    println!("{}", "No mirrors match.".yellow());
                    return Ok(());
                }
                let host = manager.current_host();
                for mirror in &mirrors {
                    if mirror.is_current(host) {
                        println!("{} {}", "*".green().bold(), mirror.description.green());
                    } else {
                        println!("  {}", mirror.description);
                    }
                }
                println!("\nTotal: {} mirrors", mirrors.len());
            }

            Some(("current", _)) => match manager.current_mirror() {
                Some(mirror) => println!("{}", mirror.description.green()),
                None if !manager.current_host().is_empty() => {
                    println!("{} (not in the curated list)", manager.current_host().yellow())
                }
                None => println!("{}", "No distro repository configured.".yellow()),
            },

            Some(("select", select_matches)) => {
                let text = required(select_matches, "text")?;
                let description = manager.select_mirror(text)?.description.clone();
                println!("{} {}", "Selected".cyan(), description);
                let summary = manager.commit()?;
                if let Some(url) = summary.mirror {
                    println!("{} {}", "Distro repository set to".green(), url.blue());
                }
            }

            _ => unreachable_subcommand()?,
        },

        Some(("sources", sub)) => match sub.subcommand() {
            Some(("list", list_matches)) => {
                let files: Vec<&AptFile> = if list_matches.get_flag("debian") {
                    manager.files().iter().filter(|f| f.is_debian()).collect()
                } else {
                    manager.files().iter().collect()
                };
                if list_matches.get_flag("json") {
                    println!("{}", serde_json::to_string_pretty(&files)?);
                } else {
                    display_files(&files);
                }
            }

            Some((action @ ("enable" | "disable"), toggle_matches)) => {
                let enable = action == "enable";
                let file = required(toggle_matches, "file")?.to_string();
                let indices: Vec<usize> = toggle_matches
                    .get_many::<usize>("index")
                    .map(|v| v.copied().collect())
                    .unwrap_or_default();

                for number in indices {
                    let index = number.checked_sub(1).ok_or_else(|| {
                        RepomanError::InvalidArguments("line numbers start at 1".to_string())
                    })?;
                    let outcome = manager.toggle(&file, index, enable)?;
                    if outcome.test_repo_warning {
                        warn_test_repo();
                        if !confirm("Enable the test repo anyway?", false, assume_yes)? {
                            return Err(RepomanError::Cancelled("nothing was changed".to_string()));
                        }
                    }
                    if outcome.change.is_none() {
                        println!("{} {}:{} already {}d", "Skipping".dimmed(), file, number, action);
                    }
                }

                let summary = manager.commit()?;
                println!("{} {} line(s) in {}", format!("{}d", capitalize(action)).green(), summary.applied, file);
            }

            _ => unreachable_subcommand()?,
        },

        Some(("fastest", sub)) => match sub.subcommand() {
            Some(("distro", distro_matches)) => {
                println!("{}", "Detecting the fastest distro mirror...".cyan());
                let url = manager.fastest_distro(distro_matches.get_flag("builtin")).await?;
                println!("{} {}", "Distro repository set to".green(), url.blue());
            }

            Some(("debian", _)) => {
                println!("{}", "Detecting the fastest Debian mirror...".cyan());
                let url = manager.fastest_debian().await?;
                println!("{} {}", "Debian repository set to".green(), url.blue());
            }

            _ => unreachable_subcommand()?,
        },

        Some(("debian", sub)) => match sub.subcommand() {
            Some(("set", set_matches)) => {
                let url = required(set_matches, "url")?;
                let backups = manager.set_debian_mirror(url).await?;
                println!("{} {}", "Debian repository set to".green(), url.blue());
                for backup in backups {
                    println!("  backup: {}", backup.display().to_string().dimmed());
                }
            }

            _ => unreachable_subcommand()?,
        },

        Some(("check", check_matches)) => {
            let url = required(check_matches, "url")?;
            let result = manager.check(url).await?;
            if check_matches.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else if result.success {
                println!(
                    "{} {} ({}ms)",
                    "OK".green().bold(),
                    result.mirror_url.blue(),
                    result.response_time.as_millis()
                );
            } else {
                println!(
                    "{} {}: {}",
                    "FAILED".red().bold(),
                    result.mirror_url,
                    result.error_message.as_deref().unwrap_or("unknown error").dimmed()
                );
            }
            if !result.success {
                return Err(RepomanError::MirrorUnavailable(result.mirror_url));
            }
        }

        Some(("restore", restore_matches)) => {
            println!("{}", "Restoring original APT sources...".cyan());
            let report = manager.restore_sources().await?;
            for path in &report.installed {
                println!("  {} {}", "installed".green(), path.display());
            }
            for path in &report.replaced {
                println!("  {} {}", "backup".dimmed(), path.display());
            }

            if report.ahs_available && !restore_matches.get_flag("no-ahs") {
                let enable = restore_matches.get_flag("ahs")
                    || confirm(
                        "Your system supports the Advanced Hardware Stack repo. Enable it?",
                        false,
                        assume_yes,
                    )?;
                if enable {
                    manager.enable_ahs()?;
                    println!("{}", "AHS repository enabled.".green());
                }
            }
            println!(
                "{}",
                "Your original APT sources have been restored. Run 'apt update' to refresh the package lists."
                    .green()
            );
        }

        _ => unreachable_subcommand()?,
    }

    Ok(())
}

fn display_files(files: &[&AptFile]) {
    if files.is_empty() {
        println!("{}", "No APT list files found.".yellow());
        return;
    }
    for file in files {
        println!("{}", file.name.bold());
        for (i, entry) in file.entries.iter().enumerate() {
            let mark = if entry.enabled { "[x]".green() } else { "[ ]".dimmed() };
            println!("  {:>3}. {} {}", i + 1, mark, entry.text);
        }
    }
}

fn warn_test_repo() {
    println!(
        "{} {}",
        "Warning:".yellow().bold(),
        "You have selected the MX Test Repo. It's not recommended to leave it enabled or to upgrade all the packages from it."
    );
    println!("A safer option is to install packages individually with MX Package Installer.");
}

fn confirm(prompt: &str, default: bool, assume_yes: bool) -> RepomanResult<bool> {
    if assume_yes {
        return Ok(true);
    }
    Ok(Confirm::new()
        .with_prompt(prompt)
        .default(default)
        .interact()?)
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn required<'a>(matches: &'a ArgMatches, name: &str) -> RepomanResult<&'a str> {
    matches
        .get_one::<String>(name)
        .map(|s| s.as_str())
        .ok_or_else(|| RepomanError::InvalidArguments(format!("missing <{}>", name)))
}

fn unreachable_subcommand() -> RepomanResult<()> {
    Err(RepomanError::InvalidArguments(
        "Invalid command. Use --help for usage information.".to_string(),
    ))
}

// Ctrl-C kills a running child and exits at once. Otherwise the current
// file step finishes and the operation stops with Cancelled; a second
// Ctrl-C exits immediately.
fn spawn_interrupt_handler(cmd: Cmd) {
    tokio::spawn(async move {
        let interrupt = cmd.interrupt_handle();
        while tokio::signal::ctrl_c().await.is_ok() {
            if cmd.is_running() {
                cmd.interrupt().await;
                eprintln!("{}", "Interrupted".yellow());
                std::process::exit(130);
            }
            if interrupt.is_set() {
                eprintln!("{}", "Interrupted".yellow());
                std::process::exit(130);
            }
            interrupt.trigger();
            eprintln!("{}", "Interrupted, stopping after the current step".yellow());
        }
    });
}

fn load_config(matches: &ArgMatches) -> RepomanResult<Config> {
    if let Some(config_path) = matches.get_one::<String>("config") {
        Config::load(Some(config_path))
    } else {
        Config::load(None)
    }
}
