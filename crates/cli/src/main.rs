use clap::{Parser, Subcommand};
use lib::client::{ApiClient, ApiReply};
use lib::console::{Console, EntryKind};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "shellboard")]
#[command(about = "Shellboard CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and default files (config and bundled scripts).
    Init {
        /// Config file path (default: SHELLBOARD_CONFIG_PATH or ~/.shellboard/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Run the control panel server (HTTP API and web page).
    Serve {
        /// Config file path (default: SHELLBOARD_CONFIG_PATH or ~/.shellboard/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// HTTP port (default from config or 3000)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Run one allowlisted command through a running server.
    Exec {
        /// Config file path (default: SHELLBOARD_CONFIG_PATH or ~/.shellboard/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Command line, e.g. `shellboard exec -- ls -la`
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },

    /// Run a named script through a running server.
    Script {
        /// Config file path (default: SHELLBOARD_CONFIG_PATH or ~/.shellboard/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Script name, e.g. disk-usage
        name: String,
    },

    /// Print the server's system information.
    Info {
        /// Config file path (default: SHELLBOARD_CONFIG_PATH or ~/.shellboard/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Interactive console against a running server. `/script <name>`, `/clear`, `/save`, `/exit`.
    Console {
        /// Config file path (default: SHELLBOARD_CONFIG_PATH or ~/.shellboard/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("shellboard {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Serve { config, port }) => {
            if let Err(e) = run_serve(config, port).await {
                log::error!("server failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Exec { config, command }) => {
            match run_exec(config, command.join(" ")).await {
                Ok(true) => {}
                Ok(false) => std::process::exit(1),
                Err(e) => {
                    log::error!("exec failed: {:#}", e);
                    std::process::exit(1);
                }
            }
        }
        Some(Commands::Script { config, name }) => match run_script(config, name).await {
            Ok(true) => {}
            Ok(false) => std::process::exit(1),
            Err(e) => {
                log::error!("script failed: {:#}", e);
                std::process::exit(1);
            }
        },
        Some(Commands::Info { config }) => {
            if let Err(e) = run_info(config).await {
                log::error!("info failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Console { config }) => {
            if let Err(e) = run_console(config).await {
                log::error!("console failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(lib::config::default_config_path);
    let dir = lib::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_serve(config_path: Option<PathBuf>, port: Option<u16>) -> anyhow::Result<()> {
    let (mut config, path) = lib::config::load_config(config_path)?;
    if let Some(p) = port {
        config.server.port = p;
    }
    log::info!("starting server on {}:{}", config.server.bind, config.server.port);
    lib::server::run_server(config, path).await
}

fn client(config_path: Option<PathBuf>) -> anyhow::Result<ApiClient> {
    let (config, _) = lib::config::load_config(config_path)?;
    let client = ApiClient::from_config(&config);
    log::debug!("using server at {}", client.base_url());
    Ok(client)
}

/// Prints the reply; returns false when the server reported an error.
fn print_reply(reply: ApiReply) -> bool {
    match reply.error {
        Some(error) => {
            eprintln!("{}", error);
            false
        }
        None => {
            let output = reply.output.unwrap_or_default();
            print!("{}", output);
            if !output.ends_with('\n') {
                println!();
            }
            true
        }
    }
}

async fn run_exec(config_path: Option<PathBuf>, command: String) -> anyhow::Result<bool> {
    let reply = client(config_path)?.execute(&command).await?;
    Ok(print_reply(reply))
}

async fn run_script(config_path: Option<PathBuf>, name: String) -> anyhow::Result<bool> {
    let reply = client(config_path)?.run_script(&name).await?;
    Ok(print_reply(reply))
}

async fn run_info(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let info = client(config_path)?.system_info().await?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

async fn run_console(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    use std::io::{self, Write};

    let client = client(config_path)?;
    let mut console = Console::new();
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        write!(stdout, "$ ")?;
        stdout.flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim_end_matches(['\r', '\n']);

        let submission = match input.trim() {
            "/exit" | "/quit" => break,
            "/clear" => {
                console.clear();
                continue;
            }
            "/save" => {
                save_log(&console)?;
                continue;
            }
            other => match other.strip_prefix("/script ") {
                Some(name) => console.submit_script(name.trim()),
                None => {
                    console.input = input.to_string();
                    console.submit_command()
                }
            },
        };
        let Some(submission) = submission else {
            continue;
        };

        let result = client.submit(&submission).await.map_err(|e| e.to_string());
        console.complete(result);
        if let Some(entry) = console.transcript().entries().last() {
            match entry.kind {
                EntryKind::Error => eprintln!("{}", entry.text),
                _ => println!("{}", entry.text.trim_end()),
            }
        }
    }

    Ok(())
}

fn save_log(console: &Console) -> anyhow::Result<()> {
    let epoch_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let export = console.export_log(epoch_ms);
    std::fs::write(&export.file_name, export.contents)?;
    println!("saved {}", export.file_name);
    Ok(())
}
