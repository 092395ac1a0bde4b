use clap::{Parser, Subcommand};
use lib::api::ApiClient;
use lib::auth::{self, LoginOutcome};
use lib::config::{load_config, resolve_base_url, resolve_credentials_path};
use lib::conversation::{Author, ChannelOptions, ConversationChannel, ViewState};
use lib::credentials::Credentials;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "oncourse")]
#[command(about = "OnCourse CLI: practice clinical interviews with simulated patients", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config file.
    Init {
        /// Config file path (default: ONCOURSE_CONFIG_PATH or ~/.oncourse/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Log in and store credentials. With --register, create the account first.
    Login {
        /// Config file path (default: ONCOURSE_CONFIG_PATH or ~/.oncourse/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        #[arg(long)]
        email: String,

        #[arg(long)]
        password: String,

        /// Register a new account instead of logging in.
        #[arg(long)]
        register: bool,
    },

    /// Forget the stored login.
    Logout {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Show the stored login, checked against the service.
    Whoami {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// List the patients available for an interview.
    Patients {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Interview a patient (interactive). Type /exit to leave.
    Chat {
        /// Config file path (default: ONCOURSE_CONFIG_PATH or ~/.oncourse/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Patient id (see `oncourse patients`).
        #[arg(long, short, value_name = "ID")]
        patient: u64,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Version) => {
            println!("oncourse {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Commands::Init { config }) => run_init(config),
        Some(Commands::Login {
            config,
            email,
            password,
            register,
        }) => run_login(config, &email, &password, register).await,
        Some(Commands::Logout { config }) => run_logout(config),
        Some(Commands::Whoami { config }) => run_whoami(config).await,
        Some(Commands::Patients { config }) => run_patients(config).await,
        Some(Commands::Chat { config, patient }) => run_chat(config, patient).await,
        None => {
            println!("Run with --help for usage");
            Ok(())
        }
    };
    if let Err(e) = result {
        log::error!("{:#}", e);
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(lib::config::default_config_path);
    let written = lib::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", written.display());
    Ok(())
}

async fn run_login(
    config_path: Option<PathBuf>,
    email: &str,
    password: &str,
    register: bool,
) -> anyhow::Result<()> {
    let (config, _) = load_config(config_path)?;
    let api = ApiClient::new(resolve_base_url(&config));
    let store = resolve_credentials_path(&config);

    if register {
        let creds = auth::register(&api, &store, email, password).await?;
        println!("registered and logged in as {}", creds.user_email);
        return Ok(());
    }
    match auth::login(&api, &store, email, password).await? {
        LoginOutcome::LoggedIn(creds) => println!("logged in as {}", creds.user_email),
        LoginOutcome::WrongPassword => anyhow::bail!("incorrect password for {}", email.trim()),
        LoginOutcome::NotRegistered => anyhow::bail!(
            "no account for {}; run again with --register to create one",
            email.trim()
        ),
    }
    Ok(())
}

fn run_logout(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let (config, _) = load_config(config_path)?;
    auth::logout(&resolve_credentials_path(&config))?;
    println!("logged out");
    Ok(())
}

async fn run_whoami(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let (config, _) = load_config(config_path)?;
    let api = ApiClient::new(resolve_base_url(&config));
    match auth::check_stored_login(&api, &resolve_credentials_path(&config)).await? {
        Some(creds) => println!("{}", creds.user_email),
        None => println!("not logged in"),
    }
    Ok(())
}

async fn run_patients(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let (config, _) = load_config(config_path)?;
    let api = ApiClient::new(resolve_base_url(&config));
    let patients = api.list_patients().await?;
    if patients.is_empty() {
        println!("no patients available");
    }
    for p in patients {
        println!("{:>4}  {}", p.id, p.name);
        for (label, value) in p.card_fields() {
            println!("      {}: {}", label, value);
        }
    }
    Ok(())
}

enum Step {
    Line(std::io::Result<Option<String>>),
    Event(bool),
}

async fn run_chat(config_path: Option<PathBuf>, patient_id: u64) -> anyhow::Result<()> {
    let (config, _) = load_config(config_path)?;
    let creds = Credentials::load(&resolve_credentials_path(&config))
        .ok_or_else(|| anyhow::anyhow!("not logged in; run `oncourse login` first"))?;
    let identity = creds.session_identity(patient_id)?;
    let api = Arc::new(ApiClient::new(resolve_base_url(&config)));
    let mut channel = ConversationChannel::open(
        identity,
        api,
        ChannelOptions::from_config(&config),
        tokio::runtime::Handle::current(),
    )?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = std::io::stdout();
    let mut printed = 0;
    let mut header_shown = false;
    let mut last_state = None;

    eprintln!("connecting... (type /exit to leave)");
    loop {
        let step = tokio::select! {
            line = lines.next_line() => Step::Line(line),
            alive = channel.next_event() => Step::Event(alive),
        };
        match step {
            Step::Line(line) => {
                let Some(line) = line? else { break };
                let input = line.trim();
                if input.eq_ignore_ascii_case("/exit") || input.eq_ignore_ascii_case("/quit") {
                    break;
                }
                if !input.is_empty() && !channel.accepts_input() {
                    eprintln!("[still connecting] not sent: {}", input);
                } else {
                    channel.send_user_message(input);
                }
            }
            Step::Event(false) => break,
            Step::Event(true) => {}
        }

        if !header_shown {
            if let Some(summary) = channel.summary() {
                println!("== {} ==", summary.header());
                println!("{}", summary.narrative);
                header_shown = true;
            }
        }

        let state = ViewState::of(channel.session());
        if last_state.as_ref() != Some(&state) {
            match &state {
                ViewState::Ready => eprintln!("[ready]"),
                ViewState::Degraded { reason, .. } => eprintln!("[{}]", reason),
                ViewState::Loading | ViewState::Closed => {}
            }
            last_state = Some(state);
        }

        let transcript = channel.transcript();
        for message in transcript.messages().iter().skip(printed) {
            if message.author() == Author::Assistant {
                println!("< {}", message.text());
            }
        }
        printed = transcript.len();
        write!(stdout, "> ")?;
        stdout.flush()?;
    }

    channel.close();
    Ok(())
}
