use clap::{Args, Parser, Subcommand};
use pam_openrc::config::{DEFAULT_SEARCH_PATH, DEFAULT_STATE_ROOT};
use pam_openrc::paths::{RUNDIR_MANAGED, STATIC};
use pam_openrc::session_counter::SessionCounter;
use pam_openrc::{
    logging, module, EnvironmentHost, FileValueStore, LogTarget, SessionOutcome, ValueStore,
};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "openrc-session")]
#[command(about = "Run OpenRC user session accounting outside of PAM")]
#[command(version)]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Account for a newly opened session
    Open(TransactionArgs),
    /// Account for a closing session
    Close(TransactionArgs),
    /// Show the stored session state
    Status {
        /// Service state directory
        #[arg(long, default_value = DEFAULT_STATE_ROOT)]
        state_root: PathBuf,

        /// Only show this user
        user: Option<String>,
    },
}

#[derive(Args)]
struct TransactionArgs {
    /// The session's user
    user: String,

    /// Extra session environment variable (KEY=VALUE), may be repeated
    #[arg(long = "env", value_parser = parse_env_pair)]
    env: Vec<(String, String)>,

    /// Module arguments, as given on the PAM configuration line
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    module_args: Vec<String>,
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

fn run_transaction(args: TransactionArgs, open: bool) -> ExitCode {
    let path = std::env::var("PATH").unwrap_or_else(|_| DEFAULT_SEARCH_PATH.to_string());
    let mut host = EnvironmentHost::new(args.user)
        .with_env([("PATH".to_string(), path)])
        .with_env(args.env);

    let outcome = if open {
        module::open_session(&mut host, args.module_args.as_slice(), LogTarget::Inherited)
    } else {
        module::close_session(&mut host, args.module_args.as_slice(), LogTarget::Inherited)
    };

    for (key, value) in host.exported() {
        println!("{}={}", key, value);
    }

    match outcome {
        SessionOutcome::Success => ExitCode::SUCCESS,
        SessionOutcome::SessionError => ExitCode::FAILURE,
    }
}

fn status_lines(store: &FileValueStore, user: Option<String>) -> Vec<String> {
    let users = match user {
        Some(user) => vec![user],
        None => store.users(),
    };
    let counter = SessionCounter::new(store);
    let flag = |user: &str, option: &str| if store.is_yes(user, option) { "yes" } else { "no" };

    users
        .iter()
        .map(|user| {
            format!(
                "{} {} {} {}",
                user,
                counter.read(user),
                flag(user, STATIC),
                flag(user, RUNDIR_MANAGED)
            )
        })
        .collect()
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_stderr();

    match cli.command {
        Command::Open(args) => run_transaction(args, true),
        Command::Close(args) => run_transaction(args, false),
        Command::Status { state_root, user } => {
            let store = FileValueStore::new(state_root);
            for line in status_lines(&store, user) {
                println!("{}", line);
            }
            ExitCode::SUCCESS
        }
    }
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
