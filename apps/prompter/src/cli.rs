use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::error::PrompterError;
use crate::session::LaunchParams;
use crate::telemetry::logging::{LogConfig, LogLevel, LogOutput};

#[derive(Parser, Debug)]
#[command(
    name = "prompter",
    about = "Teleprompter display and remote kept in sync through a realtime database",
    author,
    version
)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        env = "PROMPTER_STORE_URL",
        value_name = "URL",
        help = "Realtime database base URL; without it roles share an in-process store"
    )]
    pub store_url: Option<String>,

    #[arg(
        long,
        global = true,
        env = "PROMPTER_STORE_AUTH",
        value_name = "TOKEN",
        hide_env_values = true,
        help = "Auth token appended to realtime database requests"
    )]
    pub store_auth: Option<String>,

    #[command(flatten)]
    pub logging: LoggingArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        global = true,
        env = "PROMPTER_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        global = true,
        env = "PROMPTER_LOG_FILE",
        help = "Write logs to the specified file instead of stderr"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            output: self
                .file
                .clone()
                .map_or(LogOutput::Stderr, LogOutput::File),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show a script and auto-scroll it; follows the remote when a session is given
    Display(DisplayArgs),
    /// Control a display through the shared session
    Remote(RemoteArgs),
    /// Print this device's session token and share links
    Session(SessionArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct LaunchArgs {
    #[arg(long, value_name = "TOKEN", help = "Session token to bind to")]
    pub session: Option<String>,

    #[arg(
        long = "launch-url",
        value_name = "URL",
        help = "Share link carrying session/sheet/range query parameters"
    )]
    pub launch_url: Option<String>,
}

impl LaunchArgs {
    /// Explicit flags first, then whatever the share link carries.
    pub fn resolve(&self, explicit: LaunchParams) -> Result<LaunchParams, PrompterError> {
        let explicit = LaunchParams {
            session: explicit.session.or_else(|| self.session.clone()),
            ..explicit
        };
        match &self.launch_url {
            Some(url) => Ok(explicit.or(LaunchParams::from_url(url)?)),
            None => Ok(explicit),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct DisplayArgs {
    #[command(flatten)]
    pub launch: LaunchArgs,

    #[arg(long, value_name = "URL", help = "Google Sheets URL holding the script")]
    pub sheet: Option<String>,

    #[arg(long, value_name = "A1", help = "Range to read, e.g. Sheet1!A:A")]
    pub range: Option<String>,

    #[arg(
        long,
        default_value_t = 720.0,
        value_name = "PX",
        help = "Height of the virtual viewport"
    )]
    pub viewport_height: f64,
}

impl DisplayArgs {
    pub fn launch_params(&self) -> Result<LaunchParams, PrompterError> {
        self.launch.resolve(LaunchParams {
            session: None,
            sheet: self.sheet.clone(),
            range: self.range.clone(),
        })
    }
}

#[derive(Args, Debug, Clone)]
pub struct RemoteArgs {
    #[command(flatten)]
    pub launch: LaunchArgs,
}

#[derive(Args, Debug, Clone)]
pub struct SessionArgs {
    #[arg(long, value_name = "TOKEN", help = "Use this token instead of the remembered one")]
    pub session: Option<String>,

    #[arg(long, value_name = "URL", help = "Sheet URL to embed in the display link")]
    pub sheet: Option<String>,

    #[arg(
        long,
        default_value = "https://prompter.local",
        value_name = "URL",
        help = "Base URL the share links point at"
    )]
    pub base_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_flags_override_launch_url() {
        let cli = Cli::try_parse_from([
            "prompter",
            "display",
            "--sheet",
            "https://docs.google.com/spreadsheets/d/flag",
            "--launch-url",
            "https://prompter.local/display?session=s1&sheet=link&range=Sheet2!B:B",
        ])
        .unwrap();
        let Command::Display(args) = cli.command else {
            panic!("expected display");
        };
        let params = args.launch_params().unwrap();
        assert_eq!(params.session.as_deref(), Some("s1"));
        assert_eq!(
            params.sheet.as_deref(),
            Some("https://docs.google.com/spreadsheets/d/flag")
        );
        assert_eq!(params.range.as_deref(), Some("Sheet2!B:B"));
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let cli = Cli::try_parse_from([
            "prompter",
            "remote",
            "--session",
            "abc",
            "--log-level",
            "debug",
            "--store-url",
            "https://demo.firebaseio.com",
        ])
        .unwrap();
        assert_eq!(cli.logging.level, LogLevel::Debug);
        assert_eq!(cli.store_url.as_deref(), Some("https://demo.firebaseio.com"));
        let Command::Remote(args) = cli.command else {
            panic!("expected remote");
        };
        assert_eq!(args.launch.session.as_deref(), Some("abc"));
    }

    #[test]
    fn log_file_selects_file_output() {
        let cli = Cli::try_parse_from(["prompter", "session", "--log-file", "/tmp/prompter.log"])
            .unwrap();
        assert_eq!(
            cli.logging.to_config().output,
            LogOutput::File(PathBuf::from("/tmp/prompter.log"))
        );
        let cli = Cli::try_parse_from(["prompter", "session"]).unwrap();
        assert_eq!(cli.logging.to_config().output, LogOutput::Stderr);
    }

    #[test]
    fn bad_launch_url_is_an_error() {
        let args = RemoteArgs {
            launch: LaunchArgs {
                session: None,
                launch_url: Some("not a url".into()),
            },
        };
        assert!(matches!(
            args.launch.resolve(LaunchParams::default()),
            Err(PrompterError::LaunchUrl(_))
        ));
    }
}
