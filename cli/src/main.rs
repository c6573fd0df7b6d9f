//! fleetrun CLI: launch one executable across the groups of a cluster
//! configuration and supervise it to completion.
//!
//! # Usage
//!
//! ```text
//! fleetrun -f cluster.json ./solver input.dat -n 4
//! fleetrun -f cluster.yaml -p MPI -V ./solver
//! fleetrun -f cluster.json --dry-run --shared-fs no ./solver
//! ```

use std::io::Write;
use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use fleetrun_core::{launch, LaunchRequest, Overrides, Strategy, Visibility};


#[derive(Parser, Debug)]
#[command(
    name = "fleetrun",
    about = "Stage and launch a program on every group of a cluster configuration"
)]
struct Cli {
    /// Cluster configuration (JSON, or YAML by extension).
    #[arg(short = 'f', long = "config", value_name = "CONFIG")]
    config: PathBuf,

    /// Force the launch strategy.
    #[arg(short = 'p', long = "protocol", value_parser = ["TCP", "MPI"])]
    protocol: Option<String>,

    /// Only print the output of these groups.
    #[arg(short = 'v', long = "view", value_delimiter = ',', value_name = "GROUPS")]
    view: Vec<String>,

    /// Print the output of every group (and keep the rank file).
    #[arg(short = 'V', long = "view-all")]
    view_all: bool,

    /// Print the resolved commands without running anything.
    #[arg(long)]
    dry_run: bool,

    /// Override `shared_filesystem` from the configuration.
    #[arg(long = "shared-fs", value_parser = ["yes", "no"])]
    shared_fs: Option<String>,

    /// Directory holding the ssh key.
    #[arg(long)]
    ssh_key_dir: Option<String>,

    /// Default home directory for groups that do not name one.
    #[arg(long)]
    home_dir: Option<String>,

    /// Log level when RUST_LOG is not set.
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Executable followed by its own arguments.
    #[arg(
        required = true,
        trailing_var_arg = true,
        value_name = "EXECUTABLE [ARGS]"
    )]
    command: Vec<String>,
}

impl Cli {
    fn visibility(&self) -> Visibility {
        if self.view_all {
            Visibility::All
        } else if !self.view.is_empty() {
            Visibility::only(self.view.iter().cloned())
        } else {
            Visibility::None
        }
    }

    fn into_request(self) -> LaunchRequest {
        let overrides = Overrides {
            strategy: self.protocol.as_deref().and_then(Strategy::from_protocol),
            shared_filesystem: self.shared_fs.as_deref().map(|v| v == "yes"),
            ssh_key_dir: self.ssh_key_dir.clone(),
            default_home_dir: self.home_dir.clone(),
            dry_run: self.dry_run,
            visibility: self.visibility(),
        };
        let mut command = self.command.into_iter();
        let executable = PathBuf::from(command.next().unwrap_or_default());
        LaunchRequest {
            config: self.config,
            executable,
            args: command.collect(),
            overrides,
        }
    }
}


fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}


fn main() {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let request = cli.into_request();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let code = match launch(&request, &mut out) {
        Ok(code) => code,
        Err(e) => {
            let _ = out.flush();
            eprintln!("fleetrun: {}", e);
            e.exit_code()
        }
    };
    let _ = out.flush();
    process::exit(code);
}


#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("fleetrun").chain(args.iter().copied()))
    }

    #[test]
    fn minimal_invocation() {
        let cli = parse(&["-f", "cluster.json", "./app"]).unwrap();
        let request = cli.into_request();
        assert_eq!(request.config, PathBuf::from("cluster.json"));
        assert_eq!(request.executable, PathBuf::from("./app"));
        assert!(request.args.is_empty());
        assert_eq!(request.overrides.strategy, None);
        assert_eq!(request.overrides.visibility, Visibility::None);
        assert!(!request.overrides.dry_run);
    }

    #[test]
    fn program_arguments_are_not_launcher_flags() {
        let cli = parse(&["-f", "c.json", "-V", "./app", "-v", "in.dat", "--dry-run"]).unwrap();
        assert!(!cli.dry_run);
        let request = cli.into_request();
        assert_eq!(request.overrides.visibility, Visibility::All);
        assert_eq!(request.args, vec!["-v", "in.dat", "--dry-run"]);
    }

    #[test]
    fn overrides_are_mapped() {
        let cli = parse(&[
            "-f",
            "c.yaml",
            "-p",
            "MPI",
            "-v",
            "g1,g2",
            "--shared-fs",
            "no",
            "--ssh-key-dir",
            "/keys",
            "--home-dir",
            "/srv/fleet",
            "--dry-run",
            "./app",
        ])
        .unwrap();
        let request = cli.into_request();
        let o = &request.overrides;
        assert_eq!(o.strategy, Some(Strategy::Collective));
        assert_eq!(o.shared_filesystem, Some(false));
        assert_eq!(o.ssh_key_dir.as_deref(), Some("/keys"));
        assert_eq!(o.default_home_dir.as_deref(), Some("/srv/fleet"));
        assert!(o.dry_run);
        assert_eq!(o.visibility, Visibility::only(["g1", "g2"]));
    }

    #[test]
    fn config_and_executable_are_required() {
        assert!(parse(&["./app"]).is_err());
        assert!(parse(&["-f", "c.json"]).is_err());
    }

    #[test]
    fn unknown_protocol_rejected() {
        assert!(parse(&["-f", "c.json", "-p", "UDP", "./app"]).is_err());
        assert!(parse(&["-f", "c.json", "--shared-fs", "maybe", "./app"]).is_err());
    }

    #[test]
    fn unrecognised_option_rejected() {
        assert!(parse(&["-f", "c.json", "--bogus", "./app"]).is_err());
    }
}
