use clap::{Parser, ValueEnum};
use scenariod::{Config, Repeat};
use std::path::PathBuf;
use tracing::Level;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    Yaml,
}

#[derive(Parser, Debug)]
#[command(name = "scenariod")]
#[command(version)]
#[command(about = "Drive Toxiproxy through scripted failure-injection scenarios")]
#[command(long_about = "
scenariod creates a set of Toxiproxy proxies in front of a service and walks
them through timed failure scenarios: packet loss, added latency, node
outages and flapping. Each phased scenario stabilizes, injects its fault,
then recovers, while Prometheus metrics describe what is happening.

Example usage:
  scenariod --list                              # Show every scenario
  scenariod --scenario packet-loss-10-pct       # Run one scenario once
  scenariod --scenario all --loop               # Cycle through everything
  scenariod --scenario latency --interactive    # Switch scenarios from stdin
")]
pub struct Cli {
    /// Scenario to run, or 'all' for every scenario in name order
    #[arg(short, long)]
    pub scenario: Option<String>,

    /// List available scenarios and exit
    #[arg(short, long)]
    pub list: bool,

    /// Repeat the selection until interrupted
    #[arg(long = "loop", conflicts_with = "runs")]
    pub looped: bool,

    /// Repeat the selection this many times
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub runs: Option<u32>,

    /// Read scenario names from stdin and switch to them live
    #[arg(short, long)]
    pub interactive: bool,

    /// Output format for --list
    #[arg(long, value_enum, default_value = "table")]
    pub format: OutputFormat,

    /// Address for the Prometheus metrics endpoint
    #[arg(long)]
    pub metrics_addr: Option<String>,

    /// Do not serve metrics
    #[arg(long)]
    pub no_metrics: bool,

    /// Toxiproxy control API URL
    #[arg(long)]
    pub toxiproxy_url: Option<String>,

    /// Path to a scenariod.yaml configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,

    /// Suppress all output except errors
    #[arg(short, long)]
    pub quiet: bool,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn log_level(&self) -> Level {
        if self.quiet {
            Level::ERROR
        } else if self.debug {
            Level::DEBUG
        } else if self.verbose {
            Level::TRACE
        } else {
            Level::INFO
        }
    }

    /// Interactive sessions keep running until quit unless `--runs` bounds them
    pub fn repeat(&self) -> Repeat {
        if self.looped {
            return Repeat::Forever;
        }
        match self.runs {
            Some(n) if n > 1 => Repeat::Times(n as usize),
            Some(_) => Repeat::Once,
            None if self.interactive => Repeat::Forever,
            None => Repeat::Once,
        }
    }

    /// Flags win over everything loaded from the environment and YAML
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(url) = &self.toxiproxy_url {
            config.toxiproxy_url = url.clone();
        }
        if let Some(addr) = &self.metrics_addr {
            config.metrics_addr = addr.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("scenariod").chain(args.iter().copied()))
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&[]).unwrap();
        assert!(cli.scenario.is_none());
        assert!(!cli.list);
        assert_eq!(cli.format, OutputFormat::Table);
        assert_eq!(cli.repeat(), Repeat::Once);
        assert_eq!(cli.log_level(), Level::INFO);
    }

    #[test]
    fn test_repeat_modes() {
        assert_eq!(parse(&["--loop"]).unwrap().repeat(), Repeat::Forever);
        assert_eq!(parse(&["--runs", "3"]).unwrap().repeat(), Repeat::Times(3));
        assert_eq!(parse(&["--runs", "1"]).unwrap().repeat(), Repeat::Once);
    }

    #[test]
    fn test_interactive_defaults_to_continuous() {
        assert_eq!(parse(&["--interactive"]).unwrap().repeat(), Repeat::Forever);
        assert_eq!(
            parse(&["-i", "--runs", "2"]).unwrap().repeat(),
            Repeat::Times(2)
        );
        assert_eq!(parse(&["-i", "--runs", "1"]).unwrap().repeat(), Repeat::Once);
    }

    #[test]
    fn test_loop_conflicts_with_runs() {
        assert!(parse(&["--loop", "--runs", "2"]).is_err());
    }

    #[test]
    fn test_runs_must_be_positive() {
        assert!(parse(&["--runs", "0"]).is_err());
    }

    #[test]
    fn test_log_levels() {
        assert_eq!(parse(&["-q"]).unwrap().log_level(), Level::ERROR);
        assert_eq!(parse(&["-d"]).unwrap().log_level(), Level::DEBUG);
        assert_eq!(parse(&["-v"]).unwrap().log_level(), Level::TRACE);
        assert_eq!(parse(&["-q", "-v"]).unwrap().log_level(), Level::ERROR);
    }

    #[test]
    fn test_overrides_replace_config() {
        let cli = parse(&[
            "--toxiproxy-url",
            "http://toxiproxy:8474",
            "--metrics-addr",
            "127.0.0.1:0",
        ])
        .unwrap();
        let mut config = Config::default();
        cli.apply_overrides(&mut config);

        assert_eq!(config.toxiproxy_url, "http://toxiproxy:8474");
        assert_eq!(config.metrics_addr, "127.0.0.1:0");
    }

    #[test]
    fn test_format_values() {
        let cli = parse(&["--list", "--format", "json"]).unwrap();
        assert!(cli.list);
        assert_eq!(cli.format, OutputFormat::Json);
        assert!(parse(&["--format", "xml"]).is_err());
    }
}
