use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde_json::Value;

/// Rule graph compiler configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "rulegraph")]
#[command(about = "Compile rule modules into a gated slot graph and evaluate it")]
pub struct Config {
    /// Directory holding the rule source tree
    #[arg(long, default_value = ".", env = "RULEGRAPH_ROOT")]
    pub root: PathBuf,

    /// YAML bundle mapping module paths to sources (used instead of --root)
    #[arg(long, env = "RULEGRAPH_BUNDLE")]
    pub bundle: Option<PathBuf>,

    /// Entry module path, relative to the root
    #[arg(long, default_value = "main.sqrl", env = "RULEGRAPH_MAIN")]
    pub main: String,

    /// Execution input as NAME=JSON (repeatable). Non-JSON values are taken as strings.
    #[arg(long = "input", value_name = "NAME=JSON")]
    pub inputs: Vec<String>,

    /// Slot to evaluate (repeatable)
    #[arg(long = "fetch", value_name = "NAME")]
    pub fetch: Vec<String>,

    /// Slot whose compiled source to print (repeatable)
    #[arg(long = "print", value_name = "NAME")]
    pub print: Vec<String>,

    /// Print every slot and dynamic include site
    #[arg(long, default_value = "false")]
    pub print_graph: bool,

    /// Recompile interval in seconds (0 disables watching)
    #[arg(long, default_value = "0", env = "RULEGRAPH_WATCH_SECS")]
    pub watch_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,
}

impl Config {
    /// Get the recompile interval as Duration.
    pub fn watch_interval(&self) -> Duration {
        Duration::from_secs(self.watch_secs)
    }

    /// Parse `--input` pairs into execution inputs.
    pub fn parsed_inputs(&self) -> Result<HashMap<String, Value>, String> {
        self.inputs
            .iter()
            .map(|raw| {
                let (name, value) = raw
                    .split_once('=')
                    .ok_or_else(|| format!("expected NAME=JSON, got `{}`", raw))?;
                let name = name.trim();
                if name.is_empty() {
                    return Err(format!("empty input name in `{}`", raw));
                }
                let value = serde_json::from_str(value)
                    .unwrap_or_else(|_| Value::String(value.to_string()));
                Ok((name.to_string(), value))
            })
            .collect()
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            root: PathBuf::from("."),
            bundle: None,
            main: "main.sqrl".to_string(),
            inputs: Vec::new(),
            fetch: Vec::new(),
            print: Vec::new(),
            print_graph: false,
            watch_secs: 0,
            log_level: "info".to_string(),
        }
    }
}
