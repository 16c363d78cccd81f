use clap::{Parser, Subcommand, ValueEnum};

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl From<LogLevel> for tracing::Level {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warning => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Critical => tracing::Level::ERROR,
        }
    }
}

/// Value of one join key given on the command line.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityValueArg {
    Int(i64),
    String(String),
}

/// One entity instance, e.g. `driver_id=1005,customer_id=7`.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityArg {
    pub join_keys: Vec<(String, EntityValueArg)>,
}

pub fn parse_entity(raw: &str) -> Result<EntityArg, String> {
    let join_keys = raw
        .split(',')
        .map(|pair| {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| format!("expected <join_key>=<value>, got '{}'", pair))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(format!("empty join key in '{}'", pair));
            }
            let value = value.trim();
            let value = value
                .parse::<i64>()
                .map(EntityValueArg::Int)
                .unwrap_or_else(|_| EntityValueArg::String(value.to_string()));
            Ok((key.to_string(), value))
        })
        .collect::<Result<Vec<_>, String>>()?;
    Ok(EntityArg { join_keys })
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Read the latest materialized values of a feature view from the online store.
    /// A `memory` online store starts empty in every process, so every feature reads as NOT_FOUND
    Read {
        /// Name of the feature view
        #[arg(short = 'v', long = "view")]
        view: String,
        /// Comma separated feature names of the view
        #[arg(short = 'F', long = "features", value_delimiter = ',', required = true)]
        features: Vec<String>,
        /// Entity to read, as <join_key>=<value>[,<join_key>=<value>...]. Repeat for
        /// more entities. Omit to read an entity-less feature view
        #[arg(short = 'e', long = "entity", value_parser = parse_entity)]
        entities: Vec<EntityArg>,
        /// Freshness window of the view in seconds, used to flag stale values. 0 disables the check
        #[arg(short = 't', long = "ttl-seconds", default_value_t = 0)]
        ttl_seconds: i64,
    },
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct CliOptions {
    #[arg(short = 'c', long = "chdir", default_value = None)]
    /// Switch to a different feature repository directory before executing the given subcommand.
    /// Can also be set via the FEATURE_REPO_DIR_ENV_VAR environment variable.
    pub chdir: Option<String>,
    /// The logging level. Case-insensitive.
    #[arg(
        value_enum,
        long = "log-level",
        ignore_case = true,
        default_value = "info"
    )]
    pub log_level: LogLevel,
    /// Override the directory where the CLI should look for the feature_store.yaml file.
    /// Can also be set via the FEAST_FS_YAML_FILE_PATH environment variable
    #[arg(short = 'f', long = "feature-store-yaml", default_value = None)]
    pub feature_store_yaml: Option<String>,
    #[command(subcommand)]
    pub command: CliCommand,
}
