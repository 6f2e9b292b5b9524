//! Client Configuration Settings
//!
//! Command line options (with `RDM_*` environment fallbacks) and their
//! validated form.
//!
//! # Validation
//!
//! - Exactly one item source: `--items`, `--file` or `--ext-file`.
//! - View by names or by field IDs, not both.
//! - `--auto-exit` forces snapshot requests.
//! - The statistics interval never exceeds the run time limit.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use super::items::ItemSource;
use crate::domain::session::SessionConfig;
use crate::domain::subscription::{ItemSpec, SubscriptionPlanner, ViewFields};
use crate::infrastructure::rdm::{ClientSettings, DumpOptions};

/// Raw command line options.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "rdm-stream-client",
    version,
    about = "Subscribe to RDM items over a tr_json2 websocket and count the responses"
)]
#[allow(clippy::struct_excessive_bools)]
pub struct CliOptions {
    /// Service name to request from.
    #[arg(short = 'S', long, env = "RDM_SERVICE")]
    pub service: Option<String>,

    /// Hostname or IP of the server.
    #[arg(short = 'H', long, env = "RDM_HOST", default_value = "ads1")]
    pub host: String,

    /// Port of the server.
    #[arg(short, long, env = "RDM_PORT", default_value_t = 15000)]
    pub port: u16,

    /// Login user name.
    #[arg(short, long, env = "RDM_USER", default_value = "user")]
    pub user: String,

    /// Authentication token; switches to token login.
    #[arg(long, env = "RDM_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Application position.
    #[arg(long, env = "RDM_POSITION", default_value = "127.0.0.1")]
    pub position: String,

    /// Application identifier.
    #[arg(long = "app-id", env = "RDM_APP_ID", default_value = "256")]
    pub app_id: String,

    /// Comma separated list of items.
    #[arg(short, long)]
    pub items: Option<String>,

    /// File with one item per line.
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Multi domain item file, one `<domain>|<item>` per line (e.g. `6|VOD.L`).
    #[arg(long = "ext-file")]
    pub ext_file: Option<PathBuf>,

    /// Domain model for `--items` and `--file`.
    #[arg(long = "domain", env = "RDM_DOMAIN")]
    pub domain: Option<String>,

    /// Comma separated field IDs for a view.
    #[arg(long = "view-fids")]
    pub view_fids: Option<String>,

    /// Comma separated field names for a view.
    #[arg(long = "view-names")]
    pub view_names: Option<String>,

    /// Snapshot requests instead of streaming.
    #[arg(short = 't', long)]
    pub snapshot: bool,

    /// Exit once every item has been answered (implies `--snapshot`).
    #[arg(short = 'e', long = "auto-exit")]
    pub auto_exit: bool,

    /// Exit after this many minutes (0 = run until closed).
    #[arg(long = "exit-time", env = "RDM_EXIT_TIME", default_value_t = 0)]
    pub exit_time_mins: u64,

    /// Statistics interval in seconds (0 = only at exit).
    #[arg(long = "stats-interval", env = "RDM_STATS_INTERVAL", default_value_t = 10)]
    pub stats_interval_secs: u64,

    /// Log received frames.
    #[arg(short = 'X', long)]
    pub dump: bool,

    /// Log sent frames.
    #[arg(long = "show-sent")]
    pub show_sent: bool,

    /// Include Ping/Pong in frame logs.
    #[arg(long = "show-ping-pong")]
    pub show_ping_pong: bool,

    /// Log item status messages.
    #[arg(long = "show-status")]
    pub show_status: bool,

    /// Prometheus exporter port (0 = disabled).
    #[arg(long = "metrics-port", env = "RDM_METRICS_PORT", default_value_t = 0)]
    pub metrics_port: u16,
}

/// Server endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Service name (informational; not sent on item requests).
    pub service: Option<String>,
}

impl ConnectionSettings {
    /// Websocket URL of the server.
    #[must_use]
    pub fn url(&self) -> String {
        format!("ws://{}:{}/WebSocket", self.host, self.port)
    }
}

/// Validated client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server endpoint.
    pub connection: ConnectionSettings,
    /// Login parameters.
    pub session: SessionConfig,
    /// Items to request.
    pub items: Vec<ItemSpec>,
    /// Field view shared by all requests.
    pub view: Option<ViewFields>,
    /// `false` for snapshot requests.
    pub streaming: bool,
    /// Close once every item has been answered.
    pub auto_exit: bool,
    /// Run loop settings.
    pub client: ClientSettings,
    /// Prometheus exporter port (0 = disabled).
    pub metrics_port: u16,
}

impl ClientConfig {
    /// Validate options and load the item source.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for conflicting or missing options, an
    /// unreadable item file, an empty item list or a bad field ID.
    pub fn from_options(options: CliOptions) -> Result<Self, ConfigError> {
        let view = parse_view(options.view_fids.as_deref(), options.view_names.as_deref())?;

        let source = ItemSource::from_options(
            options.items,
            options.file,
            options.ext_file,
        )?;
        let items = source.load(options.domain.as_deref())?;
        if items.is_empty() {
            return Err(ConfigError::EmptyItemList);
        }

        let streaming = !(options.snapshot || options.auto_exit);
        if options.auto_exit && !options.snapshot {
            tracing::info!("Auto exit selected, enabling snapshot mode");
        }

        let session = match options.token {
            Some(token) if token.trim().is_empty() => {
                return Err(ConfigError::EmptyValue("token".to_string()));
            }
            Some(token) => SessionConfig::token(token, options.app_id, options.position),
            None => SessionConfig::plain(options.user, options.app_id, options.position),
        };

        let exit_after = (options.exit_time_mins > 0)
            .then(|| Duration::from_secs(options.exit_time_mins.saturating_mul(60)));
        let stats_interval = (options.stats_interval_secs > 0).then(|| {
            let interval = Duration::from_secs(options.stats_interval_secs);
            exit_after.map_or(interval, |limit| interval.min(limit))
        });

        Ok(Self {
            connection: ConnectionSettings {
                host: options.host,
                port: options.port,
                service: options.service,
            },
            session,
            items,
            view,
            streaming,
            auto_exit: options.auto_exit,
            client: ClientSettings {
                stats_interval,
                exit_after,
                dump: DumpOptions {
                    received: options.dump,
                    sent: options.show_sent,
                    ping_pong: options.show_ping_pong,
                    statuses: options.show_status,
                },
                ..ClientSettings::default()
            },
            metrics_port: options.metrics_port,
        })
    }

    /// Subscription planner for the configured items.
    #[must_use]
    pub fn planner(&self) -> SubscriptionPlanner {
        SubscriptionPlanner::new(self.items.clone(), self.view.clone(), self.streaming)
    }
}

fn parse_view(fids: Option<&str>, names: Option<&str>) -> Result<Option<ViewFields>, ConfigError> {
    match (fids, names) {
        (Some(_), Some(_)) => Err(ConfigError::ConflictingView),
        (Some(fids), None) => {
            let ids = split_list(fids)
                .map(|fid| {
                    fid.parse::<i32>()
                        .map_err(|_| ConfigError::InvalidFieldId(fid.to_string()))
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Some(ViewFields::Ids(ids)))
        }
        (None, Some(names)) => Ok(Some(ViewFields::Names(
            split_list(names).map(str::to_string).collect(),
        ))),
        (None, None) => Ok(None),
    }
}

/// Split a comma separated list, trimming entries and dropping blanks.
pub(crate) fn split_list(list: &str) -> impl Iterator<Item = &str> {
    list.split(',').map(str::trim).filter(|s| !s.is_empty())
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Both view flavours were given.
    #[error("only one type of view allowed; --view-fids or --view-names")]
    ConflictingView,

    /// A field ID is not an integer.
    #[error("invalid field id: {0}")]
    InvalidFieldId(String),

    /// More than one item source was given.
    #[error("only one item list allowed; --items, --file or --ext-file")]
    MultipleItemSources,

    /// No item source was given.
    #[error("must specify items using one of --items, --file or --ext-file")]
    NoItemSource,

    /// The item source yielded nothing.
    #[error("item list is empty")]
    EmptyItemList,

    /// Item file could not be read.
    #[error("cannot read item file {path}: {source}")]
    ItemFile {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Option has an empty value.
    #[error("{0} cannot be empty")]
    EmptyValue(String),
}
