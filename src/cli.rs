use clap::{Parser, Subcommand, ValueEnum};
use std::fmt;
use std::path::PathBuf;

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (defaults to the first of $XDG_CONFIG_HOME/pansou/config.toml,
    /// ~/.pansou.toml, ./.pansou.toml)
    #[clap(long, value_parser)]
    pub config: Option<PathBuf>,

    #[clap(long, value_parser, default_value_t = false)]
    pub verbose: bool,

    #[clap(long, value_parser)]
    pub log: Option<PathBuf>,

    /// Print prometheus metrics to stderr before exiting
    #[clap(long, value_parser, default_value_t = false)]
    pub print_metrics: bool,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Search channels and plugins for cloud-drive links
    Search {
        keyword: String,

        #[clap(long, value_parser, use_value_delimiter = true)]
        channels: Option<Vec<String>>,

        #[clap(long, value_parser, use_value_delimiter = true)]
        plugins: Option<Vec<String>>,

        #[clap(long, value_parser)]
        src: Option<SourceArg>,

        /// Response shape; anything other than the listed values is passed through
        #[clap(long, value_parser)]
        res: Option<String>,

        #[clap(long, value_parser, use_value_delimiter = true)]
        cloud_types: Option<Vec<String>>,

        #[clap(long, value_parser, default_value_t = false)]
        refresh: bool,

        #[clap(long, value_parser)]
        concurrency: Option<usize>,

        /// Extra plugin parameters as a JSON object
        #[clap(long, value_parser)]
        ext: Option<String>,

        #[clap(long, value_parser, default_value_t = false)]
        pretty: bool,
    },
    /// Report service health
    Health {
        #[clap(long, value_parser, default_value_t = false)]
        pretty: bool,
    },
}

#[derive(ValueEnum, Clone, Debug)]
pub enum SourceArg {
    All,
    Tg,
    Plugin,
}

impl fmt::Display for SourceArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceArg::All => write!(f, "all"),
            SourceArg::Tg => write!(f, "tg"),
            SourceArg::Plugin => write!(f, "plugin"),
        }
    }
}
