//! CLI command definitions and parsing
use crate::config::Config;
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "visearch",
    version,
    about = "Image similarity search backed by Elasticsearch kNN",
    long_about = "visearch embeds a corpus of images with CLIP, indexes the vectors (and optional EXIF \
                  capture date and location) into Elasticsearch, and serves text, image-id and \
                  uploaded-image similarity queries over HTTP."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/visearch/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Embed the image corpus and bulk-load it into the index
    Ingest(IngestArgs),

    /// Run the query HTTP service
    Serve {
        /// Address to bind (overrides server.host)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind (overrides server.port)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show text model readiness and index state
    Status,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Ingestion flags; each one overrides its config value for this run
///
/// Boolean flags accept `--flag`, `--flag=true` and `--flag=false`.
#[derive(clap::Args, Debug, Default, Clone)]
pub struct IngestArgs {
    /// Elasticsearch endpoint
    #[arg(long = "es_host", value_name = "URL")]
    pub es_host: Option<String>,

    #[arg(long = "es_user")]
    pub es_user: Option<String>,

    #[arg(long = "es_password")]
    pub es_password: Option<String>,

    /// Verify the server's TLS certificate
    #[arg(long = "verify_certs", action = ArgAction::Set, num_args = 0..=1, default_missing_value = "true")]
    pub verify_certs: Option<bool>,

    /// Concurrent bulk writers
    #[arg(long = "thread_count")]
    pub thread_count: Option<usize>,

    /// Documents per bulk request
    #[arg(long = "chunk_size")]
    pub chunk_size: Option<usize>,

    /// Request timeout in seconds
    #[arg(long = "timeout", value_name = "SECONDS")]
    pub timeout: Option<u64>,

    /// Drop the index before loading
    #[arg(long = "delete_existing", action = ArgAction::Set, num_args = 0..=1, default_missing_value = "true")]
    pub delete_existing: Option<bool>,

    /// PEM bundle for a private CA
    #[arg(long = "ca_certs", value_name = "FILE")]
    pub ca_certs: Option<PathBuf>,

    /// Store EXIF GPS position as `exif.location`
    #[arg(long = "extract_GPS_location", action = ArgAction::Set, num_args = 0..=1, default_missing_value = "true")]
    pub extract_gps_location: Option<bool>,

    /// Directory the image corpus is read from
    #[arg(long = "images_root", value_name = "DIR")]
    pub images_root: Option<PathBuf>,

    /// Glob, relative to the images root, selecting files to ingest
    #[arg(long)]
    pub pattern: Option<String>,

    /// Target index name
    #[arg(long)]
    pub index: Option<String>,

    /// Index schema file ({mappings, settings})
    #[arg(long, value_name = "FILE")]
    pub mappings: Option<PathBuf>,
}

impl IngestArgs {
    /// Overlay the flags that were given onto `config`
    pub fn apply(&self, config: &mut Config) {
        if let Some(host) = &self.es_host {
            config.elasticsearch.host = host.clone();
        }
        if let Some(user) = &self.es_user {
            config.elasticsearch.user = user.clone();
        }
        if let Some(password) = &self.es_password {
            config.elasticsearch.password = password.clone();
        }
        if let Some(verify) = self.verify_certs {
            config.elasticsearch.verify_certs = verify;
        }
        if let Some(ca_certs) = &self.ca_certs {
            config.elasticsearch.ca_certs = Some(ca_certs.clone());
        }
        if let Some(timeout) = self.timeout {
            config.elasticsearch.request_timeout_secs = timeout;
        }
        if let Some(threads) = self.thread_count {
            config.ingest.thread_count = threads;
        }
        if let Some(chunk_size) = self.chunk_size {
            config.ingest.chunk_size = chunk_size;
        }
        if let Some(delete) = self.delete_existing {
            config.ingest.delete_existing = delete;
        }
        if let Some(gps) = self.extract_gps_location {
            config.ingest.extract_gps_location = gps;
        }
        if let Some(root) = &self.images_root {
            config.corpus.images_root = root.clone();
        }
        if let Some(pattern) = &self.pattern {
            config.corpus.pattern = pattern.clone();
        }
        if let Some(index) = &self.index {
            config.index.name = index.clone();
        }
        if let Some(mappings) = &self.mappings {
            config.index.mappings_file = mappings.clone();
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    fn ingest_args(args: &[&str]) -> IngestArgs {
        let argv = std::iter::once("visearch").chain(std::iter::once("ingest")).chain(args.iter().copied());
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Ingest(args) => args,
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_ingest_flags_keep_underscores() {
        let args = ingest_args(&[
            "--es_host",
            "https://es.internal:9200",
            "--thread_count",
            "8",
            "--chunk_size",
            "50",
            "--ca_certs",
            "/etc/ssl/ca.pem",
        ]);
        assert_eq!(args.es_host.as_deref(), Some("https://es.internal:9200"));
        assert_eq!(args.thread_count, Some(8));
        assert_eq!(args.chunk_size, Some(50));
        assert_eq!(args.ca_certs, Some(PathBuf::from("/etc/ssl/ca.pem")));
        assert_eq!(args.delete_existing, None);
    }

    #[test]
    fn test_boolean_flags() {
        let args = ingest_args(&["--extract_GPS_location", "--delete_existing=false"]);
        assert_eq!(args.extract_gps_location, Some(true));
        assert_eq!(args.delete_existing, Some(false));

        let args = ingest_args(&["--verify_certs", "false"]);
        assert_eq!(args.verify_certs, Some(false));
    }

    #[test]
    fn test_apply_overrides_only_given_flags() {
        let mut config = Config::default();
        let args = ingest_args(&["--timeout", "60", "--delete_existing=false", "--index", "photos"]);
        args.apply(&mut config);

        assert_eq!(config.elasticsearch.request_timeout_secs, 60);
        assert!(!config.ingest.delete_existing);
        assert_eq!(config.index.name, "photos");
        assert_eq!(config.ingest.thread_count, 4);
        assert_eq!(config.ingest.chunk_size, 100);
        assert!(config.elasticsearch.verify_certs);
    }

    #[test]
    fn test_rejects_non_boolean() {
        let argv = ["visearch", "ingest", "--verify_certs=maybe"];
        assert!(Cli::try_parse_from(argv).is_err());
    }
}
