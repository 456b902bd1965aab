use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "vodserve")]
#[command(author, version, about = "On-demand DASH/HLS streaming server")]
pub struct Cli {
    /// Path to config file (TOML, or JSON with a .json extension)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the streaming server
    Start {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Probe a media locator and list its streams.
    ///
    /// Remote locators are read through the server's /files/ URL, so a
    /// server must be reachable at the configured public URL.
    Probe {
        /// Locator, e.g. local/srv/media/film.mkv or rclone/gdrive/film.mkv
        #[arg(required = true)]
        locator: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the manifest a player would receive for a locator
    Manifest {
        #[arg(required = true)]
        locator: String,

        /// Manifest format
        #[arg(long, value_enum, default_value_t = ManifestFormat::Dash)]
        format: ManifestFormat,

        /// Describe stream-copied output instead of encoder presets
        #[arg(long, conflicts_with = "playable_codecs")]
        transmux: bool,

        /// Codecs the player can decode; streams in these codecs are copied
        /// and the rest encoded (HLS only)
        #[arg(long, value_delimiter = ',')]
        playable_codecs: Vec<String>,
    },

    /// Walk a storage locator and print every entry beneath it
    Ls {
        #[arg(required = true)]
        locator: String,
    },

    /// Check that required external tools are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses --config if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ManifestFormat {
    Dash,
    Hls,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn manifest_defaults_to_dash_transcoding() {
        let cli = Cli::parse_from(["vodserve", "manifest", "local/a.mkv"]);
        match cli.command {
            Commands::Manifest {
                locator,
                format,
                transmux,
                playable_codecs,
            } => {
                assert_eq!(locator, "local/a.mkv");
                assert_eq!(format, ManifestFormat::Dash);
                assert!(!transmux);
                assert!(playable_codecs.is_empty());
            }
            _ => panic!("expected manifest command"),
        }
    }

    #[test]
    fn playable_codecs_split_on_commas() {
        let cli = Cli::parse_from([
            "vodserve",
            "manifest",
            "local/a.mkv",
            "--format",
            "hls",
            "--playable-codecs",
            "avc1.640028,mp4a.40.2",
        ]);
        match cli.command {
            Commands::Manifest { playable_codecs, .. } => {
                assert_eq!(playable_codecs, vec!["avc1.640028", "mp4a.40.2"]);
            }
            _ => panic!("expected manifest command"),
        }
        assert!(Cli::try_parse_from([
            "vodserve",
            "manifest",
            "local/a.mkv",
            "--transmux",
            "--playable-codecs",
            "mp4a.40.2",
        ])
        .is_err());
    }

    #[test]
    fn start_overrides_are_optional() {
        let cli = Cli::parse_from(["vodserve", "-v", "start", "--port", "9000"]);
        assert!(cli.verbose);
        assert!(matches!(
            cli.command,
            Commands::Start { host: None, port: Some(9000) }
        ));
    }
}
