use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "zipfs")]
#[command(version)]
#[command(about = "Mount zip archives, standalone or appended to an executable, read-only", long_about = None)]
#[command(after_help = "Examples:\n  \
  zipfs mount data.zip /mnt/data            serve data.zip until Ctrl-C\n  \
  zipfs mount --combined app.bin /mnt/app   serve the zip appended to app.bin\n  \
  zipfs combine app data.zip app.bin        append data.zip and a footer to app\n  \
  zipfs split app.bin app.out data.out.zip  recover both parts of app.bin")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// More log output (-v debug, -vv trace)
    #[arg(short = 'v', global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Trace every filesystem request
    #[arg(long, global = true)]
    pub debug: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Mount an archive until interrupted
    Mount {
        /// Zip file, or combined file with --combined / --offset
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Existing empty directory to mount on
        #[arg(value_name = "MOUNTPOINT")]
        mount_point: PathBuf,

        /// Locate the zip through the file's footer
        #[arg(long, conflicts_with_all = ["offset", "length"])]
        combined: bool,

        /// Byte offset of the zip inside FILE
        #[arg(long, requires = "length")]
        offset: Option<u64>,

        /// Byte length of the zip inside FILE
        #[arg(long, requires = "offset")]
        length: Option<u64>,

        /// Let other users access the mount
        #[arg(long)]
        allow_other: bool,

        /// Expose the first of several entries sharing a path instead of the last
        #[arg(long)]
        first_wins: bool,

        /// Seconds to wait for in-flight requests when stopping
        #[arg(long, value_name = "SECS", default_value_t = 5)]
        drain_timeout: u64,
    },

    /// Split a combined file into its executable and zip
    Split {
        #[arg(value_name = "COMBINED")]
        combined: PathBuf,
        #[arg(value_name = "EXE_OUT")]
        executable: PathBuf,
        #[arg(value_name = "ZIP_OUT")]
        zipfile: PathBuf,
    },

    /// Append a zip and a footer to an executable
    Combine {
        #[arg(value_name = "EXE")]
        executable: PathBuf,
        #[arg(value_name = "ZIP")]
        zipfile: PathBuf,
        #[arg(value_name = "OUTPUT")]
        output: PathBuf,
    },

    /// Validate and print a combined file's footer
    Footer {
        #[arg(value_name = "COMBINED")]
        combined: PathBuf,
    },
}

impl Cli {
    /// Filter directive used when `RUST_LOG` is not set.
    pub fn log_level(&self) -> &'static str {
        match (self.debug, self.verbose) {
            (true, _) | (_, 2..) => "trace",
            (_, 1) => "debug",
            _ => "info",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_offset_mount() {
        let cli = Cli::parse_from([
            "zipfs", "mount", "app.bin", "/mnt/x", "--offset", "100", "--length", "200",
        ]);
        match cli.command {
            Command::Mount {
                offset, length, combined, ..
            } => {
                assert_eq!(offset, Some(100));
                assert_eq!(length, Some(200));
                assert!(!combined);
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert_eq!(cli.log_level(), "info");
    }

    #[test]
    fn offset_requires_length() {
        assert!(Cli::try_parse_from(["zipfs", "mount", "a", "b", "--offset", "1"]).is_err());
        assert!(
            Cli::try_parse_from(["zipfs", "mount", "a", "b", "--combined", "--offset", "1", "--length", "2"])
                .is_err()
        );
    }

    #[test]
    fn verbosity_raises_level() {
        let cli = Cli::parse_from(["zipfs", "-vv", "footer", "x"]);
        assert_eq!(cli.log_level(), "trace");
        let cli = Cli::parse_from(["zipfs", "footer", "x", "-v"]);
        assert_eq!(cli.log_level(), "debug");
        let cli = Cli::parse_from(["zipfs", "--debug", "footer", "x"]);
        assert_eq!(cli.log_level(), "trace");
    }
}
