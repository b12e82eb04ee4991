//! Command-line front end for zipfs.
//!
//! `mount` serves an archive until Ctrl-C; `split`, `combine` and `footer`
//! operate on combined files.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

use zipfs::cli::Command;
use zipfs::footer::hex;
use zipfs::{Cli, CombinerConfig, DuplicatePolicy, Mount, MountOptions};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level());

    match cli.command {
        Command::Mount {
            file,
            mount_point,
            combined,
            offset,
            length,
            allow_other,
            first_wins,
            drain_timeout,
        } => {
            let mount = if combined {
                Mount::from_combined(&file, &mount_point)
                    .with_context(|| format!("reading footer of {}", file.display()))?
            } else if let (Some(offset), Some(length)) = (offset, length) {
                Mount::with_range(&file, &mount_point, offset, length)
            } else {
                Mount::new(&file, &mount_point)
            };
            let options = MountOptions {
                fsname: file.display().to_string(),
                allow_other,
                drain_timeout: Duration::from_secs(drain_timeout),
                duplicate_policy: if first_wins {
                    DuplicatePolicy::FirstWins
                } else {
                    DuplicatePolicy::LastWins
                },
                ..MountOptions::default()
            };
            serve(mount.with_options(options)).await
        }
        Command::Split {
            combined,
            executable,
            zipfile,
        } => {
            let footer = zipfs::split(&CombinerConfig {
                output_path: combined.clone(),
                executable_path: executable.clone(),
                zipfile_path: zipfile.clone(),
                split: true,
            })
            .with_context(|| format!("splitting {}", combined.display()))?;
            println!(
                "{} ({}) + {} ({})",
                executable.display(),
                format_size(footer.executable_len),
                zipfile.display(),
                format_size(footer.zipfile_len)
            );
            Ok(())
        }
        Command::Combine {
            executable,
            zipfile,
            output,
        } => {
            let footer = zipfs::combine(&CombinerConfig {
                output_path: output.clone(),
                executable_path: executable,
                zipfile_path: zipfile,
                split: false,
            })
            .with_context(|| format!("writing {}", output.display()))?;
            println!(
                "{}: zip at offset {} ({})",
                output.display(),
                footer.executable_len,
                format_size(footer.zipfile_len)
            );
            Ok(())
        }
        Command::Footer { combined } => print_footer(&combined),
    }
}

fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

/// Mount, wait for Ctrl-C, then unmount.
async fn serve(mut mount: Mount) -> Result<()> {
    mount.start().await.context("mount failed")?;
    println!("serving at {}, press Ctrl-C to unmount", mount.mount_point().display());

    tokio::signal::ctrl_c()
        .await
        .context("waiting for interrupt")?;
    info!("interrupt received, unmounting");

    mount.stop().await.context("unmount failed")?;
    Ok(())
}

fn print_footer(path: &Path) -> Result<()> {
    let (start, footer, _file) = zipfs::read_footer(path)
        .with_context(|| format!("reading footer of {}", path.display()))?;

    println!("footer offset:       {}", start);
    println!(
        "executable:          {} bytes ({})",
        footer.executable_len,
        format_size(footer.executable_len)
    );
    println!(
        "zip:                 {} bytes ({}) at offset {}",
        footer.zipfile_len,
        format_size(footer.zipfile_len),
        footer.executable_len
    );
    println!("footer length:       {}", footer.footer_len);
    println!("executable blake2b:  {}", hex(&footer.executable_checksum));
    println!("zip blake2b:         {}", hex(&footer.zipfile_checksum));
    println!("footer blake2b:      {}", hex(&footer.footer_checksum));
    Ok(())
}

fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}
