//! Implementation of the command line parser, using clap struct derivation.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ================= //
//    MAIN COMMAND   //
// ================= //

/// Save and restore build artifacts to/from a remote cache, for use as a CI step.
#[derive(Debug, Parser)]
#[command(name = "bitrise-build-cache", version, author, disable_help_subcommand = true, max_term_width = 140)]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Cmd,
    /// Enable verbose output, the more -v argument you put, the more verbose the
    /// step will be.
    #[arg(short, action = clap::ArgAction::Count)]
    pub verbose: u8,
    /// Change the default output format of the step.
    #[arg(long)]
    pub output: Option<CliOutput>,
}

#[derive(Debug, Subcommand)]
pub enum Cmd {
    Save(SaveArgs),
    Restore(RestoreArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliOutput {
    /// Human-readable output, the default if stdout is detected as a terminal.
    Human,
    /// Tab-separated machine output mode to allow parsing by other programs.
    Machine,
}

// ================= //
//  BACKEND ARGS     //
// ================= //

/// Arguments common to `save` and `restore` that select and configure the cache backend.
#[derive(Debug, Args)]
pub struct BackendArgs {
    /// Which backend to read configuration for and talk to.
    #[arg(long, default_value = "service")]
    pub backend: BackendKind,
    /// Bucket name, required when --backend=s3.
    #[arg(long, required_if_eq("backend", "s3"))]
    pub bucket: Option<String>,
    /// zstd compression level used when producing the archive, in [1, 19].
    #[arg(long)]
    pub compression_level: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// The coordinating Bitrise cache service, driven over its multipart-upload API.
    Service,
    /// A directly-addressed S3 bucket.
    S3,
}

// ================= //
//   SAVE COMMAND    //
// ================= //

/// Archive the given paths and upload them to the cache under the given key.
///
/// The key can reference build context fields and computed file checksums with
/// `{{ }}` placeholders, see the README for the template syntax. If all paths resolve
/// to nothing, the step succeeds without uploading. If the Skip Oracle determines
/// that an equivalent archive is already cached under this key, the upload is elided.
#[derive(Debug, Args)]
pub struct SaveArgs {
    /// Cache key template, e.g. `deps-{{ .OS }}-{{ checksum "go.sum" }}`.
    #[arg(long)]
    pub key: String,
    /// A path or glob pattern to include in the archive. Can be specified multiple
    /// times; directories are archived recursively.
    #[arg(long = "path", name = "PATTERN", required = true)]
    pub paths: Vec<String>,
    /// Skip the upload if the evaluated key alone was already restored this run,
    /// without comparing the archive's content digest.
    #[arg(long)]
    pub only_check_key: bool,
    #[command(flatten)]
    pub backend: BackendArgs,
}

// ================= //
//  RESTORE COMMAND  //
// ================= //

/// Look up and restore a cached archive matching one of the given candidate keys.
///
/// Candidates are tried in the given order; the first one the cache service or
/// bucket has an entry for is restored. A miss on every candidate is not an error:
/// it is reported through `BITRISE_CACHE_HIT=false` and a clean exit.
#[derive(Debug, Args)]
pub struct RestoreArgs {
    /// A candidate cache key, most specific first. Can be specified multiple times;
    /// at most 8 candidates are sent to the cache service.
    #[arg(long = "key", name = "KEY", required = true)]
    pub keys: Vec<String>,
    /// Directory to extract the restored archive into.
    #[arg(long)]
    pub path: PathBuf,
    #[command(flatten)]
    pub backend: BackendArgs,
}
