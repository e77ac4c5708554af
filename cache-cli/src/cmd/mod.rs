//! Implementing the logic for the different CLI commands.

mod save;
mod restore;

use std::io;
use std::time::Instant;

use build_cache::config::Config;
use build_cache::kv::EnvKv;
use tokio_util::sync::CancellationToken;

use crate::format::BytesFmt;
use crate::output::{LogLevel, Output};
use crate::parse::{BackendArgs, BackendKind, Cli, CliOutput, Cmd};

pub fn main(args: Cli) -> std::process::ExitCode {
    let cancel = CancellationToken::new();
    let ctrlc_cancel = cancel.clone();
    ctrlc::set_handler(move || {
        ctrlc_cancel.cancel();
    })
    .unwrap();

    let mut out = match args.output.unwrap_or(CliOutput::Human) {
        CliOutput::Human => Output::human(match args.verbose {
            0 => LogLevel::Pending,
            1.. => LogLevel::Info,
        }),
        CliOutput::Machine => Output::tab_separated(),
    };

    match &args.cmd {
        Cmd::Save(save_args) => save::main(&mut out, save_args, cancel),
        Cmd::Restore(restore_args) => restore::main(&mut out, restore_args, cancel),
    }
}

/// Build process-wide configuration from the backend CLI args and the environment.
pub fn build_config(out: &mut Output, args: &BackendArgs) -> Option<Config> {
    let config = match args.backend {
        BackendKind::Service => Config::from_env_service(),
        BackendKind::S3 => Config::from_env_s3(args.bucket.clone().unwrap_or_default()),
    };

    let config = match config {
        Ok(config) => config,
        Err(error) => {
            log_error(out, &error);
            return None;
        }
    };

    let config = match args.compression_level {
        Some(level) => match config.with_compression_level(level) {
            Ok(config) => config,
            Err(error) => {
                log_error(out, &error);
                return None;
            }
        },
        None => config,
    };

    Some(config)
}

pub fn build_kv() -> EnvKv {
    EnvKv
}

/// Generic handler for the transport's progress events.
#[derive(Debug)]
pub struct LogHandler<'a> {
    out: &'a mut Output,
    transfer_start: Option<Instant>,
}

impl<'a> LogHandler<'a> {
    pub fn new(out: &'a mut Output) -> Self {
        Self { out, transfer_start: None }
    }
}

impl build_cache::transport::Handler for LogHandler<'_> {
    fn chunk_done(&mut self, completed: u64, total: u64) {
        if self.transfer_start.is_none() {
            self.transfer_start = Some(Instant::now());
        }

        let elapsed = self.transfer_start.unwrap().elapsed();
        let progress = (completed as f32 / total.max(1) as f32).min(1.0) * 100.0;

        let mut log = self.out.log_background("upload");
        if completed == total {
            self.transfer_start = None;
            log.message(format_args!("uploaded {completed}/{total} chunks in {:.1}s", elapsed.as_secs_f32()));
        } else {
            log.message(format_args!("{progress:.1}% ({completed}/{total} chunks)"));
        }

        log.arg(completed);
        log.arg(total);
        log.arg(elapsed.as_secs_f32());
    }

    fn chunk_hung(&mut self, index: u64, attempt: u32) {
        self.out
            .log("chunk_hung")
            .arg(index)
            .arg(attempt)
            .warning(format_args!("Chunk {index} looked hung, cancelling and retrying (attempt {attempt})"));
    }

    fn download_progress(&mut self, received: u64, total: Option<u64>) {
        let mut log = self.out.log_background("download");
        match total {
            Some(total) if total > 0 => {
                let pct = (received as f32 / total as f32).min(1.0) * 100.0;
                log.message(format_args!("{pct:.1}% ({} / {})", BytesFmt(received), BytesFmt(total)));
            }
            _ => {
                log.message(format_args!("{}", BytesFmt(received)));
            }
        }
        log.arg(received);
        log.args(total);
    }
}

/// Log a library error on the given output.
pub fn log_error(out: &mut Output, error: &build_cache::Error) {
    use build_cache::Error;

    match error {
        Error::Configuration(message) => {
            out.log("error_configuration")
                .arg(message)
                .error(format_args!("Configuration error: {message}"));
        }
        Error::Transport(transport_error) => log_transport_error(out, transport_error),
        Error::Multipart(multipart_error) => log_multipart_error(out, multipart_error),
        Error::CacheNotFound => {
            out.log("error_cache_not_found").error("No cache entry found for any candidate key");
        }
        Error::Cancelled => {
            out.log("error_cancelled").error("Operation cancelled");
        }
        Error::Io { error, file } => log_io_error(out, error, file.as_deref()),
        Error::Archive(message) => {
            out.log("error_archive").arg(message).error(format_args!("Archive error: {message}"));
        }
        other => {
            out.log("error_unknown").error(format_args!("Unexpected error: {other}"));
        }
    }
}

fn log_transport_error(out: &mut Output, error: &build_cache::transport::TransportError) {
    use build_cache::transport::TransportError;

    match error {
        TransportError::ChunkFailed { index, status, body } => {
            out.newline();
            out.log("error_chunk_failed")
                .arg(index)
                .arg(status)
                .error(format_args!("Chunk {index} failed with status {status}"))
                .additional(format_args!("{body}"));
        }
        TransportError::MissingEtag { index } => {
            out.log("error_missing_etag").arg(index).error(format_args!("Chunk {index} response carried no ETag"));
        }
        TransportError::Request(request_error) => {
            out.log("error_request").arg(request_error).error(format_args!("Request error: {request_error}"));
        }
        TransportError::Io(io_error) => log_io_error(out, io_error, None),
        TransportError::Cancelled => {
            out.log("error_cancelled").error("Transfer cancelled");
        }
        TransportError::NotFound => {
            out.log("error_not_found").error("Cache entry not found");
        }
        TransportError::ChunkNotReady(index) => {
            out.log("error_chunk_not_ready").arg(index).error(format_args!("Chunk {index} requested before it was available"));
        }
    }
}

fn log_multipart_error(out: &mut Output, error: &build_cache::multipart::MultipartError) {
    use build_cache::multipart::MultipartError;

    match error {
        MultipartError::NotFound => {
            out.log("error_not_found").error("Cache entry not found");
        }
        MultipartError::InvalidKey(message) => {
            out.log("error_invalid_key").arg(message).error(format_args!("Invalid cache key: {message}"));
        }
        MultipartError::ServiceError { status, body } => {
            out.newline();
            out.log("error_service")
                .arg(status)
                .error(format_args!("Cache service returned {status}"))
                .additional(format_args!("{body}"));
        }
        MultipartError::Request(request_error) => {
            out.log("error_request").arg(request_error).error(format_args!("Request error: {request_error}"));
        }
        MultipartError::Transport(transport_error) => log_transport_error(out, transport_error),
    }
}

fn log_io_error(out: &mut Output, error: &io::Error, file: Option<&std::path::Path>) {
    let mut log = out.log("error_io");
    log.arg(format_args!("{error}"));
    if let Some(file) = file {
        log.arg(file.display());
    }
    log.error(format_args!("I/O error: {error}"));
    if let Some(file) = file {
        log.additional(format_args!("At {}", file.display()));
    }
}
