//! Implementation of the 'restore' command.

use std::process::ExitCode;

use build_cache::archive::TarZstdArchiver;
use build_cache::restore::{RestoreOutcome, RestoreRequest, Restorer};
use tokio_util::sync::CancellationToken;

use crate::output::Output;
use crate::parse::RestoreArgs;

use super::{build_config, log_error, LogHandler};

pub fn main(out: &mut Output, args: &RestoreArgs, cancel: CancellationToken) -> ExitCode {
    let Some(config) = build_config(out, &args.backend) else {
        return ExitCode::FAILURE;
    };

    let rt = tokio::runtime::Runtime::new().expect("failed to start the async runtime");
    rt.block_on(run(out, args, config, cancel))
}

async fn run(out: &mut Output, args: &RestoreArgs, config: build_cache::config::Config, cancel: CancellationToken) -> ExitCode {
    let archiver = TarZstdArchiver::new(config.compression_level);
    let mut restorer = Restorer::new(config, archiver, super::build_kv());

    let request = RestoreRequest { candidate_keys: args.keys.clone(), extract_to: args.path.clone() };

    let http = reqwest::Client::new();
    let mut handler = LogHandler::new(out);

    match restorer.restore(&request, http, cancel, &mut handler).await {
        Ok(RestoreOutcome::Miss) => {
            out.log("restore_miss").arg("false").success("No cache entry matched any candidate key");
            ExitCode::SUCCESS
        }
        Ok(RestoreOutcome::Hit { matched_key, exact, archive_sha256 }) => {
            let hit_kind = if exact { "exact" } else { "partial" };
            out.log("restore_hit")
                .arg(matched_key.as_str())
                .arg(hit_kind)
                .arg(&archive_sha256)
                .success(format_args!("Restored key {} ({hit_kind} match)", matched_key.as_str()));
            ExitCode::SUCCESS
        }
        Err(error) => {
            log_error(out, &error);
            ExitCode::FAILURE
        }
    }
}
