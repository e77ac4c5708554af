//! Implementation of the 'save' command.

use std::process::ExitCode;

use build_cache::archive::TarZstdArchiver;
use build_cache::paths::GlobPathResolver;
use build_cache::save::{SaveOutcome, SaveRequest, Saver};
use build_cache::skip::SkipReason;
use build_cache::tracker::NoopTracker;
use tokio_util::sync::CancellationToken;

use crate::format::BytesFmt;
use crate::output::Output;
use crate::parse::SaveArgs;

use super::{build_config, log_error, LogHandler};

pub fn main(out: &mut Output, args: &SaveArgs, cancel: CancellationToken) -> ExitCode {
    let Some(config) = build_config(out, &args.backend) else {
        return ExitCode::FAILURE;
    };

    let rt = tokio::runtime::Runtime::new().expect("failed to start the async runtime");
    rt.block_on(run(out, args, config, cancel))
}

async fn run(out: &mut Output, args: &SaveArgs, config: build_cache::config::Config, cancel: CancellationToken) -> ExitCode {
    let archiver = TarZstdArchiver::new(config.compression_level);
    let saver = Saver::new(config, GlobPathResolver, archiver, NoopTracker, super::build_kv());

    let request = SaveRequest {
        key_template: args.key.clone(),
        paths: args.paths.clone(),
        only_check_key: args.only_check_key,
    };

    let http = reqwest::Client::new();
    let mut handler = LogHandler::new(out);

    match saver.save(&request, http, cancel, &mut handler).await {
        Ok(SaveOutcome::NothingToSave) => {
            out.log("save_nothing_to_save").success("No path resolved to anything, nothing to save");
            ExitCode::SUCCESS
        }
        Ok(SaveOutcome::Skipped { key, reason }) => {
            out.log("save_skipped").arg(key.as_str()).arg(skip_reason_code(reason)).success(format_args!(
                "Save skipped for key {}: {}",
                key.as_str(),
                skip_reason_message(reason)
            ));
            ExitCode::SUCCESS
        }
        Ok(SaveOutcome::Uploaded { key, archive_sha256, archive_bytes }) => {
            out.log("save_uploaded")
                .arg(key.as_str())
                .arg(&archive_sha256)
                .arg(archive_bytes)
                .success(format_args!("Saved {} ({}) under key {}", BytesFmt(archive_bytes), archive_sha256, key.as_str()));
            ExitCode::SUCCESS
        }
        Err(error) => {
            log_error(out, &error);
            ExitCode::FAILURE
        }
    }
}

fn skip_reason_code(reason: SkipReason) -> &'static str {
    match reason {
        SkipReason::KeyNotDynamic => "key_not_dynamic",
        SkipReason::NoRestore => "no_restore",
        SkipReason::RestoreSameUniqueKey => "restore_same_unique_key",
        SkipReason::RestoreSameKeyButContentsMayDiffer => "restore_same_key_contents_may_differ",
        SkipReason::RestoreOtherKey => "restore_other_key",
        SkipReason::ChecksumMatch => "checksum_match",
        SkipReason::ChecksumMismatch => "checksum_mismatch",
    }
}

fn skip_reason_message(reason: SkipReason) -> &'static str {
    match reason {
        SkipReason::KeyNotDynamic => "key is static and was never restored",
        SkipReason::NoRestore => "no prior restore recorded, nothing to compare against",
        SkipReason::RestoreSameUniqueKey => "this exact key was already restored",
        SkipReason::RestoreSameKeyButContentsMayDiffer => "this key was restored but content equality wasn't checked",
        SkipReason::RestoreOtherKey => "a different key was restored",
        SkipReason::ChecksumMatch => "the archive content matches the previously restored digest",
        SkipReason::ChecksumMismatch => "the archive content changed since the last restore",
    }
}
