// SPDX-License-Identifier: Apache-2.0

use crate::init::args::AgentRun;
use crate::init::journald_receiver::JournaldReceiverArgs;
use figment::{
    Figment,
    providers::{Env, Format, Json},
};
use std::path::Path;
use tower::BoxError;
use tracing::debug;

const RECEIVER_ENV_PREFIX: &str = "ROTEL_JOURNALD_RECEIVER_";

/// Load receiver arguments from a JSON config file. `ROTEL_JOURNALD_RECEIVER_*`
/// variables override keys from the file.
pub fn load_receiver_args_file(path: &Path) -> Result<JournaldReceiverArgs, BoxError> {
    if !path.exists() {
        return Err(format!("config file not found: {}", path.display()).into());
    }

    let figment = Figment::new()
        .merge(Json::file(path))
        .merge(Env::prefixed(RECEIVER_ENV_PREFIX));

    match figment.extract() {
        Ok(args) => Ok(args),
        Err(e) => Err(format!(
            "failed to parse journald receiver config {}: {}",
            path.display(),
            e
        )
        .into()),
    }
}

/// Resolve the receiver arguments for this run: explicit command line values
/// first, then the config file if one was given.
pub fn get_receiver_args(agent: &AgentRun) -> Result<JournaldReceiverArgs, BoxError> {
    let args = agent.journald_receiver.clone();

    match &agent.config {
        Some(path) => {
            debug!(path = %path.display(), "Loading journald receiver config file");
            let file_args = load_receiver_args_file(path)?;
            Ok(args.or(file_args))
        }
        None => Ok(args),
    }
}
