// src/agent/identity.rs

use crate::errors::{Result, SqError};
use crate::types::EngineId;

/// Rank variables exported by common parallel launchers, in lookup order.
pub const RANK_VARS: [&str; 4] = ["SLURM_PROCID", "OMPI_COMM_WORLD_RANK", "PMI_RANK", "PMIX_RANK"];

/// The slot id: `explicit` if given, else the first rank variable set.
pub fn resolve_engine_id(explicit: Option<&str>) -> Result<EngineId> {
    resolve_engine_id_with_env(explicit, |name| std::env::var(name).ok())
}

pub fn resolve_engine_id_with_env(
    explicit: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<EngineId> {
    if let Some(id) = explicit.map(str::trim).filter(|id| !id.is_empty()) {
        return Ok(id.to_string());
    }

    RANK_VARS
        .iter()
        .filter_map(|var| env(var))
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
        .ok_or_else(|| {
            SqError::ConfigError(format!(
                "no engine id: pass --engine-id or run under a launcher that sets one of {}",
                RANK_VARS.join(", ")
            ))
        })
}
