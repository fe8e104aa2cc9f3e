//! Guild → shard → cluster arithmetic.
//!
//! Discord assigns a guild to `(guild_id >> 22) % total_shards`. Clusters own
//! contiguous blocks of `shards_per_cluster` shards and are numbered from 1.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShardError {
    #[error("guild id must be a positive integer, got '{0}'")]
    InvalidGuildId(String),

    #[error("shard topology is not configured (total_shards={total_shards}, shards_per_cluster={shards_per_cluster})")]
    Unconfigured { total_shards: u64, shards_per_cluster: u64 },
}

/// Where a guild lives. Both ids are strings on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuildShardInfo {
    pub shard_id:   String,
    pub cluster_id: String,
}

pub fn shard_for_guild(
    guild_id: u64,
    total_shards: u64,
    shards_per_cluster: u64,
) -> Result<GuildShardInfo, ShardError> {
    if total_shards == 0 || shards_per_cluster == 0 {
        return Err(ShardError::Unconfigured { total_shards, shards_per_cluster });
    }

    let shard = (guild_id >> 22) % total_shards;
    let cluster = shard / shards_per_cluster + 1;

    Ok(GuildShardInfo {
        shard_id:   shard.to_string(),
        cluster_id: cluster.to_string(),
    })
}

/// Parse a path segment and resolve it.
pub fn parse_and_resolve(
    raw: &str,
    total_shards: u64,
    shards_per_cluster: u64,
) -> Result<GuildShardInfo, ShardError> {
    let guild_id: u64 = raw
        .trim()
        .parse()
        .map_err(|_| ShardError::InvalidGuildId(raw.to_string()))?;
    shard_for_guild(guild_id, total_shards, shards_per_cluster)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_guild_maps_to_expected_shard() {
        // 808030843078836254 >> 22 = 192649565477
        let info = shard_for_guild(808030843078836254, 66, 6).unwrap();
        assert_eq!(info, GuildShardInfo { shard_id: "17".into(), cluster_id: "3".into() });
    }

    #[test]
    fn low_ids_land_on_first_cluster() {
        let info = shard_for_guild(1, 66, 6).unwrap();
        assert_eq!(info, GuildShardInfo { shard_id: "0".into(), cluster_id: "1".into() });
    }

    #[test]
    fn last_shard_belongs_to_last_cluster() {
        let guild = 65_u64 << 22;
        let info = shard_for_guild(guild, 66, 6).unwrap();
        assert_eq!(info.shard_id, "65");
        assert_eq!(info.cluster_id, "11");
    }

    #[test]
    fn zero_topology_is_rejected() {
        assert!(matches!(shard_for_guild(1, 0, 6), Err(ShardError::Unconfigured { .. })));
        assert!(matches!(shard_for_guild(1, 66, 0), Err(ShardError::Unconfigured { .. })));
    }

    #[test]
    fn non_numeric_guild_is_rejected() {
        assert_eq!(
            parse_and_resolve("abc", 66, 6),
            Err(ShardError::InvalidGuildId("abc".into()))
        );
    }
}
