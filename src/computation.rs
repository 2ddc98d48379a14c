use serde::{Deserialize, Serialize};

pub const HASH_LEN: usize = 16;
pub const PERSONALIZED_LEN: usize = 12;

/// State exchanged between the host and a script run.
///
/// The host fills `target_was`, `personalized_ints` and `storage` before a
/// run; `check_pow`, `sync_r` and `pull_the_rest` read and update it. Field
/// names on the wire match the host protocol.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputationResult {
    #[serde(rename = "isPow")]
    pub is_pow: bool,
    #[serde(rename = "isBounty")]
    pub is_bounty: bool,
    #[serde(rename = "powHash")]
    pub pow_hash: [u8; HASH_LEN],
    #[serde(rename = "targetWas")]
    pub target_was: [u8; HASH_LEN],
    pub storage: Vec<i32>,
    pub personalized_ints: [i32; PERSONALIZED_LEN],
}

impl ComputationResult {
    pub fn new(
        target_was: [u8; HASH_LEN],
        personalized_ints: [i32; PERSONALIZED_LEN],
        storage: Vec<i32>,
    ) -> Self {
        Self {
            target_was,
            personalized_ints,
            storage,
            ..Self::default()
        }
    }
}
