//! Shared test entity

use dualwrite_core::Entity;
use serde::{Deserialize, Serialize};

/// Interaction counters for one piece of content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interaction {
    /// Primary key
    pub id: i64,
    /// Business domain the row belongs to
    pub biz: String,
    /// Read counter
    pub read_cnt: i64,
    /// Like counter
    pub like_cnt: i64,
}

impl Interaction {
    /// Row in the `article` domain with the given read count
    pub fn new(id: i64, read_cnt: i64) -> Self {
        Self {
            id,
            biz: "article".to_string(),
            read_cnt,
            like_cnt: 0,
        }
    }

    /// Same row with a different like count
    pub fn with_likes(mut self, like_cnt: i64) -> Self {
        self.like_cnt = like_cnt;
        self
    }
}

impl Entity for Interaction {
    fn id(&self) -> i64 {
        self.id
    }

    fn compare_to(&self, other: &Self) -> bool {
        self.biz == other.biz && self.read_cnt == other.read_cnt && self.like_cnt == other.like_cnt
    }
}
