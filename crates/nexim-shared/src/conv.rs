//! Conversation id derivation.
//!
//! Single chats get a deterministic id from the unordered pair of user ids:
//! sort lexicographically, join with `:`, SHA-256, keep the first 16 hex
//! chars. Group chats use the group id directly, so every member resolves
//! the same conversation without a lookup.

use sha2::{Digest, Sha256};

pub const CONV_TYPE_SINGLE: i32 = 1;
pub const CONV_TYPE_GROUP: i32 = 2;

pub fn single_chat_id(a: &str, b: &str) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let digest = Sha256::digest(format!("{lo}:{hi}").as_bytes());
    let mut id = hex::encode(digest);
    id.truncate(16);
    id
}

pub fn group_chat_id(group_id: &str) -> String {
    group_id.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_chat_id_is_symmetric() {
        let ab = single_chat_id("u___1", "u___2");
        let ba = single_chat_id("u___2", "u___1");
        assert_eq!(ab, ba);
        assert_eq!(ab.len(), 16);
        assert!(ab.bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn distinct_pairs_get_distinct_ids() {
        assert_ne!(
            single_chat_id("u___1", "u___2"),
            single_chat_id("u___1", "u___3")
        );
    }

    #[test]
    fn group_chat_id_is_the_group_id() {
        assert_eq!(group_chat_id("g42"), "g42");
    }
}
