use ulid::Ulid;

/// A fresh id of the form `{prefix}_{ulid}`.
///
/// ```
/// use massclick_common::id::{prefix, prefixed_ulid};
///
/// let sid = prefixed_ulid(prefix::POLL);
/// assert!(sid.starts_with("pol_"));
/// ```
pub fn prefixed_ulid(prefix: &str) -> String {
    format!("{}_{}", prefix, Ulid::new())
}

/// Well-known ID prefixes.
pub mod prefix {
    /// A player session (one live connection).
    pub const PLAYER: &str = "ply";
    /// A long-polling transport session.
    pub const POLL: &str = "pol";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::default_player_name;

    #[test]
    fn player_ids_carry_a_parsable_ulid() {
        let id = prefixed_ulid(prefix::PLAYER);
        let (head, tail) = id.split_once('_').unwrap();
        assert_eq!(head, "ply");
        assert!(Ulid::from_string(tail).is_ok());
    }

    #[test]
    fn placeholder_name_comes_from_the_random_tail() {
        let id = prefixed_ulid(prefix::PLAYER);
        let name = default_player_name(&id);
        let suffix = name.strip_prefix("Player_").unwrap();

        assert_eq!(suffix.len(), 4);
        assert!(id.ends_with(suffix));
        // Crockford base32 excludes I, L, O and U.
        assert!(suffix
            .chars()
            .all(|c| c.is_ascii_digit() || (c.is_ascii_uppercase() && !"ILOU".contains(c))));
    }

    #[test]
    fn sessions_of_both_kinds_never_collide() {
        let player = prefixed_ulid(prefix::PLAYER);
        let poll = prefixed_ulid(prefix::POLL);
        assert_ne!(player, prefixed_ulid(prefix::PLAYER));
        assert_ne!(player[4..], poll[4..]);
    }
}
