//! Username parsing and password verification for the SFTP service.

use crate::sandbox::registry::ServerRegistry;

/// Splits `"{user}_{serverId}"` on the **last** underscore: the right side
/// is the server id, the left side (which may itself contain `_`) is the
/// user name.
pub fn split_username(raw: &str) -> Option<(&str, &str)> {
    let idx = raw.rfind('_')?;
    let (user, id) = (&raw[..idx], &raw[idx + 1..]);
    if user.is_empty() || id.is_empty() {
        return None;
    }
    Some((user, id))
}

/// Resolves `server_id_fragment` against the registry: first by exact id,
/// then by unique-prefix match. Ambiguous or missing yields `None`.
pub fn resolve_server_id(registry: &ServerRegistry, fragment: &str) -> Option<String> {
    if registry.get(fragment).is_some() {
        return Some(fragment.to_string());
    }

    let matches = registry.ids_with_prefix(fragment);
    match matches.as_slice() {
        [single] => Some(single.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_last_underscore() {
        assert_eq!(split_username("alice_server1"), Some(("alice", "server1")));
        assert_eq!(split_username("alice_bob_server1"), Some(("alice_bob", "server1")));
    }

    #[test]
    fn rejects_missing_underscore_or_empty_sides() {
        assert_eq!(split_username("noSeparator"), None);
        assert_eq!(split_username("_server1"), None);
        assert_eq!(split_username("alice_"), None);
    }
}
