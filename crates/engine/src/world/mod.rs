pub mod position;
pub mod spiral;

use uuid::Uuid;

/// Prefix the host gives to short-lived instance worlds.
pub const INSTANCE_PREFIX: &str = "instance-";

/// Length of a hyphenated UUID (`8-4-4-4-12`).
const UUID_LEN: usize = 36;

/// Identity of a world as the map engine sees it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorldId {
    name: String,
}

impl WorldId {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// The host's name for this world, unique per running instance.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Instance worlds are created from a template and thrown away afterwards.
    pub fn is_instance(&self) -> bool {
        self.name.starts_with(INSTANCE_PREFIX)
    }

    /// Name used as the persistence key. Instance worlds lose their unique
    /// `-<uuid>` suffix so every copy of a template shares one history.
    pub fn storage_name(&self) -> String {
        if self.is_instance() {
            sanitize_instance_name(&self.name)
        } else {
            self.name.clone()
        }
    }
}

impl std::fmt::Display for WorldId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// Strip the first `-<lowercase uuid>` occurrence from `name`.
fn sanitize_instance_name(name: &str) -> String {
    for (start, _) in name.match_indices('-') {
        let end = start + 1 + UUID_LEN;
        let Some(candidate) = name.get(start + 1..end) else {
            continue;
        };
        let lowercase = !candidate.bytes().any(|b| b.is_ascii_uppercase());
        let hyphenated = [8, 13, 18, 23].iter().all(|&i| candidate.as_bytes()[i] == b'-');
        if lowercase && hyphenated && Uuid::try_parse(candidate).is_ok() {
            let mut out = String::with_capacity(name.len() - (end - start));
            out.push_str(&name[..start]);
            out.push_str(&name[end..]);
            return out;
        }
    }
    name.to_string()
}
