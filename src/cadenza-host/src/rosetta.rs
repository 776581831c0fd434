use cadenza_core::ProviderIdentifier;
use parking_lot::RwLock;

/// Maps reference prefixes to the provider that resolves them.
///
/// Registration order is kept so the first registered prefix is the
/// preferred one. Registering a prefix that another provider already owns
/// moves it to the newer provider.
#[derive(Default)]
pub struct RosettaStone {
    entries: RwLock<Vec<(String, ProviderIdentifier)>>,
}

impl RosettaStone {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, provider: &ProviderIdentifier, prefixes: &[String]) {
        let mut entries = self.entries.write();
        for prefix in prefixes.iter().filter(|p| !p.is_empty()) {
            match entries.iter_mut().find(|(known, _)| known == prefix) {
                Some((_, owner)) if owner == provider => {}
                Some((_, owner)) => {
                    tracing::warn!(
                        prefix = %prefix,
                        previous = %owner,
                        provider = %provider,
                        "rosetta prefix claimed by another provider"
                    );
                    *owner = provider.clone();
                }
                None => entries.push((prefix.clone(), provider.clone())),
            }
        }
    }

    pub fn remove_provider(&self, provider: &ProviderIdentifier) {
        self.entries.write().retain(|(_, owner)| owner != provider);
    }

    pub fn identifier(&self, prefix: &str) -> Option<ProviderIdentifier> {
        self.entries
            .read()
            .iter()
            .find(|(known, _)| known == prefix)
            .map(|(_, owner)| owner.clone())
    }

    /// Provider owning the longest registered prefix of `reference`.
    pub fn resolve(&self, reference: &str) -> Option<ProviderIdentifier> {
        self.entries
            .read()
            .iter()
            .filter(|(prefix, _)| reference.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, owner)| owner.clone())
    }

    pub fn prefixes(&self) -> Vec<String> {
        self.entries
            .read()
            .iter()
            .map(|(prefix, _)| prefix.clone())
            .collect()
    }

    pub fn preferred_prefix(&self) -> Option<String> {
        self.entries.read().first().map(|(prefix, _)| prefix.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> ProviderIdentifier {
        ProviderIdentifier::new("pkg", name, name)
    }

    #[test]
    fn resolves_longest_prefix() {
        let stone = RosettaStone::new();
        stone.register(&id("generic"), &["spotify:".into()]);
        stone.register(&id("tracks"), &["spotify:track:".into()]);

        assert_eq!(stone.resolve("spotify:track:42"), Some(id("tracks")));
        assert_eq!(stone.resolve("spotify:album:42"), Some(id("generic")));
        assert_eq!(stone.resolve("deezer:1"), None);
    }

    #[test]
    fn last_writer_wins_and_removal_is_per_provider() {
        let stone = RosettaStone::new();
        stone.register(&id("a"), &["x:".into(), "y:".into()]);
        stone.register(&id("b"), &["x:".into()]);

        assert_eq!(stone.identifier("x:"), Some(id("b")));
        assert_eq!(stone.preferred_prefix().as_deref(), Some("x:"));

        stone.remove_provider(&id("b"));
        assert_eq!(stone.identifier("x:"), None);
        assert_eq!(stone.prefixes(), vec!["y:".to_string()]);
    }
}
