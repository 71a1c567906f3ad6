//! Maps engine object names to entity keys.
//!
//! Engine objects are named after their prefab plus an optional instance
//! suffix, e.g. `"Crawler 1"` or `"Zombie Runner (2)"`. Classification is a
//! substring match against an ordered rule list; longer patterns are always
//! tried first, so `"Giant Fly"` wins over `"Fly"`.

use tracing::trace;

use crate::entity::{EntityKey, EntityType, InstanceId};

/// One classification rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifierRule {
    /// Substring that identifies the type.
    pub pattern: &'static str,
    /// The type assigned on a match.
    pub entity_type: EntityType,
    /// Substrings that veto the match.
    pub excludes: &'static [&'static str],
}

impl ClassifierRule {
    /// A rule without exclusions.
    #[must_use]
    pub const fn new(pattern: &'static str, entity_type: EntityType) -> Self {
        Self {
            pattern,
            entity_type,
            excludes: &[],
        }
    }

    /// A rule that does not match names containing any of `excludes`.
    #[must_use]
    pub const fn excluding(
        pattern: &'static str,
        entity_type: EntityType,
        excludes: &'static [&'static str],
    ) -> Self {
        Self {
            pattern,
            entity_type,
            excludes,
        }
    }

    fn matches(&self, name: &str) -> bool {
        name.contains(self.pattern) && !self.excludes.iter().any(|ex| name.contains(ex))
    }
}

const BUILTIN_RULES: &[ClassifierRule] = &[
    ClassifierRule::new("Giant Fly", EntityType::GruzMother),
    ClassifierRule::new("False Knight New", EntityType::FalseKnight),
    ClassifierRule::new("Mega Moss Charger", EntityType::MossCharger),
    ClassifierRule::new("Zombie Runner", EntityType::WanderingHusk),
    ClassifierRule::new("Zombie Barger", EntityType::HuskBully),
    ClassifierRule::new("Zombie Leaper", EntityType::LeapingHusk),
    ClassifierRule::new("Zombie Hornhead", EntityType::HuskHornhead),
    ClassifierRule::new("Zombie Shield", EntityType::HuskWarrior),
    ClassifierRule::new("Zombie Guard", EntityType::HuskGuard),
    ClassifierRule::new("Climber", EntityType::Tiktik),
    ClassifierRule::new("Crawler", EntityType::Crawlid),
    ClassifierRule::new("Fly", EntityType::Gruzzer),
    ClassifierRule::new("Spitter", EntityType::AspidHunter),
    ClassifierRule::new("Buzzer", EntityType::Vengefly),
    ClassifierRule::new("Worm", EntityType::Goam),
    ClassifierRule::excluding("Hatcher", EntityType::AspidMother, &["Baby Spawner"]),
    ClassifierRule::new("Roller", EntityType::Baldur),
    ClassifierRule::new("Blocker", EntityType::ElderBaldur),
    ClassifierRule::new("Mawlek Body", EntityType::BroodingMawlek),
    ClassifierRule::new("Moss Walker", EntityType::Mosscreep),
    ClassifierRule::new("Mossman_Runner", EntityType::Mosskin),
    ClassifierRule::new("Mossman_Shaker", EntityType::VolatileMosskin),
    ClassifierRule::new("Plant Trap", EntityType::FoolEater),
    ClassifierRule::new("Mosquito", EntityType::Squit),
    ClassifierRule::new("Fat Fly", EntityType::Obble),
    ClassifierRule::new("Acid Walker", EntityType::Durandoo),
    ClassifierRule::new("Plant Turret", EntityType::Gulka),
    ClassifierRule::new("Acid Flyer", EntityType::Duranda),
    ClassifierRule::new("Moss Knight", EntityType::MossKnight),
];

/// Ordered substring classifier.
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<ClassifierRule>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(BUILTIN_RULES.to_vec())
    }
}

impl Classifier {
    /// Builds a classifier from `rules`, ordered by descending pattern length.
    /// Rules of equal length keep their relative order.
    #[must_use]
    pub fn new(mut rules: Vec<ClassifierRule>) -> Self {
        rules.sort_by_key(|rule| std::cmp::Reverse(rule.pattern.len()));
        Self { rules }
    }

    /// The rules in the order they are tried.
    #[must_use]
    pub fn rules(&self) -> &[ClassifierRule] {
        &self.rules
    }

    /// Classifies an engine object name. `None` means the object is not
    /// networked.
    #[must_use]
    pub fn classify(&self, name: &str) -> Option<EntityKey> {
        let Some(rule) = self.rules.iter().find(|rule| rule.matches(name)) else {
            trace!(name, "Object is not a networked entity");
            return None;
        };
        let id = instance_id(name, rule.pattern);
        Some(EntityKey::new(rule.entity_type, id))
    }
}

/// Extracts the instance id from `name` once the type `pattern` is removed:
/// the last space-separated token, stripped of parentheses, parsed as `u8`.
/// Anything unparsable is id 0.
#[must_use]
pub fn instance_id(name: &str, pattern: &str) -> InstanceId {
    let rest = name.replacen(pattern, "", 1);
    let id = rest
        .split(' ')
        .next_back()
        .map(|token| token.trim_matches(|c| c == '(' || c == ')'))
        .and_then(|token| token.parse::<u8>().ok())
        .unwrap_or(0);
    InstanceId::new(id)
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    fn key(entity_type: EntityType, id: u8) -> EntityKey {
        EntityKey::new(entity_type, InstanceId::new(id))
    }

    #[test]
    fn plain_names() {
        let classifier = Classifier::default();
        assert_eq!(
            classifier.classify("Crawler 1"),
            Some(key(EntityType::Crawlid, 1))
        );
        assert_eq!(classifier.classify("Roller"), Some(key(EntityType::Baldur, 0)));
        assert_eq!(
            classifier.classify("Zombie Runner (12)"),
            Some(key(EntityType::WanderingHusk, 12))
        );
    }

    #[test]
    fn specific_patterns_win_over_generic_substrings() {
        let classifier = Classifier::default();
        assert_eq!(
            classifier.classify("Giant Fly"),
            Some(key(EntityType::GruzMother, 0))
        );
        assert_eq!(
            classifier.classify("Fat Fly 3"),
            Some(key(EntityType::Obble, 3))
        );
        assert_eq!(classifier.classify("Fly 2"), Some(key(EntityType::Gruzzer, 2)));
        assert_eq!(
            classifier.classify("Mega Moss Charger"),
            Some(key(EntityType::MossCharger, 0))
        );
    }

    #[test]
    fn exclusions_veto_a_match() {
        let classifier = Classifier::default();
        assert_eq!(
            classifier.classify("Hatcher 1"),
            Some(key(EntityType::AspidMother, 1))
        );
        assert_eq!(classifier.classify("Hatcher Baby Spawner"), None);
    }

    #[test]
    fn unknown_names_are_not_networked() {
        let classifier = Classifier::default();
        assert_eq!(classifier.classify("Knight"), None);
        assert_eq!(classifier.classify(""), None);
    }

    #[test]
    fn unparsable_suffixes_default_to_zero() {
        assert_eq!(instance_id("Crawler", "Crawler"), InstanceId::new(0));
        assert_eq!(instance_id("Crawler abc", "Crawler"), InstanceId::new(0));
        assert_eq!(instance_id("Crawler 300", "Crawler"), InstanceId::new(0));
        assert_eq!(instance_id("Crawler (7)", "Crawler"), InstanceId::new(7));
    }

    #[test]
    fn rules_are_ordered_longest_first() {
        let classifier = Classifier::default();
        let lengths: Vec<usize> = classifier.rules().iter().map(|r| r.pattern.len()).collect();
        assert!(lengths.windows(2).all(|w| w[0] >= w[1]), "{lengths:?}");
    }

    #[test]
    fn custom_rules_sort_stably() {
        let classifier = Classifier::new(vec![
            ClassifierRule::new("ab", EntityType::Squit),
            ClassifierRule::new("cd", EntityType::Obble),
            ClassifierRule::new("abcd", EntityType::Goam),
        ]);
        let order: Vec<EntityType> = classifier.rules().iter().map(|r| r.entity_type).collect();
        assert_eq!(order, [EntityType::Goam, EntityType::Squit, EntityType::Obble]);
        assert_eq!(classifier.classify("ab cd 4"), Some(key(EntityType::Squit, 4)));
    }
}
