//! Fuzz target for entity catalog parsing.
//!
//! Profile data may come from a mod's config directory, so malformed JSON and
//! inconsistent profiles must come back as errors.
//!
//! # Safety Properties Tested
//! - No panics on arbitrary input
//! - A catalog that parses only names known, non-`None` types

#![no_main]

use libfuzzer_sys::fuzz_target;

use scene_sync::entity::EntityType;
use scene_sync::Catalog;

fuzz_target!(|data: &[u8]| {
    let Ok(json) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(catalog) = Catalog::from_json(json) {
        assert!(!catalog.contains(EntityType::None));
        for entity_type in catalog.types() {
            assert!(catalog.get(entity_type).is_some());
        }
    }
});
