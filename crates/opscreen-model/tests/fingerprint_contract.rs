// SPDX-License-Identifier: Apache-2.0

use opscreen_model::{derive_entity_key, normalize_name, EntityKind};
use proptest::prelude::*;

#[test]
fn fingerprint_is_stable_under_presentation_changes() {
    let base = derive_entity_key("Jane Doe", EntityKind::Person, Some("1980-05-01")).unwrap();
    for variant in ["  Jane Doe  ", "JANE DOE", "jane   doe", "Jané Doe", "Jane, Doe"] {
        let key = derive_entity_key(variant, EntityKind::Person, Some("1980-05-01")).unwrap();
        assert_eq!(key, base, "variant {variant:?} changed the fingerprint");
    }
}

#[test]
fn fingerprint_distinguishes_kind_and_dob() {
    let person = derive_entity_key("Acme Holdings", EntityKind::Person, None).unwrap();
    let org = derive_entity_key("Acme Holdings", EntityKind::Organization, None).unwrap();
    assert_ne!(person, org);

    let with_dob = derive_entity_key("Jane Doe", EntityKind::Person, Some("1980-05-01")).unwrap();
    let without = derive_entity_key("Jane Doe", EntityKind::Person, None).unwrap();
    assert_ne!(with_dob, without);
}

#[test]
fn equivalent_dob_renderings_collapse() {
    let iso = derive_entity_key("Jane Doe", EntityKind::Person, Some("1980-05-01")).unwrap();
    let uk = derive_entity_key("Jane Doe", EntityKind::Person, Some("01-05-1980")).unwrap();
    assert_eq!(iso, uk);

    let garbage = derive_entity_key("Jane Doe", EntityKind::Person, Some("unknown")).unwrap();
    let none = derive_entity_key("Jane Doe", EntityKind::Person, None).unwrap();
    assert_eq!(garbage, none);
}

proptest! {
    #[test]
    fn normalize_name_is_idempotent(input in "\\PC{0,64}") {
        let once = normalize_name(&input);
        prop_assert_eq!(normalize_name(&once), once.clone());
    }

    #[test]
    fn normalized_names_never_hold_uppercase_or_double_spaces(input in "\\PC{0,64}") {
        let n = normalize_name(&input);
        prop_assert!(!n.contains("  "));
        prop_assert!(!n.chars().any(|c| c.is_ascii_uppercase()));
        prop_assert!(!n.starts_with(' ') && !n.ends_with(' '));
    }

    #[test]
    fn fingerprints_ignore_case_and_outer_whitespace(name in "[A-Za-zéÉàÀüÜñÑ ]{1,32}") {
        let trimmed = name.trim();
        prop_assume!(!opscreen_model::normalize_name(trimmed).is_empty());
        let a = derive_entity_key(trimmed, EntityKind::Person, None).unwrap();
        let b = derive_entity_key(&format!("  {}  ", trimmed.to_uppercase()), EntityKind::Person, None).unwrap();
        prop_assert_eq!(a, b);
    }
}
