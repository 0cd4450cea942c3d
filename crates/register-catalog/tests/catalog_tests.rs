use std::collections::HashSet;

use register_catalog::{
    catalog_for, emonio_p3, manufacturer_for, parse_catalog_json, validate_catalog, CatalogError,
    EMONIO_MANUFACTURER, EMONIO_P3,
};
use types::{DeviceClass, StateClass, Unit};

#[test]
fn emonio_catalog_has_28_unique_measurements() {
    let catalog = emonio_p3();
    assert_eq!(catalog.len(), 28);

    let ids: HashSet<&str> = catalog.iter().map(|def| def.id.as_str()).collect();
    assert_eq!(ids.len(), catalog.len());
    validate_catalog(&catalog).expect("built-in catalog is valid");
}

#[test]
fn emonio_catalog_addresses_are_fixed() {
    let catalog = emonio_p3();
    let address_of = |id: &str| {
        catalog
            .iter()
            .find(|def| def.id == id)
            .map(|def| def.address)
            .expect("measurement present")
    };

    assert_eq!(address_of("emonio_phase_a_voltage"), 0);
    assert_eq!(address_of("emonio_phase_b_voltage"), 100);
    assert_eq!(address_of("emonio_phase_c_voltage"), 200);
    assert_eq!(address_of("emonio_total_voltage"), 300);
    assert_eq!(address_of("emonio_phase_a_power"), 4);
    assert_eq!(address_of("emonio_total_power"), 304);
    assert_eq!(address_of("emonio_phase_b_energy"), 112);
    assert_eq!(address_of("emonio_total_energy"), 312);
}

#[test]
fn emonio_catalog_reads_swapped_float_pairs() {
    for def in emonio_p3() {
        assert_eq!(def.register_count, 2, "{}", def.id);
        assert!(def.word_swap, "{}", def.id);
    }
}

#[test]
fn emonio_catalog_metadata_matches_quantity() {
    let catalog = emonio_p3();
    let total_energy = catalog
        .iter()
        .find(|def| def.id == "emonio_total_energy")
        .expect("total energy");
    assert_eq!(total_energy.display_name, "Emonio_Total_Energy");
    assert_eq!(total_energy.unit, Unit::KiloWattHour);
    assert_eq!(total_energy.device_class, DeviceClass::Energy);
    assert_eq!(total_energy.state_class, StateClass::Total);

    let voltage = &catalog[0];
    assert_eq!(voltage.id, "emonio_phase_a_voltage");
    assert_eq!(voltage.unit, Unit::Volt);
    assert_eq!(voltage.state_class, StateClass::Measurement);
}

#[test]
fn catalog_lookup_is_deterministic() {
    let first = catalog_for(EMONIO_P3).expect("catalog");
    let second = catalog_for("emonio_p3").expect("catalog");
    assert_eq!(first, second);
}

#[test]
fn manufacturer_is_known_for_emonio_models_only() {
    assert_eq!(manufacturer_for("emonio_p3"), Some(EMONIO_MANUFACTURER));
    assert_eq!(EMONIO_MANUFACTURER, "Berliner Energie Institut");
    assert_eq!(manufacturer_for("Shelly 3EM"), None);
}

#[test]
fn unknown_model_is_rejected() {
    let err = catalog_for("Shelly 3EM").expect_err("unknown model");
    assert!(matches!(err, CatalogError::UnknownModel(model) if model == "Shelly 3EM"));
}

#[test]
fn parse_json_fixture_map() {
    let data = include_str!("fixtures/custom_map.json");
    let catalog = parse_catalog_json(data).expect("json parse");
    assert_eq!(catalog.len(), 2);
    assert_eq!(catalog[0].display_name, "Grid Voltage");
    assert!(catalog[0].word_swap);
    assert_eq!(catalog[1].display_name, "grid_energy");
    assert_eq!(catalog[1].state_class, StateClass::Total);
    assert!(!catalog[1].word_swap);
}

#[test]
fn parse_json_bare_array() {
    let data = r#"[{"id": "freq", "address": 10, "unit": "Hz", "device_class": "frequency"}]"#;
    let catalog = parse_catalog_json(data).expect("json parse");
    assert_eq!(catalog[0].address, 10);
    assert_eq!(catalog[0].register_count, 2);
}

#[test]
fn parse_json_rejects_duplicate_ids() {
    let data = r#"[
        {"id": "v", "address": 0, "device_class": "voltage"},
        {"id": "v", "address": 2, "device_class": "voltage"}
    ]"#;
    let err = parse_catalog_json(data).expect_err("duplicate");
    assert!(matches!(err, CatalogError::DuplicateId(id) if id == "v"));
}

#[test]
fn parse_json_rejects_non_float_shapes() {
    let data = r#"[{"id": "v", "address": 0, "count": 1, "device_class": "voltage"}]"#;
    let err = parse_catalog_json(data).expect_err("register count");
    assert!(matches!(err, CatalogError::InvalidRegisterCount { count: 1, .. }));

    let data = r#"[{"id": "v", "address": 65535, "device_class": "voltage"}]"#;
    let err = parse_catalog_json(data).expect_err("overflow");
    assert!(matches!(err, CatalogError::AddressOverflow { address: 65535, .. }));
}

#[test]
fn parse_json_rejects_empty_map() {
    let err = parse_catalog_json("[]").expect_err("empty");
    assert!(matches!(err, CatalogError::Empty));
}
