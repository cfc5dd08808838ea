use crate::classifier::{
    classify, decode_error_state, decode_error_state_integer, is_known_signal,
    printer_status_text,
};
use crate::snapshot::Severity;

#[test]
fn classification_is_deterministic_for_known_signals() {
    for signal in [
        "lowPaper",
        "noPaper",
        "lowToner",
        "noToner",
        "doorOpen",
        "jammed",
        "offline",
        "serviceRequested",
        "deviceDown",
    ] {
        // Act
        let first = classify(signal);
        let second = classify(signal);

        // Assert
        assert!(is_known_signal(signal));
        assert_eq!(first, second, "{signal} classified differently on repeat");
        assert_eq!(first.error, signal);
    }
}

#[test]
fn empty_supplies_and_jams_are_critical() {
    assert_eq!(classify("noToner").severity, Severity::Critical);
    assert_eq!(classify("noPaper").severity, Severity::Critical);
    assert_eq!(classify("jammed").severity, Severity::Critical);
    assert_eq!(classify("lowToner").severity, Severity::Warning);
    assert_eq!(classify("outputNearFull").severity, Severity::Info);
}

#[test]
fn unknown_signal_defaults_to_warning_with_generic_action() {
    // Act
    let detail = classify("xeroxFuserFault42");

    // Assert
    assert!(!is_known_signal("xeroxFuserFault42"));
    assert_eq!(detail.severity, Severity::Warning);
    assert_eq!(detail.error, "xeroxFuserFault42");
    assert!(!detail.action.is_empty());
    assert!(detail.description.contains("xeroxFuserFault42"));
}

#[test]
fn octet_error_state_uses_msb_first_bit_order() {
    // Arrange: lowToner (bit 2) and jammed (bit 5) in octet 0, inputTrayEmpty (bit 13) in octet 1
    let state = [0b0010_0100, 0b0000_0100];

    // Act
    let signals = decode_error_state(&state);

    // Assert
    assert_eq!(signals, vec!["lowToner", "jammed", "inputTrayEmpty"]);
}

#[test]
fn zeroed_error_state_has_no_signals() {
    assert!(decode_error_state(&[0x00, 0x00]).is_empty());
    assert!(decode_error_state(&[]).is_empty());
    assert!(decode_error_state_integer(0).is_empty());
}

#[test]
fn unassigned_error_state_bit_is_kept_as_unknown_signal() {
    let signals = decode_error_state(&[0x00, 0x01]);

    assert_eq!(signals, vec!["errorStateBit15"]);
    assert_eq!(classify(&signals[0]).severity, Severity::Warning);
}

#[test]
fn integer_error_state_uses_legacy_weights() {
    // 2 = noPaper, 8 = noToner
    assert_eq!(decode_error_state_integer(10), vec!["noPaper", "noToner"]);
}

#[test]
fn printer_status_codes_map_to_text() {
    assert_eq!(printer_status_text(3), Some("idle"));
    assert_eq!(printer_status_text(4), Some("printing"));
    assert_eq!(printer_status_text(99), None);
}
