use crate::snapshot::{ErrorDetail, Severity};

struct Rule {
    signal: &'static str,
    severity: Severity,
    action: &'static str,
    description: &'static str,
}

const RULES: [Rule; 16] = [
    Rule {
        signal: "lowPaper",
        severity: Severity::Warning,
        action: "Add paper to the main tray",
        description: "The paper tray is almost empty",
    },
    Rule {
        signal: "noPaper",
        severity: Severity::Critical,
        action: "Reload paper in the tray now",
        description: "There is not enough paper to keep printing",
    },
    Rule {
        signal: "lowToner",
        severity: Severity::Warning,
        action: "Request a replacement toner from the supply room",
        description: "Toner is running out and should be replaced soon",
    },
    Rule {
        signal: "noToner",
        severity: Severity::Critical,
        action: "Replace the toner cartridge urgently",
        description: "Printing is impossible without toner",
    },
    Rule {
        signal: "doorOpen",
        severity: Severity::Critical,
        action: "Close every printer cover and door",
        description: "One or more covers are open and printing is halted",
    },
    Rule {
        signal: "jammed",
        severity: Severity::Critical,
        action: "Remove the jammed paper following the device manual",
        description: "Paper is stuck inside the printer mechanism",
    },
    Rule {
        signal: "offline",
        severity: Severity::Warning,
        action: "Check the printer's network cable and power",
        description: "The printer reports itself offline",
    },
    Rule {
        signal: "serviceRequested",
        severity: Severity::Warning,
        action: "Contact technical support",
        description: "The printer requests preventive maintenance",
    },
    Rule {
        signal: "inputTrayMissing",
        severity: Severity::Critical,
        action: "Reinsert the input tray",
        description: "An input tray is missing",
    },
    Rule {
        signal: "outputTrayMissing",
        severity: Severity::Warning,
        action: "Reinsert the output tray",
        description: "An output tray is missing",
    },
    Rule {
        signal: "markerSupplyMissing",
        severity: Severity::Critical,
        action: "Install the missing toner or drum unit",
        description: "A marker supply is not installed",
    },
    Rule {
        signal: "outputNearFull",
        severity: Severity::Info,
        action: "Empty the output bin soon",
        description: "The output bin is nearly full",
    },
    Rule {
        signal: "outputFull",
        severity: Severity::Warning,
        action: "Empty the output bin",
        description: "The output bin is full",
    },
    Rule {
        signal: "inputTrayEmpty",
        severity: Severity::Critical,
        action: "Load paper in the empty input tray",
        description: "An input tray is empty",
    },
    Rule {
        signal: "overduePreventMaint",
        severity: Severity::Warning,
        action: "Schedule the overdue preventive maintenance",
        description: "Preventive maintenance is overdue",
    },
    Rule {
        signal: "deviceDown",
        severity: Severity::Critical,
        action: "Inspect the printer now, it may have a serious fault",
        description: "The printer is out of operation and cannot print",
    },
];

/// hrPrinterDetectedErrorState bits in RFC 3805 order: bit 0 is the most
/// significant bit of the first octet.
const ERROR_STATE_BITS: [&str; 16] = [
    "lowPaper",
    "noPaper",
    "lowToner",
    "noToner",
    "doorOpen",
    "jammed",
    "offline",
    "serviceRequested",
    "inputTrayMissing",
    "outputTrayMissing",
    "markerSupplyMissing",
    "outputNearFull",
    "outputFull",
    "inputTrayEmpty",
    "overduePreventMaint",
    "",
];

/// Some firmware reports the error state as an INTEGER with these weights.
const LEGACY_INTEGER_BITS: [(i64, &str); 8] = [
    (1, "lowPaper"),
    (2, "noPaper"),
    (4, "lowToner"),
    (8, "noToner"),
    (16, "doorOpen"),
    (32, "jammed"),
    (64, "offline"),
    (128, "serviceRequested"),
];

pub fn classify(signal: &str) -> ErrorDetail {
    match RULES.iter().find(|rule| rule.signal == signal) {
        Some(rule) => ErrorDetail {
            error: rule.signal.to_string(),
            severity: rule.severity,
            action: rule.action.to_string(),
            description: rule.description.to_string(),
        },
        None => ErrorDetail {
            error: signal.to_string(),
            severity: Severity::Warning,
            action: "Check the printer's front panel and consult the vendor documentation"
                .to_string(),
            description: format!("Unrecognized printer condition '{signal}'"),
        },
    }
}

pub fn is_known_signal(signal: &str) -> bool {
    RULES.iter().any(|rule| rule.signal == signal)
}

pub fn decode_error_state(bytes: &[u8]) -> Vec<String> {
    let mut signals = Vec::new();
    for (octet_idx, octet) in bytes.iter().enumerate() {
        for bit in 0..8 {
            if octet & (0x80 >> bit) == 0 {
                continue;
            }
            let position = octet_idx * 8 + bit;
            match ERROR_STATE_BITS.get(position) {
                Some(name) if !name.is_empty() => signals.push((*name).to_string()),
                _ => signals.push(format!("errorStateBit{position}")),
            }
        }
    }
    signals
}

pub fn decode_error_state_integer(value: i64) -> Vec<String> {
    if value <= 0 {
        return Vec::new();
    }
    LEGACY_INTEGER_BITS
        .iter()
        .filter(|(weight, _)| value & weight != 0)
        .map(|(_, name)| (*name).to_string())
        .collect()
}

pub fn printer_status_text(code: i64) -> Option<&'static str> {
    match code {
        1 => Some("other"),
        2 => Some("unknown"),
        3 => Some("idle"),
        4 => Some("printing"),
        5 => Some("warmup"),
        6 => Some("stopped"),
        7 => Some("offline"),
        _ => None,
    }
}
