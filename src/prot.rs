/// Protection flag names and their bit values as defined by mprotect(2).
pub const PROT_FLAGS: [(&str, u64); 4] = [
    ("PROT_NONE", 0x0),
    ("PROT_READ", 0x1),
    ("PROT_WRITE", 0x2),
    ("PROT_EXEC", 0x4),
];

/// Heuristic to convert a string like "PROT_EXEC|PROT_WRITE" to its bitmask.
///
/// Every known flag name found as a substring contributes its bit, so the
/// separator is free-form and unrecognized text contributes nothing. An
/// empty or garbage string maps to 0, the PROT_NONE mask.
pub fn decode(protstr: &str) -> u64 {
    let mut mask = 0;
    for (name, bit) in PROT_FLAGS {
        if protstr.contains(name) {
            mask |= bit;
        }
    }
    mask
}
