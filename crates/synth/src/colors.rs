use epic_protocol::{Issue, Label};

/// Label-name substrings with a conventional colour, checked in order.
const KNOWN_COLORS: &[(&str, &str)] = &[
    ("bug", "d73a4a"),
    ("feature", "a2eeef"),
    ("epic", "3e4b9e"),
    ("documentation", "0075ca"),
    ("enhancement", "a2eeef"),
    ("help wanted", "008672"),
];

/// Attaches a colour to `name`.
///
/// A member label with the same name lends its colour; otherwise the first
/// known substring decides; otherwise the name's hash picks from the table.
pub fn resolve_label(name: &str, members: &[&Issue]) -> Label {
    let existing = members
        .iter()
        .flat_map(|issue| issue.labels.iter())
        .find(|label| label.name == name)
        .and_then(|label| label.color.clone());
    if let Some(color) = existing {
        return Label {
            name: name.to_string(),
            color: Some(color),
        };
    }

    let lowered = name.to_lowercase();
    let color = KNOWN_COLORS
        .iter()
        .find(|(needle, _)| lowered.contains(needle))
        .map_or_else(
            || {
                let idx = (fnv1a_64(name.as_bytes()) % KNOWN_COLORS.len() as u64) as usize;
                KNOWN_COLORS[idx].1
            },
            |(_, color)| *color,
        );
    Label::new(name, color)
}

fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}
