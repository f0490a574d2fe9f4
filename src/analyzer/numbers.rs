//! Chapter/part number parsing: digits, roman numerals, written-out words.

/// Written-out numbers seen in chapter headings. The table deliberately ends
/// at thirty; longer books number their chapters with digits.
const WORD_NUMBERS: &[(&str, u32)] = &[
    ("one", 1),
    ("two", 2),
    ("three", 3),
    ("four", 4),
    ("five", 5),
    ("six", 6),
    ("seven", 7),
    ("eight", 8),
    ("nine", 9),
    ("ten", 10),
    ("eleven", 11),
    ("twelve", 12),
    ("thirteen", 13),
    ("fourteen", 14),
    ("fifteen", 15),
    ("sixteen", 16),
    ("seventeen", 17),
    ("eighteen", 18),
    ("nineteen", 19),
    ("twenty", 20),
    ("twenty-one", 21),
    ("twenty-two", 22),
    ("twenty-three", 23),
    ("twenty-four", 24),
    ("twenty-five", 25),
    ("twenty-six", 26),
    ("twenty-seven", 27),
    ("twenty-eight", 28),
    ("twenty-nine", 29),
    ("thirty", 30),
];

fn roman_value(c: char) -> Option<u32> {
    match c {
        'I' => Some(1),
        'V' => Some(5),
        'X' => Some(10),
        'L' => Some(50),
        'C' => Some(100),
        'D' => Some(500),
        'M' => Some(1000),
        _ => None,
    }
}

/// Roman numeral to integer. Values of 200 or more are rejected: chapter
/// numbers that large are page artifacts, not headings.
pub(crate) fn roman_to_int(s: &str) -> Option<u32> {
    let s = s.trim().to_ascii_uppercase();
    if s.is_empty() {
        return None;
    }
    let mut total: i64 = 0;
    let mut prev: i64 = 0;
    for c in s.chars().rev() {
        let value = roman_value(c)? as i64;
        if value < prev {
            total -= value;
        } else {
            total += value;
        }
        prev = value;
    }
    (total > 0 && total < 200).then_some(total as u32)
}

pub(crate) fn word_to_int(s: &str) -> Option<u32> {
    WORD_NUMBERS
        .iter()
        .find(|(word, _)| *word == s)
        .map(|(_, n)| *n)
}

/// Parse a number in any of the forms headings use: `12`, `XII`, `twelve`.
pub(crate) fn parse_number(s: &str) -> Option<u32> {
    let s = s.trim();
    if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) {
        return s.parse().ok();
    }
    let low = s.to_lowercase().replace(['\u{2010}', '\u{2011}'], "-");
    if let Some(n) = word_to_int(&low) {
        return Some(n);
    }
    roman_to_int(s)
}
