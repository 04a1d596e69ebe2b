//! Script-aware ordering for author and series indexes.
//!
//! Mixed-script libraries need a stable shelf order: all Cyrillic names
//! together, all Latin names together, everything else last (or Latin
//! first, depending on the configured UI language).

/// Writing-system class of a character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptClass {
    Cyrillic,
    Latin,
    Other,
}

/// Classify a character by Unicode block.
///
/// Cyrillic covers U+0400..=U+04FF and the Supplement U+0500..=U+052F,
/// which includes Ukrainian Є/І/Ї/Ґ and Russian Ё. Latin covers ASCII
/// letters, Latin-1 Supplement letters (excluding × and ÷) and Latin
/// Extended-A/B.
pub fn script_class(c: char) -> ScriptClass {
    match c {
        '\u{0400}'..='\u{04FF}' | '\u{0500}'..='\u{052F}' => ScriptClass::Cyrillic,
        'A'..='Z' | 'a'..='z' => ScriptClass::Latin,
        '\u{00C0}'..='\u{00FF}' if c != '\u{00D7}' && c != '\u{00F7}' => ScriptClass::Latin,
        '\u{0100}'..='\u{024F}' => ScriptClass::Latin,
        _ => ScriptClass::Other,
    }
}

/// Sort key for one display name: `(script_priority, lowercased name)`.
///
/// `cyrillic_first` decides whether the Cyrillic or the Latin shelf
/// comes first; unclassified scripts always sort last.
pub fn sort_key(name: &str, cyrillic_first: bool) -> (u8, String) {
    let class = name
        .chars()
        .next()
        .map(script_class)
        .unwrap_or(ScriptClass::Other);
    let priority = match (class, cyrillic_first) {
        (ScriptClass::Cyrillic, true) | (ScriptClass::Latin, false) => 0,
        (ScriptClass::Cyrillic, false) | (ScriptClass::Latin, true) => 1,
        (ScriptClass::Other, _) => 2,
    };
    (priority, name.to_lowercase())
}

/// Sort a list of display names in place, script shelves first.
pub fn sort_names(names: &mut [String], cyrillic_first: bool) {
    names.sort_by_cached_key(|n| sort_key(n, cyrillic_first));
}

/// First character of the sort key, uppercased — the bucket label used
/// by the alphabetic author/series indexes.
pub fn bucket_char(name: &str) -> Option<char> {
    name.chars().next().map(|c| c.to_uppercase().next().unwrap_or(c))
}
