//! Bilingual phonetic codes for fuzzy search.
//!
//! Russian and English queries go through one pipeline: the script is
//! detected from the first letter, per-script consonant maps collapse
//! similar-sounding letters into digit groups, and the digit tail is
//! sorted so that transposed letters ("Катерина"/"Екатерина",
//! "Jonhson"/"Johnson") still produce matching codes.

use crate::text::sort::{ScriptClass, script_class};

const CODE_LEN: usize = 6;

/// Phonetic code of one word: first letter + sorted consonant groups,
/// padded with '0' to six characters. Empty input yields an empty code.
pub fn soundex(word: &str) -> String {
    let lower = word.to_lowercase();
    let mut chars = lower.chars().filter(|c| c.is_alphabetic());
    let Some(first) = chars.next() else {
        return String::new();
    };

    let map = match script_class(first) {
        ScriptClass::Cyrillic => cyrillic_group,
        _ => latin_group,
    };

    let mut digits: Vec<u8> = Vec::new();
    let mut prev = map(first);
    for c in chars {
        let group = map(c);
        if let Some(d) = group
            && prev != group
        {
            digits.push(d);
        }
        prev = group;
    }

    // Transposition resistance: the order of inner consonants does not
    // change the code.
    digits.sort_unstable();

    let mut code = String::with_capacity(CODE_LEN);
    code.push(first);
    for d in digits.iter().take(CODE_LEN - 1) {
        code.push((b'0' + d) as char);
    }
    while code.chars().count() < CODE_LEN {
        code.push('0');
    }
    code
}

/// True when two words sound alike under the bilingual code.
pub fn sounds_like(a: &str, b: &str) -> bool {
    let (ca, cb) = (soundex(a), soundex(b));
    !ca.is_empty() && ca == cb
}

fn latin_group(c: char) -> Option<u8> {
    match c {
        'b' | 'f' | 'p' | 'v' => Some(1),
        'c' | 'g' | 'j' | 'k' | 'q' | 's' | 'x' | 'z' => Some(2),
        'd' | 't' => Some(3),
        'l' => Some(4),
        'm' | 'n' => Some(5),
        'r' => Some(6),
        _ => None, // vowels and h/w/y separate groups but carry no digit
    }
}

fn cyrillic_group(c: char) -> Option<u8> {
    match c {
        'б' | 'п' | 'в' | 'ф' => Some(1),
        'г' | 'к' | 'х' | 'ж' | 'ч' | 'ш' | 'щ' | 'з' | 'с' | 'ц' => Some(2),
        'д' | 'т' => Some(3),
        'л' => Some(4),
        'м' | 'н' => Some(5),
        'р' => Some(6),
        _ => None, // vowels, й, ь, ъ
    }
}
