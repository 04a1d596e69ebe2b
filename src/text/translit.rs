//! Cyrillic transliteration for download filenames.
//!
//! OPDS clients and e-ink readers choke on non-ASCII attachment names,
//! so FB2 archives are named `{author}_{title}.fb2` in Latin letters.

/// Transliterate one Cyrillic character, or return `None` for
/// characters that pass through unchanged.
fn translit_char(c: char) -> Option<&'static str> {
    Some(match c {
        'а' => "a", 'б' => "b", 'в' => "v", 'г' => "g", 'д' => "d",
        'е' | 'ё' | 'э' => "e", 'ж' => "zh", 'з' => "z", 'и' | 'й' => "i",
        'к' => "k", 'л' => "l", 'м' => "m", 'н' => "n", 'о' => "o",
        'п' => "p", 'р' => "r", 'с' => "s", 'т' => "t", 'у' => "u",
        'ф' => "f", 'х' => "h", 'ц' => "ts", 'ч' => "ch", 'ш' => "sh",
        'щ' => "sch", 'ъ' | 'ь' => "", 'ы' => "y", 'ю' => "yu", 'я' => "ya",
        'А' => "A", 'Б' => "B", 'В' => "V", 'Г' => "G", 'Д' => "D",
        'Е' | 'Ё' | 'Э' => "E", 'Ж' => "Zh", 'З' => "Z", 'И' | 'Й' => "I",
        'К' => "K", 'Л' => "L", 'М' => "M", 'Н' => "N", 'О' => "O",
        'П' => "P", 'Р' => "R", 'С' => "S", 'Т' => "T", 'У' => "U",
        'Ф' => "F", 'Х' => "H", 'Ц' => "Ts", 'Ч' => "Ch", 'Ш' => "Sh",
        'Щ' => "Sch", 'Ы' => "Y", 'Ю' => "Yu", 'Я' => "Ya",
        'є' | 'Є' => "e", 'і' | 'І' => "i", 'ї' | 'Ї' => "i", 'ґ' | 'Ґ' => "g",
        _ => return None,
    })
}

/// Transliterate Cyrillic text to ASCII, replacing everything that is
/// neither transliterable nor ASCII-safe with `_`, then collapsing and
/// trimming the underscores.
pub fn transliterate(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_underscore = true; // trim leading
    for c in text.chars() {
        if let Some(tr) = translit_char(c) {
            if !tr.is_empty() {
                out.push_str(tr);
                prev_underscore = false;
            }
        } else if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
            out.push(c);
            prev_underscore = false;
        } else if !prev_underscore {
            out.push('_');
            prev_underscore = true;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

/// Build the archive entry name for an FB2 download:
/// `{translit(first author)}_{translit(title)}.fb2`, falling back to the
/// book id when both come out empty.
pub fn fb2_entry_name(author: Option<&str>, title: &str, book_id: &str) -> String {
    let author_part = author.map(transliterate).unwrap_or_default();
    let title_part = transliterate(title);
    let stem = match (author_part.is_empty(), title_part.is_empty()) {
        (false, false) => format!("{author_part}_{title_part}"),
        (true, false) => title_part,
        (false, true) => author_part,
        (true, true) => transliterate(book_id),
    };
    if stem.is_empty() {
        format!("{book_id}.fb2")
    } else {
        format!("{stem}.fb2")
    }
}
