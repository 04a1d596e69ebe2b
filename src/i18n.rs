use std::collections::HashMap;

/// Translations keyed by locale code ("en", "ru").
/// Each value is a parsed TOML table converted to JSON.
pub type Translations = HashMap<String, serde_json::Value>;

const EMBEDDED: &[(&str, &str)] = &[
    ("en", include_str!("../locales/en.toml")),
    ("ru", include_str!("../locales/ru.toml")),
];

/// Load the embedded locale tables.
pub fn load_translations() -> Result<Translations, TranslationError> {
    let mut map = Translations::new();
    for (locale, content) in EMBEDDED {
        let toml_value: toml::Value =
            toml::from_str(content).map_err(|e| TranslationError::Parse {
                locale: locale.to_string(),
                source: e,
            })?;
        let json_value = serde_json::to_value(&toml_value)
            .map_err(|e| TranslationError::Convert { source: e })?;
        map.insert(locale.to_string(), json_value);
    }
    Ok(map)
}

/// Get the translation table for a locale, falling back to "en".
pub fn get_locale<'a>(translations: &'a Translations, locale: &str) -> &'a serde_json::Value {
    translations
        .get(locale)
        .or_else(|| translations.get("en"))
        .expect("english locale must exist")
}

/// Look up one UI string with a hardcoded fallback.
pub fn tr(translations: &Translations, lang: &str, section: &str, key: &str, fallback: &str) -> String {
    get_locale(translations, lang)
        .get(section)
        .and_then(|v| v.get(key))
        .and_then(|v| v.as_str())
        .unwrap_or(fallback)
        .to_string()
}

/// Plural form index for a count.
///
/// Slavic languages (ru, uk, pl) have three forms; the selection rule is
/// `n%10==1 && n%100!=11` → one, `2..=4 % 10` outside 12..=14 → few,
/// everything else → many. Counts of 1000 and above always read as many.
/// Other languages get the usual one/other split.
pub fn plural_form(lang: &str, n: u64) -> usize {
    match lang {
        "ru" | "uk" | "pl" => {
            if n >= 1000 {
                return 2;
            }
            let (d10, d100) = (n % 10, n % 100);
            if d10 == 1 && d100 != 11 {
                0
            } else if (2..=4).contains(&d10) && !(12..=14).contains(&d100) {
                1
            } else {
                2
            }
        }
        _ => {
            if n == 1 {
                0
            } else {
                1
            }
        }
    }
}

/// Format a localized "N books" string. The locale table stores the
/// forms as `books_one`, `books_few`, `books_many` (en uses one/many).
pub fn books_count(translations: &Translations, lang: &str, n: u64) -> String {
    let keys = ["books_one", "books_few", "books_many"];
    let form = plural_form(lang, n);
    let key = keys[form.min(keys.len() - 1)];
    let word = tr(translations, lang, "plurals", key, "books");
    format!("{n} {word}")
}

#[derive(Debug, thiserror::Error)]
pub enum TranslationError {
    #[error("failed to parse embedded locale {locale}: {source}")]
    Parse {
        locale: String,
        source: toml::de::Error,
    },
    #[error("failed to convert TOML to JSON: {source}")]
    Convert { source: serde_json::Error },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_and_lookup() {
        let t = load_translations().unwrap();
        assert!(t.contains_key("en"));
        assert!(t.contains_key("ru"));
        assert_eq!(tr(&t, "en", "opds", "root_authors", "?"), "By authors");
        // Unknown locale falls back to English
        assert_eq!(
            tr(&t, "de", "opds", "root_authors", "?"),
            tr(&t, "en", "opds", "root_authors", "?")
        );
    }

    #[test]
    fn test_plural_form_russian() {
        assert_eq!(plural_form("ru", 1), 0);
        assert_eq!(plural_form("ru", 2), 1);
        assert_eq!(plural_form("ru", 5), 2);
        assert_eq!(plural_form("ru", 11), 2);
        assert_eq!(plural_form("ru", 21), 0);
        assert_eq!(plural_form("ru", 22), 1);
        assert_eq!(plural_form("ru", 112), 2);
        assert_eq!(plural_form("ru", 1000), 2);
        assert_eq!(plural_form("ru", 1001), 2);
    }

    #[test]
    fn test_plural_form_english() {
        assert_eq!(plural_form("en", 1), 0);
        assert_eq!(plural_form("en", 0), 1);
        assert_eq!(plural_form("en", 42), 1);
    }

    #[test]
    fn test_books_count() {
        let t = load_translations().unwrap();
        assert_eq!(books_count(&t, "ru", 1), "1 книга");
        assert_eq!(books_count(&t, "ru", 3), "3 книги");
        assert_eq!(books_count(&t, "ru", 7), "7 книг");
        assert_eq!(books_count(&t, "en", 2), "2 books");
    }
}
