//! Minimal locale model used for implicit template bindings and number formatting.

use std::fmt;

use serde_json::{Map, Value};

const DEFAULT_LANGUAGE: &str = "en";

/// A language plus optional country, parsed from tags like `en-US` or `zh_CN`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locale {
    language: String,
    country: Option<String>,
}

impl Locale {
    /// Parse a locale tag. Unparseable or empty tags yield the default locale.
    pub fn parse(tag: &str) -> Self {
        let mut parts = tag.trim().split(['-', '_']).filter(|p| !p.is_empty());

        let language = match parts.next() {
            Some(lang) if lang.chars().all(|c| c.is_ascii_alphabetic()) => lang.to_ascii_lowercase(),
            _ => return Self::default(),
        };

        let country = parts
            .find(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_alphabetic()))
            .map(|c| c.to_ascii_uppercase());

        Self { language, country }
    }

    /// Resolve an optional request locale
    pub fn from_option(tag: Option<&str>) -> Self {
        tag.map(Self::parse).unwrap_or_default()
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn country(&self) -> Option<&str> {
        self.country.as_deref()
    }

    /// Canonical tag, e.g. `en-US`
    pub fn tag(&self) -> String {
        match &self.country {
            Some(country) => format!("{}-{}", self.language, country),
            None => self.language.clone(),
        }
    }

    pub fn display_language(&self) -> String {
        let name = match self.language.as_str() {
            "en" => "English",
            "zh" => "Chinese",
            "fr" => "French",
            "de" => "German",
            "es" => "Spanish",
            "it" => "Italian",
            "pt" => "Portuguese",
            "ja" => "Japanese",
            "ko" => "Korean",
            "ru" => "Russian",
            other => return other.to_string(),
        };
        name.to_string()
    }

    pub fn display_country(&self) -> String {
        let Some(country) = self.country.as_deref() else {
            return String::new();
        };
        let name = match country {
            "US" => "United States",
            "GB" => "United Kingdom",
            "CA" => "Canada",
            "CN" => "China",
            "TW" => "Taiwan",
            "HK" => "Hong Kong",
            "FR" => "France",
            "DE" => "Germany",
            "ES" => "Spain",
            "IT" => "Italy",
            "BR" => "Brazil",
            "PT" => "Portugal",
            "JP" => "Japan",
            "KR" => "South Korea",
            "RU" => "Russia",
            other => return other.to_string(),
        };
        name.to_string()
    }

    /// Thousands separator for this locale
    pub fn grouping_separator(&self) -> char {
        match self.language.as_str() {
            "de" | "es" | "it" | "pt" => '.',
            "fr" | "ru" => '\u{a0}',
            _ => ',',
        }
    }

    pub fn decimal_separator(&self) -> char {
        match self.language.as_str() {
            "de" | "es" | "it" | "pt" | "fr" | "ru" => ',',
            _ => '.',
        }
    }

    /// Implicit variables available to template expressions
    pub fn bindings(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("locale".into(), Value::String(self.tag()));
        map.insert("language".into(), Value::String(self.language.clone()));
        map.insert(
            "country".into(),
            Value::String(self.country.clone().unwrap_or_default()),
        );
        map.insert("displayLanguage".into(), Value::String(self.display_language()));
        map.insert("displayCountry".into(), Value::String(self.display_country()));
        map
    }
}

impl Default for Locale {
    fn default() -> Self {
        Self {
            language: DEFAULT_LANGUAGE.to_string(),
            country: None,
        }
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_variants() {
        let locale = Locale::parse("zh_cn");
        assert_eq!(locale.language(), "zh");
        assert_eq!(locale.country(), Some("CN"));
        assert_eq!(locale.tag(), "zh-CN");

        assert_eq!(Locale::parse("de").tag(), "de");
        assert_eq!(Locale::parse("").tag(), "en");
        assert_eq!(Locale::parse("123").tag(), "en");
    }

    #[test]
    fn test_display_names_and_bindings() {
        let bindings = Locale::parse("en-GB").bindings();
        assert_eq!(bindings["language"], "en");
        assert_eq!(bindings["country"], "GB");
        assert_eq!(bindings["displayLanguage"], "English");
        assert_eq!(bindings["displayCountry"], "United Kingdom");
    }

    #[test]
    fn test_separators() {
        let de = Locale::parse("de-DE");
        assert_eq!(de.grouping_separator(), '.');
        assert_eq!(de.decimal_separator(), ',');
        assert_eq!(Locale::default().grouping_separator(), ',');
    }
}
