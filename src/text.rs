use unicode_normalization::UnicodeNormalization;

/// Lowercase and fold accents to ASCII (`"Hôtel"` -> `"hotel"`).
///
/// Characters with no ASCII decomposition are dropped, as are combining marks.
pub fn fold(text: &str) -> String {
    text.nfkd()
        .filter(char::is_ascii)
        .flat_map(|c| c.to_lowercase())
        .collect()
}

/// Split folded text into word tokens of at least two characters.
///
/// A word character is alphanumeric or `_`; everything else separates tokens.
pub fn tokenize(folded: &str) -> impl Iterator<Item = &str> {
    folded
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|token| token.chars().count() >= 2)
}

/// Whitespace-separated token count used as the sentence marker weight.
pub fn word_count(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}
