use crate::wikitext::strip_markup;
use lazy_static::lazy_static;
use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use std::collections::HashSet;
use unicode_normalization::UnicodeNormalization;

lazy_static! {
    // Word runs; `-` and `.` between two word runs stay inside the token.
    static ref TOKEN_RE: Regex = Regex::new(r"\w+(?:[-.]\w+)*").expect("valid regex");
    static ref STOPWORDS: HashSet<&'static str> = {
        let words: &[&str] = &[
            "i","me","my","myself","we","our","ours","ourselves","you","you're","you've","you'll","you'd",
            "your","yours","yourself","yourselves","he","him","his","himself","she","she's","her","hers",
            "herself","it","it's","its","itself","they","them","their","theirs","themselves","what","which",
            "who","whom","this","that","that'll","these","those","am","is","are","was","were","be","been",
            "being","have","has","had","having","do","does","did","doing","a","an","the","and","but","if",
            "or","because","as","until","while","of","at","by","for","with","about","against","between",
            "into","through","during","before","after","above","below","to","from","up","down","in","out",
            "on","off","over","under","again","further","then","once","here","there","when","where","why",
            "how","all","any","both","each","few","more","most","other","some","such","no","nor","not",
            "only","own","same","so","than","too","very","s","t","can","will","just","don","don't","should",
            "should've","now","d","ll","m","o","re","ve","y","ain","aren","aren't","couldn","couldn't",
            "didn","didn't","doesn","doesn't","hadn","hadn't","hasn","hasn't","haven","haven't","isn",
            "isn't","ma","mightn","mightn't","mustn","mustn't","needn","needn't","shan","shan't","shouldn",
            "shouldn't","wasn","wasn't","weren","weren't","won","won't","wouldn","wouldn't"
        ];
        words.iter().copied().collect()
    };
}

pub fn is_stopword(token: &str) -> bool { STOPWORDS.contains(token) }

/// Markup stripping, tokenization and stemming used by the term-frequency
/// transform. Implementations must be pure: same input, same output.
pub trait TextNormalizer {
    /// Lower-cased plain text with templates and file/image links removed.
    fn plain_text(&self, markup: &str) -> String;
    fn tokenize(&self, text: &str) -> Vec<String>;
    fn stem(&self, token: &str) -> String;
}

/// The normalizer for MediaWiki articles: wikitext stripping, NFKC
/// normalization and Snowball English stemming.
pub struct WikiNormalizer {
    stemmer: Stemmer,
}

impl Default for WikiNormalizer {
    fn default() -> Self { Self::new() }
}

impl WikiNormalizer {
    pub fn new() -> Self {
        Self { stemmer: Stemmer::create(Algorithm::English) }
    }
}

impl TextNormalizer for WikiNormalizer {
    fn plain_text(&self, markup: &str) -> String {
        strip_markup(markup).nfkc().collect::<String>().to_lowercase()
    }

    fn tokenize(&self, text: &str) -> Vec<String> {
        TOKEN_RE.find_iter(text).map(|m| m.as_str().to_string()).collect()
    }

    fn stem(&self, token: &str) -> String {
        self.stemmer.stem(token).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_tokenize() {
        let n = WikiNormalizer::new();
        let t = n.tokenize("well-known test-case, 42 42a. runner's 3.14");
        assert_eq!(t, vec!["well-known", "test-case", "42", "42a", "runner", "s", "3.14"]);
    }

    #[test]
    fn stems_deterministically() {
        let n = WikiNormalizer::new();
        assert_eq!(n.stem("running"), "run");
        assert_eq!(n.stem("running"), n.stem("running"));
    }

    #[test]
    fn plain_text_is_lower_cased() {
        let n = WikiNormalizer::new();
        assert_eq!(n.plain_text("'''Paris''' {{Infobox}}is [[France|FRANCE]]'s capital"), "paris is france's capital");
    }

    #[test]
    fn contraction_fragments_are_stopwords() {
        assert!(is_stopword("don"));
        assert!(is_stopword("t"));
        assert!(!is_stopword("known"));
    }
}
