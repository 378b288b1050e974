use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;
use unicode_normalization::UnicodeNormalization;

lazy_static! {
    static ref RE: Regex = Regex::new(r"\w+").expect("valid regex");
    static ref STOPWORDS: HashSet<&'static str> = {
        let words: &[&str] = &[
            "a","al","algo","algunas","algunos","ante","antes","como","con","contra","cual","cuando",
            "de","del","desde","donde","durante","e","el","ella","ellas","ellos","en","entre","era","erais",
            "eran","eras","eres","es","esa","esas","ese","eso","esos","esta","estaba","estabais","estaban",
            "estabas","estad","estada","estadas","estado","estados","estamos","estando","estar","estaremos",
            "estará","estarán","estarás","estaré","estaréis","estaría","estaríais","estaríamos","estarían",
            "estarías","estas","este","estemos","esto","estos","estoy","estuve","estuviera","estuvierais",
            "estuvieran","estuvieras","estuvieron","estuviese","estuvieseis","estuviesen","estuvieses",
            "estuvimos","estuviste","estuvisteis","estuviéramos","estuviésemos","estuvo","está","estábamos",
            "estáis","están","estás","esté","estéis","estén","estés",
            "fue","fuera","fuerais","fueran","fueras","fueron","fuese","fueseis","fuesen","fueses","fui",
            "fuimos","fuiste","fuisteis","fuéramos","fuésemos",
            "ha","habida","habidas","habido","habidos","habiendo","habremos","habrá","habrán","habrás","habré",
            "habréis","habría","habríais","habríamos","habrían","habrías","habéis","había","habíais",
            "habíamos","habían","habías","han","has","hasta","hay","haya","hayamos","hayan","hayas","hayáis",
            "he","hemos","hube","hubiera","hubierais","hubieran","hubieras","hubieron","hubiese","hubieseis",
            "hubiesen","hubieses","hubimos","hubiste","hubisteis","hubiéramos","hubiésemos","hubo",
            "la","las","le","les","lo","los","me","mi","mis","mucho","muchos","muy","más","mí","mía","mías",
            "mío","míos","nada","ni","no","nos","nosotras","nosotros","nuestra","nuestras","nuestro",
            "nuestros","o","os","otra","otras","otro","otros","para","pero","poco","por","porque","que",
            "quien","quienes","qué","se","sea","seamos","sean","seas","seremos","será","serán","serás",
            "seré","seréis","sería","seríais","seríamos","serían","serías","seáis","sido","siendo","sin",
            "sobre","sois","somos","son","soy","su","sus","suya","suyas","suyo","suyos","sí","también",
            "tanto","te","tendremos","tendrá","tendrán","tendrás","tendré","tendréis","tendría","tendríais",
            "tendríamos","tendrían","tendrías","tened","tenemos","tenga","tengamos","tengan","tengas","tengo",
            "tengáis","tenida","tenidas","tenido","tenidos","teniendo","tenéis","tenía","teníais","teníamos",
            "tenían","tenías","ti","tiene","tienen","tienes","todo","todos","tu","tus","tuve","tuviera",
            "tuvierais","tuvieran","tuvieras","tuvieron","tuviese","tuvieseis","tuviesen","tuvieses",
            "tuvimos","tuviste","tuvisteis","tuviéramos","tuviésemos","tuvo","tuya","tuyas","tuyo","tuyos",
            "tú","un","una","uno","unos","vosotras","vosotros","vuestra","vuestras","vuestro","vuestros",
            "y","ya","yo","él","éramos"
        ];
        words.iter().copied().collect()
    };
}

pub fn is_stopword(token: &str) -> bool { STOPWORDS.contains(token) }

/// Tokenize text into normalized index terms.
///
/// NFKC + lowercase, split on word runs, drop Spanish stopwords, then run each
/// survivor through [`clean_token`]. Never yields an empty string.
pub fn tokenize(text: &str) -> Vec<String> {
    let normalized = text.nfkc().collect::<String>().to_lowercase();
    RE.find_iter(&normalized)
        .map(|m| m.as_str())
        .filter(|word| !is_stopword(word))
        .filter_map(clean_token)
        .collect()
}

/// Per-token cleanup applied after stopword removal.
///
/// Returns `None` when nothing survives.
pub fn clean_token(raw: &str) -> Option<String> {
    let kept: String = raw
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || c.is_whitespace())
        .collect();
    let cleaned = kept
        .trim_start_matches('0')
        .trim_matches('_')
        .trim_matches(|c| c == ':' || c == ';')
        .trim();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_tokenize() {
        let t = tokenize("Decreto N°0123;");
        assert_eq!(t.first().map(String::as_str), Some("decreto"));
        assert!(t.iter().any(|w| w == "123"));
    }

    #[test]
    fn cleanup_rules() {
        assert_eq!(clean_token("000"), None);
        assert_eq!(clean_token("__x__"), Some("x".to_string()));
        assert_eq!(clean_token("007_"), Some("7".to_string()));
        assert_eq!(clean_token("a-b"), Some("ab".to_string()));
    }
}
