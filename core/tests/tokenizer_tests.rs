use ocrsearch_core::tokenizer::tokenize;

#[test]
fn it_normalizes_decree_numbers() {
    let words = tokenize("Decreto N°0123;");
    assert!(words.contains(&"decreto".to_string()));
    assert!(words.contains(&"123".to_string()));
    assert!(!words.contains(&"0123".to_string()));
    assert!(words.iter().all(|w| !w.is_empty()));
}

#[test]
fn it_filters_stopwords() {
    let words = tokenize("El decreto de la Municipalidad y los anexos");
    assert!(!words.contains(&"el".to_string()));
    assert!(!words.contains(&"de".to_string()));
    assert!(!words.contains(&"los".to_string()));
    assert_eq!(words, vec!["decreto", "municipalidad", "anexos"]);
}

#[test]
fn it_strips_underscores_and_drops_empty_tokens() {
    let words = tokenize("__firma__ 000 _");
    assert_eq!(words, vec!["firma"]);
}

#[test]
fn it_keeps_accents_and_composes_them() {
    // "resolución" written with a combining acute accent.
    let words = tokenize("RESOLUCIO\u{301}N");
    assert_eq!(words, vec!["resolución"]);
}

#[test]
fn stopword_only_text_is_empty() {
    assert!(tokenize("de la y el en los").is_empty());
}
