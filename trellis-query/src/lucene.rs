/// Extracts the terms of a Lucene-ish filter string for downstream log
/// highlighting. Best-effort tokenizer: boolean keywords are dropped,
/// `field:` prefixes, surrounding quotes and trailing wildcard markers are
/// stripped. No grammar; pure text processing independent of any response.
pub fn extract_search_words(raw_query: &str) -> Vec<String> {
    raw_query
        .split_whitespace()
        .filter(|term| !matches!(*term, "AND" | "OR" | "NOT"))
        .filter_map(|term| {
            let term = term.rsplit(':').next().unwrap_or(term);
            let term = term.trim_matches('"').trim_end_matches('*');
            (!term.is_empty()).then(|| term.to_string())
        })
        .collect()
}
