// Text normalization applied once when card text is read off a page.

/// Suffixes that retailers print either glued to the model number or spaced.
const MODEL_SUFFIXES: [&str; 3] = ["xt", "xtx", "ti"];

/// Lowercases, collapses whitespace and glues model suffixes onto their
/// number, so "RX 9070 XT" and "rx 9070xt" both become "rx 9070xt".
pub fn normalize_text(text: &str) -> String {
    let lowered = text.replace('\u{a0}', " ").to_lowercase();
    let tokens: Vec<&str> = lowered.split_whitespace().collect();

    let mut out: Vec<String> = Vec::with_capacity(tokens.len());
    let mut i = 0;
    while i < tokens.len() {
        let token = tokens[i];
        if let Some(next) = tokens.get(i + 1) {
            if is_model_number(token) && MODEL_SUFFIXES.contains(next) {
                out.push(format!("{}{}", token, next));
                i += 2;
                continue;
            }
        }
        out.push(token.to_string());
        i += 1;
    }
    out.join(" ")
}

/// Model numbers are four digits, optionally prefixed ("rx9070", "rtx4070").
fn is_model_number(token: &str) -> bool {
    let digits = token
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .count();
    digits == 4
}

/// Cleans a product title for storage: single line, no quotes, no padding.
pub fn clean_title(title: &str) -> String {
    title
        .replace('\u{a0}', " ")
        .chars()
        .filter(|c| *c != '"' && *c != '\'')
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
