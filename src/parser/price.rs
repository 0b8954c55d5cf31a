// Price normalization rules shared by the adapters.

/// Reads the first number in a displayed price: "£1,234.56" -> 1234.56.
/// Currency symbols and thousands separators are dropped.
pub fn parse_price(text: &str) -> Option<f64> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let number: String = text[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
        .filter(|c| *c != ',')
        .collect();
    let number = number.trim_end_matches('.');
    number.parse::<f64>().ok().filter(|p| p.is_finite())
}

/// Recombines a price shown as two spans, pounds and pence:
/// ("£199", ".99") -> 199.99.
pub fn combine_split_price(pounds: &str, pence: &str) -> Option<f64> {
    let whole = pounds.split('.').next().unwrap_or_default();
    let whole: String = whole.chars().filter(|c| c.is_ascii_digit()).collect();
    let whole: u64 = whole.parse().ok()?;

    let fraction: String = pence.chars().filter(|c| c.is_ascii_digit()).take(2).collect();
    let fraction: u64 = if fraction.is_empty() { 0 } else { fraction.parse().ok()? };

    let pence = whole.checked_mul(100)?.checked_add(fraction)?;
    Some(pence as f64 / 100.0)
}

/// Prices compared in whole pence, so 599.99 read twice is the same price.
pub fn same_price(a: f64, b: f64) -> bool {
    (a * 100.0).round() == (b * 100.0).round()
}
