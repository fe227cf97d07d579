/// Check if a string looks like a content digest, `<algorithm>:<hex>`.
pub fn is_digest(s: &str) -> bool {
    match s.split_once(':') {
        Some((algo, hex)) => !algo.is_empty() && !hex.is_empty() && !hex.contains(':'),
        None => false,
    }
}
