//! Name matching between REST parameters, path segments and SQL tables.

/// Scores at or above this mean "same thing".
pub const SIMILARITY_THRESHOLD: f64 = 0.6;

/// Lowercase tokens of an identifier in camelCase, snake_case or kebab-case.
pub fn tokens(name: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut previous_lower = false;
    for c in name.chars() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
            previous_lower = false;
            continue;
        }
        if c.is_uppercase() && previous_lower && !current.is_empty() {
            out.push(std::mem::take(&mut current));
        }
        previous_lower = c.is_lowercase() || c.is_ascii_digit();
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

/// Naive English singular.
pub fn singular(token: &str) -> String {
    if let Some(stem) = token.strip_suffix("ies") {
        if !stem.is_empty() {
            return format!("{}y", stem);
        }
    }
    for suffix in ["sses", "xes", "ches", "shes"] {
        if token.ends_with(suffix) {
            return token[..token.len() - 2].to_string();
        }
    }
    match token.strip_suffix('s') {
        Some(stem) if stem.len() > 1 && !stem.ends_with('s') => stem.to_string(),
        _ => token.to_string(),
    }
}

fn normalized(name: &str) -> String {
    tokens(name).iter().map(|t| singular(t)).collect::<Vec<_>>().join("")
}

fn bigrams(s: &str) -> Vec<(char, char)> {
    let chars: Vec<char> = s.chars().collect();
    chars.windows(2).map(|w| (w[0], w[1])).collect()
}

/// Dice coefficient over character bigrams of the normalized names, in `[0, 1]`.
pub fn similarity(a: &str, b: &str) -> f64 {
    let (a, b) = (normalized(a), normalized(b));
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    let (x, mut y) = (bigrams(&a), bigrams(&b));
    if x.is_empty() || y.is_empty() {
        return 0.0;
    }
    let total = x.len() + y.len();
    let mut common = 0;
    for pair in &x {
        if let Some(pos) = y.iter().position(|p| p == pair) {
            y.swap_remove(pos);
            common += 1;
        }
    }
    2.0 * common as f64 / total as f64
}

pub fn is_similar(a: &str, b: &str) -> bool {
    similarity(a, b) >= SIMILARITY_THRESHOLD
}

/// How well a parameter named `param` stands for `column` of `table`.
///
/// `orderId` matches column `ID` of table `ORDERS` as well as a column
/// literally named `order_id`.
pub fn param_to_column(param: &str, table: &str, column: &str) -> f64 {
    let direct = similarity(param, column);
    let qualified = similarity(param, &format!("{}_{}", singular(&table.to_lowercase()), column));
    direct.max(qualified)
}

/// Best candidate for `name` at or above the threshold.
pub fn best_match<'a, I>(name: &str, candidates: I) -> Option<(&'a str, f64)>
where
    I: IntoIterator<Item = &'a str>,
{
    candidates
        .into_iter()
        .map(|c| (c, similarity(name, c)))
        .filter(|(_, s)| *s >= SIMILARITY_THRESHOLD)
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens() {
        assert_eq!(tokens("orderId"), vec!["order", "id"]);
        assert_eq!(tokens("ORDER_ITEMS"), vec!["order", "items"]);
        assert_eq!(tokens("x-trace-id"), vec!["x", "trace", "id"]);
    }

    #[test]
    fn test_singular() {
        assert_eq!(singular("orders"), "order");
        assert_eq!(singular("categories"), "category");
        assert_eq!(singular("boxes"), "box");
        assert_eq!(singular("address"), "address");
    }

    #[test]
    fn test_similarity_ignores_case_and_plural() {
        assert_eq!(similarity("orders", "ORDER"), 1.0);
        assert!(is_similar("orderItems", "ORDER_ITEM"));
        assert!(!is_similar("name", "price"));
        assert_eq!(similarity("", "x"), 0.0);
    }

    #[test]
    fn test_param_to_column() {
        assert!(param_to_column("orderId", "ORDERS", "ID") >= SIMILARITY_THRESHOLD);
        assert!(param_to_column("name", "ORDERS", "NAME") >= SIMILARITY_THRESHOLD);
        assert!(param_to_column("price", "ORDERS", "ID") < SIMILARITY_THRESHOLD);
    }

    #[test]
    fn test_best_match() {
        let tables = ["USERS", "ORDERS", "PRODUCTS"];
        let (best, score) = best_match("order", tables.iter().copied()).unwrap();
        assert_eq!(best, "ORDERS");
        assert_eq!(score, 1.0);
        assert!(best_match("zzz", tables.iter().copied()).is_none());
    }
}
