/// Replace `${ENV_VAR}` and `${ENV_VAR:-default}` placeholders in config
/// string values.
///
/// Unresolvable variables without a default are left as-is.
pub fn substitute_env(input: &str) -> String {
    substitute_env_with(input, |name| std::env::var(name).ok())
}

fn substitute_env_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut inner = String::new();
            let mut closed = false;
            for c in chars.by_ref() {
                if c == '}' {
                    closed = true;
                    break;
                }
                inner.push(c);
            }
            if closed && !inner.is_empty() {
                let (name, default) = match inner.split_once(":-") {
                    Some((n, d)) => (n, Some(d)),
                    None => (inner.as_str(), None),
                };
                match lookup(name).or_else(|| default.map(str::to_string)) {
                    Some(val) => result.push_str(&val),
                    None => {
                        // Leave unresolved placeholder as-is.
                        result.push_str("${");
                        result.push_str(&inner);
                        result.push('}');
                    },
                }
            } else {
                // Malformed: emit literal.
                result.push_str("${");
                result.push_str(&inner);
            }
        } else {
            result.push(ch);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_known_var() {
        let lookup = |name: &str| match name {
            "PARLEY_TEST_VAR" => Some("hello".to_string()),
            _ => None,
        };
        assert_eq!(
            substitute_env_with("url=${PARLEY_TEST_VAR}", lookup),
            "url=hello"
        );
    }

    #[test]
    fn falls_back_to_default() {
        let lookup = |_: &str| None;
        assert_eq!(
            substitute_env_with("${PARLEY_PORT:-8085}", lookup),
            "8085"
        );
    }

    #[test]
    fn env_wins_over_default() {
        let lookup = |name: &str| (name == "PARLEY_PORT").then(|| "9999".to_string());
        assert_eq!(substitute_env_with("${PARLEY_PORT:-8085}", lookup), "9999");
    }

    #[test]
    fn leaves_unknown_var() {
        let lookup = |_: &str| None;
        assert_eq!(
            substitute_env_with("${PARLEY_NONEXISTENT_XYZ}", lookup),
            "${PARLEY_NONEXISTENT_XYZ}"
        );
    }

    #[test]
    fn no_placeholders() {
        assert_eq!(substitute_env("plain text"), "plain text");
    }
}
