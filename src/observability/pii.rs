use regex::Regex;
use lazy_static::lazy_static;

lazy_static! {
    /// Applied in order: credentials first, then addresses that may remain.
    static ref MASKS: Vec<(Regex, &'static str)> = vec![
        (
            Regex::new(r"(Bearer\s+)[A-Za-z0-9\-._~+/]+=*").unwrap(),
            "${1}***",
        ),
        (
            Regex::new(r#"(?i)("?(?:client_secret|access_token)"?\s*[=:]\s*"?)[^"&\s,}]+"#).unwrap(),
            "${1}***",
        ),
        (
            Regex::new(r"[\w.+-]+@[\w-]+(?:\.[\w-]+)+").unwrap(),
            "***@***",
        ),
    ];
}

/// Masks credentials and e-mail addresses before anything reaches the log.
pub fn mask_secrets(input: &str) -> String {
    MASKS.iter().fold(input.to_string(), |acc, (re, with)| {
        re.replace_all(&acc, *with).into_owned()
    })
}
