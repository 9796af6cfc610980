//! `WWW-Authenticate` challenge parsing

use reqwest::header::{HeaderMap, WWW_AUTHENTICATE};
use std::collections::BTreeMap;

/// Authentication scheme named by a challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthScheme {
    Basic,
    Bearer,
    Other(String),
}

impl AuthScheme {
    fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("basic") {
            AuthScheme::Basic
        } else if s.eq_ignore_ascii_case("bearer") {
            AuthScheme::Bearer
        } else {
            AuthScheme::Other(s.to_string())
        }
    }
}

/// One challenge from a 401 response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub scheme: AuthScheme,
    pub parameters: BTreeMap<String, String>,
}

impl Challenge {
    pub fn realm(&self) -> Option<&str> {
        self.parameters.get("realm").map(String::as_str)
    }

    pub fn service(&self) -> Option<&str> {
        self.parameters.get("service").map(String::as_str)
    }

    pub fn scope(&self) -> Option<&str> {
        self.parameters.get("scope").map(String::as_str)
    }

    /// Parse a single header value.
    ///
    /// Example: `Bearer realm="https://auth.r.test/token",service="r.test",scope="repository:a:pull,push"`
    pub fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        let (scheme, rest) = match header.split_once(char::is_whitespace) {
            Some((scheme, rest)) => (scheme, rest),
            None if !header.is_empty() => (header, ""),
            None => return None,
        };

        Some(Self {
            scheme: AuthScheme::parse(scheme),
            parameters: parse_parameters(rest),
        })
    }
}

/// All challenges carried by a response
pub fn parse_challenges(headers: &HeaderMap) -> Vec<Challenge> {
    headers
        .get_all(WWW_AUTHENTICATE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(Challenge::parse)
        .collect()
}

/// `key=value, key="quoted, value"` pairs; keys are lowercased
fn parse_parameters(s: &str) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    let mut chars = s.chars().peekable();

    loop {
        while matches!(chars.peek(), Some(c) if c.is_whitespace() || *c == ',') {
            chars.next();
        }

        let key: String = chars
            .by_ref()
            .take_while(|c| *c != '=')
            .collect::<String>()
            .trim()
            .to_ascii_lowercase();
        if key.is_empty() {
            break;
        }

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '"' => break,
                    c => value.push(c),
                }
            }
        } else {
            while let Some(c) = chars.peek() {
                if *c == ',' {
                    break;
                }
                value.push(*c);
                chars.next();
            }
            value = value.trim().to_string();
        }

        params.insert(key, value);
    }

    params
}
