//! LDAP search filters used by policy rules.
//!
//! Supports `&`, `|`, `!`, equality, presence, substrings, `>=`, `<=`
//! and `~=` (treated as case-insensitive equality). Matching is
//! case-insensitive throughout.

use crate::error::{PolicyError, PolicyResult};
use crate::state::AccountState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Equal(String, String),
    Present(String),
    Substring {
        attr: String,
        initial: Option<String>,
        any: Vec<String>,
        last: Option<String>,
    },
    GreaterOrEqual(String, String),
    LessOrEqual(String, String),
}

impl Filter {
    pub fn parse(text: &str) -> PolicyResult<Filter> {
        let text = text.trim();
        let wrapped;
        let src = if text.starts_with('(') {
            text
        } else {
            wrapped = format!("({text})");
            wrapped.as_str()
        };
        let mut parser = Parser {
            src: src.as_bytes(),
            pos: 0,
            text: src,
        };
        let filter = parser.filter()?;
        if parser.pos != parser.src.len() {
            return Err(parser.error("trailing characters"));
        }
        Ok(filter)
    }

    pub fn matches(&self, entry: &AccountState) -> bool {
        match self {
            Filter::And(fs) => fs.iter().all(|f| f.matches(entry)),
            Filter::Or(fs) => fs.iter().any(|f| f.matches(entry)),
            Filter::Not(f) => !f.matches(entry),
            Filter::Present(attr) => {
                attr.eq_ignore_ascii_case("objectclass") || !entry.values_of(attr).is_empty()
            }
            Filter::Equal(attr, value) => entry
                .values_of(attr)
                .iter()
                .any(|v| v.to_lowercase() == *value),
            Filter::GreaterOrEqual(attr, value) => entry
                .values_of(attr)
                .iter()
                .any(|v| compare(&v.to_lowercase(), value).is_ge()),
            Filter::LessOrEqual(attr, value) => entry
                .values_of(attr)
                .iter()
                .any(|v| compare(&v.to_lowercase(), value).is_le()),
            Filter::Substring {
                attr,
                initial,
                any,
                last,
            } => entry
                .values_of(attr)
                .iter()
                .any(|v| substring_match(&v.to_lowercase(), initial, any, last)),
        }
    }
}

/// Integers compare numerically, everything else lexically.
fn compare(a: &str, b: &str) -> std::cmp::Ordering {
    match (a.parse::<i64>(), b.parse::<i64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}

fn substring_match(value: &str, initial: &Option<String>, any: &[String], last: &Option<String>) -> bool {
    let mut rest = value;
    if let Some(init) = initial {
        match rest.strip_prefix(init.as_str()) {
            Some(r) => rest = r,
            None => return false,
        }
    }
    for part in any {
        match rest.find(part.as_str()) {
            Some(i) => rest = &rest[i + part.len()..],
            None => return false,
        }
    }
    match last {
        Some(fin) => rest.ends_with(fin.as_str()),
        None => true,
    }
}

struct Parser<'a> {
    src: &'a [u8],
    pos: usize,
    text: &'a str,
}

impl Parser<'_> {
    fn error(&self, what: &str) -> PolicyError {
        PolicyError::BadFilter(format!("{what} at offset {} in {:?}", self.pos, self.text))
    }

    fn expect(&mut self, b: u8) -> PolicyResult<()> {
        if self.src.get(self.pos) == Some(&b) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", b as char)))
        }
    }

    fn filter(&mut self) -> PolicyResult<Filter> {
        self.expect(b'(')?;
        let f = match self.src.get(self.pos) {
            Some(b'&') => {
                self.pos += 1;
                Filter::And(self.list()?)
            }
            Some(b'|') => {
                self.pos += 1;
                Filter::Or(self.list()?)
            }
            Some(b'!') => {
                self.pos += 1;
                Filter::Not(Box::new(self.filter()?))
            }
            Some(_) => self.item()?,
            None => return Err(self.error("unexpected end")),
        };
        self.expect(b')')?;
        Ok(f)
    }

    fn list(&mut self) -> PolicyResult<Vec<Filter>> {
        let mut out = Vec::new();
        while self.src.get(self.pos) == Some(&b'(') {
            out.push(self.filter()?);
        }
        if out.is_empty() {
            return Err(self.error("empty filter list"));
        }
        Ok(out)
    }

    fn item(&mut self) -> PolicyResult<Filter> {
        let start = self.pos;
        while let Some(&b) = self.src.get(self.pos) {
            if matches!(b, b'=' | b'>' | b'<' | b'~' | b'(' | b')') {
                break;
            }
            self.pos += 1;
        }
        let attr = self.text[start..self.pos].trim().to_ascii_lowercase();
        if attr.is_empty() {
            return Err(self.error("missing attribute"));
        }
        let op = match self.src.get(self.pos) {
            Some(b'=') => {
                self.pos += 1;
                b'='
            }
            Some(&c @ (b'>' | b'<' | b'~')) => {
                self.pos += 1;
                self.expect(b'=')?;
                c
            }
            _ => return Err(self.error("missing operator")),
        };
        let vstart = self.pos;
        while let Some(&b) = self.src.get(self.pos) {
            if b == b')' {
                break;
            }
            if b == b'(' {
                return Err(self.error("unescaped '('"));
            }
            self.pos += 1;
        }
        let raw = &self.text[vstart..self.pos];
        match op {
            b'>' => Ok(Filter::GreaterOrEqual(attr, unescape(raw)?.to_lowercase())),
            b'<' => Ok(Filter::LessOrEqual(attr, unescape(raw)?.to_lowercase())),
            b'~' => Ok(Filter::Equal(attr, unescape(raw)?.to_lowercase())),
            _ if raw == "*" => Ok(Filter::Present(attr)),
            _ if raw.contains('*') => {
                let pieces: Vec<&str> = raw.split('*').collect();
                let n = pieces.len();
                let piece = |s: &str| -> PolicyResult<Option<String>> {
                    if s.is_empty() {
                        Ok(None)
                    } else {
                        Ok(Some(unescape(s)?.to_lowercase()))
                    }
                };
                let mut any = Vec::new();
                for p in &pieces[1..n - 1] {
                    if let Some(s) = piece(p)? {
                        any.push(s);
                    }
                }
                Ok(Filter::Substring {
                    attr,
                    initial: piece(pieces[0])?,
                    any,
                    last: piece(pieces[n - 1])?,
                })
            }
            _ => Ok(Filter::Equal(attr, unescape(raw)?.to_lowercase())),
        }
    }
}

/// Decodes `\XX` hex escapes in an assertion value.
fn unescape(raw: &str) -> PolicyResult<String> {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            let hex = raw
                .get(i + 1..i + 3)
                .and_then(|h| u8::from_str_radix(h, 16).ok())
                .ok_or_else(|| PolicyError::BadFilter(format!("bad escape in {raw:?}")))?;
            out.push(hex);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| PolicyError::BadFilter(format!("bad escape in {raw:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person() -> AccountState {
        AccountState::new("uid=alice,ou=people,dc=example,dc=com")
            .with_attribute("objectClass", "inetOrgPerson")
            .with_attribute("objectClass", "person")
            .with_attribute("mail", "Alice@Example.com")
            .with_attribute("employeeNumber", "42")
    }

    #[test]
    fn test_equality_and_presence() {
        let e = person();
        assert!(Filter::parse("(objectClass=person)").unwrap().matches(&e));
        assert!(Filter::parse("objectclass=PERSON").unwrap().matches(&e));
        assert!(Filter::parse("(mail=*)").unwrap().matches(&e));
        assert!(!Filter::parse("(telephoneNumber=*)").unwrap().matches(&e));
    }

    #[test]
    fn test_boolean_composition() {
        let e = person();
        let f = Filter::parse("(&(objectClass=person)(|(mail=bob*)(mail=alice*)))").unwrap();
        assert!(f.matches(&e));
        let f = Filter::parse("(!(objectClass=person))").unwrap();
        assert!(!f.matches(&e));
    }

    #[test]
    fn test_substrings_and_ordering() {
        let e = person();
        assert!(Filter::parse("(mail=*@example.com)").unwrap().matches(&e));
        assert!(Filter::parse("(mail=a*ce*com)").unwrap().matches(&e));
        assert!(!Filter::parse("(mail=b*)").unwrap().matches(&e));
        assert!(Filter::parse("(employeeNumber>=40)").unwrap().matches(&e));
        assert!(!Filter::parse("(employeeNumber<=9)").unwrap().matches(&e));
    }

    #[test]
    fn test_escapes() {
        let e = AccountState::new("cn=x").with_attribute("cn", "a(b)");
        assert!(Filter::parse("(cn=a\\28b\\29)").unwrap().matches(&e));
    }

    #[test]
    fn test_bad_filters() {
        assert!(Filter::parse("(cn=x").is_err());
        assert!(Filter::parse("(&)").is_err());
        assert!(Filter::parse("(=x)").is_err());
        assert!(Filter::parse("(cn=x))").is_err());
        assert!(Filter::parse("(cn=\\zz)").is_err());
    }
}
