//! Distinguished name normalization and scope tests.

use crate::error::{PolicyError, PolicyResult};

/// Search scope of a policy rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Base,
    One,
    Sub,
    Children,
}

impl Scope {
    pub fn parse(s: &str) -> PolicyResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "" | "base" => Ok(Scope::Base),
            "one" | "onelevel" => Ok(Scope::One),
            "sub" | "subtree" => Ok(Scope::Sub),
            "children" | "subordinate" => Ok(Scope::Children),
            other => Err(PolicyError::BadUrl(format!("unknown scope {other:?}"))),
        }
    }
}

/// Normalizes a DN for comparison: attribute types and values are
/// lowercased and whitespace around separators removed. Escaped commas
/// stay inside their RDN.
pub fn normalize(dn: &str) -> PolicyResult<String> {
    let rdns = split_rdns(dn);
    let mut out = Vec::with_capacity(rdns.len());
    for rdn in rdns {
        let rdn = rdn.trim();
        if rdn.is_empty() {
            if dn.trim().is_empty() {
                return Ok(String::new());
            }
            return Err(PolicyError::BadDn(dn.to_string()));
        }
        let (ty, val) = rdn
            .split_once('=')
            .ok_or_else(|| PolicyError::BadDn(dn.to_string()))?;
        let ty = ty.trim();
        if ty.is_empty() {
            return Err(PolicyError::BadDn(dn.to_string()));
        }
        out.push(format!(
            "{}={}",
            ty.to_ascii_lowercase(),
            val.trim().to_lowercase()
        ));
    }
    Ok(out.join(","))
}

/// Best-effort normalization for identities coming from requests.
pub fn normalize_lossy(dn: &str) -> String {
    normalize(dn).unwrap_or_else(|_| dn.trim().to_lowercase())
}

fn split_rdns(dn: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (i, c) in dn.char_indices() {
        match c {
            '\\' if !escaped => escaped = true,
            ',' if !escaped => {
                parts.push(&dn[start..i]);
                start = i + 1;
            }
            _ => escaped = false,
        }
    }
    parts.push(&dn[start..]);
    parts
}

/// Parent of a normalized DN (empty string for a single RDN).
fn parent(ndn: &str) -> &str {
    let mut escaped = false;
    for (i, c) in ndn.char_indices() {
        match c {
            '\\' if !escaped => escaped = true,
            ',' if !escaped => return &ndn[i + 1..],
            _ => escaped = false,
        }
    }
    ""
}

fn is_suffix(ndn: &str, base: &str) -> bool {
    if base.is_empty() {
        return true;
    }
    if ndn == base {
        return true;
    }
    ndn.len() > base.len()
        && ndn.ends_with(base)
        && ndn.as_bytes()[ndn.len() - base.len() - 1] == b','
}

/// Whether normalized `ndn` lies within `scope` of normalized `base`.
pub fn in_scope(ndn: &str, base: &str, scope: Scope) -> bool {
    match scope {
        Scope::Base => ndn == base,
        Scope::One => !ndn.is_empty() && parent(ndn) == base,
        Scope::Sub => is_suffix(ndn, base),
        Scope::Children => ndn != base && is_suffix(ndn, base),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(
            normalize("UID=Alice , OU=People,dc=Example, dc=COM").unwrap(),
            "uid=alice,ou=people,dc=example,dc=com"
        );
        assert_eq!(normalize("").unwrap(), "");
        assert!(normalize("uid=a,,dc=x").is_err());
        assert!(normalize("novalue").is_err());
    }

    #[test]
    fn test_escaped_comma_stays_in_rdn() {
        let n = normalize("cn=Smith\\, John,dc=x").unwrap();
        assert_eq!(n, "cn=smith\\, john,dc=x");
        assert_eq!(parent(&n), "dc=x");
    }

    #[test]
    fn test_scopes() {
        let base = "ou=people,dc=example,dc=com";
        let child = "uid=a,ou=people,dc=example,dc=com";
        let grandchild = "cn=x,uid=a,ou=people,dc=example,dc=com";
        let lookalike = "uid=a,xou=people,dc=example,dc=com";

        assert!(in_scope(base, base, Scope::Base));
        assert!(!in_scope(child, base, Scope::Base));

        assert!(in_scope(child, base, Scope::One));
        assert!(!in_scope(grandchild, base, Scope::One));

        assert!(in_scope(base, base, Scope::Sub));
        assert!(in_scope(grandchild, base, Scope::Sub));
        assert!(!in_scope(lookalike, base, Scope::Sub));

        assert!(!in_scope(base, base, Scope::Children));
        assert!(in_scope(child, base, Scope::Children));
        assert!(in_scope(child, "", Scope::Sub));
    }
}
