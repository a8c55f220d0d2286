//! Capability text expressions.
//!
//! A parser for the classic libcap textual form, over the capability
//! vocabulary of the `caps` crate. An expression is a whitespace-separated
//! list of clauses; each clause names capabilities and then applies one or
//! more operator groups to them:
//!
//! ```text
//! "="                  - clear every set
//! "=p"                 - raise every capability in the permitted set
//! "cap_sys_admin+p"    - raise CAP_SYS_ADMIN in the permitted set
//! "23,cap_sys_admin+p" - ids and names mix freely
//! ```
//!
//! The capability list is comma-separated; an empty list (or the word `all`)
//! means every capability the crate knows. Flags are `e`, `i` and `p`; only
//! the permitted subset of the result is kept, since that is the only subset
//! the launcher consumes.

use caps::{Capability, CapsHashSet};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapTextError {
    #[error("clause {0:?} has no operator")]
    NoOperator(String),

    #[error("unknown capability {0:?}")]
    UnknownCapability(String),

    #[error("unknown capability flag {0:?}")]
    UnknownFlag(char),
}

/// Parses a capability expression, returning the permitted subset.
pub fn parse(text: &str) -> Result<CapsHashSet, CapTextError> {
    let mut permitted = CapsHashSet::new();
    for clause in text.split_whitespace() {
        parse_clause(clause, &mut permitted)?;
    }
    Ok(permitted)
}

/// Canonical text of a permitted set: `=` when empty, `=p` when full,
/// otherwise the sorted name list with `+p`.
pub fn to_text(permitted: &CapsHashSet) -> String {
    if permitted.is_empty() {
        return "=".to_string();
    }
    if *permitted == caps::all() {
        return "=p".to_string();
    }
    let mut names: Vec<(u8, String)> = permitted
        .iter()
        .map(|cap| (cap.index(), cap.to_string().to_lowercase()))
        .collect();
    names.sort_unstable();
    let list: Vec<String> = names.into_iter().map(|(_, name)| name).collect();
    format!("{}+p", list.join(","))
}

fn parse_clause(clause: &str, permitted: &mut CapsHashSet) -> Result<(), CapTextError> {
    let op_pos = clause
        .find(['+', '-', '='])
        .ok_or_else(|| CapTextError::NoOperator(clause.to_string()))?;
    let (list, ops) = clause.split_at(op_pos);
    let listed = parse_list(list)?;

    let mut chars = ops.chars().peekable();
    while let Some(op) = chars.next() {
        let mut raises_permitted = false;
        while let Some(&flag) = chars.peek() {
            match flag {
                'p' => raises_permitted = true,
                'e' | 'i' => {} // tracked by libcap, ignored here
                '+' | '-' | '=' => break,
                other => return Err(CapTextError::UnknownFlag(other)),
            }
            chars.next();
        }
        match op {
            // `=` resets every set before applying its flags.
            '=' => {
                permitted.clear();
                if raises_permitted {
                    permitted.extend(&listed);
                }
            }
            '+' if raises_permitted => permitted.extend(&listed),
            '-' if raises_permitted => {
                for cap in &listed {
                    permitted.remove(cap);
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Parses the comma-separated capability list of one clause. Empty or `all`
/// means every known capability; tokens are names (with or without the
/// `cap_` prefix, any case) or decimal capability numbers.
fn parse_list(list: &str) -> Result<CapsHashSet, CapTextError> {
    if list.is_empty() || list.eq_ignore_ascii_case("all") {
        return Ok(caps::all());
    }
    let mut set = CapsHashSet::new();
    for token in list.split(',') {
        set.insert(parse_capability(token)?);
    }
    Ok(set)
}

fn parse_capability(token: &str) -> Result<Capability, CapTextError> {
    if let Ok(index) = token.parse::<u8>() {
        return caps::all()
            .into_iter()
            .find(|cap| cap.index() == index)
            .ok_or_else(|| CapTextError::UnknownCapability(token.to_string()));
    }
    let mut name = token.to_uppercase();
    if !name.starts_with("CAP_") {
        name = format!("CAP_{name}");
    }
    name.parse::<Capability>()
        .map_err(|_| CapTextError::UnknownCapability(token.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_equals_clears_everything() {
        assert!(parse("=").unwrap().is_empty());
    }

    #[test]
    fn equals_p_raises_everything() {
        assert_eq!(parse("=p").unwrap(), caps::all());
    }

    #[test]
    fn single_named_capability() {
        let set = parse("cap_sys_admin+p").unwrap();
        assert_eq!(set.len(), 1);
        assert!(set.contains(&Capability::CAP_SYS_ADMIN));
    }

    #[test]
    fn numeric_and_named_mix() {
        // 23 is CAP_SYS_NICE.
        let set = parse("23,CAP_SYS_ADMIN+p").unwrap();
        assert!(set.contains(&Capability::CAP_SYS_NICE));
        assert!(set.contains(&Capability::CAP_SYS_ADMIN));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn minus_removes_from_permitted() {
        let set = parse("=p cap_sys_admin-p").unwrap();
        assert!(!set.contains(&Capability::CAP_SYS_ADMIN));
        assert_eq!(set.len(), caps::all().len() - 1);
    }

    #[test]
    fn non_permitted_flags_are_ignored() {
        assert!(parse("cap_chown+ei").unwrap().is_empty());
    }

    #[test]
    fn malformed_expressions_are_rejected() {
        assert!(matches!(parse("cap_chown"), Err(CapTextError::NoOperator(_))));
        assert!(matches!(
            parse("cap_bogus+p"),
            Err(CapTextError::UnknownCapability(_))
        ));
        assert!(matches!(
            parse("cap_chown+x"),
            Err(CapTextError::UnknownFlag('x'))
        ));
    }

    #[test]
    fn canonical_text_forms() {
        assert_eq!(to_text(&CapsHashSet::new()), "=");
        assert_eq!(to_text(&caps::all()), "=p");
        let set = parse("cap_sys_admin,cap_chown+p").unwrap();
        assert_eq!(to_text(&set), "cap_chown,cap_sys_admin+p");
    }

    #[test]
    fn round_trip_through_text() {
        let set = parse("cap_net_admin,cap_net_raw+p").unwrap();
        assert_eq!(parse(&to_text(&set)).unwrap(), set);
    }
}
