//! Redirect and rewrite rules
//!
//! Config lines come in two shapes: `<status>:<from>:<to>` declares a
//! redirect (status must be 301, 302, 307, or 308) and `<from>:<to>`
//! declares an internal rewrite. Patterns may carry a single `*` wildcard
//! whose capture substitutes into the target. The target is everything
//! after the last expected separator, taken verbatim, so a redirect may
//! point at an absolute URL like `https://example.com/new`. Rewrites
//! restart routing exactly once.

use http::StatusCode;

use crate::error::{Result, ServerError};

/// Statuses a redirect rule may use.
const REDIRECT_STATUSES: &[u16] = &[301, 302, 307, 308];

/// A `from` pattern: literal, or prefix/suffix around one `*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    prefix: String,
    suffix: String,
    wildcard: bool,
}

impl Pattern {
    fn parse(raw: &str) -> Result<Self> {
        let mut parts = raw.split('*');
        let prefix = parts.next().unwrap_or("").to_string();
        match parts.next() {
            None => Ok(Self { prefix, suffix: String::new(), wildcard: false }),
            Some(suffix) => {
                if parts.next().is_some() {
                    return Err(ServerError::Config(format!(
                        "pattern may contain at most one '*': {raw}"
                    )));
                }
                Ok(Self { prefix, suffix: suffix.to_string(), wildcard: true })
            }
        }
    }

    /// Matches `path`, returning the wildcard capture (empty for literal
    /// patterns).
    fn matches<'a>(&self, path: &'a str) -> Option<&'a str> {
        if self.wildcard {
            let rest = path.strip_prefix(self.prefix.as_str())?;
            let capture = rest.strip_suffix(self.suffix.as_str())?;
            Some(capture)
        } else if path == self.prefix {
            Some("")
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    Redirect { status: StatusCode, from: Pattern, to: String },
    Rewrite { from: Pattern, to: String },
}

/// What the rule engine decided for a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleAction {
    Redirect { status: StatusCode, location: String },
    Rewrite { path: String },
}

/// Parses one config line. Only the first colon (and, for redirects, the
/// second) separates fields; the remainder is the target, colons and all.
pub fn parse_rule(line: &str) -> Result<Rule> {
    let Some((first, rest)) = line.split_once(':') else {
        return Err(ServerError::Config(format!(
            "rule must be <status>:<from>:<to> or <from>:<to>: {line}"
        )));
    };

    // A numeric first field declares a redirect.
    if let Ok(code) = first.trim().parse::<u16>() {
        if !REDIRECT_STATUSES.contains(&code) {
            return Err(ServerError::Config(format!(
                "redirect status must be one of 301, 302, 307, 308: {line}"
            )));
        }
        let Some((from, to)) = rest.split_once(':') else {
            return Err(ServerError::Config(format!(
                "redirect rule must be <status>:<from>:<to>: {line}"
            )));
        };
        return Ok(Rule::Redirect {
            status: StatusCode::from_u16(code)
                .map_err(|_| ServerError::Config(format!("invalid status: {line}")))?,
            from: Pattern::parse(from)?,
            to: to.to_string(),
        });
    }

    Ok(Rule::Rewrite {
        from: Pattern::parse(first)?,
        to: rest.to_string(),
    })
}

/// Ordered rule list; first match wins.
#[derive(Debug, Default)]
pub struct RoutingRules {
    rules: Vec<Rule>,
}

impl RoutingRules {
    /// Parses every line, failing on the first malformed rule.
    pub fn parse(lines: &[String]) -> Result<Self> {
        let rules = lines
            .iter()
            .map(|line| parse_rule(line))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// First matching rule's action for the path, if any.
    #[must_use]
    pub fn apply(&self, path: &str) -> Option<RuleAction> {
        for rule in &self.rules {
            match rule {
                Rule::Redirect { status, from, to } => {
                    if let Some(capture) = from.matches(path) {
                        return Some(RuleAction::Redirect {
                            status: *status,
                            location: substitute(to, capture),
                        });
                    }
                }
                Rule::Rewrite { from, to } => {
                    if let Some(capture) = from.matches(path) {
                        return Some(RuleAction::Rewrite { path: substitute(to, capture) });
                    }
                }
            }
        }
        None
    }
}

fn substitute(target: &str, capture: &str) -> String {
    if target.contains('*') {
        target.replacen('*', capture, 1)
    } else {
        target.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_redirect_and_rewrite() {
        let redirect = parse_rule("301:/old:/new").unwrap();
        assert!(matches!(redirect, Rule::Redirect { status, .. } if status == StatusCode::MOVED_PERMANENTLY));

        let rewrite = parse_rule("/legacy/*:/current/*").unwrap();
        assert!(matches!(rewrite, Rule::Rewrite { .. }));
    }

    #[test]
    fn rejects_bad_status_and_shape() {
        assert!(parse_rule("418:/a:/b").is_err());
        assert!(parse_rule("999:/a:/b").is_err());
        assert!(parse_rule("/only-one-field").is_err());
        assert!(parse_rule("301:/missing-target").is_err());
        assert!(parse_rule("/a*b*c:/d").is_err());
    }

    #[test]
    fn redirect_target_may_contain_colons() {
        let rules =
            RoutingRules::parse(&["301:/old/*:https://example.com/new/*".to_string()]).unwrap();
        assert_eq!(
            rules.apply("/old/page.html"),
            Some(RuleAction::Redirect {
                status: StatusCode::MOVED_PERMANENTLY,
                location: "https://example.com/new/page.html".to_string(),
            })
        );
    }

    #[test]
    fn rewrite_target_is_taken_verbatim() {
        let rules = RoutingRules::parse(&["/docs:/manual:v2".to_string()]).unwrap();
        assert_eq!(
            rules.apply("/docs"),
            Some(RuleAction::Rewrite { path: "/manual:v2".to_string() })
        );
    }

    #[test]
    fn wildcard_capture_substitutes() {
        let rules = RoutingRules::parse(&[
            "302:/docs/*:/manual/*".to_string(),
            "/blog/*:/articles/*".to_string(),
        ])
        .unwrap();

        assert_eq!(
            rules.apply("/docs/intro.html"),
            Some(RuleAction::Redirect {
                status: StatusCode::FOUND,
                location: "/manual/intro.html".to_string(),
            })
        );
        assert_eq!(
            rules.apply("/blog/2024/post"),
            Some(RuleAction::Rewrite { path: "/articles/2024/post".to_string() })
        );
        assert_eq!(rules.apply("/other"), None);
    }

    #[test]
    fn literal_rule_matches_exactly() {
        let rules = RoutingRules::parse(&["/home:/index.html".to_string()]).unwrap();
        assert_eq!(
            rules.apply("/home"),
            Some(RuleAction::Rewrite { path: "/index.html".to_string() })
        );
        assert_eq!(rules.apply("/home/extra"), None);
    }

    #[test]
    fn first_match_wins() {
        let rules = RoutingRules::parse(&[
            "/a/*:/first/*".to_string(),
            "/a/b:/second".to_string(),
        ])
        .unwrap();
        assert_eq!(
            rules.apply("/a/b"),
            Some(RuleAction::Rewrite { path: "/first/b".to_string() })
        );
    }
}
