//! Alias reference substitution.
//!
//! User fragments (where clauses, order terms, computed fields, join
//! condition overrides) refer to row-spaces through the `{alias}` token
//! language. Substitution rewrites each token to the quoted fully-qualified
//! alias. Tokens inside single-quoted literals are inert. The rewrite is
//! idempotent: its output contains no tokens.
//!
//! Resolution, in scope order:
//! - `{this}` resolves to the alias owning the fragment;
//! - `{linktable}` resolves to the junction alias of the owning link edge;
//! - any other `{x}` resolves to `owner.x` in a non-root scope and to `x`
//!   verbatim in the root scope; dotted paths (`{a.b}`) are absolute and
//!   resolve verbatim everywhere.
//!
//! Bare identifiers outside braces are passed through untouched; only
//! bracketed references are validated against the plan's alias set.

use std::collections::HashSet;

use crate::sql::dialect::Dialect;
use crate::sql::errors::SqlError;

/// The scope a fragment belongs to.
#[derive(Debug, Clone, Copy)]
pub struct AliasScope<'a> {
    /// Alias owning the fragment; the root alias for query-level fragments.
    pub owner: &'a str,
    /// The plan's root alias.
    pub root: &'a str,
    /// Junction alias, present only for fragments attached to a link edge.
    pub link_table: Option<&'a str>,
}

impl<'a> AliasScope<'a> {
    pub fn root_scope(root: &'a str) -> Self {
        AliasScope {
            owner: root,
            root,
            link_table: None,
        }
    }

    pub fn is_root(&self) -> bool {
        self.owner == self.root
    }
}

/// Rewrite every `{alias}` token in `fragment` to a quoted alias reference.
pub fn substitute_aliases(
    fragment: &str,
    scope: &AliasScope,
    known_aliases: &HashSet<String>,
    dialect: Dialect,
) -> Result<String, SqlError> {
    let chars: Vec<char> = fragment.chars().collect();
    let mut out = String::with_capacity(fragment.len());
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '\'' => {
                out.push('\'');
                i += 1;
                loop {
                    if i >= chars.len() {
                        return Err(SqlError::UnterminatedLiteral {
                            fragment: fragment.to_string(),
                        });
                    }
                    out.push(chars[i]);
                    if chars[i] == '\'' {
                        if i + 1 < chars.len() && chars[i + 1] == '\'' {
                            out.push(chars[i + 1]);
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    i += 1;
                }
            }
            '{' => {
                let close = chars[i + 1..]
                    .iter()
                    .position(|&c| c == '}')
                    .map(|p| i + 1 + p)
                    .ok_or_else(|| SqlError::UnterminatedAliasReference {
                        fragment: fragment.to_string(),
                    })?;
                let token: String = chars[i + 1..close].iter().collect();
                if token.is_empty() {
                    out.push_str("{}");
                } else {
                    let resolved = resolve(&token, scope, fragment)?;
                    if !known_aliases.contains(&resolved) {
                        return Err(SqlError::UnknownAlias {
                            alias: resolved,
                            fragment: fragment.to_string(),
                        });
                    }
                    out.push_str(&dialect.quote_one(&resolved));
                }
                i = close;
            }
            c => out.push(c),
        }
        i += 1;
    }
    Ok(out)
}

fn resolve(token: &str, scope: &AliasScope, fragment: &str) -> Result<String, SqlError> {
    if token == "this" {
        return Ok(scope.owner.to_string());
    }
    if token == "linktable" {
        return scope
            .link_table
            .map(|l| l.to_string())
            .ok_or_else(|| SqlError::NoLinkTableScope {
                fragment: fragment.to_string(),
            });
    }
    if scope.is_root() || token.contains('.') {
        Ok(token.to_string())
    } else {
        Ok(format!("{}.{}", scope.owner, token))
    }
}

/// The alias paths a fragment references, resolved through `scope` but not
/// validated. Used by the streaming driver to enforce its ordering contract
/// before execution.
pub fn referenced_aliases(fragment: &str, scope: &AliasScope) -> Result<Vec<String>, SqlError> {
    let chars: Vec<char> = fragment.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '\'' => {
                i += 1;
                while i < chars.len() && chars[i] != '\'' {
                    i += 1;
                }
            }
            '{' => {
                if let Some(p) = chars[i + 1..].iter().position(|&c| c == '}') {
                    let close = i + 1 + p;
                    let token: String = chars[i + 1..close].iter().collect();
                    if !token.is_empty() {
                        out.push(resolve(&token, scope, fragment)?);
                    }
                    i = close;
                }
            }
            _ => {}
        }
        i += 1;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aliases(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn root_scope_resolves_verbatim() {
        let known = aliases(&["article", "comments", "comments.author"]);
        let scope = AliasScope::root_scope("article");
        let out =
            substitute_aliases("{article}.id = ? AND {comments.author}.id > 1", &scope, &known, Dialect::MySql)
                .unwrap();
        assert_eq!(out, "`article`.id = ? AND `comments.author`.id > 1");
    }

    #[test]
    fn nested_scope_prefixes_owner() {
        let known = aliases(&["article", "comments", "comments.author"]);
        let scope = AliasScope {
            owner: "comments",
            root: "article",
            link_table: None,
        };
        let out = substitute_aliases("{author}.id IS NOT NULL", &scope, &known, Dialect::Postgres).unwrap();
        assert_eq!(out, "\"comments.author\".id IS NOT NULL");
    }

    #[test]
    fn this_resolves_to_owner() {
        let known = aliases(&["article", "comments"]);
        let scope = AliasScope {
            owner: "comments",
            root: "article",
            link_table: None,
        };
        let out = substitute_aliases("{this}.id = {article}.id", &scope, &known, Dialect::Hsqldb).unwrap();
        assert_eq!(out, "comments.id = article.id");
    }

    #[test]
    fn linktable_outside_link_scope_errors() {
        let known = aliases(&["user"]);
        let scope = AliasScope::root_scope("user");
        assert!(matches!(
            substitute_aliases("{linktable}.element", &scope, &known, Dialect::MySql),
            Err(SqlError::NoLinkTableScope { .. })
        ));
    }

    #[test]
    fn unknown_alias_is_rejected() {
        let known = aliases(&["article"]);
        let scope = AliasScope::root_scope("article");
        assert!(matches!(
            substitute_aliases("{nope}.id = 1", &scope, &known, Dialect::MySql),
            Err(SqlError::UnknownAlias { .. })
        ));
    }

    #[test]
    fn tokens_in_literals_are_inert() {
        let known = aliases(&["article"]);
        let scope = AliasScope::root_scope("article");
        let out =
            substitute_aliases("note = '{article} is not a ref'", &scope, &known, Dialect::MySql).unwrap();
        assert_eq!(out, "note = '{article} is not a ref'");
    }

    #[test]
    fn substitution_is_idempotent() {
        let known = aliases(&["article", "comments"]);
        let scope = AliasScope::root_scope("article");
        let once =
            substitute_aliases("{comments}.id = ?", &scope, &known, Dialect::MySql).unwrap();
        let twice = substitute_aliases(&once, &scope, &known, Dialect::MySql).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn unterminated_reference_is_fatal() {
        let known = aliases(&["article"]);
        let scope = AliasScope::root_scope("article");
        assert!(matches!(
            substitute_aliases("{article.id = 1", &scope, &known, Dialect::MySql),
            Err(SqlError::UnterminatedAliasReference { .. })
        ));
    }
}
