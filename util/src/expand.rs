use std::path::PathBuf;

/// Expand a leading `~` and any `$VAR`/`${VAR}` references in `path`.
/// Variables that are not set are left verbatim, so that e.g. `$TMPDIR`
/// can still be resolved later by a batch scheduler.
pub fn expand_path(path: &str) -> PathBuf {
    let path = expand_vars(path);
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Expand `$VAR` and `${VAR}` using the process environment.
pub fn expand_vars(text: &str) -> String {
    expand_vars_with(text, |name| std::env::var(name).ok())
}

/// Expand `$VAR` and `${VAR}` using `lookup`; unresolved references are kept as written.
pub fn expand_vars_with<F>(text: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => ("", 0),
            }
        } else {
            let end = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            (&after[..end], end)
        };

        if name.is_empty() {
            out.push('$');
            rest = after;
            continue;
        }

        match lookup(name) {
            Some(value) => out.push_str(&value),
            None => out.push_str(&rest[pos..pos + 1 + consumed]),
        }
        rest = &after[consumed..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "HOME" => Some("/home/sim".to_owned()),
            "RUN" => Some("abc".to_owned()),
            _ => None,
        }
    }

    #[test]
    fn test_expand_known_vars() {
        assert_eq!(expand_vars_with("$HOME/.simexec", lookup), "/home/sim/.simexec");
        assert_eq!(expand_vars_with("${RUN}.tar.gz", lookup), "abc.tar.gz");
    }

    #[test]
    fn test_unknown_vars_left_verbatim() {
        assert_eq!(expand_vars_with("$TMPDIR/run", lookup), "$TMPDIR/run");
        assert_eq!(expand_vars_with("${SCRATCH}/x", lookup), "${SCRATCH}/x");
        assert_eq!(expand_vars_with("cost: $5 and $", lookup), "cost: $5 and $");
    }

    #[test]
    fn test_unterminated_brace() {
        assert_eq!(expand_vars_with("${RUN", lookup), "${RUN");
    }
}
