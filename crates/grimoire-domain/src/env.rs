/// Expands `${NAME}` placeholders in `s` against the process environment,
/// falling back to the secondary `.env`-like credential store
/// ([`crate::credential_store`]) when the process environment doesn't have
/// `NAME`.
///
/// `NAME` must match `[A-Za-z_][A-Za-z0-9_]*`; lookups are case-sensitive
/// against the real environment but the placeholder name itself may be
/// written in any case matching that pattern. A name found in neither
/// source expands to the empty string and is logged. Expansion is
/// non-recursive: only the innermost `${...}` of a malformed nested pattern
/// like `${OUTER${INNER}}` is substituted, leaving the rest of the text
/// verbatim. This mirrors the downstream config's documented behavior and
/// is not a bug to fix here.
pub fn expand_env_var(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = String::with_capacity(s.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' && i + 1 < bytes.len() && bytes[i + 1] == b'{' {
            if let Some(end) = s[i + 2..].find('}') {
                let name = &s[i + 2..i + 2 + end];
                if is_valid_var_name(name) {
                    let resolved = std::env::var(name).ok().or_else(|| crate::credential_store::lookup_default(name));
                    match resolved {
                        Some(value) => out.push_str(&value),
                        None => {
                            tracing::warn!(
                                var = name,
                                "environment variable not set and no matching credential, expanding to empty string"
                            );
                        }
                    }
                    i += 2 + end + 1;
                    continue;
                }
            }
        }
        // `bytes[i]` only ever reaches here as the lead byte of a char:
        // the `$` check above never matches a UTF-8 continuation byte
        // (those are all >= 0x80), so `i` is always on a char boundary.
        let ch = s[i..].chars().next().expect("i is a valid char boundary");
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

fn is_valid_var_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
