//! SQL text helpers shared by the renderers.

/// Placeholder for the main table alias inside cached SQL templates.
///
/// Templates are rendered once against this sentinel and specialised per
/// call by textual substitution, see [`substitute_main_alias`].
pub const MAIN_ALIAS: &str = "$MAIN_ALIAS";

/// Replace every main-alias placeholder in `template` with `alias`.
pub fn substitute_main_alias(template: &str, alias: &str) -> String {
    template.replace(MAIN_ALIAS, alias)
}

/// Quote a SQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Whether `expr` is a bare column name that can be qualified with `alias.`.
pub fn is_plain_identifier(expr: &str) -> bool {
    let mut chars = expr.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Qualify a column expression with a table alias.
///
/// A bare identifier becomes `alias.column`; anything else is an expression
/// that names its table through the [`MAIN_ALIAS`] placeholder.
pub fn qualify(expr: &str, alias: &str) -> String {
    if is_plain_identifier(expr) {
        format!("{alias}.{expr}")
    } else {
        substitute_main_alias(expr, alias)
    }
}

/// Evaluate a SQL `LIKE` pattern (`%` any run, `_` one character) against
/// `value`. Matching is case-sensitive and has no escape character.
pub fn like_match(value: &str, pattern: &str) -> bool {
    let v: Vec<char> = value.chars().collect();
    let p: Vec<char> = pattern.chars().collect();

    // Greedy two-pointer match with backtracking to the last '%'.
    let (mut vi, mut pi) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;
    while vi < v.len() {
        if pi < p.len() && (p[pi] == '_' || p[pi] == v[vi]) {
            vi += 1;
            pi += 1;
        } else if pi < p.len() && p[pi] == '%' {
            star = Some((pi, vi));
            pi += 1;
        } else if let Some((sp, sv)) = star {
            pi = sp + 1;
            vi = sv + 1;
            star = Some((sp, sv + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|c| *c == '%')
}
