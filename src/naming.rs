//! Identifier conventions shared by the model normalizer, the plan compiler
//! and the relational query builder.

/// Default table name for a model: lowercase plural of the model name.
pub fn default_table_name(model: &str) -> String {
    format!("{}s", model.to_lowercase())
}

/// Naive singular form used for foreign-key and pivot-table derivation.
/// Table names default to `lowercase(name) + "s"`, so stripping one trailing
/// `s` inverts that convention.
pub fn singularize(table: &str) -> String {
    match table.strip_suffix('s') {
        Some(stripped) if !stripped.is_empty() => stripped.to_string(),
        _ => table.to_string(),
    }
}

/// Default foreign-key column pointing at `table`: `{singular}_id`.
pub fn foreign_key_for(table: &str) -> String {
    format!("{}_id", singularize(table))
}

/// Default pivot table for a many-to-many relation between two models:
/// the lowercased singular model names joined with `_` in alphabetical order.
pub fn pivot_table_name(model_a: &str, model_b: &str) -> String {
    let a = singularize(&model_a.to_lowercase());
    let b = singularize(&model_b.to_lowercase());
    if a <= b {
        format!("{a}_{b}")
    } else {
        format!("{b}_{a}")
    }
}

/// Convert a snake_case column to the PascalCase suffix of its dynamic
/// predicate name: `user_id` -> `UserId`. Already-camelCase input keeps its
/// interior capitalization and only the first letter is raised.
pub fn pascal_case(column: &str) -> String {
    let mut out = String::with_capacity(column.len());
    let mut upper_next = true;
    for ch in column.chars() {
        if ch == '_' {
            upper_next = true;
        } else if upper_next {
            out.extend(ch.to_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}

/// Convert a PascalCase or camelCase predicate suffix back to the snake_case
/// column it addresses: `UserId` -> `user_id`.
pub fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}
