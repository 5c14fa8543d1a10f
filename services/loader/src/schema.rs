//! Column declarations and the structural (header) check.

use crate::error::LoadError;

/// A column an entity file may carry. Names are matched against
/// normalized (lower-cased, trimmed) headers.
#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub required: bool,
}

impl Column {
    pub const fn required(name: &'static str) -> Self {
        Column {
            name,
            aliases: &[],
            required: true,
        }
    }

    pub const fn optional(name: &'static str) -> Self {
        Column {
            name,
            aliases: &[],
            required: false,
        }
    }

    pub const fn aka(self, aliases: &'static [&'static str]) -> Self {
        Column { aliases, ..self }
    }

    fn matches(&self, header: &str) -> bool {
        header == self.name || self.aliases.contains(&header)
    }
}

/// Names of required columns absent from `headers`, in declaration order.
pub fn missing_columns(headers: &[String], columns: &[Column]) -> Vec<String> {
    columns
        .iter()
        .filter(|column| column.required)
        .filter(|column| !headers.iter().any(|h| column.matches(h)))
        .map(|column| column.name.to_string())
        .collect()
}

/// Names of columns matched by more than one header, e.g. both `gender`
/// and `gender (m/f)`.
pub fn duplicate_columns(headers: &[String], columns: &[Column]) -> Vec<String> {
    columns
        .iter()
        .filter(|column| headers.iter().filter(|h| column.matches(h)).count() > 1)
        .map(|column| column.name.to_string())
        .collect()
}

/// Structural gate: one error naming every missing (or else every
/// repeated) column, or nothing.
pub fn check_columns(headers: &[String], columns: &[Column]) -> Result<(), LoadError> {
    let missing = missing_columns(headers, columns);
    if !missing.is_empty() {
        return Err(LoadError::MissingColumns { columns: missing });
    }
    let repeated = duplicate_columns(headers, columns);
    if !repeated.is_empty() {
        return Err(LoadError::DuplicateColumns { columns: repeated });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLUMNS: &[Column] = &[
        Column::required("student_id"),
        Column::required("gender").aka(&["gender (m/f)"]),
        Column::optional("city"),
    ];

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_all_present() {
        assert!(missing_columns(&headers(&["student_id", "gender"]), COLUMNS).is_empty());
    }

    #[test]
    fn test_alias_satisfies_column() {
        assert!(missing_columns(&headers(&["gender (m/f)", "student_id"]), COLUMNS).is_empty());
    }

    #[test]
    fn test_optional_never_missing() {
        let missing = missing_columns(&headers(&["student_id"]), COLUMNS);
        assert_eq!(missing, vec!["gender"]);
    }

    #[test]
    fn test_alias_and_canonical_together() {
        let both = headers(&["student_id", "gender", "gender (m/f)", "city", "city"]);
        assert_eq!(duplicate_columns(&both, COLUMNS), vec!["gender", "city"]);
        let err = check_columns(&both, COLUMNS).unwrap_err();
        assert_eq!(err.to_string(), "Columns given more than once: gender, city");
    }

    #[test]
    fn test_missing_reported_before_repeated() {
        let err = check_columns(&headers(&["gender", "gender"]), COLUMNS).unwrap_err();
        assert_eq!(err.to_string(), "Missing required columns: student_id");
    }

    #[test]
    fn test_check_columns_names_all_missing() {
        let err = check_columns(&headers(&["name"]), COLUMNS).unwrap_err();
        assert_eq!(err.to_string(), "Missing required columns: student_id, gender");
    }
}
