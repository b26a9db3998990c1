//! User-supplied document filter and its SQL predicate form.
//!
//! Dates are day-granular (`YYYY-MM-DD`). Lower bounds are inclusive; a "to"
//! date becomes an exclusive bound on the following day so records stamped at
//! any time on the "to" day still match.

use std::sync::OnceLock;

use chrono::{Days, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::chat::core::errors::{ChatError, ChatResult};

const DATE_FMT: &str = "%Y-%m-%d";

/// Allowed values for one category column.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    /// Category column identifier.
    pub id: String,
    /// Allowed values (rendered as an IN-predicate).
    pub categories: Vec<String>,
}

/// Optional predicate over document metadata.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserFilter {
    /// Filename substring.
    #[serde(default)]
    pub file: Option<String>,
    /// Folder prefix.
    #[serde(default)]
    pub folder: Option<String>,
    /// Author substring.
    #[serde(default)]
    pub author: Option<String>,
    /// Category constraints.
    #[serde(default)]
    pub category_ids: Option<Vec<Category>>,
    /// Inclusive creation lower bound.
    #[serde(default)]
    pub created_from: Option<String>,
    /// Inclusive creation upper day.
    #[serde(default)]
    pub created_to: Option<String>,
    /// Inclusive update lower bound.
    #[serde(default)]
    pub updated_from: Option<String>,
    /// Inclusive update upper day.
    #[serde(default)]
    pub updated_to: Option<String>,
}

/// A WHERE clause with named parameters, ready for `rusqlite`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterPredicate {
    /// SQL boolean expression.
    pub where_sql: String,
    /// Named parameters (`:name`, value). `None` binds SQL NULL.
    pub params: Vec<(String, Option<String>)>,
}

impl FilterPredicate {
    /// Look up a bound parameter value.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .and_then(|(_, value)| value.as_deref())
    }
}

fn is_column_identifier(value: &str) -> ChatResult<bool> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = match PATTERN.get() {
        Some(pattern) => pattern,
        None => {
            let compiled = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,63}$")
                .map_err(|err| ChatError::InvalidFilter(err.to_string()))?;
            PATTERN.get_or_init(|| compiled)
        }
    };
    Ok(pattern.is_match(value))
}

/// Reject anything that cannot be spliced into SQL as a bare column name.
///
/// # Errors
/// Returns `InvalidFilter` when `id` is not a plain identifier.
pub fn check_column_identifier(id: &str) -> ChatResult<()> {
    if is_column_identifier(id)? {
        Ok(())
    } else {
        Err(ChatError::InvalidFilter(format!(
            "category id {id:?} is not a valid column name"
        )))
    }
}

fn non_blank(value: Option<&String>) -> Option<String> {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn parse_day(field: &str, value: &str) -> ChatResult<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FMT)
        .map_err(|err| ChatError::InvalidFilter(format!("{field}={value}: {err}")))
}

fn lower_bound(field: &str, value: Option<&String>) -> ChatResult<Option<String>> {
    non_blank(value)
        .map(|v| parse_day(field, &v).map(|day| day.format(DATE_FMT).to_string()))
        .transpose()
}

fn upper_bound(field: &str, value: Option<&String>) -> ChatResult<Option<String>> {
    non_blank(value)
        .map(|v| {
            let day = parse_day(field, &v)?;
            day.checked_add_days(Days::new(1))
                .map(|next| next.format(DATE_FMT).to_string())
                .ok_or_else(|| ChatError::InvalidFilter(format!("{field}={v}: out of range")))
        })
        .transpose()
}

impl UserFilter {
    /// Whether no constraint is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_predicate()
            .map(|predicate| {
                predicate.params.iter().all(|(_, value)| value.is_none())
                    && !predicate.where_sql.contains(" IN (")
            })
            .unwrap_or(false)
    }

    /// Render the filter as a predicate over the `files` table.
    ///
    /// # Errors
    /// Returns `InvalidFilter` for malformed dates or category identifiers.
    pub fn to_predicate(&self) -> ChatResult<FilterPredicate> {
        let mut where_sql = String::from(
            "1=1
            AND (:file IS NULL OR original_file_name LIKE '%' || :file || '%')
            AND (:author IS NULL OR author LIKE '%' || :author || '%')
            AND (:folder IS NULL OR folder LIKE :folder || '%')
            AND (:created_from IS NULL OR created_at >= :created_from)
            AND (:created_to IS NULL OR created_at < :created_to)
            AND (:updated_from IS NULL OR updated_at >= :updated_from)
            AND (:updated_to IS NULL OR updated_at < :updated_to)",
        );
        let mut params = vec![
            (":file".to_string(), non_blank(self.file.as_ref())),
            (":author".to_string(), non_blank(self.author.as_ref())),
            (":folder".to_string(), non_blank(self.folder.as_ref())),
            (
                ":created_from".to_string(),
                lower_bound("created_from", self.created_from.as_ref())?,
            ),
            (
                ":created_to".to_string(),
                upper_bound("created_to", self.created_to.as_ref())?,
            ),
            (
                ":updated_from".to_string(),
                lower_bound("updated_from", self.updated_from.as_ref())?,
            ),
            (
                ":updated_to".to_string(),
                upper_bound("updated_to", self.updated_to.as_ref())?,
            ),
        ];

        for (index, category) in self.category_ids.iter().flatten().enumerate() {
            if category.categories.is_empty() {
                continue;
            }
            check_column_identifier(&category.id)?;
            let mut placeholders = Vec::with_capacity(category.categories.len());
            for (value_index, value) in category.categories.iter().enumerate() {
                let name = format!(":cat_{index}_{value_index}");
                placeholders.push(name.clone());
                params.push((name, Some(value.clone())));
            }
            where_sql.push_str(&format!(
                "\n            AND {} IN ({})",
                category.id,
                placeholders.join(", ")
            ));
        }

        Ok(FilterPredicate { where_sql, params })
    }
}
