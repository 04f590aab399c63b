//! Usage analysis: which defined variables never appear in experiment content.

use std::collections::HashSet;

use crate::config::VariableDefinition;
use crate::template::extract_variable_references;

/// Names from `definitions` that no `{{...}}` reference in `content` uses.
///
/// A definition counts as used when a reference's base name is the
/// definition name itself or an expanded `name_N`. Matching is textual, so a
/// reference inside an unrelated string still counts.
pub fn find_unused_variables(content: &str, definitions: &[VariableDefinition]) -> Vec<String> {
    let referenced: HashSet<String> = extract_variable_references(content)
        .into_iter()
        .filter_map(|path| path.split('.').next().map(str::to_string))
        .collect();

    definitions
        .iter()
        .map(|d| d.name.as_str())
        .filter(|name| !is_referenced(name, &referenced))
        .map(str::to_string)
        .collect()
}

fn is_referenced(name: &str, referenced: &HashSet<String>) -> bool {
    referenced.contains(name)
        || referenced.iter().any(|r| {
            r.strip_prefix(name)
                .and_then(|rest| rest.strip_prefix('_'))
                .is_some_and(|idx| !idx.is_empty() && idx.bytes().all(|b| b.is_ascii_digit()))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;

    fn defs(names: &[&str]) -> Vec<VariableDefinition> {
        names
            .iter()
            .map(|n| VariableDefinition::new(*n, Schema::String))
            .collect()
    }

    #[test]
    fn reports_unreferenced_names() {
        let content = r#"{"stages":[{"prompt":"Discuss {{topic}} with {{partner.name}}"}]}"#;
        let unused = find_unused_variables(content, &defs(&["topic", "partner", "arm"]));
        assert_eq!(unused, vec!["arm"]);
    }

    #[test]
    fn expanded_names_count_as_usage() {
        let content = "First {{item_1}}, then {{ item_2 }}";
        assert!(find_unused_variables(content, &defs(&["item"])).is_empty());
    }

    #[test]
    fn prefix_alone_is_not_usage() {
        let content = "{{item_count}} {{items}}";
        assert_eq!(find_unused_variables(content, &defs(&["item"])), vec!["item"]);
    }

    #[test]
    fn sections_count_as_usage() {
        let content = "{{#show_hint}}Hint{{/show_hint}}";
        assert!(find_unused_variables(content, &defs(&["show_hint"])).is_empty());
    }

    #[test]
    fn empty_content_reports_everything() {
        assert_eq!(find_unused_variables("", &defs(&["a", "b"])), vec!["a", "b"]);
    }
}
