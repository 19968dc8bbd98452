//! Schema lint rules.
//!
//! Each rule is enabled per namespace with its own severity. Rules run over
//! the normalized proposed subgraph schema; issues are sorted by position.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};

use crate::normalize::{has_directive, Directive, NormalizedSchema, Position, TypeDef, TypeKind};
use crate::types::Severity;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    AsRefStr,
    EnumString,
    EnumIter,
    Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum LintRule {
    FieldNamesShouldBeCamelCase,
    TypeNamesShouldBePascalCase,
    ShouldNotHaveTypePrefix,
    ShouldNotHaveTypeSuffix,
    ShouldNotHaveInputPrefix,
    ShouldHaveInputSuffix,
    ShouldNotHaveEnumPrefix,
    ShouldNotHaveEnumSuffix,
    ShouldNotHaveInterfacePrefix,
    ShouldNotHaveInterfaceSuffix,
    EnumValuesShouldBeUpperCase,
    OrderFields,
    OrderEnumValues,
    OrderDefinitions,
    AllTypesRequireDescription,
    RequireDeprecationReason,
    NoTypenamePrefixInTypeFields,
    DisallowCaseInsensitiveEnumValues,
}

impl LintRule {
    pub fn all() -> Vec<LintRule> {
        Self::iter().collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LintRuleConfig {
    pub rule: LintRule,
    pub severity: Severity,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LintLocation {
    pub line: usize,
    pub column: usize,
    pub end_line: Option<usize>,
    pub end_column: Option<usize>,
}

impl LintLocation {
    fn spanning(pos: Position, name: &str) -> Self {
        Self {
            line: pos.line,
            column: pos.column,
            end_line: Some(pos.line),
            end_column: Some(pos.column + name.len()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LintIssue {
    pub rule: LintRule,
    pub severity: Severity,
    pub message: String,
    pub location: LintLocation,
}

impl LintIssue {
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Run the configured rules. Later duplicates of a rule override earlier ones.
pub fn lint_schema(schema: &NormalizedSchema, rules: &[LintRuleConfig]) -> Vec<LintIssue> {
    let mut configured: Vec<LintRuleConfig> = Vec::new();
    for cfg in rules {
        configured.retain(|c| c.rule != cfg.rule);
        configured.push(*cfg);
    }

    let mut linter = Linter {
        issues: Vec::new(),
        severity: Severity::Warn,
        rule: LintRule::OrderFields,
    };
    for cfg in &configured {
        linter.rule = cfg.rule;
        linter.severity = cfg.severity;
        linter.run(schema);
    }

    let mut issues = linter.issues;
    issues.sort_by(|a, b| {
        (a.location.line, a.location.column, a.rule).cmp(&(
            b.location.line,
            b.location.column,
            b.rule,
        ))
    });
    issues
}

/// True when any issue is error-severity.
pub fn has_blocking_issues(issues: &[LintIssue]) -> bool {
    issues.iter().any(LintIssue::is_error)
}

struct Linter {
    issues: Vec<LintIssue>,
    severity: Severity,
    rule: LintRule,
}

impl Linter {
    fn report(&mut self, pos: Position, name: &str, message: String) {
        self.issues.push(LintIssue {
            rule: self.rule,
            severity: self.severity,
            message,
            location: LintLocation::spanning(pos, name),
        });
    }

    fn run(&mut self, schema: &NormalizedSchema) {
        use LintRule::*;

        if self.rule == OrderDefinitions {
            self.order_definitions(schema);
            return;
        }

        for ty in schema.types.values() {
            match self.rule {
                FieldNamesShouldBeCamelCase => self.field_names(ty),
                TypeNamesShouldBePascalCase if ty.kind == TypeKind::Object => {
                    if !is_pascal_case(&ty.name) {
                        self.report(
                            ty.pos,
                            &ty.name,
                            format!("Type \"{}\" should be in PascalCase format", ty.name),
                        );
                    }
                }
                ShouldNotHaveTypePrefix if ty.kind == TypeKind::Object => {
                    self.forbidden_prefix(ty, "Type", &["Type", "type"])
                }
                ShouldNotHaveTypeSuffix if ty.kind == TypeKind::Object => {
                    self.forbidden_suffix(ty, "Type", &["Type", "type"])
                }
                ShouldNotHaveInputPrefix if ty.kind == TypeKind::InputObject => {
                    self.forbidden_prefix(ty, "Input type", &["Input", "input"])
                }
                ShouldHaveInputSuffix if ty.kind == TypeKind::InputObject => {
                    if !ty.name.ends_with("Input") {
                        self.report(
                            ty.pos,
                            &ty.name,
                            format!(
                                "Input type \"{}\" should have one of the following suffixes: Input",
                                ty.name
                            ),
                        );
                    }
                }
                ShouldNotHaveEnumPrefix if ty.kind == TypeKind::Enum => {
                    self.forbidden_prefix(ty, "Enumerator", &["Enum", "enum"])
                }
                ShouldNotHaveEnumSuffix if ty.kind == TypeKind::Enum => {
                    self.forbidden_suffix(ty, "Enumerator", &["Enum", "enum"])
                }
                ShouldNotHaveInterfacePrefix if ty.kind == TypeKind::Interface => {
                    self.forbidden_prefix(ty, "Interface", &["Interface", "interface"])
                }
                ShouldNotHaveInterfaceSuffix if ty.kind == TypeKind::Interface => {
                    self.forbidden_suffix(ty, "Interface", &["Interface", "interface"])
                }
                EnumValuesShouldBeUpperCase => {
                    for v in &ty.enum_values {
                        if !is_upper_case(&v.name) {
                            self.report(
                                v.pos,
                                &v.name,
                                format!(
                                    "Enumeration value \"{}\" should be in UPPER_CASE format",
                                    v.name
                                ),
                            );
                        }
                    }
                }
                OrderFields => self.order_fields(ty),
                OrderEnumValues => {
                    for pair in ty.enum_values.windows(2) {
                        if pair[0].name > pair[1].name {
                            self.report(
                                pair[1].pos,
                                &pair[1].name,
                                format!(
                                    "enum value \"{}\" should be before enum value \"{}\"",
                                    pair[1].name, pair[0].name
                                ),
                            );
                        }
                    }
                }
                AllTypesRequireDescription => {
                    if ty.description.as_deref().map_or(true, |d| d.trim().is_empty()) {
                        self.report(
                            ty.pos,
                            &ty.name,
                            format!("Description is required for type \"{}\"", ty.name),
                        );
                    }
                }
                RequireDeprecationReason => self.deprecation_reasons(ty),
                NoTypenamePrefixInTypeFields
                    if matches!(ty.kind, TypeKind::Object | TypeKind::Interface) =>
                {
                    let prefix = ty.name.to_lowercase();
                    for f in &ty.fields {
                        if f.name.to_lowercase().starts_with(&prefix) {
                            self.report(
                                f.pos,
                                &f.name,
                                format!(
                                    "Field \"{}\" starts with the name of the parent type \"{}\"",
                                    f.name, ty.name
                                ),
                            );
                        }
                    }
                }
                DisallowCaseInsensitiveEnumValues => {
                    let mut seen: Vec<String> = Vec::new();
                    for v in &ty.enum_values {
                        let folded = v.name.to_lowercase();
                        if seen.contains(&folded) {
                            self.report(
                                v.pos,
                                &v.name,
                                format!(
                                    "Unexpected case-insensitive enum values duplicates for enum value \"{}\" in enum \"{}\"",
                                    v.name, ty.name
                                ),
                            );
                        } else {
                            seen.push(folded);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn field_names(&mut self, ty: &TypeDef) {
        if !matches!(ty.kind, TypeKind::Object | TypeKind::Interface) {
            return;
        }
        for f in &ty.fields {
            if !is_camel_case(&f.name) {
                self.report(
                    f.pos,
                    &f.name,
                    format!("Field \"{}\" should be in camelCase format", f.name),
                );
            }
        }
    }

    fn forbidden_prefix(&mut self, ty: &TypeDef, label: &str, prefixes: &[&str]) {
        if let Some(p) = prefixes.iter().find(|p| ty.name.starts_with(**p)) {
            self.report(
                ty.pos,
                &ty.name,
                format!("{label} \"{}\" should not have \"{p}\" prefix", ty.name),
            );
        }
    }

    fn forbidden_suffix(&mut self, ty: &TypeDef, label: &str, suffixes: &[&str]) {
        if let Some(s) = suffixes.iter().find(|s| ty.name.ends_with(**s)) {
            self.report(
                ty.pos,
                &ty.name,
                format!("{label} \"{}\" should not have \"{s}\" suffix", ty.name),
            );
        }
    }

    fn order_fields(&mut self, ty: &TypeDef) {
        let named: Vec<(&str, Position)> = if ty.kind == TypeKind::InputObject {
            ty.input_fields.iter().map(|f| (f.name.as_str(), f.pos)).collect()
        } else {
            ty.fields.iter().map(|f| (f.name.as_str(), f.pos)).collect()
        };
        for pair in named.windows(2) {
            let ((prev, _), (cur, pos)) = (pair[0], pair[1]);
            if prev > cur {
                self.report(
                    pos,
                    cur,
                    format!("field \"{cur}\" should be before field \"{prev}\""),
                );
            }
        }
    }

    fn order_definitions(&mut self, schema: &NormalizedSchema) {
        let mut by_position: Vec<&TypeDef> = schema.types.values().collect();
        by_position.sort_by_key(|t| (t.pos.line, t.pos.column));
        for pair in by_position.windows(2) {
            if pair[0].name > pair[1].name {
                self.report(
                    pair[1].pos,
                    &pair[1].name,
                    format!(
                        "type \"{}\" should be before type \"{}\"",
                        pair[1].name, pair[0].name
                    ),
                );
            }
        }
    }

    fn deprecation_reasons(&mut self, ty: &TypeDef) {
        for f in &ty.fields {
            if missing_reason(&f.directives) {
                self.report(
                    f.pos,
                    &f.name,
                    format!(
                        "Deprecation reason is required for field \"{}\" in type \"{}\".",
                        f.name, ty.name
                    ),
                );
            }
        }
        for v in &ty.enum_values {
            if missing_reason(&v.directives) {
                self.report(
                    v.pos,
                    &v.name,
                    format!(
                        "Deprecation reason is required for enum value \"{}\" in enum \"{}\".",
                        v.name, ty.name
                    ),
                );
            }
        }
    }
}

fn missing_reason(directives: &[Directive]) -> bool {
    has_directive(directives, "deprecated")
        && directives
            .iter()
            .filter(|d| d.name == "deprecated")
            .all(|d| d.string_arg("reason").map_or(true, |r| r.trim().is_empty()))
}

fn is_camel_case(name: &str) -> bool {
    let trimmed = name.trim_start_matches('_');
    trimmed
        .chars()
        .next()
        .map_or(true, |c| c.is_ascii_lowercase())
        && !trimmed.contains('_')
}

fn is_pascal_case(name: &str) -> bool {
    name.chars().next().map_or(false, |c| c.is_ascii_uppercase()) && !name.contains('_')
}

fn is_upper_case(name: &str) -> bool {
    !name.chars().any(|c| c.is_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize;

    fn run(sdl: &str, rules: &[(LintRule, Severity)]) -> Vec<LintIssue> {
        let schema = normalize(sdl).unwrap();
        let rules: Vec<_> = rules
            .iter()
            .map(|(rule, severity)| LintRuleConfig {
                rule: *rule,
                severity: *severity,
            })
            .collect();
        lint_schema(&schema, &rules)
    }

    fn messages(issues: &[LintIssue]) -> Vec<&str> {
        issues.iter().map(|i| i.message.as_str()).collect()
    }

    #[test]
    fn naming_rules() {
        let sdl = r#"
            type Query { employees: [Employee_A] }
            type Employee_A { first_name: String }
            input InputA { a: Int }
            enum ProductNamesEnum { Value VALUE }
        "#;
        let issues = run(
            sdl,
            &[
                (LintRule::TypeNamesShouldBePascalCase, Severity::Warn),
                (LintRule::FieldNamesShouldBeCamelCase, Severity::Error),
                (LintRule::ShouldNotHaveInputPrefix, Severity::Warn),
                (LintRule::ShouldHaveInputSuffix, Severity::Error),
                (LintRule::ShouldNotHaveEnumSuffix, Severity::Warn),
                (LintRule::EnumValuesShouldBeUpperCase, Severity::Warn),
                (LintRule::DisallowCaseInsensitiveEnumValues, Severity::Warn),
            ],
        );
        let msgs = messages(&issues);
        assert!(msgs.contains(&"Type \"Employee_A\" should be in PascalCase format"));
        assert!(msgs.contains(&"Field \"first_name\" should be in camelCase format"));
        assert!(msgs.contains(&"Input type \"InputA\" should not have \"Input\" prefix"));
        assert!(msgs.contains(
            &"Input type \"InputA\" should have one of the following suffixes: Input"
        ));
        assert!(msgs.contains(&"Enumerator \"ProductNamesEnum\" should not have \"Enum\" suffix"));
        assert!(msgs.contains(&"Enumeration value \"Value\" should be in UPPER_CASE format"));
        assert!(msgs.contains(
            &"Unexpected case-insensitive enum values duplicates for enum value \"VALUE\" in enum \"ProductNamesEnum\""
        ));
        assert!(has_blocking_issues(&issues));
    }

    #[test]
    fn ordering_rules() {
        let sdl = r#"
            type Query { b: B, a: Int }
            type B { b: Int, a: Int }
            enum Engine { VALUE ENGINE }
        "#;
        let issues = run(
            sdl,
            &[
                (LintRule::OrderFields, Severity::Warn),
                (LintRule::OrderEnumValues, Severity::Warn),
                (LintRule::OrderDefinitions, Severity::Warn),
            ],
        );
        let msgs = messages(&issues);
        assert!(msgs.contains(&"field \"a\" should be before field \"b\""));
        assert!(msgs.contains(&"enum value \"ENGINE\" should be before enum value \"VALUE\""));
        assert!(msgs.contains(&"type \"B\" should be before type \"Query\""));
        assert!(!has_blocking_issues(&issues));
    }

    #[test]
    fn description_and_deprecation() {
        let sdl = r#"
            "root"
            type Query { b: B }
            type B { a: Int, b: Int @deprecated }
        "#;
        let issues = run(
            sdl,
            &[
                (LintRule::AllTypesRequireDescription, Severity::Warn),
                (LintRule::RequireDeprecationReason, Severity::Warn),
            ],
        );
        assert_eq!(
            messages(&issues),
            vec![
                "Description is required for type \"B\"",
                "Deprecation reason is required for field \"b\" in type \"B\".",
            ]
        );
        assert_eq!(issues[0].location.line, 4);
    }

    #[test]
    fn typename_prefix_in_fields() {
        let sdl = "type Query { user: User } type User { userId: ID, name: String }";
        let issues = run(sdl, &[(LintRule::NoTypenamePrefixInTypeFields, Severity::Warn)]);
        assert_eq!(
            messages(&issues),
            vec!["Field \"userId\" starts with the name of the parent type \"User\""]
        );
    }

    #[test]
    fn no_rules_no_issues() {
        assert!(run("type Query { first_name: Int }", &[]).is_empty());
    }

    #[test]
    fn rule_names_are_screaming() {
        assert_eq!(
            LintRule::NoTypenamePrefixInTypeFields.as_ref(),
            "NO_TYPENAME_PREFIX_IN_TYPE_FIELDS"
        );
        assert_eq!(LintRule::all().len(), 18);
    }
}
