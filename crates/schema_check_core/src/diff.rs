//! Schema diff and change classification.
//!
//! Compares two normalized schemas and emits ordered, typed change records.
//! Criticality follows the graphql-inspector conventions; `Breaking` and
//! `Dangerous` both surface as `is_breaking = true`.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::normalize::{
    has_directive, tags, Directive, EnumValueDef, FieldDef, InputValueDef, NormalizedSchema, TypeDef, TypeKind,
    TypeRef,
};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, EnumString, Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    Added,
    Removed,
    Changed,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Criticality {
    Breaking,
    Dangerous,
    NonBreaking,
}

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
    Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    SchemaQueryTypeChanged,
    SchemaMutationTypeChanged,
    SchemaSubscriptionTypeChanged,
    TypeAdded,
    TypeRemoved,
    TypeKindChanged,
    FieldAdded,
    FieldRemoved,
    FieldTypeChanged,
    FieldDeprecationAdded,
    FieldDeprecationRemoved,
    FieldArgumentAdded,
    FieldArgumentRemoved,
    FieldArgumentTypeChanged,
    FieldArgumentDefaultChanged,
    InputFieldAdded,
    InputFieldRemoved,
    InputFieldTypeChanged,
    InputFieldDefaultValueChanged,
    EnumValueAdded,
    EnumValueRemoved,
    EnumValueDeprecationReasonAdded,
    EnumValueDeprecationReasonRemoved,
    UnionMemberAdded,
    UnionMemberRemoved,
    ObjectTypeInterfaceAdded,
    ObjectTypeInterfaceRemoved,
    DirectiveAdded,
    DirectiveRemoved,
}

impl ChangeKind {
    pub fn change_type(&self) -> ChangeType {
        let name = self.as_ref();
        if name.ends_with("_ADDED") {
            ChangeType::Added
        } else if name.ends_with("_REMOVED") {
            ChangeType::Removed
        } else {
            ChangeType::Changed
        }
    }
}

/// One classified difference between two schema versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaChange {
    pub kind: ChangeKind,
    pub change_type: ChangeType,
    pub path: String,
    pub message: String,
    pub criticality: Criticality,
    /// Previous and new printed type, for type-change kinds.
    pub old_type: Option<String>,
    pub new_type: Option<String>,
}

impl SchemaChange {
    fn new(kind: ChangeKind, path: String, message: String, criticality: Criticality) -> Self {
        Self {
            kind,
            change_type: kind.change_type(),
            path,
            message,
            criticality,
            old_type: None,
            new_type: None,
        }
    }

    fn with_types(mut self, old: &TypeRef, new: &TypeRef) -> Self {
        self.old_type = Some(old.to_string());
        self.new_type = Some(new.to_string());
        self
    }

    pub fn is_breaking(&self) -> bool {
        !matches!(self.criticality, Criticality::NonBreaking)
    }
}

/// Diff two schemas. Never fails; an empty `old` reports everything as added.
pub fn diff_schemas(old: &NormalizedSchema, new: &NormalizedSchema) -> Vec<SchemaChange> {
    let mut changes = Vec::new();

    for (kind, label, before, after) in [
        (
            ChangeKind::SchemaQueryTypeChanged,
            "query",
            &old.roots.query,
            &new.roots.query,
        ),
        (
            ChangeKind::SchemaMutationTypeChanged,
            "mutation",
            &old.roots.mutation,
            &new.roots.mutation,
        ),
        (
            ChangeKind::SchemaSubscriptionTypeChanged,
            "subscription",
            &old.roots.subscription,
            &new.roots.subscription,
        ),
    ] {
        // Appearing for the first time is covered by TypeAdded.
        if let (Some(b), Some(a)) = (before, after) {
            if a != b {
                changes.push(SchemaChange::new(
                    kind,
                    label.to_string(),
                    format!("Schema {label} root has changed from '{b}' to '{a}'"),
                    Criticality::Breaking,
                ));
            }
        }
    }

    for (name, old_ty) in &old.types {
        match new.types.get(name) {
            None => changes.push(SchemaChange::new(
                ChangeKind::TypeRemoved,
                name.clone(),
                format!("Type '{name}' was removed"),
                Criticality::Breaking,
            )),
            Some(new_ty) if new_ty.kind != old_ty.kind => changes.push(SchemaChange::new(
                ChangeKind::TypeKindChanged,
                name.clone(),
                format!(
                    "'{name}' kind changed from '{}' to '{}'",
                    old_ty.kind, new_ty.kind
                ),
                Criticality::Breaking,
            )),
            Some(new_ty) => diff_type(old_ty, new_ty, &mut changes),
        }
    }
    for name in new.types.keys() {
        if !old.types.contains_key(name) {
            changes.push(SchemaChange::new(
                ChangeKind::TypeAdded,
                name.clone(),
                format!("Type '{name}' was added"),
                Criticality::NonBreaking,
            ));
        }
    }

    changes
}

fn diff_type(old: &TypeDef, new: &TypeDef, out: &mut Vec<SchemaChange>) {
    diff_tags(&old.name, &old.directives, &new.directives, out);
    match old.kind {
        TypeKind::Object | TypeKind::Interface => {
            diff_fields(old, new, out);
            diff_interfaces(old, new, out);
        }
        TypeKind::InputObject => diff_input_fields(old, new, out),
        TypeKind::Enum => diff_enum_values(old, new, out),
        TypeKind::Union => diff_union_members(old, new, out),
        TypeKind::Scalar => {}
    }
}

fn diff_fields(old: &TypeDef, new: &TypeDef, out: &mut Vec<SchemaChange>) {
    let kind = old.kind.as_ref().replace('_', " ");
    for f in &old.fields {
        let path = format!("{}.{}", old.name, f.name);
        match new.field(&f.name) {
            None => {
                let deprecated = if has_directive(&f.directives, "deprecated") {
                    " (deprecated)"
                } else {
                    ""
                };
                out.push(SchemaChange::new(
                    ChangeKind::FieldRemoved,
                    path,
                    format!(
                        "Field '{}'{deprecated} was removed from {kind} type '{}'",
                        f.name, old.name
                    ),
                    Criticality::Breaking,
                ));
            }
            Some(nf) => diff_field(old, f, nf, path, out),
        }
    }
    for f in &new.fields {
        if old.field(&f.name).is_none() {
            out.push(SchemaChange::new(
                ChangeKind::FieldAdded,
                format!("{}.{}", new.name, f.name),
                format!("Field '{}' was added to {kind} type '{}'", f.name, new.name),
                Criticality::NonBreaking,
            ));
        }
    }
}

fn diff_field(
    owner: &TypeDef,
    old: &FieldDef,
    new: &FieldDef,
    path: String,
    out: &mut Vec<SchemaChange>,
) {
    diff_tags(&path, &old.directives, &new.directives, out);
    if old.ty != new.ty {
        let criticality = if safe_output_change(&old.ty, &new.ty) {
            Criticality::NonBreaking
        } else {
            Criticality::Breaking
        };
        out.push(
            SchemaChange::new(
                ChangeKind::FieldTypeChanged,
                path.clone(),
                format!(
                    "Field '{}.{}' changed type from '{}' to '{}'",
                    owner.name, old.name, old.ty, new.ty
                ),
                criticality,
            )
            .with_types(&old.ty, &new.ty),
        );
    }

    let was = has_directive(&old.directives, "deprecated");
    let is = has_directive(&new.directives, "deprecated");
    if !was && is {
        out.push(SchemaChange::new(
            ChangeKind::FieldDeprecationAdded,
            path.clone(),
            format!("Field '{}.{}' is deprecated", owner.name, old.name),
            Criticality::NonBreaking,
        ));
    } else if was && !is {
        out.push(SchemaChange::new(
            ChangeKind::FieldDeprecationRemoved,
            path.clone(),
            format!("Field '{}.{}' is no longer deprecated", owner.name, old.name),
            Criticality::NonBreaking,
        ));
    }

    for a in &old.args {
        let arg_path = format!("{path}.{}", a.name);
        match new.args.iter().find(|n| n.name == a.name) {
            None => out.push(SchemaChange::new(
                ChangeKind::FieldArgumentRemoved,
                arg_path,
                format!(
                    "Argument '{}' was removed from field '{}.{}'",
                    a.name, owner.name, old.name
                ),
                Criticality::Breaking,
            )),
            Some(na) => {
                if a.ty != na.ty {
                    let criticality = if safe_input_change(&a.ty, &na.ty) {
                        Criticality::NonBreaking
                    } else {
                        Criticality::Breaking
                    };
                    out.push(
                        SchemaChange::new(
                            ChangeKind::FieldArgumentTypeChanged,
                            arg_path.clone(),
                            format!(
                                "Type for argument '{}' on field '{}.{}' changed from '{}' to '{}'",
                                a.name, owner.name, old.name, a.ty, na.ty
                            ),
                            criticality,
                        )
                        .with_types(&a.ty, &na.ty),
                    );
                }
                if a.default_value != na.default_value {
                    out.push(SchemaChange::new(
                        ChangeKind::FieldArgumentDefaultChanged,
                        arg_path,
                        format!(
                            "Default value for argument '{}' on field '{}.{}' changed from '{}' to '{}'",
                            a.name,
                            owner.name,
                            old.name,
                            a.default_value.as_deref().unwrap_or("undefined"),
                            na.default_value.as_deref().unwrap_or("undefined"),
                        ),
                        Criticality::Dangerous,
                    ));
                }
            }
        }
    }
    for a in &new.args {
        if !old.args.iter().any(|o| o.name == a.name) {
            out.push(SchemaChange::new(
                ChangeKind::FieldArgumentAdded,
                format!("{path}.{}", a.name),
                format!(
                    "Argument '{}: {}' added to field '{}.{}'",
                    a.name, a.ty, owner.name, new.name
                ),
                addition_criticality(a),
            ));
        }
    }
}

fn diff_input_fields(old: &TypeDef, new: &TypeDef, out: &mut Vec<SchemaChange>) {
    for f in &old.input_fields {
        let path = format!("{}.{}", old.name, f.name);
        match new.input_field(&f.name) {
            None => out.push(SchemaChange::new(
                ChangeKind::InputFieldRemoved,
                path,
                format!(
                    "Input field '{}' was removed from input object type '{}'",
                    f.name, old.name
                ),
                Criticality::Breaking,
            )),
            Some(nf) => {
                if f.ty != nf.ty {
                    let criticality = if safe_input_change(&f.ty, &nf.ty) {
                        Criticality::NonBreaking
                    } else {
                        Criticality::Breaking
                    };
                    out.push(
                        SchemaChange::new(
                            ChangeKind::InputFieldTypeChanged,
                            path.clone(),
                            format!(
                                "Input field '{}.{}' changed type from '{}' to '{}'",
                                old.name, f.name, f.ty, nf.ty
                            ),
                            criticality,
                        )
                        .with_types(&f.ty, &nf.ty),
                    );
                }
                if f.default_value != nf.default_value {
                    out.push(SchemaChange::new(
                        ChangeKind::InputFieldDefaultValueChanged,
                        path,
                        format!(
                            "Input field '{}.{}' default value changed from '{}' to '{}'",
                            old.name,
                            f.name,
                            f.default_value.as_deref().unwrap_or("undefined"),
                            nf.default_value.as_deref().unwrap_or("undefined"),
                        ),
                        Criticality::Dangerous,
                    ));
                }
            }
        }
    }
    for f in &new.input_fields {
        if old.input_field(&f.name).is_none() {
            out.push(SchemaChange::new(
                ChangeKind::InputFieldAdded,
                format!("{}.{}", new.name, f.name),
                format!(
                    "Input field '{}' of type '{}' was added to input object type '{}'",
                    f.name, f.ty, new.name
                ),
                addition_criticality(f),
            ));
        }
    }
}

fn diff_enum_values(old: &TypeDef, new: &TypeDef, out: &mut Vec<SchemaChange>) {
    let find = |t: &TypeDef, n: &str| -> Option<EnumValueDef> {
        t.enum_values.iter().find(|v| v.name == n).cloned()
    };
    for v in &old.enum_values {
        let path = format!("{}.{}", old.name, v.name);
        match find(new, &v.name) {
            None => out.push(SchemaChange::new(
                ChangeKind::EnumValueRemoved,
                path,
                format!("Enum value '{}' was removed from enum '{}'", v.name, old.name),
                Criticality::Breaking,
            )),
            Some(nv) => {
                let was = has_directive(&v.directives, "deprecated");
                let is = has_directive(&nv.directives, "deprecated");
                if !was && is {
                    out.push(SchemaChange::new(
                        ChangeKind::EnumValueDeprecationReasonAdded,
                        path,
                        format!("Enum value '{}.{}' was deprecated", old.name, v.name),
                        Criticality::NonBreaking,
                    ));
                } else if was && !is {
                    out.push(SchemaChange::new(
                        ChangeKind::EnumValueDeprecationReasonRemoved,
                        path,
                        format!("Enum value '{}.{}' is no longer deprecated", old.name, v.name),
                        Criticality::NonBreaking,
                    ));
                }
            }
        }
    }
    for v in &new.enum_values {
        if find(old, &v.name).is_none() {
            out.push(SchemaChange::new(
                ChangeKind::EnumValueAdded,
                format!("{}.{}", new.name, v.name),
                format!("Enum value '{}' was added to enum '{}'", v.name, new.name),
                Criticality::Dangerous,
            ));
        }
    }
}

fn diff_union_members(old: &TypeDef, new: &TypeDef, out: &mut Vec<SchemaChange>) {
    for m in &old.members {
        if !new.members.contains(m) {
            out.push(SchemaChange::new(
                ChangeKind::UnionMemberRemoved,
                old.name.clone(),
                format!("Member '{m}' was removed from union type '{}'", old.name),
                Criticality::Breaking,
            ));
        }
    }
    for m in &new.members {
        if !old.members.contains(m) {
            out.push(SchemaChange::new(
                ChangeKind::UnionMemberAdded,
                new.name.clone(),
                format!("Member '{m}' was added to union type '{}'", new.name),
                Criticality::Dangerous,
            ));
        }
    }
}

fn diff_interfaces(old: &TypeDef, new: &TypeDef, out: &mut Vec<SchemaChange>) {
    for i in &old.interfaces {
        if !new.interfaces.contains(i) {
            out.push(SchemaChange::new(
                ChangeKind::ObjectTypeInterfaceRemoved,
                old.name.clone(),
                format!("'{}' object type no longer implements '{i}' interface", old.name),
                Criticality::Breaking,
            ));
        }
    }
    for i in &new.interfaces {
        if !old.interfaces.contains(i) {
            out.push(SchemaChange::new(
                ChangeKind::ObjectTypeInterfaceAdded,
                new.name.clone(),
                format!("'{}' object implements '{i}' interface", new.name),
                Criticality::Dangerous,
            ));
        }
    }
}

/// `@tag` usage on a type or field.
fn diff_tags(path: &str, old: &[Directive], new: &[Directive], out: &mut Vec<SchemaChange>) {
    let before: Vec<String> = tags(old).collect();
    let after: Vec<String> = tags(new).collect();
    for t in before.iter().filter(|t| !after.contains(t)) {
        out.push(SchemaChange::new(
            ChangeKind::DirectiveRemoved,
            path.to_string(),
            format!("Directive '@tag(name: \"{t}\")' was removed from '{path}'"),
            Criticality::NonBreaking,
        ));
    }
    for t in after.iter().filter(|t| !before.contains(t)) {
        out.push(SchemaChange::new(
            ChangeKind::DirectiveAdded,
            path.to_string(),
            format!("Directive '@tag(name: \"{t}\")' was added to '{path}'"),
            Criticality::NonBreaking,
        ));
    }
}

fn addition_criticality(v: &InputValueDef) -> Criticality {
    if v.ty.is_non_null() && v.default_value.is_none() {
        Criticality::Breaking
    } else {
        Criticality::Dangerous
    }
}

/// Output positions may only get stricter: `T` to `T!` is safe.
fn safe_output_change(old: &TypeRef, new: &TypeRef) -> bool {
    match (old, new) {
        (TypeRef::Named(a), TypeRef::Named(b)) => a == b,
        (TypeRef::List(a), TypeRef::List(b)) => safe_output_change(a, b),
        (TypeRef::NonNull(a), TypeRef::NonNull(b)) => safe_output_change(a, b),
        (old, TypeRef::NonNull(inner)) if !old.is_non_null() => safe_output_change(old, inner),
        _ => false,
    }
}

/// Input positions may only get looser: `T!` to `T` is safe.
fn safe_input_change(old: &TypeRef, new: &TypeRef) -> bool {
    match (old, new) {
        (TypeRef::Named(a), TypeRef::Named(b)) => a == b,
        (TypeRef::List(a), TypeRef::List(b)) => safe_input_change(a, b),
        (TypeRef::NonNull(a), TypeRef::NonNull(b)) => safe_input_change(a, b),
        (TypeRef::NonNull(inner), new) if !new.is_non_null() => safe_input_change(inner, new),
        _ => false,
    }
}
