//! Contract tag filtering and inaccessible-element removal.
//!
//! A contract is derived from its base composition: filtered elements are
//! marked `@inaccessible` in the contract's federated schema and removed from
//! its client schema, then dangling references are pruned to a fixpoint.

use std::collections::BTreeSet;

use crate::error::CODE_COMPOSE_CONTRACT;
use crate::normalize::{has_directive, tags, Directive, NormalizedSchema, PrintMode, TypeKind};
use crate::types::TagFilter;

use super::{ComposedSchema, CompositionError};

fn inaccessible() -> Directive {
    Directive {
        name: "inaccessible".to_string(),
        arguments: Vec::new(),
    }
}

fn mark(directives: &mut Vec<Directive>) {
    if !has_directive(directives, "inaccessible") {
        directives.push(inaccessible());
    }
}

fn tagged_with(directives: &[Directive], set: &BTreeSet<String>) -> bool {
    tags(directives).any(|t| set.contains(&t))
}

/// Apply a contract's include/exclude tags to an already composed base.
pub fn apply_tag_filter(
    base: &ComposedSchema,
    filter: &TagFilter,
) -> std::result::Result<ComposedSchema, Vec<CompositionError>> {
    let mut schema = base.schema.clone();
    let include = &filter.include_tags;
    let exclude = &filter.exclude_tags;
    let roots = schema.roots.clone();

    for ty in schema.types.values_mut() {
        let is_root = roots.contains(&ty.name);
        let type_excluded = tagged_with(&ty.directives, exclude);
        let type_included = include.is_empty() || tagged_with(&ty.directives, include);

        if type_excluded || (!type_included && !is_root && !has_members(ty.kind)) {
            mark(&mut ty.directives);
            continue;
        }

        let keep = |directives: &[Directive]| {
            !tagged_with(directives, exclude)
                && (include.is_empty()
                    || (type_included && !is_root)
                    || tagged_with(directives, include))
        };
        for f in &mut ty.fields {
            if !keep(&f.directives) {
                mark(&mut f.directives);
            }
        }
        for f in &mut ty.input_fields {
            if !keep(&f.directives) {
                mark(&mut f.directives);
            }
        }
        for v in &mut ty.enum_values {
            if !keep(&v.directives) {
                mark(&mut v.directives);
            }
        }
    }

    let client_schema = remove_inaccessible(&schema).map_err(|errs| {
        errs.into_iter()
            .map(|e| CompositionError::new(CODE_COMPOSE_CONTRACT, e.message))
            .collect::<Vec<_>>()
    })?;

    Ok(ComposedSchema {
        federated_sdl: schema.print(PrintMode::Federated),
        federated_client_sdl: client_schema.print(PrintMode::Client),
        schema,
        client_schema,
        field_configurations: base.field_configurations.clone(),
        subgraph_config_by_name: base.subgraph_config_by_name.clone(),
    })
}

/// Scalars, enums and unions carry no tagged fields of their own, so include
/// filtering on them is decided by reachability instead.
fn has_members(kind: TypeKind) -> bool {
    matches!(kind, TypeKind::Scalar | TypeKind::Enum | TypeKind::Union)
}

/// Drop `@inaccessible` elements and everything left dangling by their removal.
pub fn remove_inaccessible(
    schema: &NormalizedSchema,
) -> std::result::Result<NormalizedSchema, Vec<CompositionError>> {
    let mut out = schema.clone();
    out.types
        .retain(|_, t| !has_directive(&t.directives, "inaccessible"));
    for ty in out.types.values_mut() {
        ty.fields
            .retain(|f| !has_directive(&f.directives, "inaccessible"));
        for f in &mut ty.fields {
            f.args
                .retain(|a| !has_directive(&a.directives, "inaccessible"));
        }
        ty.input_fields
            .retain(|f| !has_directive(&f.directives, "inaccessible"));
        ty.enum_values
            .retain(|v| !has_directive(&v.directives, "inaccessible"));
    }

    // Removing a type can strand fields, which can empty a type, and so on.
    loop {
        let known: BTreeSet<String> = out.types.keys().cloned().collect();
        let mut changed = false;
        let mut emptied = Vec::new();

        let mut types = std::mem::take(&mut out.types);
        for ty in types.values_mut() {
            let before = (
                ty.fields.len(),
                ty.input_fields.len(),
                ty.members.len(),
                ty.interfaces.len(),
            );
            ty.fields.retain(|f| {
                exists_in(&known, f.ty.named())
                    && f.args
                        .iter()
                        .all(|a| exists_in(&known, a.ty.named()) || !a.ty.is_non_null())
            });
            for f in &mut ty.fields {
                f.args.retain(|a| exists_in(&known, a.ty.named()));
            }
            ty.input_fields.retain(|f| exists_in(&known, f.ty.named()));
            ty.members.retain(|m| known.contains(m));
            ty.interfaces.retain(|i| known.contains(i));
            let after = (
                ty.fields.len(),
                ty.input_fields.len(),
                ty.members.len(),
                ty.interfaces.len(),
            );
            changed |= before != after;

            let empty = match ty.kind {
                TypeKind::Object | TypeKind::Interface => ty.fields.is_empty(),
                TypeKind::InputObject => ty.input_fields.is_empty(),
                TypeKind::Enum => ty.enum_values.is_empty(),
                TypeKind::Union => ty.members.is_empty(),
                TypeKind::Scalar => false,
            };
            if empty {
                emptied.push(ty.name.clone());
            }
        }
        for name in &emptied {
            types.remove(name);
        }
        changed |= !emptied.is_empty();
        out.types = types;
        if !changed {
            break;
        }
    }

    out.refresh_roots();
    if out.roots.query.is_none() {
        return Err(vec![CompositionError::new(
            CODE_COMPOSE_CONTRACT,
            "every Query field is inaccessible or filtered out",
        )]);
    }
    Ok(out)
}

fn exists_in(known: &BTreeSet<String>, name: &str) -> bool {
    crate::normalize::BUILTIN_SCALARS.contains(&name) || known.contains(name)
}
