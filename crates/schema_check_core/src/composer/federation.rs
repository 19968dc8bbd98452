//! Built-in federation composer.
//!
//! Merges normalized subgraphs type by type. Shared output fields must agree
//! on type, input objects keep the intersection of their fields, and every
//! `@external` / `@key` / `@requires` reference must resolve to a field some
//! subgraph actually contributes.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::error::{
    CODE_COMPOSE_CONFLICT, CODE_COMPOSE_DUPLICATE_SUBGRAPH, CODE_COMPOSE_INVALID_SUBGRAPH,
    CODE_COMPOSE_UNRESOLVED_FIELD,
};
use crate::normalize::{
    fieldset_top_level, has_directive, normalize, Directive, FieldDef, NormalizedSchema,
    PrintMode, RootTypes, TypeDef, TypeKind,
};

use super::contract::remove_inaccessible;
use super::{
    ComposedSchema, Composer, CompositionError, FieldConfiguration, SubgraphConfig, SubgraphInput,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct FederationComposer;

impl FederationComposer {
    pub fn new() -> Self {
        Self
    }
}

impl Composer for FederationComposer {
    fn compose(
        &self,
        subgraphs: &[SubgraphInput],
    ) -> std::result::Result<ComposedSchema, Vec<CompositionError>> {
        let mut errors = Vec::new();

        let mut seen = HashSet::new();
        for sg in subgraphs {
            if !seen.insert(sg.name.as_str()) {
                errors.push(CompositionError::in_subgraph(
                    CODE_COMPOSE_DUPLICATE_SUBGRAPH,
                    &sg.name,
                    format!("subgraph name \"{}\" is used more than once", sg.name),
                ));
            }
        }

        let mut parsed = Vec::with_capacity(subgraphs.len());
        for sg in subgraphs {
            match normalize(&sg.sdl) {
                Ok(schema) => parsed.push((sg, schema)),
                Err(e) => errors.extend(e.errors.into_iter().map(|se| {
                    CompositionError::in_subgraph(
                        CODE_COMPOSE_INVALID_SUBGRAPH,
                        &sg.name,
                        se.to_string(),
                    )
                })),
            }
        }
        if !errors.is_empty() {
            return Err(errors);
        }

        let mut merger = Merger::default();
        for (sg, schema) in &parsed {
            merger.add(&sg.name, schema);
        }
        let merged = merger.finish()?;

        let client_schema = remove_inaccessible(&merged)?;
        let field_configurations = field_configurations(&merged);
        let subgraph_config_by_name = parsed
            .iter()
            .map(|(sg, schema)| {
                (
                    sg.name.clone(),
                    SubgraphConfig {
                        name: sg.name.clone(),
                        url: sg.url.clone(),
                        subscription_url: sg.subscription_url.clone(),
                        subscription_protocol: sg.subscription_protocol.clone(),
                        sdl_digest: schema.sdl_digest(),
                    },
                )
            })
            .collect();

        Ok(ComposedSchema {
            federated_sdl: merged.print(PrintMode::Federated),
            federated_client_sdl: client_schema.print(PrintMode::Client),
            schema: merged,
            client_schema,
            field_configurations,
            subgraph_config_by_name,
        })
    }
}

// ── Merge ──────────────────────────────────────────────────────

struct ExternalRef {
    type_name: String,
    field_name: String,
    subgraph: String,
}

struct RequiresRef {
    type_name: String,
    field_name: String,
    selection: String,
    subgraph: String,
}

#[derive(Default)]
struct Merger {
    roots: RootTypes,
    types: BTreeMap<String, TypeDef>,
    /// Which subgraphs define each input object, and which fields each one has.
    input_owners: BTreeMap<String, Vec<(String, BTreeSet<String>)>>,
    externals: Vec<ExternalRef>,
    requires: Vec<RequiresRef>,
    keys: Vec<(String, String, String)>,
    errors: Vec<CompositionError>,
}

impl Merger {
    fn add(&mut self, subgraph: &str, schema: &NormalizedSchema) {
        for (slot, value) in [
            (&mut self.roots.query, &schema.roots.query),
            (&mut self.roots.mutation, &schema.roots.mutation),
            (&mut self.roots.subscription, &schema.roots.subscription),
        ] {
            if slot.is_none() {
                slot.clone_from(value);
            }
        }

        for ty in schema.types.values() {
            for key in &ty.keys {
                self.keys
                    .push((ty.name.clone(), key.clone(), subgraph.to_string()));
            }
            if ty.kind == TypeKind::InputObject {
                self.input_owners.entry(ty.name.clone()).or_default().push((
                    subgraph.to_string(),
                    ty.input_fields.iter().map(|f| f.name.clone()).collect(),
                ));
            }
            for f in &ty.fields {
                if f.federation.external {
                    self.externals.push(ExternalRef {
                        type_name: ty.name.clone(),
                        field_name: f.name.clone(),
                        subgraph: subgraph.to_string(),
                    });
                }
                if let Some(sel) = &f.federation.requires {
                    self.requires.push(RequiresRef {
                        type_name: ty.name.clone(),
                        field_name: f.name.clone(),
                        selection: sel.clone(),
                        subgraph: subgraph.to_string(),
                    });
                }
            }
            self.merge_type(subgraph, ty);
        }
    }

    fn merge_type(&mut self, subgraph: &str, incoming: &TypeDef) {
        let Some(existing) = self.types.get_mut(&incoming.name) else {
            let mut ty = incoming.clone();
            ty.fields.retain(|f| !f.federation.external);
            self.types.insert(ty.name.clone(), ty);
            return;
        };

        if existing.kind != incoming.kind {
            self.errors.push(CompositionError::in_subgraph(
                CODE_COMPOSE_CONFLICT,
                subgraph,
                format!(
                    "type \"{}\" is a {} here but a {} in another subgraph",
                    incoming.name, incoming.kind, existing.kind
                ),
            ));
            return;
        }

        if existing.description.is_none() {
            existing.description.clone_from(&incoming.description);
        }
        existing.is_extension &= incoming.is_extension;
        union_directives(&mut existing.directives, &incoming.directives);
        for k in &incoming.keys {
            if !existing.keys.contains(k) {
                existing.keys.push(k.clone());
            }
        }
        for i in &incoming.interfaces {
            if !existing.interfaces.contains(i) {
                existing.interfaces.push(i.clone());
            }
        }
        for m in &incoming.members {
            if !existing.members.contains(m) {
                existing.members.push(m.clone());
            }
        }
        for v in &incoming.enum_values {
            match existing.enum_values.iter_mut().find(|e| e.name == v.name) {
                Some(e) => union_directives(&mut e.directives, &v.directives),
                None => existing.enum_values.push(v.clone()),
            }
        }
        for f in &incoming.input_fields {
            match existing.input_fields.iter().find(|e| e.name == f.name) {
                Some(e) if e.ty != f.ty => self.errors.push(CompositionError::in_subgraph(
                    CODE_COMPOSE_CONFLICT,
                    subgraph,
                    format!(
                        "input field \"{}.{}\" is {} here but {} in another subgraph",
                        incoming.name, f.name, f.ty, e.ty
                    ),
                )),
                Some(_) => {}
                None => existing.input_fields.push(f.clone()),
            }
        }

        let mut conflicts = Vec::new();
        for f in incoming.fields.iter().filter(|f| !f.federation.external) {
            match existing.fields.iter_mut().find(|e| e.name == f.name) {
                Some(e) => {
                    if let Some(msg) = merge_field(e, f) {
                        conflicts.push(format!("field \"{}.{}\" {msg}", incoming.name, f.name));
                    }
                }
                None => existing.fields.push(f.clone()),
            }
        }
        self.errors.extend(
            conflicts
                .into_iter()
                .map(|m| CompositionError::in_subgraph(CODE_COMPOSE_CONFLICT, subgraph, m)),
        );
    }

    fn finish(mut self) -> std::result::Result<NormalizedSchema, Vec<CompositionError>> {
        self.intersect_input_objects();

        for ext in &self.externals {
            let resolved = self
                .types
                .get(&ext.type_name)
                .and_then(|t| t.field(&ext.field_name))
                .is_some();
            if !resolved {
                self.errors.push(CompositionError::in_subgraph(
                    CODE_COMPOSE_UNRESOLVED_FIELD,
                    &ext.subgraph,
                    format!(
                        "field \"{}.{}\" is marked @external but no subgraph resolves it",
                        ext.type_name, ext.field_name
                    ),
                ));
            }
        }

        for req in &self.requires {
            for name in fieldset_top_level(&req.selection) {
                let ok = self
                    .types
                    .get(&req.type_name)
                    .and_then(|t| t.field(&name))
                    .is_some();
                if !ok {
                    self.errors.push(CompositionError::in_subgraph(
                        CODE_COMPOSE_UNRESOLVED_FIELD,
                        &req.subgraph,
                        format!(
                            "field \"{}.{}\" requires \"{}\" which no subgraph resolves",
                            req.type_name, req.field_name, name
                        ),
                    ));
                }
            }
        }

        for (type_name, key, subgraph) in &self.keys {
            for name in fieldset_top_level(key) {
                let ok = self
                    .types
                    .get(type_name)
                    .and_then(|t| t.field(&name))
                    .is_some();
                if !ok {
                    self.errors.push(CompositionError::in_subgraph(
                        CODE_COMPOSE_UNRESOLVED_FIELD,
                        subgraph,
                        format!("key \"{key}\" on \"{type_name}\" selects unknown field \"{name}\""),
                    ));
                }
            }
        }

        if !self.errors.is_empty() {
            return Err(self.errors);
        }

        let mut schema = NormalizedSchema {
            roots: self.roots,
            types: self.types,
        };
        schema.refresh_roots();
        if schema.roots.query.is_none() {
            return Err(vec![CompositionError::new(
                CODE_COMPOSE_CONFLICT,
                "no subgraph defines a Query root field",
            )]);
        }
        Ok(schema)
    }

    /// Input objects keep only fields every defining subgraph agrees on.
    /// A required field that some subgraph lacks is a conflict.
    fn intersect_input_objects(&mut self) {
        for (name, owners) in &self.input_owners {
            let Some(ty) = self.types.get_mut(name) else {
                continue;
            };
            let mut missing_required = Vec::new();
            ty.input_fields.retain(|f| {
                let everywhere = owners.iter().all(|(_, fields)| fields.contains(&f.name));
                if !everywhere && f.ty.is_non_null() && f.default_value.is_none() {
                    missing_required.push(f.name.clone());
                }
                everywhere
            });
            for field in missing_required {
                let lacking: Vec<&str> = owners
                    .iter()
                    .filter(|(_, fields)| !fields.contains(&field))
                    .map(|(sg, _)| sg.as_str())
                    .collect();
                self.errors.push(CompositionError::new(
                    CODE_COMPOSE_CONFLICT,
                    format!(
                        "required input field \"{name}.{field}\" is missing in: {}",
                        lacking.join(", ")
                    ),
                ));
            }
        }
    }
}

/// Merge a shared field. Returns a conflict message when the definitions disagree.
fn merge_field(existing: &mut FieldDef, incoming: &FieldDef) -> Option<String> {
    if existing.ty != incoming.ty {
        return Some(format!(
            "is {} here but {} in another subgraph",
            incoming.ty, existing.ty
        ));
    }
    for arg in &incoming.args {
        match existing.args.iter().find(|a| a.name == arg.name) {
            Some(a) if a.ty != arg.ty => {
                return Some(format!(
                    "argument \"{}\" is {} here but {} in another subgraph",
                    arg.name, arg.ty, a.ty
                ));
            }
            Some(_) => {}
            None => existing.args.push(arg.clone()),
        }
    }
    if existing.description.is_none() {
        existing.description.clone_from(&incoming.description);
    }
    union_directives(&mut existing.directives, &incoming.directives);
    None
}

fn union_directives(into: &mut Vec<Directive>, from: &[Directive]) {
    for d in from {
        if !into.contains(d) {
            into.push(d.clone());
        }
    }
}

// ── Router metadata ────────────────────────────────────────────

fn field_configurations(schema: &NormalizedSchema) -> Vec<FieldConfiguration> {
    let mut out = Vec::new();
    for ty in schema.types.values() {
        if !matches!(ty.kind, TypeKind::Object | TypeKind::Interface) {
            continue;
        }
        let type_auth = has_directive(&ty.directives, "authenticated");
        let type_scopes = scopes(&ty.directives);
        for f in &ty.fields {
            let requires_authentication =
                type_auth || has_directive(&f.directives, "authenticated");
            let mut required_scopes = type_scopes.clone();
            required_scopes.extend(scopes(&f.directives));
            if f.args.is_empty() && !requires_authentication && required_scopes.is_empty() {
                continue;
            }
            out.push(FieldConfiguration {
                type_name: ty.name.clone(),
                field_name: f.name.clone(),
                argument_names: f.args.iter().map(|a| a.name.clone()).collect(),
                requires_authentication,
                required_scopes,
            });
        }
    }
    out
}

/// Read `@requiresScopes(scopes: [["a", "b"], ["c"]])` into groups.
fn scopes(directives: &[Directive]) -> Vec<Vec<String>> {
    let Some(raw) = directives
        .iter()
        .find(|d| d.name == "requiresScopes")
        .and_then(|d| d.arg("scopes"))
    else {
        return Vec::new();
    };
    let inner = raw.trim().trim_start_matches('[').trim_end_matches(']');
    inner
        .split(']')
        .map(|group| {
            group
                .split(',')
                .map(|s| s.trim().trim_start_matches('[').trim().trim_matches('"'))
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .filter(|g| !g.is_empty())
        .collect()
}
