//! Schema normalizer.
//!
//! Parses subgraph SDL with `graphql-parser` and builds a federation-aware,
//! deterministic schema model. Type extensions are merged into their base,
//! federation directives are lifted into typed metadata, and federation
//! internals (`_Any`, `_Entity`, `_service` ...) are dropped so that downstream
//! diffing sees a plain type system.

use std::collections::{BTreeMap, HashSet};
use std::fmt::{self, Write as _};

use graphql_parser::schema as ast;
use graphql_parser::Pos;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use strum::{AsRefStr, Display};

use crate::error::{InvalidSchemaError, SchemaError};

pub const BUILTIN_SCALARS: &[&str] = &["String", "Int", "Float", "Boolean", "ID"];

/// Types that only exist to support the federation entity protocol.
const FEDERATION_TYPES: &[&str] = &[
    "_Any",
    "_Entity",
    "_Service",
    "FieldSet",
    "link__Import",
    "link__Purpose",
    "federation__FieldSet",
    "federation__Scope",
    "federation__Policy",
];

const FEDERATION_ROOT_FIELDS: &[&str] = &["_entities", "_service"];

/// Directives whose meaning is lifted into `FieldFederation` / `TypeDef::keys`.
const LIFTED_DIRECTIVES: &[&str] = &[
    "key",
    "external",
    "requires",
    "provides",
    "shareable",
    "override",
    "extends",
    "link",
    "composeDirective",
    "interfaceObject",
];

/// Directives that survive into the client-facing schema.
const CLIENT_DIRECTIVES: &[&str] = &["deprecated", "specifiedBy", "oneOf"];

// ── Model ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TypeKind {
    Scalar,
    Object,
    Interface,
    Union,
    Enum,
    InputObject,
}

impl TypeKind {
    fn keyword(&self) -> &'static str {
        match self {
            Self::Scalar => "scalar",
            Self::Object => "type",
            Self::Interface => "interface",
            Self::Union => "union",
            Self::Enum => "enum",
            Self::InputObject => "input",
        }
    }

    pub fn is_input(&self) -> bool {
        matches!(self, Self::Scalar | Self::Enum | Self::InputObject)
    }

    pub fn is_output(&self) -> bool {
        !matches!(self, Self::InputObject)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeRef {
    Named(String),
    List(Box<TypeRef>),
    NonNull(Box<TypeRef>),
}

impl TypeRef {
    pub fn named(&self) -> &str {
        match self {
            Self::Named(n) => n,
            Self::List(inner) | Self::NonNull(inner) => inner.named(),
        }
    }

    pub fn is_non_null(&self) -> bool {
        matches!(self, Self::NonNull(_))
    }

    /// Strip one outer non-null wrapper, if any.
    pub fn nullable(&self) -> &TypeRef {
        match self {
            Self::NonNull(inner) => inner,
            other => other,
        }
    }

    fn from_ast(ty: &ast::Type<'_, String>) -> Self {
        match ty {
            ast::Type::NamedType(n) => Self::Named(n.clone()),
            ast::Type::ListType(inner) => Self::List(Box::new(Self::from_ast(inner))),
            ast::Type::NonNullType(inner) => Self::NonNull(Box::new(Self::from_ast(inner))),
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(n) => write!(f, "{n}"),
            Self::List(inner) => write!(f, "[{inner}]"),
            Self::NonNull(inner) => write!(f, "{inner}!"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl From<Pos> for Position {
    fn from(p: Pos) -> Self {
        Self {
            line: p.line,
            column: p.column,
        }
    }
}

/// An applied directive. Argument values are kept in their printed form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Directive {
    pub name: String,
    pub arguments: Vec<(String, String)>,
}

impl Directive {
    pub fn arg(&self, name: &str) -> Option<&str> {
        self.arguments
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Argument value with surrounding quotes removed.
    pub fn string_arg(&self, name: &str) -> Option<String> {
        self.arg(name)
            .map(|v| v.trim_matches('"').replace("\\\"", "\""))
    }

    fn from_ast(d: &ast::Directive<'_, String>) -> Self {
        Self {
            name: d.name.clone(),
            arguments: d
                .arguments
                .iter()
                .map(|(k, v)| (k.clone(), value_to_string(v)))
                .collect(),
        }
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.name)?;
        if !self.arguments.is_empty() {
            let args: Vec<String> = self
                .arguments
                .iter()
                .map(|(k, v)| format!("{k}: {v}"))
                .collect();
            write!(f, "({})", args.join(", "))?;
        }
        Ok(())
    }
}

fn value_to_string(v: &ast::Value<'_, String>) -> String {
    match v {
        ast::Value::Variable(n) => format!("${n}"),
        ast::Value::Int(n) => n.as_i64().map(|i| i.to_string()).unwrap_or_default(),
        ast::Value::Float(f) => format!("{f:?}"),
        ast::Value::String(s) => format!("{s:?}"),
        ast::Value::Boolean(b) => b.to_string(),
        ast::Value::Null => "null".to_string(),
        ast::Value::Enum(e) => e.clone(),
        ast::Value::List(items) => {
            let items: Vec<String> = items.iter().map(value_to_string).collect();
            format!("[{}]", items.join(", "))
        }
        ast::Value::Object(fields) => {
            let fields: Vec<String> = fields
                .iter()
                .map(|(k, v)| format!("{k}: {}", value_to_string(v)))
                .collect();
            format!("{{{}}}", fields.join(", "))
        }
    }
}

fn raw_string(v: &ast::Value<'_, String>) -> String {
    match v {
        ast::Value::String(s) => s.clone(),
        other => value_to_string(other),
    }
}

/// Federation metadata lifted off a field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldFederation {
    pub external: bool,
    pub shareable: bool,
    pub requires: Option<String>,
    pub provides: Option<String>,
    pub override_from: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputValueDef {
    pub name: String,
    pub description: Option<String>,
    pub ty: TypeRef,
    pub default_value: Option<String>,
    pub directives: Vec<Directive>,
    pub pos: Position,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub description: Option<String>,
    pub ty: TypeRef,
    pub args: Vec<InputValueDef>,
    pub directives: Vec<Directive>,
    pub federation: FieldFederation,
    pub pos: Position,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumValueDef {
    pub name: String,
    pub description: Option<String>,
    pub directives: Vec<Directive>,
    pub pos: Position,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDef {
    pub name: String,
    pub kind: TypeKind,
    pub description: Option<String>,
    pub directives: Vec<Directive>,
    pub interfaces: Vec<String>,
    pub fields: Vec<FieldDef>,
    pub input_fields: Vec<InputValueDef>,
    pub enum_values: Vec<EnumValueDef>,
    pub members: Vec<String>,
    /// `@key(fields:)` selections, in declaration order.
    pub keys: Vec<String>,
    /// Declared only through `extend type` / `@extends` in this document.
    pub is_extension: bool,
    pub pos: Position,
}

impl TypeDef {
    fn new(name: String, kind: TypeKind, pos: Position) -> Self {
        Self {
            name,
            kind,
            description: None,
            directives: Vec::new(),
            interfaces: Vec::new(),
            fields: Vec::new(),
            input_fields: Vec::new(),
            enum_values: Vec::new(),
            members: Vec::new(),
            keys: Vec::new(),
            is_extension: false,
            pos,
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn input_field(&self, name: &str) -> Option<&InputValueDef> {
        self.input_fields.iter().find(|f| f.name == name)
    }

    pub fn has_directive(&self, name: &str) -> bool {
        has_directive(&self.directives, name)
    }

    pub fn is_entity(&self) -> bool {
        !self.keys.is_empty()
    }
}

pub fn has_directive(directives: &[Directive], name: &str) -> bool {
    directives.iter().any(|d| d.name == name)
}

/// Values of every `@tag(name:)` in a directive list.
pub fn tags(directives: &[Directive]) -> impl Iterator<Item = String> + '_ {
    directives
        .iter()
        .filter(|d| d.name == "tag")
        .filter_map(|d| d.string_arg("name"))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootTypes {
    pub query: Option<String>,
    pub mutation: Option<String>,
    pub subscription: Option<String>,
}

impl RootTypes {
    pub fn contains(&self, name: &str) -> bool {
        [&self.query, &self.mutation, &self.subscription]
            .iter()
            .any(|r| r.as_deref() == Some(name))
    }

    fn is_default(&self) -> bool {
        self.query.as_deref().map_or(true, |q| q == "Query")
            && self.mutation.as_deref().map_or(true, |m| m == "Mutation")
            && self
                .subscription
                .as_deref()
                .map_or(true, |s| s == "Subscription")
    }
}

/// A validated, federation-desugared schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedSchema {
    pub roots: RootTypes,
    pub types: BTreeMap<String, TypeDef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrintMode {
    /// Every retained directive, including `@tag` and `@inaccessible`.
    Federated,
    /// Only client-visible directives.
    Client,
}

impl NormalizedSchema {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&TypeDef> {
        self.types.get(name)
    }

    pub fn is_known_type(&self, name: &str) -> bool {
        BUILTIN_SCALARS.contains(&name) || self.types.contains_key(name)
    }

    /// Recompute root operation names from the types present, keeping any
    /// explicit non-default root that still exists.
    pub fn refresh_roots(&mut self) {
        let pick = |explicit: &Option<String>, default: &str, types: &BTreeMap<String, TypeDef>| {
            explicit
                .clone()
                .filter(|n| types.contains_key(n))
                .or_else(|| types.contains_key(default).then(|| default.to_string()))
        };
        self.roots = RootTypes {
            query: pick(&self.roots.query, "Query", &self.types),
            mutation: pick(&self.roots.mutation, "Mutation", &self.types),
            subscription: pick(&self.roots.subscription, "Subscription", &self.types),
        };
    }

    /// Canonical SDL. Types are printed in name order, members in declaration order.
    pub fn print(&self, mode: PrintMode) -> String {
        let mut out = String::new();
        if !self.roots.is_default() {
            out.push_str("schema {\n");
            for (op, name) in [
                ("query", &self.roots.query),
                ("mutation", &self.roots.mutation),
                ("subscription", &self.roots.subscription),
            ] {
                if let Some(name) = name {
                    let _ = writeln!(out, "  {op}: {name}");
                }
            }
            out.push_str("}\n\n");
        }
        let mut first = true;
        for ty in self.types.values() {
            if !first {
                out.push('\n');
            }
            first = false;
            print_type(&mut out, ty, mode);
        }
        out
    }

    pub fn sdl_digest(&self) -> String {
        digest(&self.print(PrintMode::Federated))
    }
}

/// Hex sha256 of a string.
pub fn digest(s: &str) -> String {
    hex::encode(Sha256::digest(s.as_bytes()))
}

// ── Printing ───────────────────────────────────────────────────

fn keep_directive(d: &Directive, mode: PrintMode) -> bool {
    match mode {
        PrintMode::Federated => true,
        PrintMode::Client => CLIENT_DIRECTIVES.contains(&d.name.as_str()),
    }
}

fn print_directives(out: &mut String, directives: &[Directive], mode: PrintMode) {
    for d in directives.iter().filter(|d| keep_directive(d, mode)) {
        let _ = write!(out, " {d}");
    }
}

fn print_description(out: &mut String, description: &Option<String>, indent: &str) {
    if let Some(desc) = description {
        if desc.contains('\n') || desc.contains('"') {
            let _ = writeln!(out, "{indent}\"\"\"\n{indent}{}\n{indent}\"\"\"", desc.trim());
        } else {
            let _ = writeln!(out, "{indent}\"{desc}\"");
        }
    }
}

fn print_input_value(out: &mut String, v: &InputValueDef, mode: PrintMode) {
    let _ = write!(out, "{}: {}", v.name, v.ty);
    if let Some(default) = &v.default_value {
        let _ = write!(out, " = {default}");
    }
    print_directives(out, &v.directives, mode);
}

fn print_type(out: &mut String, ty: &TypeDef, mode: PrintMode) {
    print_description(out, &ty.description, "");
    let _ = write!(out, "{} {}", ty.kind.keyword(), ty.name);
    if !ty.interfaces.is_empty() {
        let _ = write!(out, " implements {}", ty.interfaces.join(" & "));
    }
    print_directives(out, &ty.directives, mode);
    match ty.kind {
        TypeKind::Scalar => out.push('\n'),
        TypeKind::Union => {
            if ty.members.is_empty() {
                out.push('\n');
            } else {
                let _ = writeln!(out, " = {}", ty.members.join(" | "));
            }
        }
        TypeKind::Enum => {
            out.push_str(" {\n");
            for v in &ty.enum_values {
                print_description(out, &v.description, "  ");
                let _ = write!(out, "  {}", v.name);
                print_directives(out, &v.directives, mode);
                out.push('\n');
            }
            out.push_str("}\n");
        }
        TypeKind::InputObject => {
            out.push_str(" {\n");
            for f in &ty.input_fields {
                print_description(out, &f.description, "  ");
                out.push_str("  ");
                print_input_value(out, f, mode);
                out.push('\n');
            }
            out.push_str("}\n");
        }
        TypeKind::Object | TypeKind::Interface => {
            out.push_str(" {\n");
            for f in &ty.fields {
                print_description(out, &f.description, "  ");
                let _ = write!(out, "  {}", f.name);
                if !f.args.is_empty() {
                    out.push('(');
                    for (i, a) in f.args.iter().enumerate() {
                        if i > 0 {
                            out.push_str(", ");
                        }
                        print_input_value(out, a, mode);
                    }
                    out.push(')');
                }
                let _ = write!(out, ": {}", f.ty);
                print_directives(out, &f.directives, mode);
                out.push('\n');
            }
            out.push_str("}\n");
        }
    }
}

// ── Normalization ──────────────────────────────────────────────

/// Parse and validate SDL. Empty (or whitespace-only) input yields an empty schema.
pub fn normalize(sdl: &str) -> Result<NormalizedSchema, InvalidSchemaError> {
    if sdl.trim().is_empty() {
        return Ok(NormalizedSchema::empty());
    }

    let sdl = blank_schema_extensions(sdl);
    let doc = ast::parse_schema::<String>(&sdl).map_err(|e| InvalidSchemaError {
        errors: vec![SchemaError::new(e.to_string())],
    })?;

    let mut builder = Builder::default();
    for def in &doc.definitions {
        builder.definition(def);
    }
    builder.finish()
}

/// Blank out `extend schema @link(...)` blocks, which the parser does not accept.
/// Newlines are kept so reported positions still line up with the input.
fn blank_schema_extensions(sdl: &str) -> String {
    let bytes = sdl.as_bytes();
    let mut out = bytes.to_vec();
    let mut i = 0;
    while let Some(found) = sdl[i..].find("extend") {
        let start = i + found;
        i = start + "extend".len();
        let preceded_ok = start == 0 || !is_name_byte(bytes[start - 1]);
        let rest = sdl[i..].trim_start();
        let after_ws = sdl.len() - rest.len();
        if !preceded_ok
            || !rest.starts_with("schema")
            || rest.as_bytes().get(6).is_some_and(|b| is_name_byte(*b))
        {
            continue;
        }
        let mut j = after_ws + "schema".len();
        loop {
            while j < bytes.len() && bytes[j].is_ascii_whitespace() {
                j += 1;
            }
            match bytes.get(j) {
                Some(b'@') => {
                    j += 1;
                    while j < bytes.len() && is_name_byte(bytes[j]) {
                        j += 1;
                    }
                }
                Some(b'(') => j = skip_balanced(bytes, j, b'(', b')'),
                Some(b'{') => {
                    j = skip_balanced(bytes, j, b'{', b'}');
                    break;
                }
                _ => break,
            }
        }
        for b in &mut out[start..j] {
            if *b != b'\n' {
                *b = b' ';
            }
        }
        i = j;
    }
    String::from_utf8(out).unwrap_or_else(|_| sdl.to_string())
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Index just past the bracket matching `bytes[start]`, ignoring brackets in strings.
fn skip_balanced(bytes: &[u8], start: usize, open: u8, close: u8) -> usize {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut j = start;
    while j < bytes.len() {
        let b = bytes[j];
        if in_string {
            if b == b'\\' {
                j += 1;
            } else if b == b'"' {
                in_string = false;
            }
        } else if b == b'"' {
            in_string = true;
        } else if b == open {
            depth += 1;
        } else if b == close {
            depth -= 1;
            if depth == 0 {
                return j + 1;
            }
        }
        j += 1;
    }
    bytes.len()
}

#[derive(Default)]
struct Builder {
    roots: RootTypes,
    types: BTreeMap<String, TypeDef>,
    extensions: Vec<TypeDef>,
    errors: Vec<SchemaError>,
}

impl Builder {
    fn definition(&mut self, def: &ast::Definition<'_, String>) {
        match def {
            ast::Definition::SchemaDefinition(s) => {
                self.roots = RootTypes {
                    query: s.query.clone(),
                    mutation: s.mutation.clone(),
                    subscription: s.subscription.clone(),
                };
            }
            ast::Definition::TypeDefinition(t) => {
                let ty = convert_type(t);
                if FEDERATION_TYPES.contains(&ty.name.as_str()) {
                    return;
                }
                if ty.is_extension {
                    self.extensions.push(ty);
                } else if self.types.contains_key(&ty.name) {
                    self.errors.push(SchemaError::at(
                        format!("Type \"{}\" is defined more than once", ty.name),
                        ty.pos.line,
                        ty.pos.column,
                    ));
                } else {
                    self.types.insert(ty.name.clone(), ty);
                }
            }
            ast::Definition::TypeExtension(t) => {
                let mut ty = convert_extension(t);
                ty.is_extension = true;
                if !FEDERATION_TYPES.contains(&ty.name.as_str()) {
                    self.extensions.push(ty);
                }
            }
            ast::Definition::DirectiveDefinition(_) => {}
        }
    }

    fn finish(mut self) -> Result<NormalizedSchema, InvalidSchemaError> {
        for ext in std::mem::take(&mut self.extensions) {
            self.merge_extension(ext);
        }

        for ty in self.types.values_mut() {
            ty.fields
                .retain(|f| !FEDERATION_ROOT_FIELDS.contains(&f.name.as_str()));
        }

        let mut schema = NormalizedSchema {
            roots: self.roots,
            types: self.types,
        };
        schema.refresh_roots();
        // A Query left with no fields after dropping `_entities` / `_service` is noise.
        if let Some(q) = schema.roots.query.clone() {
            if schema.types.get(&q).is_some_and(|t| t.fields.is_empty()) {
                schema.types.remove(&q);
                schema.refresh_roots();
            }
        }

        self.errors.extend(validate(&schema));
        if self.errors.is_empty() {
            Ok(schema)
        } else {
            Err(InvalidSchemaError {
                errors: self.errors,
            })
        }
    }

    fn merge_extension(&mut self, ext: TypeDef) {
        let Some(base) = self.types.get_mut(&ext.name) else {
            // Orphan extension (entity stub owned elsewhere) becomes the definition.
            self.types.insert(ext.name.clone(), ext);
            return;
        };
        if base.kind != ext.kind {
            self.errors.push(SchemaError::at(
                format!(
                    "Cannot extend {} \"{}\" with a {} extension",
                    base.kind, ext.name, ext.kind
                ),
                ext.pos.line,
                ext.pos.column,
            ));
            return;
        }
        for f in ext.fields {
            if base.field(&f.name).is_some() {
                self.errors.push(SchemaError::at(
                    format!("Field \"{}.{}\" is defined more than once", base.name, f.name),
                    f.pos.line,
                    f.pos.column,
                ));
            } else {
                base.fields.push(f);
            }
        }
        for f in ext.input_fields {
            if base.input_field(&f.name).is_some() {
                self.errors.push(SchemaError::at(
                    format!("Field \"{}.{}\" is defined more than once", base.name, f.name),
                    f.pos.line,
                    f.pos.column,
                ));
            } else {
                base.input_fields.push(f);
            }
        }
        for v in ext.enum_values {
            if !base.enum_values.iter().any(|e| e.name == v.name) {
                base.enum_values.push(v);
            }
        }
        for m in ext.members {
            if !base.members.contains(&m) {
                base.members.push(m);
            }
        }
        for i in ext.interfaces {
            if !base.interfaces.contains(&i) {
                base.interfaces.push(i);
            }
        }
        base.keys.extend(ext.keys);
        base.directives.extend(ext.directives);
    }
}

/// Split directives into retained ones and collect lifted federation metadata.
fn split_directives(
    directives: &[ast::Directive<'_, String>],
) -> (Vec<Directive>, Vec<String>, FieldFederation, bool) {
    let mut kept = Vec::new();
    let mut keys = Vec::new();
    let mut fed = FieldFederation::default();
    let mut extends = false;
    for d in directives {
        let arg = |name: &str| {
            d.arguments
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| raw_string(v))
        };
        match d.name.as_str() {
            "key" => {
                if let Some(fields) = arg("fields") {
                    keys.push(fields);
                }
            }
            "external" => fed.external = true,
            "shareable" => fed.shareable = true,
            "requires" => fed.requires = arg("fields"),
            "provides" => fed.provides = arg("fields"),
            "override" => fed.override_from = arg("from"),
            "extends" => extends = true,
            name if LIFTED_DIRECTIVES.contains(&name) => {}
            _ => kept.push(Directive::from_ast(d)),
        }
    }
    (kept, keys, fed, extends)
}

fn convert_input_value(v: &ast::InputValue<'_, String>) -> InputValueDef {
    let (directives, _, _, _) = split_directives(&v.directives);
    InputValueDef {
        name: v.name.clone(),
        description: v.description.clone(),
        ty: TypeRef::from_ast(&v.value_type),
        default_value: v.default_value.as_ref().map(value_to_string),
        directives,
        pos: v.position.into(),
    }
}

fn convert_field(f: &ast::Field<'_, String>) -> FieldDef {
    let (directives, _, federation, _) = split_directives(&f.directives);
    FieldDef {
        name: f.name.clone(),
        description: f.description.clone(),
        ty: TypeRef::from_ast(&f.field_type),
        args: f.arguments.iter().map(convert_input_value).collect(),
        directives,
        federation,
        pos: f.position.into(),
    }
}

fn convert_enum_value(v: &ast::EnumValue<'_, String>) -> EnumValueDef {
    let (directives, _, _, _) = split_directives(&v.directives);
    EnumValueDef {
        name: v.name.clone(),
        description: v.description.clone(),
        directives,
        pos: v.position.into(),
    }
}

fn type_shell(
    name: &str,
    kind: TypeKind,
    pos: Pos,
    directives: &[ast::Directive<'_, String>],
) -> TypeDef {
    let (kept, keys, _, extends) = split_directives(directives);
    let mut ty = TypeDef::new(name.to_string(), kind, pos.into());
    ty.directives = kept;
    ty.keys = keys;
    ty.is_extension = extends;
    ty
}

fn convert_type(t: &ast::TypeDefinition<'_, String>) -> TypeDef {
    match t {
        ast::TypeDefinition::Scalar(s) => {
            let mut ty = type_shell(&s.name, TypeKind::Scalar, s.position, &s.directives);
            ty.description = s.description.clone();
            ty
        }
        ast::TypeDefinition::Object(o) => {
            let mut ty = type_shell(&o.name, TypeKind::Object, o.position, &o.directives);
            ty.description = o.description.clone();
            ty.interfaces = o.implements_interfaces.clone();
            ty.fields = o.fields.iter().map(convert_field).collect();
            ty
        }
        ast::TypeDefinition::Interface(i) => {
            let mut ty = type_shell(&i.name, TypeKind::Interface, i.position, &i.directives);
            ty.description = i.description.clone();
            ty.fields = i.fields.iter().map(convert_field).collect();
            ty
        }
        ast::TypeDefinition::Union(u) => {
            let mut ty = type_shell(&u.name, TypeKind::Union, u.position, &u.directives);
            ty.description = u.description.clone();
            ty.members = u.types.clone();
            ty
        }
        ast::TypeDefinition::Enum(e) => {
            let mut ty = type_shell(&e.name, TypeKind::Enum, e.position, &e.directives);
            ty.description = e.description.clone();
            ty.enum_values = e.values.iter().map(convert_enum_value).collect();
            ty
        }
        ast::TypeDefinition::InputObject(i) => {
            let mut ty = type_shell(&i.name, TypeKind::InputObject, i.position, &i.directives);
            ty.description = i.description.clone();
            ty.input_fields = i.fields.iter().map(convert_input_value).collect();
            ty
        }
    }
}

fn convert_extension(t: &ast::TypeExtension<'_, String>) -> TypeDef {
    match t {
        ast::TypeExtension::Scalar(s) => {
            type_shell(&s.name, TypeKind::Scalar, s.position, &s.directives)
        }
        ast::TypeExtension::Object(o) => {
            let mut ty = type_shell(&o.name, TypeKind::Object, o.position, &o.directives);
            ty.interfaces = o.implements_interfaces.clone();
            ty.fields = o.fields.iter().map(convert_field).collect();
            ty
        }
        ast::TypeExtension::Interface(i) => {
            let mut ty = type_shell(&i.name, TypeKind::Interface, i.position, &i.directives);
            ty.fields = i.fields.iter().map(convert_field).collect();
            ty
        }
        ast::TypeExtension::Union(u) => {
            let mut ty = type_shell(&u.name, TypeKind::Union, u.position, &u.directives);
            ty.members = u.types.clone();
            ty
        }
        ast::TypeExtension::Enum(e) => {
            let mut ty = type_shell(&e.name, TypeKind::Enum, e.position, &e.directives);
            ty.enum_values = e.values.iter().map(convert_enum_value).collect();
            ty
        }
        ast::TypeExtension::InputObject(i) => {
            let mut ty = type_shell(&i.name, TypeKind::InputObject, i.position, &i.directives);
            ty.input_fields = i.fields.iter().map(convert_input_value).collect();
            ty
        }
    }
}

// ── Validation ─────────────────────────────────────────────────

fn validate(schema: &NormalizedSchema) -> Vec<SchemaError> {
    let mut errors = Vec::new();

    let check_ref = |errors: &mut Vec<SchemaError>, ty: &TypeRef, pos: Position, input: bool, owner: &str| {
        let name = ty.named();
        if BUILTIN_SCALARS.contains(&name) {
            return;
        }
        match schema.types.get(name) {
            None => errors.push(SchemaError::at(
                format!("Unknown type \"{name}\" referenced by \"{owner}\""),
                pos.line,
                pos.column,
            )),
            Some(target) if input && !target.kind.is_input() => errors.push(SchemaError::at(
                format!("\"{owner}\" must be an input type but \"{name}\" is a {}", target.kind),
                pos.line,
                pos.column,
            )),
            Some(target) if !input && !target.kind.is_output() => errors.push(SchemaError::at(
                format!("\"{owner}\" must be an output type but \"{name}\" is an input object"),
                pos.line,
                pos.column,
            )),
            _ => {}
        }
    };

    for ty in schema.types.values() {
        let mut seen = HashSet::new();
        for f in &ty.fields {
            if !seen.insert(f.name.as_str()) {
                errors.push(SchemaError::at(
                    format!("Field \"{}.{}\" is defined more than once", ty.name, f.name),
                    f.pos.line,
                    f.pos.column,
                ));
            }
            let owner = format!("{}.{}", ty.name, f.name);
            check_ref(&mut errors, &f.ty, f.pos, false, &owner);
            for a in &f.args {
                check_ref(&mut errors, &a.ty, a.pos, true, &format!("{owner}({})", a.name));
            }
        }
        let mut seen = HashSet::new();
        for f in &ty.input_fields {
            if !seen.insert(f.name.as_str()) {
                errors.push(SchemaError::at(
                    format!("Field \"{}.{}\" is defined more than once", ty.name, f.name),
                    f.pos.line,
                    f.pos.column,
                ));
            }
            check_ref(&mut errors, &f.ty, f.pos, true, &format!("{}.{}", ty.name, f.name));
        }
        let mut seen = HashSet::new();
        for v in &ty.enum_values {
            if !seen.insert(v.name.as_str()) {
                errors.push(SchemaError::at(
                    format!("Enum value \"{}.{}\" is defined more than once", ty.name, v.name),
                    v.pos.line,
                    v.pos.column,
                ));
            }
        }
        for m in &ty.members {
            match schema.types.get(m) {
                Some(t) if t.kind == TypeKind::Object => {}
                Some(_) => errors.push(SchemaError::at(
                    format!("Union \"{}\" member \"{m}\" is not an object type", ty.name),
                    ty.pos.line,
                    ty.pos.column,
                )),
                None => errors.push(SchemaError::at(
                    format!("Unknown type \"{m}\" referenced by union \"{}\"", ty.name),
                    ty.pos.line,
                    ty.pos.column,
                )),
            }
        }
        for i in &ty.interfaces {
            match schema.types.get(i) {
                Some(t) if t.kind == TypeKind::Interface => {}
                _ => errors.push(SchemaError::at(
                    format!("Type \"{}\" implements unknown interface \"{i}\"", ty.name),
                    ty.pos.line,
                    ty.pos.column,
                )),
            }
        }
    }

    for (op, root) in [
        ("query", &schema.roots.query),
        ("mutation", &schema.roots.mutation),
        ("subscription", &schema.roots.subscription),
    ] {
        if let Some(name) = root {
            if schema.types.get(name).map(|t| t.kind) != Some(TypeKind::Object) {
                errors.push(SchemaError::new(format!(
                    "Root {op} type \"{name}\" must be an object type"
                )));
            }
        }
    }

    errors
}

/// Top-level field names of a federation field set such as `id organization { id }`.
pub fn fieldset_top_level(selection: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    let flush = |current: &mut String, out: &mut Vec<String>| {
        if !current.is_empty() {
            out.push(std::mem::take(current));
        }
    };
    for c in selection.chars() {
        match c {
            '{' => {
                if depth == 0 {
                    flush(&mut current, &mut out);
                }
                depth += 1;
            }
            '}' => depth = depth.saturating_sub(1),
            c if c.is_whitespace() || c == ',' => {
                if depth == 0 {
                    flush(&mut current, &mut out);
                }
            }
            c if depth == 0 => current.push(c),
            _ => {}
        }
    }
    flush(&mut current, &mut out);
    out
}
