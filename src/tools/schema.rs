//! 工具参数 JSON Schema 归一化
//!
//! 外部目录的 schema 方言各不相同（嵌套 $ref / allOf / oneOf、文件上传标记、examples 数组等），
//! 交给模型前统一压平成无依赖的子集：type / description / properties / items / required / enum / format
//! 以及少量数值与长度约束。递归有深度上限；$ref 环、未知引用与超深节点一律退化为 `{}`（任意值）。

use std::collections::HashSet;

use serde_json::{json, Map, Value};
use thiserror::Error;

/// 归一化后保留的关键字
const KEPT_KEYWORDS: &[&str] = &[
    "type",
    "description",
    "properties",
    "items",
    "required",
    "enum",
    "format",
    "minimum",
    "maximum",
    "minItems",
    "maxItems",
    "minLength",
    "maxLength",
];

const FILE_HINT: &str = "file path or URL";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("schema root must be a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("schema root must describe an object, got type {0}")]
    RootType(String),
}

#[derive(Debug, Clone, Copy)]
pub struct NormalizeOptions {
    pub max_depth: usize,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self { max_depth: 8 }
    }
}

/// 使用默认选项归一化
pub fn normalize_schema(schema: &Value) -> Result<Value, SchemaError> {
    normalize_schema_with(schema, &NormalizeOptions::default())
}

pub fn normalize_schema_with(schema: &Value, opts: &NormalizeOptions) -> Result<Value, SchemaError> {
    let root = schema
        .as_object()
        .ok_or_else(|| SchemaError::NotAnObject(json_kind(schema)))?;

    let mut norm = Normalizer {
        root,
        max_depth: opts.max_depth,
        ref_stack: HashSet::new(),
    };
    let mut out = norm.node(schema, 0);

    let obj = match out.as_object_mut() {
        Some(obj) => obj,
        None => return Err(SchemaError::NotAnObject(json_kind(&out))),
    };
    match obj.get("type").and_then(Value::as_str) {
        None => {
            obj.insert("type".into(), json!("object"));
        }
        Some("object") => {}
        Some(other) => return Err(SchemaError::RootType(other.to_string())),
    }
    obj.entry("properties").or_insert_with(|| json!({}));
    Ok(out)
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

struct Normalizer<'a> {
    root: &'a Map<String, Value>,
    max_depth: usize,
    ref_stack: HashSet<String>,
}

impl Normalizer<'_> {
    fn node(&mut self, value: &Value, depth: usize) -> Value {
        if depth > self.max_depth {
            return json!({});
        }
        let Some(src) = value.as_object() else {
            return json!({});
        };
        let mut obj = src.clone();

        if let Some(reference) = obj.remove("$ref") {
            return self.inline_ref(reference.as_str().unwrap_or_default(), obj, depth);
        }

        if let Some(Value::Array(parts)) = obj.remove("allOf") {
            for part in &parts {
                let part = self.node(part, depth + 1);
                merge_into(&mut obj, part);
            }
        }
        if let Some(Value::Array(alts)) = obj.remove("oneOf") {
            if let Some(first) = alts.first() {
                let first = self.node(first, depth + 1);
                merge_into(&mut obj, first);
            }
        }
        obj.remove("anyOf");
        obj.remove("not");

        if is_file_marker(&obj) {
            let description = match obj.get("description").and_then(Value::as_str) {
                Some(d) if !d.is_empty() => format!("{d} ({FILE_HINT})"),
                _ => FILE_HINT.to_string(),
            };
            return json!({"type": "string", "description": description});
        }

        if let Some(t) = obj.get("type").cloned() {
            match collapse_type(&t) {
                Some(t) => {
                    obj.insert("type".into(), Value::String(t));
                }
                None => {
                    obj.remove("type");
                }
            }
        }

        if let Some(c) = obj.remove("const") {
            obj.entry("enum").or_insert_with(|| Value::Array(vec![c]));
        }

        if let Some(examples) = obj.remove("examples") {
            if let Some(first) = examples.as_array().and_then(|a| a.first()) {
                let shown = match first {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                let description = match obj.get("description").and_then(Value::as_str) {
                    Some(d) if !d.is_empty() => format!("{d} (example: {shown})"),
                    _ => format!("Example: {shown}"),
                };
                obj.insert("description".into(), Value::String(description));
            }
        }

        if let Some(Value::Object(props)) = obj.remove("properties") {
            let mut normalized = Map::new();
            for (name, schema) in &props {
                normalized.insert(name.clone(), self.node(schema, depth + 1));
            }
            obj.insert("properties".into(), Value::Object(normalized));
        }

        if let Some(items) = obj.remove("items") {
            let items = match &items {
                Value::Array(tuple) => tuple.first().cloned().unwrap_or_else(|| json!({})),
                other => other.clone(),
            };
            obj.insert("items".into(), self.node(&items, depth + 1));
        }

        if obj.get("format").and_then(Value::as_str).is_none() {
            obj.remove("format");
        }

        let kept: Vec<Value> = match (obj.remove("required"), obj.get("properties")) {
            (Some(Value::Array(names)), Some(Value::Object(props))) => names
                .into_iter()
                .filter(|n| n.as_str().is_some_and(|n| props.contains_key(n)))
                .collect(),
            _ => Vec::new(),
        };
        if !kept.is_empty() {
            obj.insert("required".into(), Value::Array(kept));
        }

        obj.retain(|k, _| KEPT_KEYWORDS.contains(&k.as_str()));
        Value::Object(obj)
    }

    fn inline_ref(&mut self, reference: &str, siblings: Map<String, Value>, depth: usize) -> Value {
        let target = resolve_ref(self.root, reference);
        let Some(target) = target.filter(|_| !self.ref_stack.contains(reference)) else {
            tracing::debug!(reference, "unresolvable or cyclic $ref, using any-schema");
            return self.node(&Value::Object(strip_to_description(siblings)), depth);
        };

        self.ref_stack.insert(reference.to_string());
        let mut merged = match target {
            Value::Object(t) => t.clone(),
            _ => Map::new(),
        };
        for (k, v) in siblings {
            merged.insert(k, v);
        }
        let out = self.node(&Value::Object(merged), depth + 1);
        self.ref_stack.remove(reference);
        out
    }
}

fn resolve_ref<'a>(root: &'a Map<String, Value>, reference: &str) -> Option<&'a Value> {
    let path = reference.strip_prefix("#/")?;
    let mut segments = path.split('/');
    let mut current = root.get(segments.next()?)?;
    for seg in segments {
        let seg = seg.replace("~1", "/").replace("~0", "~");
        current = current.as_object()?.get(&seg)?;
    }
    Some(current)
}

fn strip_to_description(mut siblings: Map<String, Value>) -> Map<String, Value> {
    siblings.retain(|k, _| k == "description");
    siblings
}

fn is_file_marker(obj: &Map<String, Value>) -> bool {
    let flag = |k: &str| obj.get(k).and_then(Value::as_bool).unwrap_or(false);
    flag("file_uploadable")
        || flag("file_downloadable")
        || obj.get("format").and_then(Value::as_str) == Some("binary")
}

/// ["string","null"] → "string"
fn collapse_type(t: &Value) -> Option<String> {
    match t {
        Value::String(s) => Some(s.clone()),
        Value::Array(types) => types
            .iter()
            .filter_map(Value::as_str)
            .find(|s| *s != "null")
            .map(str::to_string),
        _ => None,
    }
}

/// allOf / oneOf 合并：properties 与 required 取并集（先到先得），其余键已有则不覆盖
fn merge_into(base: &mut Map<String, Value>, part: Value) {
    let Value::Object(part) = part else {
        return;
    };
    for (k, v) in part {
        if let Some(existing) = base.get_mut(&k) {
            match (k.as_str(), existing, v) {
                ("properties", Value::Object(existing), Value::Object(incoming)) => {
                    for (name, schema) in incoming {
                        existing.entry(name).or_insert(schema);
                    }
                }
                ("required", Value::Array(existing), Value::Array(incoming)) => {
                    for name in incoming {
                        if !existing.contains(&name) {
                            existing.push(name);
                        }
                    }
                }
                _ => {}
            }
        } else {
            base.insert(k, v);
        }
    }
}
