use std::borrow::Cow;

use itertools::Itertools;

use crate::types::Value;

use super::encryption::{check_field_name, check_value};
use super::redaction::{HmacKey, Redaction};
use super::{QueryRequest, ShapeError, ShapeKey, ShapeNode};

// Bounds the recursion on adversarial input. Real queries are nowhere near this.
pub const MAX_SHAPE_DEPTH: usize = 100;

const EMPTY_ARRAY_PLACEHOLDER: &str = "[]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldPolicy {
    // Named sequence of stages. Stage names stay, stage bodies are abstracted.
    Pipeline,
    // Sort, projection and hint values encode direction/inclusion, not data
    Structural,
    // Copied as is (still scanned for encrypted payloads)
    Verbatim,
    Abstract
}

impl FieldPolicy {
    fn for_field(name: &str) -> FieldPolicy {
        match name {
            "pipeline" => FieldPolicy::Pipeline,
            "sort" | "projection" | "hint" => FieldPolicy::Structural,
            "readConcern" => FieldPolicy::Verbatim,
            _ => FieldPolicy::Abstract
        }
    }
}

// What a value means where it appears. Decides how `$`-strings and plain numbers are shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Context {
    // Query predicates (filter, $match). Every string is a literal to compare against.
    Predicate,
    // Aggregation expressions, "$a.b" refers to a field
    Expression,
    // Numbers and bools are kept, strings beginning with `$` are field paths
    Structural
}

impl Context {
    fn for_child(self, name: &str) -> Context {
        match (self, name) {
            (Context::Structural, _) => Context::Structural,
            (_, "$expr") => Context::Expression,
            // Nested stage, e.g. inside a $lookup or $facet pipeline
            (_, "$match") => Context::Predicate,
            (context, _) => context
        }
    }

    fn keeps_field_paths(self) -> bool {
        self != Context::Predicate
    }
}

#[derive(Debug, Clone, Default)]
pub struct ShapeKeyBuilder {
    redaction: Redaction
}

impl ShapeKeyBuilder {
    pub fn new() -> Self {
        Self { redaction: Redaction::None }
    }

    pub fn with_redaction(key: HmacKey) -> Self {
        Self { redaction: Redaction::Hmac(key) }
    }

    pub fn build(&self, request: &QueryRequest, application_name: Option<&str>) -> Result<ShapeKey, ShapeError> {
        let mut shape = Vec::with_capacity(request.body.len());
        // Top level names are command options ("filter", "sort", ...), never user data
        for (name, value) in request.body.iter() {
            check_field_name(name)?;
            let node = match FieldPolicy::for_field(name) {
                FieldPolicy::Pipeline => self.shape_pipeline(value)?,
                FieldPolicy::Structural => self.shape_value(value, 1, Context::Structural)?,
                FieldPolicy::Verbatim => {
                    scan_value(value, 1)?;
                    ShapeNode::Verbatim(value.clone())
                }
                FieldPolicy::Abstract => self.shape_value(value, 1, Context::Predicate)?
            };
            shape.push((name.to_string(), node));
        }
        Ok(ShapeKey::new(
            request.command,
            request.namespace.clone(),
            shape,
            application_name.map(str::to_string)
        ))
    }

    fn shape_pipeline(&self, pipeline: &Value) -> Result<ShapeNode, ShapeError> {
        let stages = match pipeline {
            Value::Array(stages) => stages,
            other => return self.shape_value(other, 1, Context::Predicate)
        };
        let mut shaped = Vec::with_capacity(stages.len());
        for stage in stages {
            match stage {
                Value::Document(stage) => {
                    let mut fields = Vec::with_capacity(stage.len());
                    for (stage_name, body) in stage.iter() {
                        check_field_name(stage_name)?;
                        let context = Context::Expression.for_child(stage_name);
                        fields.push((stage_name.to_string(), self.shape_value(body, 3, context)?));
                    }
                    shaped.push(ShapeNode::Object(fields));
                }
                other => shaped.push(self.shape_value(other, 2, Context::Predicate)?)
            }
        }
        Ok(ShapeNode::Array(shaped))
    }

    fn shape_value(&self, value: &Value, depth: usize, context: Context) -> Result<ShapeNode, ShapeError> {
        if depth > MAX_SHAPE_DEPTH {
            return Err(ShapeError::DepthLimitExceeded(MAX_SHAPE_DEPTH));
        }
        check_value(value)?;
        match value {
            Value::Document(doc) => {
                let mut fields = Vec::with_capacity(doc.len());
                for (name, v) in doc.iter() {
                    check_field_name(name)?;
                    let node = self.shape_value(v, depth + 1, context.for_child(name))?;
                    fields.push((self.shape_field_name(name).into_owned(), node));
                }
                Ok(ShapeNode::Object(fields))
            }
            Value::Array(items) => self.shape_array(items, depth, context),
            Value::String(s) if context.keeps_field_paths() && is_field_path(s) => {
                Ok(ShapeNode::Verbatim(Value::String(self.shape_field_path(s))))
            }
            Value::Int(_) | Value::Long(_) | Value::Double(_) | Value::Bool(_) if context == Context::Structural => {
                Ok(ShapeNode::Verbatim(value.clone()))
            }
            scalar => Ok(ShapeNode::Placeholder(format!("?{}", scalar.type_name())))
        }
    }

    fn shape_array(&self, items: &[Value], depth: usize, context: Context) -> Result<ShapeNode, ShapeError> {
        if items.is_empty() {
            return Ok(ShapeNode::Placeholder(EMPTY_ARRAY_PLACEHOLDER.to_string()));
        }
        let all_literals = items.iter().all(|v| match v {
            Value::String(s) => !(context.keeps_field_paths() && is_field_path(s)),
            other => other.is_scalar()
        });
        if !all_literals || context == Context::Structural {
            let shaped: Result<Vec<ShapeNode>, ShapeError> = items.iter()
                .map(|v| self.shape_value(v, depth + 1, context))
                .collect();
            return Ok(ShapeNode::Array(shaped?));
        }
        // A list of literals only carries its element type. $in with 3 or 300 values is
        // the same query.
        for item in items {
            check_value(item)?;
        }
        let element_types: Vec<&str> = items.iter().map(Value::type_name).unique().collect();
        let placeholder = match element_types.as_slice() {
            [single] => format!("?array<?{}>", single),
            _ => "?array<>".to_string()
        };
        Ok(ShapeNode::Placeholder(placeholder))
    }

    fn shape_field_name<'a>(&self, name: &'a str) -> Cow<'a, str> {
        if name.starts_with('$') {
            // Operator
            Cow::Borrowed(name)
        } else {
            self.redaction.redact_path(name)
        }
    }

    fn shape_field_path(&self, path: &str) -> String {
        if path.starts_with("$$") {
            // Variable reference ($$ROOT, $$NOW, ...)
            return path.to_string();
        }
        format!("${}", self.redaction.redact_path(&path[1..]))
    }
}

fn is_field_path(s: &str) -> bool {
    s.len() > 1 && s.starts_with('$')
}

fn scan_value(value: &Value, depth: usize) -> Result<(), ShapeError> {
    if depth > MAX_SHAPE_DEPTH {
        return Err(ShapeError::DepthLimitExceeded(MAX_SHAPE_DEPTH));
    }
    check_value(value)?;
    match value {
        Value::Document(doc) => {
            for (name, v) in doc.iter() {
                check_field_name(name)?;
                scan_value(v, depth + 1)?;
            }
            Ok(())
        }
        Value::Array(items) => items.iter().try_for_each(|v| scan_value(v, depth + 1)),
        _ => Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::doc;
    use crate::shape::{HmacKey, QueryRequest, ShapeError, ShapeNode, MAX_SHAPE_DEPTH};
    use crate::types::{BinarySubtype, Document, Namespace, Value};

    use super::ShapeKeyBuilder;

    fn ns() -> Namespace {
        Namespace::new("shop", "orders")
    }

    fn placeholder(p: &str) -> ShapeNode {
        ShapeNode::Placeholder(p.to_string())
    }

    #[test]
    fn literals_are_abstracted() {
        let builder = ShapeKeyBuilder::new();
        let five = builder.build(&QueryRequest::find(ns(), doc! { "filter" => doc! { "a" => 5 } }), None).unwrap();
        let seven = builder.build(&QueryRequest::find(ns(), doc! { "filter" => doc! { "a" => 7 } }), None).unwrap();
        assert_eq!(five, seven);
        assert_eq!(five.hash(), seven.hash());
        assert_eq!(
            five.field("filter"),
            Some(&ShapeNode::Object(vec![("a".to_string(), placeholder("?number"))]))
        );
    }

    #[test]
    fn literal_types_matter_but_widths_do_not() {
        let builder = ShapeKeyBuilder::new();
        let build = |v: Value| builder.build(&QueryRequest::find(ns(), doc! { "filter" => doc! { "a" => v } }), None).unwrap();
        assert_eq!(build(Value::Int(1)), build(Value::Double(2.5)));
        assert_eq!(build(Value::Int(1)), build(Value::Long(1 << 40)));
        assert_ne!(build(Value::Int(1)), build(Value::from("1")));
        assert_ne!(build(Value::Null), build(Value::Bool(false)));
    }

    #[test]
    fn structure_matters() {
        let builder = ShapeKeyBuilder::new();
        let a = builder.build(&QueryRequest::find(ns(), doc! { "filter" => doc! { "a" => 1 } }), None).unwrap();
        let b = builder.build(&QueryRequest::find(ns(), doc! { "filter" => doc! { "b" => 1 } }), None).unwrap();
        let gt = builder.build(&QueryRequest::find(ns(), doc! { "filter" => doc! { "a" => doc! { "$gt" => 1 } } }), None).unwrap();
        let other_ns = builder.build(&QueryRequest::find(Namespace::new("shop", "users"), doc! { "filter" => doc! { "a" => 1 } }), None).unwrap();
        assert_ne!(a, b);
        assert_ne!(a, gt);
        assert_ne!(a, other_ns);
    }

    #[test]
    fn literal_arrays_collapse() {
        let builder = ShapeKeyBuilder::new();
        let build = |v: Value| builder.build(&QueryRequest::find(ns(), doc! { "filter" => doc! { "a" => doc! { "$in" => v } } }), None).unwrap();
        assert_eq!(build(Value::from(vec![1, 2, 3])), build(Value::from(vec![4])));
        let in_node = |key: &crate::shape::ShapeKey| match key.field("filter") {
            Some(ShapeNode::Object(fields)) => match &fields[0].1 {
                ShapeNode::Object(ops) => ops[0].1.clone(),
                other => panic!("unexpected {:?}", other)
            },
            other => panic!("unexpected {:?}", other)
        };
        assert_eq!(in_node(&build(Value::from(vec![1, 2]))), placeholder("?array<?number>"));
        assert_eq!(in_node(&build(Value::Array(vec![Value::Int(1), Value::from("x")]))), placeholder("?array<>"));
        assert_eq!(in_node(&build(Value::Array(vec![]))), placeholder("[]"));
    }

    #[test]
    fn nested_arrays_are_walked() {
        let builder = ShapeKeyBuilder::new();
        let filter = doc! { "$or" => vec![Value::from(doc! { "a" => 1 }), Value::from(doc! { "b" => "x" })] };
        let key = builder.build(&QueryRequest::find(ns(), doc! { "filter" => filter }), None).unwrap();
        assert_eq!(key.field("filter"), Some(&ShapeNode::Object(vec![(
            "$or".to_string(),
            ShapeNode::Array(vec![
                ShapeNode::Object(vec![("a".to_string(), placeholder("?number"))]),
                ShapeNode::Object(vec![("b".to_string(), placeholder("?string"))]),
            ])
        )])));
    }

    #[test]
    fn structural_fields_keep_directions() {
        let builder = ShapeKeyBuilder::new();
        let asc = builder.build(&QueryRequest::find(ns(), doc! { "filter" => doc! {}, "sort" => doc! { "a" => 1 }, "limit" => 10 }), None).unwrap();
        let desc = builder.build(&QueryRequest::find(ns(), doc! { "filter" => doc! {}, "sort" => doc! { "a" => -1 }, "limit" => 20 }), None).unwrap();
        assert_ne!(asc, desc);
        assert_eq!(asc.field("limit"), Some(&placeholder("?number")));
    }

    #[test]
    fn pipeline_stage_names_survive_redaction() {
        let key = HmacKey::new(b"k").unwrap();
        let builder = ShapeKeyBuilder::with_redaction(key.clone());
        let pipeline = vec![
            Value::from(doc! { "$match" => doc! { "status" => "A" } }),
            Value::from(doc! { "$group" => doc! { "_id" => "$cust.id", "total" => doc! { "$sum" => "$amount" } } }),
        ];
        let shape = builder.build(&QueryRequest::aggregate(ns(), doc! { "pipeline" => pipeline }), None).unwrap();
        let expected = ShapeNode::Array(vec![
            ShapeNode::Object(vec![("$match".to_string(), ShapeNode::Object(vec![
                (key.sign(b"status"), placeholder("?string"))
            ]))]),
            ShapeNode::Object(vec![("$group".to_string(), ShapeNode::Object(vec![
                (key.sign(b"_id"), ShapeNode::Verbatim(Value::String(format!("${}.{}", key.sign(b"cust"), key.sign(b"id"))))),
                (key.sign(b"total"), ShapeNode::Object(vec![
                    ("$sum".to_string(), ShapeNode::Verbatim(Value::String(format!("${}", key.sign(b"amount")))))
                ])),
            ]))]),
        ]);
        assert_eq!(shape.field("pipeline"), Some(&expected));
    }

    #[test]
    fn field_paths_and_variables_without_redaction() {
        let builder = ShapeKeyBuilder::new();
        let pipeline = vec![Value::from(doc! { "$project" => doc! { "x" => "$a", "r" => "$$ROOT", "s" => "lit" } })];
        let shape = builder.build(&QueryRequest::aggregate(ns(), doc! { "pipeline" => pipeline }), None).unwrap();
        assert_eq!(shape.field("pipeline"), Some(&ShapeNode::Array(vec![ShapeNode::Object(vec![(
            "$project".to_string(),
            ShapeNode::Object(vec![
                ("x".to_string(), ShapeNode::Verbatim(Value::from("$a"))),
                ("r".to_string(), ShapeNode::Verbatim(Value::from("$$ROOT"))),
                ("s".to_string(), placeholder("?string")),
            ])
        )])])));
    }

    #[test]
    fn dollar_strings_in_predicates_are_literals() {
        let builder = ShapeKeyBuilder::new();
        let build = |s: &str| builder.build(&QueryRequest::find(ns(), doc! { "filter" => doc! { "a" => s } }), None).unwrap();
        let x = build("$x");
        let y = build("$y");
        assert_eq!(x, y);
        assert_eq!(x.field("filter"), Some(&ShapeNode::Object(vec![("a".to_string(), placeholder("?string"))])));
        let rendered = x.to_json().to_string();
        assert!(!rendered.contains("$x"));
        assert!(!rendered.contains("$y"));

        let in_list = |v: Vec<&str>| builder.build(&QueryRequest::find(ns(), doc! {
            "filter" => doc! { "a" => doc! { "$in" => v } }
        }), None).unwrap();
        assert_eq!(in_list(vec!["$ecret1", "$ecret2"]), in_list(vec!["plain"]));

        let matching = |s: &str| builder.build(&QueryRequest::aggregate(ns(), doc! {
            "pipeline" => vec![Value::from(doc! { "$match" => doc! { "password" => s } })]
        }), None).unwrap();
        assert_eq!(matching("$ecret1"), matching("$ecret2"));
        assert!(!matching("$ecret1").to_json().to_string().contains("ecret"));
    }

    #[test]
    fn expr_keeps_field_paths() {
        let builder = ShapeKeyBuilder::new();
        let key = builder.build(&QueryRequest::find(ns(), doc! {
            "filter" => doc! { "$expr" => doc! { "$eq" => vec!["$a", "$b"] } }
        }), None).unwrap();
        assert_eq!(key.field("filter"), Some(&ShapeNode::Object(vec![(
            "$expr".to_string(),
            ShapeNode::Object(vec![(
                "$eq".to_string(),
                ShapeNode::Array(vec![ShapeNode::Verbatim(Value::from("$a")), ShapeNode::Verbatim(Value::from("$b"))])
            )])
        )])));

        // A $match nested in another stage is a predicate again
        let nested = |s: &str| builder.build(&QueryRequest::aggregate(ns(), doc! {
            "pipeline" => vec![Value::from(doc! { "$facet" => doc! {
                "open" => vec![Value::from(doc! { "$match" => doc! { "status" => s } })]
            } })]
        }), None).unwrap();
        assert_eq!(nested("$one"), nested("$two"));
    }

    #[test]
    fn redaction_is_deterministic_and_hides_names() {
        let builder = ShapeKeyBuilder::with_redaction(HmacKey::new(b"tenant secret").unwrap());
        let request = QueryRequest::find(ns(), doc! { "filter" => doc! { "ssn" => "123-45-6789" } });
        let a = builder.build(&request, Some("billing")).unwrap();
        let b = builder.build(&request, Some("billing")).unwrap();
        assert_eq!(a, b);
        let rendered = a.to_json().to_string();
        assert!(!rendered.contains("ssn"));
        assert!(!rendered.contains("123-45-6789"));
        // application names are embedded verbatim
        assert!(rendered.contains("billing"));
        let other_key = ShapeKeyBuilder::with_redaction(HmacKey::new(b"another").unwrap());
        assert_ne!(a, other_key.build(&request, Some("billing")).unwrap());
    }

    #[test]
    fn read_concern_is_verbatim() {
        let builder = ShapeKeyBuilder::new();
        let key = builder.build(&QueryRequest::aggregate(ns(), doc! {
            "pipeline" => Vec::<Value>::new(),
            "readConcern" => doc! { "level" => "majority" }
        }), None).unwrap();
        assert_eq!(key.field("readConcern"), Some(&ShapeNode::Verbatim(Value::from(doc! { "level" => "majority" }))));
    }

    #[test]
    fn encrypted_payloads_anywhere_fail() {
        let builder = ShapeKeyBuilder::new();
        let encrypted = Value::Binary { subtype: BinarySubtype::ENCRYPTED, bytes: vec![0, 7, 7] };
        let bodies = vec![
            doc! { "filter" => doc! { "__safeContent__" => doc! { "$all" => vec![1] } } },
            doc! { "filter" => doc! { "a" => doc! { "$_internalFleEq" => doc! {} } } },
            doc! { "filter" => doc! { "$and" => vec![Value::from(doc! { "a" => encrypted.clone() })] } },
            doc! { "filter" => doc! { "a" => doc! { "$in" => vec![Value::Int(1), encrypted.clone()] } } },
            doc! { "pipeline" => vec![Value::from(doc! { "$project" => doc! { "x" => "$__safeContent__" } })] },
            doc! { "readConcern" => doc! { "level" => encrypted.clone() } },
            doc! { "sort" => doc! { "__safeContent__" => 1 } },
        ];
        for body in bodies {
            let result = builder.build(&QueryRequest::find(ns(), body.clone()), None);
            assert!(matches!(result, Err(ShapeError::EncryptedPayloadDetected(_))), "{:?}", body);
        }
    }

    #[test]
    fn depth_is_bounded() {
        let builder = ShapeKeyBuilder::new();
        let mut nested = doc! { "leaf" => 1 };
        for _ in 0..MAX_SHAPE_DEPTH + 5 {
            nested = doc! { "n" => nested };
        }
        let result = builder.build(&QueryRequest::find(ns(), doc! { "filter" => nested }), None);
        assert_eq!(result, Err(ShapeError::DepthLimitExceeded(MAX_SHAPE_DEPTH)));

        let mut shallow = doc! { "leaf" => 1 };
        for _ in 0..10 {
            shallow = doc! { "n" => shallow };
        }
        assert!(builder.build(&QueryRequest::find(ns(), doc! { "filter" => shallow }), None).is_ok());
    }

    #[test]
    fn empty_body() {
        let builder = ShapeKeyBuilder::new();
        let key = builder.build(&QueryRequest::find(ns(), Document::new()), None).unwrap();
        assert!(key.shape().is_empty());
    }
}
